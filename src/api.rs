use axum::{
    extract::{DefaultBodyLimit, FromRef, FromRequest, Multipart, Path, Query, Request, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    account_service::AccountService,
    api_error,
    auth::{self, AuthUser, JwtKeys},
    card_service::CardService,
    content_extractor::{self, FileKind, WebFetcher, MAX_FILE_BYTES, MAX_FILE_CHARS, MAX_PAGE_CHARS, TRUNCATION_MARKER},
    errors::{ApiError, ErrorContext},
    llm_service::{DocumentInput, LLMService},
    models::*,
    quiz_service::QuizService,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

/// Page text sent to the model when generating from a URL.
pub const URL_PROMPT_CHARS: usize = 8_000;
/// Pages with less text than this are not worth a generation call.
pub const MIN_PAGE_CHARS: usize = 50;
/// Multipart bodies carry a little framing on top of the file itself.
const UPLOAD_BODY_LIMIT: usize = MAX_FILE_BYTES + 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub card_service: CardService,
    pub account_service: AccountService,
    pub llm_service: LLMService,
    pub quiz_service: QuizService,
    pub fetcher: WebFetcher,
    pub jwt: JwtKeys,
    pub cookie_secure: bool,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedCards {
    pub cards: Vec<StudyCard>,
    pub count: usize,
}

type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);
type HandlerResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// JSON request body whose rejections use the standard error envelope.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())
                .to_response_with_context(ErrorContext::new("parse_body", "request"))),
        }
    }
}

// Auth endpoints
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<ApiResponse<SessionResponse>>), ErrorResponse> {
    log_api_start!("register");

    let session = state
        .account_service
        .register(request)
        .await
        .map_err(|e| api_error!(from, "register", "user", e))?;

    log_api_success!("register", user_id = session.user.id, "account created");
    let jar = jar.add(auth::session_cookie(session.token, session.ttl_days, state.cookie_secure));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(ApiResponse::success(SessionResponse { user: session.user })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(request): JsonBody<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), ErrorResponse> {
    log_api_start!("login");

    let session = state
        .account_service
        .login(request)
        .await
        .map_err(|e| api_error!(from, "login", "session", e))?;

    log_api_success!("login", user_id = session.user.id, "signed in");
    let jar = jar.add(auth::session_cookie(session.token, session.ttl_days, state.cookie_secure));
    Ok((jar, Json(ApiResponse::success(SessionResponse { user: session.user }))))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<ApiResponse<MessageResponse>>) {
    let jar = jar.add(auth::cleared_session_cookie(state.cookie_secure));
    (jar, Json(ApiResponse::success(MessageResponse::new("Signed out"))))
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> HandlerResult<SessionResponse> {
    let user = state
        .account_service
        .me(user.id)
        .await
        .map_err(|e| api_error!(from, "me", "user", e))?;
    Ok(Json(ApiResponse::success(SessionResponse { user })))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ForgotPasswordRequest>,
) -> HandlerResult<MessageResponse> {
    log_api_start!("forgot_password");

    state
        .account_service
        .forgot_password(request)
        .await
        .map_err(|e| api_error!(from, "forgot_password", "user", e))?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "If that email is registered, a password reset link has been sent",
    ))))
}

pub async fn reset_password(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<ResetPasswordRequest>,
) -> HandlerResult<MessageResponse> {
    log_api_start!("reset_password");

    state
        .account_service
        .reset_password(request)
        .await
        .map_err(|e| api_error!(from, "reset_password", "user", e))?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password has been reset. Please sign in with your new password",
    ))))
}

// Card endpoints
pub async fn list_cards(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CardListQuery>,
) -> HandlerResult<CardPage> {
    log_api_start!("list_cards", user_id = user.id);

    match state.card_service.list_cards(user.id, &query, false).await {
        Ok(page) => {
            log_api_success!("list_cards", user_id = user.id, count = page.cards.len(), "cards listed");
            Ok(Json(ApiResponse::success(page)))
        }
        Err(e) => {
            log_api_error!("list_cards", user_id = user.id, error = e, "failed to list cards");
            Err(api_error!(from, "list_cards", "card", e))
        }
    }
}

pub async fn list_favorites(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CardListQuery>,
) -> HandlerResult<CardPage> {
    log_api_start!("list_favorites", user_id = user.id);

    let page = state
        .card_service
        .list_cards(user.id, &query, true)
        .await
        .map_err(|e| api_error!(from, "list_favorites", "card", e))?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn create_cards(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<CreateCardsRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SavedCards>>), ErrorResponse> {
    log_api_start!("create_cards", user_id = user.id);

    match state.card_service.create_cards(user.id, request.cards).await {
        Ok(cards) => {
            log_api_success!("create_cards", user_id = user.id, count = cards.len(), "cards saved");
            let count = cards.len();
            Ok((
                StatusCode::CREATED,
                Json(ApiResponse::success(SavedCards { cards, count })),
            ))
        }
        Err(e) => {
            if matches!(e, ApiError::QuotaExceeded(_)) {
                log_api_warn!("create_cards", user_id = user.id, "free tier card limit reached");
            }
            Err(api_error!(from, "create_cards", "card", e))
        }
    }
}

pub async fn get_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> HandlerResult<StudyCard> {
    log_api_start!("get_card", user_id = user.id, card_id = id);

    state
        .card_service
        .get_card(user.id, id)
        .await
        .map(|card| Json(ApiResponse::success(card)))
        .map_err(|e| {
            e.to_response_with_context(ErrorContext::new("get_card", "card").with_id(&id.to_string()))
        })
}

pub async fn update_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<CardInput>,
) -> HandlerResult<StudyCard> {
    log_api_start!("update_card", user_id = user.id, card_id = id);

    match state.card_service.update_card(user.id, id, input).await {
        Ok(card) => {
            log_api_success!("update_card", user_id = user.id, card_id = id, "card updated");
            Ok(Json(ApiResponse::success(card)))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("update_card", "card").with_id(&id.to_string()),
        )),
    }
}

pub async fn delete_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> HandlerResult<MessageResponse> {
    log_api_start!("delete_card", user_id = user.id, card_id = id);

    match state.card_service.delete_card(user.id, id).await {
        Ok(()) => {
            log_api_success!("delete_card", user_id = user.id, card_id = id, "card deleted");
            Ok(Json(ApiResponse::success(MessageResponse::new("Card deleted"))))
        }
        Err(e) => Err(e.to_response_with_context(
            ErrorContext::new("delete_card", "card").with_id(&id.to_string()),
        )),
    }
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<ToggleFavoriteRequest>,
) -> HandlerResult<StudyCard> {
    log_api_start!("toggle_favorite", user_id = user.id);

    let card = state
        .card_service
        .toggle_favorite(user.id, request)
        .await
        .map_err(|e| api_error!(from, "toggle_favorite", "card", e))?;

    log_api_success!("toggle_favorite", user_id = user.id, card_id = card.id, "favorite updated");
    Ok(Json(ApiResponse::success(card)))
}

// Generation endpoints
pub async fn generate_cards(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<GenerateCardsRequest>,
) -> HandlerResult<GeneratedCards> {
    log_api_start!("generate_cards");

    let text = request.text.as_deref().map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(api_error!(validation, "generate_cards", "card", "Please provide study material"));
    }

    let mode = GenerationMode::parse(request.mode.as_deref());
    let cards = state
        .llm_service
        .generate_cards(text, mode, &request.custom_tags)
        .await
        .map_err(|e| api_error!(from, "generate_cards", "card", e))?;

    log_api_success!("generate_cards", count = cards.len(), "cards generated");
    Ok(Json(ApiResponse::success(GeneratedCards { cards })))
}

pub async fn fetch_url(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<FetchUrlRequest>,
) -> HandlerResult<WebPage> {
    let url = required_url(request.url).map_err(|e| api_error!(from, "fetch_url", "web_page", e))?;
    log_api_start!("fetch_url");

    let page = state
        .fetcher
        .fetch(&url, MAX_PAGE_CHARS)
        .await
        .map_err(|e| api_error!(from, "fetch_url", "web_page", e))?;

    log_api_success!("fetch_url", count = page.word_count, "page fetched");
    Ok(Json(ApiResponse::success(page)))
}

pub async fn generate_cards_from_url(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<GenerateFromUrlRequest>,
) -> HandlerResult<GeneratedCards> {
    const OPERATION: &str = "generate_cards_from_url";
    let url = required_url(request.url).map_err(|e| api_error!(from, OPERATION, "web_page", e))?;
    log_api_start!(OPERATION);

    let page = state
        .fetcher
        .fetch(&url, URL_PROMPT_CHARS)
        .await
        .map_err(|e| api_error!(from, OPERATION, "web_page", e))?;

    if page.content.trim().chars().count() < MIN_PAGE_CHARS {
        return Err(api_error!(
            validation,
            OPERATION,
            "web_page",
            "The page does not contain enough text to generate cards"
        ));
    }

    let mode = GenerationMode::parse(request.mode.as_deref());
    let cards = state
        .llm_service
        .generate_cards_from_page(&page, mode, &request.custom_tags)
        .await
        .map_err(|e| api_error!(from, OPERATION, "card", e))?;

    log_api_success!(OPERATION, count = cards.len(), "cards generated from page");
    Ok(Json(ApiResponse::success(GeneratedCards { cards })))
}

pub async fn generate_cards_from_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<GeneratedCards> {
    const OPERATION: &str = "generate_cards_from_file";
    log_api_start!(OPERATION);

    let upload = read_upload(multipart)
        .await
        .map_err(|e| api_error!(from, OPERATION, "file", e))?;
    let size_bytes = upload.bytes.len();

    let text = match upload.kind {
        FileKind::Pdf => match content_extractor::extract_pdf_text(upload.bytes.clone()).await {
            Some(text) => text,
            None => {
                info!(file_name = %upload.file_name, "No local PDF text, falling back to Moonshot extraction");
                state
                    .llm_service
                    .extract_pdf_text(&upload.file_name, upload.bytes)
                    .await
                    .map_err(|e| api_error!(from, OPERATION, "file", e))?
            }
        },
        kind => content_extractor::decode_text_file(kind, &upload.bytes),
    };

    if text.trim().is_empty() {
        return Err(api_error!(
            validation,
            OPERATION,
            "file",
            "No text could be extracted from the file"
        ));
    }

    let document = DocumentInput {
        file_name: upload.file_name,
        kind: upload.kind,
        size_bytes,
        text: content_extractor::truncate_chars(text.trim(), MAX_FILE_CHARS, TRUNCATION_MARKER),
    };

    let cards = state
        .llm_service
        .generate_cards_from_document(&document, upload.mode, &upload.custom_tags)
        .await
        .map_err(|e| api_error!(from, OPERATION, "card", e))?;

    info!(
        file_name = %document.file_name,
        file_type = document.kind.as_str(),
        card_count = cards.len(),
        "Cards generated from file"
    );
    Ok(Json(ApiResponse::success(GeneratedCards { cards })))
}

pub async fn generate_cards_moonshot(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<GeneratedCards> {
    const OPERATION: &str = "generate_cards_moonshot";
    log_api_start!(OPERATION);

    let upload = read_upload(multipart)
        .await
        .map_err(|e| api_error!(from, OPERATION, "file", e))?;

    let cards = state
        .llm_service
        .generate_cards_with_moonshot(&upload.file_name, upload.bytes, &upload.custom_tags)
        .await
        .map_err(|e| api_error!(from, OPERATION, "card", e))?;

    log_api_success!(OPERATION, count = cards.len(), "cards generated with moonshot");
    Ok(Json(ApiResponse::success(GeneratedCards { cards })))
}

// Quiz endpoints
pub async fn start_quiz(State(state): State<AppState>, user: AuthUser) -> HandlerResult<Quiz> {
    log_api_start!("start_quiz", user_id = user.id);

    let quiz = state
        .quiz_service
        .start(user.id)
        .await
        .map_err(|e| api_error!(from, "start_quiz", "quiz", e))?;

    log_api_success!("start_quiz", user_id = user.id, count = quiz.total_questions, "quiz started");
    Ok(Json(ApiResponse::success(quiz)))
}

pub async fn analyze_quiz(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<AnalyzeQuizRequest>,
) -> HandlerResult<QuizResult> {
    log_api_start!("analyze_quiz", user_id = user.id);

    match state.quiz_service.analyze(user.id, request).await {
        Ok(result) => {
            log_api_success!("analyze_quiz", user_id = user.id, "quiz graded");
            Ok(Json(ApiResponse::success(result)))
        }
        Err(e) => {
            log_api_error!("analyze_quiz", user_id = user.id, error = e, "quiz analysis failed");
            Err(api_error!(from, "analyze_quiz", "quiz", e))
        }
    }
}

// Streak endpoints
pub async fn advance_streak(State(state): State<AppState>, user: AuthUser) -> HandlerResult<StreakUpdate> {
    let update = state
        .account_service
        .advance_streak(user.id, Utc::now().date_naive())
        .await
        .map_err(|e| api_error!(from, "advance_streak", "user", e))?;
    Ok(Json(ApiResponse::success(update)))
}

pub async fn get_streak(State(state): State<AppState>, user: AuthUser) -> HandlerResult<StreakStatus> {
    let status = state
        .account_service
        .streak_status(user.id, Utc::now().date_naive())
        .await
        .map_err(|e| api_error!(from, "get_streak", "user", e))?;
    Ok(Json(ApiResponse::success(status)))
}

pub async fn activity_streak(State(state): State<AppState>, user: AuthUser) -> HandlerResult<ActivityStats> {
    let stats = state
        .card_service
        .activity_stats(user.id, Utc::now().date_naive())
        .await
        .map_err(|e| api_error!(from, "activity_streak", "card", e))?;
    Ok(Json(ApiResponse::success(stats)))
}

fn required_url(url: Option<String>) -> Result<String, ApiError> {
    url.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::ValidationError("Please provide a web page URL".to_string()))
}

/// A checked file upload with its form options.
struct Upload {
    file_name: String,
    kind: FileKind,
    bytes: Vec<u8>,
    mode: GenerationMode,
    custom_tags: Vec<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut mode = GenerationMode::default();
    let mut custom_tags = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Could not read the file: {}", e)))?;
                file = Some((file_name, mime, bytes.to_vec()));
            }
            "mode" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Could not read mode: {}", e)))?;
                mode = GenerationMode::parse(Some(value.trim()));
            }
            "customTags" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Could not read customTags: {}", e)))?;
                custom_tags = parse_custom_tags(&value)?;
            }
            other => warn!(field = %other, "Ignoring unexpected upload field"),
        }
    }

    let (file_name, mime, bytes) =
        file.ok_or_else(|| ApiError::ValidationError("Please upload a file".to_string()))?;

    if bytes.is_empty() {
        return Err(ApiError::ValidationError("The uploaded file is empty".to_string()));
    }
    if bytes.len() > MAX_FILE_BYTES {
        return Err(ApiError::ValidationError(format!(
            "File is too large. The maximum size is {} MB",
            MAX_FILE_BYTES / (1024 * 1024)
        )));
    }

    let kind = FileKind::detect(&file_name, mime.as_deref()).ok_or_else(|| {
        ApiError::ValidationError(
            "Unsupported file type. Please upload a PDF, Markdown or text file".to_string(),
        )
    })?;

    Ok(Upload {
        file_name,
        kind,
        bytes,
        mode,
        custom_tags,
    })
}

/// `customTags` arrives as a JSON array inside a form field.
fn parse_custom_tags(raw: &str) -> Result<Vec<String>, ApiError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<String>>(raw)
        .map_err(|_| ApiError::ValidationError("customTags must be a JSON array of strings".to_string()))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Auth routes
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password", post(reset_password))

        // Card routes
        .route("/api/cards", get(list_cards).post(create_cards))
        .route("/api/cards/favorites", get(list_favorites).post(toggle_favorite))
        .route("/api/cards/:id", get(get_card).put(update_card).delete(delete_card))

        // Generation routes
        .route("/api/generate-cards", post(generate_cards))
        .route("/api/fetch-url", post(fetch_url))
        .route("/api/generate-cards-from-url", post(generate_cards_from_url))
        .route(
            "/api/generate-cards-from-file",
            post(generate_cards_from_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/api/generate-cards-moonshot",
            post(generate_cards_moonshot).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )

        // Quiz routes
        .route("/api/quiz/start", post(start_quiz))
        .route("/api/quiz/analyze", post(analyze_quiz))

        // Streak routes
        .route("/api/user/streak", get(get_streak).post(advance_streak))
        .route("/api/stats/streak", get(activity_streak))

        .with_state(state)
}
