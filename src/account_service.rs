use chrono::{Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{self, JwtKeys, MIN_PASSWORD_LEN, REMEMBER_ME_DAYS, RESET_TOKEN_TTL_HOURS, SESSION_DAYS};
use crate::database::Database;
use crate::errors::{classify_database_error, ApiError, ApiResult};
use crate::mailer::Mailer;
use crate::models::*;
use crate::streak;
use crate::log_api_warn;

lazy_static! {
    static ref EMAIL_PATTERN: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
}

const BAD_CREDENTIALS: &str = "Invalid email or password";
const BAD_RESET_TOKEN: &str = "Invalid or expired reset token";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A signed-in user and the token to put in the session cookie.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: PublicUser,
    pub token: String,
    pub ttl_days: i64,
}

#[derive(Clone)]
pub struct AccountService {
    db: Database,
    jwt: JwtKeys,
    mailer: Arc<dyn Mailer>,
    base_url: String,
}

impl AccountService {
    pub fn new(db: Database, jwt: JwtKeys, mailer: Arc<dyn Mailer>, base_url: String) -> Self {
        Self {
            db,
            jwt,
            mailer,
            base_url,
        }
    }

    fn session_for(&self, user: &User, ttl_days: i64) -> ApiResult<Session> {
        let token = self.jwt.sign(user, ttl_days)?;
        Ok(Session {
            user: PublicUser::from(user),
            token,
            ttl_days,
        })
    }

    pub async fn register(&self, request: RegisterRequest) -> ApiResult<Session> {
        let (Some(name), Some(email), Some(password)) = (
            required(request.name),
            required(request.email),
            required(request.password),
        ) else {
            return Err(ApiError::ValidationError(
                "Name, email and password are required".to_string(),
            ));
        };

        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            return Err(ApiError::ValidationError("Please enter a valid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(ApiError::DuplicateResource("Email is already registered".to_string()));
        }

        let password_hash = auth::hash_password(&password)?;
        let user = self
            .db
            .create_user(name.trim(), &email, &password_hash)
            .await
            .map_err(|e| classify_database_error(&e))?;

        info!(user_id = %user.id, "User registered");
        self.session_for(&user, SESSION_DAYS)
    }

    pub async fn login(&self, request: LoginRequest) -> ApiResult<Session> {
        let (Some(email), Some(password)) = (required(request.email), required(request.password)) else {
            return Err(ApiError::ValidationError("Email and password are required".to_string()));
        };

        let Some(user) = self.db.get_user_by_email(&normalize_email(&email)).await? else {
            log_api_warn!("login", "unknown email");
            return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
        };

        if !auth::verify_password(&password, &user.password_hash)? {
            log_api_warn!("login", user_id = user.id, "password mismatch");
            return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
        }

        let ttl_days = if request.remember_me { REMEMBER_ME_DAYS } else { SESSION_DAYS };
        self.session_for(&user, ttl_days)
    }

    pub async fn me(&self, user_id: Uuid) -> ApiResult<PublicUser> {
        self.db
            .get_user(user_id)
            .await?
            .map(|u| PublicUser::from(&u))
            .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))
    }

    /// Always succeeds for well-formed input so accounts cannot be enumerated.
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> ApiResult<()> {
        let email = required(request.email)
            .map(|e| normalize_email(&e))
            .ok_or_else(|| ApiError::ValidationError("Email is required".to_string()))?;
        if !is_valid_email(&email) {
            return Err(ApiError::ValidationError("Please enter a valid email address".to_string()));
        }

        let Some(user) = self.db.get_user_by_email(&email).await? else {
            log_api_warn!("forgot_password", "reset requested for unknown email");
            return Ok(());
        };

        let token = auth::generate_reset_token();
        let expiry = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
        self.db.set_reset_token(user.id, &token, expiry).await?;

        let reset_url = format!("{}/auth/reset-password?token={}", self.base_url, token);
        match self
            .mailer
            .send_password_reset(&user.email, &user.name, &reset_url)
            .await
        {
            Ok(()) => info!(user_id = %user.id, "Password reset email dispatched"),
            Err(e) => warn!(user_id = %user.id, error = %e, "Password reset email failed"),
        }
        Ok(())
    }

    pub async fn reset_password(&self, request: ResetPasswordRequest) -> ApiResult<()> {
        let (Some(token), Some(password)) = (required(request.token), required(request.password)) else {
            return Err(ApiError::ValidationError("Token and new password are required".to_string()));
        };
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::ValidationError(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user = self
            .db
            .get_user_by_reset_token(token.trim())
            .await?
            .filter(|u| u.reset_token_expiry.is_some_and(|exp| exp > Utc::now()))
            .ok_or_else(|| ApiError::BadRequest(BAD_RESET_TOKEN.to_string()))?;

        let password_hash = auth::hash_password(&password)?;
        self.db.reset_password(user.id, &password_hash).await?;
        info!(user_id = %user.id, "Password reset completed");
        Ok(())
    }

    pub async fn advance_streak(&self, user_id: Uuid, today: NaiveDate) -> ApiResult<StreakUpdate> {
        let user = self.load_user(user_id).await?;
        let update = streak::advance(user.consecutive_days, user.last_active_date, today);
        if update.is_new_day {
            self.db
                .update_streak(user_id, update.consecutive_days, Some(today))
                .await?;
        }
        Ok(update)
    }

    pub async fn streak_status(&self, user_id: Uuid, today: NaiveDate) -> ApiResult<StreakStatus> {
        let user = self.load_user(user_id).await?;
        let consecutive_days = streak::current(user.consecutive_days, user.last_active_date, today);

        if streak::is_broken(user.last_active_date, today) && user.consecutive_days != 0 {
            self.db
                .update_streak(user_id, 0, user.last_active_date)
                .await?;
        }

        Ok(StreakStatus {
            consecutive_days,
            last_active_date: user.last_active_date,
        })
    }

    async fn load_user(&self, user_id: Uuid) -> ApiResult<User> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_password_reset(&self, _to: &str, _name: &str, reset_url: &str) -> anyhow::Result<()> {
            self.urls.lock().unwrap().push(reset_url.to_string());
            Ok(())
        }
    }

    async fn service() -> (AccountService, Arc<RecordingMailer>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let mailer = Arc::new(RecordingMailer::default());
        let service = AccountService::new(
            db,
            JwtKeys::new("test-secret"),
            mailer.clone(),
            "http://localhost:3000".to_string(),
        );
        (service, mailer)
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some("Ada".to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    fn login_request(email: &str, password: &str, remember_me: bool) -> LoginRequest {
        LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            remember_me,
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (service, _) = service().await;
        let session = service.register(register_request(" Ada@Example.com ", "secret1")).await.unwrap();
        assert_eq!(session.user.email, "ada@example.com");
        assert_eq!(session.ttl_days, SESSION_DAYS);

        let login = service.login(login_request("ada@example.com", "secret1", true)).await.unwrap();
        assert_eq!(login.user.id, session.user.id);
        assert_eq!(login.ttl_days, REMEMBER_ME_DAYS);
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let (service, _) = service().await;
        let missing = RegisterRequest { name: None, email: Some("a@b.co".into()), password: Some("secret1".into()) };
        assert!(matches!(service.register(missing).await, Err(ApiError::ValidationError(_))));
        assert!(matches!(
            service.register(register_request("not-an-email", "secret1")).await,
            Err(ApiError::ValidationError(_))
        ));
        assert!(matches!(
            service.register(register_request("a@b.co", "12345")).await,
            Err(ApiError::ValidationError(_))
        ));

        service.register(register_request("a@b.co", "secret1")).await.unwrap();
        assert!(matches!(
            service.register(register_request("A@B.co", "secret1")).await,
            Err(ApiError::DuplicateResource(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failures_share_message() {
        let (service, _) = service().await;
        service.register(register_request("a@b.co", "secret1")).await.unwrap();

        let unknown = service.login(login_request("x@b.co", "secret1", false)).await.unwrap_err();
        let wrong = service.login(login_request("a@b.co", "wrong-pass", false)).await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let (service, mailer) = service().await;
        service.register(register_request("a@b.co", "secret1")).await.unwrap();

        service
            .forgot_password(ForgotPasswordRequest { email: Some("a@b.co".into()) })
            .await
            .unwrap();
        service
            .forgot_password(ForgotPasswordRequest { email: Some("nobody@b.co".into()) })
            .await
            .unwrap();

        let url = mailer.urls.lock().unwrap().first().cloned().unwrap();
        assert!(url.starts_with("http://localhost:3000/auth/reset-password?token="));
        let token = url.rsplit('=').next().unwrap().to_string();
        assert_eq!(token.len(), 64);

        service
            .reset_password(ResetPasswordRequest { token: Some(token.clone()), password: Some("newpass1".into()) })
            .await
            .unwrap();
        service.login(login_request("a@b.co", "newpass1", false)).await.unwrap();

        let reused = service
            .reset_password(ResetPasswordRequest { token: Some(token), password: Some("another1".into()) })
            .await
            .unwrap_err();
        assert_eq!(reused.to_string(), BAD_RESET_TOKEN);
    }

    #[tokio::test]
    async fn test_expired_reset_token_is_rejected() {
        let (service, _) = service().await;
        let session = service.register(register_request("a@b.co", "secret1")).await.unwrap();
        service
            .database()
            .set_reset_token(session.user.id, "expired", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();

        let err = service
            .reset_password(ResetPasswordRequest { token: Some("expired".into()), password: Some("newpass1".into()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_streak_advances_once_per_day_and_resets_after_gap() {
        let (service, _) = service().await;
        let user_id = service.register(register_request("a@b.co", "secret1")).await.unwrap().user.id;
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        let first = service.advance_streak(user_id, day).await.unwrap();
        assert_eq!(first, StreakUpdate { consecutive_days: 1, is_new_day: true });
        let again = service.advance_streak(user_id, day).await.unwrap();
        assert_eq!(again, StreakUpdate { consecutive_days: 1, is_new_day: false });
        let next = service.advance_streak(user_id, day.succ_opt().unwrap()).await.unwrap();
        assert_eq!(next.consecutive_days, 2);

        let later = day + Duration::days(5);
        let status = service.streak_status(user_id, later).await.unwrap();
        assert_eq!(status.consecutive_days, 0);
        let stored = service.database().get_user(user_id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_days, 0);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last@sub.example.com"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.com"));
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
