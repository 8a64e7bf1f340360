use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    #[default]
    Free,
    Pro,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::Free => "free",
            Subscription::Pro => "pro",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "pro" => Subscription::Pro,
            _ => Subscription::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Lenient parse for model output: case-insensitive, trailing period ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_end_matches('.').to_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub reset_token: Option<String>,
    pub reset_token_expiry: Option<DateTime<Utc>>,
    pub subscription: Subscription,
    pub consecutive_days: i64,
    pub last_active_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// User as exposed over the API: no password hash, no reset token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subscription: Subscription,
    pub consecutive_days: i64,
    pub last_active_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            subscription: user.subscription,
            consecutive_days: user.consecutive_days,
            last_active_date: user.last_active_date,
            created_at: user.created_at,
        }
    }
}

// Auth requests. Fields are optional so missing values get a 400, not a 422.

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyCard {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>, // persisted as JSON text
    pub difficulty: Difficulty,
    pub is_favorite: bool,
    pub review_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One card as submitted by the client for saving or replacing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CardInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub is_favorite: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardsRequest {
    pub cards: Option<Vec<CardInput>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFavoriteRequest {
    pub card_id: Option<Uuid>,
    pub is_favorite: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
    Title,
    Difficulty,
    MostReviewed,
    LeastReviewed,
    Favorites,
}

impl SortBy {
    pub fn parse(value: &str) -> Self {
        match value {
            "oldest" => SortBy::Oldest,
            "title" => SortBy::Title,
            "difficulty" => SortBy::Difficulty,
            "most-reviewed" => SortBy::MostReviewed,
            "least-reviewed" => SortBy::LeastReviewed,
            "favorites" => SortBy::Favorites,
            _ => SortBy::Newest,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CardListQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    pub sort_by: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardPage {
    pub cards: Vec<StudyCard>,
    pub pagination: Pagination,
}

// Generation

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Cards,
    Qa,
}

impl GenerationMode {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("qa") => GenerationMode::Qa,
            _ => GenerationMode::Cards,
        }
    }
}

/// A flashcard produced by a model, not yet saved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedCard {
    pub title: String,
    pub content: String,
    pub question: String,
    pub answer: String,
    pub tags: Vec<String>,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedCards {
    pub cards: Vec<GeneratedCard>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCardsRequest {
    pub text: Option<String>,
    pub mode: Option<String>,
    #[serde(default)]
    pub custom_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateFromUrlRequest {
    pub url: Option<String>,
    pub mode: Option<String>,
    #[serde(default)]
    pub custom_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchUrlRequest {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebPage {
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub word_count: usize,
}

// Quiz

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub id: Option<Uuid>,
    pub question_number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub standard_answer: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub user_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub total_questions: usize,
    pub questions: Vec<QuizQuestion>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeQuizRequest {
    pub questions: Option<Vec<QuizQuestion>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnalysis {
    pub question_number: i64,
    pub title: String,
    pub question: String,
    pub user_answer: String,
    pub standard_answer: String,
    pub is_correct: bool,
    pub score: f64,
    pub feedback: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub suggestions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnalysis {
    pub overall_score: f64,
    pub total_questions: i64,
    pub correct_answers: i64,
    pub analysis: Vec<QuestionAnalysis>,
    pub overall_feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub analysis: QuizAnalysis,
    pub completed_at: DateTime<Utc>,
}

// Streak

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreakUpdate {
    pub consecutive_days: i64,
    pub is_new_day: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreakStatus {
    pub consecutive_days: i64,
    pub last_active_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub streak: i64,
    pub today_activities: usize,
    pub total_activities: usize,
    pub last_activity_date: Option<NaiveDate>,
}
