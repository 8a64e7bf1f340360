#![allow(dead_code)]

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use studymate::{
    api::{create_router, AppState},
    auth::JwtKeys,
    config::{LLMConfig, ProviderConfig},
    content_extractor::WebFetcher,
    mailer::Mailer,
    AccountService, CardService, Database, LLMProviderType, LLMService, QuizService,
};

/// Nothing listens here, so provider calls fail fast.
pub const UNREACHABLE_PROVIDER: &str = "http://127.0.0.1:9";

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_password_reset(&self, to_email: &str, _name: &str, reset_url: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to_email.to_string(), reset_url.to_string()));
        Ok(())
    }
}

impl RecordingMailer {
    pub fn last_token(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, url)| url.split("token=").nth(1).map(str::to_string))
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub mailer: Arc<RecordingMailer>,
    pub db: Database,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(UNREACHABLE_PROVIDER, 50).await
}

pub async fn spawn_app_with(provider_base_url: &str, free_tier_card_limit: i64) -> TestApp {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let jwt = JwtKeys::new("integration-test-secret");
    let mailer = Arc::new(RecordingMailer::default());

    let provider = |model: &str| ProviderConfig {
        api_key: Some("test-key".to_string()),
        base_url: Some(provider_base_url.to_string()),
        model: Some(model.to_string()),
    };
    let llm_config = LLMConfig {
        provider: LLMProviderType::DashScope,
        dashscope: provider("qwen-turbo"),
        moonshot: provider("moonshot-v1-128k"),
    };

    let card_service = CardService::new(db.clone(), free_tier_card_limit);
    let llm_service = LLMService::new(&llm_config);
    let state = AppState {
        account_service: AccountService::new(
            db.clone(),
            jwt.clone(),
            mailer.clone(),
            "http://localhost:3000".to_string(),
        ),
        quiz_service: QuizService::new(card_service.clone(), llm_service.clone()),
        card_service,
        llm_service,
        fetcher: WebFetcher::new().unwrap(),
        jwt,
        cookie_secure: false,
    };

    TestApp {
        server: TestServer::new(create_router(state)).unwrap(),
        mailer,
        db,
    }
}

/// `name=value` part of the response's Set-Cookie header.
pub fn session_cookie(response: &TestResponse) -> HeaderValue {
    let set_cookie = response.header(header::SET_COOKIE);
    let pair = set_cookie
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    HeaderValue::from_str(&pair).unwrap()
}

/// Register a user and return the session cookie plus the user JSON.
pub async fn register(server: &TestServer, email: &str) -> (HeaderValue, Value) {
    let response = server
        .post("/api/auth/register")
        .json(&json!({ "name": "Test User", "email": email, "password": "secret123" }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    (session_cookie(&response), body["data"]["user"].clone())
}

pub fn card_json(title: &str) -> Value {
    json!({
        "title": title,
        "content": format!("Content about {}", title),
        "question": format!("What is {}?", title),
        "answer": format!("{} explained", title),
        "tags": ["rust"],
        "difficulty": "medium"
    })
}

/// Save `titles` as cards for the session and return their ids.
pub async fn create_cards(server: &TestServer, cookie: &HeaderValue, titles: &[&str]) -> Vec<String> {
    let cards: Vec<Value> = titles.iter().map(|t| card_json(t)).collect();
    let response = server
        .post("/api/cards")
        .add_header(header::COOKIE, cookie.clone())
        .json(&json!({ "cards": cards }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    body["data"]["cards"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap().to_string())
        .collect()
}
