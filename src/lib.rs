pub mod account_service;
pub mod api;
pub mod auth;
pub mod card_parser;
pub mod card_service;
pub mod config;
pub mod content_extractor;
pub mod database;
pub mod errors;
pub mod llm_providers;
pub mod llm_service;
pub mod logging;
pub mod mailer;
pub mod models;
pub mod quiz_service;
pub mod streak;

pub use account_service::AccountService;
pub use card_service::CardService;
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use llm_providers::{LLMProvider, LLMProviderFactory, LLMProviderType};
pub use llm_service::LLMService;
pub use models::*;
pub use quiz_service::QuizService;
