use chrono::Utc;
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use uuid::Uuid;

use crate::card_service::CardService;
use crate::errors::{ApiError, ApiResult};
use crate::llm_service::LLMService;
use crate::models::*;
use crate::{log_service_start, log_service_warn};

pub const QUIZ_SIZE: usize = 10;

#[derive(Clone)]
pub struct QuizService {
    cards: CardService,
    llm: LLMService,
}

impl QuizService {
    pub fn new(cards: CardService, llm: LLMService) -> Self {
        Self { cards, llm }
    }

    /// Draw up to ten random cards from the caller's collection.
    pub async fn start(&self, user_id: Uuid) -> ApiResult<Quiz> {
        log_service_start!("quiz_service", "start", user_id = user_id);

        let mut cards = self.cards.database().list_cards(user_id).await?;
        if cards.is_empty() {
            return Err(ApiError::ValidationError(
                "You have no cards yet. Create some cards before starting a quiz".to_string(),
            ));
        }

        cards.shuffle(&mut rand::thread_rng());
        cards.truncate(QUIZ_SIZE);

        let now = Utc::now();
        let questions: Vec<QuizQuestion> = cards
            .into_iter()
            .enumerate()
            .map(|(i, card)| question_from_card(i as i64 + 1, card))
            .collect();

        Ok(Quiz {
            id: format!("quiz_{}", now.timestamp_millis()),
            total_questions: questions.len(),
            questions,
            start_time: now,
        })
    }

    /// Grade the answers, then count a review on every graded card.
    pub async fn analyze(&self, user_id: Uuid, request: AnalyzeQuizRequest) -> ApiResult<QuizResult> {
        let questions = request
            .questions
            .ok_or_else(|| ApiError::ValidationError("questions must be an array".to_string()))?;

        log_service_start!("quiz_service", "analyze", user_id = user_id, card_count = questions.len());

        let analysis = self.llm.analyze_quiz(&questions).await?;

        let graded: HashSet<i64> = analysis.analysis.iter().map(|a| a.question_number).collect();
        let reviewed = reviewed_card_ids(&questions, &graded);

        let outcomes = join_all(
            reviewed
                .iter()
                .map(|card_id| self.cards.record_review(user_id, *card_id)),
        )
        .await;

        for (card_id, outcome) in reviewed.iter().zip(outcomes) {
            if let Err(e) = outcome {
                log_service_warn!(
                    "quiz_service",
                    "analyze",
                    format!("failed to record review for card {}: {}", card_id, e)
                );
            }
        }

        Ok(QuizResult {
            analysis,
            completed_at: Utc::now(),
        })
    }
}

fn question_from_card(question_number: i64, card: StudyCard) -> QuizQuestion {
    QuizQuestion {
        id: Some(card.id),
        question_number,
        title: card.title,
        content: card.content,
        question: card.question,
        standard_answer: card.answer,
        tags: card.tags,
        difficulty: card.difficulty,
        user_answer: String::new(),
    }
}

/// Card ids of submitted questions the model actually graded.
fn reviewed_card_ids(questions: &[QuizQuestion], graded: &HashSet<i64>) -> Vec<Uuid> {
    questions
        .iter()
        .filter(|q| graded.contains(&q.question_number))
        .filter_map(|q| q.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(number: i64, id: Option<Uuid>) -> QuizQuestion {
        QuizQuestion {
            id,
            question_number: number,
            title: String::new(),
            content: String::new(),
            question: String::new(),
            standard_answer: String::new(),
            tags: vec![],
            difficulty: Difficulty::Medium,
            user_answer: String::new(),
        }
    }

    #[test]
    fn test_only_graded_questions_with_ids_are_reviewed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let questions = vec![question(1, Some(a)), question(2, None), question(3, Some(b))];
        let graded: HashSet<i64> = [1, 2].into_iter().collect();

        assert_eq!(reviewed_card_ids(&questions, &graded), vec![a]);
    }

    #[test]
    fn test_question_from_card_maps_answer() {
        let now = Utc::now();
        let card = StudyCard {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Ownership".into(),
            content: "Each value has one owner".into(),
            question: "Who owns a value?".into(),
            answer: "Exactly one binding".into(),
            tags: vec!["rust".into()],
            difficulty: Difficulty::Hard,
            is_favorite: true,
            review_count: 4,
            created_at: now,
            updated_at: now,
        };

        let q = question_from_card(3, card.clone());
        assert_eq!(q.id, Some(card.id));
        assert_eq!(q.question_number, 3);
        assert_eq!(q.standard_answer, "Exactly one binding");
        assert!(q.user_answer.is_empty());
        assert_eq!(q.difficulty, Difficulty::Hard);
    }
}
