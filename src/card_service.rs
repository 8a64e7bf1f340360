use chrono::{NaiveDate, Utc};
use std::cmp::Reverse;
use uuid::Uuid;

use crate::database::{CardInsert, Database};
use crate::errors::{ApiError, ApiResult};
use crate::models::*;
use crate::streak;
use crate::{log_service_start, log_service_warn};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

const CARD_NOT_FOUND: &str = "Card not found or not owned by you";

#[derive(Clone)]
pub struct CardService {
    db: Database,
    free_tier_card_limit: i64,
}

impl CardService {
    pub fn new(db: Database, free_tier_card_limit: i64) -> Self {
        Self {
            db,
            free_tier_card_limit,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Search, sort and paginate the caller's cards.
    pub async fn list_cards(
        &self,
        user_id: Uuid,
        query: &CardListQuery,
        favorites_only: bool,
    ) -> ApiResult<CardPage> {
        let cards = self.db.list_cards(user_id).await?;
        let cards = filter_and_sort(cards, query, favorites_only);
        Ok(paginate(cards, query.page, query.page_size))
    }

    /// Save a batch of cards, all or nothing.
    pub async fn create_cards(
        &self,
        user_id: Uuid,
        inputs: Option<Vec<CardInput>>,
    ) -> ApiResult<Vec<StudyCard>> {
        let inputs = inputs
            .filter(|cards| !cards.is_empty())
            .ok_or_else(|| ApiError::ValidationError("Please provide at least one card".to_string()))?;

        log_service_start!("card_service", "create_cards", user_id = user_id, card_count = inputs.len());

        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found".to_string()))?;

        let now = Utc::now();
        let cards = inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let mut card = build_card(user_id, input, now)
                    .map_err(|e| ApiError::ValidationError(format!("Card {}: {}", i + 1, e)))?;
                card.is_favorite = false;
                Ok(card)
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let limit = match user.subscription {
            Subscription::Free => Some(self.free_tier_card_limit),
            Subscription::Pro => None,
        };

        match self.db.insert_cards(user_id, &cards, limit).await? {
            CardInsert::Inserted => Ok(cards),
            CardInsert::QuotaExceeded { existing } => Err(ApiError::QuotaExceeded(format!(
                "Free plan is limited to {} cards. You have {} and tried to add {}. Upgrade to Pro for unlimited cards.",
                self.free_tier_card_limit,
                existing,
                cards.len()
            ))),
        }
    }

    pub async fn get_card(&self, user_id: Uuid, id: Uuid) -> ApiResult<StudyCard> {
        self.db
            .get_card(user_id, id)
            .await?
            .ok_or_else(|| ApiError::NotFound(CARD_NOT_FOUND.to_string()))
    }

    /// Full replace of the editable fields.
    pub async fn update_card(&self, user_id: Uuid, id: Uuid, input: CardInput) -> ApiResult<StudyCard> {
        let existing = self.get_card(user_id, id).await?;

        let mut card = build_card(user_id, input, Utc::now()).map_err(ApiError::ValidationError)?;
        card.id = existing.id;
        card.review_count = existing.review_count;
        card.created_at = existing.created_at;

        if !self.db.update_card(&card).await? {
            return Err(ApiError::NotFound(CARD_NOT_FOUND.to_string()));
        }
        Ok(card)
    }

    pub async fn delete_card(&self, user_id: Uuid, id: Uuid) -> ApiResult<()> {
        if self.db.delete_card(user_id, id).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound(CARD_NOT_FOUND.to_string()))
        }
    }

    /// Set the favorite flag, or flip it when no value is given.
    pub async fn toggle_favorite(
        &self,
        user_id: Uuid,
        request: ToggleFavoriteRequest,
    ) -> ApiResult<StudyCard> {
        let card_id = request
            .card_id
            .ok_or_else(|| ApiError::ValidationError("cardId is required".to_string()))?;

        let mut card = self.get_card(user_id, card_id).await?;
        let is_favorite = request.is_favorite.unwrap_or(!card.is_favorite);

        if !self.db.set_favorite(user_id, card_id, is_favorite).await? {
            return Err(ApiError::NotFound(CARD_NOT_FOUND.to_string()));
        }
        card.is_favorite = is_favorite;
        Ok(card)
    }

    /// Count a quiz review. Cards of other users are left alone.
    pub async fn record_review(&self, user_id: Uuid, card_id: Uuid) -> ApiResult<bool> {
        let updated = self.db.increment_review_count(user_id, card_id).await?;
        if !updated {
            log_service_warn!(
                "card_service",
                "record_review",
                format!("card {} not found for user {}", card_id, user_id)
            );
        }
        Ok(updated)
    }

    /// Activity derived from card creation and review dates.
    pub async fn activity_stats(&self, user_id: Uuid, today: NaiveDate) -> ApiResult<ActivityStats> {
        let cards = self.db.list_cards(user_id).await?;
        Ok(activity_stats(&cards, today))
    }
}

fn clean_field(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Apply defaults and required-field checks to client input.
fn build_card(
    user_id: Uuid,
    input: CardInput,
    now: chrono::DateTime<Utc>,
) -> Result<StudyCard, String> {
    let title = input.title.trim().to_string();
    let content = input.content.trim().to_string();
    if title.is_empty() || content.is_empty() {
        return Err("title and content are required".to_string());
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in input.tags.unwrap_or_default() {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    Ok(StudyCard {
        id: Uuid::new_v4(),
        user_id,
        title,
        content,
        question: clean_field(input.question),
        answer: clean_field(input.answer),
        tags,
        difficulty: input.difficulty.unwrap_or_default(),
        is_favorite: input.is_favorite.unwrap_or(false),
        review_count: 0,
        created_at: now,
        updated_at: now,
    })
}

fn matches_search(card: &StudyCard, needle: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);
    contains(&card.title)
        || contains(&card.content)
        || contains(&card.question)
        || contains(&card.answer)
        || card.tags.iter().any(|t| contains(t))
}

pub fn filter_and_sort(
    cards: Vec<StudyCard>,
    query: &CardListQuery,
    favorites_only: bool,
) -> Vec<StudyCard> {
    let search = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let tag = query
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != "all");

    let mut cards: Vec<StudyCard> = cards
        .into_iter()
        .filter(|c| !favorites_only || c.is_favorite)
        .filter(|c| search.as_deref().map_or(true, |s| matches_search(c, s)))
        .filter(|c| tag.map_or(true, |t| c.tags.iter().any(|ct| ct == t)))
        .collect();

    let sort_by = query.sort_by.as_deref().map(SortBy::parse).unwrap_or_default();
    match sort_by {
        SortBy::Newest => cards.sort_by_key(|c| Reverse(c.created_at)),
        SortBy::Oldest => cards.sort_by_key(|c| c.created_at),
        SortBy::Title => cards.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
        SortBy::Difficulty => cards.sort_by(|a, b| {
            a.difficulty
                .cmp(&b.difficulty)
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
        SortBy::MostReviewed => cards.sort_by_key(|c| (Reverse(c.review_count), Reverse(c.created_at))),
        SortBy::LeastReviewed => cards.sort_by_key(|c| (c.review_count, Reverse(c.created_at))),
        SortBy::Favorites => cards.sort_by_key(|c| (Reverse(c.is_favorite), Reverse(c.created_at))),
    }
    cards
}

pub fn paginate(cards: Vec<StudyCard>, page: Option<i64>, page_size: Option<i64>) -> CardPage {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let total_count = cards.len() as i64;
    let total_pages = (total_count + page_size - 1) / page_size;

    let cards = cards
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    CardPage {
        cards,
        pagination: Pagination {
            current_page: page,
            page_size,
            total_count,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        },
    }
}

pub fn activity_stats(cards: &[StudyCard], today: NaiveDate) -> ActivityStats {
    let dates: Vec<NaiveDate> = cards
        .iter()
        .map(|c| c.created_at.date_naive())
        .chain(
            cards
                .iter()
                .filter(|c| c.review_count > 0)
                .map(|c| c.updated_at.date_naive()),
        )
        .collect();

    ActivityStats {
        streak: streak::activity_streak(dates.iter().copied(), today),
        today_activities: dates.iter().filter(|d| **d == today).count(),
        total_activities: dates.len(),
        last_activity_date: dates.iter().max().copied(),
    }
}
