use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::time::Instant;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Outcome of a quota-checked batch insert
#[derive(Debug, Clone, PartialEq)]
pub enum CardInsert {
    Inserted,
    QuotaExceeded { existing: i64 },
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every pooled connection to :memory: would get its own empty database
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migration", "database initialized");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                reset_token TEXT,
                reset_token_expiry TEXT,
                subscription TEXT NOT NULL DEFAULT 'free',
                consecutive_days INTEGER NOT NULL DEFAULT 0,
                last_active_date TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS study_cards (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                question TEXT NOT NULL DEFAULT '',
                answer TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                difficulty TEXT NOT NULL DEFAULT 'medium',
                is_favorite INTEGER NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_study_cards_user ON study_cards(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_reset_token ON users(reset_token)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // User operations
    pub async fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            reset_token: None,
            reset_token_expiry: None,
            subscription: Subscription::Free,
            consecutive_days: 0,
            last_active_date: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, subscription,
                               consecutive_days, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.subscription.as_str())
        .bind(user.consecutive_days)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    pub async fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE reset_token = ?1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    pub async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET reset_token = ?1, reset_token_expiry = ?2 WHERE id = ?3")
            .bind(token)
            .bind(expiry.to_rfc3339())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Replace the password hash and consume the reset token in one statement.
    pub async fn reset_password(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?1, reset_token = NULL, reset_token_expiry = NULL
            WHERE id = ?2
            "#,
        )
        .bind(password_hash)
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_streak(
        &self,
        user_id: Uuid,
        consecutive_days: i64,
        last_active_date: Option<NaiveDate>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET consecutive_days = ?1, last_active_date = ?2 WHERE id = ?3")
            .bind(consecutive_days)
            .bind(last_active_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_subscription(&self, user_id: Uuid, subscription: Subscription) -> Result<()> {
        sqlx::query("UPDATE users SET subscription = ?1 WHERE id = ?2")
            .bind(subscription.as_str())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Card operations
    pub async fn count_cards(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM study_cards WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Insert a batch atomically. With a limit, the existing count is read
    /// inside the same transaction and the batch is dropped if it would exceed it.
    pub async fn insert_cards(
        &self,
        user_id: Uuid,
        cards: &[StudyCard],
        limit: Option<i64>,
    ) -> Result<CardInsert> {
        let mut tx = self.pool.begin().await?;

        if let Some(limit) = limit {
            let existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM study_cards WHERE user_id = ?1")
                    .bind(user_id.to_string())
                    .fetch_one(&mut *tx)
                    .await?;

            if existing + cards.len() as i64 > limit {
                tx.rollback().await?;
                return Ok(CardInsert::QuotaExceeded { existing });
            }
        }

        for card in cards {
            sqlx::query(
                r#"
                INSERT INTO study_cards (id, user_id, title, content, question, answer, tags,
                                         difficulty, is_favorite, review_count, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(card.id.to_string())
            .bind(user_id.to_string())
            .bind(&card.title)
            .bind(&card.content)
            .bind(&card.question)
            .bind(&card.answer)
            .bind(serde_json::to_string(&card.tags)?)
            .bind(card.difficulty.as_str())
            .bind(card.is_favorite)
            .bind(card.review_count)
            .bind(card.created_at.to_rfc3339())
            .bind(card.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CardInsert::Inserted)
    }

    pub async fn list_cards(&self, user_id: Uuid) -> Result<Vec<StudyCard>> {
        let start = Instant::now();
        let rows = sqlx::query(
            "SELECT * FROM study_cards WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let cards = rows.iter().map(row_to_card).collect::<Result<Vec<_>>>()?;
        log_db_operation!(
            debug,
            "list_cards",
            count = cards.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(cards)
    }

    /// Fetch a card only if it belongs to `user_id`.
    pub async fn get_card(&self, user_id: Uuid, id: Uuid) -> Result<Option<StudyCard>> {
        let row = sqlx::query("SELECT * FROM study_cards WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_card(&r)).transpose()
    }

    /// Returns false when no card with this id is owned by the card's user.
    pub async fn update_card(&self, card: &StudyCard) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE study_cards
            SET title = ?1, content = ?2, question = ?3, answer = ?4, tags = ?5,
                difficulty = ?6, is_favorite = ?7, updated_at = ?8
            WHERE id = ?9 AND user_id = ?10
            "#,
        )
        .bind(&card.title)
        .bind(&card.content)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(serde_json::to_string(&card.tags)?)
        .bind(card.difficulty.as_str())
        .bind(card.is_favorite)
        .bind(card.updated_at.to_rfc3339())
        .bind(card.id.to_string())
        .bind(card.user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_card(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM study_cards WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_favorite(&self, user_id: Uuid, id: Uuid, is_favorite: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE study_cards SET is_favorite = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
        )
        .bind(is_favorite)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_review_count(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE study_cards
            SET review_count = review_count + 1, updated_at = ?1
            WHERE id = ?2 AND user_id = ?3
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        reset_token: row.get("reset_token"),
        reset_token_expiry: row
            .get::<Option<String>, _>("reset_token_expiry")
            .and_then(|s| parse_timestamp(&s).ok()),
        subscription: Subscription::parse(&row.get::<String, _>("subscription")),
        consecutive_days: row.get("consecutive_days"),
        last_active_date: row
            .get::<Option<String>, _>("last_active_date")
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn row_to_card(row: &SqliteRow) -> Result<StudyCard> {
    Ok(StudyCard {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: Uuid::parse_str(&row.get::<String, _>("user_id"))?,
        title: row.get("title"),
        content: row.get("content"),
        question: row.get("question"),
        answer: row.get("answer"),
        tags: serde_json::from_str(&row.get::<String, _>("tags")).unwrap_or_default(),
        difficulty: Difficulty::parse(&row.get::<String, _>("difficulty")).unwrap_or_default(),
        is_favorite: row.get("is_favorite"),
        review_count: row.get("review_count"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}
