//! Chapter database operations
//!
//! The chapter table is the source of truth for order. Position writes go
//! through [`ChapterRepository::apply_shifts`], which stages every moved row at
//! a negative position first so the `(book_id, order_id)` unique index never
//! sees two chapters sharing a slot mid-batch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use super::PublicationState;
use crate::error::{AppError, Result};
use crate::ordering::{ChapterSlot, Shift};

/// Chapter record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub book_id: String,
    pub header: String,
    pub content: String,
    pub order_id: i64,
    pub state: PublicationState,
    pub created_at: String,
    pub updated_at: String,
}

/// Chapter title entry for table-of-contents listings
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChapterTitle {
    pub id: String,
    pub header: String,
    pub order_id: i64,
}

/// Create chapter request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChapter {
    pub book_id: String,
    pub header: String,
    pub content: String,
    /// Requested position; clamped into `[1, max + 1]`
    #[serde(default)]
    pub order_id: Option<i64>,
    #[serde(default)]
    pub state: PublicationState,
}

impl CreateChapter {
    pub fn validate(&self) -> Result<()> {
        if self.header.trim().is_empty() {
            return Err(AppError::Validation("header is required".to_string()));
        }
        if self.content.is_empty() {
            return Err(AppError::Validation("content is required".to_string()));
        }
        Ok(())
    }
}

/// Update chapter request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChapter {
    pub header: Option<String>,
    pub content: Option<String>,
    pub state: Option<PublicationState>,
    pub order_id: Option<i64>,
}

const CHAPTER_COLUMNS: &str =
    "id, book_id, header, content, order_id, state, created_at, updated_at";

/// Chapter repository
pub struct ChapterRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ChapterRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get a specific chapter
    pub async fn get(&mut self, id: &str) -> Result<Option<Chapter>> {
        let query = format!("SELECT {} FROM chapters WHERE id = ?", CHAPTER_COLUMNS);
        let chapter = sqlx::query_as::<_, Chapter>(&query)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(chapter)
    }

    /// Get the chapter occupying `order_id` in a book
    pub async fn find_by_order(&mut self, book_id: &str, order_id: i64) -> Result<Option<Chapter>> {
        let query = format!(
            "SELECT {} FROM chapters WHERE book_id = ? AND order_id = ?",
            CHAPTER_COLUMNS
        );
        let chapter = sqlx::query_as::<_, Chapter>(&query)
            .bind(book_id)
            .bind(order_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(chapter)
    }

    /// List chapters of a book in order
    ///
    /// With `readers_only` set, drafts are left out.
    pub async fn list_for_book(
        &mut self,
        book_id: &str,
        readers_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Chapter>> {
        let query = format!(
            r#"
            SELECT {}
            FROM chapters
            WHERE book_id = ? AND (? = 0 OR state IN ('finished', 'public'))
            ORDER BY order_id ASC
            LIMIT ?
            "#,
            CHAPTER_COLUMNS
        );
        let chapters = sqlx::query_as::<_, Chapter>(&query)
            .bind(book_id)
            .bind(readers_only)
            .bind(limit.unwrap_or(-1))
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(chapters)
    }

    /// List chapter titles of a book in order
    pub async fn titles_for_book(
        &mut self,
        book_id: &str,
        readers_only: bool,
    ) -> Result<Vec<ChapterTitle>> {
        let titles = sqlx::query_as::<_, ChapterTitle>(
            r#"
            SELECT id, header, order_id
            FROM chapters
            WHERE book_id = ? AND (? = 0 OR state IN ('finished', 'public'))
            ORDER BY order_id ASC
            "#,
        )
        .bind(book_id)
        .bind(readers_only)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(titles)
    }

    /// Highest position in a book, 0 when it has no chapters
    pub async fn max_order(&mut self, book_id: &str) -> Result<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(order_id), 0) FROM chapters WHERE book_id = ?")
                .bind(book_id)
                .fetch_one(&mut *self.conn)
                .await?;

        Ok(result.0)
    }

    /// Count chapters in a book
    pub async fn count_for_book(&mut self, book_id: &str) -> Result<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chapters WHERE book_id = ?")
            .bind(book_id)
            .fetch_one(&mut *self.conn)
            .await?;

        Ok(result.0)
    }

    /// Positions of the chapters whose order lies in `[lo, hi]`
    pub async fn slots_in_range(
        &mut self,
        book_id: &str,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<ChapterSlot>> {
        let slots = sqlx::query_as::<_, ChapterSlot>(
            r#"
            SELECT id, order_id
            FROM chapters
            WHERE book_id = ? AND order_id BETWEEN ? AND ?
            ORDER BY order_id ASC
            "#,
        )
        .bind(book_id)
        .bind(lo)
        .bind(hi)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(slots)
    }

    /// Positions of the chapters strictly after `order_id`
    pub async fn slots_after(&mut self, book_id: &str, order_id: i64) -> Result<Vec<ChapterSlot>> {
        let slots = sqlx::query_as::<_, ChapterSlot>(
            r#"
            SELECT id, order_id
            FROM chapters
            WHERE book_id = ? AND order_id > ?
            ORDER BY order_id ASC
            "#,
        )
        .bind(book_id)
        .bind(order_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(slots)
    }

    /// All positions of a book in order
    pub async fn order_ids(&mut self, book_id: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT order_id FROM chapters WHERE book_id = ? ORDER BY order_id ASC")
                .bind(book_id)
                .fetch_all(&mut *self.conn)
                .await?;

        Ok(rows.into_iter().map(|(o,)| o).collect())
    }

    /// Insert a chapter at an explicit position
    ///
    /// The caller is responsible for `order_id` being free.
    pub async fn insert(&mut self, data: &CreateChapter, order_id: i64) -> Result<Chapter> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO chapters (id, book_id, header, content, order_id, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&data.book_id)
        .bind(&data.header)
        .bind(&data.content)
        .bind(order_id)
        .bind(data.state)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.conn)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created chapter".to_string()))
    }

    /// Update the non-positional fields of a chapter
    pub async fn update_fields(
        &mut self,
        id: &str,
        data: &UpdateChapter,
    ) -> Result<Option<Chapter>> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE chapters
            SET header = COALESCE(?, header),
                content = COALESCE(?, content),
                state = COALESCE(?, state),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&data.header)
        .bind(&data.content)
        .bind(data.state)
        .bind(&now)
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        self.get(id).await
    }

    /// Delete a chapter
    pub async fn delete(&mut self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chapters WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write a batch of position changes for one book
    ///
    /// Every target is first written as its negation, then all negative
    /// positions of the book are flipped in one statement. Must run inside a
    /// transaction for the batch to be atomic.
    pub async fn apply_shifts(&mut self, book_id: &str, shifts: &[Shift]) -> Result<()> {
        if shifts.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();

        for shift in shifts {
            let result = sqlx::query(
                r#"
                UPDATE chapters
                SET order_id = ?, updated_at = ?
                WHERE id = ? AND book_id = ? AND order_id = ?
                "#,
            )
            .bind(-shift.to)
            .bind(&now)
            .bind(&shift.chapter_id)
            .bind(book_id)
            .bind(shift.from)
            .execute(&mut *self.conn)
            .await?;

            if result.rows_affected() != 1 {
                return Err(AppError::Conflict(format!(
                    "Chapter {} is no longer at position {}",
                    shift.chapter_id, shift.from
                )));
            }
        }

        sqlx::query("UPDATE chapters SET order_id = -order_id WHERE book_id = ? AND order_id < 0")
            .bind(book_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(())
    }
}
