//! Reading progress database operations

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::{AppError, Result};

/// Reading progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub user_id: String,
    pub book_id: String,
    pub current_chapter_id: String,
    /// Cached `order_id` of `current_chapter_id`
    pub current_chapter_order_id: i64,
    pub all_chapters_count: i64,
    pub chapter_percentage: f64,
    pub restore_reference: Option<String>,
    pub updated_at: String,
}

/// Progress to record; position and chapter count are read at write time
#[derive(Debug, Clone)]
pub struct ProgressEntry<'a> {
    pub user_id: &'a str,
    pub book_id: &'a str,
    pub chapter_id: &'a str,
    pub chapter_percentage: f64,
    pub restore_reference: Option<&'a str>,
}

const PROGRESS_COLUMNS: &str = "user_id, book_id, current_chapter_id, current_chapter_order_id, \
     all_chapters_count, chapter_percentage, restore_reference, updated_at";

/// Progress repository
pub struct ProgressRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ProgressRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get a user's progress for a specific book
    pub async fn get(&mut self, user_id: &str, book_id: &str) -> Result<Option<ReadingProgress>> {
        let query = format!(
            "SELECT {} FROM reading_progress WHERE user_id = ? AND book_id = ?",
            PROGRESS_COLUMNS
        );
        let progress = sqlx::query_as::<_, ReadingProgress>(&query)
            .bind(user_id)
            .bind(book_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(progress)
    }

    /// Get all progress entries of a user, most recent first
    pub async fn list_for_user(&mut self, user_id: &str) -> Result<Vec<ReadingProgress>> {
        let query = format!(
            "SELECT {} FROM reading_progress WHERE user_id = ? ORDER BY updated_at DESC",
            PROGRESS_COLUMNS
        );
        let progress = sqlx::query_as::<_, ReadingProgress>(&query)
            .bind(user_id)
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(progress)
    }

    /// Insert or replace the progress entry for `(user, book)`
    ///
    /// The chapter's position and the book's chapter count are taken from the
    /// chapter table by the same statement. Returns `None` when nothing was
    /// written: the user or chapter is missing, or the chapter belongs to
    /// another book.
    pub async fn upsert(&mut self, entry: &ProgressEntry<'_>) -> Result<Option<ReadingProgress>> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO reading_progress (
                user_id, book_id, current_chapter_id, current_chapter_order_id,
                all_chapters_count, chapter_percentage, restore_reference, updated_at
            )
            SELECT u.id, c.book_id, c.id, c.order_id,
                   (SELECT COUNT(*) FROM chapters other WHERE other.book_id = c.book_id),
                   ?, ?, ?
            FROM users u
            JOIN chapters c ON c.id = ? AND c.book_id = ?
            WHERE u.id = ?
            ON CONFLICT(user_id, book_id) DO UPDATE SET
                current_chapter_id = excluded.current_chapter_id,
                current_chapter_order_id = excluded.current_chapter_order_id,
                all_chapters_count = excluded.all_chapters_count,
                chapter_percentage = excluded.chapter_percentage,
                restore_reference = excluded.restore_reference,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.chapter_percentage)
        .bind(entry.restore_reference)
        .bind(&now)
        .bind(entry.chapter_id)
        .bind(entry.book_id)
        .bind(entry.user_id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let progress = self
            .get(entry.user_id, entry.book_id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch upserted progress".to_string()))?;
        Ok(Some(progress))
    }

    /// Delete a user's progress for a book
    pub async fn delete(&mut self, user_id: &str, book_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reading_progress WHERE user_id = ? AND book_id = ?")
            .bind(user_id)
            .bind(book_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Recompute the cached order and chapter count of every entry in a book
    ///
    /// Entries whose chapter no longer exists are left alone; those are
    /// handled by [`Self::relocate_chapter`].
    pub async fn refresh_book(&mut self, book_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE reading_progress
            SET current_chapter_order_id = (
                    SELECT c.order_id FROM chapters c
                    WHERE c.id = reading_progress.current_chapter_id
                ),
                all_chapters_count = (
                    SELECT COUNT(*) FROM chapters c WHERE c.book_id = reading_progress.book_id
                )
            WHERE book_id = ?
              AND EXISTS (
                    SELECT 1 FROM chapters c
                    WHERE c.id = reading_progress.current_chapter_id
                      AND c.book_id = reading_progress.book_id
              )
            "#,
        )
        .bind(book_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Point every entry on `from_chapter_id` at another chapter
    ///
    /// The reading position inside the old chapter is meaningless in the new
    /// one, so the percentage is reset and the restore reference cleared.
    pub async fn relocate_chapter(
        &mut self,
        from_chapter_id: &str,
        to_chapter_id: &str,
        to_order_id: i64,
    ) -> Result<u64> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE reading_progress
            SET current_chapter_id = ?,
                current_chapter_order_id = ?,
                chapter_percentage = 0,
                restore_reference = NULL,
                updated_at = ?
            WHERE current_chapter_id = ?
            "#,
        )
        .bind(to_chapter_id)
        .bind(to_order_id)
        .bind(&now)
        .bind(from_chapter_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Remove every entry that points at a chapter
    pub async fn delete_for_chapter(&mut self, chapter_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reading_progress WHERE current_chapter_id = ?")
            .bind(chapter_id)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}
