//! Book database operations

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Publication state shared by books and chapters
///
/// Only `Finished` and `Public` content is visible to readers who are neither
/// the author nor an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PublicationState {
    #[default]
    Draft,
    Finished,
    Public,
}

impl PublicationState {
    pub fn is_visible_to_readers(self) -> bool {
        matches!(self, PublicationState::Finished | PublicationState::Public)
    }
}

/// Book record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub state: PublicationState,
    pub genre: Vec<String>,
    pub invite_list: Vec<String>,
    pub revision: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Create book request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBook {
    pub title: String,
    #[serde(default)]
    pub state: PublicationState,
    #[serde(default)]
    pub genre: Vec<String>,
    #[serde(default)]
    pub invite_list: Vec<String>,
}

/// Book repository
pub struct BookRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> BookRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get a book by id
    pub async fn get(&mut self, id: &str) -> Result<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(
            r#"
            SELECT id, author_id, title, state, genre, invite_list, revision,
                   created_at, updated_at
            FROM books
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(BookRow::into_book).transpose()
    }

    /// Create a new book owned by `author_id`
    pub async fn create(&mut self, author_id: &str, data: &CreateBook) -> Result<Book> {
        if data.title.trim().is_empty() {
            return Err(AppError::Validation("title is required".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let genre = serde_json::to_string(&data.genre)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let invite_list = serde_json::to_string(&data.invite_list)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO books (id, author_id, title, state, genre, invite_list, revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(author_id)
        .bind(data.title.trim())
        .bind(data.state)
        .bind(&genre)
        .bind(&invite_list)
        .bind(&now)
        .bind(&now)
        .execute(&mut *self.conn)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created book".to_string()))
    }

    /// Take the write lock on a book and return its current revision
    ///
    /// Issued as the first statement of an ordering transaction. A write as
    /// the opening statement makes SQLite wait out other writers on the busy
    /// timeout, where a read followed by a write would fail at the upgrade.
    pub async fn claim_revision(&mut self, id: &str) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("UPDATE books SET revision = revision WHERE id = ? RETURNING revision")
                .bind(id)
                .fetch_optional(&mut *self.conn)
                .await?;

        row.map(|(r,)| r)
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
    }

    /// Advance the revision if it still equals `expected`
    ///
    /// Returns false when another writer got there first.
    pub async fn advance_revision(&mut self, id: &str, expected: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE books
            SET revision = revision + 1, updated_at = ?
            WHERE id = ? AND revision = ?
            "#,
        )
        .bind(&now)
        .bind(id)
        .bind(expected)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    id: String,
    author_id: String,
    title: String,
    state: PublicationState,
    genre: String,
    invite_list: String,
    revision: i64,
    created_at: String,
    updated_at: String,
}

impl BookRow {
    fn into_book(self) -> Result<Book> {
        let genre = serde_json::from_str(&self.genre)
            .map_err(|e| AppError::Internal(format!("Corrupt genre list: {}", e)))?;
        let invite_list = serde_json::from_str(&self.invite_list)
            .map_err(|e| AppError::Internal(format!("Corrupt invite list: {}", e)))?;

        Ok(Book {
            id: self.id,
            author_id: self.author_id,
            title: self.title,
            state: self.state,
            genre,
            invite_list,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
