//! Progress cache updater
//!
//! Reading progress stores a copy of the current chapter's position and the
//! book's chapter count. Both are always computed from the chapter table at
//! write time, and recomputed for the whole book whenever its order changes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::{
    Chapter, ChapterRepository, ProgressEntry, ProgressRepository, ReadingProgress,
    UserRepository,
};
use crate::error::{parse_id, AppError, Result};

/// A reader's request to save their position in a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgress {
    pub user_id: String,
    pub book_id: String,
    pub current_chapter_id: String,
    #[serde(default)]
    pub chapter_percentage: f64,
    #[serde(default)]
    pub restore_reference: Option<String>,
}

impl SaveProgress {
    pub fn validate(&self) -> Result<()> {
        parse_id(&self.user_id)?;
        parse_id(&self.book_id)?;
        parse_id(&self.current_chapter_id)?;

        if !self.chapter_percentage.is_finite() || !(0.0..=100.0).contains(&self.chapter_percentage)
        {
            return Err(AppError::Validation(format!(
                "chapterPercentage must be within 0..=100, got {}",
                self.chapter_percentage
            )));
        }

        Ok(())
    }
}

/// Something that can persist a progress save
///
/// The queue is written against this seam so its retry behaviour can be
/// exercised without a database.
#[async_trait]
pub trait ProgressWriter: Send + Sync {
    async fn save(&self, request: &SaveProgress) -> Result<ReadingProgress>;
}

/// Writes progress and keeps the cached chapter order in sync
#[derive(Clone)]
pub struct ProgressCacheUpdater {
    pool: SqlitePool,
}

impl ProgressCacheUpdater {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a user's progress with the live position and chapter count
    ///
    /// Written as one statement so a concurrent reorder is either fully
    /// before or fully after the position it records.
    pub async fn save_progress(&self, request: &SaveProgress) -> Result<ReadingProgress> {
        request.validate()?;

        let mut conn = self.pool.acquire().await?;
        let saved = ProgressRepository::new(&mut conn)
            .upsert(&ProgressEntry {
                user_id: &request.user_id,
                book_id: &request.book_id,
                chapter_id: &request.current_chapter_id,
                chapter_percentage: request.chapter_percentage,
                restore_reference: request.restore_reference.as_deref(),
            })
            .await?;

        let Some(progress) = saved else {
            return Err(rejection(&mut conn, request).await?);
        };

        tracing::debug!(
            user_id = %request.user_id,
            book_id = %request.book_id,
            chapter_order_id = progress.current_chapter_order_id,
            "Saved reading progress"
        );

        Ok(progress)
    }

    /// Recompute cached positions for every reader of a book
    pub async fn refresh_book(&self, book_id: &str) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        ProgressRepository::new(&mut conn).refresh_book(book_id).await
    }

    /// Move readers off a deleted chapter, then refresh the book
    ///
    /// Readers land on `next` (the chapter shown after the delete) at 0%.
    /// When the book has no chapters left their progress is dropped.
    pub async fn handle_deleted_chapter(
        &self,
        deleted: &Chapter,
        next: Option<&Chapter>,
    ) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let mut progress = ProgressRepository::new(&mut conn);

        let affected = match next {
            Some(next) => {
                progress
                    .relocate_chapter(&deleted.id, &next.id, next.order_id)
                    .await?
            }
            None => progress.delete_for_chapter(&deleted.id).await?,
        };

        progress.refresh_book(&deleted.book_id).await?;

        Ok(affected)
    }

    /// [`Self::refresh_book`], logging instead of failing
    pub async fn refresh_book_best_effort(&self, book_id: &str) {
        match self.refresh_book(book_id).await {
            Ok(refreshed) => {
                tracing::debug!(book_id = %book_id, refreshed, "Refreshed progress cache");
            }
            Err(e) => {
                tracing::warn!(book_id = %book_id, "Failed to refresh progress cache: {}", e);
            }
        }
    }

    /// [`Self::handle_deleted_chapter`], logging instead of failing
    pub async fn handle_deleted_chapter_best_effort(
        &self,
        deleted: &Chapter,
        next: Option<&Chapter>,
    ) {
        match self.handle_deleted_chapter(deleted, next).await {
            Ok(affected) if affected > 0 => {
                tracing::info!(
                    chapter_id = %deleted.id,
                    next_chapter_id = next.map(|c| c.id.as_str()).unwrap_or("none"),
                    affected,
                    "Moved reading progress off deleted chapter"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    chapter_id = %deleted.id,
                    "Failed to update progress for deleted chapter: {}",
                    e
                );
            }
        }
    }
}

/// Why a progress save wrote nothing
async fn rejection(conn: &mut SqliteConnection, request: &SaveProgress) -> Result<AppError> {
    if UserRepository::new(conn).get(&request.user_id).await?.is_none() {
        return Ok(AppError::NotFound(format!("User not found: {}", request.user_id)));
    }

    let error = match ChapterRepository::new(conn)
        .get(&request.current_chapter_id)
        .await?
    {
        None => AppError::NotFound(format!("Chapter not found: {}", request.current_chapter_id)),
        Some(chapter) => AppError::Validation(format!(
            "Chapter {} does not belong to book {}",
            chapter.id, request.book_id
        )),
    };
    Ok(error)
}

#[async_trait]
impl ProgressWriter for ProgressCacheUpdater {
    async fn save(&self, request: &SaveProgress) -> Result<ReadingProgress> {
        self.save_progress(request).await
    }
}
