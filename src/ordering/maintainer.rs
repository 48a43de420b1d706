//! Order maintainer
//!
//! Applies insert/move/delete to a book's chapters so positions stay a dense
//! `1..=N`. Each operation runs under the book's lock, inside one transaction
//! that opens by claiming the book row, and only commits if the book revision
//! it started from is still current.

use std::future::Future;

use serde::Serialize;
use sqlx::SqlitePool;

use super::locks::BookLocks;
use super::plan::{clamp_move_target, insert_target, next_after_delete, plan_delete, plan_move};
use crate::config::OrderingConfig;
use crate::db::{BookRepository, Chapter, ChapterRepository, CreateChapter, UpdateChapter};
use crate::error::{parse_id, AppError, Result};
use crate::progress::ProgressCacheUpdater;

/// Result of a move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub chapter_id: String,
    pub order_id: i64,
    #[serde(skip)]
    pub moved: bool,
}

/// Result of a delete
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub deleted: Chapter,
    /// Chapter to show next, `None` when the book is now empty
    pub next: Option<Chapter>,
}

/// Keeps chapter positions dense per book
#[derive(Clone)]
pub struct OrderMaintainer {
    pool: SqlitePool,
    locks: BookLocks,
    progress: ProgressCacheUpdater,
    max_conflict_retries: u32,
}

impl OrderMaintainer {
    pub fn new(
        pool: SqlitePool,
        locks: BookLocks,
        progress: ProgressCacheUpdater,
        config: &OrderingConfig,
    ) -> Self {
        Self {
            pool,
            locks,
            progress,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Create a chapter at the requested position (clamped into `[1, max + 1]`)
    ///
    /// The chapter is appended at `max + 1` first and then moved into place,
    /// both within the same transaction.
    pub async fn insert(&self, data: &CreateChapter) -> Result<Chapter> {
        data.validate()?;
        parse_id(&data.book_id)?;

        let _guard = self.locks.acquire(&data.book_id).await;
        let chapter = self
            .with_conflict_retries(&data.book_id, "insert", || self.try_insert(data))
            .await?;

        tracing::info!(
            book_id = %chapter.book_id,
            chapter_id = %chapter.id,
            requested = ?data.order_id,
            order_id = chapter.order_id,
            "Inserted chapter"
        );

        // Every insert changes the chapter count readers have cached
        self.progress.refresh_book_best_effort(&chapter.book_id).await;

        Ok(chapter)
    }

    /// Move a chapter to `to` (clamped into `[1, max]`)
    ///
    /// Moving a chapter onto its own position writes nothing.
    pub async fn move_chapter(&self, chapter_id: &str, to: i64) -> Result<MoveOutcome> {
        let book_id = self.book_of(chapter_id).await?;

        let _guard = self.locks.acquire(&book_id).await;
        let outcome = self
            .with_conflict_retries(&book_id, "move", || self.try_move(&book_id, chapter_id, to))
            .await?;

        if outcome.moved {
            tracing::info!(
                book_id = %book_id,
                chapter_id = %chapter_id,
                order_id = outcome.order_id,
                "Moved chapter"
            );
            self.progress.refresh_book_best_effort(&book_id).await;
        } else {
            tracing::debug!(
                chapter_id = %chapter_id,
                order_id = outcome.order_id,
                "Move was a no-op"
            );
        }

        Ok(outcome)
    }

    /// Patch a chapter, moving it first when a position is given
    ///
    /// The move and the field patch commit together or not at all.
    pub async fn update(&self, chapter_id: &str, patch: &UpdateChapter) -> Result<Chapter> {
        if let Some(header) = &patch.header {
            if header.trim().is_empty() {
                return Err(AppError::Validation("header must not be empty".to_string()));
            }
        }

        let book_id = self.book_of(chapter_id).await?;

        let _guard = self.locks.acquire(&book_id).await;
        let (chapter, moved) = self
            .with_conflict_retries(&book_id, "update", || {
                self.try_update(&book_id, chapter_id, patch)
            })
            .await?;

        tracing::info!(
            book_id = %book_id,
            chapter_id = %chapter_id,
            order_id = chapter.order_id,
            moved,
            "Updated chapter"
        );

        if moved {
            self.progress.refresh_book_best_effort(&book_id).await;
        }

        Ok(chapter)
    }

    /// Delete a chapter and close the gap it leaves
    pub async fn delete(&self, chapter_id: &str) -> Result<DeleteOutcome> {
        let book_id = self.book_of(chapter_id).await?;

        let _guard = self.locks.acquire(&book_id).await;
        let outcome = self
            .with_conflict_retries(&book_id, "delete", || self.try_delete(&book_id, chapter_id))
            .await?;

        tracing::info!(
            book_id = %book_id,
            chapter_id = %chapter_id,
            order_id = outcome.deleted.order_id,
            next_order_id = ?outcome.next.as_ref().map(|c| c.order_id),
            "Deleted chapter"
        );

        self.progress
            .handle_deleted_chapter_best_effort(&outcome.deleted, outcome.next.as_ref())
            .await;

        Ok(outcome)
    }

    async fn book_of(&self, chapter_id: &str) -> Result<String> {
        parse_id(chapter_id)?;

        let mut conn = self.pool.acquire().await?;
        let chapter = ChapterRepository::new(&mut conn)
            .get(chapter_id)
            .await?
            .ok_or_else(|| chapter_not_found(chapter_id))?;

        Ok(chapter.book_id)
    }

    /// Re-run `attempt` while it fails with a revision conflict or a busy store
    async fn with_conflict_retries<T, F, Fut>(
        &self,
        book_id: &str,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e)
                    if (matches!(e, AppError::Conflict(_)) || e.is_store_busy())
                        && retries < self.max_conflict_retries =>
                {
                    retries += 1;
                    tracing::warn!(
                        book_id = %book_id,
                        operation,
                        retries,
                        "Chapter order write lost a race, retrying: {}",
                        e
                    );
                }
                other => return other,
            }
        }
    }

    async fn try_insert(&self, data: &CreateChapter) -> Result<Chapter> {
        let mut tx = self.pool.begin().await?;

        let revision = BookRepository::new(&mut tx)
            .claim_revision(&data.book_id)
            .await?;

        let mut chapters = ChapterRepository::new(&mut tx);
        let max = chapters.max_order(&data.book_id).await?;
        let append = max + 1;
        let target = insert_target(data.order_id, max);

        let created = chapters.insert(data, append).await?;
        shift_into_place(&mut chapters, &data.book_id, &created.id, append, target).await?;

        let chapter = chapters
            .get(&created.id)
            .await?
            .ok_or_else(|| AppError::Internal("Inserted chapter vanished".to_string()))?;

        commit_if_current(tx, &data.book_id, revision).await?;
        Ok(chapter)
    }

    async fn try_move(&self, book_id: &str, chapter_id: &str, to: i64) -> Result<MoveOutcome> {
        let mut tx = self.pool.begin().await?;

        let revision = BookRepository::new(&mut tx).claim_revision(book_id).await?;

        let mut chapters = ChapterRepository::new(&mut tx);
        let chapter = chapter_in_book(&mut chapters, book_id, chapter_id).await?;

        let max = chapters.max_order(book_id).await?;
        let target = clamp_move_target(to, max);

        if target == chapter.order_id {
            return Ok(MoveOutcome {
                chapter_id: chapter.id,
                order_id: target,
                moved: false,
            });
        }

        shift_into_place(&mut chapters, book_id, &chapter.id, chapter.order_id, target).await?;

        commit_if_current(tx, book_id, revision).await?;
        Ok(MoveOutcome {
            chapter_id: chapter.id,
            order_id: target,
            moved: true,
        })
    }

    async fn try_update(
        &self,
        book_id: &str,
        chapter_id: &str,
        patch: &UpdateChapter,
    ) -> Result<(Chapter, bool)> {
        let mut tx = self.pool.begin().await?;

        let revision = BookRepository::new(&mut tx).claim_revision(book_id).await?;

        let mut chapters = ChapterRepository::new(&mut tx);
        let chapter = chapter_in_book(&mut chapters, book_id, chapter_id).await?;

        let target = match patch.order_id {
            Some(to) => clamp_move_target(to, chapters.max_order(book_id).await?),
            None => chapter.order_id,
        };
        let moved = target != chapter.order_id;
        shift_into_place(&mut chapters, book_id, &chapter.id, chapter.order_id, target).await?;

        let updated = chapters
            .update_fields(chapter_id, patch)
            .await?
            .ok_or_else(|| chapter_not_found(chapter_id))?;

        if moved {
            commit_if_current(tx, book_id, revision).await?;
        } else {
            tx.commit().await?;
        }
        Ok((updated, moved))
    }

    async fn try_delete(&self, book_id: &str, chapter_id: &str) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let revision = BookRepository::new(&mut tx).claim_revision(book_id).await?;

        let mut chapters = ChapterRepository::new(&mut tx);
        let deleted = chapter_in_book(&mut chapters, book_id, chapter_id).await?;

        // Read before deleting: the branch depends on the pre-delete maximum
        let max_before = chapters.max_order(book_id).await?;

        chapters.delete(chapter_id).await?;

        let remaining = chapters.slots_after(book_id, deleted.order_id).await?;
        let shifts = plan_delete(&remaining, deleted.order_id);
        chapters.apply_shifts(book_id, &shifts).await?;

        let next = match next_after_delete(deleted.order_id, max_before) {
            Some(order_id) => chapters.find_by_order(book_id, order_id).await?,
            None => None,
        };

        commit_if_current(tx, book_id, revision).await?;
        Ok(DeleteOutcome { deleted, next })
    }
}

fn chapter_not_found(chapter_id: &str) -> AppError {
    AppError::NotFound(format!("Chapter not found: {}", chapter_id))
}

async fn chapter_in_book(
    chapters: &mut ChapterRepository<'_>,
    book_id: &str,
    chapter_id: &str,
) -> Result<Chapter> {
    chapters
        .get(chapter_id)
        .await?
        .filter(|c| c.book_id == book_id)
        .ok_or_else(|| chapter_not_found(chapter_id))
}

/// Move `chapter_id` from `from` to `to`, shifting the chapters in between
async fn shift_into_place(
    chapters: &mut ChapterRepository<'_>,
    book_id: &str,
    chapter_id: &str,
    from: i64,
    to: i64,
) -> Result<()> {
    if from == to {
        return Ok(());
    }

    let slots = chapters
        .slots_in_range(book_id, from.min(to), from.max(to))
        .await?;
    let shifts = plan_move(&slots, chapter_id, from, to);
    chapters.apply_shifts(book_id, &shifts).await
}

/// Advance the book revision and commit, or roll back on a lost race
async fn commit_if_current(
    mut tx: sqlx::Transaction<'_, sqlx::Sqlite>,
    book_id: &str,
    revision: i64,
) -> Result<()> {
    if !BookRepository::new(&mut tx)
        .advance_revision(book_id, revision)
        .await?
    {
        tx.rollback().await?;
        return Err(AppError::Conflict(format!(
            "Book {} changed since revision {}",
            book_id, revision
        )));
    }

    tx.commit().await?;
    Ok(())
}
