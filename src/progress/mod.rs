//! Reading progress
//!
//! - `cache`: writes progress with the current chapter's live position and
//!   keeps that cached position in sync when a book's order changes
//! - `queue`: per-user FIFO lanes with bounded retry and dead letters

mod cache;
mod queue;

pub use cache::{ProgressCacheUpdater, ProgressWriter, SaveProgress};
pub use queue::{DeadLetter, ProgressQueue, RetryPolicy};
