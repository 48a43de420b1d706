//! Chapter ordering
//!
//! Keeps the chapter positions of every book a dense `1..=N` sequence across
//! insert, move and delete.
//!
//! - `plan`: pure shift computation over `(chapter, position)` slots
//! - `locks`: per-book async mutexes serializing mutations in-process
//! - `maintainer`: reads, plans and applies shifts in one transaction guarded
//!   by the book revision
//!
//! # Write discipline
//!
//! 1. Take the book lock
//! 2. Open a transaction and read the book revision
//! 3. Read the affected positions, plan, apply as one batch
//! 4. Advance the revision only if it is unchanged, else roll back and retry
//! 5. Commit, then refresh cached progress for the book (best-effort)

mod locks;
mod maintainer;
mod plan;

pub use locks::BookLocks;
pub use maintainer::{DeleteOutcome, MoveOutcome, OrderMaintainer};
pub use plan::{
    clamp_move_target, insert_target, next_after_delete, plan_delete, plan_move, ChapterSlot,
    Shift,
};
