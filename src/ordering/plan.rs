//! Shift planning
//!
//! Everything here is pure: given the current positions of the chapters
//! involved, compute the position changes an operation needs. The maintainer
//! applies the resulting [`Shift`]s as one batch.

/// A chapter's id and its current position
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChapterSlot {
    pub id: String,
    pub order_id: i64,
}

impl ChapterSlot {
    pub fn new(id: impl Into<String>, order_id: i64) -> Self {
        Self {
            id: id.into(),
            order_id,
        }
    }
}

/// One position change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shift {
    pub chapter_id: String,
    pub from: i64,
    pub to: i64,
}

/// Position a new chapter ends up at
///
/// Anything outside `[1, max + 1]`, or no request at all, appends.
pub fn insert_target(requested: Option<i64>, max: i64) -> i64 {
    let append = max + 1;
    match requested {
        Some(order_id) if (1..=append).contains(&order_id) => order_id,
        _ => append,
    }
}

/// Clamp a move target into the occupied range `[1, max]`
pub fn clamp_move_target(requested: i64, max: i64) -> i64 {
    requested.clamp(1, max.max(1))
}

/// Shifts moving `moving_id` from `from` to `to`
///
/// `slots` must contain every chapter positioned in `[min(from, to),
/// max(from, to)]`; slots outside that window are ignored. The moved chapter's
/// own shift comes last. Returns no shifts when `from == to`.
pub fn plan_move(slots: &[ChapterSlot], moving_id: &str, from: i64, to: i64) -> Vec<Shift> {
    if from == to {
        return Vec::new();
    }

    let (lo, hi) = (from.min(to), from.max(to));
    // Moving towards the end pulls the others back, and vice versa
    let delta = if to > from { -1 } else { 1 };

    let mut shifts: Vec<Shift> = slots
        .iter()
        .filter(|slot| slot.id != moving_id && (lo..=hi).contains(&slot.order_id))
        .map(|slot| Shift {
            chapter_id: slot.id.clone(),
            from: slot.order_id,
            to: slot.order_id + delta,
        })
        .collect();

    shifts.push(Shift {
        chapter_id: moving_id.to_string(),
        from,
        to,
    });

    shifts
}

/// Shifts closing the gap left by deleting the chapter at `deleted_order`
///
/// Only chapters strictly after the deleted position move.
pub fn plan_delete(remaining: &[ChapterSlot], deleted_order: i64) -> Vec<Shift> {
    remaining
        .iter()
        .filter(|slot| slot.order_id > deleted_order)
        .map(|slot| Shift {
            chapter_id: slot.id.clone(),
            from: slot.order_id,
            to: slot.order_id - 1,
        })
        .collect()
}

/// Position of the chapter to show after a delete, `None` when the book is empty
///
/// `max_before` is the highest position before the delete. Deleting the last
/// chapter falls back to its predecessor; deleting from the middle shows the
/// chapter that slid into the freed position.
pub fn next_after_delete(deleted_order: i64, max_before: i64) -> Option<i64> {
    if max_before <= 1 {
        None
    } else if deleted_order >= max_before {
        Some(max_before - 1)
    } else {
        Some(deleted_order)
    }
}

#[cfg(test)]
pub(crate) fn is_dense(order_ids: &[i64]) -> bool {
    let mut sorted = order_ids.to_vec();
    sorted.sort_unstable();
    sorted.iter().zip(1..).all(|(order_id, expected)| *order_id == expected)
}
