//! Per-book mutation locks

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table entries beyond which idle locks are pruned
const PRUNE_THRESHOLD: usize = 1024;

/// One async mutex per book
///
/// Holding a book's guard is what makes "read positions, then write" safe for
/// concurrent requests against the same book. Different books never contend.
#[derive(Clone, Default)]
pub struct BookLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a book's chapter order
    pub async fn acquire(&self, book_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the table holds a reference to an idle lock
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(book_id.to_string()).or_default().clone()
        };

        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn book_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_book_is_exclusive() {
        let locks = BookLocks::new();
        let guard = locks.acquire("book-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("book-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_books_do_not_contend() {
        let locks = BookLocks::new();
        let _a = locks.acquire("book-a").await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("book-b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.book_count().await, 2);
    }
}
