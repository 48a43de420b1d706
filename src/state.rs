//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::ordering::{BookLocks, OrderMaintainer};
use crate::progress::{ProgressCacheUpdater, ProgressQueue};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: SqlitePool,
    maintainer: OrderMaintainer,
    queue: ProgressQueue,
}

impl AppState {
    /// Wire the services on top of a pool
    pub fn new(config: &Config, db: SqlitePool) -> Self {
        let progress = ProgressCacheUpdater::new(db.clone());
        let maintainer =
            OrderMaintainer::new(db.clone(), BookLocks::new(), progress.clone(), &config.ordering);
        let queue = ProgressQueue::new(Arc::new(progress), &config.progress);

        Self {
            inner: Arc::new(AppStateInner {
                db,
                maintainer,
                queue,
            }),
        }
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn maintainer(&self) -> &OrderMaintainer {
        &self.inner.maintainer
    }

    /// Get the progress save queue
    pub fn queue(&self) -> &ProgressQueue {
        &self.inner.queue
    }
}
