//! Progress save queue
//!
//! Saves are funneled through one lane per user: an unbounded channel drained
//! by a single worker task, so a user's saves apply in submission order while
//! different users never wait on each other. Lanes are spawned on demand and
//! retire after sitting idle.
//!
//! Transient failures are retried with exponential backoff up to
//! `max_attempts`. Anything that still fails, or fails permanently, lands in a
//! bounded dead-letter list and the error goes back to the submitter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::cache::{ProgressWriter, SaveProgress};
use crate::config::ProgressQueueConfig;
use crate::db::ReadingProgress;
use crate::error::{AppError, Result};

/// A save request waiting in a lane
struct ProgressJob {
    request: SaveProgress,
    reply: oneshot::Sender<Result<ReadingProgress>>,
}

/// A save that was given up on
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub request: SaveProgress,
    pub error: String,
    pub attempts: u32,
    pub failed_at: String,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            base: policy.base,
            max: policy.max,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }
}

/// Per-user progress save queue
#[derive(Clone)]
pub struct ProgressQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    writer: Arc<dyn ProgressWriter>,
    /// Senders of running lanes, keyed by user id
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<ProgressJob>>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    retry: RetryPolicy,
    lane_idle: Duration,
    dead_letter_capacity: usize,
}

impl ProgressQueue {
    pub fn new(writer: Arc<dyn ProgressWriter>, config: &ProgressQueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                writer,
                lanes: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(VecDeque::new()),
                retry: RetryPolicy {
                    max_attempts: config.max_attempts.max(1),
                    base: config.backoff_base(),
                    max: config.backoff_max(),
                },
                lane_idle: config.lane_idle(),
                dead_letter_capacity: config.dead_letter_capacity,
            }),
        }
    }

    /// Queue a save on the user's lane and wait for its outcome
    pub async fn submit(&self, request: SaveProgress) -> Result<ReadingProgress> {
        let (reply, outcome) = oneshot::channel();
        self.enqueue(ProgressJob { request, reply }).await;

        outcome
            .await
            .map_err(|_| AppError::Internal("Progress lane dropped the request".to_string()))?
    }

    async fn enqueue(&self, job: ProgressJob) {
        let user_id = job.request.user_id.clone();
        let mut lanes = self.inner.lanes.lock().await;

        let job = match lanes.get(&user_id) {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                // Lane worker is gone; start a fresh one below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(job).is_err() {
            tracing::error!(user_id = %user_id, "Fresh progress lane rejected its first job");
            return;
        }
        lanes.insert(user_id.clone(), sender);

        tracing::debug!(user_id = %user_id, "Started progress lane");
        tokio::spawn(run_lane(Arc::clone(&self.inner), user_id, receiver));
    }

    /// Saves that were given up on, oldest first
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Number of users with a running lane
    pub async fn active_lanes(&self) -> usize {
        self.inner.lanes.lock().await.len()
    }
}

async fn run_lane(
    inner: Arc<QueueInner>,
    user_id: String,
    mut receiver: mpsc::UnboundedReceiver<ProgressJob>,
) {
    loop {
        match tokio::time::timeout(inner.lane_idle, receiver.recv()).await {
            Ok(Some(job)) => inner.process(job).await,
            Ok(None) => break,
            Err(_) => {
                // Submitters send while holding the lanes lock, so once we hold
                // it an empty channel stays empty until the entry is removed.
                let mut lanes = inner.lanes.lock().await;
                match receiver.try_recv() {
                    Ok(job) => {
                        drop(lanes);
                        inner.process(job).await;
                    }
                    Err(_) => {
                        lanes.remove(&user_id);
                        tracing::debug!(user_id = %user_id, "Retired idle progress lane");
                        break;
                    }
                }
            }
        }
    }
}

impl QueueInner {
    async fn process(&self, job: ProgressJob) {
        let mut backoff = Backoff::new(self.retry);
        let mut attempt = 1;

        let outcome = loop {
            match self.writer.save(&job.request).await {
                Ok(progress) => break Ok(progress),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        user_id = %job.request.user_id,
                        book_id = %job.request.book_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Progress save failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.dead_letter(&job.request, &e, attempt).await;
                    break Err(e);
                }
            }
        };

        // The submitter may have gone away; nothing to do then
        let _ = job.reply.send(outcome);
    }

    async fn dead_letter(&self, request: &SaveProgress, error: &AppError, attempts: u32) {
        tracing::error!(
            user_id = %request.user_id,
            book_id = %request.book_id,
            chapter_id = %request.current_chapter_id,
            attempts,
            "Progress save dead-lettered: {}",
            error
        );

        if self.dead_letter_capacity == 0 {
            return;
        }

        let mut dead_letters = self.dead_letters.lock().await;
        while dead_letters.len() >= self.dead_letter_capacity {
            dead_letters.pop_front();
        }
        dead_letters.push_back(DeadLetter {
            request: request.clone(),
            error: error.to_string(),
            attempts,
            failed_at: Utc::now().to_rfc3339(),
        });
    }
}
