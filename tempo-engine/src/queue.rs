//! Job queue
//!
//! Bounded admission buffer for jobs that should run right away instead of
//! waiting for the due scan. Both ends are non-blocking.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tempo_core::domain::job::Job;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("job queue is closed")]
    Closed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job, failing immediately when the queue is full
    async fn push(&self, job: Job) -> Result<(), QueueError>;

    /// Dequeues a job, `None` when the queue is empty or closed
    async fn pop(&self) -> Option<Job>;

    async fn check_health(&self) -> bool;

    async fn close(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First-in first-out queue over a bounded channel
pub struct FifoQueue {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
    capacity: usize,
    closed: AtomicBool,
}

impl FifoQueue {
    /// Creates a queue holding at most `capacity` jobs
    ///
    /// `capacity` must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl JobQueue for FifoQueue {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    async fn pop(&self) -> Option<Job> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.receiver.lock().await.try_recv().ok()
    }

    async fn check_health(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.receiver.lock().await.close();
    }

    fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}
