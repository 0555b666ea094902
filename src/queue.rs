//! In-memory FIFO work queue shared by the worker pool.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::SchedulerError;

/// FIFO queue of job ids.
///
/// Enqueue never waits. Dequeue suspends until an id is available. An
/// optional capacity turns overflow into [`SchedulerError::QueueFull`]
/// instead of unbounded growth.
pub struct JobQueue {
    pending: Mutex<VecDeque<String>>,
    notify: Notify,
    capacity: Option<usize>,
}

impl JobQueue {
    /// Creates an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Appends a job id to the back of the queue.
    pub fn enqueue(&self, job_id: String) -> Result<(), SchedulerError> {
        self.enqueue_with(job_id, || {})
    }

    /// Appends a job id, running `register` under the queue lock first.
    ///
    /// `register` only runs once the id is accepted, and no worker can take
    /// the id before it returns.
    pub fn enqueue_with(&self, job_id: String, register: impl FnOnce()) -> Result<(), SchedulerError> {
        let depth = {
            let mut pending = self.pending.lock();
            if let Some(capacity) = self.capacity {
                if pending.len() >= capacity {
                    return Err(SchedulerError::QueueFull { capacity });
                }
            }
            register();
            pending.push_back(job_id.clone());
            pending.len()
        };
        self.notify.notify_one();

        info!(job_id = %job_id, queue_length = depth, "Enqueued job");
        Ok(())
    }

    /// Takes the next job id, waiting for one if the queue is empty.
    ///
    /// Cancel-safe: dropping the future never loses an id.
    pub async fn dequeue(&self) -> String {
        loop {
            if let Some(job_id) = self.try_dequeue() {
                return job_id;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_dequeue(&self) -> Option<String> {
        let job_id = self.pending.lock().pop_front();
        if let Some(ref job_id) = job_id {
            debug!(job_id = %job_id, "Dequeued job");
            // Pass the wakeup on if more work is waiting.
            if !self.is_empty() {
                self.notify.notify_one();
            }
        }
        job_id
    }

    /// Removes a job id that has not been taken by a worker yet.
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job id to drop from the queue
    ///
    /// # Returns
    ///
    /// Returns `true` if the id was still waiting in the queue.
    pub fn remove(&self, job_id: &str) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|queued| queued == job_id) {
            Some(index) => {
                pending.remove(index);
                debug!(job_id = %job_id, "Removed job from queue");
                true
            }
            None => false,
        }
    }

    /// Returns the current queue length.
    pub fn queue_length(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
