//! In-memory registry of render jobs.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::job::{JobStatus, RenderJob};

/// Capacity of the change-notification channel. Slow subscribers observe
/// `Lagged` and re-read the store.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of a job after a mutation, sent to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
}

impl JobUpdate {
    fn of(job: &RenderJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
        }
    }
}

/// Thread-safe job registry.
///
/// Readers always receive cloned snapshots; every mutation runs under the
/// write lock and is published on the update channel.
pub struct JobStore {
    jobs: RwLock<HashMap<String, RenderJob>>,
    updates: broadcast::Sender<JobUpdate>,
}

impl JobStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Inserts a new job. Returns false if the id is already present.
    pub fn insert(&self, job: RenderJob) -> bool {
        let update = JobUpdate::of(&job);
        {
            let mut jobs = self.jobs.write();
            if jobs.contains_key(&job.id) {
                return false;
            }
            jobs.insert(job.id.clone(), job);
        }
        let _ = self.updates.send(update);
        true
    }

    pub fn get(&self, job_id: &str) -> Option<RenderJob> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Applies `mutate` to the job under the write lock.
    ///
    /// Returns `None` if the job does not exist.
    pub fn update<R>(&self, job_id: &str, mutate: impl FnOnce(&mut RenderJob) -> R) -> Option<R> {
        let (result, update) = {
            let mut jobs = self.jobs.write();
            let job = jobs.get_mut(job_id)?;
            let result = mutate(job);
            (result, JobUpdate::of(job))
        };
        debug!(job_id = %update.job_id, status = %update.status, progress = update.progress, "Job updated");
        let _ = self.updates.send(update);
        Some(result)
    }

    /// Lists jobs newest first, optionally filtered by status.
    ///
    /// Returns the requested page and the number of jobs matching the filter.
    /// Offsets past the end yield an empty page.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<RenderJob>, usize) {
        let mut matching: Vec<RenderJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| status.map_or(true, |status| job.status == status))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Subscribes to job changes made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.updates.subscribe()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, RenderOptions};
    use chrono::Duration;

    fn job_created(minutes_ago: i64) -> RenderJob {
        let mut job = RenderJob::new(JobKind::Media, RenderOptions::new());
        job.created_at = chrono::Utc::now() - Duration::minutes(minutes_ago);
        job
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::new();
        let job = job_created(0);
        let id = job.id.clone();

        assert!(store.insert(job.clone()));
        assert!(!store.insert(job), "duplicate ids are rejected");
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);
        assert!(store.get("missing").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_unknown_job() {
        let store = JobStore::new();
        assert!(store.update("missing", |job| job.start_processing()).is_none());
    }

    #[test]
    fn test_list_orders_newest_first_and_paginates() {
        let store = JobStore::new();
        let oldest = job_created(30);
        let middle = job_created(20);
        let newest = job_created(10);
        let ids = [newest.id.clone(), middle.id.clone(), oldest.id.clone()];
        for job in [middle, oldest, newest] {
            store.insert(job);
        }

        let (page, total) = store.list(None, 2, 0);
        assert_eq!(total, 3);
        assert_eq!(
            page.iter().map(|job| job.id.as_str()).collect::<Vec<_>>(),
            vec![ids[0].as_str(), ids[1].as_str()]
        );

        let (page, total) = store.list(None, 2, 2);
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, ids[2]);

        let (page, total) = store.list(None, 10, 99);
        assert!(page.is_empty());
        assert_eq!(total, 3);
    }

    #[test]
    fn test_list_filters_by_status() {
        let store = JobStore::new();
        let mut completed = Vec::new();
        for minutes in 0..4 {
            let job = job_created(minutes);
            let id = job.id.clone();
            store.insert(job);
            if minutes % 2 == 0 {
                store.update(&id, |job| {
                    job.start_processing();
                    job.mark_complete("p".into(), "u".into());
                });
                completed.push(id);
            }
        }

        let (page, total) = store.list(Some(JobStatus::Completed), 1, 0);
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, completed[0], "newest completed job first");
        assert_eq!(store.count_by_status(JobStatus::Queued), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_mutations() {
        let store = JobStore::new();
        let mut updates = store.subscribe();
        let job = job_created(0);
        let id = job.id.clone();

        store.insert(job);
        store.update(&id, |job| job.start_processing());

        let inserted = updates.recv().await.unwrap();
        assert_eq!(inserted.status, JobStatus::Queued);
        let started = updates.recv().await.unwrap();
        assert_eq!(started.job_id, id);
        assert_eq!(started.status, JobStatus::InProgress);
    }
}
