//! Worker pool that drives queued render jobs through the engine.
//!
//! `max_concurrent` workers share one FIFO queue. Each worker takes the next
//! job id, claims the job, renders it through the [`Renderer`], and records
//! the outcome in the [`JobStore`]. Every job runs in its own task so a panic
//! is contained to that job and the worker keeps serving.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::engine::{EngineCommand, EngineOutcome, ProgressEvent, Renderer};
use crate::error::{EngineError, SchedulerError};
use crate::job::{JobKind, JobStatus, RenderJob, RenderOptions, OUTPUT_PATH_KEY};
use crate::output::OutputResolver;
use crate::queue::JobQueue;
use crate::store::{JobStore, JobUpdate};
use crate::telemetry;

/// Progress reports buffered between the engine and the store.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Error recorded on jobs interrupted by [`RenderScheduler::stop`].
const SHUTDOWN_ERROR: &str = "render interrupted: worker pool shutting down";

/// Owned handle to the job store, work queue, and worker pool.
///
/// Share it behind an `Arc` with whatever layer submits and observes jobs.
pub struct RenderScheduler {
    shared: Arc<Shared>,
    max_concurrent: usize,
    pool: Mutex<Option<WorkerPool>>,
}

struct WorkerPool {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

/// State the workers share with the public surface.
struct Shared {
    store: Arc<JobStore>,
    queue: JobQueue,
    renderer: Arc<dyn Renderer>,
    outputs: Arc<dyn OutputResolver>,
    config: WorkerConfig,
    /// Cancellation tokens of jobs a worker has taken off the queue.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl RenderScheduler {
    pub fn new(
        config: &WorkerConfig,
        renderer: Arc<dyn Renderer>,
        outputs: Arc<dyn OutputResolver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Arc::new(JobStore::new()),
                queue: JobQueue::with_capacity(config.queue_capacity),
                renderer,
                outputs,
                config: config.clone(),
                in_flight: Mutex::new(HashMap::new()),
            }),
            max_concurrent: config.max_concurrent.max(1),
            pool: Mutex::new(None),
        }
    }

    /// Spawns the worker pool. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            debug!("Render workers already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        for worker_id in 0..self.max_concurrent {
            tasks.spawn(worker_loop(worker_id, self.shared.clone(), shutdown.clone()));
        }
        info!(workers = self.max_concurrent, "Render workers started");

        *pool = Some(WorkerPool { shutdown, tasks });
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// Renders in flight are terminated and recorded as failed. Jobs still
    /// waiting in the queue stay queued and run after the next `start`.
    pub async fn stop(&self) {
        let Some(mut pool) = self.pool.lock().take() else {
            return;
        };

        info!("Stopping render workers");
        pool.shutdown.cancel();
        while let Some(joined) = pool.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Render worker exited abnormally");
            }
        }
        info!("Render workers stopped");
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Records a new job and queues it. Never waits for a free worker.
    ///
    /// # Arguments
    ///
    /// * `kind` - Whether to render a video or a single frame
    /// * `options` - Engine options, passed through verbatim apart from
    ///   `output_path`, which is filled in when missing
    ///
    /// # Returns
    ///
    /// Returns the new job id, or [`SchedulerError::QueueFull`] when a queue
    /// capacity is configured and reached.
    pub fn submit(&self, kind: JobKind, options: RenderOptions) -> Result<String, SchedulerError> {
        let job = RenderJob::new(kind, options);
        let job_id = job.id.clone();
        let store = &self.shared.store;

        self.shared.queue.enqueue_with(job_id.clone(), || {
            store.insert(job);
        })?;

        info!(job_id = %job_id, kind = %kind, "Render job submitted");
        Ok(job_id)
    }

    /// Cancels a job.
    ///
    /// A queued job is cancelled immediately, leaves the queue, and is never
    /// dispatched. A running job is flagged and its engine process terminated.
    ///
    /// # Arguments
    ///
    /// * `job_id` - The job to cancel
    ///
    /// # Returns
    ///
    /// Returns `true` if the job was queued or running, `false` for unknown
    /// ids and jobs that already finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        let running = self
            .shared
            .store
            .update(job_id, |job| match job.status {
                JobStatus::Queued => {
                    job.mark_cancelled();
                    Some(false)
                }
                JobStatus::InProgress => {
                    job.cancel_requested = true;
                    Some(true)
                }
                _ => None,
            })
            .flatten();

        match running {
            Some(false) => {
                // Outside the store lock: the queue lock is always taken first.
                self.shared.queue.remove(job_id);
                info!(job_id = %job_id, "Cancelled queued job");
                true
            }
            Some(true) => {
                if let Some(token) = self.shared.in_flight.lock().get(job_id) {
                    token.cancel();
                }
                info!(job_id = %job_id, "Cancellation requested for running job");
                true
            }
            None => false,
        }
    }

    /// Returns a snapshot of the job, or `None` for unknown ids.
    pub fn get(&self, job_id: &str) -> Option<RenderJob> {
        self.shared.store.get(job_id)
    }

    /// Lists jobs newest first.
    ///
    /// # Arguments
    ///
    /// * `status` - Only include jobs in this state, or all jobs when `None`
    /// * `limit` - Maximum number of jobs in the page
    /// * `offset` - Number of matching jobs to skip
    ///
    /// # Returns
    ///
    /// Returns the page and the number of jobs matching the filter before
    /// pagination. Offsets past the end yield an empty page.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<RenderJob>, usize) {
        self.shared.store.list(status, limit, offset)
    }

    /// Subscribes to job status and progress changes.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.shared.store.subscribe()
    }

    /// Waits until the job reaches a terminal state and returns it.
    ///
    /// Returns `None` for unknown ids.
    pub async fn wait_for(&self, job_id: &str) -> Option<RenderJob> {
        let mut updates = self.subscribe();
        loop {
            let job = self.get(job_id)?;
            if job.status.is_terminal() {
                return Some(job);
            }
            loop {
                match updates.recv().await {
                    Ok(update) if update.job_id == job_id => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return self.get(job_id),
                }
            }
        }
    }

    /// Lists the compositions in a bundle. Runs outside the job queue.
    ///
    /// # Arguments
    ///
    /// * `options` - Engine options identifying the bundle, e.g. `serve_url`
    ///
    /// # Returns
    ///
    /// Returns the engine's composition descriptors, or the engine failure.
    pub async fn compositions(&self, options: RenderOptions) -> Result<Vec<Value>, SchedulerError> {
        let outcome = self
            .shared
            .renderer
            .execute(
                EngineCommand::GetCompositions,
                options,
                None,
                CancellationToken::new(),
            )
            .await?;
        Ok(match outcome {
            EngineOutcome::Compositions(items) => items,
            EngineOutcome::Rendered => Vec::new(),
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.shared.store
    }

    /// Number of jobs waiting for a worker.
    pub fn queue_length(&self) -> usize {
        self.shared.queue.queue_length()
    }

    pub fn in_progress_count(&self) -> usize {
        self.shared.store.count_by_status(JobStatus::InProgress)
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, shutdown: CancellationToken) {
    debug!(worker_id, "Render worker waiting for jobs");

    loop {
        let job_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job_id = shared.queue.dequeue() => job_id,
        };

        let span = info_span!("render_job", worker_id, job_id = %job_id);
        let task = tokio::spawn(
            process_job(shared.clone(), job_id.clone(), shutdown.child_token()).instrument(span),
        );

        if let Err(err) = task.await {
            let reason = if err.is_panic() {
                panic_message(err.into_panic())
            } else {
                "job task was aborted".to_string()
            };
            error!(worker_id, job_id = %job_id, reason = %reason, "Render job crashed");
            shared.store.update(&job_id, |job| {
                job.mark_failed(format!("internal error while rendering: {reason}"))
            });
        }
    }

    debug!(worker_id, "Render worker exiting");
}

async fn process_job(shared: Arc<Shared>, job_id: String, cancel: CancellationToken) {
    // Registered before the claim so a concurrent cancel always finds the token.
    let _in_flight = InFlight::register(&shared, &job_id, cancel.clone());

    let claimed = shared
        .store
        .update(&job_id, |job| {
            job.start_processing()
                .then(|| (job.kind, job.options.clone(), job.requested_output_path().map(str::to_string)))
        })
        .flatten();

    let Some((kind, mut options, requested_path)) = claimed else {
        debug!("Skipping job that is no longer queued");
        return;
    };

    info!(kind = %kind, "Render job started");

    let output_path = match requested_path {
        Some(path) => PathBuf::from(path),
        None => match shared.outputs.resolve_path(&job_id, shared.config.extension_for(kind)) {
            Ok(path) => path,
            Err(err) => {
                finish(&shared, &job_id, |job| {
                    job.mark_failed(format!("failed to prepare output location: {err}"))
                });
                return;
            }
        },
    };
    let output_value = Value::String(output_path.to_string_lossy().into_owned());
    options.insert(OUTPUT_PATH_KEY.to_string(), output_value.clone());
    shared.store.update(&job_id, |job| {
        job.options.insert(OUTPUT_PATH_KEY.to_string(), output_value);
    });

    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let folder = tokio::spawn(fold_progress(shared.store.clone(), job_id.clone(), progress_rx));

    let result = shared
        .renderer
        .execute(kind.command(), options, Some(progress_tx), cancel)
        .await;

    // Drain outstanding reports before the terminal write.
    if let Err(err) = folder.await {
        warn!(error = %err, "Progress reporting task failed");
    }

    match result {
        Ok(_) => {
            let url = shared.outputs.resolve_url(&output_path);
            let path = output_path.to_string_lossy().into_owned();
            finish(&shared, &job_id, |job| job.mark_complete(path, url));
        }
        Err(err) => record_failure(&shared, &job_id, &err),
    }
}

async fn fold_progress(
    store: Arc<JobStore>,
    job_id: String,
    mut reports: mpsc::Receiver<ProgressEvent>,
) {
    while let Some(report) = reports.recv().await {
        debug!(progress = report.progress, "Render progress");
        store.update(&job_id, |job| job.record_progress(report.progress, report.details));
    }
}

fn record_failure(shared: &Shared, job_id: &str, err: &EngineError) {
    if err.is_cancelled() {
        finish(shared, job_id, |job| {
            if job.cancel_requested {
                job.mark_cancelled()
            } else {
                job.mark_failed(SHUTDOWN_ERROR.to_string())
            }
        });
    } else {
        finish(shared, job_id, |job| job.mark_failed(err.to_string()));
    }
}

/// Applies a terminal transition and emits job telemetry.
fn finish(shared: &Shared, job_id: &str, transition: impl FnOnce(&mut RenderJob) -> bool) {
    let applied = shared.store.update(job_id, transition).unwrap_or(false);
    let Some(job) = shared.store.get(job_id) else {
        return;
    };
    if !applied {
        warn!(status = %job.status, "Terminal transition not applied");
        return;
    }

    match job.status {
        JobStatus::Completed => info!(
            output_path = job.output_path.as_deref().unwrap_or_default(),
            duration_ms = ?job.processing_duration_ms(),
            "Render job completed"
        ),
        JobStatus::Failed => error!(
            error = job.error.as_deref().unwrap_or_default(),
            "Render job failed"
        ),
        status => info!(status = %status, "Render job finished"),
    }
    telemetry::record_job_telemetry(&job);
}

/// Keeps a job's cancellation token reachable while a worker holds it.
struct InFlight<'a> {
    shared: &'a Shared,
    job_id: &'a str,
}

impl<'a> InFlight<'a> {
    fn register(shared: &'a Shared, job_id: &'a str, token: CancellationToken) -> Self {
        shared.in_flight.lock().insert(job_id.to_string(), token);
        Self { shared, job_id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.lock().remove(self.job_id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockRenderer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::error::ExecutionFailure;
    use crate::output::LocalOutputs;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(value: Value) -> RenderOptions {
        value.as_object().cloned().unwrap()
    }

    fn scheduler(renderer: MockRenderer, temp: &TempDir, max_concurrent: usize) -> RenderScheduler {
        let config = WorkerConfig {
            max_concurrent,
            ..WorkerConfig::default()
        };
        RenderScheduler::new(
            &config,
            Arc::new(renderer),
            Arc::new(LocalOutputs::new(temp.path(), "http://localhost:8000")),
        )
    }

    async fn wait(scheduler: &RenderScheduler, job_id: &str) -> RenderJob {
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_for(job_id))
            .await
            .expect("job should finish")
            .expect("job should exist")
    }

    #[tokio::test]
    async fn test_submit_records_queued_job() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(MockRenderer::new(), &temp, 2);

        let first = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        let second = scheduler.submit(JobKind::Still, RenderOptions::new()).unwrap();
        assert_ne!(first, second);

        let job = scheduler.get(&first).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0.0);
        assert_eq!(scheduler.queue_length(), 2);
    }

    #[tokio::test]
    async fn test_completed_job_gets_output_location() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer
            .expect_execute()
            .times(1)
            .returning(|command, options, progress, _| {
                assert_eq!(command, EngineCommand::RenderMedia);
                assert!(options[OUTPUT_PATH_KEY].as_str().unwrap().ends_with(".mp4"));
                let sink = progress.expect("scheduler always passes a progress sink");
                sink.try_send(ProgressEvent {
                    progress: 0.5,
                    details: RenderOptions::new(),
                })
                .unwrap();
                Ok(EngineOutcome::Rendered)
            });
        let scheduler = scheduler(renderer, &temp, 1);
        scheduler.start();

        let job_id = scheduler
            .submit(JobKind::Media, options(json!({"composition": "Intro", "output_path": null})))
            .unwrap();
        let job = wait(&scheduler, &job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        let expected_path = temp.path().join(format!("{job_id}.mp4"));
        assert_eq!(job.output_path.as_deref(), Some(expected_path.to_str().unwrap()));
        assert_eq!(
            job.output_url,
            Some(format!("http://localhost:8000/outputs/{job_id}.mp4"))
        );
        assert!(job.error.is_none());
        assert!(job.started_at.is_some() && job.completed_at.is_some());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_output_extension_follows_config() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer
            .expect_execute()
            .withf(|command, _, _, _| *command == EngineCommand::RenderStill)
            .times(1)
            .returning(|_, _, _, _| Ok(EngineOutcome::Rendered));
        let config = WorkerConfig {
            still_extension: "jpeg".to_string(),
            ..WorkerConfig::default()
        };
        let scheduler = RenderScheduler::new(
            &config,
            Arc::new(renderer),
            Arc::new(LocalOutputs::new(temp.path(), "http://localhost:8000")),
        );
        scheduler.start();

        let job_id = scheduler.submit(JobKind::Still, RenderOptions::new()).unwrap();
        let job = wait(&scheduler, &job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.output_url,
            Some(format!("http://localhost:8000/outputs/{job_id}.jpeg"))
        );
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_caller_output_path_is_kept() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer
            .expect_execute()
            .returning(|command, options, _, _| {
                assert_eq!(command, EngineCommand::RenderStill);
                assert_eq!(options[OUTPUT_PATH_KEY], json!("/srv/custom/frame.jpeg"));
                Ok(EngineOutcome::Rendered)
            });
        let scheduler = scheduler(renderer, &temp, 1);
        scheduler.start();

        let job_id = scheduler
            .submit(JobKind::Still, options(json!({"output_path": "/srv/custom/frame.jpeg"})))
            .unwrap();
        let job = wait(&scheduler, &job_id).await;

        assert_eq!(job.output_path.as_deref(), Some("/srv/custom/frame.jpeg"));
        assert_eq!(
            job.output_url.as_deref(),
            Some("http://localhost:8000/outputs/frame.jpeg")
        );
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_engine_failure_marks_job_failed() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer.expect_execute().returning(|_, _, _, _| {
            Err(ExecutionFailure::Reported("bundle not found".to_string()).into())
        });
        let scheduler = scheduler(renderer, &temp, 1);
        scheduler.start();

        let job_id = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        let job = wait(&scheduler, &job_id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("bundle not found"));
        assert!(job.output_path.is_none());
        assert!(job.completed_at.is_some());
        scheduler.stop().await;
    }

    /// Panics on its first render, succeeds afterwards.
    struct FlakyRenderer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for FlakyRenderer {
        async fn execute(
            &self,
            _command: EngineCommand,
            _options: RenderOptions,
            _progress: Option<mpsc::Sender<ProgressEvent>>,
            _cancel: CancellationToken,
        ) -> Result<EngineOutcome, EngineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("renderer exploded");
            }
            Ok(EngineOutcome::Rendered)
        }
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let temp = TempDir::new().unwrap();
        let config = WorkerConfig {
            max_concurrent: 1,
            ..WorkerConfig::default()
        };
        let scheduler = RenderScheduler::new(
            &config,
            Arc::new(FlakyRenderer {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(LocalOutputs::new(temp.path(), "http://localhost:8000")),
        );
        scheduler.start();

        let first = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        let second = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();

        let crashed = wait(&scheduler, &first).await;
        assert_eq!(crashed.status, JobStatus::Failed);
        assert!(crashed.error.unwrap().contains("renderer exploded"));

        let next = wait(&scheduler, &second).await;
        assert_eq!(next.status, JobStatus::Completed);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_job_is_never_dispatched() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer.expect_execute().never();
        let scheduler = scheduler(renderer, &temp, 1);

        let job_id = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        assert!(scheduler.cancel(&job_id));
        assert!(!scheduler.cancel(&job_id), "already cancelled");

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let job = scheduler.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_some());
        assert_eq!(scheduler.queue_length(), 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(MockRenderer::new(), &temp, 1);
        assert!(!scheduler.cancel("nope"));
        assert!(scheduler.get("nope").is_none());
        assert!(scheduler.wait_for("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_queue_full_rejects_submission() {
        let temp = TempDir::new().unwrap();
        let config = WorkerConfig {
            queue_capacity: Some(1),
            ..WorkerConfig::default()
        };
        let scheduler = RenderScheduler::new(
            &config,
            Arc::new(MockRenderer::new()),
            Arc::new(LocalOutputs::new(temp.path(), "http://localhost:8000")),
        );

        scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        let err = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 1 }));
        assert_eq!(scheduler.store().len(), 1, "rejected job is not recorded");
    }

    #[tokio::test]
    async fn test_cancelled_jobs_release_queue_capacity() {
        let temp = TempDir::new().unwrap();
        let config = WorkerConfig {
            queue_capacity: Some(1),
            ..WorkerConfig::default()
        };
        let scheduler = RenderScheduler::new(
            &config,
            Arc::new(MockRenderer::new()),
            Arc::new(LocalOutputs::new(temp.path(), "http://localhost:8000")),
        );

        let first = scheduler.submit(JobKind::Media, RenderOptions::new()).unwrap();
        assert!(scheduler.cancel(&first));
        assert_eq!(scheduler.queue_length(), 0);

        let second = scheduler.submit(JobKind::Still, RenderOptions::new()).unwrap();
        assert_eq!(scheduler.get(&second).unwrap().status, JobStatus::Queued);
        assert_eq!(scheduler.get(&first).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_waits() {
        let temp = TempDir::new().unwrap();
        let scheduler = scheduler(MockRenderer::new(), &temp, 3);
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        tokio::time::timeout(Duration::from_secs(2), scheduler.stop())
            .await
            .expect("idle workers stop promptly");
        assert!(!scheduler.is_running());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_compositions_passthrough() {
        let temp = TempDir::new().unwrap();
        let mut renderer = MockRenderer::new();
        renderer
            .expect_execute()
            .withf(|command, _, progress, _| {
                *command == EngineCommand::GetCompositions && progress.is_none()
            })
            .returning(|_, _, _, _| {
                Ok(EngineOutcome::Compositions(vec![json!({"id": "Intro"})]))
            });
        let scheduler = scheduler(renderer, &temp, 1);

        let items = scheduler
            .compositions(options(json!({"serve_url": "http://bundle"})))
            .await
            .unwrap();
        assert_eq!(items, vec![json!({"id": "Intro"})]);
        assert!(scheduler.store().is_empty());
    }
}
