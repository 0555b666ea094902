//! Job models and state management for the render queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::engine::EngineCommand;

/// Engine-specific render parameters, forwarded to the engine untouched.
pub type RenderOptions = Map<String, Value>;

/// Key under which the resolved output location is written back into the options.
pub const OUTPUT_PATH_KEY: &str = "output_path";

/// A render job tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: String,
    pub kind: JobKind,
    pub options: RenderOptions,
    pub status: JobStatus,
    pub progress: f64,
    /// Latest progress payload reported by the engine (frame counters, stage).
    pub render_progress: Option<RenderOptions>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_path: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Media,
    Still,
}

impl JobKind {
    /// The engine command that renders this kind of job.
    pub fn command(self) -> EngineCommand {
        match self {
            JobKind::Media => EngineCommand::RenderMedia,
            JobKind::Still => EngineCommand::RenderStill,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Media => write!(f, "media"),
            JobKind::Still => write!(f, "still"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::InProgress => write!(f, "in-progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RenderJob {
    pub fn new(kind: JobKind, options: RenderOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            options,
            status: JobStatus::Queued,
            progress: 0.0,
            render_progress: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            output_url: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// The output path the caller supplied, if any.
    pub fn requested_output_path(&self) -> Option<&str> {
        self.options
            .get(OUTPUT_PATH_KEY)
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
    }

    /// Moves a queued job to in-progress. Returns false if the job already left the queue.
    pub fn start_processing(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::InProgress;
        self.started_at = Some(Utc::now());
        true
    }

    /// Records an engine progress report. Only applies while in progress and
    /// never moves the fraction backwards.
    pub fn record_progress(&mut self, progress: f64, details: RenderOptions) {
        if self.status != JobStatus::InProgress {
            return;
        }
        if progress.is_finite() {
            self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        }
        self.render_progress = Some(details);
    }

    pub fn mark_complete(&mut self, output_path: String, output_url: String) -> bool {
        if self.status != JobStatus::InProgress {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 1.0;
        self.output_path = Some(output_path);
        self.output_url = Some(output_url);
        self.error = None;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn mark_failed(&mut self, error: String) -> bool {
        if self.status != JobStatus::InProgress {
            return false;
        }
        self.status = JobStatus::Failed;
        self.output_path = None;
        self.output_url = None;
        self.error = Some(if error.is_empty() {
            "render failed".to_string()
        } else {
            error
        });
        self.completed_at = Some(Utc::now());
        true
    }

    /// Cancels a queued job outright, or finalizes a running job whose
    /// cancellation was requested.
    pub fn mark_cancelled(&mut self) -> bool {
        let allowed = match self.status {
            JobStatus::Queued => true,
            JobStatus::InProgress => self.cancel_requested,
            _ => false,
        };
        if !allowed {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some(completed.signed_duration_since(started).num_milliseconds())
            }
            _ => None,
        }
    }
}
