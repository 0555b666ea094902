//! Error types for the render engine bridge and the scheduler.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure raised by the engine bridge.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine executable or its entry point could not be found.
    ///
    /// Raised once, when the bridge is constructed.
    #[error("render engine unavailable: {0}")]
    Setup(String),

    /// The request could not be encoded as a JSON line.
    #[error("failed to encode engine request: {0}")]
    Request(#[from] serde_json::Error),

    /// The engine ran but did not produce a successful result.
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
}

/// The distinct ways a single engine invocation can fail.
///
/// All of these are scoped to one job; the `Display` output is what ends up
/// in the job's `error` field.
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    /// The engine emitted an `error` event.
    #[error("{0}")]
    Reported(String),

    /// The engine process exited with a non-zero status.
    #[error("engine process failed (exit code {}): {stderr}", code_label(.code))]
    Exit { code: Option<i32>, stderr: String },

    /// No `progress` or `info` event within the stall window.
    #[error("render timed out: no progress from engine for {}s", .0.as_secs_f64())]
    Stalled(Duration),

    /// The engine exited cleanly without a `complete` or `compositions` event.
    #[error("engine exited without reporting a result")]
    MissingResult,

    /// The invocation was cancelled and the process terminated.
    #[error("render cancelled")]
    Cancelled,

    #[error("engine i/o failed: {0}")]
    Io(#[from] io::Error),
}

fn code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl EngineError {
    /// Returns true when the failure came from a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Execution(ExecutionFailure::Cancelled))
    }

    /// Returns true when the failure is a stall timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Execution(ExecutionFailure::Stalled(_)))
    }
}

/// Failure raised by the scheduler's public surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The bounded work queue is at capacity.
    #[error("render queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_error_is_verbatim() {
        let err = EngineError::from(ExecutionFailure::Reported("bundle not found".to_string()));
        assert_eq!(err.to_string(), "bundle not found");
    }

    #[test]
    fn test_exit_error_carries_stderr() {
        let err = ExecutionFailure::Exit {
            code: Some(3),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "engine process failed (exit code 3): boom");

        let killed = ExecutionFailure::Exit {
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("signal"));
    }

    #[test]
    fn test_classification() {
        let stalled = EngineError::from(ExecutionFailure::Stalled(Duration::from_millis(500)));
        assert!(stalled.is_timeout());
        assert!(!stalled.is_cancelled());
        assert!(stalled.to_string().contains("timed out"));

        let cancelled = EngineError::from(ExecutionFailure::Cancelled);
        assert!(cancelled.is_cancelled());
    }
}
