//! Worker configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::job::JobKind;

/// How to launch the render engine and how long to wait on it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable to run. Bare names are looked up on `PATH`.
    pub program: PathBuf,
    /// Script passed as the first argument, checked for existence at startup.
    pub entry: Option<PathBuf>,
    /// Extra arguments after the entry point.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Longest wait for a single output line before re-checking liveness.
    pub read_timeout: Duration,
    /// Longest time without a `progress` or `info` event.
    pub stall_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tsx"),
            entry: Some(PathBuf::from("node/renderer.ts")),
            args: Vec::new(),
            working_dir: None,
            read_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(300),
        }
    }
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent: usize,
    /// `None` leaves the work queue unbounded.
    pub queue_capacity: Option<usize>,
    pub engine: EngineConfig,
    pub output_dir: PathBuf,
    pub base_url: String,
    pub media_extension: String,
    pub still_extension: String,
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: None,
            engine: EngineConfig::default(),
            output_dir: PathBuf::from("./outputs"),
            base_url: "http://localhost:8000".to_string(),
            media_extension: "mp4".to_string(),
            still_extension: "png".to_string(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from `RENDER_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let engine = EngineConfig {
            program: lookup("RENDER_ENGINE_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or(defaults.engine.program),
            entry: match lookup("RENDER_ENGINE_ENTRY") {
                Some(entry) if entry == "none" => None,
                Some(entry) => Some(PathBuf::from(entry)),
                None => defaults.engine.entry,
            },
            args: lookup("RENDER_ENGINE_ARGS")
                .map(|args| args.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            working_dir: lookup("RENDER_ENGINE_DIR").map(PathBuf::from),
            read_timeout: Duration::from_secs(parse_or(&lookup, "RENDER_READ_TIMEOUT_SECS", 30)),
            stall_timeout: Duration::from_secs(parse_or(&lookup, "RENDER_STALL_TIMEOUT_SECS", 300)),
        };

        Self {
            max_concurrent: parse_or(&lookup, "RENDER_MAX_CONCURRENT", defaults.max_concurrent)
                .max(1),
            queue_capacity: lookup("RENDER_QUEUE_CAPACITY")
                .and_then(|value| parse_value::<usize>("RENDER_QUEUE_CAPACITY", &value)),
            engine,
            output_dir: lookup("RENDER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            base_url: lookup("RENDER_BASE_URL").unwrap_or(defaults.base_url),
            media_extension: lookup("RENDER_MEDIA_EXTENSION").unwrap_or(defaults.media_extension),
            still_extension: lookup("RENDER_STILL_EXTENSION").unwrap_or(defaults.still_extension),
            heartbeat_interval: Duration::from_secs(
                parse_or(&lookup, "RENDER_HEARTBEAT_SECS", 30).max(1),
            ),
        }
    }

    /// Default output extension for a job kind.
    pub fn extension_for(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Media => &self.media_extension,
            JobKind::Still => &self.still_extension,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| parse_value(key, &value))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key = key, value = value, "Ignoring unparseable configuration value");
            None
        }
    }
}
