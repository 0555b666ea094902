//! Output file locations for finished renders.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps a job to where its output is written and served from.
pub trait OutputResolver: Send + Sync {
    /// Storage path for a job's output. Ensures the parent directory exists.
    fn resolve_path(&self, job_id: &str, extension: &str) -> io::Result<PathBuf>;

    /// Public URL for an output path.
    fn resolve_url(&self, path: &Path) -> String;
}

/// Outputs stored under a local directory and served below `<base_url>/outputs/`.
#[derive(Debug, Clone)]
pub struct LocalOutputs {
    output_dir: PathBuf,
    base_url: String,
}

impl LocalOutputs {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl OutputResolver for LocalOutputs {
    fn resolve_path(&self, job_id: &str, extension: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(self.output_dir.join(format!("{job_id}.{extension}")))
    }

    fn resolve_url(&self, path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/outputs/{}", self.base_url, file_name)
    }
}
