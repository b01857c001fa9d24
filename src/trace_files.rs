//! On-disk trace files: one per payload direction plus one for control lines

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::File;

const FILENAME_TEMPLATE: &str = "mapipe-trace-<date>-<pid>-<direction>";
const DATE_FORMAT: &str = "%Y-%m-%d-%H:%M:%SZ";

/// The three files of one traced run
#[derive(Debug)]
pub struct TraceFiles {
    pub a2b: File,
    pub b2a: File,
    pub ctl: File,
}

impl TraceFiles {
    /// Create `dir` if needed and open a fresh set of trace files in it.
    ///
    /// Files opened before a failure are closed again when dropped.
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create trace directory {}", dir.display()))?;

        let [a2b, b2a, ctl] = trace_filenames(Utc::now(), std::process::id());
        let a2b = create_file(dir.join(a2b)).await?;
        let b2a = create_file(dir.join(b2a)).await?;
        let ctl = create_file(dir.join(ctl)).await?;

        Ok(Self { a2b, b2a, ctl })
    }
}

/// File names for the a2b, b2a and ctl traces, in that order
pub fn trace_filenames(now: DateTime<Utc>, pid: u32) -> [String; 3] {
    let base = FILENAME_TEMPLATE
        .replace("<date>", &now.format(DATE_FORMAT).to_string())
        .replace("<pid>", &pid.to_string());

    ["a2b", "b2a", "ctl"].map(|direction| base.replace("<direction>", direction))
}

async fn create_file(path: PathBuf) -> Result<File> {
    File::create(&path)
        .await
        .with_context(|| format!("Failed to create trace file {}", path.display()))
}
