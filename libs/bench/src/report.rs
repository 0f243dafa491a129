//! Report directory layout.
//!
//! ```text
//! <root>/additional_data/<provider>/recall_data.jsonl   appended by every run
//! <root>/additional_data/<provider>/0000/open.json      git hash, start time
//! <root>/additional_data/<provider>/0000/run.json       per-run summaries
//! <root>/additional_data/<provider>/0000/close.json     end time
//! <root>/additional_data/<provider>/0001/...
//! ```
//!
//! Run directories are numbered with the next free 4-digit hex number. Files
//! inside a run are never overwritten.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vdbench_core::build_info;

use crate::driver::RESULT_LOG_FILE;

pub const DEFAULT_REPORTS_DIR: &str = "./reports";
const ADDITIONAL_DATA_DIR: &str = "additional_data";
const OPEN_FILE: &str = "open.json";
const CLOSE_FILE: &str = "close.json";
const MAX_RUN_NUMBER: u32 = 0xffff;

/// Written when a run directory is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRecord {
    pub git_hash: String,
    pub build_timestamp: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// Written when a run directory is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRecord {
    pub finished_at: DateTime<Utc>,
    pub success: bool,
}

/// Root of the reports tree.
#[derive(Debug, Clone)]
pub struct ReportLayout {
    root: PathBuf,
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self::new(DEFAULT_REPORTS_DIR)
    }
}

impl ReportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provider_dir(&self, provider: &str) -> PathBuf {
        self.root.join(ADDITIONAL_DATA_DIR).join(provider)
    }

    /// Shared result log of a provider.
    pub fn result_log(&self, provider: &str) -> PathBuf {
        self.provider_dir(provider).join(RESULT_LOG_FILE)
    }

    /// Create the next numbered run directory and write its `open.json`.
    pub fn open_run(&self, provider: &str, command: &str) -> Result<RunDir> {
        let parent = self.provider_dir(provider);
        fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let mut number = next_run_number(&parent)?;
        let path = loop {
            if number > MAX_RUN_NUMBER {
                bail!("No free run number left in {}", parent.display());
            }
            let candidate = parent.join(format!("{:04x}", number));
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                // taken by a concurrent run
                Err(e) if e.kind() == ErrorKind::AlreadyExists => number += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", candidate.display()))
                }
            }
        };

        let run = RunDir { path, number };
        run.write_json(
            OPEN_FILE,
            &OpenRecord {
                git_hash: build_info::GIT_HASH.to_string(),
                build_timestamp: build_info::BUILD_TIMESTAMP.to_string(),
                command: command.to_string(),
                started_at: Utc::now(),
            },
        )?;
        tracing::info!(run = %run.path.display(), "Opened run directory");
        Ok(run)
    }
}

/// Highest existing run number plus one.
fn next_run_number(dir: &Path) -> Result<u32> {
    let mut next = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.len() != 4 {
            continue;
        }
        if let Ok(number) = u32::from_str_radix(name, 16) {
            next = next.max(number + 1);
        }
    }
    Ok(next)
}

/// One numbered run directory.
#[derive(Debug)]
pub struct RunDir {
    path: PathBuf,
    number: u32,
}

impl RunDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Write `value` as pretty JSON to a new file `name` in the run directory.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut json = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", name))?;
        json.push(b'\n');
        file.write_all(&json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Write `close.json`.
    pub fn close(self, success: bool) -> Result<()> {
        self.write_json(
            CLOSE_FILE,
            &CloseRecord {
                finished_at: Utc::now(),
                success,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_runs_are_numbered_in_hex() {
        let dir = TempDir::new().unwrap();
        let layout = ReportLayout::new(dir.path());
        let provider_dir = layout.provider_dir("qdrant");
        fs::create_dir_all(provider_dir.join("000f")).unwrap();
        fs::create_dir_all(provider_dir.join("notes")).unwrap();

        let run = layout.open_run("qdrant", "query").unwrap();
        assert_eq!(run.number(), 0x10);
        assert!(run.path().ends_with("additional_data/qdrant/0010"));

        let open: OpenRecord =
            serde_json::from_str(&fs::read_to_string(run.path().join(OPEN_FILE)).unwrap()).unwrap();
        assert_eq!(open.command, "query");
        assert_eq!(open.git_hash, build_info::GIT_HASH);

        let path = run.path().to_path_buf();
        run.close(true).unwrap();
        assert!(path.join(CLOSE_FILE).exists());
    }

    #[test]
    fn test_first_run_and_log_location() {
        let dir = TempDir::new().unwrap();
        let layout = ReportLayout::new(dir.path());
        let run = layout.open_run("vespa", "sweep").unwrap();
        assert_eq!(run.number(), 0);
        assert_eq!(
            layout.result_log("vespa"),
            dir.path().join("additional_data/vespa/recall_data.jsonl")
        );
    }

    #[test]
    fn test_run_files_are_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let run = ReportLayout::new(dir.path()).open_run("exact", "query").unwrap();
        run.write_json("run.json", &1).unwrap();
        assert!(run.write_json("run.json", &2).is_err());
    }
}
