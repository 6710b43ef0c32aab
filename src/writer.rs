//! Dated log files with count-based retention.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use crate::batch::ExecutionContext;
use crate::error::{Error, Result};

/// Appends query log lines to `<dir>/db_query.<context>.<YYYY-MM-DD>.log`.
///
/// When a new dated file is about to be created, older files for the same
/// context are removed so that at most `max_files` remain afterwards.
/// `max_files == 0` keeps every file.
#[derive(Debug, Clone)]
pub struct RotatingFileWriter {
    log_dir: PathBuf,
    max_files: usize,
}

impl RotatingFileWriter {
    pub fn new(log_dir: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_files,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Path of the file for `context` on `date`.
    pub fn file_path(&self, context: ExecutionContext, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!(
            "db_query.{}.{}.log",
            context,
            date.format("%Y-%m-%d")
        ))
    }

    /// Append `lines` to today's file in a single write.
    ///
    /// Returns the path written to, or `None` when there was nothing to write.
    pub fn write(&self, lines: &[String], context: ExecutionContext) -> Result<Option<PathBuf>> {
        if lines.is_empty() {
            return Ok(None);
        }

        let path = self.file_path(context, Local::now().date_naive());
        let must_rotate = !path.exists();

        ensure_directory(&self.log_dir)?;

        if must_rotate {
            self.rotate(context);
        }

        let mut content = lines.join("\n");
        content.push('\n');
        append(&path, &content)?;

        Ok(Some(path))
    }

    /// Remove the oldest files for `context`, leaving room for one new file.
    ///
    /// Failures are logged and skipped: another process may be rotating the
    /// same directory.
    pub fn rotate(&self, context: ExecutionContext) -> usize {
        if self.max_files == 0 {
            return 0;
        }

        let mut files = match self.matching_files(context) {
            Ok(files) => files,
            Err(err) => {
                warn!(dir = %self.log_dir.display(), error = %err, "Couldn't list query logs for rotation");
                return 0;
            }
        };

        // Dates are zero padded, so newest first by name is newest first by day.
        files.sort_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for file in files.iter().skip(self.max_files - 1) {
            match fs::remove_file(file) {
                Ok(()) => removed += 1,
                Err(err) => {
                    debug!(file = %file.display(), error = %err, "Skipped removing rotated query log")
                }
            }
        }

        removed
    }

    fn matching_files(&self, context: ExecutionContext) -> std::io::Result<Vec<PathBuf>> {
        let prefix = format!("db_query.{context}.");
        let mut files = vec![];

        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            let dated = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".log"))
                .is_some_and(|date| !date.is_empty());

            if dated && entry.path().is_file() {
                files.push(entry.path());
            }
        }

        Ok(files)
    }
}

/// Create `dir` and any missing parents.
pub fn ensure_directory(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))
}

/// Append `content` to `path`, creating the file if needed.
pub fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::io(path, err))?;

    file.write_all(content.as_bytes())
        .map_err(|err| Error::io(path, err))
}
