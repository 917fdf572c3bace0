// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Append-only `RunRecord` history log: `history/runs.log`,
//! newline-delimited, bounded by count or age at eviction time.
//! Eviction by count or age is a background concern, not a core invariant;
//! this module only appends and reads.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::model::RunRecord;

pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HistoryLog { path: path.into() }
    }

    pub async fn append(&self, record: &RunRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        let mut line = serde_json::to_vec(record).expect("RunRecord is always serializable");
        line.push(b'\n');
        file.write_all(&line).await
    }

    pub async fn read_all(&self) -> std::io::Result<Vec<RunRecord>> {
        let Ok(file) = tokio::fs::File::open(&self.path).await else {
            return Ok(vec![]);
        };
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if let Ok(record) = serde_json::from_str(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

pub fn default_history_path(user_data_root: &Path) -> PathBuf {
    user_data_root.join("history").join("runs.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    fn record(name: &str) -> RunRecord {
        RunRecord {
            task_name: name.to_string(),
            start_wallclock_ms: 0,
            duration_ms: 10,
            exit_code: Some(0),
            status: TaskStatus::Success,
            fingerprint: None,
            captured_output_ref: None,
            retry_attempts: 0,
        }
    }

    #[tokio::test]
    async fn appended_records_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("runs.log"));
        log.append(&record("a")).await.unwrap();
        log.append(&record("b")).await.unwrap();
        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_name, "a");
        assert_eq!(records[1].task_name, "b");
    }

    #[tokio::test]
    async fn reading_a_missing_log_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = HistoryLog::new(dir.path().join("missing.log"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
