use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tokio::io::AsyncWriteExt;

use crate::errors::SteadyhandResult;

/// One pointer attempt and what the verifier said about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Image-space position the attempt targeted.
    pub position: (f64, f64),
    pub command: Option<String>,
    pub confidence: u8,
    pub info: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AttemptRecord {
    pub fn new(position: (f64, f64), command: Option<String>, confidence: u8, info: impl Into<String>) -> Self {
        Self {
            position,
            command,
            confidence,
            info: info.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Append-only attempt history for the task currently in flight, optionally
/// mirrored to a JSONL journal.
pub struct AttemptLog {
    records: Mutex<Vec<AttemptRecord>>,
    journal: Option<PathBuf>,
}

impl AttemptLog {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Journal to `attempts_<uuid>.jsonl` under the platform data dir.
    pub fn with_session_journal() -> Self {
        let session_id = uuid::Uuid::new_v4();
        let path = sessions_dir().join(format!("attempts_{session_id}.jsonl"));
        tracing::info!(path = %path.display(), "attempt journal enabled");
        Self::with_journal_at(path)
    }

    pub fn with_journal_at(path: PathBuf) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            journal: Some(path),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AttemptRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn push(&self, record: AttemptRecord) {
        if let Err(e) = self.append_to_journal(&record).await {
            tracing::warn!(error = %e, "failed to journal attempt");
        }
        self.lock().push(record);
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything; the journal keeps its lines.
    pub fn clear(&self) {
        self.lock().clear();
    }

    async fn append_to_journal(&self, record: &AttemptRecord) -> SteadyhandResult<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        tracing::trace!(path = %path.display(), "attempt journaled");
        Ok(())
    }
}

impl Default for AttemptLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// `<data_local_dir>/steadyhand/sessions`, falling back to the working directory.
fn sessions_dir() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("steadyhand").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_and_clear() {
        let log = AttemptLog::in_memory();
        log.push(AttemptRecord::new((1.0, 2.0), None, 10, "missed")).await;
        log.push(AttemptRecord::new((3.0, 4.0), Some("move to (3, 4)".into()), 95, "on target"))
            .await;
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[1].confidence, 95);
        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn journal_gets_one_line_per_attempt() {
        let path = std::env::temp_dir().join(format!("steadyhand_test_{}.jsonl", uuid::Uuid::new_v4()));
        let log = AttemptLog::with_journal_at(path.clone());
        log.push(AttemptRecord::new((1.0, 2.0), None, 0, "no reply")).await;
        log.push(AttemptRecord::new((5.0, 6.0), None, 80, "close")).await;
        log.clear();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: AttemptRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.info, "close");
        let _ = std::fs::remove_file(path);
    }
}
