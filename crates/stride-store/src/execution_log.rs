use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Started,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Webhook,
    Poll,
    MobileSync,
    BusMessage,
    Resume,
    Sweeper,
    Watchdog,
}

/// One row per handler invocation. The primary operator-visible trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub service: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_execution_id: Option<String>,
    pub trigger: TriggerType,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_snippet: Option<String>,
}

impl ExecutionRecord {
    pub fn start(service: impl Into<String>, trigger: TriggerType) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            service: service.into(),
            status: ExecutionStatus::Started,
            user_id: None,
            pipeline_execution_id: None,
            trigger,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            input_snippet: None,
            output_snippet: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_execution(mut self, pipeline_execution_id: impl Into<String>) -> Self {
        self.pipeline_execution_id = Some(pipeline_execution_id.into());
        self
    }

    pub fn with_input(mut self, snippet: impl Into<String>) -> Self {
        self.input_snippet = Some(truncate(snippet.into(), 512));
        self
    }

    pub fn succeed(mut self, output: Option<String>) -> Self {
        self.status = ExecutionStatus::Success;
        self.ended_at = Some(Utc::now());
        self.output_snippet = output.map(|s| truncate(s, 512));
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = ExecutionStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
        self
    }
}

fn truncate(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

/// Append-only execution log, one JSON object per line.
pub struct ExecutionLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl ExecutionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &ExecutionRecord) -> StoreResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let _guard = self.writer.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// All rows, oldest first. For operator tooling and tests.
    pub async fn read_all(&self) -> StoreResult<Vec<ExecutionRecord>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_rows_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ExecutionLog::new(dir.path().join("executions.jsonl"));

        let first = ExecutionRecord::start("ingress.strava", TriggerType::Webhook)
            .with_user("u1")
            .succeed(Some("published".to_string()));
        let second = ExecutionRecord::start("orchestrator", TriggerType::BusMessage)
            .with_execution("exec-1")
            .fail("store unavailable");

        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let rows = log.read_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].service, "ingress.strava");
        assert_eq!(rows[0].status, ExecutionStatus::Success);
        assert_eq!(rows[1].status, ExecutionStatus::Failed);
        assert_eq!(rows[1].error.as_deref(), Some("store unavailable"));
    }

    #[test]
    fn snippets_are_truncated() {
        let record = ExecutionRecord::start("x", TriggerType::Poll).with_input("a".repeat(2000));
        assert!(record.input_snippet.unwrap().len() < 600);
    }
}
