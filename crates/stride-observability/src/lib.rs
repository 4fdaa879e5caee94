//! Observability for Stride processes.
//!
//! Two concerns live here: structured pipeline events (one vocabulary for
//! every stage, emitted on the `stride.obs` target so operators can filter
//! them out of the general log stream), and process logging setup with
//! daily-rolling JSONL files and retention pruning.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Worker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Worker => "worker",
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline events
// ---------------------------------------------------------------------------

/// Which part of the pipeline an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingress,
    Orchestrator,
    Enricher,
    Destination,
    Resume,
    Watchdog,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingress => "ingress",
            Stage::Orchestrator => "orchestrator",
            Stage::Enricher => "enricher",
            Stage::Destination => "destination",
            Stage::Resume => "resume",
            Stage::Watchdog => "watchdog",
        }
    }
}

/// One structured event in the pipeline vocabulary. Everything optional is
/// filled per stage: ingress knows the source, the chain runner knows the
/// enricher, uploaders know the destination.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent<'a> {
    pub stage: Stage,
    pub event: &'a str,
    pub user_id: Option<&'a str>,
    pub pipeline_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub activity_id: Option<&'a str>,
    pub source: Option<&'a str>,
    pub destination: Option<&'a str>,
    pub enricher: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

impl<'a> PipelineEvent<'a> {
    pub fn new(stage: Stage, event: &'a str) -> Self {
        Self {
            stage,
            event,
            user_id: None,
            pipeline_id: None,
            run_id: None,
            activity_id: None,
            source: None,
            destination: None,
            enricher: None,
            status: None,
            detail: None,
        }
    }
}

/// Emit a pipeline event on the `stride.obs` target.
pub fn emit_event(level: Level, event: PipelineEvent<'_>) {
    macro_rules! log_at {
        ($m:ident) => {
            tracing::$m!(
                target: "stride.obs",
                stage = event.stage.as_str(),
                event = event.event,
                user_id = event.user_id.unwrap_or(""),
                pipeline_id = event.pipeline_id.unwrap_or(""),
                run_id = event.run_id.unwrap_or(""),
                activity_id = event.activity_id.unwrap_or(""),
                source = event.source.unwrap_or(""),
                destination = event.destination.unwrap_or(""),
                enricher = event.enricher.unwrap_or(""),
                status = event.status.unwrap_or(""),
                detail = event.detail.unwrap_or(""),
                "pipeline_event"
            )
        };
    }
    match level {
        Level::ERROR => log_at!(error),
        Level::WARN => log_at!(warn),
        Level::DEBUG => log_at!(debug),
        Level::TRACE => log_at!(trace),
        _ => log_at!(info),
    }
}

/// Mask a credential for logging, keeping a short recognizable tail.
/// Webhook secrets and bearer tokens pass through ingress logs; they must
/// never land in the JSONL files whole.
pub fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = trimmed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail} ({} chars)", trimmed.chars().count())
}

// ---------------------------------------------------------------------------
// Process logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub process: ProcessKind,
    pub logs_dir: PathBuf,
    pub retention_days: u64,
}

impl LogSettings {
    /// Conventional layout: log files live under `<state_dir>/logs`.
    pub fn for_state_dir(process: ProcessKind, state_dir: &Path, retention_days: u64) -> Self {
        Self {
            process,
            logs_dir: state_dir.join("logs"),
            retention_days,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingInitInfo {
    pub prefix: String,
    pub logs_dir: String,
    pub pruned_files: usize,
    pub initialized_at: DateTime<Utc>,
}

/// Install the process-wide subscriber: compact console output plus a
/// daily-rolling JSONL file, with files past the retention window pruned on
/// startup. The returned guard must be held for the process lifetime or
/// buffered file output is lost.
pub fn init_logging(settings: &LogSettings) -> anyhow::Result<(WorkerGuard, LoggingInitInfo)> {
    let prefix = format!("stride.{}", settings.process.as_str());
    fs::create_dir_all(&settings.logs_dir)?;
    let pruned = prune_old_logs(&settings.logs_dir, &prefix, settings.retention_days)?;

    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(prefix.as_str())
        .filename_suffix("jsonl")
        .build(&settings.logs_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        logs_dir: settings.logs_dir.display().to_string(),
        prefix,
        pruned_files: pruned,
        initialized_at: Utc::now(),
    };
    Ok((guard, info))
}

/// Delete rolled log files older than the retention window. Returns how
/// many were removed.
fn prune_old_logs(logs_dir: &Path, prefix: &str, retention_days: u64) -> anyhow::Result<usize> {
    let cutoff = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(retention_days))
        .unwrap_or(NaiveDate::MIN);

    let mut removed = 0;
    for entry in fs::read_dir(logs_dir)? {
        let Ok(entry) = entry else { continue };
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(date) = rolled_file_date(name, prefix) else {
            continue;
        };
        if date < cutoff && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// The date stamped into a rolled file name (`<prefix>.YYYY-MM-DD.jsonl`),
/// if the name matches the pattern.
fn rolled_file_date(name: &str, prefix: &str) -> Option<NaiveDate> {
    let stamp = name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolled_file_dates_parse_only_matching_names() {
        let date = rolled_file_date("stride.engine.2026-02-08.jsonl", "stride.engine").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 2, 8).unwrap());

        assert!(rolled_file_date("stride.worker.2026-02-08.jsonl", "stride.engine").is_none());
        assert!(rolled_file_date("stride.engine.jsonl", "stride.engine").is_none());
        assert!(rolled_file_date("stride.engine.not-a-date.jsonl", "stride.engine").is_none());
        assert!(rolled_file_date("stride.engine.2026-02-08.log", "stride.engine").is_none());
    }

    #[test]
    fn prune_removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("stride.engine.2020-01-01.jsonl");
        let recent = dir
            .path()
            .join(format!("stride.engine.{}.jsonl", Utc::now().date_naive()));
        let unrelated = dir.path().join("notes.txt");
        for path in [&old, &recent, &unrelated] {
            fs::write(path, b"{}").unwrap();
        }

        let removed = prune_old_logs(dir.path(), "stride.engine", 14).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn secrets_are_masked_but_recognizable() {
        let masked = redact_secret("whsec_4f9a81c2d7");
        assert!(!masked.contains("whsec_4f9a"));
        assert!(masked.contains("c2d7"));
        assert!(masked.contains("16 chars"));
        assert_eq!(redact_secret("abc"), "****");
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::Ingress.as_str(), "ingress");
        assert_eq!(Stage::Destination.as_str(), "destination");
        assert_eq!(Stage::Watchdog.as_str(), "watchdog");
    }

    #[test]
    fn event_starts_empty_apart_from_identity() {
        let event = PipelineEvent::new(Stage::Orchestrator, "run.created");
        assert_eq!(event.event, "run.created");
        assert!(event.run_id.is_none());
        assert!(event.destination.is_none());
        // Emitting without a subscriber installed is a no-op, not a panic.
        emit_event(Level::INFO, event);
    }
}
