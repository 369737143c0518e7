//! Claude Code session-log collector
//!
//! Emits one event per assistant message with usage. Streamed duplicates of
//! a response share `message.id` + `requestId`, which becomes the event's
//! message ID so they collapse to one fingerprint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::services::providers::claude_logs::{
    default_projects_root, find_jsonl_files, parse_session_file, ClaudeUsageLine,
};
use crate::services::telemetry::{CollectOptions, Collector, TelemetryEvent};

/// Source system and provider stamped on every event
pub const SYSTEM: &str = "claude_code";

/// `CollectOptions` key listing projects roots
pub const PROJECTS_OPTION: &str = "claude_code.projects";

pub struct ClaudeCodeCollector;

impl ClaudeCodeCollector {
    pub fn new() -> Self {
        Self
    }

    fn roots(options: &CollectOptions) -> Vec<PathBuf> {
        let configured = options.paths(PROJECTS_OPTION);
        if configured.is_empty() {
            vec![default_projects_root()]
        } else {
            configured.to_vec()
        }
    }
}

impl Default for ClaudeCodeCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Last path segment of the working directory, used as the client label
fn client_label(cwd: &str) -> Option<String> {
    Path::new(cwd)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn to_event(line: ClaudeUsageLine) -> TelemetryEvent {
    let occurred_at = line.timestamp.unwrap_or_else(Utc::now);
    let mut event = TelemetryEvent::new(SYSTEM, SYSTEM, &line.session_id, line.sequence, occurred_at)
        .with_model(&line.model)
        .with_tokens(
            line.usage.input_tokens as f64,
            line.usage.output_tokens as f64,
        )
        .with_cost(line.cost_usd());

    if let Some(key) = line.dedup_key() {
        event = event.with_message_id(key);
    }
    if let Some(client) = line.cwd.as_deref().and_then(client_label) {
        event = event.with_client(client);
    }

    event.cached_tokens = Some(line.usage.cached_tokens() as f64);
    event.total_tokens = Some(line.usage.total_tokens() as f64);
    event.requests = Some(1.0);
    event
}

fn scan_roots(roots: &[PathBuf], ctx: &CancellationToken) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    for root in roots {
        if !root.exists() {
            log::debug!("[telemetry:claude_code] Skipping missing root {:?}", root);
            continue;
        }
        for file in find_jsonl_files(root) {
            if ctx.is_cancelled() {
                return events;
            }
            match parse_session_file(&file) {
                Ok(lines) => events.extend(lines.into_iter().map(to_event)),
                Err(e) => log::warn!("[telemetry:claude_code] Cannot read {:?}: {}", file, e),
            }
        }
    }
    events
}

#[async_trait]
impl Collector for ClaudeCodeCollector {
    fn system(&self) -> &str {
        SYSTEM
    }

    async fn collect(
        &self,
        ctx: &CancellationToken,
        options: &CollectOptions,
    ) -> Result<Vec<TelemetryEvent>> {
        let roots = Self::roots(options);
        let token = ctx.clone();

        let events = tokio::task::spawn_blocking(move || scan_roots(&roots, &token))
            .await
            .map_err(|e| Error::internal(format!("claude_code scan task failed: {}", e)))?;

        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        log::debug!("[telemetry:claude_code] Collected {} events", events.len());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const LINE_A: &str = r#"{"type":"assistant","timestamp":"2026-03-01T10:00:00Z","requestId":"req_1","cwd":"/home/dev/webapp","message":{"id":"msg_1","model":"claude-opus-4-6","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":20,"cache_read_input_tokens":30}}}"#;
    const LINE_B: &str = r#"{"type":"assistant","timestamp":"2026-03-01T10:05:00Z","requestId":"req_2","message":{"id":"msg_2","model":"claude-sonnet-4-5","usage":{"input_tokens":10,"output_tokens":5}}}"#;

    fn write_project(root: &Path, lines: &[&str]) {
        let project = root.join("-home-dev-webapp");
        std::fs::create_dir_all(&project).unwrap();
        let mut file = std::fs::File::create(project.join("session-1.jsonl")).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[tokio::test]
    async fn test_collect_emits_one_event_per_message() {
        let dir = TempDir::new().unwrap();
        write_project(dir.path(), &[LINE_A, LINE_A, LINE_B]);

        let options = CollectOptions::new().with_paths(PROJECTS_OPTION, [dir.path()]);
        let events = ClaudeCodeCollector::new()
            .collect(&CancellationToken::new(), &options)
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        let first = &events[0];
        assert_eq!(first.source_system, "claude_code");
        assert_eq!(first.provider_id, "claude_code");
        assert_eq!(first.session_id, "session-1");
        assert_eq!(first.message_id.as_deref(), Some("msg_1:req_1"));
        assert_eq!(first.client.as_deref(), Some("webapp"));
        assert_eq!(first.cached_tokens, Some(50.0));
        assert_eq!(first.total_tokens, Some(200.0));
        assert_eq!(first.requests, Some(1.0));
        assert!(first.cost_usd.unwrap() > 0.0);
        assert_eq!(events[1].client, None);
    }

    #[tokio::test]
    async fn test_recollection_keeps_fingerprints() {
        let dir = TempDir::new().unwrap();
        write_project(dir.path(), &[LINE_A]);
        let options = CollectOptions::new().with_paths(PROJECTS_OPTION, [dir.path()]);
        let collector = ClaudeCodeCollector::new();
        let token = CancellationToken::new();

        let first = collector.collect(&token, &options).await.unwrap();
        write_project(dir.path(), &[r#"{"type":"user"}"#, LINE_A]);
        let second = collector.collect(&token, &options).await.unwrap();

        assert_eq!(first[0].fingerprint(), second[0].fingerprint());
        assert_ne!(first[0].sequence, second[0].sequence);
    }

    #[tokio::test]
    async fn test_missing_root_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let options = CollectOptions::new().with_paths(PROJECTS_OPTION, [dir.path().join("none")]);
        let events = ClaudeCodeCollector::new()
            .collect(&CancellationToken::new(), &options)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_collect() {
        let dir = TempDir::new().unwrap();
        write_project(dir.path(), &[LINE_A]);
        let options = CollectOptions::new().with_paths(PROJECTS_OPTION, [dir.path()]);
        let token = CancellationToken::new();
        token.cancel();

        let err = ClaudeCodeCollector::new()
            .collect(&token, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
