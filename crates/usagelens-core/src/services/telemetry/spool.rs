//! File-based telemetry spool.
//!
//! Collected events are staged as JSONL segments before they reach the
//! store:
//! - one segment per `append`, named `<yyyymmddThhmmss>-<uuid>.jsonl`
//! - atomic writes via temp file + rename
//! - each line is `{"attempts": n, "event": {...}}`
//! - events that fail `MAX_ATTEMPTS` times, and unparseable lines, are moved
//!   to `dead/`
//!
//! Segments are only ever created by `append` and rewritten by `peek`/`commit`;
//! callers serialise `peek`/`commit` pairs (see `Pipeline`).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::TelemetryEvent;
use crate::error::Result;

/// Failed ingestion attempts before an event is dead-lettered
pub const MAX_ATTEMPTS: u32 = 5;

const SEGMENT_EXT: &str = "jsonl";
const DEAD_DIR: &str = "dead";

/// On-disk line format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolLine {
    attempts: u32,
    event: TelemetryEvent,
}

/// A pending event together with its position in the spool
#[derive(Debug, Clone)]
pub struct SpoolEntry {
    pub segment: PathBuf,
    /// Zero-based line index within the segment
    pub line: usize,
    pub attempts: u32,
    pub event: TelemetryEvent,
}

/// Directory-backed durable staging queue
#[derive(Debug, Clone)]
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Open (creating if needed) a spool rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join(DEAD_DIR))?;
        log::debug!("[telemetry:spool] Opened spool at {:?}", dir);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dead_dir(&self) -> PathBuf {
        self.dir.join(DEAD_DIR)
    }

    /// Durably stage events as a new segment.
    ///
    /// Returns the segment path, or `None` when `events` is empty.
    pub fn append(&self, events: &[TelemetryEvent]) -> Result<Option<PathBuf>> {
        if events.is_empty() {
            return Ok(None);
        }

        let mut body = String::new();
        for event in events {
            let line = SpoolLine {
                attempts: 0,
                event: event.clone(),
            };
            body.push_str(&serde_json::to_string(&line)?);
            body.push('\n');
        }

        let name = format!(
            "{}-{}.{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4(),
            SEGMENT_EXT
        );
        let path = self.dir.join(name);
        write_atomic(&path, &body)?;

        log::debug!(
            "[telemetry:spool] Staged {} events in {:?}",
            events.len(),
            path.file_name()
        );
        Ok(Some(path))
    }

    /// Segment files in processing order
    pub fn segments(&self) -> Result<Vec<PathBuf>> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == SEGMENT_EXT) {
                segments.push(path);
            }
        }
        segments.sort();
        Ok(segments)
    }

    /// Number of events awaiting ingestion
    pub fn pending(&self) -> Result<usize> {
        let mut count = 0;
        for segment in self.segments()? {
            let content = std::fs::read_to_string(&segment)?;
            count += content.lines().filter(|l| !l.trim().is_empty()).count();
        }
        Ok(count)
    }

    /// Fingerprints of every pending event.
    ///
    /// Reads every segment, so callers hold the same lock as `peek`/`commit`.
    pub fn pending_fingerprints(&self) -> Result<HashSet<String>> {
        let mut fingerprints = HashSet::new();
        for segment in self.segments()? {
            for line in self.read_segment(&segment)? {
                fingerprints.insert(line.event.fingerprint());
            }
        }
        Ok(fingerprints)
    }

    /// Up to `limit` pending entries in segment order.
    ///
    /// Unparseable lines found on the way are moved to `dead/`.
    pub fn peek(&self, limit: usize) -> Result<Vec<SpoolEntry>> {
        let mut entries = Vec::new();
        if limit == 0 {
            return Ok(entries);
        }

        for segment in self.segments()? {
            let lines = self.read_segment(&segment)?;
            for (idx, line) in lines.into_iter().enumerate() {
                entries.push(SpoolEntry {
                    segment: segment.clone(),
                    line: idx,
                    attempts: line.attempts,
                    event: line.event,
                });
                if entries.len() >= limit {
                    return Ok(entries);
                }
            }
        }
        Ok(entries)
    }

    /// Record the outcome of processed entries.
    ///
    /// `succeeded[i]` belongs to `processed[i]`. Succeeded entries are
    /// removed; failed ones have `attempts` incremented or are dead-lettered
    /// at `MAX_ATTEMPTS`. Lines not listed are left untouched.
    pub fn commit(&self, processed: &[SpoolEntry], succeeded: &[bool]) -> Result<()> {
        let mut by_segment: BTreeMap<&Path, HashMap<usize, bool>> = BTreeMap::new();
        for (entry, ok) in processed.iter().zip(succeeded.iter()) {
            by_segment
                .entry(entry.segment.as_path())
                .or_default()
                .insert(entry.line, *ok);
        }

        for (segment, outcomes) in by_segment {
            let lines = self.read_segment(segment)?;
            let mut keep = Vec::with_capacity(lines.len());
            let mut dead = Vec::new();

            for (idx, mut line) in lines.into_iter().enumerate() {
                match outcomes.get(&idx) {
                    Some(true) => {}
                    Some(false) => {
                        line.attempts += 1;
                        if line.attempts >= MAX_ATTEMPTS {
                            dead.push(serde_json::to_string(&line)?);
                        } else {
                            keep.push(line);
                        }
                    }
                    None => keep.push(line),
                }
            }

            if !dead.is_empty() {
                log::warn!(
                    "[telemetry:spool] Dead-lettering {} events after {} attempts",
                    dead.len(),
                    MAX_ATTEMPTS
                );
                self.append_dead(segment, &dead)?;
            }
            self.rewrite_segment(segment, &keep)?;
        }
        Ok(())
    }

    /// Parse a segment, quarantining unparseable lines
    fn read_segment(&self, segment: &Path) -> Result<Vec<SpoolLine>> {
        let content = std::fs::read_to_string(segment)?;
        let mut lines = Vec::new();
        let mut corrupt = Vec::new();
        for raw in content.lines() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SpoolLine>(raw) {
                Ok(line) => lines.push(line),
                Err(e) => {
                    log::warn!("[telemetry:spool] Unparseable line in {:?}: {}", segment, e);
                    corrupt.push(raw.to_string());
                }
            }
        }

        if !corrupt.is_empty() {
            self.append_dead(segment, &corrupt)?;
            self.rewrite_segment(segment, &lines)?;
        }
        Ok(lines)
    }

    fn rewrite_segment(&self, segment: &Path, lines: &[SpoolLine]) -> Result<()> {
        if lines.is_empty() {
            std::fs::remove_file(segment)?;
            return Ok(());
        }
        let mut body = String::new();
        for line in lines {
            body.push_str(&serde_json::to_string(line)?);
            body.push('\n');
        }
        write_atomic(segment, &body)
    }

    fn append_dead(&self, segment: &Path, lines: &[String]) -> Result<()> {
        let name = segment
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "unknown.jsonl".into());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dead_dir().join(name))?;
        for line in lines {
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

/// Write via `<path>.tmp` + rename
fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
