//! Ingestion progress reporting.
//!
//! Reports observable progress while the pipeline loads, uploads, waits
//! for processing and builds the context cache, so a user running
//! `cchat ingest` sees which stage a slow run is stuck in. Human and JSON
//! progress go to **stderr** so stdout remains parseable for scripts; the
//! server uses [`TracingProgress`] instead.

use std::io::Write;

use crate::models::FileState;

/// A single progress event for one ingestion run.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestEvent {
    /// Reading the local file or downloading the URL.
    Loading { source: String },
    /// Document bytes are in memory.
    Loaded { bytes: u64, mime_type: String },
    /// A live cache for identical content was found; nothing is uploaded.
    Reused { cache: String },
    /// Upload accepted; the provider assigned `name`.
    Uploaded { name: String },
    /// One status query returned `state`.
    Polled {
        name: String,
        attempt: u32,
        state: FileState,
    },
    /// Cache creation request sent.
    Caching { model: String, ttl_secs: u64 },
    /// Pipeline finished with cache `cache`.
    Ready { cache: String, file_uri: String },
}

/// Reports ingestion progress.
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress on stderr: "ingest  polling files/abc  #3 PROCESSING".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Loading { source } => format!("ingest  loading {}\n", source),
            IngestEvent::Loaded { bytes, mime_type } => {
                format!("ingest  loaded {} bytes ({})\n", format_number(*bytes), mime_type)
            }
            IngestEvent::Reused { cache } => format!("ingest  reusing live cache {}\n", cache),
            IngestEvent::Uploaded { name } => format!("ingest  uploaded as {}\n", name),
            IngestEvent::Polled {
                name,
                attempt,
                state,
            } => format!("ingest  polling {}  #{} {:?}\n", name, attempt, state),
            IngestEvent::Caching { model, ttl_secs } => {
                format!("ingest  creating cache on {} (ttl {}s)\n", model, ttl_secs)
            }
            IngestEvent::Ready { cache, .. } => format!("ingest  ready: {}\n", cache),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &IngestEvent) -> serde_json::Value {
    match event {
        IngestEvent::Loading { source } => serde_json::json!({
            "event": "progress", "phase": "loading", "source": source
        }),
        IngestEvent::Loaded { bytes, mime_type } => serde_json::json!({
            "event": "progress", "phase": "loaded", "bytes": bytes, "mime_type": mime_type
        }),
        IngestEvent::Reused { cache } => serde_json::json!({
            "event": "progress", "phase": "reused", "cache": cache
        }),
        IngestEvent::Uploaded { name } => serde_json::json!({
            "event": "progress", "phase": "uploaded", "name": name
        }),
        IngestEvent::Polled {
            name,
            attempt,
            state,
        } => serde_json::json!({
            "event": "progress", "phase": "polling", "name": name,
            "attempt": attempt, "state": state
        }),
        IngestEvent::Caching { model, ttl_secs } => serde_json::json!({
            "event": "progress", "phase": "caching", "model": model, "ttl_secs": ttl_secs
        }),
        IngestEvent::Ready { cache, file_uri } => serde_json::json!({
            "event": "progress", "phase": "ready", "cache": cache, "file_uri": file_uri
        }),
    }
}

/// Forwards events to `tracing` at info level.
pub struct TracingProgress;

impl IngestProgressReporter for TracingProgress {
    fn report(&self, event: IngestEvent) {
        tracing::info!(progress = %event_json(&event), "ingest");
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller can pass it to ingest.
    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn polled_event_json_uses_provider_state_names() {
        let v = event_json(&IngestEvent::Polled {
            name: "files/abc".into(),
            attempt: 2,
            state: FileState::Processing,
        });
        assert_eq!(v["phase"], "polling");
        assert_eq!(v["state"], "PROCESSING");
        assert_eq!(v["attempt"], 2);
    }
}
