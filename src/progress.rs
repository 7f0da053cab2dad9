//! Index build progress reporting.
//!
//! Embedding a large corpus is the slow part of a build, so the index
//! builder reports how many chunks have been embedded out of the total.
//! Progress is emitted on **stderr** so stdout stays reserved for answers.

use std::io::Write;

/// A single progress event for an index build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildProgressEvent {
    /// Documents are being read and chunked. Total unknown.
    Chunking { documents: u64 },
    /// `n` chunks embedded out of `total`.
    Embedding { n: u64, total: u64 },
    /// The index was written to storage.
    Persisted { chunks: u64 },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "build  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Chunking { documents } => {
                format!("build  chunking  {} documents\n", format_number(*documents))
            }
            BuildProgressEvent::Embedding { n, total } => format!(
                "build  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Persisted { chunks } => {
                format!("build  persisted  {} chunks\n", format_number(*chunks))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_to_json(event: &BuildProgressEvent) -> serde_json::Value {
    match event {
        BuildProgressEvent::Chunking { documents } => serde_json::json!({
            "event": "progress",
            "phase": "chunking",
            "documents": documents
        }),
        BuildProgressEvent::Embedding { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": n,
            "total": total
        }),
        BuildProgressEvent::Persisted { chunks } => serde_json::json!({
            "event": "progress",
            "phase": "persisted",
            "chunks": chunks
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected human, json, or off",
                other
            )),
        }
    }
}
