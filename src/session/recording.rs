use super::*;
use crate::error::RecordError;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw chunk events.
    pub keep_raw_chunks: bool,
    /// Keep state-changed events.
    pub keep_state_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_state_changed: true,
        }
    }
}

/// Events of a console run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    LinesEnumerated {
        device: String,
        count: usize,
    },
    LineStarted {
        line: u32,
        interface: String,
        command: String,
    },
    StateChanged {
        line: u32,
        state: String,
    },
    /// Something was written to the line. Hidden input is never stored.
    InputSent {
        line: u32,
        input: String,
        #[serde(default)]
        hidden: bool,
    },
    RawChunk {
        line: u32,
        data: String,
    },
    LineClosed {
        line: u32,
        reason: String,
        retries: u32,
    },
}

impl SessionEvent {
    /// Console line this event belongs to, if any.
    pub fn line(&self) -> Option<u32> {
        match self {
            SessionEvent::LinesEnumerated { .. } => None,
            SessionEvent::LineStarted { line, .. }
            | SessionEvent::StateChanged { line, .. }
            | SessionEvent::InputSent { line, .. }
            | SessionEvent::RawChunk { line, .. }
            | SessionEvent::LineClosed { line, .. } => Some(*line),
        }
    }
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), RecordError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| RecordError::Lock(e.to_string()))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw line data when enabled.
    pub fn record_raw_chunk(&self, line: u32, data: String) -> Result<(), RecordError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { line, data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, RecordError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| RecordError::Lock(e.to_string()))?;
        Ok(guard.clone())
    }

    /// Events recorded for one console line, in order.
    pub fn events_for_line(&self, line: u32) -> Result<Vec<SessionEvent>, RecordError> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| event.line() == Some(line))
            .collect())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), RecordError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| RecordError::Lock(e.to_string()))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, RecordError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            lines.push(serde_json::to_string(&entry).map_err(RecordError::Encode)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, RecordError> {
        let mut parsed = Vec::new();
        for (idx, line) in jsonl.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|source| RecordError::Decode {
                    line: idx + 1,
                    source,
                })?;
            parsed.push(entry);
        }

        Ok(Self {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Sorts events by timestamp (stable for equal stamps) and drops the
    /// noisy kinds the options exclude.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, RecordError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut entries = recorder.entries()?;
        entries.sort_by_key(|entry| entry.ts_ms);

        let filtered = entries
            .into_iter()
            .filter(|entry| match &entry.event {
                SessionEvent::RawChunk { .. } => options.keep_raw_chunks,
                SessionEvent::StateChanged { .. } => options.keep_state_changed,
                _ => true,
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
