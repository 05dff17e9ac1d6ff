use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only session event log.
///
/// Every event carries `type`, `session_id`, `seq` and `ts`; the caller
/// payload is merged last and may override them. File sinks write one
/// compact JSON object per line, memory sinks keep the objects for
/// inspection.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    sink: EventSink,
    session_id: String,
    seq: AtomicU64,
}

#[derive(Debug)]
enum EventSink {
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<Value>>),
}

impl EventWriter {
    pub fn to_file(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_sink(
            EventSink::File {
                path: path.into(),
                lock: Mutex::new(()),
            },
            session_id.into(),
        )
    }

    pub fn in_memory(session_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Memory(Mutex::new(Vec::new())), session_id.into())
    }

    fn with_sink(sink: EventSink, session_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                sink,
                session_id,
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            EventSink::File { path, .. } => Some(path.as_path()),
            EventSink::Memory(_) => None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Sequence numbers are drawn under the sink lock, so concurrent
    /// emitters land in the log in `seq` order.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        match &self.inner.sink {
            EventSink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                let event = self.build(event_type, payload);
                let line = serde_json::to_string(&event)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                Ok(event)
            }
            EventSink::Memory(rows) => {
                let mut rows = rows
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
                let event = self.build(event_type, payload);
                rows.push(event.clone());
                Ok(event)
            }
        }
    }

    fn build(&self, event_type: &str, payload: EventPayload) -> Value {
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst);
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("seq".to_string(), Value::Number(seq.into()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);
        Value::Object(event)
    }

    /// Events held by a memory sink, in emission order. Empty for file sinks.
    pub fn recorded(&self) -> Vec<Value> {
        match &self.inner.sink {
            EventSink::Memory(rows) => rows.lock().map(|rows| rows.clone()).unwrap_or_default(),
            EventSink::File { .. } => Vec::new(),
        }
    }

    pub fn recorded_types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
