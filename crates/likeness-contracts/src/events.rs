use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line, appends serialized by a mutex
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: Option<String>,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: Option<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> Option<&str> {
        self.inner.session_id.as_deref()
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "session_id".to_string(),
            self.inner
                .session_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

/// Reads back every well-formed event line; malformed lines are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let file = std::fs::File::open(path)?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&line) {
            events.push(value);
        }
    }
    Ok(events)
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, Some("session-1".to_string()));

        let mut payload = EventPayload::new();
        payload.insert("provider".to_string(), Value::String("stub".to_string()));
        let emitted = writer.emit("image.attempt.ok", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("image.attempt.ok".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-1".to_string()));
        assert_eq!(parsed["provider"], Value::String("stub".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn missing_session_is_null_and_payload_overrides() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), None);

        let plain = writer.emit("image.routing.policy", EventPayload::new())?;
        assert_eq!(plain["session_id"], Value::Null);

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("image.routing.policy", payload)?;
        assert_eq!(emitted["type"], Value::String("override".to_string()));
        Ok(())
    }

    #[test]
    fn read_events_returns_lines_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, None);

        writer.emit("one", EventPayload::new())?;
        writer.emit("two", EventPayload::new())?;
        fs::OpenOptions::new()
            .append(true)
            .open(&path)?
            .write_all(b"not json\n")?;

        let events = read_events(&path)?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], Value::String("one".to_string()));
        assert_eq!(events[1]["type"], Value::String("two".to_string()));
        Ok(())
    }
}
