use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::JobIdentity;
use crate::jobs::DegradeReason;

pub type EventPayload = Map<String, Value>;

/// Everything the worker reports to its event log. The variant name is the
/// line's `type`; the fields are merged alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    WorkerStarted {
        store: String,
        generator: String,
        inbox: String,
        draft: String,
        archive: String,
        variants: u32,
        enhancement: bool,
    },
    PassStarted {
        pass: u64,
    },
    PassFailed {
        pass: u64,
        error: String,
    },
    Cooldown {
        seconds: u64,
    },
    JobStarted {
        file_id: String,
        file_name: String,
        identity: JobIdentity,
    },
    ReferenceMissing {
        file_name: String,
        searched: String,
    },
    StageFinished {
        stage: String,
        variant: Option<u32>,
        output: String,
    },
    /// The empty-room stage failed; the source stays in the inbox.
    JobAbandoned {
        file_name: String,
        reason: String,
    },
    VariantSkipped {
        variant: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        reason: String,
    },
    EnhancementDegraded {
        variant: u32,
        reason: DegradeReason,
    },
    VariantUploaded {
        variant: u32,
        name: String,
        file_id: String,
        enhanced: bool,
    },
    JobArchived {
        file_id: String,
        file_name: String,
    },
    JobFailed {
        file_id: String,
        file_name: String,
        error: String,
    },
}

/// Append-only writer for the worker's `events.jsonl`.
///
/// - default fields are `type`, `worker_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    worker_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, worker_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                worker_id: worker_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn record(&self, event: &WorkerEvent) -> anyhow::Result<Value> {
        let Value::Object(mut payload) = serde_json::to_value(event)? else {
            bail!("worker event did not serialize to an object");
        };
        let Some(Value::String(event_type)) = payload.remove("type") else {
            bail!("worker event carries no type tag");
        };
        self.emit(&event_type, payload)
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "worker_id".to_string(),
            Value::String(self.inner.worker_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
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

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    #[test]
    fn recorded_event_is_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "worker-1");

        let emitted = writer.record(&WorkerEvent::JobStarted {
            file_id: "f-1".to_string(),
            file_name: "acme_bedroom_modern_2_x.jpg".to_string(),
            identity: JobIdentity::from_file_name("acme_bedroom_modern_2_x.jpg"),
        })?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 1);
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("job_started"));
        assert_eq!(parsed["worker_id"], json!("worker-1"));
        assert_eq!(parsed["file_name"], json!("acme_bedroom_modern_2_x.jpg"));
        assert_eq!(parsed["identity"]["variant"], json!("2"));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn degrade_reasons_and_optional_fields_serialize_flat() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "worker-1");

        let degraded = writer.record(&WorkerEvent::EnhancementDegraded {
            variant: 3,
            reason: DegradeReason::TimedOut(60),
        })?;
        assert_eq!(degraded["type"], json!("enhancement_degraded"));
        assert_eq!(degraded["reason"], json!({"kind": "timed_out", "detail": 60}));

        let skipped = writer.record(&WorkerEvent::VariantSkipped {
            variant: 1,
            name: None,
            reason: "no image part".to_string(),
        })?;
        assert_eq!(skipped["type"], json!("variant_skipped"));
        assert!(skipped.get("name").is_none());
        Ok(())
    }

    #[test]
    fn logged_lines_read_back_as_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "worker-1");

        let events = vec![
            WorkerEvent::PassStarted { pass: 1 },
            WorkerEvent::Cooldown { seconds: 60 },
            WorkerEvent::JobArchived {
                file_id: "f-9".to_string(),
                file_name: "a.jpg".to_string(),
            },
        ];
        for event in &events {
            writer.record(event)?;
        }

        let read_back = fs::read_to_string(&path)?
            .lines()
            .map(serde_json::from_str::<WorkerEvent>)
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(read_back, events);
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "worker-1");

        let mut payload = EventPayload::new();
        payload.insert("worker_id".to_string(), json!("override"));
        let emitted = writer.emit("pass_started", payload)?;

        assert_eq!(emitted["worker_id"], json!("override"));
        Ok(())
    }
}
