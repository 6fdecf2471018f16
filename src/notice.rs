//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `invalid_source_notice`.
//! Role: Shared contract helper for CLI diagnostics such as invalid-source events.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};

use crate::api::InvalidSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub source: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("source".to_string(), json!(notice.source));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub fn invalid_source_notice(event: &InvalidSource, cmd: &str, time: String) -> Notice {
    let mut details = Map::new();
    details.insert("reason".to_string(), json!(event.reason));
    if let Some(entry) = &event.entry {
        details.insert("entry".to_string(), json!(entry));
    }
    if let Some(cause) = &event.cause {
        details.insert("cause".to_string(), json!(cause.to_string()));
    }
    let message = match &event.entry {
        Some(entry) => format!("stream {entry} stopped early ({})", event.reason.as_str()),
        None => format!("source produced no data ({})", event.reason.as_str()),
    };
    Notice {
        kind: "invalid_source".to_string(),
        time,
        cmd: cmd.to_string(),
        source: event.source.to_string(),
        message,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::{Notice, invalid_source_notice, notice_json};
    use crate::api::{
        Error, ErrorKind, InvalidSource, InvalidSourceReason, SourceDescriptor, Symbol,
    };
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("reason".to_string(), Value::from("empty"));

        let notice = Notice {
            kind: "invalid_source".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "replay".to_string(),
            source: "/data/day.zip".to_string(),
            message: "source produced no data (empty)".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(
            obj.get("kind").and_then(|v| v.as_str()),
            Some("invalid_source")
        );
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("replay"));
        assert_eq!(
            obj.get("source").and_then(|v| v.as_str()),
            Some("/data/day.zip")
        );
        assert!(obj.get("details").and_then(|v| v.as_object()).is_some());
    }

    #[test]
    fn invalid_source_notice_carries_reason_and_entry() {
        let event = InvalidSource {
            source: SourceDescriptor::local("/data/day.zip"),
            entry: Some(Symbol::new("spy")),
            reason: InvalidSourceReason::Unreadable,
            cause: Some(Error::new(ErrorKind::Io).with_message("short read")),
        };
        let notice = invalid_source_notice(&event, "replay", "t".to_string());
        assert_eq!(notice.kind, "invalid_source");
        assert_eq!(notice.source, "/data/day.zip");
        assert_eq!(
            notice.details.get("reason").and_then(|v| v.as_str()),
            Some("unreadable")
        );
        assert_eq!(
            notice.details.get("entry").and_then(|v| v.as_str()),
            Some("spy")
        );
        assert!(notice.message.contains("spy"));
    }
}
