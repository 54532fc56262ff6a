//! RunningHub webhook payloads.
//!
//! RunningHub POSTs a JSON document when a task finishes:
//!
//! ```json
//! {"taskId": "1958...", "eventData": {"code": 0, "data": {"fileUrl": "https://..."}}}
//! ```
//!
//! `eventData` is sometimes delivered as a JSON-encoded string rather
//! than an object. [`parse_callback`] normalizes all of this into a
//! [`CallbackEvent`] once, at the boundary.

use diffserver_core::types::TaskId;
use serde::Deserialize;
use serde_json::Value;

/// A classified completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// The task produced a result file.
    Success { task_id: TaskId, file_url: String },
    /// The task finished with a non-zero status code.
    Failure { task_id: TaskId, code: i64 },
    /// The payload could not be interpreted. `task_id` is set whenever
    /// it could be recovered.
    Malformed {
        task_id: Option<TaskId>,
        reason: String,
    },
}

impl CallbackEvent {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            CallbackEvent::Success { task_id, .. } | CallbackEvent::Failure { task_id, .. } => {
                Some(task_id)
            }
            CallbackEvent::Malformed { task_id, .. } => task_id.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCallback {
    #[serde(rename = "taskId")]
    task_id: Option<Value>,
    #[serde(rename = "eventData")]
    event_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    code: Option<i64>,
    data: Option<Value>,
}

/// Classify a webhook body.
pub fn parse_callback(payload: &Value) -> CallbackEvent {
    let raw = match RawCallback::deserialize(payload) {
        Ok(raw) => raw,
        Err(e) => {
            return CallbackEvent::Malformed {
                task_id: None,
                reason: format!("payload is not an object: {e}"),
            }
        }
    };

    let Some(task_id) = raw.task_id.as_ref().and_then(id_from_value) else {
        return CallbackEvent::Malformed {
            task_id: None,
            reason: "missing taskId".into(),
        };
    };

    let malformed = |reason: &str| CallbackEvent::Malformed {
        task_id: Some(task_id.clone()),
        reason: reason.to_string(),
    };

    let event_data = match raw.event_data {
        Some(Value::String(text)) => match serde_json::from_str::<RawEventData>(&text) {
            Ok(data) => data,
            Err(_) => return malformed("eventData string is not valid JSON"),
        },
        Some(value @ Value::Object(_)) => match RawEventData::deserialize(&value) {
            Ok(data) => data,
            Err(_) => return malformed("eventData has an unexpected shape"),
        },
        _ => return malformed("missing eventData"),
    };

    match event_data.code {
        Some(0) => {}
        Some(code) => return CallbackEvent::Failure { task_id, code },
        None => return malformed("missing eventData.code"),
    }

    match event_data.data.as_ref().and_then(file_url) {
        Some(file_url) => CallbackEvent::Success { task_id, file_url },
        None => malformed("missing eventData.data.fileUrl"),
    }
}

/// Parse and classify a raw webhook body.
pub fn parse_callback_str(text: &str) -> CallbackEvent {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => parse_callback(&value),
        Err(e) => CallbackEvent::Malformed {
            task_id: None,
            reason: format!("invalid JSON: {e}"),
        },
    }
}

/// Task ids arrive as strings, but large numeric ids are tolerated too.
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `data` is normally an object; a list of outputs uses the first entry.
fn file_url(data: &Value) -> Option<String> {
    let entry = match data {
        Value::Array(items) => items.first()?,
        other => other,
    };
    entry
        .get("fileUrl")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
