//! Line parser for the agent event protocol.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! passed through, non-protocol lines degraded to [`Event::Empty`].

use serde_json::Value;
use tracing::trace;

use super::types::*;
use crate::error::{Error, Result};

/// Decode one line of agent stdout, never failing.
///
/// Blank lines, invalid JSON and JSON that is not an event envelope all
/// yield [`Event::Empty`]. Agents that do not speak the protocol produce
/// nothing but empty events, which is expected.
pub fn decode_line(line: &str) -> Event {
    let line = line.trim();
    if line.is_empty() {
        return Event::Empty;
    }
    match parse_line(line) {
        Ok(event) => event,
        Err(e) => {
            trace!(error = %e, "Non-protocol line");
            Event::Empty
        }
    }
}

/// Parse a single JSON line into an event.
pub fn parse_line(line: &str) -> Result<Event> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into a canonical event.
pub fn parse_value(raw: &Value) -> Result<Event> {
    let event_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::EventParse("Missing 'type' field".into()))?;

    match event_type {
        "thread.started" => parse_thread_started(raw),
        "context_compacted" => Ok(Event::ContextCompacted),
        "turn.started" => Ok(Event::TurnStarted),
        "turn.completed" => Ok(Event::TurnCompleted {
            usage: parse_usage(raw.get("usage")),
        }),
        "turn.failed" => Ok(Event::TurnFailed {
            message: error_message(raw.get("error")),
        }),
        "item.started" => parse_item(raw).map(Event::ItemStarted),
        "item.updated" => parse_item(raw).map(Event::ItemUpdated),
        "item.completed" => parse_item(raw).map(Event::ItemCompleted),
        "error" => Ok(Event::Error {
            message: raw
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        }),
        _ => Ok(Event::Unrecognized {
            event_type: event_type.to_string(),
            payload: raw.clone(),
        }),
    }
}

fn parse_thread_started(raw: &Value) -> Result<Event> {
    let thread_id = raw
        .get("thread_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::EventParse("thread.started without thread_id".into()))?
        .to_string();

    Ok(Event::ThreadStarted { thread_id })
}

fn parse_item(raw: &Value) -> Result<Item> {
    let item = raw
        .get("item")
        .filter(|v| v.is_object())
        .ok_or_else(|| Error::EventParse("Missing 'item' object".into()))?;

    let str_field = |name: &str| item.get(name).and_then(|v| v.as_str()).map(String::from);

    let kind = item
        .get("type")
        .or_else(|| item.get("item_type"))
        .and_then(|v| v.as_str())
        .map(ItemKind::from_wire)
        .unwrap_or_default();

    let exit_code = item
        .get("exit_code")
        .and_then(Value::as_i64)
        .and_then(|c| i32::try_from(c).ok());

    Ok(Item {
        id: str_field("id"),
        kind,
        text: str_field("text"),
        command: str_field("command"),
        aggregated_output: str_field("aggregated_output"),
        exit_code,
        status: str_field("status"),
    })
}

/// Extract a human-readable message from an `error` payload, which agents
/// send either as an object with a `message` or as a bare string.
fn error_message(val: Option<&Value>) -> Option<String> {
    let val = val?;
    val.as_str()
        .or_else(|| val.get("message").and_then(|m| m.as_str()))
        .map(String::from)
}

pub(crate) fn parse_usage(val: Option<&Value>) -> Usage {
    val.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_thread_started_carries_token() {
        let event = decode_line(r#"{"type":"thread.started","thread_id":"abc123"}"#);
        assert_eq!(
            event,
            Event::ThreadStarted {
                thread_id: "abc123".to_string()
            }
        );
        assert_eq!(event.event_type(), Some("thread.started"));
    }

    #[test]
    fn invalid_json_is_empty_not_error() {
        assert_eq!(decode_line("{not valid json"), Event::Empty);
        assert!(parse_line("{not valid json").is_err());
    }

    #[test]
    fn json_without_envelope_is_empty() {
        assert_eq!(decode_line(r#"{"hello":"world"}"#), Event::Empty);
        assert_eq!(decode_line("[1,2,3]"), Event::Empty);
        assert_eq!(decode_line("42"), Event::Empty);
        assert_eq!(decode_line("   "), Event::Empty);
    }

    #[test]
    fn plain_text_is_empty() {
        assert!(decode_line("Compiling drover v0.1.0").is_empty());
    }

    #[test]
    fn turn_failed_with_error_object() {
        let event = decode_line(r#"{"type":"turn.failed","error":{"message":"rate limited"}}"#);
        assert_eq!(
            event,
            Event::TurnFailed {
                message: Some("rate limited".to_string())
            }
        );
    }

    #[test]
    fn turn_failed_without_error_still_fails() {
        let event = decode_line(r#"{"type":"turn.failed"}"#);
        assert_eq!(event, Event::TurnFailed { message: None });
    }

    #[test]
    fn command_item_fields() {
        let json = r#"{"type":"item.completed","item":{"id":"item_3","type":"command_execution","command":"bash -lc ls","aggregated_output":"a\nb\n","exit_code":0,"status":"completed"}}"#;
        let Event::ItemCompleted(item) = decode_line(json) else {
            panic!("expected item.completed");
        };
        assert_eq!(item.kind, ItemKind::CommandExecution);
        assert_eq!(item.command.as_deref(), Some("bash -lc ls"));
        assert_eq!(item.aggregated_output.as_deref(), Some("a\nb\n"));
        assert_eq!(item.exit_code, Some(0));
        assert_eq!(item.status.as_deref(), Some("completed"));
    }

    #[test]
    fn item_types_normalize_to_one_label() {
        for raw in ["agent_message", "assistant_message", "message"] {
            let json = format!(
                r#"{{"type":"item.completed","item":{{"type":"{raw}","text":"hi"}}}}"#
            );
            let event = decode_line(&json);
            assert_eq!(event.log_label(), Some("assistant"), "raw type {raw}");
        }
    }

    #[test]
    fn item_event_without_item_is_empty() {
        assert!(decode_line(r#"{"type":"item.started"}"#).is_empty());
    }

    #[test]
    fn unknown_type_passes_through() {
        let event = decode_line(r#"{"type":"session.configured","model":"o4"}"#);
        let Event::Unrecognized {
            event_type,
            payload,
        } = event
        else {
            panic!("expected unrecognized event");
        };
        assert_eq!(event_type, "session.configured");
        assert_eq!(payload["model"], "o4");
    }

    #[test]
    fn usage_parsed_leniently() {
        let event = decode_line(
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":5,"extra":1}}"#,
        );
        let Event::TurnCompleted { usage } = event else {
            panic!("expected turn.completed");
        };
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.cached_input_tokens, 0);
        assert_eq!(usage.output_tokens, 5);
    }

    #[test]
    fn thread_started_without_id_is_empty() {
        assert!(decode_line(r#"{"type":"thread.started"}"#).is_empty());
    }
}
