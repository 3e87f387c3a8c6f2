//! Messages exchanged with the randomisation server over the job channel.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Start { config: JsonValue },
}

impl ClientMessage {
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerMessage {
    Progress {
        #[serde(default)]
        step: u32,
        #[serde(rename = "totalSteps", default)]
        total_steps: u32,
        #[serde(default)]
        message: String,
        #[serde(default, deserialize_with = "seed")]
        seed: Option<String>,
    },
    Done {
        #[serde(default, deserialize_with = "seed")]
        seed: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, deserialize_with = "seed")]
        seed: Option<String>,
    },
}

/// Outcome of decoding one text frame from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    /// Well-formed JSON with a status this client does not know.
    Unknown(String),
}

pub fn parse_server_message(text: &str) -> Result<Inbound, serde_json::Error> {
    let json: JsonValue = serde_json::from_str(text)?;
    let status = json.get("status").and_then(JsonValue::as_str).unwrap_or_default();
    match status {
        "progress" | "done" | "error" => serde_json::from_value(json).map(Inbound::Message),
        other => Ok(Inbound::Unknown(other.to_string())),
    }
}

// The server reports seeds as strings or plain numbers.
fn seed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::String(s)) => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_message_carries_config() {
        let text = ClientMessage::Start {
            config: json!({"seed": "", "text": {"main": true}}),
        }
        .to_text()
        .unwrap();
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"action": "start", "config": {"seed": "", "text": {"main": true}}}));
    }

    #[test]
    fn parses_progress_with_numeric_seed() {
        let msg = parse_server_message(
            r#"{"status": "progress", "step": 1, "totalSteps": 10, "message": "Dungeons", "seed": 1234}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Inbound::Message(ServerMessage::Progress {
                step: 1,
                total_steps: 10,
                message: "Dungeons".into(),
                seed: Some("1234".into()),
            })
        );
    }

    #[test]
    fn done_ignores_extra_fields() {
        let msg = parse_server_message(
            r#"{"status": "done", "step": 10, "totalSteps": 10, "message": "Randomization complete!", "seed": "ABC123"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Inbound::Message(ServerMessage::Done {
                seed: Some("ABC123".into())
            })
        );
    }

    #[test]
    fn error_without_seed() {
        let msg = parse_server_message(r#"{"status": "error", "message": "Fatal error: boom"}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Message(ServerMessage::Error {
                message: "Fatal error: boom".into(),
                seed: None,
            })
        );
    }

    #[test]
    fn unknown_status_is_reported_not_failed() {
        assert_eq!(
            parse_server_message(r#"{"status": "paused"}"#).unwrap(),
            Inbound::Unknown("paused".into())
        );
        assert!(parse_server_message("not json").is_err());
    }
}
