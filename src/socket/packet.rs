//! Engine.IO v4 / Socket.IO v5 text packet framing
//!
//! Only the subset the chat backend uses: open, ping/pong, connect,
//! disconnect, connect error and plain events on the default namespace.

use serde::Deserialize;
use serde_json::Value;

/// Server handshake carried by the Engine.IO open packet (`0{...}`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    /// Socket.IO namespace connect acknowledged.
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, data: Value },
    /// Anything else (acks, binary placeholders, noop, upgrade).
    Other(String),
}

/// Engine.IO pong reply to a server ping.
pub const PONG: &str = "3";

/// Parse one text frame.
pub fn parse(frame: &str) -> Packet {
    let mut chars = frame.chars();
    match chars.next() {
        Some('0') => match serde_json::from_str::<OpenInfo>(chars.as_str()) {
            Ok(info) => Packet::Open(info),
            Err(_) => Packet::Other(frame.to_string()),
        },
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => parse_socketio(chars.as_str()),
        _ => Packet::Other(frame.to_string()),
    }
}

fn parse_socketio(body: &str) -> Packet {
    let mut chars = body.chars();
    let Some(kind) = chars.next() else {
        return Packet::Other(body.to_string());
    };
    let rest = strip_namespace(chars.as_str());
    match kind {
        '0' => Packet::Connect,
        '1' => Packet::Disconnect,
        '2' => parse_event(rest).unwrap_or_else(|| Packet::Other(body.to_string())),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| rest.to_string());
            Packet::ConnectError(message)
        }
        _ => Packet::Other(body.to_string()),
    }
}

/// Drop an optional `/namespace,` prefix.
fn strip_namespace(s: &str) -> &str {
    if s.starts_with('/') {
        match s.find(',') {
            Some(pos) => &s[pos + 1..],
            None => "",
        }
    } else {
        s
    }
}

/// `[<ack id>]["name", data]`
fn parse_event(s: &str) -> Option<Packet> {
    let json_start = s.find('[')?;
    if !s[..json_start].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut items = match serde_json::from_str::<Value>(&s[json_start..]).ok()? {
        Value::Array(items) => items.into_iter(),
        _ => return None,
    };
    let name = match items.next()? {
        Value::String(name) => name,
        _ => return None,
    };
    let data = items.next().unwrap_or(Value::Null);
    Some(Packet::Event { name, data })
}

/// Socket.IO connect packet carrying the auth object.
pub fn encode_connect(auth: &Value) -> String {
    if auth.is_null() {
        "40".to_string()
    } else {
        format!("40{}", auth)
    }
}

/// Socket.IO event packet on the default namespace.
pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", Value::Array(vec![Value::String(name.to_string()), data.clone()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_open() {
        let p = parse(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#);
        assert_eq!(
            p,
            Packet::Open(OpenInfo {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 20000
            })
        );
    }

    #[test]
    fn test_parse_ping_and_connect() {
        assert_eq!(parse("2"), Packet::Ping);
        assert_eq!(parse(r#"40{"sid":"xyz"}"#), Packet::Connect);
        assert_eq!(parse("41"), Packet::Disconnect);
    }

    #[test]
    fn test_parse_event() {
        let p = parse(r#"42["message_delivered",{"messageId":"m1"}]"#);
        assert_eq!(
            p,
            Packet::Event {
                name: "message_delivered".into(),
                data: json!({ "messageId": "m1" })
            }
        );
    }

    #[test]
    fn test_parse_event_with_namespace_and_ack_id() {
        let p = parse(r#"42/chat,17["stop_typing"]"#);
        assert_eq!(
            p,
            Packet::Event {
                name: "stop_typing".into(),
                data: Value::Null
            }
        );
    }

    #[test]
    fn test_parse_connect_error() {
        assert_eq!(
            parse(r#"44{"message":"Invalid API key"}"#),
            Packet::ConnectError("Invalid API key".into())
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse("42not json"), Packet::Other(_)));
        assert!(matches!(parse(""), Packet::Other(_)));
    }

    #[test]
    fn test_malformed_frames_do_not_panic() {
        for frame in ["4", "4é", "é", "0é", "42", "42[", "4é[\"x\"]", "0{bad", "42/chat", "44"] {
            let _ = parse(frame);
        }
        assert_eq!(parse("4é"), Packet::Other("é".into()));
        assert_eq!(parse("4"), Packet::Other(String::new()));
        assert!(matches!(parse("é"), Packet::Other(_)));
        assert!(matches!(parse("42["), Packet::Other(_)));
        assert_eq!(parse("42/chat"), Packet::Other("2/chat".into()));
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_connect(&json!({ "apiKey": "k" })), r#"40{"apiKey":"k"}"#);
        assert_eq!(encode_connect(&Value::Null), "40");
        assert_eq!(encode_event("join_room", &json!("r1")), r#"42["join_room","r1"]"#);
    }
}
