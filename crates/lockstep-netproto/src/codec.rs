//! Text framing for [`Packet`]s.
//!
//! Layout: `<engine>[<message>[<attachments>-][<nsp>,][<id>]<json>]`.
//!
//! Non-`Message` packets encode to their engine digit only, so control
//! frames (`ping`, `pong`, `close`) are a single character. The decoder is
//! more lenient: any frame longer than two characters has its namespace,
//! id and payload parsed, which is how the server's `open` handshake
//! (`0{"sid":...}`) arrives.

use crate::{
    constants::{DEFAULT_NAMESPACE, MAX_TEXT_FRAME},
    error::ProtoError,
    messages::Handshake,
    packet::{EngineType, MessageType, Packet},
};

/// Result of decoding one frame.
///
/// A malformed JSON payload does not fail the whole frame: the envelope is
/// still returned, with `data == None` and the parse error in
/// `payload_error` for the caller to log.
#[derive(Debug)]
pub struct Decoded {
    pub packet: Packet,
    pub payload_error: Option<ProtoError>,
}

/// Encode a packet into a text frame.
pub fn encode(packet: &Packet) -> String {
    let mut out = String::with_capacity(16);
    out.push(type_digit(packet.engine as u8));
    if packet.engine != EngineType::Message {
        return out;
    }
    let Some(message) = packet.message else {
        return out;
    };
    out.push(type_digit(message as u8));

    if message.is_binary() {
        out.push_str(&packet.attachments.to_string());
        out.push('-');
    }

    if !packet.namespace.is_empty() && packet.namespace != DEFAULT_NAMESPACE {
        out.push_str(&packet.namespace);
        out.push(',');
    }

    if let Some(id) = packet.id {
        out.push_str(&id.to_string());
    }

    if let Some(data) = packet.data.as_ref().filter(|v| !v.is_null()) {
        out.push_str(&data.to_string());
    }

    out
}

/// Encode the server's `open` handshake. Unlike [`encode`], the engine
/// digit is followed by the handshake JSON.
pub fn encode_open(handshake: &Handshake) -> Result<String, ProtoError> {
    let json = serde_json::to_string(handshake)?;
    let mut out = String::with_capacity(json.len() + 1);
    out.push(type_digit(EngineType::Open as u8));
    out.push_str(&json);
    Ok(out)
}

/// Decode a text frame.
///
/// Envelope failures (empty frame, unknown type digit, malformed
/// attachment count, oversized frame) are errors; payload failures are
/// reported through [`Decoded::payload_error`].
pub fn decode(text: &str) -> Result<Decoded, ProtoError> {
    if text.len() > MAX_TEXT_FRAME {
        return Err(ProtoError::FrameTooLarge(text.len()));
    }
    let bytes = text.as_bytes();
    let first = *bytes.first().ok_or(ProtoError::Empty)?;
    let engine = parse_digit(first)
        .and_then(EngineType::from_repr)
        .ok_or(ProtoError::UnknownEngineType(first as char))?;

    let mut packet = Packet::control(engine);
    let mut pos = 1;

    if engine == EngineType::Message
        && let Some(&b) = bytes.get(1)
    {
        let message = parse_digit(b)
            .and_then(MessageType::from_repr)
            .ok_or(ProtoError::UnknownMessageType(b as char))?;
        packet.message = Some(message);
        pos = 2;
    }

    // Bare control / connect frames.
    if text.len() <= 2 {
        return Ok(Decoded {
            packet,
            payload_error: None,
        });
    }

    if packet.message.is_some_and(MessageType::is_binary) {
        let dash = text[pos..]
            .find('-')
            .map(|i| pos + i)
            .ok_or(ProtoError::BadAttachments)?;
        packet.attachments = text[pos..dash]
            .parse()
            .map_err(|_| ProtoError::BadAttachments)?;
        pos = dash + 1;
    }

    if bytes.get(pos) == Some(&b'/') {
        let end = text[pos..].find(',').map_or(text.len(), |i| pos + i);
        packet.namespace = text[pos..end].to_string();
        pos = (end + 1).min(text.len());
    }

    let digits = bytes[pos..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits > 0 {
        let id = text[pos..pos + digits]
            .parse()
            .map_err(|_| ProtoError::BadCorrelationId)?;
        packet.id = Some(id);
        pos += digits;
    }

    let mut payload_error = None;
    let rest = &text[pos..];
    if !rest.is_empty() {
        match serde_json::from_str(rest) {
            Ok(value) => packet.data = Some(value),
            Err(e) => payload_error = Some(ProtoError::Json(e)),
        }
    }

    Ok(Decoded {
        packet,
        payload_error,
    })
}

fn parse_digit(b: u8) -> Option<u8> {
    b.is_ascii_digit().then(|| b - b'0')
}

fn type_digit(v: u8) -> char {
    char::from(b'0' + v)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn control_frames_are_one_character() {
        assert_eq!(encode(&Packet::control(EngineType::Ping)), "2");
        assert_eq!(encode(&Packet::control(EngineType::Pong)), "3");
        assert_eq!(encode(&Packet::control(EngineType::Close)), "1");
    }

    #[test]
    fn encodes_event_with_namespace_and_id() {
        let packet = Packet::message(MessageType::Event, Some(json!(["lockstep.io:sync", {"t0": 5}])))
            .with_namespace("/game")
            .with_id(Some(12));
        assert_eq!(encode(&packet), r#"42/game,12["lockstep.io:sync",{"t0":5}]"#);
    }

    #[test]
    fn encodes_binary_attachments() {
        let packet = Packet::message(MessageType::BinaryEvent, Some(json!(["x"]))).with_attachments(2);
        assert_eq!(encode(&packet), r#"452-["x"]"#);
    }

    #[test]
    fn null_payload_is_omitted() {
        let mut packet = Packet::message(MessageType::Disconnect, None);
        packet.data = Some(serde_json::Value::Null);
        assert_eq!(encode(&packet), "41");
    }

    #[test]
    fn decodes_bare_frames() {
        for text in ["2", "3", "40", "41"] {
            let decoded = decode(text).unwrap();
            assert!(decoded.payload_error.is_none());
            assert_eq!(decoded.packet.namespace, "/");
            assert_eq!(decoded.packet.id, None);
            assert_eq!(decoded.packet.data, None);
        }
        let connect = decode("40").unwrap().packet;
        assert!(connect.is_message(MessageType::Connect));
    }

    #[test]
    fn decodes_ack_with_id() {
        let decoded = decode(r#"43123["ok"]"#).unwrap();
        assert!(decoded.packet.is_message(MessageType::Ack));
        assert_eq!(decoded.packet.id, Some(123));
        assert_eq!(decoded.packet.data, Some(json!(["ok"])));
    }

    #[test]
    fn decodes_open_handshake_payload() {
        let text = encode_open(&Handshake {
            sid: "abc".into(),
            upgrades: vec![],
            ping_interval: 25_000,
            ping_timeout: 60_000,
        })
        .unwrap();
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.packet.engine, EngineType::Open);
        let data = decoded.packet.data.unwrap();
        assert_eq!(data["sid"], "abc");
        assert_eq!(data["pingInterval"], 25_000);
    }

    #[test]
    fn malformed_payload_keeps_envelope() {
        let decoded = decode(r#"42/chat,7["broken"#).unwrap();
        assert!(decoded.packet.is_message(MessageType::Event));
        assert_eq!(decoded.packet.namespace, "/chat");
        assert_eq!(decoded.packet.id, Some(7));
        assert_eq!(decoded.packet.data, None);
        assert!(matches!(decoded.payload_error, Some(ProtoError::Json(_))));
    }

    #[test]
    fn rejects_bad_envelopes() {
        assert!(matches!(decode(""), Err(ProtoError::Empty)));
        assert!(matches!(decode("9"), Err(ProtoError::UnknownEngineType('9'))));
        assert!(matches!(decode("x2"), Err(ProtoError::UnknownEngineType('x'))));
        assert!(matches!(decode("48[]"), Err(ProtoError::UnknownMessageType('8'))));
        assert!(matches!(decode("45x[]"), Err(ProtoError::BadAttachments)));
        assert!(matches!(
            decode("4299999999999999999999999[]"),
            Err(ProtoError::BadCorrelationId)
        ));
    }
}
