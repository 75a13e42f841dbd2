//! Event envelope: `["name"]` or `["name", {data}]` inside an Event packet.

use serde_json::Value;

use crate::{
    error::ProtoError,
    messages::EventPayload,
    packet::{MessageType, Packet},
};

/// Synthetic event names delivered by the peer socket on connection state
/// changes. They never travel on the wire.
pub const LIFECYCLE_OPEN: &str = "open";
pub const LIFECYCLE_CONNECT: &str = "connect";
pub const LIFECYCLE_DISCONNECT: &str = "disconnect";
pub const LIFECYCLE_CLOSE: &str = "close";
pub const LIFECYCLE_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: Option<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn lifecycle(name: &str) -> Self {
        Self::new(name, None)
    }

    /// Build an event from a typed payload.
    pub fn encode<T: EventPayload>(payload: &T) -> Result<Self, ProtoError> {
        Ok(Self::new(T::EVENT, Some(serde_json::to_value(payload)?)))
    }

    /// Decode the data as `T`. A missing object decodes as `{}`.
    pub fn decode<T: EventPayload>(&self) -> Result<T, ProtoError> {
        let data = self
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok(serde_json::from_value(data)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtoError> {
        let items = value
            .as_array()
            .ok_or(ProtoError::InvalidEvent("payload is not an array"))?;
        let (name, data) = match items.as_slice() {
            [name] => (name, None),
            [name, data] => (name, Some(data)),
            _ => return Err(ProtoError::InvalidEvent("expected one or two elements")),
        };
        let name = name
            .as_str()
            .ok_or(ProtoError::InvalidEvent("event name is not a string"))?;
        if let Some(data) = data
            && !data.is_object()
        {
            return Err(ProtoError::InvalidEvent("event data is not an object"));
        }
        Ok(Self::new(name, data.cloned()))
    }

    pub fn to_value(&self) -> Value {
        let mut items = vec![Value::String(self.name.clone())];
        if let Some(data) = &self.data {
            items.push(data.clone());
        }
        Value::Array(items)
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, ProtoError> {
        if !packet.is_message(MessageType::Event) {
            return Err(ProtoError::InvalidEvent("not an event packet"));
        }
        let data = packet
            .data
            .as_ref()
            .ok_or(ProtoError::InvalidEvent("event packet without payload"))?;
        Self::from_value(data)
    }

    pub fn into_packet(self, id: Option<u64>) -> Packet {
        Packet::message(MessageType::Event, Some(self.to_value())).with_id(id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{codec, messages::SyncRequest};

    #[test]
    fn accepts_name_only_and_name_with_object() {
        let e = Event::from_value(&json!(["ping"])).unwrap();
        assert_eq!(e.name, "ping");
        assert_eq!(e.data, None);

        let e = Event::from_value(&json!(["lockstep.io:sync", {"t0": 3}])).unwrap();
        assert_eq!(e.data, Some(json!({"t0": 3})));
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in [
            json!({"name": "x"}),
            json!([]),
            json!([1]),
            json!(["x", 5]),
            json!(["x", {}, {}]),
        ] {
            assert!(
                matches!(Event::from_value(&bad), Err(ProtoError::InvalidEvent(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn typed_payload_through_packet() {
        let event = Event::encode(&SyncRequest { t0: 99 }).unwrap();
        let text = codec::encode(&event.into_packet(Some(4)));
        assert_eq!(text, r#"424["lockstep.io:sync",{"t0":99}]"#);

        let decoded = codec::decode(&text).unwrap().packet;
        let event = Event::from_packet(&decoded).unwrap();
        let req: SyncRequest = event.decode().unwrap();
        assert_eq!(req.t0, 99);
    }
}
