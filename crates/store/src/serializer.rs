//! Reference payload serializer
//!
//! Encodes the canonical [`Value`] as JSON (default) or MessagePack. Real
//! deployments plug in a domain serializer; this one is enough for every
//! core protocol and for tests.

use accrete_core::{EntityId, Encoding, Error, Result, Serializer, Value};

/// Serializer over the canonical value enum
#[derive(Debug, Clone, Copy)]
pub struct StandardSerializer {
    default_encoding: Encoding,
}

impl StandardSerializer {
    /// A serializer that encodes as JSON
    pub fn json() -> Self {
        StandardSerializer { default_encoding: Encoding::Json }
    }

    /// A serializer that encodes as MessagePack
    pub fn msgpack() -> Self {
        StandardSerializer { default_encoding: Encoding::MsgPack }
    }
}

impl Default for StandardSerializer {
    fn default() -> Self {
        Self::json()
    }
}

impl Serializer for StandardSerializer {
    fn encode(&self, _entity: &EntityId, value: &Value) -> Result<(Encoding, Vec<u8>)> {
        let bytes = match self.default_encoding {
            Encoding::Json => serde_json::to_vec(value).map_err(Error::serde)?,
            Encoding::MsgPack => rmp_serde::to_vec(value).map_err(Error::serde)?,
        };
        Ok((self.default_encoding, bytes))
    }

    fn decode(&self, _entity: &EntityId, encoding: Encoding, bytes: &[u8]) -> Result<Value> {
        match encoding {
            Encoding::Json => serde_json::from_slice(bytes).map_err(Error::serde),
            Encoding::MsgPack => rmp_serde::from_slice(bytes).map_err(Error::serde),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entity() -> EntityId {
        EntityId::parse("user/alice").unwrap()
    }

    fn sample() -> Value {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Int(3));
        map.insert("name".to_string(), Value::String("alice".into()));
        map.insert("raw".to_string(), Value::Bytes(vec![0, 255, 7]));
        map.insert("tags".to_string(), Value::Array(vec![Value::Bool(true), Value::Null]));
        Value::Object(map)
    }

    #[test]
    fn test_json_round_trip() {
        let serializer = StandardSerializer::json();
        let (encoding, bytes) = serializer.encode(&entity(), &sample()).unwrap();
        assert_eq!(encoding, Encoding::Json);
        let back = serializer.decode(&entity(), encoding, &bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_msgpack_round_trip() {
        let serializer = StandardSerializer::msgpack();
        let (encoding, bytes) = serializer.encode(&entity(), &sample()).unwrap();
        assert_eq!(encoding, Encoding::MsgPack);
        let back = serializer.decode(&entity(), encoding, &bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_malformed_payload_is_serde_error() {
        let serializer = StandardSerializer::json();
        let result = serializer.decode(&entity(), Encoding::Json, b"{ not json");
        assert!(matches!(result, Err(Error::Serde(_))));

        let result = serializer.decode(&entity(), Encoding::MsgPack, &[0xc1]);
        assert!(matches!(result, Err(Error::Serde(_))));
    }

    #[test]
    fn test_cross_encoding_decode() {
        // A JSON-encoding serializer still decodes MessagePack payloads:
        // the tag travels with the stamp, not with the writer.
        let bytes = rmp_serde::to_vec(&Value::Int(9)).unwrap();
        let back = StandardSerializer::json()
            .decode(&entity(), Encoding::MsgPack, &bytes)
            .unwrap();
        assert_eq!(back, Value::Int(9));
    }
}
