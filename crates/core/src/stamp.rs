//! Stamps: versioned (entity, id, payload) units
//!
//! A stamp exists in two interchangeable forms: binary (encoding tag plus
//! bytes, for storage and transport) and decoded (a typed [`Value`], for
//! logic). A stamp whose increment id is the singularity is *empty*: it is
//! the positive statement that the entity does not exist.

use crate::error::{Error, Result};
use crate::id::{EntityId, IncrementId};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Payload encoding tag
///
/// Doubles as the file extension in the filesystem repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// serde_json text payload
    Json,
    /// MessagePack payload (rmp-serde)
    MsgPack,
}

impl Encoding {
    /// Tag string / file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::MsgPack => "msgpack",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "json" => Ok(Encoding::Json),
            "msgpack" => Ok(Encoding::MsgPack),
            other => Err(Error::NotSupportedEncoding(other.to_string())),
        }
    }
}

/// The (entity, increment) pair naming one stamp
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampKey {
    /// Entity the stamp belongs to
    pub entity: EntityId,
    /// Increment that produced the stamp
    pub increment: IncrementId,
}

impl StampKey {
    /// Build a stamp key
    pub fn new(entity: EntityId, increment: IncrementId) -> Self {
        StampKey { entity, increment }
    }
}

impl fmt::Display for StampKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.increment)
    }
}

/// Binary form of a stamp: encoding tag plus raw payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryStamp {
    /// Entity the stamp belongs to
    pub entity: EntityId,
    /// Increment that produced the stamp; singularity for confirmed absence
    pub increment: IncrementId,
    /// Payload encoding
    pub encoding: Encoding,
    /// Raw payload; empty for absent stamps
    pub bytes: Vec<u8>,
}

impl BinaryStamp {
    /// Build a binary stamp
    pub fn new(entity: EntityId, increment: IncrementId, encoding: Encoding, bytes: Vec<u8>) -> Self {
        BinaryStamp { entity, increment, encoding, bytes }
    }

    /// The confirmed-absence stamp for an entity
    pub fn absent(entity: EntityId) -> Self {
        BinaryStamp {
            entity,
            increment: IncrementId::none(),
            encoding: Encoding::Json,
            bytes: Vec::new(),
        }
    }

    /// True when this stamp records confirmed absence
    pub fn is_empty(&self) -> bool {
        self.increment.is_none()
    }

    /// The (entity, increment) key of this stamp
    pub fn key(&self) -> StampKey {
        StampKey::new(self.entity.clone(), self.increment.clone())
    }
}

/// Decoded form of a stamp
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    /// Entity the stamp belongs to
    pub entity: EntityId,
    /// Increment that produced the stamp; singularity for confirmed absence
    pub increment: IncrementId,
    /// Decoded payload; `None` exactly when the stamp is empty
    pub value: Option<Value>,
}

impl Stamp {
    /// Build a decoded stamp carrying a value
    pub fn new(entity: EntityId, increment: IncrementId, value: Value) -> Self {
        Stamp { entity, increment, value: Some(value) }
    }

    /// The confirmed-absence stamp for an entity
    pub fn absent(entity: EntityId) -> Self {
        Stamp { entity, increment: IncrementId::none(), value: None }
    }

    /// True when this stamp records confirmed absence
    pub fn is_empty(&self) -> bool {
        self.increment.is_none()
    }

    /// The (entity, increment) key of this stamp
    pub fn key(&self) -> StampKey {
        StampKey::new(self.entity.clone(), self.increment.clone())
    }
}

/// One decoded entity: an id and its value
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// The entity id
    pub id: EntityId,
    /// The decoded value
    pub value: Value,
}

impl Entity {
    /// Build an entity
    pub fn new(id: EntityId, value: Value) -> Self {
        Entity { id, value }
    }
}

/// A fact is an entity used as an increment's trigger
pub type Fact = Entity;
