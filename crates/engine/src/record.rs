//! Record persistence and traversal
//!
//! Increment records are entities like any other: serialized to the
//! canonical value form and uploaded cache-bypassing (they are write-once
//! and read back through the repository by auditors and browsers, never
//! through the hot cache). A non-root record additionally writes a child
//! marker under its parent's child category, which makes descendant
//! traversal a plain history scan.

use accrete_core::{
    child_marker_entity, record_entity, BinaryStamp, Error, Increment, IncrementId, Result, Stamp,
    Value,
};
use accrete_data::DataEngine;

/// Serialize a record into the canonical value form
pub fn record_value(record: &Increment) -> Result<Value> {
    serde_json::to_value(record).map(Value::from).map_err(Error::serde)
}

/// Rebuild a record from its canonical value form
pub fn record_from_value(value: &Value) -> Result<Increment> {
    serde_json::from_value(serde_json::Value::from(value.clone())).map_err(Error::serde)
}

/// Persist a record and, for non-roots, its child marker.
///
/// # Errors
///
/// Serialization and upload failures.
pub async fn persist_record(data: &DataEngine, record: &Increment) -> Result<()> {
    let value = record_value(record)?;
    let stamp = Stamp::new(record.record_entity(), record.id.clone(), value);
    data.upload(&stamp, true).await?;

    if !record.parent.is_none() {
        let marker = Stamp::new(
            child_marker_entity(&record.parent),
            record.id.clone(),
            Value::Null,
        );
        data.upload(&marker, true).await?;
    }
    Ok(())
}

/// Load a record by its (full, suffix-tagged) id.
///
/// # Errors
///
/// `NotFound` when no such record exists; decode failures otherwise.
pub async fn load_record(data: &DataEngine, id: &IncrementId) -> Result<Increment> {
    let entity = record_entity(id);
    let binary = data.repository().load(&entity, id).await?;
    let value = decode_record_stamp(data, binary)?;
    record_from_value(&value)
}

/// Record ids of every increment derived from `parent`, oldest first.
///
/// # Errors
///
/// Repository listing failures.
pub async fn descendants(data: &DataEngine, parent: &IncrementId) -> Result<Vec<IncrementId>> {
    data.repository()
        .history_after(&child_marker_entity(parent), &IncrementId::none())
        .await
}

fn decode_record_stamp(data: &DataEngine, binary: BinaryStamp) -> Result<Value> {
    data.serializer().decode(&binary.entity, binary.encoding, &binary.bytes)
}
