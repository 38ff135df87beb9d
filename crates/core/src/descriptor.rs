//! Descriptor caches
//!
//! Set snapshots and secondary indexes live under derived entity ids. The
//! name-to-id mapping is pure, but computing and validating it per call is
//! wasted allocation on a hot path, so each mapping is a process-wide,
//! lazily populated concurrent map: populated once per distinct name,
//! never evicted.

use crate::id::EntityId;
use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Reserved category for set snapshots
pub const SET_CATEGORY: &str = "set";

/// Reserved category for secondary-index roots
pub const INDEX_CATEGORY: &str = "index";

static SET_DESCRIPTORS: Lazy<DashMap<String, EntityId>> = Lazy::new(DashMap::new);

static INDEX_DESCRIPTORS: Lazy<DashMap<String, EntityId>> = Lazy::new(DashMap::new);

/// The snapshot entity for a named set: `set/<name>`
pub fn set_snapshot_entity(name: &str) -> EntityId {
    descriptor(&SET_DESCRIPTORS, SET_CATEGORY, name)
}

/// The root entity for a named secondary index: `index/<name>`
pub fn index_root_entity(name: &str) -> EntityId {
    descriptor(&INDEX_DESCRIPTORS, INDEX_CATEGORY, name)
}

fn descriptor(cache: &DashMap<String, EntityId>, category: &str, name: &str) -> EntityId {
    if let Some(found) = cache.get(name) {
        return found.clone();
    }
    let id = EntityId::new(category, name)
        .unwrap_or_else(|_| unreachable!("reserved categories are well-formed"));
    cache.entry(name.to_string()).or_insert(id).value().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_descriptor_shape() {
        let id = set_snapshot_entity("open-orders");
        assert_eq!(id.category(), SET_CATEGORY);
        assert_eq!(id.name(), "open-orders");
    }

    #[test]
    fn test_index_descriptor_shape() {
        let id = index_root_entity("by-email");
        assert_eq!(id.category(), INDEX_CATEGORY);
        assert_eq!(id.name(), "by-email");
    }

    #[test]
    fn test_descriptors_are_memoized() {
        let first = set_snapshot_entity("memo");
        let second = set_snapshot_entity("memo");
        assert_eq!(first, second);
    }
}
