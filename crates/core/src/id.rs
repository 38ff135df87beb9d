//! Identifier types
//!
//! This module defines the two identifiers everything else is keyed by:
//!
//! - **EntityId**: `category/name` string with total byte order, used for
//!   range scans and canonical commit-key ordering.
//! - **IncrementId**: an opaque token of logical time. The numeric field
//!   counts milliseconds *remaining* until a fixed far-future reference
//!   instant, zero-padded to a fixed width, so plain ascending string
//!   comparison yields newest-first order without parsing: an id minted at
//!   an earlier instant compares as *older* (greater string).
//!
//! ## The singularity
//!
//! The reserved empty id ("no stamp yet" / start of history) sorts after
//! every real id. That is the one place raw string order would get it
//! wrong, so `Ord` special-cases emptiness; everything else is a plain
//! byte comparison.
//!
//! ## Suffixes
//!
//! `-fail`, `-lost` and `-fact` are appended to self-describe an id
//! without loading the record behind it. An id "is successful" when
//! neither `-fail` nor `-lost` is present; only `-fail` ids never took
//! effect.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Separator between category and name in an entity id
pub const ENTITY_SEPARATOR: char = '/';

/// Suffix on ids of increments that failed before taking effect
pub const FAIL_SUFFIX: &str = "-fail";

/// Suffix on ids of increments whose commit succeeded but whose output
/// upload did not
pub const LOST_SUFFIX: &str = "-lost";

/// Suffix on ids of trigger (fact) stamps
pub const FACT_SUFFIX: &str = "-fact";

/// Width of the zero-padded milliseconds-remaining field
const TIME_FIELD_WIDTH: usize = 15;

/// The far-future instant the time field counts down to.
///
/// Anything minted before this instant fits in the fixed-width field.
static REFERENCE_INSTANT: Lazy<DateTime<Utc>> = Lazy::new(|| {
    Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0)
        .single()
        .expect("reference instant is a valid civil time")
});

// ============================================================================
// EntityId
// ============================================================================

/// Identifier of one entity: `category/name`
///
/// The derived ordering is plain byte order of the full string, which keeps
/// entities of one category contiguous for range scans and gives commits a
/// canonical key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Build an entity id from a category and a name.
    ///
    /// # Errors
    ///
    /// Returns an error if the category is empty, contains the separator,
    /// or the name is empty.
    pub fn new(category: &str, name: &str) -> Result<Self> {
        if category.is_empty() || name.is_empty() {
            return Err(Error::exception("entity id category and name must be non-empty"));
        }
        if category.contains(ENTITY_SEPARATOR) {
            return Err(Error::exception(format!(
                "entity category {category:?} must not contain {ENTITY_SEPARATOR:?}"
            )));
        }
        Ok(EntityId(format!("{category}{ENTITY_SEPARATOR}{name}")))
    }

    /// Parse a full `category/name` string.
    ///
    /// # Errors
    ///
    /// Returns an error unless the string contains exactly one non-empty
    /// category before the first separator and a non-empty name after it.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(ENTITY_SEPARATOR) {
            Some((category, name)) if !category.is_empty() && !name.is_empty() => {
                EntityId::new(category, name)
            }
            _ => Err(Error::exception(format!("malformed entity id {raw:?}"))),
        }
    }

    /// The category segment (before the separator)
    pub fn category(&self) -> &str {
        self.0
            .split_once(ENTITY_SEPARATOR)
            .map(|(category, _)| category)
            .unwrap_or(&self.0)
    }

    /// The name segment (after the first separator)
    pub fn name(&self) -> &str {
        self.0
            .split_once(ENTITY_SEPARATOR)
            .map(|(_, name)| name)
            .unwrap_or("")
    }

    /// The full `category/name` string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        EntityId::parse(raw)
    }
}

// ============================================================================
// IncrementId
// ============================================================================

/// Opaque, totally ordered token of logical time
///
/// `{millis remaining until the reference instant, 15 digits}-{tail}`, plus
/// an optional self-describing suffix. Ascending order on the raw strings
/// is newest-first chronological order; the empty singularity sorts after
/// every real id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncrementId(String);

impl IncrementId {
    /// The reserved "no stamp yet" id: empty, sorts after every real id
    pub fn none() -> Self {
        IncrementId(String::new())
    }

    /// Mint an id for the current instant with a random tail
    pub fn generate() -> Self {
        Self::at(Utc::now(), &random_tail())
    }

    /// Mint an id for a specific instant and caller-supplied tail.
    ///
    /// Instants at or past the reference instant saturate to zero
    /// milliseconds remaining.
    pub fn at(instant: DateTime<Utc>, tail: &str) -> Self {
        let remaining = (*REFERENCE_INSTANT - instant).num_milliseconds().max(0);
        IncrementId(format!("{:0width$}-{tail}", remaining, width = TIME_FIELD_WIDTH))
    }

    /// Wrap a raw id string loaded from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        IncrementId(raw.into())
    }

    /// True for the reserved singularity id
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// True when neither `-fail` nor `-lost` is present
    pub fn is_successful(&self) -> bool {
        !self.0.ends_with(FAIL_SUFFIX) && !self.0.ends_with(LOST_SUFFIX)
    }

    /// False only for `-fail` ids, which never took effect
    pub fn took_effect(&self) -> bool {
        !self.0.ends_with(FAIL_SUFFIX)
    }

    /// True for `-fact` trigger ids
    pub fn is_fact(&self) -> bool {
        self.0.ends_with(FACT_SUFFIX)
    }

    /// This id tagged as a failed increment
    #[must_use]
    pub fn tagged_fail(&self) -> Self {
        IncrementId(format!("{}{FAIL_SUFFIX}", self.0))
    }

    /// This id tagged as a lost increment
    #[must_use]
    pub fn tagged_lost(&self) -> Self {
        IncrementId(format!("{}{LOST_SUFFIX}", self.0))
    }

    /// This id tagged as a trigger stamp
    #[must_use]
    pub fn tagged_fact(&self) -> Self {
        IncrementId(format!("{}{FACT_SUFFIX}", self.0))
    }

    /// The id with any self-describing suffix stripped
    #[must_use]
    pub fn base(&self) -> Self {
        for suffix in [FAIL_SUFFIX, LOST_SUFFIX, FACT_SUFFIX] {
            if let Some(stripped) = self.0.strip_suffix(suffix) {
                return IncrementId(stripped.to_string());
            }
        }
        self.clone()
    }

    /// The instant this id was minted at, if it carries a parseable time
    /// field. The singularity has no instant.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        let field = self.0.split('-').next()?;
        let remaining: i64 = field.parse().ok()?;
        Some(*REFERENCE_INSTANT - chrono::Duration::milliseconds(remaining))
    }

    /// True when this id was minted strictly before `cutoff`.
    ///
    /// Ids without a parseable time field (including the singularity) are
    /// never considered minted before anything.
    pub fn minted_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.instant().map(|at| at < cutoff).unwrap_or(false)
    }

    /// True when `self` is chronologically newer than `other`.
    ///
    /// Every real id is newer than the singularity.
    pub fn is_newer_than(&self, other: &IncrementId) -> bool {
        self < other
    }

    /// The raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for IncrementId {
    fn cmp(&self, other: &Self) -> Ordering {
        // The singularity sorts after every real id; real ids compare as
        // raw strings (ascending == newest first).
        match (self.0.is_empty(), other.0.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for IncrementId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IncrementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(none)")
        } else {
            f.write_str(&self.0)
        }
    }
}

fn random_tail() -> String {
    format!("{:08x}", rand::random::<u32>())
}
