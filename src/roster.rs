//! The entity roster: a dense, insertion-ordered arena of monitored addresses.
//!
//! Removal never compacts the array. A removed entity leaves a tombstone
//! (`None`) in its slot so that every index handed out stays valid for as
//! long as any job range references it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 20-byte address-like identifier for a monitored entity or a caller.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Generate a random address. Used for test fixtures and demo seeding.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| format!("invalid address {s:?}: {e}"))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| format!("invalid address {s:?}: expected 20 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Growable arena of entities with tombstoned removal.
///
/// Invariant: an entity's index, once assigned, never changes. Re-adding a
/// previously removed entity always appends a fresh slot.
#[derive(Debug, Default)]
pub struct EntityList {
    slots: Vec<Option<Address>>,
    index: HashMap<Address, usize>,
    active: usize,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new entity and return its index.
    ///
    /// The caller is responsible for checking [`contains`](Self::contains)
    /// first; appending a duplicate would shadow the live slot in the
    /// reverse index.
    pub fn append(&mut self, entity: Address) -> usize {
        debug_assert!(!self.index.contains_key(&entity), "duplicate append");
        let idx = self.slots.len();
        self.slots.push(Some(entity));
        self.index.insert(entity, idx);
        self.active += 1;
        idx
    }

    /// Tombstone an entity's slot. Returns the freed index, or `None` if the
    /// entity is not present.
    pub fn remove(&mut self, entity: &Address) -> Option<usize> {
        let idx = self.index.remove(entity)?;
        self.slots[idx] = None;
        self.active -= 1;
        Some(idx)
    }

    pub fn get(&self, idx: usize) -> Option<Address> {
        self.slots.get(idx).copied().flatten()
    }

    pub fn contains(&self, entity: &Address) -> bool {
        self.index.contains_key(entity)
    }

    pub fn index_of(&self, entity: &Address) -> Option<usize> {
        self.index.get(entity).copied()
    }

    /// Total number of slots, tombstones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of live (non-tombstoned) entities.
    pub fn active_len(&self) -> usize {
        self.active
    }

    /// Count live entities in the half-open range `[start, end)`.
    pub fn active_in(&self, start: usize, end: usize) -> usize {
        let end = end.min(self.slots.len());
        if start >= end {
            return 0;
        }
        self.slots[start..end].iter().filter(|s| s.is_some()).count()
    }

    /// Index of the first live entity at or after `from`, strictly below `end`.
    pub fn next_active_in(&self, from: usize, end: usize) -> Option<usize> {
        let end = end.min(self.slots.len());
        (from..end).find(|&i| self.slots[i].is_some())
    }

    /// Live entities in `[start, end)`, in index order.
    pub fn active_slice(&self, start: usize, end: usize) -> Vec<Address> {
        let end = end.min(self.slots.len());
        if start >= end {
            return Vec::new();
        }
        self.slots[start..end].iter().copied().flatten().collect()
    }

    /// Paginated raw view of the slots, tombstones surfaced as `None`.
    pub fn range(&self, offset: usize, count: usize) -> Vec<(usize, Option<Address>)> {
        self.slots
            .iter()
            .enumerate()
            .skip(offset)
            .take(count)
            .map(|(i, s)| (i, *s))
            .collect()
    }
}
