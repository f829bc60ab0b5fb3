//! Versioned metadata dictionary.
//!
//! A dictionary holds a committed map plus at most one proposed overlay.
//! Reads pick a view with [`SchemaVersion`]:
//! - `Committed`: the durable map only.
//! - `Proposed`: the overlay only (removals read as absent).
//! - `Recent`: the overlay where it has an entry, otherwise the committed map.
use std::collections::BTreeMap;

use compact_str::CompactString;

use crate::{schema::SchemaVersion, variable::attributes::AttributeValue};

/// Pending edits of a [`MetadataDictionary`]. `None` entries are removals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDiff {
    entries: BTreeMap<CompactString, Option<AttributeValue>>,
}

impl MetadataDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Option<AttributeValue>> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<CompactString>, value: AttributeValue) {
        self.entries.insert(key.into(), Some(value));
    }

    pub fn remove(&mut self, key: impl Into<CompactString>) {
        self.entries.insert(key.into(), None);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&AttributeValue>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDictionary {
    committed: BTreeMap<CompactString, AttributeValue>,
    proposed: Option<MetadataDiff>,
}

impl MetadataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dictionary whose committed state is `entries`.
    pub fn from_committed<K: Into<CompactString>>(
        entries: impl IntoIterator<Item = (K, AttributeValue)>,
    ) -> Self {
        Self {
            committed: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            proposed: None,
        }
    }

    pub fn get(&self, key: &str, version: SchemaVersion) -> Option<&AttributeValue> {
        match version {
            SchemaVersion::Committed => self.committed.get(key),
            SchemaVersion::Proposed => self
                .proposed
                .as_ref()
                .and_then(|diff| diff.get(key))
                .and_then(Option::as_ref),
            SchemaVersion::Recent => match self.proposed.as_ref().and_then(|diff| diff.get(key)) {
                Some(entry) => entry.as_ref(),
                None => self.committed.get(key),
            },
        }
    }

    pub fn contains(&self, key: &str, version: SchemaVersion) -> bool {
        self.get(key, version).is_some()
    }

    /// Write `value` into the proposed overlay, opening it if needed.
    pub fn set(&mut self, key: impl Into<CompactString>, value: AttributeValue) {
        self.start_changes().set(key, value);
    }

    /// Record the removal of `key` in the proposed overlay.
    pub fn remove(&mut self, key: impl Into<CompactString>) {
        self.start_changes().remove(key);
    }

    /// Open the proposed overlay (idempotent) and return it.
    pub fn start_changes(&mut self) -> &mut MetadataDiff {
        self.proposed.get_or_insert_with(MetadataDiff::default)
    }

    pub fn has_changes(&self) -> bool {
        self.proposed.is_some()
    }

    pub fn changes(&self) -> Option<&MetadataDiff> {
        self.proposed.as_ref()
    }

    /// Close the overlay, handing it to the caller.
    pub fn take_changes(&mut self) -> Option<MetadataDiff> {
        self.proposed.take()
    }

    /// Merge `diff` into the committed map.
    pub fn apply_changes(&mut self, diff: MetadataDiff) {
        for (key, value) in diff.entries {
            match value {
                Some(value) => {
                    self.committed.insert(key, value);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
    }

    /// Merge the overlay into the committed map and close it.
    pub fn commit(&mut self) {
        if let Some(diff) = self.take_changes() {
            self.apply_changes(diff);
        }
    }

    /// Discard the overlay.
    pub fn rollback(&mut self) {
        self.proposed = None;
    }

    /// Deep copy of one view, with no overlay of its own.
    pub fn clone_version(&self, version: SchemaVersion) -> MetadataDictionary {
        MetadataDictionary {
            committed: self
                .entries(version)
                .into_iter()
                .map(|(k, v)| (CompactString::from(k), v.clone()))
                .collect(),
            proposed: None,
        }
    }

    /// Resolved entries of one view, sorted by key.
    pub fn entries(&self, version: SchemaVersion) -> Vec<(&str, &AttributeValue)> {
        match version {
            SchemaVersion::Committed => self
                .committed
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            SchemaVersion::Proposed => self
                .proposed
                .iter()
                .flat_map(|diff| diff.iter())
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
            SchemaVersion::Recent => {
                let mut merged: BTreeMap<&str, &AttributeValue> = self
                    .committed
                    .iter()
                    .map(|(k, v)| (k.as_str(), v))
                    .collect();
                if let Some(diff) = &self.proposed {
                    for (key, value) in diff.iter() {
                        match value {
                            Some(value) => {
                                merged.insert(key, value);
                            }
                            None => {
                                merged.remove(key);
                            }
                        }
                    }
                }
                merged.into_iter().collect()
            }
        }
    }
}
