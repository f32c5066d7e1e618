//! Bounded, ordered sets of trait paths.
//!
//! A [`PathSet`] holds at most `capacity` records. Storage is reserved once
//! when the set is created and never grows; running out of room is an error,
//! not a resize.
//!
//! Records keep their insertion order (oldest first). Update payloads are
//! encoded in that order, so a path that was changed first is sent first.

use bitflags::bitflags;
use std::fmt;
use thiserror::Error;
use wdm_types::{TraitDataHandle, TraitPath};

use crate::schema::SchemaRef;

/// Error type for path set operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathSetError {
    /// Set is at capacity.
    #[error("path set full (capacity: {capacity})")]
    CapacityExceeded {
        /// Current set capacity.
        capacity: usize,
    },
}

bitflags! {
    /// Per-record flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PathFlags: u8 {
        /// Encode dictionaries under this path with merge semantics.
        const FORCE_MERGE = 1 << 0;
        /// Created internally to encode a dictionary on its own; reported to
        /// the application only on failure.
        const PRIVATE = 1 << 1;
        /// The update was issued against a known version.
        const CONDITIONAL = 1 << 2;
        /// Marked for purge; must not be reported as successful.
        const FAILED = 1 << 3;
        /// A notification touched this path while the update was outstanding.
        const POTENTIAL_DATA_LOSS = 1 << 4;
    }
}

/// One path tracked by a [`PathSet`].
#[derive(Clone)]
pub struct PathRecord {
    /// The path.
    pub path: TraitPath,
    /// Flags attached to it.
    pub flags: PathFlags,
    /// Schema of the path's trait, used for containment checks.
    pub schema: Option<SchemaRef>,
}

impl PathRecord {
    /// Create a new record.
    pub fn new(path: TraitPath, flags: PathFlags, schema: Option<SchemaRef>) -> Self {
        Self {
            path,
            flags,
            schema,
        }
    }

    /// Check whether this record's path is `other` or one of its ancestors.
    ///
    /// Without a schema only equality is known.
    pub fn includes(&self, other: &TraitPath) -> bool {
        if self.path.trait_handle != other.trait_handle {
            return false;
        }
        match &self.schema {
            Some(schema) => schema.is_ancestor_or_equal(self.path.property, other.property),
            None => self.path.property == other.property,
        }
    }

    /// Check whether this record's path overlaps `other` in either direction.
    pub fn intersects(&self, other: &TraitPath) -> bool {
        if self.path.trait_handle != other.trait_handle {
            return false;
        }
        match &self.schema {
            Some(schema) => schema.intersects(self.path.property, other.property),
            None => self.path.property == other.property,
        }
    }
}

// records compare by path and flags; the schema is not comparable
impl PartialEq for PathRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.flags == other.flags
    }
}

impl Eq for PathRecord {}

impl fmt::Debug for PathRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRecord")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("has_schema", &self.schema.is_some())
            .finish()
    }
}

/// Fixed-capacity ordered collection of [`PathRecord`]s.
///
/// Invariants:
/// - no two records share a `TraitPath` (adding a duplicate merges flags)
/// - records stay in insertion order; removal compacts the set
/// - the backing storage never grows past `capacity`
#[derive(Debug)]
pub struct PathSet {
    capacity: usize,
    records: Vec<PathRecord>,
}

impl PathSet {
    /// Create an empty set that can hold `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
        }
    }

    /// Add a path, or merge `flags` into the record already holding it.
    ///
    /// Returns an error if the path is new and the set is full; the set is
    /// left unchanged in that case.
    pub fn add(
        &mut self,
        path: TraitPath,
        flags: PathFlags,
        schema: Option<SchemaRef>,
    ) -> Result<(), PathSetError> {
        self.add_record(PathRecord::new(path, flags, schema))
    }

    /// Add a record, merging into an existing record with the same path.
    pub fn add_record(&mut self, record: PathRecord) -> Result<(), PathSetError> {
        if let Some(existing) = self.records.iter_mut().find(|r| r.path == record.path) {
            existing.flags |= record.flags;
            if existing.schema.is_none() {
                existing.schema = record.schema;
            }
            return Ok(());
        }
        if self.is_full() {
            return Err(PathSetError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Insert a record at `index`, shifting later records back.
    ///
    /// Used to place engine-created records right after the record they were
    /// derived from.
    pub fn insert_at(&mut self, index: usize, record: PathRecord) -> Result<(), PathSetError> {
        if let Some(existing) = self.records.iter_mut().find(|r| r.path == record.path) {
            existing.flags |= record.flags;
            return Ok(());
        }
        if self.is_full() {
            return Err(PathSetError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let index = index.min(self.records.len());
        self.records.insert(index, record);
        Ok(())
    }

    /// Position of the record holding exactly `path`.
    pub fn position(&self, path: &TraitPath) -> Option<usize> {
        self.records.iter().position(|r| r.path == *path)
    }

    /// Check whether a record holds exactly `path`.
    pub fn is_present(&self, path: &TraitPath) -> bool {
        self.position(path).is_some()
    }

    /// Check whether some record's path contains `path`.
    pub fn includes(&self, path: &TraitPath) -> bool {
        self.records.iter().any(|r| r.includes(path))
    }

    /// Check whether some record's path overlaps `path`.
    pub fn intersects(&self, path: &TraitPath) -> bool {
        self.records.iter().any(|r| r.intersects(path))
    }

    /// Check whether any record belongs to the given trait.
    pub fn has_trait(&self, trait_handle: TraitDataHandle) -> bool {
        self.records.iter().any(|r| r.path.trait_handle == trait_handle)
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<&PathRecord> {
        self.records.get(index)
    }

    /// Mutable record at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PathRecord> {
        self.records.get_mut(index)
    }

    /// Remove and return the record at `index`, compacting the set.
    pub fn remove_at(&mut self, index: usize) -> Option<PathRecord> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }

    /// Remove and return the record holding exactly `path`.
    pub fn remove(&mut self, path: &TraitPath) -> Option<PathRecord> {
        let index = self.position(path)?;
        self.remove_at(index)
    }

    /// Remove every record matching `predicate`, returning them in order.
    pub fn drain_where<F>(&mut self, mut predicate: F) -> Vec<PathRecord>
    where
        F: FnMut(&PathRecord) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.records.len() {
            if predicate(&self.records[index]) {
                removed.push(self.records.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Set `flags` on every record matching `predicate`; returns how many.
    pub fn flag_where<F>(&mut self, flags: PathFlags, mut predicate: F) -> usize
    where
        F: FnMut(&PathRecord) -> bool,
    {
        let mut count = 0;
        for record in self.records.iter_mut().filter(|r| predicate(r)) {
            record.flags |= flags;
            count += 1;
        }
        count
    }

    /// Remove and return the oldest record.
    pub fn pop_front(&mut self) -> Option<PathRecord> {
        self.remove_at(0)
    }

    /// Iterate records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PathRecord> {
        self.records.iter()
    }

    /// Iterate records mutably, oldest first.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PathRecord> {
        self.records.iter_mut()
    }

    /// Paths in order, for inspection and logging.
    pub fn paths(&self) -> Vec<TraitPath> {
        self.records.iter().map(|r| r.path).collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check if the set is full.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records that can still be added.
    pub fn remaining(&self) -> usize {
        self.capacity - self.records.len()
    }

    /// Remove all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
