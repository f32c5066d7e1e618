//! Update bookkeeping: the pending and in-progress path sets.
//!
//! Paths the application has changed locally wait in the **pending** set.
//! When an update is formed, leading pending records move to the
//! **in-progress** set and are encoded from there. A record is acknowledged
//! out of the in-progress set, restored to pending for a retry, or marked
//! `FAILED` and purged.
//!
//! Purging of in-progress records is deferred while a payload is in flight:
//! the element-to-record mapping of the outstanding payload must stay valid
//! until its response has been processed.

use thiserror::Error;
use wdm_types::{TraitDataHandle, TraitPath};

use crate::path_set::{PathFlags, PathRecord, PathSet, PathSetError};
use crate::schema::SchemaRef;

/// Error type for update bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// A path set ran out of room.
    #[error(transparent)]
    Capacity(#[from] PathSetError),

    /// Conditional and unconditional changes mixed on one trait.
    #[error("inconsistent conditionality for trait {trait_handle}")]
    InconsistentConditionality {
        /// The trait the changes belong to.
        trait_handle: TraitDataHandle,
    },

    /// Operation not allowed while a payload is outstanding.
    #[error("update payload in flight")]
    PayloadInFlight,
}

/// Lifecycle of the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingSetState {
    /// Nothing pending.
    #[default]
    Empty,
    /// Paths are being added; not yet flushed.
    Open,
    /// Flushed; may be sent as soon as the subscription allows.
    Ready,
}

/// Resumable cursor for a logical update spanning several payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateRequestContext {
    /// In-progress item the encoder stopped at.
    pub item_in_progress: usize,
    /// Index of the next dictionary element to encode for that item, when a
    /// dictionary was split across payloads.
    pub next_dictionary_element: Option<usize>,
    /// Sequence number of the current logical update.
    pub update_request_index: u32,
    /// More payloads of the current logical update follow.
    pub is_partial_update: bool,
}

impl UpdateRequestContext {
    /// Forget the resume position, keeping the request index.
    pub fn rewind(&mut self) {
        self.item_in_progress = 0;
        self.next_dictionary_element = None;
        self.is_partial_update = false;
    }
}

/// The two update path sets and their shared state.
#[derive(Debug)]
pub struct UpdateSets {
    pending: PathSet,
    in_progress: PathSet,
    pending_state: PendingSetState,
    context: UpdateRequestContext,
    in_flight: bool,
}

impl UpdateSets {
    /// Create empty sets, each holding up to `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: PathSet::new(capacity),
            in_progress: PathSet::new(capacity),
            pending_state: PendingSetState::Empty,
            context: UpdateRequestContext::default(),
            in_flight: false,
        }
    }

    /// The pending set.
    pub fn pending(&self) -> &PathSet {
        &self.pending
    }

    /// The in-progress set.
    pub fn in_progress(&self) -> &PathSet {
        &self.in_progress
    }

    /// Mutable in-progress set, for the batcher.
    pub fn in_progress_mut(&mut self) -> &mut PathSet {
        &mut self.in_progress
    }

    /// Current pending-set state.
    pub fn pending_state(&self) -> PendingSetState {
        self.pending_state
    }

    /// Mark the pending set ready to send. No-op when empty.
    pub fn mark_ready(&mut self) {
        if !self.pending.is_empty() {
            self.pending_state = PendingSetState::Ready;
        }
    }

    /// The resumable request context.
    pub fn context(&self) -> &UpdateRequestContext {
        &self.context
    }

    /// Mutable request context, for the batcher.
    pub fn context_mut(&mut self) -> &mut UpdateRequestContext {
        &mut self.context
    }

    /// The in-progress set together with the request context.
    pub fn batch_parts(&mut self) -> (&mut PathSet, &mut UpdateRequestContext) {
        (&mut self.in_progress, &mut self.context)
    }

    /// Check whether an update payload is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Record that a payload was sent or its outcome processed.
    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Check whether both sets are empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }

    /// Check whether any record of the trait is pending or in progress.
    pub fn has_trait(&self, trait_handle: TraitDataHandle) -> bool {
        self.pending.has_trait(trait_handle) || self.in_progress.has_trait(trait_handle)
    }

    /// Add a locally changed path to the pending set.
    ///
    /// A path already covered by a pending ancestor is merged into that
    /// ancestor. Pending descendants of a new path are subsumed by it. All
    /// changes to one trait must agree on conditionality; a mismatch is
    /// rejected before anything is modified.
    pub fn add_pending_path(
        &mut self,
        path: TraitPath,
        schema: Option<SchemaRef>,
        conditional: bool,
    ) -> Result<(), UpdateError> {
        if self.conditionality_of(path.trait_handle)
            .is_some_and(|existing| existing != conditional)
        {
            return Err(UpdateError::InconsistentConditionality {
                trait_handle: path.trait_handle,
            });
        }

        let flags = if conditional {
            PathFlags::CONDITIONAL
        } else {
            PathFlags::empty()
        };
        let record = PathRecord::new(path, flags, schema);

        if let Some(ancestor) = self
            .pending
            .iter_mut()
            .find(|r| !r.flags.contains(PathFlags::PRIVATE) && r.includes(&path))
        {
            ancestor.flags |= flags;
            self.pending_state = self.pending_state.max_open();
            return Ok(());
        }

        // removing descendants only frees room, so check capacity first to
        // leave the set unchanged on failure
        let subsumed = self
            .pending
            .iter()
            .filter(|r| record.includes(&r.path))
            .count();
        if subsumed == 0 && self.pending.is_full() {
            return Err(PathSetError::CapacityExceeded {
                capacity: self.pending.capacity(),
            }
            .into());
        }
        self.pending.drain_where(|r| record.includes(&r.path));
        self.pending.add_record(record)?;
        self.pending_state = self.pending_state.max_open();
        Ok(())
    }

    fn conditionality_of(&self, trait_handle: TraitDataHandle) -> Option<bool> {
        self.pending
            .iter()
            .chain(self.in_progress.iter())
            .find(|r| r.path.trait_handle == trait_handle && !r.flags.contains(PathFlags::PRIVATE))
            .map(|r| r.flags.contains(PathFlags::CONDITIONAL))
    }

    /// Move leading pending records into the in-progress set while it has
    /// room. Returns how many records moved.
    pub fn move_pending_to_in_progress(&mut self) -> Result<usize, UpdateError> {
        if self.in_flight {
            return Err(UpdateError::PayloadInFlight);
        }
        let mut moved = 0;
        while !self.in_progress.is_full() {
            let Some(record) = self.pending.pop_front() else {
                break;
            };
            self.in_progress.add_record(record)?;
            moved += 1;
        }
        if self.pending.is_empty() {
            self.pending_state = PendingSetState::Empty;
        }
        Ok(moved)
    }

    /// Restore un-acknowledged in-progress records to the front of pending.
    ///
    /// Restored records keep their order and precede every newer pending
    /// record; a pending duplicate is merged into the restored record. Fails
    /// without changing either set if the result would not fit.
    pub fn move_in_progress_to_pending(&mut self) -> Result<(), UpdateError> {
        if self.in_progress.is_empty() {
            return Ok(());
        }
        let newer = self
            .pending
            .iter()
            .filter(|r| !self.in_progress.is_present(&r.path))
            .count();
        let total = self.in_progress.len() + newer;
        if total > self.pending.capacity() {
            return Err(PathSetError::CapacityExceeded {
                capacity: self.pending.capacity(),
            }
            .into());
        }

        let mut restored = PathSet::new(self.pending.capacity());
        while let Some(record) = self.in_progress.pop_front() {
            restored.add_record(record)?;
        }
        while let Some(record) = self.pending.pop_front() {
            restored.add_record(record)?;
        }
        self.pending = restored;
        self.pending_state = PendingSetState::Ready;
        self.context.rewind();
        Ok(())
    }

    /// Remove an acknowledged in-progress record.
    pub fn acknowledge(&mut self, path: &TraitPath) -> Option<PathRecord> {
        self.in_progress.remove(path)
    }

    /// Mark every record of `trait_handle`, in both sets, `FAILED`.
    pub fn mark_failed(&mut self, trait_handle: TraitDataHandle) -> usize {
        let on_trait = |r: &PathRecord| r.path.trait_handle == trait_handle;
        self.pending.flag_where(PathFlags::FAILED, on_trait)
            + self.in_progress.flag_where(PathFlags::FAILED, on_trait)
    }

    /// Mark one in-progress record `FAILED`.
    pub fn mark_in_progress_failed(&mut self, path: &TraitPath) -> bool {
        self.in_progress.flag_where(PathFlags::FAILED, |r| r.path == *path) > 0
    }

    /// Remove and return every `FAILED` record.
    ///
    /// In-progress records are left in place while a payload is in flight;
    /// they are returned by the first call after the response.
    pub fn take_failed(&mut self) -> Vec<PathRecord> {
        let failed = |r: &PathRecord| r.flags.contains(PathFlags::FAILED);
        let mut removed = Vec::new();
        if !self.in_flight {
            removed.extend(self.in_progress.drain_where(failed));
        }
        removed.extend(self.pending.drain_where(failed));
        if self.pending.is_empty() {
            self.pending_state = PendingSetState::Empty;
        }
        if self.in_progress.is_empty() {
            self.context.rewind();
        }
        removed
    }

    /// Flag records overlapping a notified path as `POTENTIAL_DATA_LOSS`.
    ///
    /// Returns whether any record was flagged.
    pub fn flag_potential_data_loss(&mut self, notified: &TraitPath) -> bool {
        let overlaps = |r: &PathRecord| r.intersects(notified);
        let flagged = self.pending.flag_where(PathFlags::POTENTIAL_DATA_LOSS, overlaps)
            + self.in_progress.flag_where(PathFlags::POTENTIAL_DATA_LOSS, overlaps);
        flagged > 0
    }

    /// Drop all state silently.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_progress.clear();
        self.pending_state = PendingSetState::Empty;
        self.context = UpdateRequestContext::default();
        self.in_flight = false;
    }

    /// Remove and return every record, in-progress first.
    pub fn drain_all(&mut self) -> Vec<PathRecord> {
        let mut all = self.in_progress.drain_where(|_| true);
        all.extend(self.pending.drain_where(|_| true));
        self.clear();
        all
    }
}

impl PendingSetState {
    fn max_open(self) -> Self {
        match self {
            PendingSetState::Empty => PendingSetState::Open,
            other => other,
        }
    }
}
