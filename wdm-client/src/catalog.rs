//! Data sinks and the catalog that indexes them.
//!
//! A data sink stores the local copy of one trait instance and knows its
//! version. Sinks are shared with the application, so every method takes
//! `&self`; implementations use interior mutability.
//!
//! [`MemoryCatalog`] and [`MemorySink`] keep values in memory. They are
//! complete implementations, used by the tests and suitable for hosts that
//! keep trait data in RAM.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use wdm_core::SchemaRef;
use wdm_types::{
    DataVersion, ElementValue, PropertyDictionaryKey, PropertyPathHandle, TraitDataHandle,
};

/// Data sink errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink does not accept local changes.
    #[error("sink is not updatable")]
    NotUpdatable,

    /// No value is stored at the property.
    #[error("no value at {0:?}")]
    Missing(PropertyPathHandle),

    /// The value could not be applied.
    #[error("rejected value for {property:?}: {reason}")]
    Rejected {
        /// The property.
        property: PropertyPathHandle,
        /// Why.
        reason: String,
    },
}

/// Local store of one trait instance.
pub trait DataSink: Send + Sync {
    /// Schema of the trait.
    fn schema(&self) -> SchemaRef;

    /// Version of the local copy, if known.
    fn version(&self) -> Option<DataVersion>;

    /// Set the version of the local copy.
    fn set_version(&self, version: DataVersion);

    /// Forget the version, forcing a full refetch on the next subscribe.
    fn clear_version(&self);

    /// Apply a value received in a notification.
    fn apply_notified(
        &self,
        property: PropertyPathHandle,
        value: &ElementValue,
    ) -> Result<(), SinkError>;

    /// The subscription ended; no more data will arrive until the next one.
    fn on_subscription_terminated(&self) {}

    /// Whether the application may change this trait through updates.
    fn is_updatable(&self) -> bool {
        false
    }

    /// Encoded value of the sub-tree at `property`, leaving out `excluded`.
    fn read_leaf(
        &self,
        property: PropertyPathHandle,
        excluded: &[PropertyPathHandle],
    ) -> Result<Vec<u8>, SinkError> {
        let _ = (property, excluded);
        Err(SinkError::NotUpdatable)
    }

    /// Keys present in the dictionary at `property`.
    fn dictionary_keys(
        &self,
        property: PropertyPathHandle,
    ) -> Result<Vec<PropertyDictionaryKey>, SinkError> {
        let _ = property;
        Err(SinkError::NotUpdatable)
    }
}

/// Shared sink handle.
pub type SinkRef = Arc<dyn DataSink>;

/// Index of the sinks a subscription covers.
pub trait TraitCatalog: Send + Sync {
    /// Visit every sink.
    fn for_each(&self, visit: &mut dyn FnMut(TraitDataHandle, &SinkRef));

    /// Sink for a handle.
    fn sink(&self, handle: TraitDataHandle) -> Option<SinkRef>;
}

/// Shared catalog handle.
pub type CatalogRef = Arc<dyn TraitCatalog>;

/// In-memory catalog.
#[derive(Default)]
pub struct MemoryCatalog {
    sinks: BTreeMap<TraitDataHandle, SinkRef>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink under a handle.
    pub fn insert(&mut self, handle: TraitDataHandle, sink: SinkRef) {
        self.sinks.insert(handle, sink);
    }

    /// Builder-style [`MemoryCatalog::insert`].
    pub fn with(mut self, handle: TraitDataHandle, sink: SinkRef) -> Self {
        self.insert(handle, sink);
        self
    }
}

impl TraitCatalog for MemoryCatalog {
    fn for_each(&self, visit: &mut dyn FnMut(TraitDataHandle, &SinkRef)) {
        for (handle, sink) in &self.sinks {
            visit(*handle, sink);
        }
    }

    fn sink(&self, handle: TraitDataHandle) -> Option<SinkRef> {
        self.sinks.get(&handle).cloned()
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    version: Option<DataVersion>,
    values: HashMap<PropertyPathHandle, Vec<u8>>,
    notified: Vec<PropertyPathHandle>,
    terminations: usize,
}

/// In-memory sink.
///
/// Values are stored per property handle. Dictionary elements are stored
/// under their element handles, so a dictionary's keys are the keys of the
/// stored element handles.
pub struct MemorySink {
    schema: SchemaRef,
    updatable: bool,
    state: Mutex<MemorySinkState>,
}

impl MemorySink {
    /// Create a read-only sink.
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            updatable: false,
            state: Mutex::default(),
        }
    }

    /// Create a sink the application may update.
    pub fn updatable(schema: SchemaRef) -> Self {
        Self {
            updatable: true,
            ..Self::new(schema)
        }
    }

    fn state(&self) -> MutexGuard<'_, MemorySinkState> {
        // a poisoned lock only means a panic elsewhere; the map is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a local value.
    pub fn set_value(&self, property: PropertyPathHandle, value: Vec<u8>) {
        self.state().values.insert(property, value);
    }

    /// Read a stored value.
    pub fn value(&self, property: PropertyPathHandle) -> Option<Vec<u8>> {
        self.state().values.get(&property).cloned()
    }

    /// Remove a stored value.
    pub fn remove_value(&self, property: PropertyPathHandle) {
        self.state().values.remove(&property);
    }

    /// Properties changed by notifications, in arrival order.
    pub fn notified(&self) -> Vec<PropertyPathHandle> {
        self.state().notified.clone()
    }

    /// Number of subscription terminations seen.
    pub fn terminations(&self) -> usize {
        self.state().terminations
    }

    fn element_schema(&self, dictionary: PropertyPathHandle) -> Option<u16> {
        self.schema
            .dictionary_element(dictionary, 0)
            .map(|element| element.schema_handle())
    }
}

impl DataSink for MemorySink {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn version(&self) -> Option<DataVersion> {
        self.state().version
    }

    fn set_version(&self, version: DataVersion) {
        self.state().version = Some(version);
    }

    fn clear_version(&self) {
        self.state().version = None;
    }

    fn apply_notified(
        &self,
        property: PropertyPathHandle,
        value: &ElementValue,
    ) -> Result<(), SinkError> {
        match value {
            ElementValue::Encoded(bytes) => {
                let mut state = self.state();
                state.values.insert(property, bytes.clone());
                state.notified.push(property);
            }
            ElementValue::Dictionary(items) => {
                let element = self.element_schema(property).ok_or(SinkError::Rejected {
                    property,
                    reason: "not a dictionary".into(),
                })?;
                let mut state = self.state();
                state.values.retain(|handle, _| handle.schema_handle() != element);
                for (key, bytes) in items {
                    state
                        .values
                        .insert(PropertyPathHandle::new(element, *key), bytes.clone());
                }
                state.notified.push(property);
            }
        }
        Ok(())
    }

    fn on_subscription_terminated(&self) {
        self.state().terminations += 1;
    }

    fn is_updatable(&self) -> bool {
        self.updatable
    }

    fn read_leaf(
        &self,
        property: PropertyPathHandle,
        _excluded: &[PropertyPathHandle],
    ) -> Result<Vec<u8>, SinkError> {
        if !self.updatable {
            return Err(SinkError::NotUpdatable);
        }
        self.value(property).ok_or(SinkError::Missing(property))
    }

    fn dictionary_keys(
        &self,
        property: PropertyPathHandle,
    ) -> Result<Vec<PropertyDictionaryKey>, SinkError> {
        if !self.updatable {
            return Err(SinkError::NotUpdatable);
        }
        let element = self.element_schema(property).ok_or(SinkError::Rejected {
            property,
            reason: "not a dictionary".into(),
        })?;
        let mut keys: Vec<_> = self
            .state()
            .values
            .keys()
            .filter(|handle| handle.schema_handle() == element)
            .map(|handle| handle.dictionary_key())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }
}
