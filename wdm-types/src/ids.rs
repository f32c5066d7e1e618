//! Identity and addressing types for the WDM protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Local handle of a trait instance in a data catalog.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraitDataHandle(pub u16);

impl fmt::Debug for TraitDataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tdh({})", self.0)
    }
}

impl fmt::Display for TraitDataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a property in a trait schema.
pub type PropertySchemaHandle = u16;

/// Key of one element of a dictionary-valued property.
pub type PropertyDictionaryKey = u16;

/// Handle of a property instance: a schema handle plus, for properties at or
/// under a dictionary element, the element's key.
///
/// Layout: `(dictionary_key << 16) | schema_handle`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertyPathHandle(u32);

impl PropertyPathHandle {
    /// The null handle; never names a property.
    pub const NULL: Self = Self(0);

    /// The root of every trait schema.
    pub const ROOT: Self = Self(1);

    /// Build a handle from a schema handle and a dictionary key.
    pub const fn new(schema: PropertySchemaHandle, key: PropertyDictionaryKey) -> Self {
        Self(((key as u32) << 16) | schema as u32)
    }

    /// Build a handle for a property outside any dictionary.
    pub const fn from_schema(schema: PropertySchemaHandle) -> Self {
        Self::new(schema, 0)
    }

    /// The schema handle part.
    pub const fn schema_handle(&self) -> PropertySchemaHandle {
        (self.0 & 0xFFFF) as PropertySchemaHandle
    }

    /// The dictionary key part (0 outside dictionaries).
    pub const fn dictionary_key(&self) -> PropertyDictionaryKey {
        (self.0 >> 16) as PropertyDictionaryKey
    }

    /// The raw handle value.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Check whether this is the null handle.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Check whether this is the root handle.
    pub const fn is_root(&self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl fmt::Debug for PropertyPathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dictionary_key() == 0 {
            write!(f, "Pph({})", self.schema_handle())
        } else {
            write!(f, "Pph({}[{}])", self.schema_handle(), self.dictionary_key())
        }
    }
}

/// One addressable property (or sub-tree) inside one trait instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitPath {
    /// The trait instance.
    pub trait_handle: TraitDataHandle,
    /// The property inside it.
    pub property: PropertyPathHandle,
}

impl TraitPath {
    /// Create a new path.
    pub const fn new(trait_handle: TraitDataHandle, property: PropertyPathHandle) -> Self {
        Self {
            trait_handle,
            property,
        }
    }

    /// The path naming a whole trait instance.
    pub const fn root(trait_handle: TraitDataHandle) -> Self {
        Self::new(trait_handle, PropertyPathHandle::ROOT)
    }
}

impl fmt::Display for TraitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.trait_handle, self.property)
    }
}

/// A path together with the version range the subscriber already holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTraitPath {
    /// The requested path.
    pub path: TraitPath,
    /// Version the subscriber holds, if any.
    pub requested_version: Option<DataVersion>,
}

/// Identifier assigned to a subscription by the publisher.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({:#x})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Version of a trait instance as published by its owner.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct DataVersion(pub u64);

impl DataVersion {
    /// The version that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataVersion({:#x})", self.0)
    }
}

/// Identity of one exchange allocated from a binding.
///
/// Identities are never reused by a binding, so a callback carrying an old
/// identity can be recognized as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub u32);
