//! Trait schema: the property tree behind a trait instance.
//!
//! Paths are compared by equality and by containment. Containment needs the
//! tree: a path contains another if it is the same property or one of its
//! ancestors. A path naming a dictionary contains every element under it,
//! whatever the element's key.

use std::fmt;
use std::sync::Arc;
use wdm_types::{PropertyDictionaryKey, PropertyPathHandle, PropertySchemaHandle};

/// Shared reference to a schema, held by path records.
pub type SchemaRef = Arc<dyn SchemaEngine>;

/// Read-only view of one trait's property tree.
pub trait SchemaEngine: Send + Sync + fmt::Debug {
    /// Parent of a property, or `None` for the root and unknown handles.
    fn parent(&self, handle: PropertyPathHandle) -> Option<PropertyPathHandle>;

    /// Check whether the property is a dictionary.
    fn is_dictionary(&self, handle: PropertyPathHandle) -> bool;

    /// Handle of the element with the given key inside a dictionary.
    fn dictionary_element(
        &self,
        dictionary: PropertyPathHandle,
        key: PropertyDictionaryKey,
    ) -> Option<PropertyPathHandle>;

    /// Dictionaries strictly below `handle` that are not inside another
    /// dictionary below it.
    fn dictionaries_under(&self, handle: PropertyPathHandle) -> Vec<PropertyPathHandle>;

    /// Check whether `ancestor` is `descendant` or one of its ancestors.
    fn is_ancestor_or_equal(
        &self,
        ancestor: PropertyPathHandle,
        descendant: PropertyPathHandle,
    ) -> bool {
        let mut current = Some(descendant);
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            current = self.parent(handle);
        }
        false
    }

    /// Check whether two properties overlap (one contains the other).
    fn intersects(&self, a: PropertyPathHandle, b: PropertyPathHandle) -> bool {
        self.is_ancestor_or_equal(a, b) || self.is_ancestor_or_equal(b, a)
    }
}

#[derive(Debug, Clone, Copy)]
struct PropertyInfo {
    parent: PropertySchemaHandle,
    is_dictionary: bool,
}

/// A schema described by a static table of properties.
///
/// Schema handle 1 is the root and is always present.
///
/// ```
/// use wdm_core::StaticSchema;
///
/// // root(1) -> a(2), b(3: dictionary) -> element(4) -> c(5)
/// let schema = StaticSchema::builder()
///     .property(2, 1)
///     .dictionary(3, 1)
///     .property(4, 3)
///     .property(5, 4)
///     .build();
/// assert_eq!(schema.len(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct StaticSchema {
    properties: Vec<Option<PropertyInfo>>,
}

impl StaticSchema {
    /// Start describing a schema.
    pub fn builder() -> StaticSchemaBuilder {
        StaticSchemaBuilder {
            properties: vec![
                None,
                Some(PropertyInfo {
                    parent: 0,
                    is_dictionary: false,
                }),
            ],
        }
    }

    /// Number of properties, including the root.
    pub fn len(&self) -> usize {
        self.properties.iter().filter(|p| p.is_some()).count()
    }

    /// A schema always has its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    fn info(&self, schema: PropertySchemaHandle) -> Option<PropertyInfo> {
        self.properties.get(schema as usize).copied().flatten()
    }

    fn is_strictly_under(&self, schema: PropertySchemaHandle, ancestor: PropertySchemaHandle) -> bool {
        let mut current = self.info(schema).map(|info| info.parent);
        while let Some(parent) = current {
            if parent == 0 {
                return false;
            }
            if parent == ancestor {
                return true;
            }
            current = self.info(parent).map(|info| info.parent);
        }
        false
    }

    fn has_dictionary_between(&self, schema: PropertySchemaHandle, ancestor: PropertySchemaHandle) -> bool {
        let mut current = self.info(schema).map(|info| info.parent);
        while let Some(parent) = current {
            if parent == ancestor || parent == 0 {
                return false;
            }
            if self.info(parent).is_some_and(|info| info.is_dictionary) {
                return true;
            }
            current = self.info(parent).map(|info| info.parent);
        }
        false
    }
}

impl SchemaEngine for StaticSchema {
    fn parent(&self, handle: PropertyPathHandle) -> Option<PropertyPathHandle> {
        let info = self.info(handle.schema_handle())?;
        if info.parent == 0 {
            return None;
        }
        let parent = self.info(info.parent)?;
        if parent.is_dictionary {
            Some(PropertyPathHandle::from_schema(info.parent))
        } else {
            Some(PropertyPathHandle::new(info.parent, handle.dictionary_key()))
        }
    }

    fn is_dictionary(&self, handle: PropertyPathHandle) -> bool {
        self.info(handle.schema_handle())
            .is_some_and(|info| info.is_dictionary)
    }

    fn dictionary_element(
        &self,
        dictionary: PropertyPathHandle,
        key: PropertyDictionaryKey,
    ) -> Option<PropertyPathHandle> {
        if !self.is_dictionary(dictionary) {
            return None;
        }
        let parent = dictionary.schema_handle();
        self.properties
            .iter()
            .enumerate()
            .find(|(_, info)| info.is_some_and(|info| info.parent == parent))
            .map(|(schema, _)| PropertyPathHandle::new(schema as PropertySchemaHandle, key))
    }

    fn dictionaries_under(&self, handle: PropertyPathHandle) -> Vec<PropertyPathHandle> {
        let ancestor = handle.schema_handle();
        self.properties
            .iter()
            .enumerate()
            .filter_map(|(schema, info)| {
                let schema = schema as PropertySchemaHandle;
                let info = (*info)?;
                (info.is_dictionary
                    && self.is_strictly_under(schema, ancestor)
                    && !self.has_dictionary_between(schema, ancestor))
                .then(|| PropertyPathHandle::new(schema, handle.dictionary_key()))
            })
            .collect()
    }
}

/// Builder for [`StaticSchema`].
#[derive(Debug)]
pub struct StaticSchemaBuilder {
    properties: Vec<Option<PropertyInfo>>,
}

impl StaticSchemaBuilder {
    /// Add a plain property under `parent`.
    pub fn property(self, schema: PropertySchemaHandle, parent: PropertySchemaHandle) -> Self {
        self.insert(schema, parent, false)
    }

    /// Add a dictionary property under `parent`.
    pub fn dictionary(self, schema: PropertySchemaHandle, parent: PropertySchemaHandle) -> Self {
        self.insert(schema, parent, true)
    }

    fn insert(mut self, schema: PropertySchemaHandle, parent: PropertySchemaHandle, is_dictionary: bool) -> Self {
        let index = schema as usize;
        if self.properties.len() <= index {
            self.properties.resize(index + 1, None);
        }
        self.properties[index] = Some(PropertyInfo {
            parent,
            is_dictionary,
        });
        self
    }

    /// Finish the schema.
    pub fn build(self) -> StaticSchema {
        StaticSchema {
            properties: self.properties,
        }
    }
}
