//! Packing in-progress paths into size-bounded update payloads.
//!
//! Every payload is formed from the start of the in-progress set, oldest
//! record first, and holds as many elements as fit the budget. A dictionary
//! that does not fit as the first element of a payload is split across
//! payloads: the first chunk replaces the dictionary, later chunks merge into
//! it. The split position is kept in [`UpdateRequestContext`].
//!
//! A non-dictionary path with dictionaries below it is encoded without them;
//! each such dictionary gets its own engine-private, force-merge record right
//! after the path ("dictionary cut"), so it can be split like any other
//! dictionary.

use thiserror::Error;
use wdm_types::{
    DataVersion, ElementValue, PropertyDictionaryKey, PropertyPathHandle, TraitDataHandle,
    TraitPath, UpdateElement, UpdateRequest,
};

use crate::path_set::{PathFlags, PathRecord, PathSet};
use crate::schema::SchemaRef;
use crate::update::UpdateRequestContext;

/// Budget used when the configured maximum update size is 0.
pub const DEFAULT_MAX_UPDATE_SIZE: usize = 65_535;

/// Error type for payload formation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The path cannot be encoded within the budget even on its own.
    #[error("{path} does not fit in an update of {budget} bytes")]
    PayloadTooLarge {
        /// The offending path.
        path: TraitPath,
        /// The payload budget.
        budget: usize,
    },

    /// The data sink could not provide the value.
    #[error("cannot read {path}: {reason}")]
    Sink {
        /// The path being read.
        path: TraitPath,
        /// Why the read failed.
        reason: String,
    },

    /// The request could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// Local values to encode into update elements.
pub trait ElementSource {
    /// Encoded value of the sub-tree at `path`, leaving out the properties in
    /// `excluded` (dictionaries that are sent as records of their own).
    fn read_leaf(
        &self,
        path: &TraitPath,
        excluded: &[PropertyPathHandle],
    ) -> Result<Vec<u8>, BatchError>;

    /// Keys currently present in the dictionary at `path`.
    fn dictionary_keys(&self, path: &TraitPath) -> Result<Vec<PropertyDictionaryKey>, BatchError>;

    /// Version a conditional update of the trait is made against.
    fn required_version(&self, trait_handle: TraitDataHandle) -> Option<DataVersion>;
}

/// One formed update payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// The request to send.
    pub request: UpdateRequest,
    /// In-progress record each element of `request` was read from.
    pub element_paths: Vec<TraitPath>,
    /// Records whose value is entirely contained in this payload.
    pub completed: Vec<TraitPath>,
    /// Records removed from the in-progress set because they cannot be
    /// encoded. Engine-private records appear here too.
    pub rejected: Vec<(PathRecord, BatchError)>,
}

impl Payload {
    /// Check whether the payload carries no element.
    pub fn is_empty(&self) -> bool {
        self.request.elements.is_empty()
    }
}

enum Encoded {
    Complete,
    Partial(usize),
    NoRoom,
    Rejected(BatchError),
}

/// Resolve the configured maximum update size.
pub fn effective_max_update_size(max_update_size: usize) -> usize {
    if max_update_size == 0 {
        DEFAULT_MAX_UPDATE_SIZE
    } else {
        max_update_size
    }
}

/// Encode the leading records of `in_progress` into one payload.
///
/// Records that cannot be encoded at all are removed from `in_progress` and
/// returned in [`Payload::rejected`]; `FAILED` records are skipped. The
/// context is advanced so the next call continues where this one stopped,
/// once the completed records have been acknowledged.
pub fn form_payload(
    in_progress: &mut PathSet,
    context: &mut UpdateRequestContext,
    source: &dyn ElementSource,
    max_update_size: usize,
) -> Result<Payload, BatchError> {
    let budget = effective_max_update_size(max_update_size);
    if !context.is_partial_update {
        context.update_request_index = context.update_request_index.wrapping_add(1);
    }

    let mut payload = Payload {
        request: UpdateRequest {
            update_request_index: context.update_request_index,
            is_partial: false,
            elements: Vec::new(),
        },
        element_paths: Vec::new(),
        completed: Vec::new(),
        rejected: Vec::new(),
    };
    let mut resume = context.next_dictionary_element.take();
    let mut index = 0;

    while let Some(record) = in_progress.get(index).cloned() {
        if record.flags.contains(PathFlags::FAILED) {
            index += 1;
            continue;
        }
        let start = resume.take().unwrap_or(0);
        let required_version = if record.flags.contains(PathFlags::CONDITIONAL) {
            source.required_version(record.path.trait_handle)
        } else {
            None
        };
        let element_count = payload.request.elements.len();

        let outcome = match &record.schema {
            Some(schema) if schema.is_dictionary(record.path.property) => encode_dictionary(
                &mut payload.request,
                &record,
                schema,
                source,
                required_version,
                start,
                budget,
            )?,
            _ => {
                let excluded = cut_dictionaries(in_progress, index, &record);
                encode_leaf(
                    &mut payload.request,
                    &record,
                    &excluded,
                    source,
                    required_version,
                    budget,
                )?
            }
        };

        for _ in element_count..payload.request.elements.len() {
            payload.element_paths.push(record.path);
        }
        match outcome {
            Encoded::Complete => {
                payload.completed.push(record.path);
                index += 1;
            }
            Encoded::Partial(next) => {
                context.next_dictionary_element = Some(next);
                break;
            }
            Encoded::NoRoom => break,
            Encoded::Rejected(err) => {
                if let Some(removed) = in_progress.remove_at(index) {
                    let private_children = in_progress.drain_where(|r| {
                        !removed.flags.contains(PathFlags::PRIVATE)
                            && r.flags.contains(PathFlags::PRIVATE)
                            && removed.includes(&r.path)
                    });
                    payload.rejected.push((removed, err.clone()));
                    payload
                        .rejected
                        .extend(private_children.into_iter().map(|r| (r, err.clone())));
                }
            }
        }
    }

    context.item_in_progress = index;
    let more = in_progress
        .iter()
        .skip(index)
        .any(|r| !r.flags.contains(PathFlags::FAILED));
    payload.request.is_partial = more;
    context.is_partial_update = more;
    Ok(payload)
}

/// Insert private records for the dictionaries below a non-dictionary path.
///
/// Returns the dictionaries that now have a record of their own. If the set
/// is full a dictionary stays part of its parent's value.
fn cut_dictionaries(
    in_progress: &mut PathSet,
    index: usize,
    record: &PathRecord,
) -> Vec<PropertyPathHandle> {
    let Some(schema) = &record.schema else {
        return Vec::new();
    };
    if record.flags.contains(PathFlags::PRIVATE) {
        return Vec::new();
    }
    let mut flags = PathFlags::PRIVATE | PathFlags::FORCE_MERGE;
    if record.flags.contains(PathFlags::CONDITIONAL) {
        flags |= PathFlags::CONDITIONAL;
    }

    let mut excluded = Vec::new();
    for (offset, dictionary) in schema.dictionaries_under(record.path.property).into_iter().enumerate() {
        let path = TraitPath::new(record.path.trait_handle, dictionary);
        let private = PathRecord::new(path, flags, Some(schema.clone()));
        if in_progress.insert_at(index + 1 + offset, private).is_ok() {
            excluded.push(dictionary);
        }
    }
    excluded
}

fn fits(request: &UpdateRequest, budget: usize) -> Result<bool, BatchError> {
    request
        .encoded_len()
        .map(|len| len <= budget)
        .map_err(|e| BatchError::Encoding(e.to_string()))
}

fn encode_leaf(
    request: &mut UpdateRequest,
    record: &PathRecord,
    excluded: &[PropertyPathHandle],
    source: &dyn ElementSource,
    required_version: Option<DataVersion>,
    budget: usize,
) -> Result<Encoded, BatchError> {
    let value = match source.read_leaf(&record.path, excluded) {
        Ok(value) => value,
        Err(err) => return Ok(Encoded::Rejected(err)),
    };
    let first = request.elements.is_empty();
    request.elements.push(UpdateElement {
        path: record.path,
        required_version,
        merge: false,
        value: ElementValue::Encoded(value),
    });
    if fits(request, budget)? {
        return Ok(Encoded::Complete);
    }
    request.elements.pop();
    if first {
        Ok(Encoded::Rejected(BatchError::PayloadTooLarge {
            path: record.path,
            budget,
        }))
    } else {
        Ok(Encoded::NoRoom)
    }
}

fn encode_dictionary(
    request: &mut UpdateRequest,
    record: &PathRecord,
    schema: &SchemaRef,
    source: &dyn ElementSource,
    required_version: Option<DataVersion>,
    start: usize,
    budget: usize,
) -> Result<Encoded, BatchError> {
    let keys = match source.dictionary_keys(&record.path) {
        Ok(keys) => keys,
        Err(err) => return Ok(Encoded::Rejected(err)),
    };
    let start = start.min(keys.len());

    let mut items = Vec::with_capacity(keys.len() - start);
    for &key in &keys[start..] {
        let Some(element) = schema.dictionary_element(record.path.property, key) else {
            return Ok(Encoded::Rejected(BatchError::Sink {
                path: record.path,
                reason: format!("no element schema for key {}", key),
            }));
        };
        let element_path = TraitPath::new(record.path.trait_handle, element);
        match source.read_leaf(&element_path, &[]) {
            Ok(value) => items.push((key, value)),
            Err(err) => return Ok(Encoded::Rejected(err)),
        }
    }

    let first = request.elements.is_empty();
    let element = |items: Vec<(PropertyDictionaryKey, Vec<u8>)>| UpdateElement {
        path: record.path,
        required_version,
        merge: start > 0 || record.flags.contains(PathFlags::FORCE_MERGE),
        value: ElementValue::Dictionary(items),
    };

    request.elements.push(element(items.clone()));
    if fits(request, budget)? {
        return Ok(Encoded::Complete);
    }
    request.elements.pop();
    if !first {
        return Ok(Encoded::NoRoom);
    }

    let mut fitted = 0;
    for count in 1..items.len() {
        request.elements.push(element(items[..count].to_vec()));
        let ok = fits(request, budget)?;
        request.elements.pop();
        if !ok {
            break;
        }
        fitted = count;
    }
    if fitted == 0 {
        return Ok(Encoded::Rejected(BatchError::PayloadTooLarge {
            path: record.path,
            budget,
        }));
    }
    items.truncate(fitted);
    request.elements.push(element(items));
    Ok(Encoded::Partial(start + fitted))
}
