//! Member store backend abstraction.
//!
//! The backend is the persistent, eventually consistent side of a member
//! store (typically a search cluster). Writes return an [`IndexToken`] that
//! must be polled until the backend reports the write visible.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::member::value::Value;

/// Handle of an asynchronous write, used to poll for its visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexToken(pub u64);

impl fmt::Display for IndexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A member as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: Value,
    pub attributes: Vec<Option<Value>>,
}

impl MemberRecord {
    pub fn new(id: Value, attributes: Vec<Option<Value>>) -> Self {
        Self { id, attributes }
    }

    /// Case-insensitive substring match against the id and every attribute.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        self.id.to_string().to_lowercase().contains(needle)
            || self
                .attributes
                .iter()
                .flatten()
                .any(|v| v.to_string().to_lowercase().contains(needle))
    }
}

/// Ancestor or sibling selections, keyed by the axis key of the selected
/// dimension. A multi-dimensional slice used for cascading facet filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selections {
    entries: BTreeMap<String, Vec<Value>>,
}

impl Selections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selection on `axis_key`, replacing any previous one.
    pub fn select<K: Into<String>>(mut self, axis_key: K, values: Vec<Value>) -> Self {
        self.entries.insert(axis_key.into(), values);
        self
    }

    pub fn get(&self, axis_key: &str) -> Option<&[Value]> {
        self.entries.get(axis_key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Consumed interface of the persistent member index.
///
/// Every method is keyed by a store key (the axis key of the owning
/// dimension index). Correlations are keyed by the store key of the
/// hierarchy root that owns the mapping.
pub trait MemberStoreBackend: Send + Sync + fmt::Debug {
    /// Prepare the store for a query with the given signature.
    ///
    /// Returns `true` when the store already holds members indexed under the
    /// same signature and can be reused as is. A different signature resets
    /// the store.
    fn setup(&self, key: &str, signature: &str) -> Result<bool>;

    /// Queue members for indexing. Existing ids are updated in place.
    fn index_members(&self, key: &str, records: Vec<MemberRecord>) -> Result<IndexToken>;

    /// Remove every member of a store while keeping its signature.
    fn reset_members(&self, key: &str) -> Result<()>;

    fn is_dimension_indexation_done(&self, token: IndexToken) -> Result<bool>;

    /// Declare the dimension types (axis keys) of a correlation table.
    fn init_correlation_mapping(&self, key: &str, types: &[String]) -> Result<()>;

    /// Queue co-occurrence tuples, one value per declared type.
    fn index_correlations(&self, key: &str, rows: Vec<Vec<Value>>) -> Result<IndexToken>;

    fn is_correlation_indexation_done(&self, token: IndexToken) -> Result<bool>;

    /// Paged listing, optionally filtered by a case-insensitive substring.
    fn members(
        &self,
        key: &str,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<MemberRecord>>;

    /// Paged listing of the members of `key` that co-occur with `selections`
    /// in the correlation table `correlation_key`, where `key` is the column
    /// `target_type`.
    #[allow(clippy::too_many_arguments)]
    fn correlated_members(
        &self,
        correlation_key: &str,
        key: &str,
        target_type: &str,
        selections: &Selections,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<MemberRecord>>;

    fn member_count(&self, key: &str) -> Result<usize>;

    /// Drop the store, its correlations and any pending write.
    fn drop_store(&self, key: &str) -> Result<()>;
}
