//! One distinct value of a dimension.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

use crate::member::value::Value;

/// Ordinal of a member the store has not resolved yet.
pub const UNRESOLVED: i64 = -1;

/// A distinct value of a dimension plus its auxiliary attributes.
///
/// The id is immutable; the ordinal and the attribute values may be filled in
/// while a query is being indexed. Two members are equal when their ids are.
#[derive(Debug)]
pub struct DimensionMember {
    id: Value,
    index: AtomicI64,
    attributes: RwLock<Vec<Option<Value>>>,
}

impl DimensionMember {
    /// Create a member with `attribute_count` empty attribute slots.
    pub fn new(id: Value, attribute_count: usize) -> Self {
        Self {
            id,
            index: AtomicI64::new(UNRESOLVED),
            attributes: RwLock::new(vec![None; attribute_count]),
        }
    }

    pub fn with_attributes(id: Value, attributes: Vec<Option<Value>>) -> Self {
        Self {
            id,
            index: AtomicI64::new(UNRESOLVED),
            attributes: RwLock::new(attributes),
        }
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    /// String key used by [`crate::member::MemberStore::member_by_key`].
    pub fn key(&self) -> String {
        self.id.to_string()
    }

    pub fn index(&self) -> i64 {
        self.index.load(AtomicOrdering::Acquire)
    }

    pub fn set_index(&self, index: i64) {
        self.index.store(index, AtomicOrdering::Release);
    }

    pub fn attributes(&self) -> Vec<Option<Value>> {
        self.attributes.read().clone()
    }

    pub fn attribute(&self, position: usize) -> Option<Value> {
        self.attributes.read().get(position).cloned().flatten()
    }

    /// Set one attribute; positions outside the declared list are ignored.
    pub fn set_attribute(&self, position: usize, value: Option<Value>) {
        let mut attributes = self.attributes.write();
        if let Some(slot) = attributes.get_mut(position) {
            *slot = value;
        }
    }

    /// Case-insensitive substring match against the id and every attribute.
    /// `needle` must already be lowercased.
    pub fn matches(&self, needle: &str) -> bool {
        if self.id.to_string().to_lowercase().contains(needle) {
            return true;
        }
        self.attributes
            .read()
            .iter()
            .flatten()
            .any(|value| value.to_string().to_lowercase().contains(needle))
    }
}

impl PartialEq for DimensionMember {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DimensionMember {}

impl Hash for DimensionMember {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for DimensionMember {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DimensionMember {
    /// Store ordinal when both are resolved, then the natural order of the
    /// ids, then their display strings.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.id == other.id {
            return Ordering::Equal;
        }
        let (a, b) = (self.index(), other.index());
        if a >= 0 && b >= 0 && a != b {
            return a.cmp(&b);
        }
        match self.id.natural_cmp(&other.id) {
            Some(ordering) if ordering != Ordering::Equal => ordering,
            _ => self
                .id
                .to_string()
                .cmp(&other.id.to_string())
                .then_with(|| self.id.cmp(&other.id)),
        }
    }
}

impl fmt::Display for DimensionMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_index_and_attributes() {
        let a = DimensionMember::with_attributes(Value::text("FR"), vec![Some("France".into())]);
        let b = DimensionMember::new(Value::text("FR"), 1);
        b.set_index(7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordering_prefers_resolved_index() {
        let a = DimensionMember::new(Value::text("b"), 0);
        let b = DimensionMember::new(Value::text("a"), 0);
        assert!(a > b);

        a.set_index(0);
        b.set_index(1);
        assert!(a < b);
    }

    #[test]
    fn test_ordering_falls_back_to_strings() {
        let number = DimensionMember::new(Value::Int(10), 0);
        let text = DimensionMember::new(Value::text("9"), 0);
        assert!(number < text);
    }

    #[test]
    fn test_matches_attributes() {
        let member = DimensionMember::new(Value::text("FR"), 2);
        member.set_attribute(1, Some(Value::text("République Française")));
        member.set_attribute(5, Some(Value::text("ignored")));
        assert!(member.matches("française"));
        assert!(member.matches("fr"));
        assert!(!member.matches("ignored"));
    }
}
