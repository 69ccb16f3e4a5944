//! Per-dimension member store.
//!
//! [`MemberStore`] pairs a local identity map of [`DimensionMember`]s (so an
//! id always resolves to the same instance) with the persistent
//! [`MemberStoreBackend`] that serves listings and correlation lookups.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{FacetreeError, Result};
use crate::member::backend::{IndexToken, MemberRecord, MemberStoreBackend, Selections};
use crate::member::dimension_member::DimensionMember;
use crate::member::value::Value;
use crate::timeout::{Timeout, poll_until};

/// Correlation table a store takes part in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationMapping {
    /// Store key of the hierarchy root owning the table.
    pub key: String,
    /// Axis keys of the correlated dimensions, in column order.
    pub types: Vec<String>,
}

#[derive(Debug, Default)]
struct LocalMembers {
    by_id: AHashMap<Value, Arc<DimensionMember>>,
    by_key: AHashMap<String, Arc<DimensionMember>>,
    ordered: Vec<Arc<DimensionMember>>,
}

/// The member store of one dimension index.
#[derive(Debug)]
pub struct MemberStore {
    key: String,
    attribute_count: usize,
    backend: Arc<dyn MemberStoreBackend>,
    poll_interval: Duration,
    local: RwLock<LocalMembers>,
    correlation: RwLock<Option<CorrelationMapping>>,
}

impl MemberStore {
    pub fn new(
        key: String,
        attribute_count: usize,
        backend: Arc<dyn MemberStoreBackend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            key,
            attribute_count,
            backend,
            poll_interval,
            local: RwLock::new(LocalMembers::default()),
            correlation: RwLock::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attribute_count(&self) -> usize {
        self.attribute_count
    }

    /// Prepare the backend store for a query signature; `true` when the
    /// backend already holds members for that signature.
    pub fn setup(&self, signature: &str) -> Result<bool> {
        self.backend.setup(&self.key, signature)
    }

    /// Return the member with this id, creating and registering it if needed.
    pub fn member_by_id(&self, id: Value) -> Arc<DimensionMember> {
        self.upsert(id).0
    }

    /// Like [`Self::member_by_id`], also reporting whether the member was created.
    pub fn upsert(&self, id: Value) -> (Arc<DimensionMember>, bool) {
        if let Some(member) = self.local.read().by_id.get(&id) {
            return (Arc::clone(member), false);
        }

        let mut local = self.local.write();
        // Another writer may have registered it between the two locks.
        if let Some(member) = local.by_id.get(&id) {
            return (Arc::clone(member), false);
        }
        let member = Arc::new(DimensionMember::new(id.clone(), self.attribute_count));
        member.set_index(local.ordered.len() as i64);
        local.by_key.insert(member.key(), Arc::clone(&member));
        local.by_id.insert(id, Arc::clone(&member));
        local.ordered.push(Arc::clone(&member));
        (member, true)
    }

    pub fn lookup(&self, id: &Value) -> Option<Arc<DimensionMember>> {
        self.local.read().by_id.get(id).cloned()
    }

    /// Member at a store ordinal.
    pub fn member(&self, ordinal: usize) -> Option<Arc<DimensionMember>> {
        self.local.read().ordered.get(ordinal).cloned()
    }

    pub fn member_by_key(&self, key: &str) -> Option<Arc<DimensionMember>> {
        self.local.read().by_key.get(key).cloned()
    }

    /// Number of members resolved in this process.
    pub fn local_count(&self) -> usize {
        self.local.read().ordered.len()
    }

    /// Number of members visible in the backend.
    pub fn member_count(&self) -> Result<usize> {
        self.backend.member_count(&self.key)
    }

    pub fn members(&self, offset: usize, size: usize) -> Result<Vec<Arc<DimensionMember>>> {
        self.members_filtered(None, offset, size)
    }

    /// Paged listing, optionally filtered by a case-insensitive substring
    /// matched against ids and attributes.
    pub fn members_filtered(
        &self,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Arc<DimensionMember>>> {
        let records = self.backend.members(&self.key, filter, offset, size)?;
        Ok(records.into_iter().map(|r| self.resolve(r)).collect())
    }

    /// Members consistent with the given ancestor/sibling selections. Without
    /// a correlation mapping the selections cannot constrain the listing.
    pub fn members_filter_by_parents(
        &self,
        selections: &Selections,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Arc<DimensionMember>>> {
        let mapping = self.correlation.read().clone();
        let records = match mapping {
            Some(mapping) if !selections.is_empty() => self.backend.correlated_members(
                &mapping.key,
                &self.key,
                &self.key,
                selections,
                filter,
                offset,
                size,
            )?,
            _ => self.backend.members(&self.key, filter, offset, size)?,
        };
        Ok(records.into_iter().map(|r| self.resolve(r)).collect())
    }

    /// Commit one member without waiting for visibility.
    pub fn index_member(&self, member: &DimensionMember) -> Result<IndexToken> {
        self.backend
            .index_members(&self.key, vec![Self::record(member)])
    }

    /// Commit members. A blocking `wait` polls the backend until the write is
    /// visible or the wait expires; the token is returned either way.
    pub fn index_members(
        &self,
        members: &[Arc<DimensionMember>],
        wait: Timeout,
    ) -> Result<IndexToken> {
        let records = members.iter().map(|m| Self::record(m)).collect();
        let token = self.backend.index_members(&self.key, records)?;
        if !wait.is_non_blocking() {
            self.wait_for_members(token, wait)?;
        }
        Ok(token)
    }

    /// Commit a raw row: the id followed by one value per attribute.
    pub fn index_row(&self, row: Vec<Option<Value>>) -> Result<Option<IndexToken>> {
        let mut values = row.into_iter();
        let Some(Some(id)) = values.next() else {
            return Ok(None);
        };
        let member = self.member_by_id(id);
        for (position, value) in values.enumerate() {
            member.set_attribute(position, value);
        }
        self.index_member(&member).map(Some)
    }

    /// Drop every member, locally and in the backend.
    pub fn reset(&self) -> Result<()> {
        *self.local.write() = LocalMembers::default();
        self.backend.reset_members(&self.key)
    }

    /// Declare this store as the owner of a correlation table.
    pub fn init_correlation_mapping(&self, types: Vec<String>) -> Result<CorrelationMapping> {
        self.backend.init_correlation_mapping(&self.key, &types)?;
        let mapping = CorrelationMapping {
            key: self.key.clone(),
            types,
        };
        *self.correlation.write() = Some(mapping.clone());
        Ok(mapping)
    }

    /// Take part in a correlation table owned by another store.
    pub fn attach_correlation(&self, mapping: CorrelationMapping) {
        *self.correlation.write() = Some(mapping);
    }

    pub fn correlation(&self) -> Option<CorrelationMapping> {
        self.correlation.read().clone()
    }

    /// Record co-occurrence tuples in the table this store owns.
    pub fn index_correlations(&self, rows: Vec<Vec<Value>>, wait: Timeout) -> Result<IndexToken> {
        let width = match self.correlation.read().as_ref() {
            Some(mapping) if mapping.key == self.key => mapping.types.len(),
            _ => {
                return Err(FacetreeError::index(format!(
                    "correlation mapping of '{}' is not initialized",
                    self.key
                )));
            }
        };
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(FacetreeError::index(format!(
                "correlation tuple of {} values for '{}', expected {width}",
                row.len(),
                self.key
            )));
        }
        let token = self.backend.index_correlations(&self.key, rows)?;
        if !wait.is_non_blocking() {
            self.wait_for_correlations(token, wait)?;
        }
        Ok(token)
    }

    pub fn wait_for_members(&self, token: IndexToken, wait: Timeout) -> Result<bool> {
        poll_until(wait, self.poll_interval, || {
            self.backend.is_dimension_indexation_done(token)
        })
    }

    pub fn wait_for_correlations(&self, token: IndexToken, wait: Timeout) -> Result<bool> {
        poll_until(wait, self.poll_interval, || {
            self.backend.is_correlation_indexation_done(token)
        })
    }

    /// Remove the persisted store.
    pub fn drop_store(&self) -> Result<()> {
        *self.local.write() = LocalMembers::default();
        *self.correlation.write() = None;
        self.backend.drop_store(&self.key)
    }

    fn resolve(&self, record: MemberRecord) -> Arc<DimensionMember> {
        let member = self.member_by_id(record.id);
        for (position, value) in record.attributes.into_iter().enumerate() {
            if value.is_some() {
                member.set_attribute(position, value);
            }
        }
        member
    }

    fn record(member: &DimensionMember) -> MemberRecord {
        MemberRecord::new(member.id().clone(), member.attributes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::memory::MemoryMemberBackend;

    fn store(backend: Arc<MemoryMemberBackend>) -> MemberStore {
        MemberStore::new("sales/country".into(), 1, backend, Duration::from_millis(5))
    }

    #[test]
    fn test_member_by_id_is_idempotent() {
        let store = store(Arc::new(MemoryMemberBackend::new_default()));
        let first = store.member_by_id(Value::text("FR"));
        let second = store.member_by_id(Value::text("FR"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.local_count(), 1);

        let (_, created) = store.upsert(Value::text("DE"));
        assert!(created);
        assert_eq!(store.member(1).unwrap().id(), &Value::text("DE"));
        assert_eq!(store.member_by_key("FR").unwrap().index(), 0);
    }

    #[test]
    fn test_listing_resolves_backend_records() {
        let backend = Arc::new(MemoryMemberBackend::new_default());
        let store = store(backend.clone());
        store.setup("sig").unwrap();
        let fr = store.member_by_id(Value::text("FR"));
        fr.set_attribute(0, Some(Value::text("France")));
        store.index_members(&[fr.clone()], Timeout::Bounded(Duration::from_secs(1))).unwrap();

        let members = store.members_filtered(Some("fran"), 0, 10).unwrap();
        assert_eq!(members.len(), 1);
        assert!(Arc::ptr_eq(&members[0], &fr));
    }

    #[test]
    fn test_index_row_splits_attributes() {
        let store = store(Arc::new(MemoryMemberBackend::new_default()));
        let token = store
            .index_row(vec![Some(Value::text("IT")), Some(Value::text("Italy"))])
            .unwrap();
        assert!(token.is_some());
        let italy = store.member_by_key("IT").unwrap();
        assert_eq!(italy.attribute(0), Some(Value::text("Italy")));
        assert!(store.index_row(vec![None]).unwrap().is_none());
    }

    #[test]
    fn test_correlations_need_owned_mapping() {
        let backend = Arc::new(MemoryMemberBackend::new_default());
        let root = store(backend.clone());
        let rows = vec![vec![Value::text("FR"), Value::text("Paris")]];
        assert!(root.index_correlations(rows.clone(), Timeout::NonBlocking).is_err());

        let mapping = root
            .init_correlation_mapping(vec!["sales/country".into(), "sales/city".into()])
            .unwrap();
        let child = MemberStore::new("sales/city".into(), 0, backend, Duration::from_millis(5));
        child.attach_correlation(mapping);
        assert!(child.index_correlations(rows.clone(), Timeout::NonBlocking).is_err());
        assert!(root.index_correlations(rows, Timeout::NonBlocking).is_ok());
    }

    #[test]
    fn test_correlation_tuples_match_mapping_width() {
        let backend = Arc::new(MemoryMemberBackend::new_default());
        let root = store(backend);
        root.init_correlation_mapping(vec!["sales/country".into(), "sales/city".into()])
            .unwrap();

        let short = vec![vec![Value::text("FR")]];
        let err = root.index_correlations(short, Timeout::NonBlocking).unwrap_err();
        assert!(matches!(err, FacetreeError::Index(_)));
        let long = vec![vec![Value::text("FR"), Value::text("Paris"), Value::text("75")]];
        assert!(root.index_correlations(long, Timeout::NonBlocking).is_err());
    }
}
