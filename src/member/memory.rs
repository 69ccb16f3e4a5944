//! In-memory member store backend for testing and single-process use.
//!
//! Writes are queued and only become visible once a configurable delay has
//! elapsed, so callers exercise the same completion polling they need
//! against a real, eventually consistent search cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};

use crate::error::{FacetreeError, Result};
use crate::member::backend::{IndexToken, MemberRecord, MemberStoreBackend, Selections};
use crate::member::value::Value;

/// Configuration for [`MemoryMemberBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackendConfig {
    /// Time between a write being queued and becoming visible.
    pub visibility_delay: Duration,
}

#[derive(Debug, Default)]
struct StoreData {
    signature: String,
    members: Vec<MemberRecord>,
    positions: AHashMap<Value, usize>,
}

impl StoreData {
    fn upsert(&mut self, record: MemberRecord) {
        match self.positions.get(&record.id) {
            Some(&position) => self.members[position] = record,
            None => {
                self.positions.insert(record.id.clone(), self.members.len());
                self.members.push(record);
            }
        }
    }

    fn clear(&mut self) {
        self.members.clear();
        self.positions.clear();
    }
}

#[derive(Debug, Default)]
struct CorrelationData {
    types: Vec<String>,
    rows: Vec<Vec<Value>>,
    seen: AHashSet<Vec<Value>>,
}

#[derive(Debug)]
enum Write {
    Members(Vec<MemberRecord>),
    Correlations(Vec<Vec<Value>>),
}

#[derive(Debug)]
struct Pending {
    token: IndexToken,
    key: String,
    visible_at: Instant,
    write: Write,
}

/// A [`MemberStoreBackend`] keeping every store in memory.
#[derive(Debug, Default)]
pub struct MemoryMemberBackend {
    config: MemoryBackendConfig,
    stores: RwLock<AHashMap<String, StoreData>>,
    correlations: RwLock<AHashMap<String, CorrelationData>>,
    pending: Mutex<Vec<Pending>>,
    next_token: AtomicU64,
    setups: AtomicU64,
    failing: RwLock<AHashSet<String>>,
}

impl MemoryMemberBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Backend whose writes are visible immediately.
    pub fn new_default() -> Self {
        Self::default()
    }

    pub fn with_visibility_delay(delay: Duration) -> Self {
        Self::new(MemoryBackendConfig {
            visibility_delay: delay,
        })
    }

    /// Make every subsequent `setup` of `key` fail.
    pub fn fail_setup_for<S: Into<String>>(&self, key: S) {
        self.failing.write().insert(key.into());
    }

    /// Number of `setup` calls served.
    pub fn setup_count(&self) -> u64 {
        self.setups.load(Ordering::Relaxed)
    }

    pub fn has_store(&self, key: &str) -> bool {
        self.stores.read().contains_key(key)
    }

    /// Number of correlation tuples visible for `key`.
    pub fn correlation_count(&self, key: &str) -> usize {
        self.promote();
        self.correlations
            .read()
            .get(key)
            .map(|c| c.rows.len())
            .unwrap_or(0)
    }

    fn enqueue(&self, key: &str, write: Write) -> IndexToken {
        let token = IndexToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        self.pending.lock().push(Pending {
            token,
            key: key.to_string(),
            visible_at: Instant::now() + self.config.visibility_delay,
            write,
        });
        self.promote();
        token
    }

    /// Apply every queued write whose visibility time has passed, in token order.
    fn promote(&self) {
        let due: Vec<Pending> = {
            let mut pending = self.pending.lock();
            let now = Instant::now();
            let (due, waiting): (Vec<Pending>, Vec<Pending>) =
                pending.drain(..).partition(|p| p.visible_at <= now);
            *pending = waiting;
            due
        };
        if due.is_empty() {
            return;
        }

        let mut stores = self.stores.write();
        let mut correlations = self.correlations.write();
        for item in due {
            match item.write {
                Write::Members(records) => {
                    let store = stores.entry(item.key).or_default();
                    for record in records {
                        store.upsert(record);
                    }
                }
                Write::Correlations(rows) => {
                    let table = correlations.entry(item.key).or_default();
                    for row in rows {
                        if table.seen.insert(row.clone()) {
                            table.rows.push(row);
                        }
                    }
                }
            }
        }
    }

    fn is_visible(&self, token: IndexToken) -> bool {
        self.promote();
        !self.pending.lock().iter().any(|p| p.token == token)
    }
}

fn page(records: impl Iterator<Item = MemberRecord>, offset: usize, size: usize) -> Vec<MemberRecord> {
    records.skip(offset).take(size).collect()
}

impl MemberStoreBackend for MemoryMemberBackend {
    fn setup(&self, key: &str, signature: &str) -> Result<bool> {
        self.setups.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().contains(key) {
            return Err(FacetreeError::storage(format!(
                "unable to set up member store '{key}'"
            )));
        }
        self.promote();

        let mut stores = self.stores.write();
        let store = stores.entry(key.to_string()).or_default();
        if store.signature == signature && !store.members.is_empty() {
            return Ok(true);
        }
        store.clear();
        store.signature = signature.to_string();
        Ok(false)
    }

    fn index_members(&self, key: &str, records: Vec<MemberRecord>) -> Result<IndexToken> {
        Ok(self.enqueue(key, Write::Members(records)))
    }

    fn reset_members(&self, key: &str) -> Result<()> {
        self.pending
            .lock()
            .retain(|p| !(p.key == key && matches!(p.write, Write::Members(_))));
        if let Some(store) = self.stores.write().get_mut(key) {
            store.clear();
        }
        Ok(())
    }

    fn is_dimension_indexation_done(&self, token: IndexToken) -> Result<bool> {
        Ok(self.is_visible(token))
    }

    fn init_correlation_mapping(&self, key: &str, types: &[String]) -> Result<()> {
        let mut correlations = self.correlations.write();
        let table = correlations.entry(key.to_string()).or_default();
        if table.types != types {
            *table = CorrelationData {
                types: types.to_vec(),
                ..Default::default()
            };
        }
        Ok(())
    }

    fn index_correlations(&self, key: &str, rows: Vec<Vec<Value>>) -> Result<IndexToken> {
        let width = match self.correlations.read().get(key) {
            Some(data) => data.types.len(),
            None => {
                return Err(FacetreeError::index(format!(
                    "no correlation mapping initialized for '{key}'"
                )));
            }
        };
        if let Some(row) = rows.iter().find(|row| row.len() != width) {
            return Err(FacetreeError::index(format!(
                "correlation tuple of {} values for '{key}', expected {width}",
                row.len()
            )));
        }
        Ok(self.enqueue(key, Write::Correlations(rows)))
    }

    fn is_correlation_indexation_done(&self, token: IndexToken) -> Result<bool> {
        Ok(self.is_visible(token))
    }

    fn members(
        &self,
        key: &str,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<MemberRecord>> {
        self.promote();
        let stores = self.stores.read();
        let Some(store) = stores.get(key) else {
            return Ok(Vec::new());
        };
        let needle = filter.map(str::to_lowercase);
        let records = store
            .members
            .iter()
            .filter(|r| needle.as_deref().is_none_or(|n| r.matches(n)))
            .cloned();
        Ok(page(records, offset, size))
    }

    fn correlated_members(
        &self,
        correlation_key: &str,
        key: &str,
        target_type: &str,
        selections: &Selections,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<MemberRecord>> {
        if !self.correlations.read().contains_key(correlation_key) {
            return self.members(key, filter, offset, size);
        }
        self.promote();

        // Same lock order as `promote`: stores, then correlations.
        let stores = self.stores.read();
        let correlations = self.correlations.read();
        let Some(table) = correlations.get(correlation_key) else {
            return Ok(Vec::new());
        };
        let Some(target) = table.types.iter().position(|t| t == target_type) else {
            return Err(FacetreeError::index(format!(
                "'{target_type}' is not part of correlation '{correlation_key}'"
            )));
        };

        // Selections on dimensions outside this table do not constrain it.
        let constraints: Vec<(usize, &[Value])> = selections
            .iter()
            .filter_map(|(axis, values)| {
                table
                    .types
                    .iter()
                    .position(|t| t == axis)
                    .map(|p| (p, values.as_slice()))
            })
            .collect();

        let mut allowed: AHashSet<&Value> = AHashSet::new();
        for row in &table.rows {
            if constraints
                .iter()
                .all(|(position, values)| values.contains(&row[*position]))
            {
                allowed.insert(&row[target]);
            }
        }

        let Some(store) = stores.get(key) else {
            return Ok(Vec::new());
        };
        let needle = filter.map(str::to_lowercase);
        let records = store
            .members
            .iter()
            .filter(|r| allowed.contains(&r.id))
            .filter(|r| needle.as_deref().is_none_or(|n| r.matches(n)))
            .cloned();
        Ok(page(records, offset, size))
    }

    fn member_count(&self, key: &str) -> Result<usize> {
        self.promote();
        Ok(self
            .stores
            .read()
            .get(key)
            .map(|s| s.members.len())
            .unwrap_or(0))
    }

    fn drop_store(&self, key: &str) -> Result<()> {
        self.pending.lock().retain(|p| p.key != key);
        self.stores.write().remove(key);
        self.correlations.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> MemberRecord {
        MemberRecord::new(Value::text(id), vec![])
    }

    #[test]
    fn test_setup_reports_cached_store() {
        let backend = MemoryMemberBackend::new_default();
        assert!(!backend.setup("d/country", "sig-1").unwrap());
        backend
            .index_members("d/country", vec![record("FR"), record("DE")])
            .unwrap();
        assert!(backend.setup("d/country", "sig-1").unwrap());

        // A new signature resets the store.
        assert!(!backend.setup("d/country", "sig-2").unwrap());
        assert_eq!(backend.member_count("d/country").unwrap(), 0);
    }

    #[test]
    fn test_writes_become_visible_after_delay() {
        let backend = MemoryMemberBackend::with_visibility_delay(Duration::from_millis(30));
        backend.setup("k", "s").unwrap();
        let token = backend.index_members("k", vec![record("a")]).unwrap();
        assert!(!backend.is_dimension_indexation_done(token).unwrap());
        assert_eq!(backend.member_count("k").unwrap(), 0);

        std::thread::sleep(Duration::from_millis(50));
        assert!(backend.is_dimension_indexation_done(token).unwrap());
        assert_eq!(backend.member_count("k").unwrap(), 1);
    }

    #[test]
    fn test_filtered_paging() {
        let backend = MemoryMemberBackend::new_default();
        backend
            .index_members(
                "k",
                vec![
                    MemberRecord::new(Value::text("FR"), vec![Some(Value::text("France"))]),
                    MemberRecord::new(Value::text("DE"), vec![Some(Value::text("Germany"))]),
                    MemberRecord::new(Value::text("FI"), vec![Some(Value::text("Finland"))]),
                ],
            )
            .unwrap();

        let page = backend.members("k", Some("f"), 0, 10).unwrap();
        assert_eq!(page.len(), 2);
        let page = backend.members("k", Some("GERM"), 0, 10).unwrap();
        assert_eq!(page[0].id, Value::text("DE"));
        let page = backend.members("k", None, 1, 1).unwrap();
        assert_eq!(page[0].id, Value::text("DE"));
    }

    #[test]
    fn test_correlated_members_follow_selection() {
        let backend = MemoryMemberBackend::new_default();
        let types = vec!["d/country".to_string(), "d/city".to_string()];
        backend.init_correlation_mapping("d/country", &types).unwrap();
        backend
            .index_members("d/city", vec![record("Paris"), record("Lyon"), record("Berlin")])
            .unwrap();
        backend
            .index_correlations(
                "d/country",
                vec![
                    vec![Value::text("FR"), Value::text("Paris")],
                    vec![Value::text("FR"), Value::text("Lyon")],
                    vec![Value::text("DE"), Value::text("Berlin")],
                ],
            )
            .unwrap();

        let selections = Selections::new().select("d/country", vec![Value::text("FR")]);
        let cities = backend
            .correlated_members("d/country", "d/city", "d/city", &selections, None, 0, 10)
            .unwrap();
        let ids: Vec<_> = cities.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![Value::text("Paris"), Value::text("Lyon")]);
    }

    #[test]
    fn test_correlations_require_mapping() {
        let backend = MemoryMemberBackend::new_default();
        assert!(backend.index_correlations("missing", vec![]).is_err());
    }

    #[test]
    fn test_short_correlation_tuple_is_rejected() {
        let backend = MemoryMemberBackend::new_default();
        let types = vec!["d/country".to_string(), "d/city".to_string()];
        backend.init_correlation_mapping("d/country", &types).unwrap();
        backend.index_members("d/city", vec![record("Paris")]).unwrap();

        let err = backend
            .index_correlations("d/country", vec![vec![Value::text("FR")]])
            .unwrap_err();
        assert!(matches!(err, FacetreeError::Index(_)));

        // Nothing was queued: filtering by parent still works.
        let selections = Selections::new().select("d/country", vec![Value::text("FR")]);
        let cities = backend
            .correlated_members("d/country", "d/city", "d/city", &selections, None, 0, 10)
            .unwrap();
        assert!(cities.is_empty());
    }

    #[test]
    fn test_injected_setup_failure() {
        let backend = MemoryMemberBackend::new_default();
        backend.fail_setup_for("bad");
        assert!(backend.setup("bad", "s").is_err());
        assert_eq!(backend.setup_count(), 1);
    }
}
