//! Dimension index nodes of a hierarchy forest.
//!
//! A node is either [`IndexKind::Local`], owning a [`MemberStore`] and a
//! persisted status, or [`IndexKind::Proxy`], delegating both to a source
//! index that lives in another domain's hierarchy. Every store and status
//! accessor resolves the proxy chain first, so callers never need to know
//! which variant they hold.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::compute::job::JobHandle;
use crate::context::EngineContext;
use crate::error::Result;
use crate::index::axis::Axis;
use crate::index::status::{IndexStatus, StatusRecord, StatusStore};
use crate::member::{
    CorrelationMapping, DimensionMember, IndexToken, MemberStore, Selections, Value,
};
use crate::model::{Attribute, Dimension, DimensionOption, ImageType};
use crate::timeout::Timeout;

/// Parent/child/proxy links, by axis key.
#[derive(Debug, Clone, Default)]
pub struct Relations {
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub proxies: Vec<String>,
}

#[derive(Debug)]
struct StatusState {
    status: IndexStatus,
    message: Option<String>,
    signature: Option<String>,
}

/// A node owning its members.
#[derive(Debug)]
pub struct LocalIndex {
    store: MemberStore,
    state: RwLock<StatusState>,
    /// None for synthetic indexes whose status must not outlive the process.
    status_store: Option<Arc<dyn StatusStore>>,
    version: String,
    materialized: AtomicBool,
    job: RwLock<Option<Arc<JobHandle>>>,
}

/// A node delegating to an index of another hierarchy.
#[derive(Debug)]
pub struct ProxyIndex {
    source: Arc<DimensionIndex>,
    /// Whether the join was generated rather than declared.
    dynamic_link: bool,
}

#[derive(Debug)]
pub enum IndexKind {
    Local(LocalIndex),
    Proxy(ProxyIndex),
}

/// Naming of a node as shown to facet consumers.
#[derive(Debug, Clone, Default)]
pub struct DisplayName {
    pub name: String,
    /// Slash-joined chain of the join dimensions leading to the node.
    pub path: String,
    /// Whether `name` concatenates the joining dimension's name.
    pub composite: bool,
}

/// One node of a domain hierarchy forest.
pub struct DimensionIndex {
    axis: Axis,
    key: String,
    dimension: Dimension,
    image: Option<ImageType>,
    display: DisplayName,
    attributes: Vec<Attribute>,
    display_attribute: Option<usize>,
    options: DimensionOption,
    relations: RwLock<Relations>,
    kind: IndexKind,
}

impl fmt::Debug for DimensionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionIndex")
            .field("axis", &self.key)
            .field("name", &self.display.name)
            .field("proxy", &self.is_proxy())
            .field("status", &self.status())
            .finish()
    }
}

impl DimensionIndex {
    /// Create a node owning a member store. Its status resumes from the
    /// status store when the persisted record was written for the same
    /// dimension `version`.
    pub fn local(
        ctx: &EngineContext,
        axis: Axis,
        dimension: Dimension,
        domain_options: &DimensionOption,
        image: ImageType,
        version: String,
    ) -> Self {
        let key = axis.key();
        let attribute_count = dimension.attributes.len();
        let status_store = Arc::clone(ctx.status_store());
        let state = match status_store.get(&key) {
            Ok(Some(record)) if record.version == version => StatusState {
                status: record.status,
                message: record.message,
                signature: record.signature,
            },
            Ok(_) => StatusState::stale(),
            Err(e) => {
                warn!(axis = %key, error = %e, "unable to read persisted index status");
                StatusState::stale()
            }
        };
        if state.status != IndexStatus::Stale {
            debug!(axis = %key, status = %state.status, "resumed persisted index status");
        }

        let display = DisplayName {
            name: dimension.name.clone(),
            path: String::new(),
            composite: false,
        };
        Self::with_kind(
            axis,
            dimension,
            Some(image),
            display,
            domain_options,
            IndexKind::Local(LocalIndex {
                store: MemberStore::new(
                    key,
                    attribute_count,
                    Arc::clone(ctx.backend()),
                    ctx.config().poll_interval,
                ),
                state: RwLock::new(state),
                status_store: Some(status_store),
                version,
                materialized: AtomicBool::new(false),
                job: RwLock::new(None),
            }),
        )
    }

    /// Create a stub node carrying a permanent error. Its status is never
    /// persisted.
    pub fn invalid<S: Into<String>>(
        ctx: &EngineContext,
        axis: Axis,
        dimension: Dimension,
        message: S,
    ) -> Self {
        let key = axis.key();
        let attribute_count = dimension.attributes.len();
        let message = message.into();
        warn!(axis = %key, %message, "dimension degraded to an invalid index");
        let display = DisplayName {
            name: dimension.name.clone(),
            path: String::new(),
            composite: false,
        };
        Self::with_kind(
            axis,
            dimension,
            None,
            display,
            &DimensionOption::default(),
            IndexKind::Local(LocalIndex {
                store: MemberStore::new(
                    key,
                    attribute_count,
                    Arc::clone(ctx.backend()),
                    ctx.config().poll_interval,
                ),
                state: RwLock::new(StatusState {
                    status: IndexStatus::Error,
                    message: Some(message),
                    signature: None,
                }),
                status_store: None,
                version: String::new(),
                materialized: AtomicBool::new(true),
                job: RwLock::new(None),
            }),
        )
    }

    /// Create a node delegating to `source`, reached through a join.
    pub fn proxy(
        axis: Axis,
        source: Arc<DimensionIndex>,
        display: DisplayName,
        dynamic_link: bool,
    ) -> Self {
        let dimension = source.dimension.clone();
        let image = source.image.clone();
        let options = source.options.clone();
        Self::with_kind(
            axis,
            dimension,
            image,
            display,
            &options,
            IndexKind::Proxy(ProxyIndex {
                source,
                dynamic_link,
            }),
        )
    }

    fn with_kind(
        axis: Axis,
        dimension: Dimension,
        image: Option<ImageType>,
        display: DisplayName,
        domain_options: &DimensionOption,
        kind: IndexKind,
    ) -> Self {
        let options = dimension.options.merged(domain_options);
        let attributes = dimension.attributes.clone();
        let display_attribute = options
            .display_attribute
            .as_ref()
            .and_then(|id| attributes.iter().position(|a| &a.id == id));
        Self {
            key: axis.key(),
            axis,
            dimension,
            image,
            display,
            attributes,
            display_attribute,
            options,
            relations: RwLock::new(Relations::default()),
            kind,
        }
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Axis key, the identity of this node within a hierarchy.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dimension(&self) -> &Dimension {
        &self.dimension
    }

    /// Axis classification, `None` for invalid indexes.
    pub fn image(&self) -> Option<&ImageType> {
        self.image.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.display.name
    }

    pub fn path(&self) -> &str {
        &self.display.path
    }

    pub fn is_composite_name(&self) -> bool {
        self.display.composite
    }

    pub fn display(&self) -> &DisplayName {
        &self.display
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Position of the attribute used as member label.
    pub fn display_attribute(&self) -> Option<usize> {
        self.display_attribute
    }

    pub fn options(&self) -> &DimensionOption {
        &self.options
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, IndexKind::Proxy(_))
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.image, Some(ImageType::Continuous))
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.image, Some(ImageType::Conditional))
    }

    /// The index this proxy delegates to directly, if it is a proxy.
    pub fn direct_source(&self) -> Option<&Arc<DimensionIndex>> {
        match &self.kind {
            IndexKind::Proxy(proxy) => Some(&proxy.source),
            IndexKind::Local(_) => None,
        }
    }

    /// The local index at the end of the proxy chain.
    pub fn source(&self) -> &DimensionIndex {
        let mut current = self;
        while let IndexKind::Proxy(proxy) = &current.kind {
            current = &proxy.source;
        }
        current
    }

    fn local_index(&self) -> &LocalIndex {
        match &self.source().kind {
            IndexKind::Local(local) => local,
            IndexKind::Proxy(_) => unreachable!("source() always resolves to a local index"),
        }
    }

    /// Domains crossed by the proxy chain, starting with this node's own.
    pub fn domain_dependencies(&self) -> Vec<String> {
        let mut domains = vec![self.axis.domain_id().to_string()];
        let mut current = self;
        while let IndexKind::Proxy(proxy) = &current.kind {
            current = &proxy.source;
            let domain = current.axis.domain_id();
            if !domains.iter().any(|d| d == domain) {
                domains.push(domain.to_string());
            }
        }
        domains
    }

    /// Whether facet consumers should see this node. A proxy through a
    /// generated join hides generated sources.
    pub fn is_visible(&self) -> bool {
        match &self.kind {
            IndexKind::Local(_) => !self.options.is_hidden(),
            IndexKind::Proxy(proxy) => {
                proxy.source.is_visible()
                    && !(proxy.dynamic_link && proxy.source.options.is_dynamic())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Relations
    // ---------------------------------------------------------------------

    pub fn relations(&self) -> Relations {
        self.relations.read().clone()
    }

    pub fn parent(&self) -> Option<String> {
        self.relations.read().parent.clone()
    }

    pub fn children(&self) -> Vec<String> {
        self.relations.read().children.clone()
    }

    pub fn proxies(&self) -> Vec<String> {
        self.relations.read().proxies.clone()
    }

    pub fn set_parent(&self, parent_key: &str) {
        self.relations.write().parent = Some(parent_key.to_string());
    }

    pub fn add_child(&self, child_key: &str) {
        let mut relations = self.relations.write();
        if !relations.children.iter().any(|c| c == child_key) {
            relations.children.push(child_key.to_string());
        }
    }

    pub fn add_proxy(&self, proxy_key: &str) {
        let mut relations = self.relations.write();
        if !relations.proxies.iter().any(|p| p == proxy_key) {
            relations.proxies.push(proxy_key.to_string());
        }
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub fn status(&self) -> IndexStatus {
        self.local_index().state.read().status
    }

    pub fn error_message(&self) -> Option<String> {
        self.local_index().state.read().message.clone()
    }

    /// Fingerprint of the query the members were last indexed with.
    pub fn signature(&self) -> Option<String> {
        self.local_index().state.read().signature.clone()
    }

    pub fn is_done(&self) -> bool {
        self.status() == IndexStatus::Done
    }

    pub fn is_error(&self) -> bool {
        self.status() == IndexStatus::Error
    }

    pub fn set_stale(&self) {
        self.transition(IndexStatus::Stale, None, IndexStatus::Stale);
    }

    pub fn set_done(&self) {
        self.transition(IndexStatus::Done, None, IndexStatus::Done);
    }

    /// Mark the index as failed. The status stays `ERROR` until the index is
    /// invalidated.
    pub fn set_permanent_error<S: Into<String>>(&self, message: S) {
        let message = message.into();
        warn!(axis = %self.source().key, %message, "dimension index failed");
        self.transition(IndexStatus::Error, Some(message), IndexStatus::Error);
    }

    /// Mark the index as failed because its job was cancelled. The error
    /// only lives in this node: the persisted status goes back to `STALE` so
    /// the next hierarchy built over the same dimension indexes it again.
    pub fn set_interrupted<S: Into<String>>(&self, message: S) {
        let message = message.into();
        debug!(axis = %self.source().key, %message, "dimension index interrupted");
        self.transition(IndexStatus::Error, Some(message), IndexStatus::Stale);
    }

    fn transition(&self, status: IndexStatus, message: Option<String>, persisted: IndexStatus) {
        let source = self.source();
        let local = source.local_index();
        let record = {
            let mut state = local.state.write();
            state.status = status;
            state.message = message;
            let mut record = StatusRecord::new(persisted, local.version.clone());
            if persisted == status {
                record.message = state.message.clone();
            }
            record.signature = state.signature.clone();
            record
        };
        if let Some(store) = &local.status_store
            && let Err(e) = store.put(&source.key, record)
        {
            warn!(axis = %source.key, error = %e, "unable to persist index status");
        }
    }

    /// Prepare the member store for a query signature.
    ///
    /// Returns `true` when the store already holds members for the same
    /// signature. A setup failure never propagates: the index is demoted to
    /// `ERROR` instead.
    pub fn init_store(&self, signature: &str) -> bool {
        let local = self.local_index();
        match local.store.setup(signature) {
            Ok(cached) => {
                local.state.write().signature = Some(signature.to_string());
                if !cached && self.status() != IndexStatus::Error {
                    self.set_stale();
                }
                cached
            }
            Err(e) => {
                self.set_permanent_error(format!("member store setup failed: {e}"));
                false
            }
        }
    }

    /// Whether the members were fixed at build time and need no query.
    pub fn is_materialized(&self) -> bool {
        self.local_index().materialized.load(Ordering::Acquire)
    }

    /// Index a known set of members without querying and mark the index done.
    pub fn materialize(&self, values: Vec<Value>, wait: Timeout) -> Result<()> {
        let local = self.local_index();
        local.materialized.store(true, Ordering::Release);
        let signature = format!(
            "static:{:08x}",
            crc32fast::hash(serde_json::to_string(&values)?.as_bytes())
        );
        if !self.init_store(&signature) {
            let members: Vec<Arc<DimensionMember>> =
                values.into_iter().map(|v| local.store.member_by_id(v)).collect();
            local.store.index_members(&members, wait)?;
        } else {
            for value in values {
                local.store.member_by_id(value);
            }
        }
        if !self.is_error() {
            self.set_done();
        }
        Ok(())
    }

    pub fn attach_job(&self, job: Arc<JobHandle>) {
        *self.local_index().job.write() = Some(job);
    }

    /// The compute job currently responsible for this index's members.
    pub fn job(&self) -> Option<Arc<JobHandle>> {
        self.local_index().job.read().clone()
    }

    // ---------------------------------------------------------------------
    // Member store
    // ---------------------------------------------------------------------

    pub fn store(&self) -> &MemberStore {
        &self.local_index().store
    }

    pub fn member_by_id(&self, id: Value) -> Arc<DimensionMember> {
        self.store().member_by_id(id)
    }

    pub fn member(&self, ordinal: usize) -> Option<Arc<DimensionMember>> {
        self.store().member(ordinal)
    }

    pub fn member_by_key(&self, key: &str) -> Option<Arc<DimensionMember>> {
        self.store().member_by_key(key)
    }

    pub fn members(&self, offset: usize, size: usize) -> Result<Vec<Arc<DimensionMember>>> {
        self.store().members(offset, size)
    }

    pub fn members_filtered(
        &self,
        filter: &str,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Arc<DimensionMember>>> {
        self.store().members_filtered(Some(filter), offset, size)
    }

    pub fn members_filter_by_parents(
        &self,
        selections: &Selections,
        filter: Option<&str>,
        offset: usize,
        size: usize,
    ) -> Result<Vec<Arc<DimensionMember>>> {
        self.store()
            .members_filter_by_parents(selections, filter, offset, size)
    }

    pub fn index_member(&self, member: &DimensionMember) -> Result<IndexToken> {
        self.store().index_member(member)
    }

    pub fn index_members(
        &self,
        members: &[Arc<DimensionMember>],
        wait: Timeout,
    ) -> Result<IndexToken> {
        self.store().index_members(members, wait)
    }

    pub fn index_row(&self, row: Vec<Option<Value>>) -> Result<Option<IndexToken>> {
        self.store().index_row(row)
    }

    pub fn init_correlation_mapping(&self, types: Vec<String>) -> Result<CorrelationMapping> {
        self.store().init_correlation_mapping(types)
    }

    pub fn attach_correlation(&self, mapping: CorrelationMapping) {
        self.store().attach_correlation(mapping)
    }

    pub fn index_correlations(&self, rows: Vec<Vec<Value>>, wait: Timeout) -> Result<IndexToken> {
        self.store().index_correlations(rows, wait)
    }

    /// Drop the persisted members and status of this index.
    pub fn drop_persisted(&self) -> Result<()> {
        let source = self.source();
        let local = source.local_index();
        local.store.drop_store()?;
        if let Some(store) = &local.status_store {
            store.remove(&source.key)?;
        }
        Ok(())
    }
}

impl StatusState {
    fn stale() -> Self {
        Self {
            status: IndexStatus::Stale,
            message: None,
            signature: None,
        }
    }
}
