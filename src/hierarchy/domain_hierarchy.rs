//! The cache entry of one domain: its forest of dimension indexes.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::compute::job::JobState;
use crate::compute::orchestrator::DomainHierarchyCompute;
use crate::context::EngineContext;
use crate::error::{FacetreeError, Result};
use crate::hierarchy::facet::{Facet, FacetRequest};
use crate::index::{Axis, DimensionIndex, IndexStatus};
use crate::model::{Domain, Project};
use crate::timeout::{Timeout, remaining};

/// Lifecycle of a [`DomainHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyState {
    /// Allocated, forest not built yet.
    New,
    /// Forest built and version key computed.
    Init,
    /// Queries dispatched.
    Started,
    /// Every job completed.
    Done,
    /// Execution aborted.
    Cancelled,
}

impl HierarchyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HierarchyState::Done | HierarchyState::Cancelled)
    }
}

impl fmt::Display for HierarchyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HierarchyState::New => "NEW",
            HierarchyState::Init => "INIT",
            HierarchyState::Started => "STARTED",
            HierarchyState::Done => "DONE",
            HierarchyState::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

/// What the builder produces for a domain.
#[derive(Debug, Default)]
pub struct HierarchyContent {
    /// One chain per top-level dimension, root first, proxies included.
    pub structure: Vec<Vec<Arc<DimensionIndex>>>,
    /// Keys of top-level conditional dimensions without parent or children.
    pub segments: Vec<String>,
    /// Ids of every object whose change invalidates the hierarchy.
    pub dependencies: BTreeSet<String>,
    /// Domains this hierarchy proxies into, directly or not.
    pub sub_domains: BTreeSet<String>,
    /// A joined domain failed to resolve for a reason other than a cycle.
    pub degraded: bool,
}

#[derive(Debug, Default)]
struct Forest {
    structure: Vec<Vec<Arc<DimensionIndex>>>,
    indexes: Vec<Arc<DimensionIndex>>,
    lookup: AHashMap<String, Arc<DimensionIndex>>,
    segments: Vec<String>,
    dependencies: BTreeSet<String>,
    sub_domains: BTreeSet<String>,
    degraded: bool,
    gen_key: String,
}

/// The forest of [`DimensionIndex`] nodes of one domain, its dependency set
/// and its version key.
pub struct DomainHierarchy {
    project: Project,
    domain: Domain,
    forest: RwLock<Forest>,
    state: Mutex<HierarchyState>,
    changed: Condvar,
    compute: RwLock<Option<Arc<DomainHierarchyCompute>>>,
    poll_interval: Duration,
    created_at: Instant,
}

impl fmt::Debug for DomainHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainHierarchy")
            .field("domain", &self.domain.id)
            .field("state", &self.state())
            .field("indexes", &self.forest.read().indexes.len())
            .finish()
    }
}

impl DomainHierarchy {
    pub fn new(project: Project, domain: Domain, poll_interval: Duration) -> Self {
        Self {
            project,
            domain,
            forest: RwLock::new(Forest::default()),
            state: Mutex::new(HierarchyState::New),
            changed: Condvar::new(),
            compute: RwLock::new(None),
            poll_interval,
            created_at: Instant::now(),
        }
    }

    /// Install the built forest and its version key, moving to `INIT`.
    pub fn init(&self, content: HierarchyContent, gen_key: String) {
        let mut indexes = Vec::new();
        let mut lookup = AHashMap::new();
        for chain in &content.structure {
            for index in chain {
                if lookup
                    .insert(index.key().to_string(), Arc::clone(index))
                    .is_none()
                {
                    indexes.push(Arc::clone(index));
                }
            }
        }
        *self.forest.write() = Forest {
            structure: content.structure,
            indexes,
            lookup,
            segments: content.segments,
            dependencies: content.dependencies,
            sub_domains: content.sub_domains,
            degraded: content.degraded,
            gen_key,
        };
        self.transition(HierarchyState::Init);
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn domain_id(&self) -> &str {
        &self.domain.id
    }

    pub fn state(&self) -> HierarchyState {
        *self.state.lock()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn structure(&self) -> Vec<Vec<Arc<DimensionIndex>>> {
        self.forest.read().structure.clone()
    }

    /// Every node, in structure order, each once.
    pub fn dimension_indexes(&self) -> Vec<Arc<DimensionIndex>> {
        self.forest.read().indexes.clone()
    }

    pub fn dimension_index(&self, axis: &Axis) -> Option<Arc<DimensionIndex>> {
        self.dimension_index_by_key(&axis.key())
    }

    pub fn dimension_index_by_key(&self, key: &str) -> Option<Arc<DimensionIndex>> {
        self.forest.read().lookup.get(key).cloned()
    }

    pub fn segments(&self) -> Vec<Arc<DimensionIndex>> {
        let forest = self.forest.read();
        forest
            .segments
            .iter()
            .filter_map(|key| forest.lookup.get(key).cloned())
            .collect()
    }

    pub fn dependencies(&self) -> BTreeSet<String> {
        self.forest.read().dependencies.clone()
    }

    pub fn depends_on(&self, object_id: &str) -> bool {
        self.forest.read().dependencies.contains(object_id)
    }

    pub fn sub_domains(&self) -> BTreeSet<String> {
        self.forest.read().sub_domains.clone()
    }

    pub fn gen_key(&self) -> String {
        self.forest.read().gen_key.clone()
    }

    /// Whether the model is unchanged since the hierarchy was built:
    /// recomputes the version key and compares it with the stored one.
    pub fn is_valid(&self, ctx: &EngineContext) -> bool {
        if self.state() == HierarchyState::New || self.is_degraded() {
            return false;
        }
        let (deps, stored) = {
            let forest = self.forest.read();
            (forest.dependencies.clone(), forest.gen_key.clone())
        };
        match ctx
            .key_service()
            .gen_key(&self.domain.name, &deps, ctx.model().as_ref())
        {
            Ok(key) => key == stored,
            Err(e) => {
                debug!(domain = %self.domain.id, error = %e, "hierarchy key no longer computable");
                false
            }
        }
    }

    /// Whether some join was left unexpanded by a failure that a rebuild
    /// may not hit again. Such a hierarchy is never valid.
    pub fn is_degraded(&self) -> bool {
        self.forest.read().degraded
    }

    pub fn attach_compute(&self, compute: Arc<DomainHierarchyCompute>) {
        *self.compute.write() = Some(compute);
    }

    pub fn compute(&self) -> Option<Arc<DomainHierarchyCompute>> {
        self.compute.read().clone()
    }

    pub fn set_started(&self) {
        self.transition(HierarchyState::Started);
    }

    pub fn set_done(&self) {
        info!(domain = %self.domain.id, elapsed_ms = self.age().as_millis() as u64, "hierarchy done");
        self.transition(HierarchyState::Done);
    }

    pub fn set_cancelled(&self) {
        self.transition(HierarchyState::Cancelled);
    }

    fn transition(&self, next: HierarchyState) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        let from = *state;
        debug!(domain = %self.domain.id, %from, to = %next, "hierarchy state");
        *state = next;
        self.changed.notify_all();
    }

    /// Cancel the in-flight compute, waiting up to `grace` for its jobs to
    /// wind down.
    pub fn cancel(&self, grace: Duration) {
        if let Some(compute) = self.compute() {
            compute.cancel(grace);
        }
        self.set_cancelled();
    }

    /// Whether every job of the hierarchy completed.
    ///
    /// A cancelled hierarchy reports `false` to a non-blocking caller and an
    /// error to a blocking one.
    pub fn is_done(&self, timeout: Timeout) -> Result<bool> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        while !state.is_terminal() {
            match remaining(deadline) {
                None => self.changed.wait(&mut state),
                Some(left) if left.is_zero() => return Ok(false),
                Some(left) => {
                    self.changed.wait_for(&mut state, left);
                }
            }
        }
        match *state {
            HierarchyState::Done => Ok(true),
            _ if timeout.is_non_blocking() => Ok(false),
            _ => Err(FacetreeError::cancelled(format!(
                "hierarchy of domain '{}' was cancelled",
                self.domain.id
            ))),
        }
    }

    /// Whether the members of `index` are complete, successfully or not.
    ///
    /// Waits only on the job feeding that index.
    pub fn is_index_done(&self, index: &DimensionIndex, timeout: Timeout) -> Result<bool> {
        let deadline = timeout.deadline();
        loop {
            if index.status() != IndexStatus::Stale {
                return Ok(true);
            }
            if let Some(job) = index.job() {
                let wait = match remaining(deadline) {
                    None => Timeout::Infinite,
                    Some(left) if left.is_zero() => Timeout::NonBlocking,
                    Some(left) => Timeout::Bounded(left),
                };
                return match job.wait(wait) {
                    None => Ok(false),
                    Some(JobState::Cancelled) => self.cancelled_wait(timeout),
                    Some(_) => Ok(index.status() != IndexStatus::Stale),
                };
            }
            if self.state() == HierarchyState::Cancelled {
                return self.cancelled_wait(timeout);
            }
            // No job attached yet: the compute has not been started.
            let sleep = match remaining(deadline) {
                Some(left) if left.is_zero() => return Ok(false),
                Some(left) => left.min(self.poll_interval),
                None => self.poll_interval,
            };
            thread::sleep(sleep);
        }
    }

    fn cancelled_wait(&self, timeout: Timeout) -> Result<bool> {
        if timeout.is_non_blocking() {
            Ok(false)
        } else {
            Err(FacetreeError::cancelled(format!(
                "indexing of domain '{}' was cancelled",
                self.domain.id
            )))
        }
    }

    /// Paged view of one dimension's members for facet consumers.
    pub fn facet(&self, request: &FacetRequest) -> Result<Facet> {
        crate::hierarchy::facet::build_facet(self, request)
    }
}
