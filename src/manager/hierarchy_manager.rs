//! Process-wide registry of domain hierarchies.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compute::DomainHierarchyCompute;
use crate::context::EngineContext;
use crate::error::Result;
use crate::hierarchy::{DomainHierarchy, HierarchyBuilder, HierarchyResolver};
use crate::manager::lockable::LockableCache;

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub hierarchies_built: u64,
    pub computes_spawned: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hierarchies_built: AtomicU64,
    computes_spawned: AtomicU64,
    invalidations: AtomicU64,
}

/// Serves one [`DomainHierarchy`] per domain, rebuilding it when the model
/// changed and computing it in the background.
///
/// At most one build of a domain runs at a time. The returned hierarchy may
/// still be computing; wait on [`DomainHierarchy::is_done`] for its members.
#[derive(Debug)]
pub struct HierarchyManager {
    ctx: Arc<EngineContext>,
    cache: LockableCache<DomainHierarchy>,
    counters: Counters,
    coordinators: Mutex<Vec<JoinHandle<()>>>,
}

/// Resolves joined domains during one build, collecting every hierarchy
/// built on the way.
struct BuildSession<'a> {
    manager: &'a HierarchyManager,
    built: RefCell<Vec<Arc<DomainHierarchy>>>,
}

impl HierarchyResolver for BuildSession<'_> {
    fn resolve(
        &self,
        domain_id: &str,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<DomainHierarchy>> {
        self.manager.get_or_build(domain_id, self, in_progress)
    }
}

impl HierarchyManager {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let lock_timeout = ctx.config().lock_timeout;
        Self {
            ctx,
            cache: LockableCache::new(lock_timeout),
            counters: Counters::default(),
            coordinators: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            hierarchies_built: self.counters.hierarchies_built.load(Ordering::Relaxed),
            computes_spawned: self.counters.computes_spawned.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    /// The cached hierarchy of a domain, valid or not.
    pub fn cached(&self, domain_id: &str) -> Option<Arc<DomainHierarchy>> {
        self.cache.get(domain_id)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Return the hierarchy of `domain_id`, building and starting its
    /// compute when the cached one is missing or outdated.
    ///
    /// Fails only when the domain or its project cannot be read.
    pub fn get_hierarchy(&self, domain_id: &str) -> Result<Arc<DomainHierarchy>> {
        if let Some(hierarchy) = self.valid_entry(domain_id) {
            return Ok(hierarchy);
        }
        let session = BuildSession {
            manager: self,
            built: RefCell::new(Vec::new()),
        };
        let result = self.get_or_build(domain_id, &session, &mut Vec::new());
        // Joined domains cached before a failure still need their compute.
        self.spawn_computes(session.built.into_inner())?;
        result
    }

    fn valid_entry(&self, domain_id: &str) -> Option<Arc<DomainHierarchy>> {
        self.cache
            .get(domain_id)
            .filter(|hierarchy| hierarchy.is_valid(&self.ctx))
    }

    fn get_or_build(
        &self,
        domain_id: &str,
        session: &BuildSession<'_>,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<DomainHierarchy>> {
        if let Some(hierarchy) = self.valid_entry(domain_id) {
            return Ok(hierarchy);
        }
        let _guard = self.cache.lock(domain_id)?;
        // Another thread may have rebuilt it while we waited for the lock.
        if let Some(hierarchy) = self.valid_entry(domain_id) {
            debug!(domain = domain_id, "hierarchy rebuilt concurrently");
            return Ok(hierarchy);
        }
        if let Some(outdated) = self.cache.get(domain_id) {
            outdated.cancel(self.ctx.config().cancel_grace);
        }

        let hierarchy = Arc::new(
            HierarchyBuilder::new(&self.ctx)
                .with_resolver(session)
                .build(domain_id, in_progress)?,
        );
        self.counters.hierarchies_built.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(domain_id, Arc::clone(&hierarchy));
        // Joined domains finish building first, so they are computed first.
        session.built.borrow_mut().push(Arc::clone(&hierarchy));
        Ok(hierarchy)
    }

    fn spawn_computes(&self, built: Vec<Arc<DomainHierarchy>>) -> Result<()> {
        if built.is_empty() {
            return Ok(());
        }
        let work: Vec<(Arc<DomainHierarchy>, Arc<DomainHierarchyCompute>)> = built
            .into_iter()
            .map(|hierarchy| {
                let project = hierarchy.project();
                let tenant = if project.customer_id.is_empty() {
                    project.id.clone()
                } else {
                    project.customer_id.clone()
                };
                let compute = Arc::new(DomainHierarchyCompute::new(
                    hierarchy.domain_id().to_string(),
                    tenant,
                ));
                hierarchy.attach_compute(Arc::clone(&compute));
                (hierarchy, compute)
            })
            .collect();
        self.counters
            .computes_spawned
            .fetch_add(work.len() as u64, Ordering::Relaxed);

        let requester = work
            .last()
            .map(|(h, _)| h.domain_id().to_string())
            .unwrap_or_default();
        let ctx = Arc::clone(&self.ctx);
        let handle = thread::Builder::new()
            .name(format!("facetree-compute-{requester}"))
            .spawn(move || {
                for (hierarchy, compute) in work {
                    match compute.run(&ctx, &hierarchy) {
                        Ok(state) => {
                            debug!(domain = %hierarchy.domain_id(), %state, "compute finished")
                        }
                        Err(e) => {
                            warn!(domain = %hierarchy.domain_id(), error = %e, "compute failed");
                            hierarchy.set_cancelled();
                        }
                    }
                }
            })?;

        let mut coordinators = self.coordinators.lock();
        coordinators.retain(|h| !h.is_finished());
        coordinators.push(handle);
        Ok(())
    }

    /// Drop the hierarchy of `domain_id` and its persisted indexes, cancel
    /// its compute and evict every cached hierarchy depending on it.
    ///
    /// Returns the number of evicted hierarchies.
    pub fn invalidate(&self, domain_id: &str) -> Result<usize> {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        let mut evicted = 0;
        {
            let _guard = self.cache.lock(domain_id)?;
            if let Some(hierarchy) = self.cache.remove(domain_id) {
                hierarchy.cancel(self.ctx.config().cancel_grace);
                for index in hierarchy.dimension_indexes() {
                    if index.is_proxy() || index.axis().domain_id() != domain_id {
                        continue;
                    }
                    if let Err(e) = index.drop_persisted() {
                        warn!(axis = %index.key(), error = %e, "unable to drop index");
                    }
                }
                evicted += 1;
            }
        }
        evicted += self.evict_dependents(domain_id);
        info!(domain = domain_id, evicted, "domain invalidated");
        Ok(evicted)
    }

    /// Evict, without touching their stores, the hierarchies depending on
    /// `object_id`.
    pub fn evict_dependents(&self, object_id: &str) -> usize {
        let mut evicted = 0;
        for (key, hierarchy) in self.cache.entries() {
            if key == object_id || !hierarchy.depends_on(object_id) {
                continue;
            }
            match self.cache.lock(&key) {
                Ok(_guard) => {
                    if let Some(current) = self.cache.get(&key)
                        && Arc::ptr_eq(&current, &hierarchy)
                    {
                        self.cache.remove(&key);
                        evicted += 1;
                        debug!(domain = %key, dependency = object_id, "dependent hierarchy evicted");
                    }
                }
                Err(e) => warn!(domain = %key, error = %e, "dependent hierarchy not evicted"),
            }
        }
        evicted
    }

    /// Cancel every compute and wait for the background threads.
    pub fn shutdown(&self) {
        for (_, hierarchy) in self.cache.entries() {
            hierarchy.cancel(self.ctx.config().cancel_grace);
        }
        let handles: Vec<JoinHandle<()>> = self.coordinators.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("compute coordinator panicked");
            }
        }
    }
}
