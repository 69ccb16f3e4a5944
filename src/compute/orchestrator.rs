//! Runs every query of one hierarchy on the tenant's execution pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compute::cancel::CancelToken;
use crate::compute::executor::QueryIndexer;
use crate::compute::job::{JobHandle, JobState};
use crate::compute::latch::Latch;
use crate::context::EngineContext;
use crate::error::Result;
use crate::hierarchy::{DomainHierarchy, HierarchyState};
use crate::query::QueryGenerator;
use crate::timeout::Timeout;

/// The compute of one [`DomainHierarchy`]: its query jobs and their
/// aggregated outcome.
///
/// Jobs are attached to the indexes they feed, so a caller can wait on the
/// single job relevant to one index.
#[derive(Debug)]
pub struct DomainHierarchyCompute {
    domain_id: String,
    tenant: String,
    cancel: CancelToken,
    jobs: RwLock<Vec<Arc<JobHandle>>>,
    lookup: RwLock<AHashMap<String, Arc<JobHandle>>>,
    outcomes: Mutex<Option<Receiver<(Uuid, JobState)>>>,
}

impl DomainHierarchyCompute {
    pub fn new<S: Into<String>>(domain_id: S, tenant: S) -> Self {
        Self {
            domain_id: domain_id.into(),
            tenant: tenant.into(),
            cancel: CancelToken::new(),
            jobs: RwLock::new(Vec::new()),
            lookup: RwLock::new(AHashMap::new()),
            outcomes: Mutex::new(None),
        }
    }

    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn jobs(&self) -> Vec<Arc<JobHandle>> {
        self.jobs.read().clone()
    }

    /// The job feeding the index with this axis key.
    pub fn job_for(&self, axis_key: &str) -> Option<Arc<JobHandle>> {
        self.lookup.read().get(axis_key).cloned()
    }

    /// Generate the hierarchy's queries, submit one job per query and wait
    /// until every query has been accepted by the source.
    pub fn start(&self, ctx: &Arc<EngineContext>, hierarchy: &DomainHierarchy) -> Result<()> {
        if self.is_cancelled() {
            hierarchy.set_cancelled();
            return Ok(());
        }
        let queries = QueryGenerator::new(ctx).generate(hierarchy);
        let pool = ctx.pools().pool(&self.tenant)?;
        let accepted = Arc::new(Latch::new(queries.len()));
        let (sender, receiver): (Sender<(Uuid, JobState)>, _) = unbounded();
        *self.outcomes.lock() = Some(receiver);

        let mut submitted = Vec::with_capacity(queries.len());
        for query in queries {
            let job = Arc::new(JobHandle::new(query.fingerprint(), self.cancel.clone()));
            for index in query.indexes() {
                index.attach_job(Arc::clone(&job));
                self.lookup
                    .write()
                    .insert(index.key().to_string(), Arc::clone(&job));
            }
            self.jobs.write().push(Arc::clone(&job));
            submitted.push((Arc::new(query), job));
        }
        hierarchy.set_started();
        info!(domain = %self.domain_id, queries = submitted.len(), "starting hierarchy compute");

        for (query, job) in submitted {
            let ctx = Arc::clone(ctx);
            let accepted = Arc::clone(&accepted);
            let sender = sender.clone();
            pool.spawn(move || {
                if job.start() {
                    let outcome = QueryIndexer::new(&ctx, &query, job.cancel_token())
                        .run(&accepted)
                        .map(|_| ());
                    job.finish(&outcome);
                } else {
                    accepted.count_down();
                    for index in query.indexes() {
                        if !index.is_error() {
                            index.set_interrupted("indexing cancelled");
                        }
                    }
                }
                // The receiver only goes away with the compute itself.
                let _ = sender.send((job.id(), job.state()));
            });
        }

        if !accepted.wait(Timeout::Bounded(ctx.config().accept_timeout)) {
            warn!(domain = %self.domain_id, pending = accepted.count(), "queries not accepted in time");
        }
        Ok(())
    }

    /// Wait for every job and settle the hierarchy: DONE when all jobs
    /// completed, CANCELLED when any was cancelled.
    pub fn await_completion(&self, hierarchy: &DomainHierarchy) -> HierarchyState {
        let expected = self.jobs.read().len();
        let receiver = self.outcomes.lock().take();
        let mut cancelled = self.is_cancelled();
        if let Some(receiver) = receiver {
            for _ in 0..expected {
                match receiver.recv() {
                    Ok((id, state)) => {
                        debug!(domain = %self.domain_id, job = %id, ?state, "job finished");
                        cancelled |= state == JobState::Cancelled;
                    }
                    Err(_) => break,
                }
            }
        }
        if cancelled {
            hierarchy.set_cancelled();
        } else {
            hierarchy.set_done();
        }
        hierarchy.state()
    }

    /// Start and wait for completion.
    pub fn run(&self, ctx: &Arc<EngineContext>, hierarchy: &DomainHierarchy) -> Result<HierarchyState> {
        self.start(ctx, hierarchy)?;
        Ok(self.await_completion(hierarchy))
    }

    /// Cancel every job, then give running ones up to `grace` to stop.
    pub fn cancel(&self, grace: Duration) {
        self.cancel.cancel();
        let jobs = self.jobs();
        for job in &jobs {
            job.cancel();
        }
        let deadline = Instant::now() + grace;
        for job in &jobs {
            let left = Timeout::from(deadline.saturating_duration_since(Instant::now()));
            if job.wait(left).is_none() {
                warn!(domain = %self.domain_id, job = %job.id(), "job still running after cancellation grace");
            }
        }
    }
}
