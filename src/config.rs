//! Engine configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FacetreeError, Result};

/// Configuration shared by the builder, the query generator, the executor
/// and the hierarchy manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads per tenant execution pool.
    /// If None, uses the number of CPU cores.
    pub worker_threads: Option<usize>,

    /// Maximum projected columns of a merged query.
    pub max_merged_columns: usize,

    /// Upper bound on the product of estimated complexities of merged hierarchies.
    pub max_merged_complexity: u64,

    /// Cardinality assumed for a column without statistics.
    pub default_cardinality: u64,

    /// Rows buffered before a flush. If None, uses the result set fetch size.
    pub buffer_commit_size: Option<usize>,

    /// Bound on a flush that waits for the backend acknowledgment.
    pub flush_wait: Duration,

    /// How long to poll for indexing completion once a result set is exhausted.
    pub indexing_timeout: Duration,

    /// Sleep between two completion polls.
    pub poll_interval: Duration,

    /// Bound on waiting for all queries of a compute to be accepted.
    pub accept_timeout: Duration,

    /// Grace period given to a cancelled compute to wind down.
    pub cancel_grace: Duration,

    /// Bound on acquiring a per-domain lock.
    pub lock_timeout: Duration,

    /// Stop reading a result set after this many rows. None = unlimited.
    pub max_records: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_merged_columns: 4,
            max_merged_complexity: 100_000,
            default_cardinality: 100,
            buffer_commit_size: None,
            flush_wait: Duration::from_secs(5),
            indexing_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
            accept_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(60),
            max_records: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check for settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == Some(0) {
            return Err(FacetreeError::invalid_config("worker_threads must be positive"));
        }
        if self.max_merged_columns == 0 {
            return Err(FacetreeError::invalid_config(
                "max_merged_columns must be positive",
            ));
        }
        if self.buffer_commit_size == Some(0) {
            return Err(FacetreeError::invalid_config(
                "buffer_commit_size must be positive",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(FacetreeError::invalid_config("poll_interval must be positive"));
        }
        Ok(())
    }

    /// Effective worker count of a tenant pool.
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(num_cpus::get)
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn with_merge_limits(mut self, max_columns: usize, max_complexity: u64) -> Self {
        self.max_merged_columns = max_columns;
        self.max_merged_complexity = max_complexity;
        self
    }

    pub fn with_default_cardinality(mut self, cardinality: u64) -> Self {
        self.default_cardinality = cardinality;
        self
    }

    pub fn with_buffer_commit_size(mut self, size: usize) -> Self {
        self.buffer_commit_size = Some(size);
        self
    }

    pub fn with_flush_wait(mut self, wait: Duration) -> Self {
        self.flush_wait = wait;
        self
    }

    pub fn with_indexing_timeout(mut self, timeout: Duration) -> Self {
        self.indexing_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_records(mut self, max_records: u64) -> Self {
        self.max_records = Some(max_records);
        self
    }
}
