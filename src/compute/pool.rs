//! Tenant-partitioned execution pools.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::{FacetreeError, Result};

/// One bounded thread pool per tenant, created on first use, so a tenant's
/// slow queries never starve another tenant's.
#[derive(Debug)]
pub struct ExecutionPools {
    threads: usize,
    pools: Mutex<HashMap<String, Arc<ThreadPool>>>,
}

impl ExecutionPools {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn pool(&self, tenant: &str) -> Result<Arc<ThreadPool>> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(tenant) {
            return Ok(Arc::clone(pool));
        }
        let name = if tenant.is_empty() { "default" } else { tenant }.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(move |i| format!("facetree-{name}-{i}"))
            .build()
            .map_err(|e| FacetreeError::internal(format!("Failed to create thread pool: {e}")))?;
        debug!(tenant, threads = self.threads, "created execution pool");
        let pool = Arc::new(pool);
        pools.insert(tenant.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    pub fn tenant_count(&self) -> usize {
        self.pools.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_are_per_tenant() {
        let pools = ExecutionPools::new(2);
        let a = pools.pool("acme").unwrap();
        let again = pools.pool("acme").unwrap();
        let b = pools.pool("globex").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pools.tenant_count(), 2);
        assert_eq!(a.current_num_threads(), 2);
    }
}
