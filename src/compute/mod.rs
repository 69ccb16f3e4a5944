//! Query execution: jobs, tenant pools, the indexer and the per-hierarchy
//! orchestrator.

pub mod cancel;
pub mod executor;
pub mod job;
pub mod latch;
pub mod orchestrator;
pub mod pool;

pub use cancel::CancelToken;
pub use executor::{IndexerReport, QueryIndexer};
pub use job::{JobHandle, JobState};
pub use latch::Latch;
pub use orchestrator::DomainHierarchyCompute;
pub use pool::ExecutionPools;
