//! Cache of domain hierarchies with per-key locking.

pub mod hierarchy_manager;
pub mod lockable;

pub use hierarchy_manager::{HierarchyManager, ManagerStats};
pub use lockable::{KeyGuard, LockableCache};
