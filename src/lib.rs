//! # facetree
//!
//! Dependency-aware, incrementally refreshed index of the dimension members
//! of BI domains.
//!
//! A [`manager::HierarchyManager`] serves one [`hierarchy::DomainHierarchy`]
//! per domain: a forest of [`index::DimensionIndex`] nodes, one per
//! dimension, plus proxies reaching into joined domains. Building a
//! hierarchy plans a small set of aggregate queries; running them streams
//! distinct members into per-dimension stores, each with a persisted
//! status so unchanged dimensions are not recomputed.

pub mod cli;
pub mod compute;
pub mod config;
pub mod context;
pub mod error;
pub mod hierarchy;
pub mod index;
pub mod manager;
pub mod member;
pub mod model;
pub mod query;
pub mod timeout;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::context::EngineContext;
    pub use crate::error::{FacetreeError, Result};
    pub use crate::hierarchy::{DomainHierarchy, FacetRequest, HierarchyState};
    pub use crate::index::{Axis, DimensionIndex, IndexStatus};
    pub use crate::manager::HierarchyManager;
    pub use crate::member::Value;
    pub use crate::timeout::Timeout;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
