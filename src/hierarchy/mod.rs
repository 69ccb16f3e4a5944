//! Per-domain forests of dimension indexes.

pub mod builder;
pub mod domain_hierarchy;
pub mod facet;
pub mod key;
pub mod naming;
pub mod parenthood;

pub use builder::{HierarchyBuilder, HierarchyResolver};
pub use domain_hierarchy::{DomainHierarchy, HierarchyContent, HierarchyState};
pub use facet::{Facet, FacetItem, FacetRequest, FacetState};
pub use key::{CacheKeyService, Sha256KeyService};
pub use naming::proxy_display;
pub use parenthood::DomainHierarchyParenthood;
