//! Dimension members and the stores holding them.

pub mod backend;
pub mod dimension_member;
pub mod memory;
pub mod store;
pub mod value;

pub use backend::{IndexToken, MemberRecord, MemberStoreBackend, Selections};
pub use dimension_member::{DimensionMember, UNRESOLVED};
pub use memory::{MemoryBackendConfig, MemoryMemberBackend};
pub use store::{CorrelationMapping, MemberStore};
pub use value::Value;
