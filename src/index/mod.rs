//! Dimension index nodes, their identifiers and their persisted status.

pub mod axis;
pub mod dimension_index;
pub mod status;

pub use axis::Axis;
pub use dimension_index::{DimensionIndex, DisplayName, IndexKind, Relations};
pub use status::{FileStatusStore, IndexStatus, MemoryStatusStore, StatusRecord, StatusStore};
