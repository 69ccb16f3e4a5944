//! The domain model read by the engine and its in-memory provider.

pub mod fixture;
pub mod memory;
pub mod provider;
pub mod types;

pub use fixture::{ModelFixture, TableFixture};
pub use memory::InMemoryModel;
pub use provider::ModelProvider;
pub use types::{
    Attribute, Dimension, DimensionKind, DimensionOption, Domain, Expression, ImageType, Project,
};
