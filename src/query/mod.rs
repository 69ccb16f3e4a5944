//! Aggregate queries: plan entities, SQL rendering, the data source
//! interface and the generator building queries from a hierarchy.

pub mod generator;
pub mod memory;
pub mod plan;
pub mod source;
pub mod sql;

pub use generator::QueryGenerator;
pub use memory::{MemoryDataSource, Row};
pub use plan::{
    AggregateQuery, ColumnMapping, ColumnRole, GeneratedQuery, OutsideRange, QueryGroup,
    QueryKind, SelectExpr,
};
pub use source::{ColumnStatistics, DataSource, ResultMetadata, ResultStream};
