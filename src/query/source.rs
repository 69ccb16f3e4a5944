//! Consumed interface of the analytical data source.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compute::cancel::CancelToken;
use crate::error::Result;
use crate::member::Value;
use crate::query::plan::AggregateQuery;

/// Statistics the source maintains for a column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    #[serde(default)]
    pub distinct_count: Option<u64>,
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
}

impl ColumnStatistics {
    /// Known bounds of the column, when both are present.
    pub fn bounds(&self) -> Option<(Value, Value)> {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) if !min.is_null() && !max.is_null() => {
                Some((min.clone(), max.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultMetadata {
    pub columns: Vec<String>,
    /// Rows the source fetches per round-trip.
    pub fetch_size: usize,
}

/// A result set being read.
pub trait ResultStream: Send {
    fn metadata(&self) -> &ResultMetadata;

    /// Next row, one value per projected expression.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;

    /// Release the underlying resources early.
    fn cancel(&mut self);
}

pub trait DataSource: Send + Sync + fmt::Debug {
    /// Submit a query. Returns once the source has accepted it, before the
    /// rows are read.
    fn execute(&self, query: &AggregateQuery, cancel: &CancelToken)
    -> Result<Box<dyn ResultStream>>;

    fn statistics(&self, _table: &str, _column: &str) -> Result<Option<ColumnStatistics>> {
        Ok(None)
    }
}
