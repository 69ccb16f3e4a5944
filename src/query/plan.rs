//! Query plan entities.
//!
//! Plans are ephemeral: they live from generation until the executor has
//! drained their result set.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::index::DimensionIndex;
use crate::member::Value;

/// One projected expression of an aggregate query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectExpr {
    Column(String),
    Min(String),
    Max(String),
}

impl SelectExpr {
    pub fn column(&self) -> &str {
        match self {
            SelectExpr::Column(c) | SelectExpr::Min(c) | SelectExpr::Max(c) => c,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !matches!(self, SelectExpr::Column(_))
    }
}

/// Restricts rows to those whose `column` lies outside `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutsideRange {
    pub column: String,
    pub min: Value,
    pub max: Value,
}

/// A `SELECT .. FROM table [WHERE ..] [GROUP BY ..] [ORDER BY ..]` query.
///
/// Plain columns are grouped and ordered ascending in projection order, so
/// every column of a result set comes out sorted within its run of equal
/// preceding columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub table: String,
    pub select: Vec<SelectExpr>,
    pub outside: Option<OutsideRange>,
}

impl AggregateQuery {
    pub fn new<S: Into<String>>(table: S) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            outside: None,
        }
    }

    /// Append an expression and return its result position.
    pub fn push(&mut self, expr: SelectExpr) -> usize {
        self.select.push(expr);
        self.select.len() - 1
    }

    pub fn with_outside(mut self, outside: OutsideRange) -> Self {
        self.outside = Some(outside);
        self
    }

    /// Plain columns, which the query groups and orders by.
    pub fn group_by(&self) -> impl Iterator<Item = &str> {
        self.select
            .iter()
            .filter(|e| !e.is_aggregate())
            .map(SelectExpr::column)
    }

    pub fn width(&self) -> usize {
        self.select.len()
    }
}

/// What a result column feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Member id of the index.
    Member,
    /// Attribute at the given position of the index's members.
    Attribute(usize),
    RangeMin,
    RangeMax,
}

/// Binds a result column back to the index it feeds.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub position: usize,
    pub index: Arc<DimensionIndex>,
    pub role: ColumnRole,
    /// Whether values of this column materialize members.
    pub compute_index: bool,
    /// Hierarchy group of the query this column belongs to.
    pub group: usize,
}

/// One top-level hierarchy served by a query.
#[derive(Debug, Clone)]
pub struct QueryGroup {
    /// Root of the hierarchy, owner of its correlation table.
    pub root: Arc<DimensionIndex>,
    /// Positions of the member columns, in hierarchy order.
    pub member_positions: Vec<usize>,
    /// Whether rows of this group are committed as correlation tuples.
    pub correlated: bool,
}

/// What a generated query produces.
#[derive(Debug, Clone)]
pub enum QueryKind {
    /// Distinct members of one or more hierarchies.
    Members,
    /// Bounds of one continuous index, merged with the range already known.
    Range {
        index: Arc<DimensionIndex>,
        inner: Option<(Value, Value)>,
    },
}

/// A rendered query and everything needed to decode its result set.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub query: AggregateQuery,
    pub kind: QueryKind,
    pub mappings: Vec<ColumnMapping>,
    pub groups: Vec<QueryGroup>,
    pub sql: String,
    /// Estimated number of result rows.
    pub complexity: u64,
}

impl GeneratedQuery {
    /// Distinct indexes fed by this query, in mapping order.
    pub fn indexes(&self) -> Vec<Arc<DimensionIndex>> {
        let mut indexes: Vec<Arc<DimensionIndex>> = Vec::new();
        for mapping in &self.mappings {
            if !indexes.iter().any(|i| i.key() == mapping.index.key()) {
                indexes.push(Arc::clone(&mapping.index));
            }
        }
        indexes
    }

    pub fn fingerprint(&self) -> String {
        super::sql::fingerprint(&self.sql)
    }

    pub fn is_range(&self) -> bool {
        matches!(self.kind, QueryKind::Range { .. })
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_skips_aggregates() {
        let mut query = AggregateQuery::new("sales");
        assert_eq!(query.push(SelectExpr::Column("country".into())), 0);
        query.push(SelectExpr::Min("amount".into()));
        query.push(SelectExpr::Column("city".into()));
        assert_eq!(query.group_by().collect::<Vec<_>>(), vec!["country", "city"]);
        assert_eq!(query.width(), 3);
    }
}
