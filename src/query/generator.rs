//! Turns a hierarchy forest into the aggregate queries that populate it.
//!
//! Each top-level hierarchy becomes a projection (one column per member
//! dimension plus its attributes). Projections are merged into a shared
//! query while the merged width and complexity stay under the configured
//! limits. Continuous dimensions get their own `MIN`/`MAX` query unless
//! statistics already bound them, and conditional or constant dimensions
//! are materialized without any query.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::hierarchy::DomainHierarchy;
use crate::index::DimensionIndex;
use crate::member::Value;
use crate::model::{Domain, ImageType};
use crate::query::plan::{
    AggregateQuery, ColumnMapping, ColumnRole, GeneratedQuery, OutsideRange, QueryGroup,
    QueryKind, SelectExpr,
};
use crate::query::sql;
use crate::timeout::Timeout;

/// Projection of one hierarchy, before merging.
#[derive(Debug)]
struct Projection {
    select: Vec<SelectExpr>,
    /// `(node, role)` of each projected expression.
    roles: Vec<(usize, ColumnRole)>,
    nodes: Vec<Arc<DimensionIndex>>,
    correlated: bool,
    complexity: u64,
}

impl Projection {
    fn width(&self) -> usize {
        self.select.len()
    }
}

/// Query being accumulated from merged projections.
#[derive(Debug)]
struct MainQuery {
    query: AggregateQuery,
    mappings: Vec<ColumnMapping>,
    groups: Vec<QueryGroup>,
    complexity: u64,
}

impl MainQuery {
    fn new(table: &str) -> Self {
        Self {
            query: AggregateQuery::new(table),
            mappings: Vec::new(),
            groups: Vec::new(),
            complexity: 1,
        }
    }

    fn merge(&mut self, projection: Projection) {
        let group = self.groups.len();
        let mut member_positions = Vec::new();
        for (expr, (node, role)) in projection.select.into_iter().zip(projection.roles) {
            let position = self.query.push(expr);
            if role == ColumnRole::Member {
                member_positions.push(position);
            }
            self.mappings.push(ColumnMapping {
                position,
                index: Arc::clone(&projection.nodes[node]),
                role,
                compute_index: role == ColumnRole::Member,
                group,
            });
        }
        self.groups.push(QueryGroup {
            root: Arc::clone(&projection.nodes[0]),
            member_positions,
            correlated: projection.correlated,
        });
        self.complexity = self.complexity.saturating_mul(projection.complexity);
    }

    fn finish(self) -> GeneratedQuery {
        let sql = sql::render(&self.query);
        GeneratedQuery {
            query: self.query,
            kind: QueryKind::Members,
            mappings: self.mappings,
            groups: self.groups,
            sql,
            complexity: self.complexity,
        }
    }
}

pub struct QueryGenerator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> QueryGenerator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Generate the queries needed to refresh `hierarchy`. Dimensions that
    /// need no query are settled (DONE or ERROR) on the way.
    pub fn generate(&self, hierarchy: &DomainHierarchy) -> Vec<GeneratedQuery> {
        let domain = hierarchy.domain();
        let config = self.ctx.config();
        let mut queries = Vec::new();
        let mut main: Option<MainQuery> = None;

        for chain in hierarchy.structure() {
            let mut members = Vec::new();
            for index in chain.iter().filter(|i| self.is_generated_here(i, domain)) {
                match index.image() {
                    Some(ImageType::Conditional) => {
                        self.materialize(index, vec![Value::Bool(true)]);
                    }
                    Some(ImageType::Constant(values)) => {
                        self.materialize(index, values.clone());
                    }
                    Some(ImageType::Continuous) => {
                        if let Some(query) = self.range_query(domain, index) {
                            queries.push(query);
                        }
                    }
                    Some(_) => members.push(Arc::clone(index)),
                    None => {}
                }
            }

            let root_in_error = chain.first().is_some_and(|root| root.is_error());
            let Some(projection) = self.project(domain, members, root_in_error) else {
                continue;
            };

            let fits = main.as_ref().is_some_and(|m| {
                m.query.width() + projection.width() <= config.max_merged_columns
                    && m.complexity.saturating_mul(projection.complexity)
                        < config.max_merged_complexity
            });
            if !fits && let Some(previous) = main.take() {
                queries.push(previous.finish());
            }
            main.get_or_insert_with(|| MainQuery::new(&domain.table))
                .merge(projection);
        }
        if let Some(last) = main {
            queries.push(last.finish());
        }

        for query in &queries {
            debug!(domain = %domain.id, query = %query.sql, "generated query");
        }
        queries
    }

    fn is_generated_here(&self, index: &DimensionIndex, domain: &Domain) -> bool {
        !index.is_proxy()
            && index.axis().domain_id() == domain.id
            && !index.is_materialized()
            && !index.is_error()
    }

    fn materialize(&self, index: &DimensionIndex, values: Vec<Value>) {
        if let Err(e) = index.materialize(values, Timeout::Bounded(self.ctx.config().flush_wait)) {
            index.set_permanent_error(e.to_string());
        }
    }

    /// Project each node's member column and attribute columns.
    fn select_for(nodes: Vec<Arc<DimensionIndex>>) -> Projection {
        let mut projection = Projection {
            select: Vec::new(),
            roles: Vec::new(),
            nodes: Vec::new(),
            correlated: false,
            complexity: 1,
        };
        for index in nodes {
            let Some(column) = index.dimension().expression.projected_column() else {
                index.set_permanent_error(format!(
                    "dimension '{}' has no projectable column",
                    index.name()
                ));
                continue;
            };
            let node = projection.nodes.len();
            projection.select.push(SelectExpr::Column(column.to_string()));
            projection.roles.push((node, ColumnRole::Member));
            for (position, attribute) in index.attributes().iter().enumerate() {
                if let Some(column) = attribute.expression.projected_column() {
                    projection.select.push(SelectExpr::Column(column.to_string()));
                    projection.roles.push((node, ColumnRole::Attribute(position)));
                }
            }
            projection.nodes.push(index);
        }
        projection
    }

    /// Build the projection of one hierarchy's member dimensions, or `None`
    /// when nothing needs refreshing.
    fn project(
        &self,
        domain: &Domain,
        nodes: Vec<Arc<DimensionIndex>>,
        root_in_error: bool,
    ) -> Option<Projection> {
        let mut projection = Self::select_for(nodes);
        if projection.nodes.is_empty() {
            return None;
        }

        // The standalone rendering is the signature of every store fed by it.
        let mut standalone = AggregateQuery::new(&domain.table);
        for expr in &projection.select {
            standalone.push(expr.clone());
        }
        let signature = sql::fingerprint(&sql::render(&standalone));
        let mut all_cached = true;
        for index in &projection.nodes {
            // A store left partial by an interrupted job is not DONE.
            let cached = index.init_store(&signature);
            all_cached &= cached && index.is_done();
        }
        if projection.nodes.iter().any(|i| i.is_error()) {
            // A store could not be set up: query the others without it.
            let healthy = projection
                .nodes
                .into_iter()
                .filter(|i| !i.is_error())
                .collect();
            projection = Self::select_for(healthy);
            if projection.nodes.is_empty() {
                return None;
            }
        }
        if all_cached {
            debug!(signature = %signature, "skipping unchanged hierarchy");
            for index in &projection.nodes {
                index.set_done();
            }
            return None;
        }

        projection.correlated = projection.nodes.len() > 1
            && !root_in_error
            && self.init_correlation(&projection.nodes);
        projection.complexity = projection
            .nodes
            .iter()
            .map(|index| self.cardinality(domain, index))
            .max()
            .unwrap_or(1);
        Some(projection)
    }

    fn init_correlation(&self, nodes: &[Arc<DimensionIndex>]) -> bool {
        let types = nodes.iter().map(|n| n.key().to_string()).collect();
        match nodes[0].init_correlation_mapping(types) {
            Ok(mapping) => {
                for node in &nodes[1..] {
                    node.attach_correlation(mapping.clone());
                }
                true
            }
            Err(e) => {
                warn!(axis = %nodes[0].key(), error = %e, "correlation mapping unavailable");
                false
            }
        }
    }

    /// Estimated distinct values of a dimension column.
    fn cardinality(&self, domain: &Domain, index: &DimensionIndex) -> u64 {
        let default = self.ctx.config().default_cardinality;
        let Some(column) = index.dimension().expression.projected_column() else {
            return default;
        };
        match self.ctx.source().statistics(&domain.table, column) {
            Ok(Some(stats)) => stats.distinct_count.unwrap_or(default).max(1),
            Ok(None) => default,
            Err(e) => {
                debug!(axis = %index.key(), error = %e, "statistics unavailable");
                default
            }
        }
    }

    /// Settle a continuous dimension from statistics, or plan its range query.
    fn range_query(&self, domain: &Domain, index: &Arc<DimensionIndex>) -> Option<GeneratedQuery> {
        let Some(column) = index.dimension().expression.projected_column() else {
            index.set_permanent_error(format!(
                "dimension '{}' has no projectable column",
                index.name()
            ));
            return None;
        };

        match self.ctx.source().statistics(&domain.table, column) {
            Ok(Some(stats)) => {
                if let Some((min, max)) = stats.bounds() {
                    debug!(axis = %index.key(), "range bounded by statistics");
                    self.materialize(index, vec![Value::range(min, max)]);
                    return None;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(axis = %index.key(), error = %e, "statistics unavailable"),
        }

        let mut query = AggregateQuery::new(&domain.table);
        let min_position = query.push(SelectExpr::Min(column.to_string()));
        let max_position = query.push(SelectExpr::Max(column.to_string()));
        let signature = sql::fingerprint(&sql::render(&query));

        let known = index
            .members(0, 1)
            .ok()
            .and_then(|members| members.first().map(|m| m.id().clone()))
            .filter(|id| matches!(id, Value::Range { .. }));
        let cached = index.init_store(&signature);
        if index.is_error() {
            return None;
        }
        if cached && index.is_done() {
            return None;
        }
        let inner = if cached {
            known.map(|range| {
                let (min, max) = range.bounds();
                (min.clone(), max.clone())
            })
        } else {
            None
        };
        if let Some((min, max)) = &inner {
            query = query.with_outside(OutsideRange {
                column: column.to_string(),
                min: min.clone(),
                max: max.clone(),
            });
        }

        let sql = sql::render(&query);
        Some(GeneratedQuery {
            mappings: vec![
                ColumnMapping {
                    position: min_position,
                    index: Arc::clone(index),
                    role: ColumnRole::RangeMin,
                    compute_index: true,
                    group: 0,
                },
                ColumnMapping {
                    position: max_position,
                    index: Arc::clone(index),
                    role: ColumnRole::RangeMax,
                    compute_index: true,
                    group: 0,
                },
            ],
            groups: Vec::new(),
            kind: QueryKind::Range {
                index: Arc::clone(index),
                inner,
            },
            query,
            sql,
            complexity: 1,
        })
    }
}
