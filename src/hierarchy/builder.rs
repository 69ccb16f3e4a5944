//! Builds the forest of dimension indexes of a domain.
//!
//! Every root dimension starts a chain holding itself, its descendants and,
//! for joins, proxies of the joined domain's indexes. Joins are expanded
//! only once every local chain exists, through a [`HierarchyResolver`] that
//! reuses or builds the joined domain's hierarchy. A stack of domains being
//! built cuts join cycles.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{FacetreeError, Result};
use crate::hierarchy::domain_hierarchy::{DomainHierarchy, HierarchyContent};
use crate::hierarchy::naming::proxy_display;
use crate::hierarchy::parenthood::DomainHierarchyParenthood;
use crate::index::{Axis, DimensionIndex};
use crate::member::Value;
use crate::model::{Dimension, Domain, ImageType, Project};
use crate::timeout::Timeout;

/// Provides the hierarchies of joined domains.
pub trait HierarchyResolver {
    /// Return a valid hierarchy of `domain_id`, building it if needed.
    /// `in_progress` lists the domains being built by the caller's chain.
    fn resolve(
        &self,
        domain_id: &str,
        in_progress: &mut Vec<String>,
    ) -> Result<Arc<DomainHierarchy>>;
}

/// A join waiting for expansion.
struct PendingJoin {
    chain: usize,
    index: Arc<DimensionIndex>,
    target: String,
}

struct BuildState {
    structure: Vec<Vec<Arc<DimensionIndex>>>,
    segments: Vec<String>,
    dependencies: BTreeSet<String>,
    sub_domains: BTreeSet<String>,
    joins: Vec<PendingJoin>,
    degraded: bool,
}

pub struct HierarchyBuilder<'a> {
    ctx: &'a EngineContext,
    resolver: Option<&'a dyn HierarchyResolver>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self {
            ctx,
            resolver: None,
        }
    }

    /// Expand joins through `resolver`. Without one, joins stay unexpanded.
    pub fn with_resolver(mut self, resolver: &'a dyn HierarchyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Build the hierarchy of `domain_id`, failing only when the domain or
    /// its project cannot be read.
    pub fn build(&self, domain_id: &str, in_progress: &mut Vec<String>) -> Result<DomainHierarchy> {
        let model = self.ctx.model();
        let domain = model.domain(domain_id)?;
        let project = model.project(&domain.project_id)?;

        in_progress.push(domain.id.clone());
        let result = self.build_domain(project, domain, in_progress);
        in_progress.pop();
        result
    }

    fn build_domain(
        &self,
        project: Project,
        domain: Domain,
        in_progress: &mut Vec<String>,
    ) -> Result<DomainHierarchy> {
        let hierarchy =
            DomainHierarchy::new(project.clone(), domain.clone(), self.ctx.config().poll_interval);
        let parenthood = DomainHierarchyParenthood::new(&domain.dimensions);
        let mut state = BuildState {
            structure: Vec::new(),
            segments: Vec::new(),
            dependencies: [project.id.clone(), domain.id.clone()].into_iter().collect(),
            sub_domains: BTreeSet::new(),
            joins: Vec::new(),
            degraded: false,
        };

        for root in parenthood.roots() {
            let Some(dimension) = domain.dimension(&root) else {
                continue;
            };
            state.structure.push(Vec::new());
            let chain = state.structure.len() - 1;
            self.build_node(&domain, &parenthood, dimension, None, chain, &mut state);
        }

        for join in std::mem::take(&mut state.joins) {
            self.expand_join(&domain, join, in_progress, &mut state);
        }

        if state.degraded {
            warn!(domain = %domain.id, "hierarchy built with unresolved joins");
        }
        let gen_key = self.ctx.key_service().gen_key(
            &domain.name,
            &state.dependencies,
            self.ctx.model().as_ref(),
        )?;
        info!(
            domain = %domain.id,
            hierarchies = state.structure.len(),
            dependencies = state.dependencies.len(),
            "hierarchy built"
        );
        hierarchy.init(
            HierarchyContent {
                structure: state.structure,
                segments: state.segments,
                dependencies: state.dependencies,
                sub_domains: state.sub_domains,
                degraded: state.degraded,
            },
            gen_key,
        );
        Ok(hierarchy)
    }

    fn build_node(
        &self,
        domain: &Domain,
        parenthood: &DomainHierarchyParenthood,
        dimension: &Dimension,
        parent: Option<&Arc<DimensionIndex>>,
        chain: usize,
        state: &mut BuildState,
    ) {
        let axis = Axis::dimension(domain.id.as_str(), dimension.id.as_str());
        let has_children = parenthood.has_children(&dimension.id);
        let index = match self.classify(domain, dimension, &axis, parent.is_some()) {
            Ok((image, version)) => {
                state.dependencies.insert(axis.key());
                let index = Arc::new(DimensionIndex::local(
                    self.ctx,
                    axis,
                    dimension.clone(),
                    &domain.default_options,
                    image.clone(),
                    version,
                ));
                match image {
                    ImageType::Object { domain_id } => state.joins.push(PendingJoin {
                        chain,
                        index: Arc::clone(&index),
                        target: domain_id,
                    }),
                    ImageType::Conditional if parent.is_none() => {
                        self.materialize(&index, vec![Value::Bool(true)]);
                        if !has_children {
                            state.segments.push(index.key().to_string());
                        }
                    }
                    ImageType::Constant(values) if parent.is_none() && !has_children => {
                        self.materialize(&index, values);
                    }
                    _ => {}
                }
                index
            }
            Err(e) => Arc::new(DimensionIndex::invalid(
                self.ctx,
                axis,
                dimension.clone(),
                e.to_string(),
            )),
        };

        if let Some(parent) = parent {
            index.set_parent(parent.key());
            parent.add_child(index.key());
        }
        state.structure[chain].push(Arc::clone(&index));

        for child_id in parenthood.children_of(&dimension.id) {
            if let Some(child) = domain.dimension(child_id) {
                self.build_node(domain, parenthood, child, Some(&index), chain, state);
            }
        }
    }

    /// Image type and content version of a dimension, or why it cannot be
    /// indexed.
    fn classify(
        &self,
        domain: &Domain,
        dimension: &Dimension,
        axis: &Axis,
        has_parent: bool,
    ) -> Result<(ImageType, String)> {
        let model = self.ctx.model();
        let image = model.image_type(domain, dimension)?;
        if has_parent && matches!(image, ImageType::Object { .. }) {
            return Err(FacetreeError::model(format!(
                "object dimension '{}' cannot have a parent",
                dimension.name
            )));
        }
        let version = model.content_hash(&axis.key())?;
        Ok((image, version))
    }

    fn materialize(&self, index: &DimensionIndex, values: Vec<Value>) {
        let wait = Timeout::Bounded(self.ctx.config().flush_wait);
        if let Err(e) = index.materialize(values, wait) {
            index.set_permanent_error(e.to_string());
        }
    }

    fn expand_join(
        &self,
        domain: &Domain,
        join: PendingJoin,
        in_progress: &mut Vec<String>,
        state: &mut BuildState,
    ) {
        let Some(resolver) = self.resolver else {
            debug!(axis = %join.index.key(), "no resolver, join left unexpanded");
            return;
        };
        let sub = if in_progress.iter().any(|d| d == &join.target) {
            let mut cycle = in_progress.clone();
            cycle.push(join.target.clone());
            Err(FacetreeError::cyclic(format!(
                "sub-domain join cycle {}",
                cycle.join(" -> ")
            )))
        } else {
            resolver.resolve(&join.target, in_progress)
        };

        let sub = match sub {
            Ok(sub) => sub,
            Err(e) => {
                warn!(axis = %join.index.key(), error = %e, "join expansion failed");
                // Only a cycle fails the same way on every rebuild.
                if !matches!(e, FacetreeError::CyclicDependency(_)) {
                    state.degraded = true;
                }
                let invalid = Arc::new(DimensionIndex::invalid(
                    self.ctx,
                    join.index
                        .axis()
                        .through(&Axis::dimension(join.target.as_str(), join.target.as_str())),
                    join.index.dimension().clone(),
                    e.to_string(),
                ));
                invalid.set_parent(join.index.key());
                join.index.add_child(invalid.key());
                state.structure[join.chain].push(invalid);
                return;
            }
        };

        state.dependencies.extend(sub.dependencies());
        state.sub_domains.insert(sub.domain_id().to_string());
        state.sub_domains.extend(sub.sub_domains());
        state.degraded |= sub.is_degraded();

        let versioned = domain.is_versioned();
        let dynamic_link = join.index.options().is_dynamic();
        for source in sub.dimension_indexes() {
            if source.is_continuous() {
                continue;
            }
            let proxy = Arc::new(DimensionIndex::proxy(
                join.index.axis().through(source.axis()),
                Arc::clone(&source),
                proxy_display(join.index.name(), source.display(), versioned),
                dynamic_link,
            ));
            // Keep the joined domain's own nesting below the join.
            let parent_key = source
                .parent()
                .and_then(|key| sub.dimension_index_by_key(&key))
                .map(|parent| join.index.axis().through(parent.axis()).key())
                .unwrap_or_else(|| join.index.key().to_string());
            proxy.set_parent(&parent_key);
            if let Some(parent) = state.structure[join.chain]
                .iter()
                .find(|i| i.key() == parent_key)
            {
                parent.add_child(proxy.key());
            }
            join.index.add_proxy(proxy.key());
            state.structure[join.chain].push(proxy);
        }
        debug!(axis = %join.index.key(), target = %join.target, "join expanded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexStatus;
    use crate::model::{DimensionKind, Expression, InMemoryModel};
    use crate::query::MemoryDataSource;

    /// Builds joined domains directly, without caching.
    struct Direct<'a> {
        ctx: &'a EngineContext,
    }

    impl HierarchyResolver for Direct<'_> {
        fn resolve(
            &self,
            domain_id: &str,
            in_progress: &mut Vec<String>,
        ) -> Result<Arc<DomainHierarchy>> {
            HierarchyBuilder::new(self.ctx)
                .with_resolver(self)
                .build(domain_id, in_progress)
                .map(Arc::new)
        }
    }

    fn domain(id: &str, version: u32, dimensions: Vec<Dimension>) -> Domain {
        Domain {
            id: id.into(),
            project_id: "p1".into(),
            name: id.to_uppercase(),
            table: id.into(),
            internal_version: version,
            default_options: Default::default(),
            dimensions,
        }
    }

    fn context(domains: Vec<Domain>) -> EngineContext {
        let model = InMemoryModel::new();
        model.upsert_project(Project {
            id: "p1".into(),
            name: "Retail".into(),
            customer_id: "acme".into(),
        });
        for domain in domains {
            model.upsert_domain(domain);
        }
        EngineContext::builder(Arc::new(model), Arc::new(MemoryDataSource::new()))
            .build()
            .unwrap()
    }

    fn build(ctx: &EngineContext, domain_id: &str) -> DomainHierarchy {
        let resolver = Direct { ctx };
        HierarchyBuilder::new(ctx)
            .with_resolver(&resolver)
            .build(domain_id, &mut Vec::new())
            .unwrap()
    }

    #[test]
    fn test_chains_follow_parenthood() {
        let ctx = context(vec![domain(
            "sales",
            0,
            vec![
                Dimension::new("country", "Country", Expression::column("country")),
                Dimension::new("city", "City", Expression::column("city")).with_parent("country"),
                Dimension::new("amount", "Amount", Expression::column("amount"))
                    .with_kind(DimensionKind::Continuous),
            ],
        )]);
        let hierarchy = build(&ctx, "sales");

        let structure = hierarchy.structure();
        assert_eq!(structure.len(), 2);
        let keys: Vec<&str> = structure[0].iter().map(|i| i.key()).collect();
        assert_eq!(keys, vec!["sales/country", "sales/city"]);
        let city = hierarchy.dimension_index_by_key("sales/city").unwrap();
        assert_eq!(city.parent().as_deref(), Some("sales/country"));
        assert!(hierarchy.depends_on("p1"));
        assert!(hierarchy.depends_on("sales"));
        assert!(hierarchy.depends_on("sales/amount"));
        assert!(!hierarchy.gen_key().is_empty());
    }

    #[test]
    fn test_conditional_root_is_materialized_segment() {
        let ctx = context(vec![domain(
            "sales",
            0,
            vec![
                Dimension::new("big", "Big order", Expression::predicate("amount > 1000")),
                Dimension::new("flag", "Flag", Expression::constant(vec![Value::text("A")])),
            ],
        )]);
        let hierarchy = build(&ctx, "sales");

        let big = hierarchy.dimension_index_by_key("sales/big").unwrap();
        assert!(big.is_materialized());
        assert_eq!(big.status(), IndexStatus::Done);
        assert_eq!(big.members(0, 10).unwrap()[0].id(), &Value::Bool(true));
        assert_eq!(hierarchy.segments().len(), 1);

        let flag = hierarchy.dimension_index_by_key("sales/flag").unwrap();
        assert!(flag.is_materialized());
    }

    #[test]
    fn test_join_expands_into_proxies() {
        let ctx = context(vec![
            domain(
                "sales",
                1,
                vec![Dimension::new(
                    "store",
                    "Store",
                    Expression::join("stores", "store_id"),
                )],
            ),
            domain(
                "stores",
                0,
                vec![
                    Dimension::new("region", "Region", Expression::column("region")),
                    Dimension::new("store_city", "City", Expression::column("city"))
                        .with_parent("region"),
                    Dimension::new("surface", "Surface", Expression::column("surface"))
                        .with_kind(DimensionKind::Continuous),
                ],
            ),
        ]);
        let hierarchy = build(&ctx, "sales");

        let join = hierarchy.dimension_index_by_key("sales/store").unwrap();
        assert_eq!(
            join.proxies(),
            vec!["sales/store/region", "sales/store/store_city"]
        );
        let city = hierarchy
            .dimension_index_by_key("sales/store/store_city")
            .unwrap();
        assert!(city.is_proxy());
        assert_eq!(city.name(), "Store City");
        assert_eq!(city.parent().as_deref(), Some("sales/store/region"));
        assert_eq!(city.source().key(), "stores/store_city");
        assert!(hierarchy.dimension_index_by_key("sales/store/surface").is_none());
        assert!(hierarchy.depends_on("stores/store_city"));
        assert!(hierarchy.sub_domains().contains("stores"));
    }

    #[test]
    fn test_join_cycle_degrades_to_invalid_index() {
        let ctx = context(vec![
            domain(
                "a",
                0,
                vec![Dimension::new("to_b", "B", Expression::join("b", "b_id"))],
            ),
            domain(
                "b",
                0,
                vec![Dimension::new("to_a", "A", Expression::join("a", "a_id"))],
            ),
        ]);
        let hierarchy = build(&ctx, "a");

        // The invalid node lives in b's hierarchy; a only proxies it.
        let proxied = hierarchy.dimension_index_by_key("a/to_b/to_a/a").unwrap();
        assert!(proxied.is_proxy());
        assert_eq!(proxied.source().key(), "b/to_a/a");
        assert!(proxied.is_error());
        assert!(proxied.error_message().unwrap().contains("a -> b -> a"));
        assert!(hierarchy.dimension_index_by_key("b/to_a/a").is_none());

        // A cycle fails the same way on every rebuild: the entry is kept.
        assert!(!hierarchy.is_degraded());
        assert!(hierarchy.is_valid(&ctx));
    }

    /// Fails every resolution as a busy lock would.
    struct Busy;

    impl HierarchyResolver for Busy {
        fn resolve(
            &self,
            domain_id: &str,
            _in_progress: &mut Vec<String>,
        ) -> Result<Arc<DomainHierarchy>> {
            Err(FacetreeError::timeout(format!("lock on '{domain_id}' not acquired")))
        }
    }

    #[test]
    fn test_transient_join_failure_is_not_valid() {
        let ctx = context(vec![
            domain(
                "sales",
                0,
                vec![
                    Dimension::new("country", "Country", Expression::column("country")),
                    Dimension::new("store", "Store", Expression::join("stores", "store_id")),
                ],
            ),
            domain(
                "stores",
                0,
                vec![Dimension::new("region", "Region", Expression::column("region"))],
            ),
        ]);
        let hierarchy = HierarchyBuilder::new(&ctx)
            .with_resolver(&Busy)
            .build("sales", &mut Vec::new())
            .unwrap();

        let unresolved = hierarchy.dimension_index_by_key("sales/store/stores").unwrap();
        assert!(unresolved.is_error());
        assert!(unresolved.error_message().unwrap().contains("not acquired"));
        assert!(hierarchy.is_degraded());
        assert!(!hierarchy.is_valid(&ctx));

        // The same model with a working resolver yields a valid hierarchy.
        let rebuilt = build(&ctx, "sales");
        assert!(!rebuilt.is_degraded());
        assert!(rebuilt.is_valid(&ctx));
        assert!(rebuilt.depends_on("stores/region"));
    }

    #[test]
    fn test_nested_object_dimension_is_invalid() {
        let ctx = context(vec![
            domain(
                "sales",
                0,
                vec![
                    Dimension::new("country", "Country", Expression::column("country")),
                    Dimension::new("store", "Store", Expression::join("stores", "store_id"))
                        .with_parent("country"),
                ],
            ),
            domain("stores", 0, vec![]),
        ]);
        let hierarchy = build(&ctx, "sales");
        let store = hierarchy.dimension_index_by_key("sales/store").unwrap();
        assert!(store.is_error());
        assert!(!hierarchy.depends_on("sales/store"));
    }
}
