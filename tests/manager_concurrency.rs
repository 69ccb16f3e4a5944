//! Concurrent access to the hierarchy manager.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use facetree::config::EngineConfig;
use facetree::context::EngineContext;
use facetree::error::{FacetreeError, Result};
use facetree::hierarchy::HierarchyState;
use facetree::index::IndexStatus;
use facetree::manager::HierarchyManager;
use facetree::model::{
    Dimension, Domain, Expression, InMemoryModel, ModelFixture, ModelProvider, Project,
};
use facetree::query::MemoryDataSource;
use facetree::timeout::Timeout;

const SHOP: &str = r#"{
    "projects": [
        {"id": "p1", "name": "Retail", "customer_id": "acme"},
        {"id": "p2", "name": "Wholesale", "customer_id": "globex"}
    ],
    "domains": [
        {
            "id": "sales", "project_id": "p1", "name": "Sales", "table": "sales",
            "dimensions": [
                {"id": "country", "name": "Country",
                 "expression": {"type": "column", "column": "country"}},
                {"id": "city", "name": "City", "parent_id": "country",
                 "expression": {"type": "column", "column": "city"}}
            ]
        },
        {
            "id": "orders", "project_id": "p2", "name": "Orders", "table": "orders",
            "dimensions": [
                {"id": "carrier", "name": "Carrier",
                 "expression": {"type": "column", "column": "carrier"}}
            ]
        }
    ],
    "tables": {
        "sales": {"rows": [
            {"country": "FR", "city": "Paris"},
            {"country": "FR", "city": "Lyon"},
            {"country": "DE", "city": "Berlin"}
        ]},
        "orders": {"rows": [{"carrier": "UPS"}, {"carrier": "DHL"}]}
    }
}"#;

struct Engine {
    model: Arc<InMemoryModel>,
    source: Arc<MemoryDataSource>,
    manager: Arc<HierarchyManager>,
}

fn engine(row_delay: Option<Duration>) -> Result<Engine> {
    let (model, source) = ModelFixture::from_json_str(SHOP)?.into_parts();
    let source = Arc::new(match row_delay {
        Some(delay) => source.with_row_delay(delay),
        None => source,
    });
    let model = Arc::new(model);
    let config = EngineConfig::default().with_cancel_grace(Duration::from_millis(500));
    let ctx = EngineContext::builder(model.clone(), source.clone())
        .config(config)
        .build()?;
    Ok(Engine {
        model,
        source,
        manager: Arc::new(HierarchyManager::new(Arc::new(ctx))),
    })
}

#[test]
fn test_concurrent_requests_build_once() -> Result<()> {
    let engine = engine(None)?;

    let hierarchies: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.manager.get_hierarchy("sales")))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<Vec<_>>>()
    })?;

    for hierarchy in &hierarchies[1..] {
        assert!(Arc::ptr_eq(&hierarchies[0], hierarchy));
    }
    assert!(hierarchies[0].is_done(Timeout::Infinite)?);

    let stats = engine.manager.stats();
    assert_eq!(stats.hierarchies_built, 1);
    assert_eq!(stats.computes_spawned, 1);
    assert_eq!(engine.source.executed_count(), 1);
    engine.manager.shutdown();
    Ok(())
}

#[test]
fn test_index_wait_honors_timeout() -> Result<()> {
    let engine = engine(Some(Duration::from_millis(80)))?;
    let hierarchy = engine.manager.get_hierarchy("sales")?;
    let city = hierarchy.dimension_index_by_key("sales/city").unwrap();

    let started = Instant::now();
    assert!(!hierarchy.is_index_done(&city, Timeout::NonBlocking)?);
    assert!(started.elapsed() < Duration::from_millis(50));

    assert!(!hierarchy.is_index_done(&city, Timeout::Bounded(Duration::from_millis(20)))?);

    assert!(hierarchy.is_index_done(&city, Timeout::Infinite)?);
    assert!(city.is_done());
    engine.manager.shutdown();
    Ok(())
}

#[test]
fn test_invalidation_cancels_running_compute() -> Result<()> {
    let engine = engine(Some(Duration::from_millis(100)))?;
    let hierarchy = engine.manager.get_hierarchy("sales")?;

    assert_eq!(engine.manager.invalidate("sales")?, 1);
    assert_eq!(hierarchy.state(), HierarchyState::Cancelled);
    assert!(!hierarchy.is_done(Timeout::NonBlocking)?);
    assert!(hierarchy.is_done(Timeout::Infinite).is_err());
    assert!(engine.manager.cached("sales").is_none());
    assert_eq!(engine.manager.stats().invalidations, 1);

    // The next request starts over.
    let rebuilt = engine.manager.get_hierarchy("sales")?;
    assert!(!Arc::ptr_eq(&hierarchy, &rebuilt));
    assert!(rebuilt.is_done(Timeout::Infinite)?);
    assert_eq!(engine.manager.stats().hierarchies_built, 2);
    engine.manager.shutdown();
    Ok(())
}

#[test]
fn test_rebuild_after_edit_reindexes_interrupted_dimensions() -> Result<()> {
    let engine = engine(Some(Duration::from_millis(100)))?;
    let outdated = engine.manager.get_hierarchy("sales")?;
    thread::sleep(Duration::from_millis(50));

    let town = Dimension::new("city", "Town", Expression::column("city")).with_parent("country");
    engine.model.update_dimension("sales", town)?;
    let rebuilt = engine.manager.get_hierarchy("sales")?;
    assert!(!Arc::ptr_eq(&outdated, &rebuilt));
    assert!(rebuilt.is_done(Timeout::Infinite)?);

    let country = rebuilt.dimension_index_by_key("sales/country").unwrap();
    assert_eq!(country.status(), IndexStatus::Done);
    assert_eq!(country.error_message(), None);
    assert_eq!(country.members(0, 10)?.len(), 2);
    assert_eq!(rebuilt.dimension_index_by_key("sales/city").unwrap().name(), "Town");
    engine.manager.shutdown();
    Ok(())
}

#[test]
fn test_tenants_get_separate_pools() -> Result<()> {
    let engine = engine(None)?;
    let sales = engine.manager.get_hierarchy("sales")?;
    let orders = engine.manager.get_hierarchy("orders")?;
    assert!(sales.is_done(Timeout::Infinite)?);
    assert!(orders.is_done(Timeout::Infinite)?);

    assert_eq!(engine.manager.context().pools().tenant_count(), 2);
    assert_eq!(engine.manager.cached_count(), 2);
    engine.manager.shutdown();
    Ok(())
}

/// A model whose domain `broken` cannot be hashed.
#[derive(Debug)]
struct Unhashable {
    inner: InMemoryModel,
    broken: &'static str,
}

impl ModelProvider for Unhashable {
    fn project(&self, project_id: &str) -> Result<Project> {
        self.inner.project(project_id)
    }

    fn domain(&self, domain_id: &str) -> Result<Domain> {
        self.inner.domain(domain_id)
    }

    fn content_hash(&self, object_id: &str) -> Result<String> {
        if object_id == self.broken {
            return Err(FacetreeError::model(format!("'{object_id}' is unreadable")));
        }
        self.inner.content_hash(object_id)
    }
}

#[test]
fn test_failed_build_still_computes_joined_domains() -> Result<()> {
    let (model, source) = ModelFixture::from_json_str(
        r#"{
        "projects": [{"id": "p1", "name": "Retail"}],
        "domains": [
            {"id": "orders", "project_id": "p1", "name": "Orders", "table": "orders", "dimensions": [
                {"id": "customer", "name": "Customer",
                 "expression": {"type": "join", "domain_id": "customers", "column": "customer_id"}}
            ]},
            {"id": "customers", "project_id": "p1", "name": "Customers", "table": "customers", "dimensions": [
                {"id": "segment", "name": "Segment", "expression": {"type": "column", "column": "segment"}}
            ]}
        ],
        "tables": {"customers": {"rows": [{"segment": "retail"}, {"segment": "pro"}]}}
    }"#,
    )?
    .into_parts();
    let model = Unhashable {
        inner: model,
        broken: "orders",
    };
    let ctx = EngineContext::builder(Arc::new(model), Arc::new(source)).build()?;
    let manager = HierarchyManager::new(Arc::new(ctx));

    assert!(manager.get_hierarchy("orders").is_err());
    let customers = manager.cached("customers").unwrap();
    assert!(customers.is_done(Timeout::Bounded(Duration::from_secs(5)))?);
    assert_eq!(manager.stats().computes_spawned, 1);
    assert_eq!(
        customers
            .dimension_index_by_key("customers/segment")
            .unwrap()
            .members(0, 10)?
            .len(),
        2
    );
    manager.shutdown();
    Ok(())
}
