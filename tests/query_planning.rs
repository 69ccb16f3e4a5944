//! Query generation over built hierarchies.

use std::sync::Arc;

use facetree::config::EngineConfig;
use facetree::context::EngineContext;
use facetree::error::Result;
use facetree::hierarchy::{DomainHierarchy, HierarchyBuilder};
use facetree::index::IndexStatus;
use facetree::member::{MemoryMemberBackend, Value};
use facetree::model::{
    Attribute, Dimension, DimensionKind, Domain, Expression, InMemoryModel, Project,
};
use facetree::query::{ColumnStatistics, GeneratedQuery, MemoryDataSource, QueryGenerator};

fn model(dimensions: Vec<Dimension>) -> InMemoryModel {
    let model = InMemoryModel::new();
    model.upsert_project(Project {
        id: "p1".into(),
        name: "Retail".into(),
        customer_id: String::new(),
    });
    model.upsert_domain(Domain {
        id: "sales".into(),
        project_id: "p1".into(),
        name: "Sales".into(),
        table: "sales".into(),
        internal_version: 0,
        default_options: Default::default(),
        dimensions,
    });
    model
}

fn column(id: &str) -> Dimension {
    Dimension::new(id, id, Expression::column(id))
}

fn plan(ctx: &EngineContext) -> Result<(DomainHierarchy, Vec<GeneratedQuery>)> {
    let hierarchy = HierarchyBuilder::new(ctx).build("sales", &mut Vec::new())?;
    let queries = QueryGenerator::new(ctx).generate(&hierarchy);
    Ok((hierarchy, queries))
}

fn widths(queries: &[GeneratedQuery]) -> Vec<usize> {
    queries.iter().map(|q| q.query.width()).collect()
}

#[test]
fn test_complexity_limits_merging() -> Result<()> {
    let dims = ["a", "b", "c", "d", "e"].map(column).to_vec();
    let ctx = EngineContext::builder(Arc::new(model(dims)), Arc::new(MemoryDataSource::new()))
        .build()?;

    // 100 x 100 fits under 100_000, a third hierarchy does not.
    let (_, queries) = plan(&ctx)?;
    assert_eq!(widths(&queries), vec![2, 2, 1]);
    assert!(queries.iter().all(|q| q.complexity <= 10_000));
    Ok(())
}

#[test]
fn test_width_limits_merging() -> Result<()> {
    let dims = ["a", "b", "c", "d", "e"].map(column).to_vec();
    let source = MemoryDataSource::new();
    for id in ["a", "b", "c", "d", "e"] {
        source.set_statistics(
            "sales",
            id,
            ColumnStatistics {
                distinct_count: Some(5),
                ..Default::default()
            },
        );
    }
    let ctx = EngineContext::builder(Arc::new(model(dims)), Arc::new(source)).build()?;

    let (_, queries) = plan(&ctx)?;
    assert_eq!(widths(&queries), vec![4, 1]);
    assert_eq!(queries[0].complexity, 625);
    assert_eq!(queries[0].groups.len(), 4);
    Ok(())
}

#[test]
fn test_chain_projects_attributes_and_correlates() -> Result<()> {
    let dims = vec![
        column("country"),
        column("city")
            .with_parent("country")
            .with_attribute(Attribute::column("zip", "Zip", "zip_code")),
    ];
    let ctx = EngineContext::builder(Arc::new(model(dims)), Arc::new(MemoryDataSource::new()))
        .config(EngineConfig::default().with_merge_limits(8, 1_000_000))
        .build()?;

    let (_, queries) = plan(&ctx)?;
    assert_eq!(queries.len(), 1);
    assert_eq!(
        queries[0].sql,
        "SELECT \"country\", \"city\", \"zip_code\" FROM \"sales\" \
         GROUP BY \"country\", \"city\", \"zip_code\" \
         ORDER BY \"country\" ASC, \"city\" ASC, \"zip_code\" ASC"
    );
    let group = &queries[0].groups[0];
    assert!(group.correlated);
    assert_eq!(group.root.key(), "sales/country");
    assert_eq!(group.member_positions, vec![0, 1]);
    Ok(())
}

#[test]
fn test_continuous_dimension_uses_statistics_when_bounded() -> Result<()> {
    let dims = vec![
        column("amount").with_kind(DimensionKind::Continuous),
        column("price").with_kind(DimensionKind::Continuous),
    ];
    let source = MemoryDataSource::new();
    source.set_statistics(
        "sales",
        "amount",
        ColumnStatistics {
            distinct_count: None,
            min: Some(Value::Int(0)),
            max: Some(Value::Int(500)),
        },
    );
    let ctx = EngineContext::builder(Arc::new(model(dims)), Arc::new(source)).build()?;

    let (hierarchy, queries) = plan(&ctx)?;
    let amount = hierarchy.dimension_index_by_key("sales/amount").unwrap();
    assert_eq!(amount.status(), IndexStatus::Done);
    assert_eq!(
        amount.members(0, 1)?[0].id(),
        &Value::range(Value::Int(0), Value::Int(500))
    );

    assert_eq!(queries.len(), 1);
    assert!(queries[0].is_range());
    assert_eq!(
        queries[0].sql,
        "SELECT MIN(\"price\"), MAX(\"price\") FROM \"sales\""
    );
    Ok(())
}

#[test]
fn test_failed_store_setup_is_left_out() -> Result<()> {
    let backend = Arc::new(MemoryMemberBackend::new_default());
    backend.fail_setup_for("sales/city");
    let dims = vec![column("country"), column("city").with_parent("country")];
    let ctx = EngineContext::builder(Arc::new(model(dims)), Arc::new(MemoryDataSource::new()))
        .backend(backend)
        .build()?;

    let (hierarchy, queries) = plan(&ctx)?;
    let city = hierarchy.dimension_index_by_key("sales/city").unwrap();
    assert!(city.is_error());
    assert!(city.error_message().unwrap().contains("setup failed"));

    assert_eq!(queries.len(), 1);
    assert_eq!(widths(&queries), vec![1]);
    assert!(!queries[0].groups[0].correlated);
    Ok(())
}

#[test]
fn test_unchanged_signature_skips_query() -> Result<()> {
    let backend = Arc::new(MemoryMemberBackend::new_default());
    let ctx = EngineContext::builder(
        Arc::new(model(vec![column("country")])),
        Arc::new(MemoryDataSource::new()),
    )
    .backend(backend)
    .build()?;

    let (hierarchy, queries) = plan(&ctx)?;
    assert_eq!(queries.len(), 1);
    let country = hierarchy.dimension_index_by_key("sales/country").unwrap();
    country.index_member(&country.member_by_id(Value::text("FR")))?;

    // Populated but never completed: the store is queried again.
    let (_, queries) = plan(&ctx)?;
    assert_eq!(queries.len(), 1);

    // Same SQL, store populated and DONE: nothing to refresh.
    let (completed, _) = plan(&ctx)?;
    completed
        .dimension_index_by_key("sales/country")
        .unwrap()
        .set_done();
    let (rebuilt, queries) = plan(&ctx)?;
    assert!(queries.is_empty());
    assert!(rebuilt.dimension_index_by_key("sales/country").unwrap().is_done());
    Ok(())
}
