//! Command implementations for the facetree CLI.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{FacetreeError, Result};
use crate::hierarchy::{FacetRequest, HierarchyBuilder};
use crate::index::FileStatusStore;
use crate::manager::HierarchyManager;
use crate::member::Selections;
use crate::model::ModelFixture;
use crate::query::QueryGenerator;
use crate::timeout::Timeout;

/// Execute a CLI command.
pub fn execute_command(args: FacetreeArgs) -> Result<()> {
    match &args.command {
        Command::Build(build_args) => build_hierarchy(build_args.clone(), &args),
        Command::Plan(plan_args) => plan_queries(plan_args.clone(), &args),
        Command::Facet(facet_args) => show_facet(facet_args.clone(), &args),
    }
}

fn load_config(cli_args: &FacetreeArgs) -> Result<EngineConfig> {
    match &cli_args.config {
        Some(path) => EngineConfig::from_json_file(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Wire an engine context over the fixture's model and tables.
fn load_context(
    target: &DomainArgs,
    cli_args: &FacetreeArgs,
    status_file: Option<&std::path::Path>,
) -> Result<Arc<EngineContext>> {
    let fixture = ModelFixture::from_json_file(&target.fixture)?;
    let (model, source) = fixture.into_parts();
    let mut builder =
        EngineContext::builder(Arc::new(model), Arc::new(source)).config(load_config(cli_args)?);
    if let Some(path) = status_file {
        builder = builder.status_store(Arc::new(FileStatusStore::open(path)?));
    }
    Ok(Arc::new(builder.build()?))
}

/// Build a hierarchy and wait for its members.
fn build_hierarchy(args: BuildArgs, cli_args: &FacetreeArgs) -> Result<()> {
    let started = Instant::now();
    let ctx = load_context(&args.target, cli_args, args.status_file.as_deref())?;
    let manager = HierarchyManager::new(ctx);
    let hierarchy = manager.get_hierarchy(&args.target.domain)?;

    let done = hierarchy.is_done(Timeout::from_millis(args.timeout_ms))?;
    info!(
        domain = %args.target.domain,
        done,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "build finished"
    );
    output_result(&HierarchyReport::from_hierarchy(&hierarchy), cli_args)?;
    manager.shutdown();
    Ok(())
}

/// Generate the queries of a freshly built hierarchy without running them.
fn plan_queries(args: PlanArgs, cli_args: &FacetreeArgs) -> Result<()> {
    let ctx = load_context(&args.target, cli_args, None)?;
    let hierarchy = HierarchyBuilder::new(&ctx).build(&args.target.domain, &mut Vec::new())?;
    let queries = QueryGenerator::new(&ctx).generate(&hierarchy);
    output_result(&PlanReport::new(&args.target.domain, &queries), cli_args)
}

/// Page through the members of one dimension.
fn show_facet(args: FacetArgs, cli_args: &FacetreeArgs) -> Result<()> {
    if args.size == 0 {
        return Err(FacetreeError::invalid_argument("page size must be positive"));
    }
    let ctx = load_context(&args.target, cli_args, None)?;
    let manager = HierarchyManager::new(ctx);
    let hierarchy = manager.get_hierarchy(&args.target.domain)?;

    let mut selections = Selections::new();
    for (axis, value) in args.selections {
        let mut values = selections.get(&axis).map(<[_]>::to_vec).unwrap_or_default();
        values.push(value);
        selections = selections.select(axis, values);
    }
    let mut request = FacetRequest::new(args.axis)
        .with_selections(selections)
        .with_page(args.offset, args.size)
        .with_wait(Timeout::from_millis(args.timeout_ms));
    if let Some(filter) = args.filter {
        request = request.with_filter(filter);
    }

    let facet = hierarchy.facet(&request)?;
    output_result(&facet, cli_args)?;
    manager.shutdown();
    Ok(())
}
