//! Output formatting for CLI commands.

use ahash::AHashMap;
use serde::Serialize;

use crate::cli::args::{FacetreeArgs, OutputFormat};
use crate::error::Result;
use crate::hierarchy::{DomainHierarchy, Facet, FacetState};
use crate::index::DimensionIndex;
use crate::model::ImageType;
use crate::query::GeneratedQuery;

/// One dimension index of a built hierarchy.
#[derive(Debug, Serialize)]
pub struct IndexReport {
    pub axis: String,
    pub name: String,
    pub path: String,
    pub kind: &'static str,
    pub image: &'static str,
    pub status: String,
    pub message: Option<String>,
    pub parent: Option<String>,
    pub members: Option<usize>,
    pub visible: bool,
    /// Ancestors within the hierarchy.
    pub depth: usize,
}

impl IndexReport {
    pub fn from_index(index: &DimensionIndex) -> Self {
        Self {
            axis: index.key().to_string(),
            name: index.name().to_string(),
            path: index.path().to_string(),
            kind: if index.is_proxy() { "proxy" } else { "local" },
            image: image_label(index.image()),
            status: index.status().to_string(),
            message: index.error_message(),
            parent: index.parent(),
            members: index.store().member_count().ok(),
            visible: index.is_visible(),
            depth: 0,
        }
    }
}

/// Result of the `build` command.
#[derive(Debug, Serialize)]
pub struct HierarchyReport {
    pub domain: String,
    pub state: String,
    pub gen_key: String,
    pub elapsed_ms: u64,
    pub indexes: Vec<IndexReport>,
    pub segments: Vec<String>,
    pub dependencies: Vec<String>,
    pub sub_domains: Vec<String>,
}

impl HierarchyReport {
    pub fn from_hierarchy(hierarchy: &DomainHierarchy) -> Self {
        let mut indexes: Vec<IndexReport> = hierarchy
            .dimension_indexes()
            .iter()
            .map(|i| IndexReport::from_index(i))
            .collect();
        let parents: AHashMap<String, Option<String>> = indexes
            .iter()
            .map(|i| (i.axis.clone(), i.parent.clone()))
            .collect();
        for index in indexes.iter_mut() {
            let mut parent = index.parent.as_ref();
            while let Some(key) = parent
                && index.depth < parents.len()
            {
                index.depth += 1;
                parent = parents.get(key).and_then(Option::as_ref);
            }
        }
        Self {
            domain: hierarchy.domain_id().to_string(),
            state: hierarchy.state().to_string(),
            gen_key: hierarchy.gen_key(),
            elapsed_ms: hierarchy.age().as_millis() as u64,
            indexes,
            segments: hierarchy
                .segments()
                .iter()
                .map(|i| i.key().to_string())
                .collect(),
            dependencies: hierarchy.dependencies().into_iter().collect(),
            sub_domains: hierarchy.sub_domains().into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueryReport {
    pub fingerprint: String,
    pub kind: &'static str,
    pub complexity: u64,
    pub sql: String,
    pub indexes: Vec<String>,
}

/// Result of the `plan` command.
#[derive(Debug, Serialize)]
pub struct PlanReport {
    pub domain: String,
    pub queries: Vec<QueryReport>,
}

impl PlanReport {
    pub fn new(domain: &str, queries: &[GeneratedQuery]) -> Self {
        Self {
            domain: domain.to_string(),
            queries: queries
                .iter()
                .map(|q| QueryReport {
                    fingerprint: q.fingerprint(),
                    kind: if q.is_range() { "range" } else { "members" },
                    complexity: q.complexity,
                    sql: q.sql.clone(),
                    indexes: q.indexes().iter().map(|i| i.key().to_string()).collect(),
                })
                .collect(),
        }
    }
}

fn image_label(image: Option<&ImageType>) -> &'static str {
    match image {
        Some(ImageType::Scalar) => "scalar",
        Some(ImageType::Continuous) => "continuous",
        Some(ImageType::Conditional) => "conditional",
        Some(ImageType::Object { .. }) => "object",
        Some(ImageType::Constant(_)) => "constant",
        None => "invalid",
    }
}

/// Rendering of a command result for humans.
pub trait HumanOutput {
    fn print_human(&self);
}

impl HumanOutput for HierarchyReport {
    fn print_human(&self) {
        println!("Domain: {} ({})", self.domain, self.state);
        println!("════════════════════════");
        for index in &self.indexes {
            let indent = "  ".repeat(index.depth);
            let members = index
                .members
                .map(|n| format!("{n} members"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{indent}{} [{}] {} {} ({members})",
                index.name, index.axis, index.image, index.status
            );
            if let Some(message) = &index.message {
                println!("{indent}  ! {message}");
            }
        }
        if !self.segments.is_empty() {
            println!();
            println!("Segments: {}", self.segments.join(", "));
        }
        println!();
        println!("Dependencies: {}", self.dependencies.len());
        println!("Key: {}", self.gen_key);
        println!("Elapsed: {}ms", self.elapsed_ms);
    }
}

impl HumanOutput for PlanReport {
    fn print_human(&self) {
        println!("Queries for {}:", self.domain);
        println!("════════════════════════");
        if self.queries.is_empty() {
            println!("(nothing to refresh)");
        }
        for (i, query) in self.queries.iter().enumerate() {
            println!();
            println!(
                "Query {} [{}] {} complexity={}",
                i + 1,
                query.fingerprint,
                query.kind,
                query.complexity
            );
            println!("─────────────");
            println!("{}", query.sql);
            println!("feeds: {}", query.indexes.join(", "));
        }
    }
}

impl HumanOutput for Facet {
    fn print_human(&self) {
        println!("{} [{}]", self.name, self.axis);
        println!("─────────────");
        match &self.state {
            FacetState::Error(message) => {
                println!("error: {message}");
                return;
            }
            FacetState::Computing => println!("(still computing)"),
            FacetState::Ready => {}
        }
        for item in &self.items {
            let mark = if item.selected { "*" } else { " " };
            println!("{mark} {}", item.label);
        }
        if self.has_more {
            println!("  ...");
        }
    }
}

/// Write a command result in the requested format.
pub fn output_result<T: Serialize + HumanOutput>(result: &T, args: &FacetreeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            result.print_human();
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

fn output_json<T: Serialize>(result: &T, args: &FacetreeArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}
