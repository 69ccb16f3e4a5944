//! JSON fixtures describing a model together with its table data.
//!
//! ```json
//! {
//!   "projects": [{"id": "p1", "name": "Retail", "customer_id": "acme"}],
//!   "domains": [{
//!     "id": "sales", "project_id": "p1", "name": "Sales", "table": "sales",
//!     "dimensions": [
//!       {"id": "country", "name": "Country",
//!        "expression": {"type": "column", "column": "country"}}
//!     ]
//!   }],
//!   "tables": {
//!     "sales": {
//!       "rows": [{"country": "FR", "amount": 12.5}],
//!       "statistics": {"amount": {"min": 0, "max": 100}}
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FacetreeError, Result};
use crate::model::memory::InMemoryModel;
use crate::model::types::{Domain, Expression, Project};
use crate::query::memory::{MemoryDataSource, Row};
use crate::query::source::ColumnStatistics;

/// Identifiers end up in axis keys, where `/` separates path segments.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("identifier pattern is valid"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableFixture {
    /// Declared schema. When present, dimensions over unknown columns are
    /// rejected at build time.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub statistics: BTreeMap<String, ColumnStatistics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFixture {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub domains: Vec<Domain>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableFixture>,
}

impl ModelFixture {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let fixture: ModelFixture = serde_json::from_str(json)?;
        fixture.validate()?;
        Ok(fixture)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check identifiers and references between objects.
    pub fn validate(&self) -> Result<()> {
        let check = |kind: &str, id: &str| -> Result<()> {
            if IDENTIFIER.is_match(id) {
                Ok(())
            } else {
                Err(FacetreeError::invalid_argument(format!(
                    "invalid {kind} id '{id}'"
                )))
            }
        };

        for project in &self.projects {
            check("project", &project.id)?;
        }
        for domain in &self.domains {
            check("domain", &domain.id)?;
            if !self.projects.iter().any(|p| p.id == domain.project_id) {
                return Err(FacetreeError::model(format!(
                    "domain '{}' references unknown project '{}'",
                    domain.id, domain.project_id
                )));
            }
            for dimension in &domain.dimensions {
                check("dimension", &dimension.id)?;
                if let Expression::Join { domain_id, .. } = &dimension.expression
                    && !self.domains.iter().any(|d| &d.id == domain_id)
                {
                    return Err(FacetreeError::model(format!(
                        "dimension '{}' joins unknown domain '{domain_id}'",
                        dimension.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Load the fixture into a model provider and a data source.
    pub fn into_parts(self) -> (InMemoryModel, MemoryDataSource) {
        let model = InMemoryModel::new();
        for project in self.projects {
            model.upsert_project(project);
        }
        for domain in self.domains {
            model.upsert_domain(domain);
        }

        let source = MemoryDataSource::new();
        for (name, table) in self.tables {
            if let Some(columns) = table.columns {
                model.set_table_columns(name.clone(), columns);
            }
            for (column, stats) in table.statistics {
                source.set_statistics(name.clone(), column, stats);
            }
            source.add_table(name, table.rows);
        }
        (model, source)
    }
}
