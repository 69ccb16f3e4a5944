//! In-memory model provider.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{FacetreeError, Result};
use crate::model::provider::ModelProvider;
use crate::model::types::{Dimension, Domain, Project};

/// A [`ModelProvider`] over projects and domains held in memory.
///
/// Content hashes are SHA-256 digests of the JSON form of each object, so
/// any edit made through [`InMemoryModel::upsert_domain`] or
/// [`InMemoryModel::update_dimension`] changes them.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    projects: RwLock<HashMap<String, Project>>,
    domains: RwLock<HashMap<String, Domain>>,
    tables: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_project(&self, project: Project) {
        self.projects.write().insert(project.id.clone(), project);
    }

    pub fn upsert_domain(&self, domain: Domain) {
        self.domains.write().insert(domain.id.clone(), domain);
    }

    pub fn remove_domain(&self, domain_id: &str) -> Option<Domain> {
        self.domains.write().remove(domain_id)
    }

    /// Replace a dimension of a domain, or add it when the id is new.
    pub fn update_dimension(&self, domain_id: &str, dimension: Dimension) -> Result<()> {
        let mut domains = self.domains.write();
        let domain = domains
            .get_mut(domain_id)
            .ok_or_else(|| FacetreeError::not_found(format!("domain '{domain_id}'")))?;
        match domain.dimensions.iter_mut().find(|d| d.id == dimension.id) {
            Some(slot) => *slot = dimension,
            None => domain.dimensions.push(dimension),
        }
        Ok(())
    }

    /// Declare the schema of a table so unknown columns are rejected.
    pub fn set_table_columns<S: Into<String>>(&self, table: S, columns: Vec<String>) {
        self.tables.write().insert(table.into(), columns);
    }

    fn digest<T: Serialize>(object: &T) -> Result<String> {
        let bytes = serde_json::to_vec(object)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

impl ModelProvider for InMemoryModel {
    fn project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .read()
            .get(project_id)
            .cloned()
            .ok_or_else(|| FacetreeError::not_found(format!("project '{project_id}'")))
    }

    fn domain(&self, domain_id: &str) -> Result<Domain> {
        self.domains
            .read()
            .get(domain_id)
            .cloned()
            .ok_or_else(|| FacetreeError::not_found(format!("domain '{domain_id}'")))
    }

    fn content_hash(&self, object_id: &str) -> Result<String> {
        if let Some(project) = self.projects.read().get(object_id) {
            return Self::digest(project);
        }
        let domains = self.domains.read();
        match object_id.split_once('/') {
            Some((domain_id, dimension_id)) => {
                if let Some(dimension) = domains
                    .get(domain_id)
                    .and_then(|domain| domain.dimension(dimension_id))
                {
                    return Self::digest(dimension);
                }
            }
            None => {
                if let Some(domain) = domains.get(object_id) {
                    return Self::digest(domain);
                }
            }
        }
        Err(FacetreeError::not_found(format!("object '{object_id}'")))
    }

    fn table_columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables.read().get(table).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{DimensionKind, Expression, ImageType};

    fn model() -> InMemoryModel {
        let model = InMemoryModel::new();
        model.upsert_project(Project {
            id: "p1".into(),
            name: "Retail".into(),
            customer_id: "acme".into(),
        });
        model.upsert_domain(Domain {
            id: "sales".into(),
            project_id: "p1".into(),
            name: "Sales".into(),
            table: "sales".into(),
            internal_version: 0,
            default_options: Default::default(),
            dimensions: vec![Dimension::new("country", "Country", Expression::column("country"))],
        });
        model
    }

    #[test]
    fn test_content_hash_tracks_edits() {
        let model = model();
        let before = model.content_hash("sales/country").unwrap();
        let domain_before = model.content_hash("sales").unwrap();
        assert_eq!(before, model.content_hash("sales/country").unwrap());

        let renamed = Dimension::new("country", "Nation", Expression::column("country"));
        model.update_dimension("sales", renamed).unwrap();
        assert_ne!(before, model.content_hash("sales/country").unwrap());
        assert_ne!(domain_before, model.content_hash("sales").unwrap());
        assert!(model.content_hash("missing").is_err());
        assert!(model.content_hash("sales/missing").is_err());
        assert!(model.content_hash("country").is_err());
    }

    #[test]
    fn test_same_dimension_id_in_two_domains() {
        let model = model();
        let mut orders = model.domain("sales").unwrap();
        orders.id = "orders".into();
        orders.table = "orders".into();
        model.upsert_domain(orders);

        let sales = model.content_hash("sales/country").unwrap();
        for _ in 0..20 {
            let edited = Dimension::new("country", "Ship to", Expression::column("ship_country"));
            model.update_dimension("orders", edited).unwrap();
            assert_eq!(model.content_hash("sales/country").unwrap(), sales);
        }
        assert_ne!(model.content_hash("orders/country").unwrap(), sales);
    }

    #[test]
    fn test_image_type_checks_schema() {
        let model = model();
        model.set_table_columns("sales", vec!["country".into(), "amount".into()]);
        let domain = model.domain("sales").unwrap();

        let ok = Dimension::new("amount", "Amount", Expression::column("amount"))
            .with_kind(DimensionKind::Continuous);
        assert_eq!(model.image_type(&domain, &ok).unwrap(), ImageType::Continuous);

        let bad = Dimension::new("x", "X", Expression::column("nope"));
        assert!(model.image_type(&domain, &bad).is_err());

        let dangling = Dimension::new("j", "J", Expression::join("ghost", "country"));
        assert!(model.image_type(&domain, &dangling).is_err());
    }
}
