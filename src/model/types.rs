//! Domain model objects read by the indexing engine.

use serde::{Deserialize, Serialize};

use crate::member::value::Value;

/// A project groups domains and carries the tenant used to partition
/// query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub customer_id: String,
}

/// A domain: one analytical entity backed by a table, with its dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub table: String,
    /// 0 for legacy domains; drives the proxy naming convention.
    #[serde(default)]
    pub internal_version: u32,
    /// Defaults every dimension option falls back to.
    #[serde(default)]
    pub default_options: DimensionOption,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl Domain {
    pub fn dimension(&self, dimension_id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id == dimension_id)
    }

    pub fn is_versioned(&self) -> bool {
        self.internal_version > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    #[default]
    Categorical,
    Continuous,
    Index,
    Conditional,
}

/// A declared dimension of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub kind: DimensionKind,
    pub expression: Expression,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub options: DimensionOption,
}

impl Dimension {
    pub fn new<S: Into<String>>(id: S, name: S, expression: Expression) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            kind: DimensionKind::Categorical,
            expression,
            attributes: Vec::new(),
            options: DimensionOption::default(),
        }
    }

    pub fn with_parent<S: Into<String>>(mut self, parent_id: S) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_kind(mut self, kind: DimensionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_options(mut self, options: DimensionOption) -> Self {
        self.options = options;
        self
    }
}

/// An auxiliary value carried by every member of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    pub name: String,
    pub expression: Expression,
}

impl Attribute {
    pub fn column<S: Into<String>>(id: S, name: S, column: S) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            expression: Expression::column(column),
        }
    }
}

/// Definition of a dimension or attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// A column of the domain table.
    Column { column: String },
    /// A fixed set of literal outcomes.
    Constant { values: Vec<Value> },
    /// A boolean condition over the domain table.
    Predicate { sql: String },
    /// An object reference to another domain, joined on `column`.
    Join { domain_id: String, column: String },
}

impl Expression {
    pub fn column<S: Into<String>>(column: S) -> Self {
        Expression::Column {
            column: column.into(),
        }
    }

    pub fn constant(values: Vec<Value>) -> Self {
        Expression::Constant { values }
    }

    pub fn predicate<S: Into<String>>(sql: S) -> Self {
        Expression::Predicate { sql: sql.into() }
    }

    pub fn join<S: Into<String>>(domain_id: S, column: S) -> Self {
        Expression::Join {
            domain_id: domain_id.into(),
            column: column.into(),
        }
    }

    /// Table column this expression projects, if it can be selected.
    pub fn projected_column(&self) -> Option<&str> {
        match self {
            Expression::Column { column } | Expression::Join { column, .. } => Some(column),
            _ => None,
        }
    }
}

/// Display and navigation settings. Unset fields fall back to the domain
/// defaults, see [`DimensionOption::merged`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionOption {
    pub hidden: Option<bool>,
    /// Generated automatically rather than declared by a user.
    pub dynamic: Option<bool>,
    /// Attribute id used as the member label.
    pub display_attribute: Option<String>,
    pub single_selection: Option<bool>,
}

impl DimensionOption {
    /// Settings of `self`, completed by `fallback` where unset.
    pub fn merged(&self, fallback: &DimensionOption) -> DimensionOption {
        DimensionOption {
            hidden: self.hidden.or(fallback.hidden),
            dynamic: self.dynamic.or(fallback.dynamic),
            display_attribute: self
                .display_attribute
                .clone()
                .or_else(|| fallback.display_attribute.clone()),
            single_selection: self.single_selection.or(fallback.single_selection),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.unwrap_or(false)
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.unwrap_or(false)
    }

    pub fn is_single_selection(&self) -> bool {
        self.single_selection.unwrap_or(false)
    }
}

/// What kind of values a dimension axis produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageType {
    /// Distinct scalar values read from a column.
    Scalar,
    /// A single range covering the column.
    Continuous,
    /// A boolean condition, indexed as its `TRUE` modality.
    Conditional,
    /// A reference to the objects of another domain.
    Object { domain_id: String },
    /// Literal outcomes known without querying.
    Constant(Vec<Value>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_json() {
        let expr: Expression =
            serde_json::from_str(r#"{"type": "join", "domain_id": "stores", "column": "store_id"}"#)
                .unwrap();
        assert_eq!(expr, Expression::join("stores", "store_id"));
        assert_eq!(expr.projected_column(), Some("store_id"));
        assert_eq!(Expression::predicate("amount > 0").projected_column(), None);
    }

    #[test]
    fn test_options_merge() {
        let fallback = DimensionOption {
            hidden: Some(true),
            display_attribute: Some("label".into()),
            ..Default::default()
        };
        let own = DimensionOption {
            hidden: Some(false),
            ..Default::default()
        };
        let merged = own.merged(&fallback);
        assert!(!merged.is_hidden());
        assert_eq!(merged.display_attribute.as_deref(), Some("label"));
        assert!(!merged.is_dynamic());
    }
}
