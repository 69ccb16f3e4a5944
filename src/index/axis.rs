//! Stable identifiers of dimension index nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A navigable path from a domain to a dimension, possibly through joins.
///
/// A local dimension is `domain/dimension`; a dimension reached through the
/// join dimension `store` of `sales` is `sales/store/<source path...>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Axis {
    domain_id: String,
    path: Vec<String>,
}

impl Axis {
    /// The axis of a dimension declared on `domain_id`.
    pub fn dimension<S: Into<String>>(domain_id: S, dimension_id: S) -> Self {
        Self {
            domain_id: domain_id.into(),
            path: vec![dimension_id.into()],
        }
    }

    /// The axis reached from this (join) axis by following `source`.
    pub fn through(&self, source: &Axis) -> Self {
        let mut path = self.path.clone();
        path.extend(source.path.iter().cloned());
        Self {
            domain_id: self.domain_id.clone(),
            path,
        }
    }

    pub fn domain_id(&self) -> &str {
        &self.domain_id
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Id of the dimension at the end of the path.
    pub fn dimension_id(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Whether the axis crosses at least one join.
    pub fn is_joined(&self) -> bool {
        self.path.len() > 1
    }

    pub fn key(&self) -> String {
        let mut key = self.domain_id.clone();
        for segment in &self.path {
            key.push('/');
            key.push_str(segment);
        }
        key
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
