//! Read access to the domain model.

use std::fmt;

use crate::error::{FacetreeError, Result};
use crate::model::types::{Dimension, DimensionKind, Domain, Expression, ImageType, Project};

/// Consumed interface of the domain/dimension model.
pub trait ModelProvider: Send + Sync + fmt::Debug {
    fn project(&self, project_id: &str) -> Result<Project>;

    fn domain(&self, domain_id: &str) -> Result<Domain>;

    /// Hash of an object's current definition. Changes whenever the object
    /// is modified; fails once it is deleted.
    ///
    /// Projects and domains are addressed by id, dimensions by their axis
    /// key `domain/dimension` since dimension ids are only unique within a
    /// domain.
    fn content_hash(&self, object_id: &str) -> Result<String>;

    /// Columns of a table, when the provider knows its schema.
    fn table_columns(&self, _table: &str) -> Option<Vec<String>> {
        None
    }

    /// Classify the axis of a dimension.
    fn image_type(&self, domain: &Domain, dimension: &Dimension) -> Result<ImageType> {
        if let Some(column) = dimension.expression.projected_column()
            && let Some(columns) = self.table_columns(&domain.table)
            && !columns.iter().any(|c| c == column)
        {
            return Err(FacetreeError::model(format!(
                "unknown column '{column}' in table '{}' for dimension '{}'",
                domain.table, dimension.name
            )));
        }

        match &dimension.expression {
            Expression::Join { domain_id, .. } => {
                // The target must resolve for the join to be navigable.
                self.domain(domain_id)?;
                Ok(ImageType::Object {
                    domain_id: domain_id.clone(),
                })
            }
            Expression::Predicate { .. } => Ok(ImageType::Conditional),
            Expression::Constant { values } => Ok(ImageType::Constant(values.clone())),
            Expression::Column { .. } => Ok(match dimension.kind {
                DimensionKind::Conditional => ImageType::Conditional,
                DimensionKind::Continuous => ImageType::Continuous,
                DimensionKind::Categorical | DimensionKind::Index => ImageType::Scalar,
            }),
        }
    }
}
