//! Parent/child wiring of a domain's dimensions.

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::model::Dimension;

/// Sanitized parent/child relations of one domain's dimensions.
///
/// Declared `parent_id` links form a forest once cycles are cut: while
/// walking each dimension's ancestor chain, the first link pointing back
/// into the chain is cleared. Links to unknown dimensions are dropped too.
#[derive(Debug, Clone, Default)]
pub struct DomainHierarchyParenthood {
    order: Vec<String>,
    parents: BTreeMap<String, Option<String>>,
    children: BTreeMap<String, Vec<String>>,
    cut: Vec<(String, String)>,
}

impl DomainHierarchyParenthood {
    pub fn new(dimensions: &[Dimension]) -> Self {
        let mut parenthood = Self {
            order: dimensions.iter().map(|d| d.id.clone()).collect(),
            parents: dimensions
                .iter()
                .map(|d| (d.id.clone(), d.parent_id.clone()))
                .collect(),
            ..Default::default()
        };
        parenthood.drop_dangling();
        parenthood.cut_cycles();
        parenthood.wire_children();
        parenthood
    }

    fn drop_dangling(&mut self) {
        let known: HashSet<String> = self.parents.keys().cloned().collect();
        for (id, parent) in self.parents.iter_mut() {
            if let Some(p) = parent.as_ref()
                && !known.contains(p)
            {
                warn!(dimension = %id, parent = %p, "dropping link to unknown parent dimension");
                *parent = None;
            }
        }
    }

    fn cut_cycles(&mut self) {
        for start in self.order.clone() {
            let mut seen = HashSet::new();
            let mut current = start.clone();
            seen.insert(current.clone());
            while let Some(Some(parent)) = self.parents.get(&current).cloned() {
                if !seen.insert(parent.clone()) {
                    warn!(dimension = %current, parent = %parent, "cutting cyclic parent link");
                    self.parents.insert(current.clone(), None);
                    self.cut.push((current, parent));
                    break;
                }
                current = parent;
            }
        }
    }

    fn wire_children(&mut self) {
        for id in &self.order {
            if let Some(Some(parent)) = self.parents.get(id) {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .push(id.clone());
            }
        }
    }

    /// Dimensions without a parent, in declaration order.
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| matches!(self.parents.get(*id), Some(None)))
            .cloned()
            .collect()
    }

    pub fn parent_of(&self, dimension_id: &str) -> Option<&str> {
        self.parents.get(dimension_id)?.as_deref()
    }

    /// Children of a dimension, in declaration order.
    pub fn children_of(&self, dimension_id: &str) -> &[String] {
        self.children
            .get(dimension_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_children(&self, dimension_id: &str) -> bool {
        !self.children_of(dimension_id).is_empty()
    }

    /// Links cleared to break cycles, as `(child, former parent)`.
    pub fn cut_links(&self) -> &[(String, String)] {
        &self.cut
    }
}
