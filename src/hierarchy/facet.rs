//! Paged member views served to facet consumers.

use serde::Serialize;

use crate::error::{FacetreeError, Result};
use crate::hierarchy::domain_hierarchy::DomainHierarchy;
use crate::index::IndexStatus;
use crate::member::{Selections, Value};
use crate::timeout::Timeout;

#[derive(Debug, Clone)]
pub struct FacetRequest {
    /// Axis key of the dimension to list.
    pub axis_key: String,
    pub filter: Option<String>,
    /// Current selections, keyed by axis key of this hierarchy.
    pub selections: Selections,
    pub offset: usize,
    pub size: usize,
    /// How long to wait for the dimension's members.
    pub wait: Timeout,
}

impl FacetRequest {
    pub fn new<S: Into<String>>(axis_key: S) -> Self {
        Self {
            axis_key: axis_key.into(),
            filter: None,
            selections: Selections::new(),
            offset: 0,
            size: 50,
            wait: Timeout::NonBlocking,
        }
    }

    pub fn with_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_selections(mut self, selections: Selections) -> Self {
        self.selections = selections;
        self
    }

    pub fn with_page(mut self, offset: usize, size: usize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn with_wait(mut self, wait: Timeout) -> Self {
        self.wait = wait;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum FacetState {
    Ready,
    Computing,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetItem {
    pub id: Value,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facet {
    pub axis: String,
    pub name: String,
    pub path: String,
    pub state: FacetState,
    pub items: Vec<FacetItem>,
    pub has_more: bool,
}

pub(crate) fn build_facet(hierarchy: &DomainHierarchy, request: &FacetRequest) -> Result<Facet> {
    let index = hierarchy
        .dimension_index_by_key(&request.axis_key)
        .ok_or_else(|| {
            FacetreeError::not_found(format!(
                "axis '{}' in domain '{}'",
                request.axis_key,
                hierarchy.domain_id()
            ))
        })?;

    let state = match hierarchy.is_index_done(&index, request.wait) {
        Err(e) => FacetState::Error(e.to_string()),
        Ok(_) if index.status() == IndexStatus::Error => {
            FacetState::Error(index.error_message().unwrap_or_default())
        }
        Ok(true) => FacetState::Ready,
        Ok(false) => FacetState::Computing,
    };

    let mut facet = Facet {
        axis: request.axis_key.clone(),
        name: index.name().to_string(),
        path: index.path().to_string(),
        state,
        items: Vec::new(),
        has_more: false,
    };
    if matches!(facet.state, FacetState::Error(_)) {
        return Ok(facet);
    }

    // Correlation tables are keyed by the source axes, not by our proxies.
    let mut parents = Selections::new();
    for (key, values) in request.selections.iter() {
        if key == &request.axis_key {
            continue;
        }
        let source_key = hierarchy
            .dimension_index_by_key(key)
            .map(|i| i.source().key().to_string())
            .unwrap_or_else(|| key.clone());
        parents = parents.select(source_key, values.clone());
    }

    let fetch = request.size.saturating_add(1);
    let members = index.members_filter_by_parents(
        &parents,
        request.filter.as_deref(),
        request.offset,
        fetch,
    )?;
    facet.has_more = members.len() > request.size;

    let selected = request.selections.get(&request.axis_key).unwrap_or_default();
    facet.items = members
        .into_iter()
        .take(request.size)
        .map(|member| {
            let label = index
                .display_attribute()
                .and_then(|position| member.attribute(position))
                .unwrap_or_else(|| member.id().clone())
                .to_string();
            FacetItem {
                selected: selected.contains(member.id()),
                id: member.id().clone(),
                label,
            }
        })
        .collect();
    Ok(facet)
}
