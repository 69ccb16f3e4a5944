//! Executes one generated query and indexes its rows.

use std::sync::Arc;
use std::time::Instant;

use ahash::AHashSet;
use tracing::{debug, info, warn};

use crate::compute::cancel::CancelToken;
use crate::compute::latch::Latch;
use crate::context::EngineContext;
use crate::error::Result;
use crate::index::DimensionIndex;
use crate::member::{DimensionMember, IndexToken, Value};
use crate::query::plan::{ColumnRole, GeneratedQuery, QueryKind};
use crate::query::source::ResultStream;
use crate::timeout::Timeout;

/// Counters of one executed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerReport {
    pub rows: u64,
    /// Members committed, over all indexes.
    pub members: usize,
    pub correlations: usize,
    pub flushes: usize,
}

/// Per member column decoding state.
struct MemberColumn {
    position: usize,
    index: Arc<DimensionIndex>,
    /// `(attribute position, result position)`.
    attributes: Vec<(usize, usize)>,
    last: Option<Value>,
    seen: AHashSet<Value>,
    buffer: Vec<Arc<DimensionMember>>,
    token: Option<IndexToken>,
}

struct CorrelationGroup {
    owner: Arc<DimensionIndex>,
    positions: Vec<usize>,
    last: Option<Vec<Value>>,
    buffer: Vec<Vec<Value>>,
    token: Option<IndexToken>,
}

/// Reads the result set of a [`GeneratedQuery`] into the indexes it feeds.
pub struct QueryIndexer<'a> {
    ctx: &'a EngineContext,
    query: &'a GeneratedQuery,
    cancel: &'a CancelToken,
}

impl<'a> QueryIndexer<'a> {
    pub fn new(ctx: &'a EngineContext, query: &'a GeneratedQuery, cancel: &'a CancelToken) -> Self {
        Self { ctx, query, cancel }
    }

    /// Run the query. `accepted` is counted down once the source accepted
    /// it, or failed to. On failure every index fed by the query is marked
    /// `ERROR` before the error is returned.
    pub fn run(&self, accepted: &Latch) -> Result<IndexerReport> {
        let started = Instant::now();
        let mut released = false;
        let result = self.execute(accepted, &mut released);
        if !released {
            accepted.count_down();
        }

        match &result {
            Ok(report) => info!(
                query = %self.query.fingerprint(),
                rows = report.rows,
                members = report.members,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query indexed"
            ),
            Err(e) if e.is_cancellation() => {
                debug!(query = %self.query.fingerprint(), "query cancelled");
                for index in self.query.indexes() {
                    if !index.is_error() {
                        index.set_interrupted("indexing cancelled");
                    }
                }
            }
            Err(e) => {
                warn!(query = %self.query.fingerprint(), error = %e, "query failed");
                let message = e.to_string();
                for index in self.query.indexes() {
                    if !index.is_error() {
                        index.set_permanent_error(message.clone());
                    }
                }
            }
        }
        result
    }

    fn execute(&self, accepted: &Latch, released: &mut bool) -> Result<IndexerReport> {
        self.cancel.check()?;
        let mut stream = self
            .ctx
            .source()
            .execute(&self.query.query, self.cancel)?;
        accepted.count_down();
        *released = true;
        debug!(query = %self.query.sql, "query accepted");

        let result = match &self.query.kind {
            QueryKind::Members => self.read_members(stream.as_mut()),
            QueryKind::Range { index, inner } => self.read_range(stream.as_mut(), index, inner),
        };
        if result.is_err() {
            stream.cancel();
        }
        result
    }

    fn member_columns(&self) -> Vec<MemberColumn> {
        let mut columns: Vec<MemberColumn> = self
            .query
            .mappings
            .iter()
            .filter(|m| m.role == ColumnRole::Member && m.compute_index)
            .map(|m| MemberColumn {
                position: m.position,
                index: Arc::clone(&m.index),
                attributes: Vec::new(),
                last: None,
                seen: AHashSet::new(),
                buffer: Vec::new(),
                token: None,
            })
            .collect();
        for mapping in &self.query.mappings {
            if let ColumnRole::Attribute(attribute) = mapping.role
                && let Some(column) = columns
                    .iter_mut()
                    .find(|c| c.index.key() == mapping.index.key())
            {
                column.attributes.push((attribute, mapping.position));
            }
        }
        columns
    }

    fn correlation_groups(&self) -> Vec<CorrelationGroup> {
        self.query
            .groups
            .iter()
            .filter(|g| g.correlated && g.member_positions.len() > 1)
            .map(|g| CorrelationGroup {
                owner: Arc::clone(&g.root),
                positions: g.member_positions.clone(),
                last: None,
                buffer: Vec::new(),
                token: None,
            })
            .collect()
    }

    fn buffer_size(&self, stream: &dyn ResultStream) -> usize {
        self.ctx
            .config()
            .buffer_commit_size
            .unwrap_or(stream.metadata().fetch_size)
            .max(1)
    }

    fn read_members(&self, stream: &mut dyn ResultStream) -> Result<IndexerReport> {
        let config = self.ctx.config();
        let buffer_size = self.buffer_size(stream);
        let mut columns = self.member_columns();
        let mut groups = self.correlation_groups();
        let mut report = IndexerReport::default();
        let mut buffered = 0usize;

        loop {
            self.cancel.check()?;
            if config.max_records.is_some_and(|max| report.rows >= max) {
                debug!(query = %self.query.fingerprint(), rows = report.rows, "row limit reached");
                break;
            }
            let Some(row) = stream.next_row()? else {
                break;
            };
            report.rows += 1;

            for column in columns.iter_mut() {
                let Some(value) = row.get(column.position) else {
                    continue;
                };
                // Sorted rows repeat an id on adjacent rows; `seen` catches the rest.
                if value.is_null() || column.last.as_ref() == Some(value) {
                    continue;
                }
                column.last = Some(value.clone());
                if !column.seen.insert(value.clone()) {
                    continue;
                }
                let member = column.index.member_by_id(value.clone());
                for (attribute, position) in &column.attributes {
                    let value = row.get(*position).filter(|v| !v.is_null()).cloned();
                    member.set_attribute(*attribute, value);
                }
                column.buffer.push(member);
            }

            for group in groups.iter_mut() {
                let tuple: Vec<Value> = group
                    .positions
                    .iter()
                    .map(|p| row.get(*p).cloned().unwrap_or(Value::Null))
                    .collect();
                if tuple.iter().any(Value::is_null) || group.last.as_ref() == Some(&tuple) {
                    continue;
                }
                group.last = Some(tuple.clone());
                group.buffer.push(tuple);
            }

            buffered += 1;
            if buffered >= buffer_size {
                // Only the first flush waits for the backend.
                let wait = if report.flushes == 0 {
                    Timeout::Bounded(config.flush_wait)
                } else {
                    Timeout::NonBlocking
                };
                self.flush(&mut columns, &mut groups, wait, &mut report)?;
                buffered = 0;
            }
        }
        self.flush(
            &mut columns,
            &mut groups,
            Timeout::Bounded(config.flush_wait),
            &mut report,
        )?;

        self.await_indexing(&columns, &groups)?;
        Ok(report)
    }

    fn flush(
        &self,
        columns: &mut [MemberColumn],
        groups: &mut [CorrelationGroup],
        wait: Timeout,
        report: &mut IndexerReport,
    ) -> Result<()> {
        let mut flushed = false;
        for column in columns.iter_mut().filter(|c| !c.buffer.is_empty()) {
            let members = std::mem::take(&mut column.buffer);
            column.token = Some(column.index.index_members(&members, wait)?);
            report.members += members.len();
            flushed = true;
        }
        for group in groups.iter_mut().filter(|g| !g.buffer.is_empty()) {
            let rows = std::mem::take(&mut group.buffer);
            report.correlations += rows.len();
            group.token = Some(group.owner.index_correlations(rows, wait)?);
            flushed = true;
        }
        if flushed {
            report.flushes += 1;
        }
        Ok(())
    }

    /// Poll the backend until every commit is visible, then settle statuses.
    fn await_indexing(&self, columns: &[MemberColumn], groups: &[CorrelationGroup]) -> Result<()> {
        let deadline = Instant::now() + self.ctx.config().indexing_timeout;
        let left = || Timeout::from(deadline.saturating_duration_since(Instant::now()));

        for group in groups {
            let Some(token) = group.token else { continue };
            self.cancel.check()?;
            if !group.owner.store().wait_for_correlations(token, left())? {
                group
                    .owner
                    .set_permanent_error("timeout during correlation indexing");
            }
        }

        for column in columns {
            if column.index.is_error() {
                continue;
            }
            match column.token {
                Some(token) => {
                    self.cancel.check()?;
                    if column.index.store().wait_for_members(token, left())? {
                        column.index.set_done();
                    } else {
                        column.index.set_permanent_error("timeout during indexing");
                    }
                }
                // No row carried a value for this column.
                None => column.index.set_done(),
            }
        }
        Ok(())
    }

    fn read_range(
        &self,
        stream: &mut dyn ResultStream,
        index: &Arc<DimensionIndex>,
        inner: &Option<(Value, Value)>,
    ) -> Result<IndexerReport> {
        let mut report = IndexerReport::default();
        let (mut min, mut max) = (Value::Null, Value::Null);
        if let Some(row) = stream.next_row()? {
            report.rows = 1;
            for mapping in &self.query.mappings {
                let value = row.get(mapping.position).cloned().unwrap_or(Value::Null);
                match mapping.role {
                    ColumnRole::RangeMin => min = value,
                    ColumnRole::RangeMax => max = value,
                    _ => {}
                }
            }
        }
        self.cancel.check()?;

        let found = if min.is_null() || max.is_null() {
            Value::Null
        } else {
            Value::range(min, max)
        };
        let merged = match inner {
            Some((min, max)) => Value::range(min.clone(), max.clone()).span(&found),
            None => found,
        };
        if merged.is_null() {
            index.set_done();
            return Ok(report);
        }
        if inner
            .as_ref()
            .is_some_and(|(min, max)| merged == Value::range(min.clone(), max.clone()))
        {
            debug!(axis = %index.key(), "range unchanged");
            index.set_done();
            return Ok(report);
        }

        index.store().reset()?;
        let member = index.member_by_id(merged);
        let token = index.index_members(&[member], Timeout::NonBlocking)?;
        report.members = 1;
        report.flushes = 1;
        if index
            .store()
            .wait_for_members(token, Timeout::from(self.ctx.config().indexing_timeout))?
        {
            index.set_done();
        } else {
            index.set_permanent_error("timeout during indexing");
        }
        Ok(report)
    }
}
