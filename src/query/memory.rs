//! In-memory analytical data source for tests and fixtures.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::compute::cancel::CancelToken;
use crate::error::{FacetreeError, Result};
use crate::member::Value;
use crate::query::plan::{AggregateQuery, SelectExpr};
use crate::query::source::{ColumnStatistics, DataSource, ResultMetadata, ResultStream};
use crate::query::sql;

/// A row keyed by column name. Missing columns read as `NULL`.
pub type Row = BTreeMap<String, Value>;

/// [`DataSource`] evaluating aggregate queries over tables held in memory.
#[derive(Debug)]
pub struct MemoryDataSource {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    statistics: RwLock<HashMap<(String, String), ColumnStatistics>>,
    failing: RwLock<HashSet<String>>,
    fetch_size: usize,
    row_delay: Duration,
    executed: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl Default for MemoryDataSource {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            statistics: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            fetch_size: 100,
            row_delay: Duration::ZERO,
            executed: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Sleep before serving each row, to simulate a slow result set.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    pub fn add_table<S: Into<String>>(&self, table: S, rows: Vec<Row>) {
        self.tables.write().insert(table.into(), rows);
    }

    pub fn insert_row(&self, table: &str, row: Row) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn set_statistics<S: Into<String>>(&self, table: S, column: S, stats: ColumnStatistics) {
        self.statistics
            .write()
            .insert((table.into(), column.into()), stats);
    }

    /// Make every query against `table` fail.
    pub fn fail_table<S: Into<String>>(&self, table: S) {
        self.failing.write().insert(table.into());
    }

    /// Number of queries executed so far.
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// SQL of every executed query, in execution order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn evaluate(&self, query: &AggregateQuery) -> Result<Vec<Vec<Value>>> {
        let tables = self.tables.read();
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| FacetreeError::query(format!("unknown table '{}'", query.table)))?;

        let read = |row: &Row, column: &str| row.get(column).cloned().unwrap_or(Value::Null);
        let kept = rows.iter().filter(|row| match &query.outside {
            Some(outside) => {
                let value = read(row, &outside.column);
                !value.is_null() && (value < outside.min || value > outside.max)
            }
            None => true,
        });

        let group_columns: Vec<&str> = query.group_by().collect();
        let mut groups: BTreeMap<Vec<Value>, Vec<&Row>> = BTreeMap::new();
        for row in kept {
            let key = group_columns.iter().map(|c| read(row, c)).collect();
            groups.entry(key).or_default().push(row);
        }
        if groups.is_empty() && group_columns.is_empty() {
            // Aggregates over an empty input still yield one row.
            groups.insert(Vec::new(), Vec::new());
        }

        Ok(groups
            .into_iter()
            .map(|(key, members)| {
                let mut key = key.into_iter();
                query
                    .select
                    .iter()
                    .map(|expr| match expr {
                        SelectExpr::Column(_) => key.next().unwrap_or(Value::Null),
                        SelectExpr::Min(c) => members
                            .iter()
                            .map(|r| read(r, c))
                            .filter(|v| !v.is_null())
                            .min()
                            .unwrap_or(Value::Null),
                        SelectExpr::Max(c) => members
                            .iter()
                            .map(|r| read(r, c))
                            .filter(|v| !v.is_null())
                            .max()
                            .unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .collect())
    }
}

impl DataSource for MemoryDataSource {
    fn execute(
        &self,
        query: &AggregateQuery,
        cancel: &CancelToken,
    ) -> Result<Box<dyn ResultStream>> {
        cancel.check()?;
        let rendered = sql::render(query);
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(rendered.clone());
        if self.failing.read().contains(&query.table) {
            return Err(FacetreeError::query(format!(
                "execution failed for table '{}'",
                query.table
            )));
        }
        let rows = self.evaluate(query)?;
        debug!(query = %rendered, rows = rows.len(), "memory source accepted query");
        Ok(Box::new(MemoryResultStream {
            metadata: ResultMetadata {
                columns: query.select.iter().map(|e| e.column().to_string()).collect(),
                fetch_size: self.fetch_size,
            },
            rows: rows.into(),
            row_delay: self.row_delay,
            cancel: cancel.clone(),
            closed: false,
        }))
    }

    fn statistics(&self, table: &str, column: &str) -> Result<Option<ColumnStatistics>> {
        Ok(self
            .statistics
            .read()
            .get(&(table.to_string(), column.to_string()))
            .cloned())
    }
}

struct MemoryResultStream {
    metadata: ResultMetadata,
    rows: VecDeque<Vec<Value>>,
    row_delay: Duration,
    cancel: CancelToken,
    closed: bool,
}

impl ResultStream for MemoryResultStream {
    fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.closed {
            return Ok(None);
        }
        if !self.row_delay.is_zero() {
            thread::sleep(self.row_delay);
        }
        self.cancel.check()?;
        Ok(self.rows.pop_front())
    }

    fn cancel(&mut self) {
        self.closed = true;
        self.rows.clear();
    }
}
