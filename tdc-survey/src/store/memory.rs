//! In-process store used for development runs and tests

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{parse_counter, Row, StoreError, SurveyStore, Table};

#[derive(Debug, Default)]
struct Tables {
    /// Raw text of `Meta!A2`; `None` models an empty cell
    counter: Option<String>,
    responses: Vec<Row>,
    demographics: Vec<Row>,
    /// Operations that will fail before touching the tables
    pending_failures: u32,
    counter_reads: u32,
    counter_writes: u32,
}

/// Tables held in memory behind one lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Store whose counter cell holds `counter`
    pub fn new(counter: u64) -> Self {
        Self::with_counter_cell(Some(&counter.to_string()))
    }

    /// Store whose counter cell holds arbitrary text (or nothing)
    pub fn with_counter_cell(cell: Option<&str>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                counter: cell.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    /// Make the next `n` operations fail without writing anything
    pub async fn fail_next(&self, n: u32) {
        self.tables.lock().await.pending_failures = n;
    }

    /// Snapshot of a table's rows
    pub async fn rows(&self, table: Table) -> Vec<Row> {
        let tables = self.tables.lock().await;
        match table {
            Table::Responses => tables.responses.clone(),
            Table::Demographics => tables.demographics.clone(),
        }
    }

    /// Raw text of the counter cell
    pub async fn counter_cell(&self) -> Option<String> {
        self.tables.lock().await.counter.clone()
    }

    /// Number of counter reads so far, failed ones included
    pub async fn counter_reads(&self) -> u32 {
        self.tables.lock().await.counter_reads
    }

    /// Number of successful counter writes so far
    pub async fn counter_writes(&self) -> u32 {
        self.tables.lock().await.counter_writes
    }
}

fn take_failure(tables: &mut Tables, operation: &str) -> Result<(), StoreError> {
    if tables.pending_failures > 0 {
        tables.pending_failures -= 1;
        return Err(StoreError::NotSent(format!("injected failure during {}", operation)));
    }
    Ok(())
}

#[async_trait]
impl SurveyStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_counter(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.counter_reads += 1;
        take_failure(&mut tables, "read_counter")?;
        parse_counter(tables.counter.as_deref())
    }

    async fn append_rows(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        take_failure(&mut tables, "append_rows")?;
        debug!(table = %table, rows = rows.len(), "Appending rows to memory store");
        match table {
            Table::Responses => tables.responses.extend(rows),
            Table::Demographics => tables.demographics.extend(rows),
        }
        Ok(())
    }

    async fn write_counter(&self, value: u64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        take_failure(&mut tables, "write_counter")?;
        tables.counter = Some(value.to_string());
        tables.counter_writes += 1;
        Ok(())
    }

    async fn increment_counter(&self) -> Result<u64, StoreError> {
        // Read and write under one lock acquisition
        let mut tables = self.tables.lock().await;
        take_failure(&mut tables, "increment_counter")?;
        let next = parse_counter(tables.counter.as_deref())? + 1;
        tables.counter = Some(next.to_string());
        tables.counter_writes += 1;
        Ok(next)
    }
}
