//! Remote store for survey results
//!
//! Three logical tables live in one spreadsheet:
//! - `Meta`: a single counter cell (`A2`) used for participant ids
//! - `Responses`: append-only, one row per question per participant
//! - `Demographics`: append-only, one row per participant
//!
//! There is no transaction spanning `read_counter` and `write_counter`.
//! Callers that read, add one, and write back can lose an increment when
//! two participants finish together; `increment_counter` lets a backend do
//! better where it can.

use async_trait::async_trait;
use thiserror::Error;

pub mod auth;
pub mod memory;
pub mod retry;
pub mod sheets;

pub use memory::MemoryStore;
pub use retry::{with_retry, with_retry_if, RetryPolicy};
pub use sheets::SheetsStore;

/// Worksheet holding the participant counter
pub const META_SHEET: &str = "Meta";

/// Cell of the participant counter within `Meta`
pub const COUNTER_CELL: &str = "A2";

/// One spreadsheet row, cell text in column order
pub type Row = Vec<String>;

/// Append-only tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Responses,
    Demographics,
}

impl Table {
    pub fn sheet_name(self) -> &'static str {
        match self {
            Table::Responses => "Responses",
            Table::Demographics => "Demographics",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sheet_name())
    }
}

/// Remote store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Meta sheet cell A2 is empty. Please initialize it with a number (e.g., 0).")]
    CounterMissing,

    #[error("Meta sheet cell A2 does not hold a whole number: '{0}'")]
    CounterInvalid(String),

    /// The request may or may not have reached the store
    #[error("Network error: {0}")]
    Network(String),

    /// Failed before the request left this process; nothing was written
    #[error("Request not sent: {0}")]
    NotSent(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl StoreError {
    /// Worth retrying after a pause
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Network(_) | StoreError::NotSent(_) | StoreError::RateLimited => true,
            StoreError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Known to have left the store untouched, so even an append can be resent
    ///
    /// A network error or 5xx after the request went out is ambiguous: the
    /// write may already be committed.
    pub fn is_unsent(&self) -> bool {
        matches!(self, StoreError::NotSent(_) | StoreError::RateLimited)
    }

    /// Caused by external state or credentials an operator must fix
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StoreError::CounterMissing | StoreError::CounterInvalid(_) | StoreError::Auth(_)
        )
    }
}

/// Parse the counter cell's text
pub fn parse_counter(cell: Option<&str>) -> Result<u64, StoreError> {
    let text = cell.map(str::trim).unwrap_or("");
    if text.is_empty() {
        return Err(StoreError::CounterMissing);
    }
    text.parse::<u64>()
        .map_err(|_| StoreError::CounterInvalid(text.to_string()))
}

/// Backend holding the survey tables
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Read the participant counter; empty or non-numeric cells are errors
    async fn read_counter(&self) -> Result<u64, StoreError>;

    /// Append a batch of rows to `table` in one request
    async fn append_rows(&self, table: Table, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Overwrite the participant counter
    async fn write_counter(&self, value: u64) -> Result<(), StoreError>;

    /// Advance the counter by one and return the new value
    ///
    /// The default reads then writes with nothing in between to stop another
    /// writer; backends override it when they can serialize the two steps.
    async fn increment_counter(&self) -> Result<u64, StoreError> {
        let current = self.read_counter().await?;
        self.write_counter(current + 1).await?;
        Ok(current + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter(Some("7")).unwrap(), 7);
        assert_eq!(parse_counter(Some(" 12 ")).unwrap(), 12);
        assert!(matches!(parse_counter(None), Err(StoreError::CounterMissing)));
        assert!(matches!(parse_counter(Some("  ")), Err(StoreError::CounterMissing)));
        assert!(matches!(
            parse_counter(Some("seven")),
            Err(StoreError::CounterInvalid(ref v)) if v == "seven"
        ));
        assert!(parse_counter(Some("-1")).is_err());
    }

    #[test]
    fn test_error_classification() {
        assert!(StoreError::Network("reset".into()).is_transient());
        assert!(StoreError::RateLimited.is_transient());
        assert!(StoreError::Api { status: 503, body: String::new() }.is_transient());
        assert!(!StoreError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!StoreError::CounterMissing.is_transient());

        assert!(StoreError::NotSent("refused".into()).is_unsent());
        assert!(StoreError::RateLimited.is_unsent());
        assert!(!StoreError::Network("timed out".into()).is_unsent());
        assert!(!StoreError::Api { status: 503, body: String::new() }.is_unsent());

        assert!(StoreError::CounterMissing.is_configuration());
        assert!(StoreError::Auth("bad key".into()).is_configuration());
        assert!(!StoreError::Network("reset".into()).is_configuration());
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Responses.sheet_name(), "Responses");
        assert_eq!(Table::Demographics.to_string(), "Demographics");
    }
}
