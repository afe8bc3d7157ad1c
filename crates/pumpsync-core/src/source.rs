use crate::{FetchRequest, Result, TransactionRecord};
use async_trait::async_trait;

/// Trait for databases transactions are polled from
#[async_trait]
pub trait Source: Send + Sync {
    /// Connect to the source database
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the source database
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the source is connected
    fn is_connected(&self) -> bool;

    /// Read every transaction inside the requested window.
    /// Rows come back most recent first; callers must not assume ascending order.
    async fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<TransactionRecord>>;

    /// Get source status information
    fn status(&self) -> SourceStatus;
}

#[derive(Debug, Clone, Default)]
pub struct SourceStatus {
    pub connected: bool,
    pub polls: u64,
    pub records_fetched: u64,
    pub rows_skipped: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}
