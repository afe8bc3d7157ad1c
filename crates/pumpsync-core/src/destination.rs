use crate::{Batch, Result};
use async_trait::async_trait;

/// Trait for places a batch of transactions is delivered to
#[async_trait]
pub trait Destination: Send + Sync {
    /// Connect to the destination
    async fn connect(&mut self) -> Result<()>;

    /// Disconnect from the destination
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the destination is connected
    fn is_connected(&self) -> bool;

    /// Deliver one batch. An empty batch must not reach the wire.
    async fn write_batch(&mut self, batch: &Batch) -> Result<()>;

    /// Get destination status information
    fn status(&self) -> DestinationStatus;
}

#[derive(Debug, Clone, Default)]
pub struct DestinationStatus {
    pub connected: bool,
    pub batches_sent: u64,
    pub records_written: u64,
    pub errors: u64,
    pub consecutive_errors: u64,
    pub last_error: Option<String>,
}
