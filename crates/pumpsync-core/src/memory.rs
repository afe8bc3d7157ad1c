//! In-memory source and destination.
//!
//! They stand in for the station database and the remote endpoint in tests
//! and in dry runs. Both are cheap handles over shared state, so a clone kept
//! by the caller observes what the pipeline did with the other clone.

use crate::{
    Batch, Destination, DestinationFactory, DestinationStatus, Error, FetchRequest, Result, Source,
    SourceFactory, SourceStatus, TransactionRecord,
};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct SourceState {
    rows: Vec<TransactionRecord>,
    connect_failures: VecDeque<Error>,
    fetch_failures: VecDeque<Error>,
    fetches: Vec<Instant>,
    status: SourceStatus,
}

/// Fake transactions table queried with the same window and flag rules as
/// the real one
#[derive(Clone)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
    clock: Clock,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState::default())),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_rows(rows: Vec<TransactionRecord>) -> Self {
        let source = Self::new();
        source.set_rows(rows);
        source
    }

    /// Replace the wall clock used to evaluate the window
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn set_rows(&self, rows: Vec<TransactionRecord>) {
        lock(&self.state).rows = rows;
    }

    pub fn push_row(&self, row: TransactionRecord) {
        lock(&self.state).rows.push(row);
    }

    /// Make the next `connect` call fail with `error`
    pub fn fail_next_connect(&self, error: Error) {
        lock(&self.state).connect_failures.push_back(error);
    }

    /// Make the next `fetch` call fail with `error`
    pub fn fail_next_fetch(&self, error: Error) {
        lock(&self.state).fetch_failures.push_back(error);
    }

    pub fn fetch_count(&self) -> usize {
        lock(&self.state).fetches.len()
    }

    /// Instants (on the tokio clock) at which `fetch` was entered
    pub fn fetch_instants(&self) -> Vec<Instant> {
        lock(&self.state).fetches.clone()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.connect_failures.pop_front() {
            state.status.errors += 1;
            state.status.last_error = Some(err.to_string());
            return Err(err);
        }
        state.status.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        lock(&self.state).status.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).status.connected
    }

    async fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<TransactionRecord>> {
        let now = (self.clock)();
        let mut state = lock(&self.state);
        state.fetches.push(Instant::now());
        state.status.polls += 1;

        if let Some(err) = state.fetch_failures.pop_front() {
            state.status.errors += 1;
            state.status.last_error = Some(err.to_string());
            return Err(err);
        }

        let mut rows: Vec<TransactionRecord> = state
            .rows
            .iter()
            .filter(|row| request.window.contains(row.occurred_at, now))
            .filter(|row| !request.exclude_processed || row.processed == 0)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then(b.transaction_id.cmp(&a.transaction_id))
        });

        state.status.records_fetched += rows.len() as u64;
        Ok(rows)
    }

    fn status(&self) -> SourceStatus {
        lock(&self.state).status.clone()
    }
}

#[derive(Default)]
struct DestinationState {
    batches: Vec<Batch>,
    attempts: usize,
    failures: VecDeque<Error>,
    status: DestinationStatus,
}

/// Endpoint double that keeps every batch it was asked to deliver
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next delivery attempt with `error`
    pub fn fail_next_write(&self, error: Error) {
        lock(&self.state).failures.push_back(error);
    }

    /// Batches accepted so far
    pub fn batches(&self) -> Vec<Batch> {
        lock(&self.state).batches.clone()
    }

    /// Delivery attempts that reached the "wire", accepted or not
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// How many accepted batches carried `transaction_id`
    pub fn times_seen(&self, transaction_id: i64) -> usize {
        lock(&self.state)
            .batches
            .iter()
            .flat_map(|batch| batch.transaction_ids())
            .filter(|id| *id == transaction_id)
            .count()
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn connect(&mut self) -> Result<()> {
        lock(&self.state).status.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        lock(&self.state).status.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).status.connected
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = lock(&self.state);
        state.attempts += 1;

        if let Some(err) = state.failures.pop_front() {
            state.status.errors += 1;
            state.status.consecutive_errors += 1;
            state.status.last_error = Some(err.to_string());
            return Err(err);
        }

        state.status.batches_sent += 1;
        state.status.records_written += batch.len() as u64;
        state.status.consecutive_errors = 0;
        state.batches.push(batch.clone());
        Ok(())
    }

    fn status(&self) -> DestinationStatus {
        lock(&self.state).status.clone()
    }
}

/// Hands out clones of one shared [`MemorySource`]
#[derive(Clone, Default)]
pub struct MemorySourceFactory {
    source: MemorySource,
}

impl MemorySourceFactory {
    pub fn new(source: MemorySource) -> Self {
        Self { source }
    }
}

impl SourceFactory for MemorySourceFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, _config: Value) -> Result<Box<dyn Source>> {
        Ok(Box::new(self.source.clone()))
    }
}

/// Hands out clones of one shared [`MemoryDestination`]
#[derive(Clone, Default)]
pub struct MemoryDestinationFactory {
    destination: MemoryDestination,
}

impl MemoryDestinationFactory {
    pub fn new(destination: MemoryDestination) -> Self {
        Self { destination }
    }
}

impl DestinationFactory for MemoryDestinationFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, _config: Value) -> Result<Box<dyn Destination>> {
        Ok(Box::new(self.destination.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StationIdentity, TimeWindow};
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn row(id: i64, age_minutes: i64, processed: i32) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id,
            quantity: 1.0,
            unit_value: 6.0,
            total_value: 6.0,
            processed,
            occurred_at: now() - chrono::Duration::minutes(age_minutes),
            pump_number: 1,
            fuel_name: "Diesel".to_string(),
            company_name: "Posto A".to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_applies_window_with_inclusive_boundary() {
        let mut source =
            MemorySource::with_rows(vec![row(1, 10, 0), row(2, 60, 0), row(3, 61, 0)])
                .with_clock(now);
        let request = FetchRequest {
            window: TimeWindow::hours(1),
            exclude_processed: true,
        };

        let ids: Vec<i64> = source
            .fetch(&request)
            .await
            .unwrap()
            .iter()
            .map(|r| r.transaction_id)
            .collect();

        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn processed_toggle_controls_flagged_rows() {
        let mut source =
            MemorySource::with_rows(vec![row(1, 5, 0), row(2, 1, 1)]).with_clock(now);

        let mut request = FetchRequest::default();
        assert_eq!(source.fetch(&request).await.unwrap().len(), 1);

        request.exclude_processed = false;
        let rows = source.fetch(&request).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transaction_id, 2, "most recent first");
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_once() {
        let mut source = MemorySource::new();
        source.fail_next_fetch(Error::Connection("refused".into()));

        assert!(source.fetch(&FetchRequest::default()).await.is_err());
        assert!(source.fetch(&FetchRequest::default()).await.is_ok());
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(source.status().errors, 1);
    }

    #[tokio::test]
    async fn empty_batches_never_count_as_attempts() {
        let mut destination = MemoryDestination::new();
        let station = StationIdentity::new("ORG1", "ST1");

        destination
            .write_batch(&Batch::new(&station, Vec::new()))
            .await
            .unwrap();
        assert_eq!(destination.attempts(), 0);

        destination
            .write_batch(&Batch::new(&station, vec![row(9, 1, 0)]))
            .await
            .unwrap();
        assert_eq!(destination.attempts(), 1);
        assert_eq!(destination.times_seen(9), 1);
    }
}
