use crate::{
    Batch, ConnectionConfig, Destination, DestinationStatus, Error, FetchRequest, Registry,
    Result, Source, SourceStatus, StationIdentity, TimeWindow, TransactionRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration of one poll → forward pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name used in logs
    #[serde(default = "default_name")]
    pub name: String,

    /// Trailing query window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,

    /// Skip rows whose processed flag is set
    #[serde(default = "default_true")]
    pub exclude_processed: bool,

    /// Drop rows already accepted by every destination while they stay in the window
    #[serde(default)]
    pub skip_already_sent: bool,

    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub deliver_timeout_secs: u64,

    pub source: SourceConfig,

    pub destinations: Vec<DestinationConfig>,
}

fn default_name() -> String {
    "station-sync".to_string()
}

fn default_window_hours() -> u64 {
    12
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Type/name of the source (e.g., "postgres")
    #[serde(rename = "type")]
    pub source_type: String,

    /// Source-specific configuration; the connection is merged in at build time
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Type/name of the destination (e.g., "http", "postgres")
    #[serde(rename = "type")]
    pub destination_type: String,

    /// Destination-specific configuration
    #[serde(default)]
    pub config: Value,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            window_hours: default_window_hours(),
            exclude_processed: true,
            skip_already_sent: false,
            fetch_timeout_secs: default_timeout_secs(),
            deliver_timeout_secs: default_timeout_secs(),
            source: SourceConfig::default(),
            destinations: vec![DestinationConfig::default()],
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_type: "postgres".to_string(),
            config: serde_json::json!({
                "max_connections": 1,
                "connect_timeout_secs": 10
            }),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            destination_type: "http".to_string(),
            config: serde_json::json!({
                "url": "http://localhost:8080/api/pump-transactions",
                "timeout_secs": 30
            }),
        }
    }
}

impl SourceConfig {
    /// Source config with the station's credentials under `connection`
    pub fn with_connection(&self, connection: &ConnectionConfig) -> Result<Value> {
        let mut config = match &self.config {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(Error::Configuration(format!(
                    "source config must be a mapping, got {}",
                    other
                )))
            }
        };
        config.insert("connection".to_string(), serde_json::to_value(connection)?);
        Ok(Value::Object(config))
    }
}

/// Transaction ids accepted downstream that are still inside the window.
///
/// Ids that stop coming back from the source are forgotten, so the ledger
/// never grows past one window's worth of rows.
#[derive(Debug, Default)]
pub struct SentLedger {
    sent: HashSet<i64>,
}

impl SentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget ids no longer returned and drop the ones already delivered
    pub fn filter_unsent(&mut self, records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
        let current: HashSet<i64> = records.iter().map(|r| r.transaction_id).collect();
        self.sent.retain(|id| current.contains(id));
        records
            .into_iter()
            .filter(|r| !self.sent.contains(&r.transaction_id))
            .collect()
    }

    pub fn mark_sent(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.sent.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows returned by the source
    pub fetched: usize,
    /// Rows delivered to every destination
    pub forwarded: usize,
    /// Rows dropped by the sent ledger
    pub skipped: usize,
}

/// Fetch → map → forward for a single station
pub struct Pipeline {
    name: String,
    station: StationIdentity,
    source: Box<dyn Source>,
    destinations: Vec<Box<dyn Destination>>,
    request: FetchRequest,
    fetch_timeout: Duration,
    deliver_timeout: Duration,
    ledger: Option<SentLedger>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        station: StationIdentity,
        source: Box<dyn Source>,
        destinations: Vec<Box<dyn Destination>>,
    ) -> Self {
        Self {
            name: name.into(),
            station,
            source,
            destinations,
            request: FetchRequest::default(),
            fetch_timeout: Duration::from_secs(default_timeout_secs()),
            deliver_timeout: Duration::from_secs(default_timeout_secs()),
            ledger: None,
        }
    }

    pub fn with_request(mut self, request: FetchRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_timeouts(mut self, fetch: Duration, deliver: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.deliver_timeout = deliver;
        self
    }

    pub fn with_sent_ledger(mut self) -> Self {
        self.ledger = Some(SentLedger::new());
        self
    }

    /// Build a pipeline from configuration using the registry
    pub fn from_config(
        config: PipelineConfig,
        connection: &ConnectionConfig,
        registry: &Registry,
    ) -> Result<Self> {
        info!("Creating pipeline '{}'", config.name);
        connection.validate()?;

        if config.destinations.is_empty() {
            return Err(Error::Configuration(format!(
                "pipeline '{}' has no destinations",
                config.name
            )));
        }
        let window = TimeWindow::try_hours(config.window_hours)?;

        let source_factory = registry.get_source_factory(&config.source.source_type)?;
        let source = source_factory.create(config.source.with_connection(connection)?)?;

        let mut destinations = Vec::new();
        for dest_config in config.destinations {
            let dest_factory = registry.get_destination_factory(&dest_config.destination_type)?;
            destinations.push(dest_factory.create(dest_config.config)?);
        }

        let pipeline = Self::new(config.name, connection.station(), source, destinations)
            .with_request(FetchRequest {
                window,
                exclude_processed: config.exclude_processed,
            })
            .with_timeouts(
                Duration::from_secs(config.fetch_timeout_secs.max(1)),
                Duration::from_secs(config.deliver_timeout_secs.max(1)),
            );

        Ok(if config.skip_already_sent {
            pipeline.with_sent_ledger()
        } else {
            pipeline
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn station(&self) -> &StationIdentity {
        &self.station
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Connect the source, then every destination
    pub async fn connect(&mut self) -> Result<()> {
        self.source.connect().await?;
        debug!("[{}] Source connected", self.name);

        for (idx, dest) in self.destinations.iter_mut().enumerate() {
            dest.connect().await?;
            debug!("[{}] Destination {} connected", self.name, idx);
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.source.disconnect().await?;
        for dest in &mut self.destinations {
            dest.disconnect().await?;
        }
        Ok(())
    }

    /// Run one cycle. Errors are returned, not logged; the caller records them.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let records = match timeout(self.fetch_timeout, self.source.fetch(&self.request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Connection(format!(
                    "source query timed out after {}s",
                    self.fetch_timeout.as_secs()
                )))
            }
        };

        let fetched = records.len();
        let records = match self.ledger.as_mut() {
            Some(ledger) => ledger.filter_unsent(records),
            None => records,
        };
        let skipped = fetched - records.len();

        if records.is_empty() {
            debug!("[{}] Nothing to forward ({} fetched)", self.name, fetched);
            return Ok(CycleReport {
                fetched,
                forwarded: 0,
                skipped,
            });
        }

        let batch = Batch::new(&self.station, records);
        let mut first_error: Option<Error> = None;

        for (idx, dest) in self.destinations.iter_mut().enumerate() {
            let outcome = match timeout(self.deliver_timeout, dest.write_batch(&batch)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Connection(format!(
                    "delivery timed out after {}s",
                    self.deliver_timeout.as_secs()
                ))),
            };

            match outcome {
                Ok(()) => {
                    debug!(
                        "[{}] Forwarded {} records to destination {}",
                        self.name,
                        batch.len(),
                        idx
                    );
                }
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => {
                    warn!(
                        "[{}] Destination {} also failed: {}",
                        self.name, idx, e
                    );
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        if let Some(ledger) = self.ledger.as_mut() {
            ledger.mark_sent(batch.transaction_ids());
        }

        Ok(CycleReport {
            fetched,
            forwarded: batch.len(),
            skipped,
        })
    }

    pub fn source_status(&self) -> SourceStatus {
        self.source.status()
    }

    pub fn destination_statuses(&self) -> Vec<DestinationStatus> {
        self.destinations.iter().map(|d| d.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        MemoryDestination, MemoryDestinationFactory, MemorySource, MemorySourceFactory,
    };
    use chrono::Local;
    use std::sync::Arc;

    fn recent(id: i64) -> TransactionRecord {
        TransactionRecord {
            transaction_id: id,
            quantity: 2.0,
            unit_value: 6.0,
            total_value: 12.0,
            processed: 0,
            occurred_at: Local::now().naive_local() - chrono::Duration::minutes(id),
            pump_number: 1,
            fuel_name: "Etanol".to_string(),
            company_name: "Posto A".to_string(),
        }
    }

    fn pipeline(source: &MemorySource, destination: &MemoryDestination) -> Pipeline {
        Pipeline::new(
            "test",
            StationIdentity::new("ORG1", "ST1"),
            Box::new(source.clone()),
            vec![Box::new(destination.clone())],
        )
    }

    fn connection() -> ConnectionConfig {
        ConnectionConfig {
            organization_code: "ORG1".to_string(),
            gas_station_code: "ST1".to_string(),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "posto".to_string(),
            db_user: "reader".to_string(),
            db_password: "pw".to_string(),
            db_role: None,
            company_id: Some("1".to_string()),
        }
    }

    #[tokio::test]
    async fn empty_result_sends_nothing() {
        let source = MemorySource::new();
        let destination = MemoryDestination::new();
        let mut pipeline = pipeline(&source, &destination);

        let report = pipeline.poll_once().await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(destination.attempts(), 0);
    }

    #[tokio::test]
    async fn one_post_per_non_empty_cycle() {
        let source = MemorySource::with_rows(vec![recent(1), recent(2)]);
        let destination = MemoryDestination::new();
        let mut pipeline = pipeline(&source, &destination);

        let report = pipeline.poll_once().await.unwrap();

        assert_eq!(report.forwarded, 2);
        assert_eq!(destination.attempts(), 1);
        let batch = &destination.batches()[0];
        assert_eq!(batch.organization_code, "ORG1");
        assert_eq!(batch.gas_station_code, "ST1");

        assert_eq!(pipeline.source_status().records_fetched, 2);
        let statuses = pipeline.destination_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].batches_sent, 1);
        assert_eq!(statuses[0].records_written, 2);
    }

    #[tokio::test]
    async fn repeated_cycles_resend_rows_still_in_window() {
        let source = MemorySource::with_rows(vec![recent(42)]);
        let destination = MemoryDestination::new();
        let mut pipeline = pipeline(&source, &destination);

        pipeline.poll_once().await.unwrap();
        pipeline.poll_once().await.unwrap();

        assert_eq!(destination.times_seen(42), 2);
    }

    #[tokio::test]
    async fn sent_ledger_suppresses_duplicates_without_changing_payload() {
        let source = MemorySource::with_rows(vec![recent(42)]);
        let destination = MemoryDestination::new();
        let mut pipeline = pipeline(&source, &destination).with_sent_ledger();

        pipeline.poll_once().await.unwrap();
        let second = pipeline.poll_once().await.unwrap();

        assert_eq!(second.skipped, 1);
        assert_eq!(destination.times_seen(42), 1);

        source.push_row(recent(43));
        pipeline.poll_once().await.unwrap();
        assert_eq!(destination.times_seen(43), 1);
        assert_eq!(destination.batches()[1].len(), 1);
    }

    #[tokio::test]
    async fn rejected_batch_is_not_marked_sent() {
        let source = MemorySource::with_rows(vec![recent(7)]);
        let destination = MemoryDestination::new();
        destination.fail_next_write(Error::Delivery {
            status: 500,
            body: String::new(),
        });
        let mut pipeline = pipeline(&source, &destination).with_sent_ledger();

        assert!(matches!(
            pipeline.poll_once().await,
            Err(Error::Delivery { status: 500, .. })
        ));
        pipeline.poll_once().await.unwrap();

        assert_eq!(destination.attempts(), 2);
        assert_eq!(destination.times_seen(7), 1);
    }

    #[test]
    fn ledger_forgets_ids_that_left_the_window() {
        let mut ledger = SentLedger::new();
        assert!(ledger.is_empty());
        ledger.mark_sent([1, 2]);

        let remaining = ledger.filter_unsent(vec![recent(2), recent(3)]);

        assert_eq!(ledger.len(), 1);
        assert_eq!(
            remaining.iter().map(|r| r.transaction_id).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn from_config_rejects_out_of_range_window() {
        let registry = Registry::new();
        for window_hours in [0, u64::MAX / 1000] {
            let config = PipelineConfig {
                window_hours,
                ..PipelineConfig::default()
            };
            assert!(
                matches!(
                    Pipeline::from_config(config, &connection(), &registry),
                    Err(Error::Configuration(_))
                ),
                "{window_hours}"
            );
        }
    }

    #[tokio::test]
    async fn from_config_wires_factories_and_request() {
        let source = MemorySource::with_rows(vec![recent(5)]);
        let destination = MemoryDestination::new();
        let mut registry = Registry::new();
        registry.register_source(Arc::new(MemorySourceFactory::new(source.clone())));
        registry.register_destination(Arc::new(MemoryDestinationFactory::new(
            destination.clone(),
        )));

        let config = PipelineConfig {
            window_hours: 1,
            exclude_processed: false,
            source: SourceConfig {
                source_type: "memory".to_string(),
                config: Value::Null,
            },
            destinations: vec![DestinationConfig {
                destination_type: "memory".to_string(),
                config: Value::Null,
            }],
            ..PipelineConfig::default()
        };

        let mut pipeline = Pipeline::from_config(config, &connection(), &registry).unwrap();
        assert_eq!(pipeline.request().window, TimeWindow::hours(1));
        assert!(!pipeline.request().exclude_processed);

        pipeline.poll_once().await.unwrap();
        assert_eq!(destination.times_seen(5), 1);
    }

    #[test]
    fn from_config_rejects_blank_credentials() {
        let mut registry = Registry::new();
        registry.register_source(Arc::new(MemorySourceFactory::default()));
        registry.register_destination(Arc::new(MemoryDestinationFactory::default()));

        let mut bad = connection();
        bad.db_password.clear();

        let config = PipelineConfig {
            source: SourceConfig {
                source_type: "memory".to_string(),
                config: Value::Null,
            },
            destinations: vec![DestinationConfig {
                destination_type: "memory".to_string(),
                config: Value::Null,
            }],
            ..PipelineConfig::default()
        };

        assert!(matches!(
            Pipeline::from_config(config, &bad, &registry),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn connection_is_merged_into_source_config() {
        let source = SourceConfig::default();
        let merged = source.with_connection(&connection()).unwrap();

        assert_eq!(merged["max_connections"], 1);
        assert_eq!(merged["connection"]["db_name"], "posto");
    }
}
