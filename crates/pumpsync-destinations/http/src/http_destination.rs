use async_trait::async_trait;
use pumpsync_core::{Batch, Destination, DestinationStatus, Error, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Longest slice of a rejected response body kept in the error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint receiving the batches
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Statuses the endpoint answers with when it took the batch
pub fn is_accepted_status(status: u16) -> bool {
    matches!(status, 200 | 201 | 202 | 204)
}

/// POSTs each batch as JSON. Rejections and transport failures are
/// reported, never retried; the next poll re-reads the window instead.
pub struct HttpDestination {
    config: HttpConfig,
    url: Url,
    client: Option<Client>,
    status: DestinationStatus,
}

impl HttpDestination {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let url = Url::parse(config.url.trim()).map_err(|e| {
            Error::Configuration(format!("invalid endpoint url '{}': {}", config.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "endpoint url must be http(s), got '{}'",
                config.url
            )));
        }

        Ok(Self {
            config,
            url,
            client: None,
            status: DestinationStatus::default(),
        })
    }

    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build http client: {}", e)))
    }

    fn record_failure(&mut self, err: &Error) {
        self.status.errors += 1;
        self.status.consecutive_errors += 1;
        self.status.last_error = Some(err.to_string());
    }
}

#[async_trait]
impl Destination for HttpDestination {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_none() {
            self.client = Some(self.build_client()?);
            self.status.connected = true;
            info!("HTTP destination ready for {}", self.url);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client = None;
        self.status.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            debug!("Empty batch, nothing to post");
            return Ok(());
        }

        self.connect().await?;
        let Some(client) = self.client.clone() else {
            return Err(Error::Connection("http client not initialised".to_string()));
        };

        let mut request = client.post(self.url.clone()).json(batch);
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = if e.is_timeout() {
                    Error::Connection(format!("request to {} timed out", self.url))
                } else {
                    Error::Connection(format!("request to {} failed: {}", self.url, e))
                };
                self.record_failure(&err);
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        if is_accepted_status(status) {
            self.status.batches_sent += 1;
            self.status.records_written += batch.len() as u64;
            self.status.consecutive_errors = 0;
            info!(
                status,
                records = batch.len(),
                "Endpoint accepted {} transactions",
                batch.len()
            );
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        debug!(status, "Endpoint rejected batch of {} transactions", batch.len());

        let err = Error::Delivery { status, body };
        self.record_failure(&err);
        Err(err)
    }

    fn status(&self) -> DestinationStatus {
        self.status.clone()
    }
}
