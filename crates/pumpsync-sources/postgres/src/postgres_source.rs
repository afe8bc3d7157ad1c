use crate::query::{quote_identifier, QueryTemplate};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use pumpsync_core::{
    ConnectionConfig, Error, FetchRequest, Result, Source, SourceStatus, TransactionRecord,
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Executor, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tolerance for the quantity × unit price check, in currency units
const TOTAL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSourceConfig {
    /// Station credentials from the credential store
    pub connection: ConnectionConfig,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a connection before giving up on the cycle
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Require TLS instead of a plain connection
    #[serde(default)]
    pub ssl: bool,

    /// Table and column names of the station database
    #[serde(default)]
    pub query: QueryTemplate,
}

fn default_max_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl PostgresSourceConfig {
    fn connect_options(&self) -> PgConnectOptions {
        let c = &self.connection;
        PgConnectOptions::new()
            .host(&c.db_host)
            .port(c.db_port)
            .database(&c.db_name)
            .username(&c.db_user)
            .password(&c.db_password)
            .ssl_mode(if self.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Disable
            })
            .application_name("pumpsync")
    }
}

/// Reads pump transactions from a station back office database
pub struct PostgresSource {
    config: PostgresSourceConfig,
    company_id: i64,
    role_statement: Option<String>,
    pool: Option<PgPool>,
    status: SourceStatus,
}

impl PostgresSource {
    /// Validates the credentials; fails before any connection is attempted
    pub fn new(config: PostgresSourceConfig) -> Result<Self> {
        config.connection.validate()?;

        let company_id = config
            .connection
            .company_id()
            .ok_or_else(|| Error::Configuration("company_id must not be empty".to_string()))?
            .parse::<i64>()
            .map_err(|_| {
                Error::Configuration(format!(
                    "company_id must be numeric, got '{}'",
                    config.connection.company_id.as_deref().unwrap_or_default()
                ))
            })?;

        let role_statement = config
            .connection
            .role()
            .map(|role| format!("SET SESSION AUTHORIZATION {}", quote_identifier(role)));

        Ok(Self {
            config,
            company_id,
            role_statement,
            pool: None,
            status: SourceStatus::default(),
        })
    }

    fn record_error(&mut self, err: &Error) {
        self.status.errors += 1;
        self.status.last_error = Some(err.to_string());
    }

    async fn drop_pool(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.status.connected = false;
    }
}

#[async_trait]
impl Source for PostgresSource {
    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let c = &self.config.connection;
        info!(
            "Connecting to PostgreSQL at {}:{}/{} as {}",
            c.db_host, c.db_port, c.db_name, c.db_user
        );

        let mut options = PgPoolOptions::new()
            .max_connections(self.config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs.max(1)));

        if let Some(statement) = self.role_statement.clone() {
            options = options.after_connect(move |conn, _meta| {
                let statement = statement.clone();
                Box::pin(async move {
                    conn.execute(statement.as_str()).await?;
                    Ok(())
                })
            });
        }

        match options.connect_with(self.config.connect_options()).await {
            Ok(pool) => {
                self.pool = Some(pool);
                self.status.connected = true;
                info!("Connected to PostgreSQL");
                Ok(())
            }
            Err(e) => {
                let err = classify_connect_error(e, self.role_statement.is_some());
                self.record_error(&err);
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.drop_pool().await;
        info!("Disconnected from PostgreSQL");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<TransactionRecord>> {
        self.connect().await?;
        let Some(pool) = self.pool.clone() else {
            return Err(Error::Connection("no connection pool".to_string()));
        };

        self.status.polls += 1;
        let sql = self.config.query.render(request.exclude_processed);
        let rows = sqlx::query(&sql)
            .bind(self.company_id)
            .bind(request.window.as_secs() as f64)
            .fetch_all(&pool)
            .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                let err = classify_error(e);
                self.record_error(&err);
                if matches!(err, Error::Connection(_)) {
                    self.drop_pool().await;
                }
                return Err(err);
            }
        };

        let records = keep_decodable(rows.iter().map(decode_row), &mut self.status);
        debug!("Fetched {} transactions", records.len());
        Ok(records)
    }

    fn status(&self) -> SourceStatus {
        self.status.clone()
    }
}

/// Collect decoded rows, counting and skipping the ones that failed to decode
fn keep_decodable<I>(decoded: I, status: &mut SourceStatus) -> Vec<TransactionRecord>
where
    I: IntoIterator<Item = std::result::Result<TransactionRecord, sqlx::Error>>,
{
    let mut records = Vec::new();
    for row in decoded {
        match row {
            Ok(record) => {
                if !record.totals_consistent(TOTAL_TOLERANCE) {
                    debug!(
                        transaction_id = record.transaction_id,
                        "Total {} differs from {} x {}",
                        record.total_value,
                        record.quantity,
                        record.unit_value
                    );
                }
                records.push(record);
            }
            Err(e) => {
                warn!("Skipping undecodable transaction row: {}", e);
                status.rows_skipped += 1;
            }
        }
    }

    status.records_fetched += records.len() as u64;
    records
}

fn decode_row(row: &PgRow) -> std::result::Result<TransactionRecord, sqlx::Error> {
    Ok(TransactionRecord {
        transaction_id: row.try_get("transaction_id")?,
        occurred_at: row.try_get::<NaiveDateTime, _>("occurred_at")?,
        quantity: row.try_get("quantity")?,
        unit_value: row.try_get("unit_value")?,
        total_value: row.try_get("total_value")?,
        processed: row.try_get("processed")?,
        pump_number: row.try_get("pump_number")?,
        fuel_name: row.try_get("fuel_name")?,
        company_name: row.try_get("company_name")?,
    })
}

/// SQLSTATE codes that mean the credentials or the role were refused
fn is_authorization_code(code: &str) -> bool {
    matches!(code, "28000" | "28P01" | "42501" | "42704" | "22023")
}

/// Map a sqlx error onto the connectivity / authorization / query split
pub(crate) fn classify_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if is_authorization_code(code) => Error::Authorization(err.to_string()),
            Some(code) if code.starts_with("08") => Error::Connection(err.to_string()),
            _ => Error::Query(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection(err.to_string()),
        sqlx::Error::Configuration(_) => Error::Configuration(err.to_string()),
        _ => Error::Query(err.to_string()),
    }
}

/// Errors raised while opening a session. Any database error at this point
/// with a role configured comes from the role statement.
fn classify_connect_error(err: sqlx::Error, has_role: bool) -> Error {
    if has_role {
        if let sqlx::Error::Database(db) = &err {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if !code.starts_with("08") {
                return Error::Authorization(err.to_string());
            }
        }
    }
    classify_error(err)
}
