use async_trait::async_trait;
use pumpsync_core::{Batch, Destination, DestinationStatus, Error, Result, TransactionRecord};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// Key columns; a transaction forwarded twice lands on the same row
const KEY_COLUMNS: [&str; 3] = ["organization_code", "gas_station_code", "transaction_id"];

/// Value columns, in bind order after the key
const VALUE_COLUMNS: [(&str, &str); 8] = [
    ("quantity", "DOUBLE PRECISION NOT NULL"),
    ("unit_value", "DOUBLE PRECISION NOT NULL"),
    ("total_value", "DOUBLE PRECISION NOT NULL"),
    ("processed", "INTEGER NOT NULL"),
    ("occurred_at", "TIMESTAMP NOT NULL"),
    ("pump_number", "INTEGER NOT NULL"),
    ("fuel_name", "TEXT NOT NULL"),
    ("company_name", "TEXT NOT NULL"),
];

#[derive(Debug, Clone, Serialize)]
pub struct PostgresConfig {
    /// Where to connect: a URL or individual fields
    #[serde(flatten)]
    pub target: DatabaseTarget,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Target schema name
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Target table name
    #[serde(default = "default_table")]
    pub table: String,

    /// What to do when a transaction is already stored
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,

    /// Create the table on connect if it doesn't exist
    #[serde(default = "default_auto_create_table")]
    pub auto_create_table: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DatabaseTarget {
    Url {
        url: String,
    },
    Fields {
        host: String,
        port: u16,
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        database: String,
    },
}

fn default_max_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "pump_transactions".to_string()
}

fn default_auto_create_table() -> bool {
    true
}

impl<'de> Deserialize<'de> for PostgresConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct PostgresConfigHelper {
            // Direct URL format
            url: Option<String>,

            // Individual fields format
            host: Option<String>,
            port: Option<u16>,
            username: Option<String>,
            password: Option<String>,
            database: Option<String>,

            #[serde(default = "default_max_connections")]
            max_connections: u32,
            #[serde(default = "default_connect_timeout_secs")]
            connect_timeout_secs: u64,
            #[serde(default = "default_schema")]
            schema: String,
            #[serde(default = "default_table")]
            table: String,
            #[serde(default)]
            conflict_resolution: ConflictResolution,
            #[serde(default = "default_auto_create_table")]
            auto_create_table: bool,
        }

        let helper = PostgresConfigHelper::deserialize(deserializer)?;

        let target = match (helper.url, helper.host, helper.username) {
            (Some(url), _, _) if !url.trim().is_empty() => DatabaseTarget::Url { url },
            (_, Some(host), Some(username)) => DatabaseTarget::Fields {
                host,
                port: helper.port.unwrap_or(5432),
                username,
                password: helper.password.filter(|p| !p.is_empty()),
                database: helper.database.unwrap_or_else(|| "postgres".to_string()),
            },
            _ => {
                return Err(D::Error::custom(
                    "Either 'url' or both 'host' and 'username' must be provided",
                ))
            }
        };

        Ok(PostgresConfig {
            target,
            max_connections: helper.max_connections,
            connect_timeout_secs: helper.connect_timeout_secs,
            schema: helper.schema,
            table: helper.table,
            conflict_resolution: helper.conflict_resolution,
            auto_create_table: helper.auto_create_table,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Overwrite the stored row with the latest values
    #[default]
    Upsert,
    /// Keep the stored row
    Ignore,
}

impl PostgresConfig {
    /// Connect options; field values are passed as-is, never spliced into a URL
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.target {
            DatabaseTarget::Url { url } => url
                .parse::<PgConnectOptions>()
                .map_err(|e| Error::Configuration(format!("Invalid database url: {}", e))),
            DatabaseTarget::Fields {
                host,
                port,
                username,
                password,
                database,
            } => {
                let options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(username)
                    .database(database);
                Ok(match password {
                    Some(password) => options.password(password),
                    None => options,
                })
            }
        }
    }

    /// `user@host:port/database`, without the password
    pub fn describe(&self) -> String {
        match self.connect_options() {
            Ok(options) => format!(
                "{}@{}:{}/{}",
                options.get_username(),
                options.get_host(),
                options.get_port(),
                options.get_database().unwrap_or_default()
            ),
            Err(_) => "<invalid database url>".to_string(),
        }
    }
}

/// Copies forwarded batches into another PostgreSQL database
pub struct PostgresDestination {
    config: PostgresConfig,
    pool: Option<PgPool>,
    status: DestinationStatus,
}

impl PostgresDestination {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            pool: None,
            status: DestinationStatus::default(),
        }
    }

    fn quote_identifier(identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn table_name(&self) -> String {
        format!(
            "{}.{}",
            Self::quote_identifier(&self.config.schema),
            Self::quote_identifier(&self.config.table)
        )
    }

    fn create_table_sql(&self) -> String {
        let mut columns: Vec<String> = vec![
            format!("{} TEXT NOT NULL", Self::quote_identifier(KEY_COLUMNS[0])),
            format!("{} TEXT NOT NULL", Self::quote_identifier(KEY_COLUMNS[1])),
            format!("{} BIGINT NOT NULL", Self::quote_identifier(KEY_COLUMNS[2])),
        ];
        columns.extend(
            VALUE_COLUMNS
                .iter()
                .map(|(name, ty)| format!("{} {}", Self::quote_identifier(name), ty)),
        );
        columns.push("\"forwarded_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            self.table_name(),
            columns.join(", "),
            Self::key_list()
        )
    }

    fn key_list() -> String {
        KEY_COLUMNS
            .iter()
            .map(|c| Self::quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn insert_sql(&self) -> String {
        let columns: Vec<String> = KEY_COLUMNS
            .iter()
            .copied()
            .chain(VALUE_COLUMNS.iter().map(|(name, _)| *name))
            .map(Self::quote_identifier)
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();

        let conflict = match self.config.conflict_resolution {
            ConflictResolution::Upsert => {
                let mut updates: Vec<String> = VALUE_COLUMNS
                    .iter()
                    .map(|(name, _)| {
                        let c = Self::quote_identifier(name);
                        format!("{} = EXCLUDED.{}", c, c)
                    })
                    .collect();
                updates.push("\"forwarded_at\" = NOW()".to_string());
                format!("DO UPDATE SET {}", updates.join(", "))
            }
            ConflictResolution::Ignore => "DO NOTHING".to_string(),
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            self.table_name(),
            columns.join(", "),
            placeholders.join(", "),
            Self::key_list(),
            conflict
        )
    }

    async fn ensure_table(&self, pool: &PgPool) -> Result<()> {
        let query = self.create_table_sql();
        debug!("Ensuring table: {}", query);
        sqlx::query(&query)
            .execute(pool)
            .await
            .map_err(|e| classify_error("Failed to create table", e))?;
        info!("Table {} ready", self.table_name());
        Ok(())
    }

    async fn insert_batch(&self, pool: &PgPool, batch: &Batch) -> Result<()> {
        let query = self.insert_sql();
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| classify_error("Failed to begin transaction", e))?;

        for record in &batch.records {
            bind_record(sqlx::query(&query), batch, record)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    classify_error(
                        &format!("Failed to store transaction {}", record.transaction_id),
                        e,
                    )
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| classify_error("Failed to commit transaction", e))?;
        Ok(())
    }

    fn record_failure(&mut self, err: &Error) {
        self.status.errors += 1;
        self.status.consecutive_errors += 1;
        self.status.last_error = Some(err.to_string());
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    batch: &'q Batch,
    record: &'q TransactionRecord,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&batch.organization_code)
        .bind(&batch.gas_station_code)
        .bind(record.transaction_id)
        .bind(record.quantity)
        .bind(record.unit_value)
        .bind(record.total_value)
        .bind(record.processed)
        .bind(record.occurred_at)
        .bind(record.pump_number)
        .bind(&record.fuel_name)
        .bind(&record.company_name)
}

fn classify_error(context: &str, err: sqlx::Error) -> Error {
    let message = format!("{}: {}", context, err);
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection(message),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if code.starts_with("08") => Error::Connection(message),
            Some(code) if code.starts_with("28") || code == "42501" => {
                Error::Authorization(message)
            }
            _ => Error::Query(message),
        },
        sqlx::Error::Configuration(_) => Error::Configuration(message),
        _ => Error::Query(message),
    }
}

#[async_trait]
impl Destination for PostgresDestination {
    async fn connect(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        info!("Connecting to PostgreSQL: {}", self.config.describe());
        let options = self.config.connect_options()?;

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs.max(1)))
            .connect_with(options)
            .await
            .map_err(|e| classify_error("Failed to connect to PostgreSQL", e))?;

        info!("Connected to PostgreSQL successfully");

        if self.config.auto_create_table {
            self.ensure_table(&pool).await?;
        }

        self.pool = Some(pool);
        self.status.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }

        self.status.connected = false;
        info!("Disconnected from PostgreSQL");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.status.connected
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.connect().await {
            self.record_failure(&e);
            return Err(e);
        }
        let Some(pool) = self.pool.clone() else {
            return Err(Error::Connection("Not connected".to_string()));
        };

        match self.insert_batch(&pool, batch).await {
            Ok(()) => {
                self.status.batches_sent += 1;
                self.status.records_written += batch.len() as u64;
                self.status.consecutive_errors = 0;
                info!("Successfully wrote batch of {} transactions", batch.len());
                Ok(())
            }
            Err(e) => {
                debug!("Batch write failed: {}", e);
                self.record_failure(&e);
                if matches!(e, Error::Connection(_)) {
                    pool.close().await;
                    self.pool = None;
                    self.status.connected = false;
                }
                Err(e)
            }
        }
    }

    fn status(&self) -> DestinationStatus {
        self.status.clone()
    }
}
