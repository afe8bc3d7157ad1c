use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

// Re-export pipeline and scheduler config types from pumpsync-core
pub use pumpsync_core::{
    DestinationConfig, PipelineConfig, RoleFailurePolicy, SchedulerConfig, SourceConfig,
};

/// Legacy variable holding the forwarding endpoint
pub const API_URL_VAR: &str = "API_URL";

/// Legacy variable naming a database to copy forwarded rows into
pub const DEST_DATABASE_URL_VAR: &str = "DEST_DATABASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub station: StationSelection,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Which stored station to run; both empty means the only stored one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationSelection {
    #[serde(default)]
    pub organization_code: Option<String>,

    #[serde(default)]
    pub gas_station_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Credential file path
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
            station: StationSelection::default(),
            store: StoreConfig {
                path: PathBuf::from("config/credentials.yaml"),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::build(config_dir.as_ref(), environment(), |name| std::env::var(name).ok())
    }

    fn build<F>(
        config_dir: &Path,
        environment: config::Environment,
        lookup: F,
    ) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(
                config::File::with_name(&config_dir.join("default.yaml").to_string_lossy())
                    .required(false),
            )
            // Per-machine overrides, not checked in
            .add_source(
                config::File::with_name(&config_dir.join("local.yaml").to_string_lossy())
                    .required(false),
            )
            .add_source(environment)
            .build()?;

        let mut config: Self = s.try_deserialize()?;
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply the legacy variables. `API_URL` points every HTTP destination
    /// at the given endpoint (adding one if none is configured);
    /// `DEST_DATABASE_URL` adds a database copy destination.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_blank(API_URL_VAR) {
            let mut found = false;
            for destination in self
                .pipeline
                .destinations
                .iter_mut()
                .filter(|d| d.destination_type == "http")
            {
                set_key(&mut destination.config, "url", &url);
                found = true;
            }
            if !found {
                self.pipeline.destinations.push(DestinationConfig {
                    destination_type: "http".to_string(),
                    config: json!({ "url": url }),
                });
            }
            tracing::debug!("Forwarding endpoint taken from {}", API_URL_VAR);
        }

        if let Some(url) = non_blank(DEST_DATABASE_URL_VAR) {
            match self
                .pipeline
                .destinations
                .iter_mut()
                .find(|d| d.destination_type == "postgres")
            {
                Some(destination) => set_key(&mut destination.config, "url", &url),
                None => self.pipeline.destinations.push(DestinationConfig {
                    destination_type: "postgres".to_string(),
                    config: json!({ "url": url }),
                }),
            }
            tracing::debug!("Database copy destination taken from {}", DEST_DATABASE_URL_VAR);
        }
    }

    /// Checks that hold regardless of which station is run
    pub fn validate(&self) -> anyhow::Result<()> {
        pumpsync_core::TimeWindow::try_hours(self.pipeline.window_hours)?;
        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than zero");
        }
        if self.pipeline.destinations.is_empty() {
            anyhow::bail!("at least one destination must be configured");
        }
        for destination in &self.pipeline.destinations {
            if destination.destination_type == "http"
                && destination
                    .config
                    .get("url")
                    .and_then(|u| u.as_str())
                    .map_or(true, |u| u.trim().is_empty())
            {
                anyhow::bail!("http destination requires a url (or set {})", API_URL_VAR);
            }
        }
        Ok(())
    }
}

/// `PUMPSYNC__SCHEDULER__INTERVAL_SECS=10`. Values stay strings so codes
/// like `007` keep their leading zeros; numeric fields parse on deserialize.
fn environment() -> config::Environment {
    config::Environment::with_prefix("PUMPSYNC").separator("__")
}

fn set_key(config: &mut serde_json::Value, key: &str, value: &str) {
    if !config.is_object() {
        *config = json!({});
    }
    if let Some(map) = config.as_object_mut() {
        map.insert(key.to_string(), json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.interval_secs, 5);
        assert_eq!(config.pipeline.window_hours, 12);
        assert!(config.pipeline.exclude_processed);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn yaml_layers_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            r#"
scheduler:
  interval_secs: 30
  role_failure: skip
pipeline:
  name: posto-centro
  source:
    type: postgres
    config:
      ssl: true
  destinations:
    - type: http
      config:
        url: https://api.example.com/pump-transactions
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.yaml"),
            "logging:\n  level: debug\n  json: true\n",
        )
        .unwrap();

        let config = AppConfig::load(dir.path()).unwrap();

        assert_eq!(config.scheduler.interval_secs, 30);
        assert_eq!(config.scheduler.role_failure, RoleFailurePolicy::Skip);
        assert_eq!(config.pipeline.name, "posto-centro");
        assert_eq!(config.pipeline.window_hours, 12);
        assert_eq!(config.pipeline.destinations.len(), 1);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.scheduler.interval_secs, 5);
        assert_eq!(config.store.path, PathBuf::from("config/credentials.yaml"));
    }

    #[test]
    fn api_url_replaces_http_endpoint() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[(API_URL_VAR, "https://ingest.example.com/pumps")]));

        assert_eq!(config.pipeline.destinations.len(), 1);
        assert_eq!(
            config.pipeline.destinations[0].config["url"],
            "https://ingest.example.com/pumps"
        );
        assert_eq!(config.pipeline.destinations[0].config["timeout_secs"], 30);
    }

    #[test]
    fn api_url_adds_http_destination_when_missing() {
        let mut config = AppConfig::default();
        config.pipeline.destinations.clear();
        config.apply_env_overrides(env(&[(API_URL_VAR, "https://ingest.example.com/pumps")]));

        assert_eq!(config.pipeline.destinations.len(), 1);
        assert_eq!(config.pipeline.destinations[0].destination_type, "http");
    }

    #[test]
    fn dest_database_url_adds_copy_destination() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[(
            DEST_DATABASE_URL_VAR,
            "postgresql://copy@central/pumps",
        )]));

        assert_eq!(config.pipeline.destinations.len(), 2);
        let copy = &config.pipeline.destinations[1];
        assert_eq!(copy.destination_type, "postgres");
        assert_eq!(copy.config["url"], "postgresql://copy@central/pumps");
    }

    #[test]
    fn blank_legacy_vars_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[(API_URL_VAR, "  "), (DEST_DATABASE_URL_VAR, "")]));
        assert_eq!(config.pipeline.destinations.len(), 1);
        assert_eq!(
            config.pipeline.destinations[0].config["url"],
            "http://localhost:8080/api/pump-transactions"
        );
    }

    #[test]
    fn validate_rejects_zero_interval_and_missing_url() {
        let mut config = AppConfig::default();
        config.scheduler.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.destinations[0].config = json!({});
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_keeps_codes_verbatim_and_parses_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let vars: config::Map<String, String> = [
            ("PUMPSYNC__STATION__ORGANIZATION_CODE", "007"),
            ("PUMPSYNC__STATION__GAS_STATION_CODE", "0042"),
            ("PUMPSYNC__SCHEDULER__INTERVAL_SECS", "10"),
            ("PUMPSYNC__LOGGING__JSON", "true"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = AppConfig::build(
            dir.path(),
            environment().source(Some(vars)),
            env(&[]),
        )
        .unwrap();

        assert_eq!(config.station.organization_code.as_deref(), Some("007"));
        assert_eq!(config.station.gas_station_code.as_deref(), Some("0042"));
        assert_eq!(config.scheduler.interval_secs, 10);
        assert!(config.logging.json);
    }

    #[test]
    fn validate_rejects_out_of_range_window() {
        let mut config = AppConfig::default();
        config.pipeline.window_hours = 0;
        assert!(config.validate().is_err());

        config.pipeline.window_hours = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pumpsync.yaml");
        let mut config = AppConfig::default();
        config.station.organization_code = Some("ORG1".to_string());

        config.to_file(&path).unwrap();
        let loaded = AppConfig::from_file(&path).unwrap();

        assert_eq!(loaded.station.organization_code.as_deref(), Some("ORG1"));
        assert_eq!(loaded.pipeline.destinations.len(), 1);
    }
}
