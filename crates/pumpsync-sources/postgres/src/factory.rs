use crate::{PostgresSource, PostgresSourceConfig};
use pumpsync_core::{Error, Result, Source, SourceFactory};
use serde_json::Value;

pub struct PostgresSourceFactory;

impl SourceFactory for PostgresSourceFactory {
    fn name(&self) -> &str {
        "postgres"
    }

    fn create(&self, config: Value) -> Result<Box<dyn Source>> {
        let config: PostgresSourceConfig = serde_json::from_value(config)
            .map_err(|e| Error::Configuration(format!("invalid postgres source config: {}", e)))?;
        Ok(Box::new(PostgresSource::new(config)?))
    }
}
