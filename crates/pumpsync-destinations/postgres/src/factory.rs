use crate::{PostgresConfig, PostgresDestination};
use pumpsync_core::{Destination, DestinationFactory, Error, Result};
use serde_json::Value;

pub struct PostgresDestinationFactory;

impl DestinationFactory for PostgresDestinationFactory {
    fn name(&self) -> &str {
        "postgres"
    }

    fn create(&self, config: Value) -> Result<Box<dyn Destination>> {
        let config: PostgresConfig = serde_json::from_value(config).map_err(|e| {
            Error::Configuration(format!("invalid postgres destination config: {}", e))
        })?;
        Ok(Box::new(PostgresDestination::new(config)))
    }
}
