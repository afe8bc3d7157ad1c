use crate::{HttpConfig, HttpDestination};
use pumpsync_core::{Destination, DestinationFactory, Error, Result};
use serde_json::Value;

pub struct HttpDestinationFactory;

impl DestinationFactory for HttpDestinationFactory {
    fn name(&self) -> &str {
        "http"
    }

    fn create(&self, config: Value) -> Result<Box<dyn Destination>> {
        let config: HttpConfig = serde_json::from_value(config)
            .map_err(|e| Error::Configuration(format!("invalid http destination config: {}", e)))?;
        Ok(Box::new(HttpDestination::new(config)?))
    }
}
