use crate::{Destination, Result, Source};
use serde_json::Value;

/// Factory trait for creating sources
pub trait SourceFactory: Send + Sync {
    /// Get the name/type identifier for this source
    fn name(&self) -> &str;

    /// Create a new source instance from configuration
    fn create(&self, config: Value) -> Result<Box<dyn Source>>;
}

/// Factory trait for creating destinations
pub trait DestinationFactory: Send + Sync {
    /// Get the name/type identifier for this destination
    fn name(&self) -> &str;

    /// Create a new destination instance from configuration
    fn create(&self, config: Value) -> Result<Box<dyn Destination>>;
}
