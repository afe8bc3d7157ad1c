mod factory;
mod postgres_destination;

pub use factory::PostgresDestinationFactory;
pub use postgres_destination::{ConflictResolution, PostgresConfig, PostgresDestination};
