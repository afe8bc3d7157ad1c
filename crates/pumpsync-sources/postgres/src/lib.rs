mod factory;
mod postgres_source;
mod query;

pub use factory::PostgresSourceFactory;
pub use postgres_source::{PostgresSource, PostgresSourceConfig};
pub use query::{quote_identifier, ColumnMapping, QueryTemplate};
