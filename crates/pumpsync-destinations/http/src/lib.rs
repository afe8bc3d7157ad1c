mod factory;
mod http_destination;

pub use factory::HttpDestinationFactory;
pub use http_destination::{is_accepted_status, HttpConfig, HttpDestination};
