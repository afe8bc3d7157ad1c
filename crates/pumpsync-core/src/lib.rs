mod connection;
mod transaction;
mod window;
mod source;
mod destination;
mod pipeline;
mod error;
mod factory;
mod registry;
mod scheduler;
pub mod memory;

pub use connection::{ConnectionConfig, StationIdentity};
pub use transaction::{Batch, TransactionRecord, WIRE_DATE_FORMAT};
pub use window::{FetchRequest, TimeWindow};
pub use source::{Source, SourceStatus};
pub use destination::{Destination, DestinationStatus};
pub use pipeline::{
    CycleReport, DestinationConfig, Pipeline, PipelineConfig, SentLedger, SourceConfig,
};
pub use error::{Error, Result};
pub use factory::{DestinationFactory, SourceFactory};
pub use registry::Registry;
pub use scheduler::{
    PollScheduler, RoleFailurePolicy, SchedulerConfig, SchedulerState, SchedulerStatus,
};
