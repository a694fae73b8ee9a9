pub mod alarms;
pub mod api;
pub mod config;
pub mod consumption;
pub mod metrics_server;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod telemetry;
pub mod transform;

#[cfg(test)]
pub mod testing;

pub use pipeline::{Envelope, Pipeline};
