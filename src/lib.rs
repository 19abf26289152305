// Array Telemetry - normalized telemetry snapshots from heterogeneous storage arrays
//
// One run polls a list of arrays (Isilon, Unity, XtremIO, DataDomain, VNX)
// concurrently, asks each for the requested telemetry categories and
// normalizes the answers into one vendor-agnostic schema.
//
// Data flow:
// Orchestrator → Registry picks a Collector → Collector opens a Session →
// vendor calls → normalize → CollectionResult → Sink

pub mod collectors;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod testing;

pub use collectors::Collector;
pub use config::{CollectorSettings, ConfigError, Inventory};
pub use error::{CollectorError, ErrorKind};
pub use model::{CollectionResult, Command, CommandSet, Credentials, ServerTarget};
pub use orchestrator::Orchestrator;
pub use registry::{CollectorRegistry, StorageFamily};
pub use sink::OutputSink;
