//! Bulk-load adapter for the target graph system.
//!
//! Wraps the Arrow Flight action/put protocol in a checked state machine
//! ([`driver::BulkLoadDriver`]), renames positional columns into the shape the target expects
//! ([`mapping`]), spreads parquet fragments across parallel transfer workers ([`fanout`]) and
//! strings the whole per-generation sequence together ([`loader::BulkLoader`]).

pub mod config;
pub mod driver;
pub mod fanout;
pub mod loader;
pub mod mapping;
pub mod metrics;
pub mod transport;

pub use config::FlightConfig;
pub use driver::{BulkLoadDriver, CreateDatabaseOptions, EntityKind, LoadState};
pub use fanout::{FanOutOptions, FanOutReport};
pub use loader::{BulkLoader, LoaderOptions};
pub use transport::{
    FlightTransport, GrpcFlightTransport, GrpcTransportFactory, MemoryFlightTarget,
    TransportFactory,
};
