//! Configuration front-end of the traffic generation client.
//!
//! [`WorkloadConfig::from_file`] turns a configuration file into the server
//! table, the workload scalars and the weighted fanout, service and rate
//! tables consumed by the flow generator.

pub mod config;
pub mod distribution;
pub mod error;
pub mod seed;

pub use config::{Server, WorkloadConfig};
pub use distribution::{WeightedEntry, WeightedTable};
pub use error::ConfigError;
