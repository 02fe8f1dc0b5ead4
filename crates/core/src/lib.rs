//! Domain model and aggregation logic for the EyeSis detection dashboard.
//!
//! Everything in this crate is synchronous and never touches the network,
//! so the aggregation rules can be exercised without a backend.

pub mod aggregator;
pub mod clip;
pub mod detection;
pub mod detection_log;
pub mod error;
pub mod export;
pub mod frame;
pub mod person;
pub mod session;
pub mod snapshot;
pub mod timeline;
pub mod types;
