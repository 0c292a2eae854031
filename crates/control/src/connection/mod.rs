//! Connection management module.
//!
//! This module provides TCP reachability probing and the per-address
//! connection lifecycle driven through the transport binary.

pub mod manager;
pub mod probe;

pub use manager::{ConnectionEvent, ConnectionManager};
pub use probe::{probe_reachable, DEFAULT_PROBE_TIMEOUT};
