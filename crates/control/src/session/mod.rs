//! Mirroring session management.
//!
//! This module launches the mirroring server per device, supervises its
//! process, and exposes its output as a subscribable line stream.

pub mod manager;
pub mod process;

pub use manager::{SessionEvent, SessionOrchestrator, DEFAULT_OUTPUT_CAPACITY, DEFAULT_STOP_GRACE};
pub use process::{Session, SessionId, SessionOutput};
