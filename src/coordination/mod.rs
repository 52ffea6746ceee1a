//! Coordination
//!
//! Cooperative shutdown for the long-running live loop.

pub mod shutdown;

pub use shutdown::{install_signal_handlers, ShutdownSignal, StopToken};
