//! Utility modules.

pub mod signal;

pub use signal::{shutdown_signal, stop_on_shutdown};
