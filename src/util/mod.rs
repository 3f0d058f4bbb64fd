//! Shared utilities: wall-clock time and structured-logging setup.

pub mod clock;
pub mod telemetry;

pub use clock::{now_secs, Clock, ManualClock, SystemClock};
pub use telemetry::init_tracing;
