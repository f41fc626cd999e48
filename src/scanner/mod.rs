//! Scan scheduling and published scan snapshots.

pub mod scheduler;
pub mod snapshot;

pub use scheduler::{ScanScheduler, ScanSettings};
pub use snapshot::{ScanRequest, ScanSnapshot, ScanState};
