//! Transport implementations
//!
//! Only the in-process simulator ships with this crate. Hardware transports
//! implement [`DeviceTransport`](crate::DeviceTransport) out of
//! tree, on top of the vendor kernel driver.

pub mod simulated;

pub use simulated::{SimulatedDevice, SimulatorConfig, TransferKind, TransferRecord, WriteVisibility};
