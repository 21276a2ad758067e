//! Transport abstraction for device access
//!
//! The transport is the raw path to the silicon: PCIe BAR windows, NOC
//! writes, DRAM channel reads. This crate never touches hardware itself; it
//! resolves every page to a `(space, bank, offset)` triple and hands the
//! bytes to a [`DeviceTransport`].

use crate::error::Result;
use crate::layout::{BankId, MemorySpace};
use std::fmt::Debug;
use tilemem_grid::{CoreCoord, NocCoord};

/// Raw device access consumed by the buffer layer
///
/// Implementations must be safe to share across threads: independent banks
/// may be driven from different threads during one transfer.
pub trait DeviceTransport: Debug + Send + Sync {
    /// Logical worker grid size (columns × rows)
    fn grid_size(&self) -> CoreCoord;

    /// Number of banks in a memory space
    fn num_banks(&self, space: MemorySpace) -> u32;

    /// Bytes per bank in a memory space
    fn bank_size(&self, space: MemorySpace) -> u64;

    /// Translate a logical worker core to its NOC endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the core is not on the grid.
    fn logical_to_physical(&self, core: CoreCoord) -> Result<NocCoord>;

    /// NOC endpoint of a DRAM channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    fn dram_channel_to_physical(&self, channel: u32) -> Result<NocCoord>;

    /// Issue a write of `data` to `bank` at `offset`
    ///
    /// Returning `Ok` means the write was issued, not that it is visible.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the write.
    fn raw_write(&self, space: MemorySpace, bank: BankId, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `out.len()` bytes from `bank` at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects the read.
    fn raw_read(&self, space: MemorySpace, bank: BankId, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Block until every write issued so far to `space` is visible
    ///
    /// # Errors
    ///
    /// Returns error if the device does not acknowledge the barrier.
    fn barrier(&self, space: MemorySpace) -> Result<()>;

    /// Transport kind, for logging
    fn backend_type(&self) -> BackendType;
}

/// Transport kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process simulation of DRAM channels and per-core L1
    Simulated,

    /// Real silicon behind an external driver
    Hardware,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "Simulated"),
            Self::Hardware => write!(f, "Hardware"),
        }
    }
}
