//! Error types for buffer, allocation and transfer operations

use crate::layout::{BankId, MemorySpace};
use thiserror::Error;
use tilemem_grid::GridError;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, MemError>;

/// Errors that can occur while placing, addressing or moving buffer data
#[derive(Debug, Error)]
pub enum MemError {
    /// Invalid buffer, shard or device configuration
    #[error("Config error: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Invalid core geometry (inverted range, overlapping ranges, ...)
    #[error("Config error: {source}")]
    Grid {
        /// Underlying geometry error
        #[from]
        source: GridError,
    },

    /// A bank has no contiguous free range large enough
    #[error("Out of memory: {space} {bank} cannot fit {requested} bytes")]
    OutOfMemory {
        /// Memory space of the bank
        space: MemorySpace,
        /// Bank that ran out
        bank: BankId,
        /// Bytes requested per bank
        requested: u64,
    },

    /// Page, bank, core or address outside its legal range
    #[error("Bounds error: {reason}")]
    Bounds {
        /// What was out of range
        reason: String,
    },

    /// Buffer used after it was freed
    #[error("Buffer {buffer_id} used after free")]
    UseAfterFree {
        /// Id of the freed buffer
        buffer_id: u64,
    },

    /// Transport-level failure (NACK, unreachable device)
    #[error("Device error on {space} {bank} at {offset:#x}: {reason}")]
    Device {
        /// Memory space addressed
        space: MemorySpace,
        /// Bank addressed
        bank: BankId,
        /// Byte offset addressed
        offset: u64,
        /// Reason reported by the transport
        reason: String,
    },

    /// Device handle was dropped while a buffer still referenced it
    #[error("Device {device_id} is closed")]
    DeviceClosed {
        /// Id of the closed device
        device_id: u32,
    },

    /// A page transfer failed; remaining pages were not issued
    #[error("Transfer of page {page} to {bank} failed: {source}")]
    PageTransfer {
        /// Page that failed
        page: u64,
        /// Bank it targeted
        bank: BankId,
        /// Underlying failure
        #[source]
        source: Box<MemError>,
    },
}

impl MemError {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a bounds error
    pub fn bounds(reason: impl Into<String>) -> Self {
        Self::Bounds {
            reason: reason.into(),
        }
    }

    /// Create a device error
    pub fn device(space: MemorySpace, bank: BankId, offset: u64, reason: impl Into<String>) -> Self {
        Self::Device {
            space,
            bank,
            offset,
            reason: reason.into(),
        }
    }

    /// Wrap a failure of one page transfer
    pub fn page_transfer(page: u64, bank: BankId, source: Self) -> Self {
        Self::PageTransfer {
            page,
            bank,
            source: Box::new(source),
        }
    }

    /// Whether this is a configuration error (including geometry errors)
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Grid { .. })
    }

    /// Whether this is a bounds error
    pub const fn is_bounds(&self) -> bool {
        matches!(self, Self::Bounds { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilemem_grid::CoreCoord;

    #[test]
    fn grid_errors_are_config_errors() {
        let err: MemError = GridError::TooManyCores {
            requested: 5,
            available: 4,
        }
        .into();
        assert!(err.is_config());
        assert!(err.to_string().starts_with("Config error"));
    }

    #[test]
    fn page_transfer_names_page_and_bank() {
        let inner = MemError::device(MemorySpace::L1, BankId(7), 0x1000, "NACK");
        let err = MemError::page_transfer(12, BankId(7), inner);
        let msg = err.to_string();
        assert!(msg.contains("page 12"), "{msg}");
        assert!(msg.contains("bank 7"), "{msg}");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn out_of_grid_message() {
        let err: MemError = GridError::OutOfGrid {
            core: CoreCoord::new(9, 9),
            grid_x: 8,
            grid_y: 8,
        }
        .into();
        assert!(err.to_string().contains("(x=9,y=9)"));
    }
}
