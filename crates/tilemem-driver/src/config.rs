//! Device and transfer configuration
//!
//! Every recognised option is a field with a documented default. Nothing is
//! read lazily: [`DeviceConfig::validate`] runs when the device is opened.

use crate::error::{MemError, Result};
use crate::layout::MemorySpace;
use tilemem_grid::arch::DEFAULT_L1_UNRESERVED_BASE;
use tilemem_grid::ArchSpec;
use tracing::debug;

/// DRAM allocation granularity in bytes.
pub const DEFAULT_DRAM_ALIGNMENT: u64 = 32;
/// L1 allocation granularity in bytes.
pub const DEFAULT_L1_ALIGNMENT: u64 = 16;

/// Per-device allocator and transfer options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device id, used in logs and errors (default 0)
    pub device_id: u32,

    /// DRAM reservation granularity (default 32 B)
    pub dram_alignment: u64,

    /// L1 reservation granularity (default 16 B)
    pub l1_alignment: u64,

    /// Bytes kept back at the bottom of every DRAM bank (default 0)
    pub dram_reserved_base: u64,

    /// First L1 byte buffers may use on each core (default 100 KiB)
    pub l1_unreserved_base: u64,

    /// How buffer transfers are dispatched
    pub transfer: TransferConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            dram_alignment: DEFAULT_DRAM_ALIGNMENT,
            l1_alignment: DEFAULT_L1_ALIGNMENT,
            dram_reserved_base: 0,
            l1_unreserved_base: DEFAULT_L1_UNRESERVED_BASE,
            transfer: TransferConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Defaults with the reserved L1 region of `arch`
    pub fn for_arch(arch: &ArchSpec) -> Self {
        debug!(
            "Device config for {}: L1 unreserved base {:#x}",
            arch.name, arch.l1_unreserved_base
        );
        Self {
            l1_unreserved_base: arch.l1_unreserved_base,
            ..Self::default()
        }
    }

    /// Set the device id
    #[must_use]
    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Set the transfer options
    #[must_use]
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Reservation granularity of a memory space
    pub const fn alignment(&self, space: MemorySpace) -> u64 {
        match space {
            MemorySpace::Dram => self.dram_alignment,
            MemorySpace::L1 => self.l1_alignment,
        }
    }

    /// Lowest allocatable byte of every bank in a memory space
    pub const fn reserved_base(&self, space: MemorySpace) -> u64 {
        match space {
            MemorySpace::Dram => self.dram_reserved_base,
            MemorySpace::L1 => self.l1_unreserved_base,
        }
    }

    /// Check the options
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero or non-power-of-two alignment or a
    /// zero worker count.
    pub fn validate(&self) -> Result<()> {
        for space in [MemorySpace::Dram, MemorySpace::L1] {
            let align = self.alignment(space);
            if align == 0 || !align.is_power_of_two() {
                return Err(MemError::config(format!(
                    "{space} alignment {align} is not a power of two"
                )));
            }
        }
        if self.transfer.max_workers == 0 {
            return Err(MemError::config("transfer.max_workers must be at least 1"));
        }
        Ok(())
    }
}

/// How pages of one transfer are issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// One thread, pages in index order
    #[default]
    Sequential,
    /// Pages grouped per bank, banks spread over scoped worker threads
    PerBank,
}

/// Transfer dispatch options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Dispatch mode (default [`TransferMode::Sequential`])
    pub mode: TransferMode,

    /// Worker threads for [`TransferMode::PerBank`] (default 4)
    pub max_workers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::Sequential,
            max_workers: 4,
        }
    }
}

impl TransferConfig {
    /// Per-bank dispatch over `max_workers` threads
    pub const fn per_bank(max_workers: usize) -> Self {
        Self {
            mode: TransferMode::PerBank,
            max_workers,
        }
    }
}
