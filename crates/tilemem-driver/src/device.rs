//! Device handle
//!
//! A [`Device`] owns a transport and the allocator for every bank behind it.
//! It is always handled as `Arc<Device>`; buffers keep a `Weak` back
//! reference so a dropped device is reported instead of kept alive.
//!
//! # Bank numbering
//!
//! ```text
//! DRAM  bank n  <->  channel n  <->  logical core (n, 0)
//! L1    bank n  <->  worker core (n % grid_x, n / grid_x)
//! ```

use crate::allocator::{Allocator, Statistics};
use crate::backends::SimulatedDevice;
use crate::config::DeviceConfig;
use crate::error::{MemError, Result};
use crate::layout::{BankId, MemorySpace};
use crate::transport::{BackendType, DeviceTransport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tilemem_grid::{ArchSpec, CoreCoord, NocCoord};
use tracing::{debug, info};

/// Open accelerator with its bank allocator
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    transport: Arc<dyn DeviceTransport>,
    grid: CoreCoord,
    allocator: Allocator,
    next_buffer_id: AtomicU64,
}

impl Device {
    /// Open a device over `transport`
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` is invalid, the transport reports
    /// no DRAM banks, its L1 bank count does not match the worker grid, or
    /// a reserved region covers a whole bank.
    pub fn open(transport: Arc<dyn DeviceTransport>, config: DeviceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let grid = transport.grid_size();
        debug!(
            "Opening device {} ({} transport, grid {}x{})",
            config.device_id,
            transport.backend_type(),
            grid.x,
            grid.y
        );

        let dram_banks = transport.num_banks(MemorySpace::Dram);
        let l1_banks = transport.num_banks(MemorySpace::L1);
        if dram_banks == 0 {
            return Err(MemError::config("transport reports no DRAM banks"));
        }
        if u64::from(l1_banks) != u64::from(grid.x) * u64::from(grid.y) {
            return Err(MemError::config(format!(
                "{l1_banks} L1 banks for a {}x{} worker grid",
                grid.x, grid.y
            )));
        }
        for space in [MemorySpace::Dram, MemorySpace::L1] {
            let base = config.reserved_base(space);
            let size = transport.bank_size(space);
            if base >= size {
                return Err(MemError::config(format!(
                    "{space} reserved base {base:#x} leaves nothing of a {size:#x} byte bank"
                )));
            }
        }

        let allocator = Allocator::new(
            &config,
            dram_banks,
            transport.bank_size(MemorySpace::Dram),
            l1_banks,
            transport.bank_size(MemorySpace::L1),
        );

        info!(
            "Opened device {}: {} DRAM banks x {:#x}, {} L1 banks x {:#x}",
            config.device_id,
            dram_banks,
            transport.bank_size(MemorySpace::Dram),
            l1_banks,
            transport.bank_size(MemorySpace::L1)
        );

        Ok(Arc::new(Self {
            config,
            transport,
            grid,
            allocator,
            next_buffer_id: AtomicU64::new(0),
        }))
    }

    /// Open a simulated device of `arch` with default options
    ///
    /// # Errors
    ///
    /// Returns a config error if `arch` is inconsistent.
    pub fn simulated(arch: ArchSpec) -> Result<Arc<Self>> {
        let config = DeviceConfig::for_arch(&arch);
        let transport = SimulatedDevice::for_arch(arch)?;
        Self::open(Arc::new(transport), config)
    }

    /// Device id
    pub const fn id(&self) -> u32 {
        self.config.device_id
    }

    /// Options the device was opened with
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &dyn DeviceTransport {
        self.transport.as_ref()
    }

    /// Transport kind
    pub fn backend_type(&self) -> BackendType {
        self.transport.backend_type()
    }

    /// Bank allocator
    pub const fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Allocator usage of one memory space
    pub fn statistics(&self, space: MemorySpace) -> Statistics {
        self.allocator.statistics(space)
    }

    pub(crate) fn next_buffer_id(&self) -> u64 {
        self.next_buffer_id.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Logical worker grid size
    pub const fn logical_grid_size(&self) -> CoreCoord {
        self.grid
    }

    /// Number of banks in a memory space
    pub fn num_banks(&self, space: MemorySpace) -> u32 {
        self.transport.num_banks(space)
    }

    /// Bytes per bank in a memory space
    pub fn bank_size(&self, space: MemorySpace) -> u64 {
        self.transport.bank_size(space)
    }

    /// Number of DRAM channels
    pub fn num_dram_channels(&self) -> u32 {
        self.num_banks(MemorySpace::Dram)
    }

    /// Bytes per DRAM channel
    pub fn dram_bank_size(&self) -> u64 {
        self.bank_size(MemorySpace::Dram)
    }

    /// Bytes of L1 per worker core
    pub fn l1_size(&self) -> u64 {
        self.bank_size(MemorySpace::L1)
    }

    /// NOC endpoint of a logical worker core
    ///
    /// # Errors
    ///
    /// Returns error if the core is outside the worker grid.
    pub fn worker_core_from_logical_core(&self, core: CoreCoord) -> Result<NocCoord> {
        self.transport.logical_to_physical(core)
    }

    /// NOC endpoint of a DRAM channel
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an illegal channel.
    pub fn dram_channel_noc(&self, channel: u32) -> Result<NocCoord> {
        self.dram_channel(channel)?;
        self.transport.dram_channel_to_physical(channel)
    }

    /// Bank serving `core` in `space`
    ///
    /// # Errors
    ///
    /// Returns a bounds error if the core has no bank in that space.
    pub fn bank_for_core(&self, space: MemorySpace, core: CoreCoord) -> Result<BankId> {
        match space {
            MemorySpace::Dram => {
                if core.y == 0 && core.x < self.num_dram_channels() {
                    Ok(BankId(core.x))
                } else {
                    Err(MemError::bounds(format!(
                        "core {core} is not a DRAM channel ({} channels)",
                        self.num_dram_channels()
                    )))
                }
            }
            MemorySpace::L1 => {
                if core.x < self.grid.x && core.y < self.grid.y {
                    Ok(BankId(core.y * self.grid.x + core.x))
                } else {
                    Err(MemError::bounds(format!(
                        "core {core} is outside the {}x{} worker grid",
                        self.grid.x, self.grid.y
                    )))
                }
            }
        }
    }

    /// Core served by `bank` in `space`
    ///
    /// # Errors
    ///
    /// Returns a bounds error if the bank does not exist.
    pub fn core_for_bank(&self, space: MemorySpace, bank: BankId) -> Result<CoreCoord> {
        let n = bank.index();
        if n >= self.num_banks(space) {
            return Err(MemError::bounds(format!(
                "{space} {bank} does not exist ({} banks)",
                self.num_banks(space)
            )));
        }
        Ok(match space {
            MemorySpace::Dram => CoreCoord::new(n, 0),
            MemorySpace::L1 => CoreCoord::new(n % self.grid.x, n / self.grid.x),
        })
    }

    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Block until every issued write to `space` is visible
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails the barrier.
    pub fn barrier(&self, space: MemorySpace) -> Result<()> {
        self.transport.barrier(space)
    }

    /// [`Device::barrier`] on DRAM
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails the barrier.
    pub fn dram_barrier(&self) -> Result<()> {
        self.barrier(MemorySpace::Dram)
    }

    /// [`Device::barrier`] on L1
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails the barrier.
    pub fn l1_barrier(&self) -> Result<()> {
        self.barrier(MemorySpace::L1)
    }

    // ------------------------------------------------------------------
    // Direct bank access
    // ------------------------------------------------------------------

    fn check_range(&self, space: MemorySpace, bank: BankId, addr: u64, len: usize) -> Result<()> {
        let size = self.bank_size(space);
        match addr.checked_add(len as u64) {
            Some(end) if end <= size => Ok(()),
            _ => Err(MemError::bounds(format!(
                "{space} {bank}: {len} bytes at {addr:#x} past bank end {size:#x}"
            ))),
        }
    }

    fn dram_channel(&self, channel: u32) -> Result<BankId> {
        if channel < self.num_dram_channels() {
            Ok(BankId(channel))
        } else {
            Err(MemError::bounds(format!(
                "DRAM channel {channel} does not exist ({} channels)",
                self.num_dram_channels()
            )))
        }
    }

    /// Write raw bytes to a DRAM channel
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an illegal channel or range, checked
    /// before anything is written.
    pub fn write_to_dram_channel(&self, channel: u32, addr: u64, data: &[u8]) -> Result<()> {
        let bank = self.dram_channel(channel)?;
        self.check_range(MemorySpace::Dram, bank, addr, data.len())?;
        self.transport.raw_write(MemorySpace::Dram, bank, addr, data)
    }

    /// Read raw bytes from a DRAM channel
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an illegal channel or range.
    pub fn read_from_dram_channel(&self, channel: u32, addr: u64, out: &mut [u8]) -> Result<()> {
        let bank = self.dram_channel(channel)?;
        self.check_range(MemorySpace::Dram, bank, addr, out.len())?;
        self.transport.raw_read(MemorySpace::Dram, bank, addr, out)
    }

    /// Write raw bytes to the L1 of a logical worker core
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an out-of-grid core or range, checked
    /// before anything is written.
    pub fn write_to_l1(&self, core: CoreCoord, addr: u64, data: &[u8]) -> Result<()> {
        let bank = self.bank_for_core(MemorySpace::L1, core)?;
        self.check_range(MemorySpace::L1, bank, addr, data.len())?;
        self.transport.raw_write(MemorySpace::L1, bank, addr, data)
    }

    /// Read raw bytes from the L1 of a logical worker core
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an out-of-grid core or range.
    pub fn read_from_l1(&self, core: CoreCoord, addr: u64, out: &mut [u8]) -> Result<()> {
        let bank = self.bank_for_core(MemorySpace::L1, core)?;
        self.check_range(MemorySpace::L1, bank, addr, out.len())?;
        self.transport.raw_read(MemorySpace::L1, bank, addr, out)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        info!("Closing device {}", self.config.device_id);
    }
}
