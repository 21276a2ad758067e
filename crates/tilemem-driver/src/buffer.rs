//! Device buffers
//!
//! A [`Buffer`] is a reservation of one address range replicated across a
//! set of banks, plus the metadata needed to find each page in it:
//!
//! - **Interleaved**: `ceil(num_pages / num_banks)` page slots on banks
//!   `0..min(num_pages, num_banks)`.
//! - **Sharded**: one shard (`pages_per_shard` slots, padding included) on
//!   the bank of each core holding a shard.
//!
//! The reservation is returned by [`Buffer::free`] or, failing that, when the
//! buffer is dropped.

use crate::address::{self, PageAddress};
use crate::device::Device;
use crate::error::{MemError, Result};
use crate::layout::{BankId, MemorySpace, TensorMemoryLayout};
use crate::shard::ShardSpecBuffer;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Options for [`Buffer::allocate`]
///
/// ```text
/// option        default
/// ───────────   ─────────────
/// space         DRAM
/// layout        INTERLEAVED
/// shard         none
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Total bytes
    pub size: u64,
    /// Bytes per page
    pub page_size: u64,
    /// Memory space
    pub space: MemorySpace,
    /// Page placement
    pub layout: TensorMemoryLayout,
    /// Shard placement, required for sharded layouts
    pub shard: Option<ShardSpecBuffer>,
}

impl BufferConfig {
    /// Interleaved DRAM buffer
    pub const fn interleaved(size: u64, page_size: u64) -> Self {
        Self {
            size,
            page_size,
            space: MemorySpace::Dram,
            layout: TensorMemoryLayout::Interleaved,
            shard: None,
        }
    }

    /// Place the buffer in `space`
    #[must_use]
    pub fn memory_space(mut self, space: MemorySpace) -> Self {
        self.space = space;
        self
    }

    /// Use a sharded layout
    #[must_use]
    pub fn sharded(mut self, layout: TensorMemoryLayout, shard: ShardSpecBuffer) -> Self {
        self.layout = layout;
        self.shard = Some(shard);
        self
    }

    /// Number of pages (0 when `page_size` is 0)
    pub const fn num_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.size / self.page_size
        }
    }

    /// Check the options without touching a device
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero page size, a size that is not a
    /// whole number of pages, a layout/shard mismatch, a shard spec whose
    /// page count differs from the buffer's, or shards that do not span the
    /// full tensor width (height sharding) or height (width sharding).
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MemError::config("page size must be non-zero"));
        }
        if self.size % self.page_size != 0 {
            return Err(MemError::config(format!(
                "size {} is not a multiple of page size {}",
                self.size, self.page_size
            )));
        }

        let shard = match (self.layout.is_sharded(), &self.shard) {
            (false, None) => return Ok(()),
            (false, Some(_)) => {
                return Err(MemError::config("interleaved buffer must not carry a shard spec"));
            }
            (true, None) => {
                return Err(MemError::config(format!("{} buffer needs a shard spec", self.layout)));
            }
            (true, Some(shard)) => shard,
        };

        if shard.num_pages() != self.num_pages() {
            return Err(MemError::config(format!(
                "shard spec covers {} pages, buffer has {}",
                shard.num_pages(),
                self.num_pages()
            )));
        }
        let [sh, sw] = shard.shape_in_pages();
        let [h, w] = shard.tensor_shape_in_pages();
        match self.layout {
            TensorMemoryLayout::HeightSharded if sw != w => Err(MemError::config(format!(
                "height-sharded shards must span all {w} page columns, got {sw}"
            ))),
            TensorMemoryLayout::WidthSharded if sh != h => Err(MemError::config(format!(
                "width-sharded shards must span all {h} page rows, got {sh}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Allocation state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Reservation held
    Allocated,
    /// Reservation returned
    Freed,
}

/// Reserved device memory
#[derive(Debug)]
pub struct Buffer {
    device: Weak<Device>,
    device_id: u32,
    id: u64,
    config: BufferConfig,
    address: u64,
    banks: Vec<BankId>,
    space_banks: u32,
    size_per_bank: u64,
    state: BufferState,
}

impl Buffer {
    /// Reserve a buffer on `device`
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid options or shard cores with no
    /// bank in the buffer's memory space, and `OutOfMemory` if a bank cannot
    /// fit the reservation. A failed call reserves nothing.
    pub fn allocate(device: &Arc<Device>, config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let space = config.space;
        let space_banks = device.num_banks(space);
        let num_pages = config.num_pages();

        let (banks, pages_per_bank) = match &config.shard {
            None => {
                let per_bank = num_pages.div_ceil(u64::from(space_banks));
                let used = u32::try_from(num_pages.min(u64::from(space_banks))).unwrap_or(space_banks);
                ((0..used).map(BankId).collect::<Vec<_>>(), per_bank)
            }
            Some(shard) => {
                let banks = shard
                    .shard_cores()
                    .iter()
                    .map(|&core| {
                        device.bank_for_core(space, core).map_err(|e| {
                            MemError::config(format!("shard core {core} has no {space} bank: {e}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                (banks, shard.num_pages_per_shard())
            }
        };
        let size_per_bank = pages_per_bank.checked_mul(config.page_size).ok_or_else(|| {
            MemError::OutOfMemory {
                space,
                bank: banks.iter().min().copied().unwrap_or(BankId(0)),
                requested: u64::MAX,
            }
        })?;

        let address = if banks.is_empty() || size_per_bank == 0 {
            device.allocator().manager(space).base()
        } else {
            device.allocator().allocate(space, &banks, size_per_bank)?
        };

        let id = device.next_buffer_id();
        info!(
            "Allocated buffer {id}: {} bytes {} in {space} at {address:#x} over {} bank(s)",
            config.size,
            config.layout,
            banks.len()
        );

        Ok(Self {
            device: Arc::downgrade(device),
            device_id: device.id(),
            id,
            config,
            address,
            banks,
            space_banks,
            size_per_bank,
            state: BufferState::Allocated,
        })
    }

    /// Buffer id, unique per device
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Owning device
    ///
    /// # Errors
    ///
    /// Returns `DeviceClosed` if the device has been dropped.
    pub fn device(&self) -> Result<Arc<Device>> {
        self.device.upgrade().ok_or(MemError::DeviceClosed {
            device_id: self.device_id,
        })
    }

    /// Options the buffer was allocated with
    pub const fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Total bytes
    pub const fn size(&self) -> u64 {
        self.config.size
    }

    /// Bytes per page
    pub const fn page_size(&self) -> u64 {
        self.config.page_size
    }

    /// Number of pages
    pub const fn num_pages(&self) -> u64 {
        self.config.num_pages()
    }

    /// Memory space
    pub const fn memory_space(&self) -> MemorySpace {
        self.config.space
    }

    /// Page placement
    pub const fn layout(&self) -> TensorMemoryLayout {
        self.config.layout
    }

    /// Shard placement of a sharded buffer
    pub const fn shard_spec(&self) -> Option<&ShardSpecBuffer> {
        self.config.shard.as_ref()
    }

    /// Banks holding the reservation; shard order for sharded buffers
    pub fn banks(&self) -> &[BankId] {
        &self.banks
    }

    /// Number of banks in the buffer's memory space
    pub const fn space_banks(&self) -> u32 {
        self.space_banks
    }

    /// Bytes requested per bank, before alignment
    pub const fn size_per_bank(&self) -> u64 {
        self.size_per_bank
    }

    /// Allocation state
    pub const fn state(&self) -> BufferState {
        self.state
    }

    /// Whether the reservation is still held
    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, BufferState::Allocated)
    }

    /// Base address, identical in every bank
    ///
    /// # Errors
    ///
    /// Returns `UseAfterFree` once the buffer has been freed.
    pub fn address(&self) -> Result<u64> {
        self.ensure_allocated()?;
        Ok(self.address)
    }

    pub(crate) fn ensure_allocated(&self) -> Result<()> {
        match self.state {
            BufferState::Allocated => Ok(()),
            BufferState::Freed => Err(MemError::UseAfterFree { buffer_id: self.id }),
        }
    }

    /// Address of page `page`
    ///
    /// # Errors
    ///
    /// See [`address::address_for_page`].
    pub fn address_for_page(&self, page: u64) -> Result<PageAddress> {
        address::address_for_page(self, page)
    }

    /// Addresses of every page, in page order
    ///
    /// # Errors
    ///
    /// Returns `UseAfterFree` once the buffer has been freed.
    pub fn page_addresses(&self) -> Result<Vec<PageAddress>> {
        address::page_addresses(self)
    }

    /// Return the reservation to every bank
    ///
    /// # Errors
    ///
    /// Returns `UseAfterFree` if the buffer was already freed, or the
    /// allocator's error if the reservation was not found.
    pub fn free(&mut self) -> Result<()> {
        self.ensure_allocated()?;
        self.state = BufferState::Freed;
        self.release()
    }

    fn release(&self) -> Result<()> {
        if self.banks.is_empty() || self.size_per_bank == 0 {
            return Ok(());
        }
        let Some(device) = self.device.upgrade() else {
            debug!("Buffer {}: device {} already closed", self.id, self.device_id);
            return Ok(());
        };
        device
            .allocator()
            .deallocate(self.config.space, &self.banks, self.address, self.size_per_bank)?;
        info!("Freed buffer {} at {:#x}", self.id, self.address);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.is_allocated() {
            self.state = BufferState::Freed;
            if let Err(e) = self.release() {
                warn!("Buffer {}: release on drop failed: {e}", self.id);
            }
        }
    }
}
