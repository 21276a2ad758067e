//! Buffer management and sharding for tiled AI accelerators.
//!
//! This crate places tensors in device memory and moves them between host
//! and device. It sits between operations (which describe *what* they want
//! resident) and a [`DeviceTransport`] (which can only poke bytes into a
//! bank at an offset).
//!
//! # Layers
//!
//! ```text
//! Buffer::allocate ──► Allocator (per-bank free lists, one common address)
//!        │
//! write_to_buffer ──► address_for_page ──► DeviceTransport::raw_write
//!        │                                         │
//! Device::barrier ─────────────────────────────────┘  (visibility)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use tilemem_driver::prelude::*;
//! use tilemem_grid::ArchSpec;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let device = Device::simulated(ArchSpec::grayskull())?;
//! let buffer = Buffer::allocate(&device, BufferConfig::interleaved(1024, 64))?;
//!
//! let data: Vec<u8> = (0..1024).map(|i| i as u8).collect();
//! write_to_buffer(&buffer, &data)?;
//! device.dram_barrier()?;
//! assert_eq!(read_from_buffer(&buffer)?.as_ref(), data.as_slice());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod address;
pub mod allocator;
pub mod backends;
mod buffer;
mod config;
mod device;
mod error;
mod layout;
pub mod shard;
mod transfer;
mod transport;

pub use address::{address_for_page, page_addresses, PageAddress};
pub use allocator::{Allocator, BankManager, Statistics};
pub use backends::{SimulatedDevice, SimulatorConfig, WriteVisibility};
pub use buffer::{Buffer, BufferConfig, BufferState};
pub use config::{
    DeviceConfig, TransferConfig, TransferMode, DEFAULT_DRAM_ALIGNMENT, DEFAULT_L1_ALIGNMENT,
};
pub use device::Device;
pub use error::{MemError, Result};
pub use layout::{BankId, MemorySpace, TensorMemoryLayout};
pub use shard::{ShardLocation, ShardSpec, ShardSpecBuffer};
pub use transfer::{read_from_buffer, read_from_buffer_into, write_to_buffer};
pub use transport::{BackendType, DeviceTransport};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        address_for_page, read_from_buffer, read_from_buffer_into, write_to_buffer, BankId,
        Buffer, BufferConfig, Device, DeviceConfig, MemError, MemorySpace, Result, ShardSpec,
        ShardSpecBuffer, TensorMemoryLayout, TransferConfig,
    };
}
