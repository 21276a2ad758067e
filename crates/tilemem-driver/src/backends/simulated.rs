// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated device transport
//!
//! Models the DRAM channels and per-core L1 of an [`ArchSpec`] in host
//! memory so that every layer above the transport runs without silicon.
//!
//! ## Storage
//!
//! Each bank is sparse: 4 KiB chunks are materialised on first write, and
//! bytes never written read back as zero. A 1 GiB DRAM channel costs nothing
//! until it is touched.
//!
//! ## Visibility model
//!
//! ```text
//! raw_write ──► pending queue (per space) ──barrier()──► bank storage ──► raw_read
//! ```
//!
//! With [`WriteVisibility::OnBarrier`] (the default) a write is only issued:
//! reads keep returning the old bytes until the space is barriered. Pending
//! writes are applied in issue order. [`WriteVisibility::Immediate`] skips
//! the queue.
//!
//! ## Fault injection
//!
//! [`SimulatedDevice::inject_fault`] makes every access to one bank fail with
//! a device error, the way a NACKed NOC transaction would.

use crate::error::{MemError, Result};
use crate::layout::{BankId, MemorySpace};
use crate::transport::{BackendType, DeviceTransport};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tilemem_grid::{ArchSpec, CoreCoord, NocCoord, NocMap};
use tracing::{debug, info};

const CHUNK_SIZE: usize = 4096;

/// When simulated writes become readable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteVisibility {
    /// Writes land in storage as soon as they are issued
    Immediate,
    /// Writes are queued until the next barrier on their memory space
    #[default]
    OnBarrier,
}

/// Simulator options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Geometry being simulated
    pub arch: ArchSpec,
    /// Write visibility model (default [`WriteVisibility::OnBarrier`])
    pub visibility: WriteVisibility,
    /// Record every raw access for later inspection (default off)
    pub record_transfers: bool,
}

impl SimulatorConfig {
    /// Defaults for `arch`
    pub fn new(arch: ArchSpec) -> Self {
        Self {
            arch,
            visibility: WriteVisibility::default(),
            record_transfers: false,
        }
    }

    /// Set the visibility model
    #[must_use]
    pub fn with_visibility(mut self, visibility: WriteVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Enable the transfer log
    #[must_use]
    pub fn with_transfer_log(mut self) -> Self {
        self.record_transfers = true;
        self
    }
}

/// Direction of a logged access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Host → device
    Write,
    /// Device → host
    Read,
}

/// One raw access seen by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    /// Direction
    pub kind: TransferKind,
    /// Memory space
    pub space: MemorySpace,
    /// Bank
    pub bank: BankId,
    /// Byte offset in the bank
    pub offset: u64,
    /// Bytes moved
    pub len: usize,
}

#[derive(Debug, Default)]
struct SparseBank {
    chunks: HashMap<u64, Box<[u8]>>,
}

impl SparseBank {
    fn write(&mut self, mut offset: u64, mut data: &[u8]) {
        while !data.is_empty() {
            let index = offset / CHUNK_SIZE as u64;
            let within = (offset % CHUNK_SIZE as u64) as usize;
            let n = data.len().min(CHUNK_SIZE - within);
            let chunk = self
                .chunks
                .entry(index)
                .or_insert_with(|| vec![0u8; CHUNK_SIZE].into_boxed_slice());
            chunk[within..within + n].copy_from_slice(&data[..n]);
            data = &data[n..];
            offset += n as u64;
        }
    }

    fn read(&self, mut offset: u64, out: &mut [u8]) {
        let mut done = 0;
        while done < out.len() {
            let index = offset / CHUNK_SIZE as u64;
            let within = (offset % CHUNK_SIZE as u64) as usize;
            let n = (out.len() - done).min(CHUNK_SIZE - within);
            let dst = &mut out[done..done + n];
            match self.chunks.get(&index) {
                Some(chunk) => dst.copy_from_slice(&chunk[within..within + n]),
                None => dst.fill(0),
            }
            done += n;
            offset += n as u64;
        }
    }
}

#[derive(Debug)]
struct PendingWrite {
    bank: usize,
    offset: u64,
    data: Bytes,
}

#[derive(Debug)]
struct SpaceState {
    banks: Vec<SparseBank>,
    pending: Vec<PendingWrite>,
}

impl SpaceState {
    fn new(num_banks: u32) -> Self {
        Self {
            banks: (0..num_banks).map(|_| SparseBank::default()).collect(),
            pending: Vec::new(),
        }
    }
}

/// In-process device: DRAM channels plus one L1 per worker core
#[derive(Debug)]
pub struct SimulatedDevice {
    arch: ArchSpec,
    noc: NocMap,
    visibility: WriteVisibility,
    dram: Mutex<SpaceState>,
    l1: Mutex<SpaceState>,
    faults: Mutex<HashSet<(MemorySpace, BankId)>>,
    log: Option<Mutex<Vec<TransferRecord>>>,
}

impl SimulatedDevice {
    /// Build a simulator
    ///
    /// # Errors
    ///
    /// Returns a config error if the architecture descriptor is inconsistent.
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        config.arch.validate()?;
        let SimulatorConfig {
            arch,
            visibility,
            record_transfers,
        } = config;
        info!(
            "SimulatedDevice: {} grid {}x{}, {} DRAM channels, {:?} visibility",
            arch.name, arch.grid.x, arch.grid.y, arch.num_dram_channels, visibility
        );
        Ok(Self {
            noc: NocMap::for_arch(&arch),
            dram: Mutex::new(SpaceState::new(arch.num_dram_channels)),
            l1: Mutex::new(SpaceState::new(arch.num_worker_cores())),
            faults: Mutex::new(HashSet::new()),
            log: record_transfers.then(|| Mutex::new(Vec::new())),
            visibility,
            arch,
        })
    }

    /// Simulator with default options for `arch`
    ///
    /// # Errors
    ///
    /// See [`SimulatedDevice::new`].
    pub fn for_arch(arch: ArchSpec) -> Result<Self> {
        Self::new(SimulatorConfig::new(arch))
    }

    /// Geometry being simulated
    pub const fn arch(&self) -> &ArchSpec {
        &self.arch
    }

    /// Write visibility model
    pub const fn visibility(&self) -> WriteVisibility {
        self.visibility
    }

    /// Make every access to `bank` of `space` fail
    pub fn inject_fault(&self, space: MemorySpace, bank: BankId) {
        debug!("SimulatedDevice: fault injected on {space} {bank}");
        self.faults.lock().insert((space, bank));
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Writes issued to `space` but not yet barriered
    pub fn pending_writes(&self, space: MemorySpace) -> usize {
        self.state(space).lock().pending.len()
    }

    /// Snapshot of the transfer log (empty unless enabled)
    pub fn transfer_log(&self) -> Vec<TransferRecord> {
        self.log.as_ref().map(|log| log.lock().clone()).unwrap_or_default()
    }

    /// Drop all logged transfers
    pub fn clear_transfer_log(&self) {
        if let Some(log) = &self.log {
            log.lock().clear();
        }
    }

    const fn state(&self, space: MemorySpace) -> &Mutex<SpaceState> {
        match space {
            MemorySpace::Dram => &self.dram,
            MemorySpace::L1 => &self.l1,
        }
    }

    fn check_access(&self, space: MemorySpace, bank: BankId, offset: u64, len: usize) -> Result<usize> {
        if self.faults.lock().contains(&(space, bank)) {
            return Err(MemError::device(space, bank, offset, "injected fault"));
        }
        if bank.index() >= self.num_banks(space) {
            return Err(MemError::device(
                space,
                bank,
                offset,
                format!("no such bank ({} banks)", self.num_banks(space)),
            ));
        }
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.bank_size(space)) {
            return Err(MemError::device(
                space,
                bank,
                offset,
                format!("{len} bytes past bank end {:#x}", self.bank_size(space)),
            ));
        }
        Ok(bank.index() as usize)
    }

    fn record(&self, kind: TransferKind, space: MemorySpace, bank: BankId, offset: u64, len: usize) {
        if let Some(log) = &self.log {
            log.lock().push(TransferRecord {
                kind,
                space,
                bank,
                offset,
                len,
            });
        }
    }
}

impl DeviceTransport for SimulatedDevice {
    fn grid_size(&self) -> CoreCoord {
        self.arch.grid
    }

    fn num_banks(&self, space: MemorySpace) -> u32 {
        match space {
            MemorySpace::Dram => self.arch.num_dram_channels,
            MemorySpace::L1 => self.arch.num_worker_cores(),
        }
    }

    fn bank_size(&self, space: MemorySpace) -> u64 {
        match space {
            MemorySpace::Dram => self.arch.dram_bank_size,
            MemorySpace::L1 => self.arch.l1_size,
        }
    }

    fn logical_to_physical(&self, core: CoreCoord) -> Result<NocCoord> {
        Ok(self.noc.to_physical(core)?)
    }

    fn dram_channel_to_physical(&self, channel: u32) -> Result<NocCoord> {
        Ok(self.arch.dram_channel_to_noc(channel)?)
    }

    fn raw_write(&self, space: MemorySpace, bank: BankId, offset: u64, data: &[u8]) -> Result<()> {
        let index = self.check_access(space, bank, offset, data.len())?;
        self.record(TransferKind::Write, space, bank, offset, data.len());
        let mut state = self.state(space).lock();
        match self.visibility {
            WriteVisibility::Immediate => state.banks[index].write(offset, data),
            WriteVisibility::OnBarrier => state.pending.push(PendingWrite {
                bank: index,
                offset,
                data: Bytes::copy_from_slice(data),
            }),
        }
        Ok(())
    }

    fn raw_read(&self, space: MemorySpace, bank: BankId, offset: u64, out: &mut [u8]) -> Result<()> {
        let index = self.check_access(space, bank, offset, out.len())?;
        self.record(TransferKind::Read, space, bank, offset, out.len());
        self.state(space).lock().banks[index].read(offset, out);
        Ok(())
    }

    fn barrier(&self, space: MemorySpace) -> Result<()> {
        let mut state = self.state(space).lock();
        let pending = std::mem::take(&mut state.pending);
        if !pending.is_empty() {
            debug!("SimulatedDevice: {space} barrier applies {} writes", pending.len());
        }
        for write in pending {
            state.banks[write.bank].write(write.offset, &write.data);
        }
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ArchSpec {
        ArchSpec::custom("tiny", CoreCoord::new(2, 2), 2, 64 * 1024, 16 * 1024)
    }

    #[test]
    fn unwritten_bytes_read_zero() {
        let sim = SimulatedDevice::for_arch(tiny()).unwrap();
        let mut out = [0xffu8; 16];
        sim.raw_read(MemorySpace::Dram, BankId(1), 100, &mut out).unwrap();
        assert_eq!(out, [0u8; 16]);
    }

    #[test]
    fn writes_wait_for_barrier() {
        let sim = SimulatedDevice::for_arch(tiny()).unwrap();
        sim.raw_write(MemorySpace::L1, BankId(3), 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(sim.pending_writes(MemorySpace::L1), 1);
        assert_eq!(sim.pending_writes(MemorySpace::Dram), 0);

        let mut out = [0u8; 4];
        sim.raw_read(MemorySpace::L1, BankId(3), 0, &mut out).unwrap();
        assert_eq!(out, [0; 4]);

        // A DRAM barrier does not flush L1.
        sim.barrier(MemorySpace::Dram).unwrap();
        assert_eq!(sim.pending_writes(MemorySpace::L1), 1);

        sim.barrier(MemorySpace::L1).unwrap();
        sim.raw_read(MemorySpace::L1, BankId(3), 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn pending_writes_apply_in_order() {
        let sim = SimulatedDevice::for_arch(tiny()).unwrap();
        sim.raw_write(MemorySpace::Dram, BankId(0), 8, &[1; 8]).unwrap();
        sim.raw_write(MemorySpace::Dram, BankId(0), 12, &[2; 8]).unwrap();
        sim.barrier(MemorySpace::Dram).unwrap();
        let mut out = [0u8; 12];
        sim.raw_read(MemorySpace::Dram, BankId(0), 8, &mut out).unwrap();
        assert_eq!(out, [1, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn write_spanning_chunks() {
        let config = SimulatorConfig::new(tiny()).with_visibility(WriteVisibility::Immediate);
        let sim = SimulatedDevice::new(config).unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        sim.raw_write(MemorySpace::Dram, BankId(0), 4000, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        sim.raw_read(MemorySpace::Dram, BankId(0), 4000, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn out_of_range_access_is_device_error() {
        let sim = SimulatedDevice::for_arch(tiny()).unwrap();
        let err = sim.raw_write(MemorySpace::Dram, BankId(2), 0, &[0]).unwrap_err();
        assert!(matches!(err, MemError::Device { .. }));
        let err = sim
            .raw_write(MemorySpace::L1, BankId(0), 16 * 1024 - 2, &[0; 4])
            .unwrap_err();
        assert!(matches!(err, MemError::Device { .. }));
    }

    #[test]
    fn injected_fault() {
        let sim = SimulatedDevice::for_arch(tiny()).unwrap();
        sim.inject_fault(MemorySpace::L1, BankId(1));
        let err = sim.raw_write(MemorySpace::L1, BankId(1), 0, &[0]).unwrap_err();
        assert!(matches!(err, MemError::Device { bank: BankId(1), .. }));
        sim.raw_write(MemorySpace::L1, BankId(0), 0, &[0]).unwrap();
        sim.clear_faults();
        sim.raw_write(MemorySpace::L1, BankId(1), 0, &[0]).unwrap();
    }

    #[test]
    fn transfer_log_records_accesses() {
        let sim = SimulatedDevice::new(SimulatorConfig::new(tiny()).with_transfer_log()).unwrap();
        sim.raw_write(MemorySpace::Dram, BankId(1), 64, &[0; 32]).unwrap();
        let log = sim.transfer_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, TransferKind::Write);
        assert_eq!(log[0].bank, BankId(1));
        assert_eq!(log[0].len, 32);
        sim.clear_transfer_log();
        assert!(sim.transfer_log().is_empty());
    }

    #[test]
    fn geometry() {
        let sim = SimulatedDevice::for_arch(ArchSpec::wormhole_b0()).unwrap();
        assert_eq!(sim.num_banks(MemorySpace::Dram), 12);
        assert_eq!(sim.num_banks(MemorySpace::L1), 64);
        assert_eq!(sim.backend_type(), BackendType::Simulated);
        assert_eq!(
            sim.logical_to_physical(CoreCoord::new(4, 5)).unwrap(),
            NocCoord::new(6, 7)
        );
        assert!(sim.logical_to_physical(CoreCoord::new(8, 0)).is_err());
    }
}
