//! Host ↔ device buffer transfers
//!
//! A transfer resolves every page address up front, then issues one raw
//! access per page. Nothing here waits for visibility: callers barrier the
//! memory space before reading back data they just wrote.
//!
//! Dispatch follows [`TransferConfig`]:
//!
//! - [`TransferMode::Sequential`]: one thread, page order.
//! - [`TransferMode::PerBank`]: pages grouped by bank (page order kept
//!   inside a bank), bank groups spread over up to `max_workers` scoped
//!   threads. The first failure stops every worker before its next page.
//!
//! Either way, a failed page is reported as [`MemError::PageTransfer`] and
//! the pages after it are not issued. With several workers failing, the
//! lowest failing page is reported.

use crate::address::PageAddress;
use crate::buffer::Buffer;
use crate::config::{TransferConfig, TransferMode};
use crate::error::{MemError, Result};
use crate::layout::BankId;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::debug;

/// Write `data` into `buffer`
///
/// # Errors
///
/// Returns `UseAfterFree` for a freed buffer, `DeviceClosed` if its device
/// is gone, a bounds error if `data.len()` differs from the buffer size, or
/// `PageTransfer` if the transport rejects a page.
pub fn write_to_buffer(buffer: &Buffer, data: &[u8]) -> Result<()> {
    let Some(page_len) = prepare(buffer, data.len())? else {
        return Ok(());
    };
    let device = buffer.device()?;
    let addresses = buffer.page_addresses()?;
    let transport = device.transport();
    let space = buffer.memory_space();
    let transfer = device.config().transfer;

    debug!(
        "Write buffer {}: {} pages to {space}, {:?}",
        buffer.id(),
        addresses.len(),
        transfer.mode
    );
    let jobs = addresses.into_iter().zip(data.chunks(page_len)).collect();
    dispatch(&transfer, jobs, |addr, page| {
        transport.raw_write(space, addr.bank, addr.offset, page)
    })
}

/// Read the whole of `buffer`
///
/// # Errors
///
/// See [`read_from_buffer_into`].
pub fn read_from_buffer(buffer: &Buffer) -> Result<Bytes> {
    let len = usize::try_from(buffer.size())
        .map_err(|_| MemError::bounds(format!("buffer size {} exceeds host memory", buffer.size())))?;
    let mut out = BytesMut::zeroed(len);
    read_from_buffer_into(buffer, &mut out)?;
    Ok(out.freeze())
}

/// Read the whole of `buffer` into `out`
///
/// # Errors
///
/// Returns `UseAfterFree` for a freed buffer, `DeviceClosed` if its device
/// is gone, a bounds error if `out.len()` differs from the buffer size, or
/// `PageTransfer` if the transport rejects a page.
pub fn read_from_buffer_into(buffer: &Buffer, out: &mut [u8]) -> Result<()> {
    let Some(page_len) = prepare(buffer, out.len())? else {
        return Ok(());
    };
    let device = buffer.device()?;
    let addresses = buffer.page_addresses()?;
    let transport = device.transport();
    let space = buffer.memory_space();
    let transfer = device.config().transfer;

    debug!(
        "Read buffer {}: {} pages from {space}, {:?}",
        buffer.id(),
        addresses.len(),
        transfer.mode
    );
    let jobs = addresses.into_iter().zip(out.chunks_mut(page_len)).collect();
    dispatch(&transfer, jobs, |addr, page| {
        transport.raw_read(space, addr.bank, addr.offset, page)
    })
}

/// Common checks; `None` for an empty buffer.
fn prepare(buffer: &Buffer, len: usize) -> Result<Option<usize>> {
    buffer.ensure_allocated()?;
    if len as u64 != buffer.size() {
        return Err(MemError::bounds(format!(
            "host buffer of {len} bytes for device buffer {} of {} bytes",
            buffer.id(),
            buffer.size()
        )));
    }
    if buffer.size() == 0 {
        return Ok(None);
    }
    let page_len = usize::try_from(buffer.page_size())
        .map_err(|_| MemError::bounds(format!("page size {} exceeds host memory", buffer.page_size())))?;
    Ok(Some(page_len))
}

fn dispatch<T, F>(config: &TransferConfig, jobs: Vec<(PageAddress, T)>, op: F) -> Result<()>
where
    T: Send,
    F: Fn(&PageAddress, T) -> Result<()> + Sync,
{
    match config.mode {
        TransferMode::Sequential => {
            for (addr, page) in jobs {
                op(&addr, page).map_err(|e| MemError::page_transfer(addr.page, addr.bank, e))?;
            }
            Ok(())
        }
        TransferMode::PerBank => dispatch_per_bank(config.max_workers, jobs, &op),
    }
}

fn dispatch_per_bank<T, F>(max_workers: usize, jobs: Vec<(PageAddress, T)>, op: &F) -> Result<()>
where
    T: Send,
    F: Fn(&PageAddress, T) -> Result<()> + Sync,
{
    let mut groups: BTreeMap<BankId, Vec<(PageAddress, T)>> = BTreeMap::new();
    for job in jobs {
        groups.entry(job.0.bank).or_default().push(job);
    }

    let workers = max_workers.clamp(1, groups.len().max(1));
    let mut lanes: Vec<Vec<(PageAddress, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, group) in groups.into_values().enumerate() {
        lanes[i % workers].extend(group);
    }

    let abort = AtomicBool::new(false);
    let abort = &abort;
    let failures: Vec<(u64, MemError)> = thread::scope(|s| {
        let handles: Vec<_> = lanes
            .into_iter()
            .map(|lane| {
                s.spawn(move || {
                    for (addr, page) in lane {
                        if abort.load(Ordering::Acquire) {
                            return None;
                        }
                        if let Err(e) = op(&addr, page) {
                            abort.store(true, Ordering::Release);
                            return Some((addr.page, MemError::page_transfer(addr.page, addr.bank, e)));
                        }
                    }
                    None
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    match failures.into_iter().min_by_key(|(page, _)| *page) {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimulatedDevice, SimulatorConfig, TransferKind, WriteVisibility};
    use crate::buffer::BufferConfig;
    use crate::config::DeviceConfig;
    use crate::device::Device;
    use crate::layout::MemorySpace;
    use std::sync::Arc;
    use tilemem_grid::{ArchSpec, CoreCoord};

    fn arch() -> ArchSpec {
        ArchSpec::custom("t", CoreCoord::new(4, 4), 4, 1 << 20, 1 << 16)
    }

    fn open(transfer: TransferConfig, visibility: WriteVisibility) -> (Arc<SimulatedDevice>, Arc<Device>) {
        let sim = Arc::new(
            SimulatedDevice::new(SimulatorConfig::new(arch()).with_visibility(visibility).with_transfer_log())
                .unwrap(),
        );
        let config = DeviceConfig::for_arch(sim.arch()).with_transfer(transfer);
        let device = Device::open(sim.clone(), config).unwrap();
        (sim, device)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn sequential_round_trip() {
        let (_sim, device) = open(TransferConfig::default(), WriteVisibility::OnBarrier);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(4096, 256)).unwrap();
        let data = pattern(4096);
        write_to_buffer(&buf, &data).unwrap();
        device.dram_barrier().unwrap();
        assert_eq!(read_from_buffer(&buf).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn per_bank_round_trip() {
        let (_sim, device) = open(TransferConfig::per_bank(3), WriteVisibility::OnBarrier);
        let cfg = BufferConfig::interleaved(64 * 32, 32).memory_space(MemorySpace::L1);
        let buf = Buffer::allocate(&device, cfg).unwrap();
        let data = pattern(64 * 32);
        write_to_buffer(&buf, &data).unwrap();
        device.l1_barrier().unwrap();
        let mut out = vec![0u8; data.len()];
        read_from_buffer_into(&buf, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn per_bank_keeps_page_order_within_bank() {
        let (sim, device) = open(TransferConfig::per_bank(4), WriteVisibility::Immediate);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(40 * 64, 64)).unwrap();
        write_to_buffer(&buf, &pattern(40 * 64)).unwrap();

        let log = sim.transfer_log();
        assert_eq!(log.len(), 40);
        for bank in 0..4 {
            let offsets: Vec<u64> = log
                .iter()
                .filter(|r| r.kind == TransferKind::Write && r.bank == BankId(bank))
                .map(|r| r.offset)
                .collect();
            assert_eq!(offsets.len(), 10);
            assert!(offsets.windows(2).all(|w| w[0] < w[1]), "bank {bank}: {offsets:?}");
        }
    }

    #[test]
    fn size_mismatch_is_bounds_error() {
        let (sim, device) = open(TransferConfig::default(), WriteVisibility::Immediate);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(1024, 64)).unwrap();
        assert!(write_to_buffer(&buf, &[0; 1000]).unwrap_err().is_bounds());
        let mut short = [0u8; 64];
        assert!(read_from_buffer_into(&buf, &mut short).unwrap_err().is_bounds());
        assert!(sim.transfer_log().is_empty(), "nothing issued");
    }

    #[test]
    fn zero_size_is_noop() {
        let (sim, device) = open(TransferConfig::default(), WriteVisibility::Immediate);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(0, 64)).unwrap();
        write_to_buffer(&buf, &[]).unwrap();
        assert!(read_from_buffer(&buf).unwrap().is_empty());
        assert!(sim.transfer_log().is_empty());
    }

    #[test]
    fn freed_buffer_rejected() {
        let (_sim, device) = open(TransferConfig::default(), WriteVisibility::Immediate);
        let mut buf = Buffer::allocate(&device, BufferConfig::interleaved(256, 64)).unwrap();
        buf.free().unwrap();
        assert!(matches!(
            write_to_buffer(&buf, &[0; 256]),
            Err(MemError::UseAfterFree { .. })
        ));
        assert!(matches!(read_from_buffer(&buf), Err(MemError::UseAfterFree { .. })));
    }

    #[test]
    fn sequential_fault_stops_at_failing_page() {
        let (sim, device) = open(TransferConfig::default(), WriteVisibility::Immediate);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(16 * 64, 64)).unwrap();
        sim.inject_fault(MemorySpace::Dram, BankId(2));

        let err = write_to_buffer(&buf, &pattern(16 * 64)).unwrap_err();
        match err {
            MemError::PageTransfer { page, bank, source } => {
                assert_eq!(page, 2);
                assert_eq!(bank, BankId(2));
                assert!(matches!(*source, MemError::Device { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Pages 0 and 1 were issued, nothing after page 2.
        assert_eq!(sim.transfer_log().len(), 2);
    }

    #[test]
    fn per_bank_fault_reports_page_and_bank() {
        let (sim, device) = open(TransferConfig::per_bank(2), WriteVisibility::Immediate);
        let buf = Buffer::allocate(&device, BufferConfig::interleaved(16 * 64, 64)).unwrap();
        sim.inject_fault(MemorySpace::Dram, BankId(3));
        let err = write_to_buffer(&buf, &pattern(16 * 64)).unwrap_err();
        assert!(matches!(err, MemError::PageTransfer { page: 3, bank: BankId(3), .. }));
        // The faulted bank never accepted a page.
        assert!(sim.transfer_log().iter().all(|r| r.bank != BankId(3)));
    }
}
