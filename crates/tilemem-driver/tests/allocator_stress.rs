//! Allocation churn and out-of-memory behaviour

mod common;

use common::small_arch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use tilemem_driver::{Buffer, BufferConfig, Device, MemError, MemorySpace};
use tilemem_grid::{ArchSpec, CoreCoord};

#[test]
fn random_churn_does_not_leak() {
    let device = Device::simulated(small_arch(4, 4)).unwrap();
    let dram = device.statistics(MemorySpace::Dram);
    let l1 = device.statistics(MemorySpace::L1);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live: Vec<Buffer> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.random_bool(0.6) {
            let page_size = 32 * rng.random_range(1..8u64);
            let pages = rng.random_range(0..64u64);
            let space = if rng.random_bool(0.5) {
                MemorySpace::Dram
            } else {
                MemorySpace::L1
            };
            let cfg = BufferConfig::interleaved(pages * page_size, page_size).memory_space(space);
            match Buffer::allocate(&device, cfg) {
                Ok(buffer) => live.push(buffer),
                Err(MemError::OutOfMemory { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        } else {
            let index = rng.random_range(0..live.len());
            let mut buffer = live.swap_remove(index);
            if rng.random_bool(0.5) {
                buffer.free().unwrap();
            }
        }
    }
    live.clear();

    assert_eq!(device.statistics(MemorySpace::Dram), dram);
    assert_eq!(device.statistics(MemorySpace::L1), l1);
}

#[test]
fn freed_range_is_reused() {
    let device = Device::simulated(ArchSpec::grayskull()).unwrap();
    let mut first = Buffer::allocate(&device, BufferConfig::interleaved(8 * 4096, 4096)).unwrap();
    let address = first.address().unwrap();
    let _pin = Buffer::allocate(&device, BufferConfig::interleaved(8 * 64, 64)).unwrap();
    first.free().unwrap();

    let again = Buffer::allocate(&device, BufferConfig::interleaved(8 * 1024, 1024)).unwrap();
    assert_eq!(again.address().unwrap(), address);
}

#[test]
fn out_of_memory_names_bank_and_rolls_back() {
    // 4 KiB of L1 per core.
    let arch = ArchSpec::custom("oom", CoreCoord::new(2, 2), 2, 1 << 16, 4096);
    let device = Device::simulated(arch).unwrap();

    // Fill most of bank 0 only: one page on a four-bank interleave.
    let _hog = Buffer::allocate(&device, BufferConfig::interleaved(3072, 3072).memory_space(MemorySpace::L1))
        .unwrap();
    let before = device.statistics(MemorySpace::L1);

    let cfg = BufferConfig::interleaved(4 * 2048, 2048).memory_space(MemorySpace::L1);
    let err = Buffer::allocate(&device, cfg).unwrap_err();
    match err {
        MemError::OutOfMemory { space, bank, requested } => {
            assert_eq!(space, MemorySpace::L1);
            assert_eq!(bank.index(), 0);
            assert_eq!(requested, 2048);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.statistics(MemorySpace::L1), before);
}

#[test]
fn concurrent_allocation_from_threads() {
    let device = Device::simulated(small_arch(4, 4)).unwrap();
    let before = device.statistics(MemorySpace::L1);

    let handles: Vec<_> = (0..8u64)
        .map(|seed| {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut held = Vec::new();
                for _ in 0..200 {
                    let pages = rng.random_range(1..40u64);
                    let cfg = BufferConfig::interleaved(pages * 64, 64).memory_space(MemorySpace::L1);
                    held.push(Buffer::allocate(&device, cfg).unwrap());
                    if held.len() > 4 {
                        held.remove(0).free().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(device.statistics(MemorySpace::L1), before);
}
