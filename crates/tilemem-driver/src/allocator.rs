//! Per-bank address allocation
//!
//! Every bank of a memory space owns a free list over
//! `[reserved_base, bank_size)`. A buffer reserves the *same* address range
//! in each bank it touches, so a page's offset inside its bank never depends
//! on which bank it landed in.
//!
//! # Policy
//!
//! - First fit: the lowest aligned address free in all requested banks.
//! - Freed ranges coalesce with their neighbours; there is no compaction.
//! - Requests are rounded up to the space's alignment.
//! - Banks are locked in ascending id order for the whole search-and-reserve
//!   and unlocked on every exit path, including out-of-memory.

use crate::config::DeviceConfig;
use crate::error::{MemError, Result};
use crate::layout::{BankId, MemorySpace};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Round `value` up to a multiple of `align` (a power of two); `None` on
/// overflow.
pub(crate) const fn align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Sorted, coalesced free ranges of one bank (`start..end`).
#[derive(Debug, Clone, PartialEq, Eq)]
struct FreeList {
    blocks: Vec<(u64, u64)>,
}

impl FreeList {
    fn new(base: u64, limit: u64) -> Self {
        let blocks = if base < limit { vec![(base, limit)] } else { Vec::new() };
        Self { blocks }
    }

    /// Lowest aligned address `>= from` with `size` free bytes behind it.
    fn first_fit(&self, from: u64, size: u64, align: u64) -> Option<u64> {
        self.blocks.iter().find_map(|&(start, end)| {
            let addr = align_up(start.max(from), align)?;
            (addr.checked_add(size)? <= end).then_some(addr)
        })
    }

    fn reserve(&mut self, addr: u64, size: u64) -> bool {
        let end = addr + size;
        let Some(i) = self
            .blocks
            .iter()
            .position(|&(s, e)| s <= addr && end <= e)
        else {
            return false;
        };
        let (s, e) = self.blocks[i];
        let mut pieces = Vec::with_capacity(2);
        if s < addr {
            pieces.push((s, addr));
        }
        if end < e {
            pieces.push((end, e));
        }
        self.blocks.splice(i..=i, pieces);
        true
    }

    /// Return a range; `false` if any byte of it is already free.
    fn release(&mut self, addr: u64, size: u64) -> bool {
        let end = addr + size;
        let i = self.blocks.partition_point(|&(s, _)| s < addr);
        if i > 0 && self.blocks[i - 1].1 > addr {
            return false;
        }
        if i < self.blocks.len() && self.blocks[i].0 < end {
            return false;
        }

        let merge_prev = i > 0 && self.blocks[i - 1].1 == addr;
        let merge_next = i < self.blocks.len() && self.blocks[i].0 == end;
        match (merge_prev, merge_next) {
            (true, true) => {
                self.blocks[i - 1].1 = self.blocks[i].1;
                self.blocks.remove(i);
            }
            (true, false) => self.blocks[i - 1].1 = end,
            (false, true) => self.blocks[i].0 = addr,
            (false, false) => self.blocks.insert(i, (addr, end)),
        }
        true
    }

    fn free_bytes(&self) -> u64 {
        self.blocks.iter().map(|&(s, e)| e - s).sum()
    }

    fn largest_free(&self) -> u64 {
        self.blocks.iter().map(|&(s, e)| e - s).max().unwrap_or(0)
    }
}

/// Usage summary of one memory space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Number of banks
    pub num_banks: u32,
    /// Allocatable bytes per bank
    pub bank_capacity: u64,
    /// Bytes currently reserved, summed over banks
    pub total_allocated: u64,
    /// Bytes currently free, summed over banks
    pub total_free: u64,
    /// Largest contiguous free range in any bank
    pub largest_free_block: u64,
}

/// Free lists of every bank in one memory space
#[derive(Debug)]
pub struct BankManager {
    space: MemorySpace,
    base: u64,
    bank_size: u64,
    alignment: u64,
    banks: Vec<Mutex<FreeList>>,
}

impl BankManager {
    /// Create `num_banks` empty banks of `bank_size` bytes, allocatable
    /// from `base` upwards.
    pub fn new(space: MemorySpace, num_banks: u32, bank_size: u64, base: u64, alignment: u64) -> Self {
        let base = align_up(base, alignment).unwrap_or(bank_size);
        let banks = (0..num_banks)
            .map(|_| Mutex::new(FreeList::new(base, bank_size)))
            .collect();
        debug!("{space}: {num_banks} banks of {bank_size:#x} bytes, base {base:#x}, align {alignment}");
        Self {
            space,
            base,
            bank_size,
            alignment,
            banks,
        }
    }

    /// Memory space managed
    pub const fn space(&self) -> MemorySpace {
        self.space
    }

    /// Number of banks
    pub fn num_banks(&self) -> u32 {
        u32::try_from(self.banks.len()).unwrap_or(u32::MAX)
    }

    /// Lowest allocatable address
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Reservation granularity
    pub const fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes a request of `size` actually reserves per bank, `None` if
    /// rounding overflows
    pub const fn reserved_size(&self, size: u64) -> Option<u64> {
        align_up(size, self.alignment)
    }

    fn lock_sorted(&self, banks: &[BankId]) -> Result<(Vec<BankId>, Vec<MutexGuard<'_, FreeList>>)> {
        let mut ids = banks.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if let Some(bad) = ids.iter().find(|b| b.index() >= self.num_banks()) {
            return Err(MemError::bounds(format!(
                "{} {bad} does not exist ({} banks)",
                self.space,
                self.num_banks()
            )));
        }
        let guards = ids.iter().map(|b| self.banks[b.index() as usize].lock()).collect();
        Ok((ids, guards))
    }

    /// Reserve `size` bytes at one common address in every listed bank.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` naming the first bank that cannot fit the
    /// request, or a bounds error for a bank id past the last bank.
    pub fn allocate(&self, banks: &[BankId], size: u64) -> Result<u64> {
        let (ids, mut guards) = self.lock_sorted(banks)?;
        let Some(size) = self.reserved_size(size) else {
            return Err(MemError::OutOfMemory {
                space: self.space,
                bank: ids.first().copied().unwrap_or(BankId(0)),
                requested: size,
            });
        };

        let mut candidate = self.base;
        'search: loop {
            for (bank, list) in ids.iter().zip(guards.iter()) {
                match list.first_fit(candidate, size, self.alignment) {
                    None => {
                        return Err(MemError::OutOfMemory {
                            space: self.space,
                            bank: *bank,
                            requested: size,
                        });
                    }
                    Some(addr) if addr > candidate => {
                        candidate = addr;
                        continue 'search;
                    }
                    Some(_) => {}
                }
            }
            break;
        }

        for list in &mut guards {
            let reserved = list.reserve(candidate, size);
            debug_assert!(reserved, "range checked free under the same lock");
        }
        debug!(
            "{}: reserved {size:#x} bytes at {candidate:#x} in {} bank(s)",
            self.space,
            ids.len()
        );
        Ok(candidate)
    }

    /// Return a reservation made by [`BankManager::allocate`].
    ///
    /// # Errors
    ///
    /// Returns a bounds error for an unknown bank or a range that is already
    /// (partly) free.
    pub fn deallocate(&self, banks: &[BankId], addr: u64, size: u64) -> Result<()> {
        let size = self.reserved_size(size).ok_or_else(|| {
            MemError::bounds(format!("{}: {size:#x} bytes at {addr:#x} was never reserved", self.space))
        })?;
        let (ids, mut guards) = self.lock_sorted(banks)?;
        let mut double_free = None;
        for (bank, list) in ids.iter().zip(guards.iter_mut()) {
            if !list.release(addr, size) {
                warn!("{}: {bank} range {addr:#x}+{size:#x} was not reserved", self.space);
                double_free.get_or_insert(*bank);
            }
        }
        match double_free {
            Some(bank) => Err(MemError::bounds(format!(
                "{} {bank}: range {addr:#x}+{size:#x} was not reserved",
                self.space
            ))),
            None => Ok(()),
        }
    }

    /// Usage summary across banks
    pub fn statistics(&self) -> Statistics {
        let capacity = self.bank_size.saturating_sub(self.base);
        let mut stats = Statistics {
            num_banks: self.num_banks(),
            bank_capacity: capacity,
            ..Statistics::default()
        };
        for bank in &self.banks {
            let list = bank.lock();
            let free = list.free_bytes();
            stats.total_free += free;
            stats.total_allocated += capacity - free;
            stats.largest_free_block = stats.largest_free_block.max(list.largest_free());
        }
        stats
    }
}

/// Bank managers for both memory spaces of one device
#[derive(Debug)]
pub struct Allocator {
    dram: BankManager,
    l1: BankManager,
}

impl Allocator {
    /// Build managers from bank geometry and the device config
    pub fn new(
        config: &DeviceConfig,
        dram_banks: u32,
        dram_bank_size: u64,
        l1_banks: u32,
        l1_bank_size: u64,
    ) -> Self {
        let dram = BankManager::new(
            MemorySpace::Dram,
            dram_banks,
            dram_bank_size,
            config.reserved_base(MemorySpace::Dram),
            config.alignment(MemorySpace::Dram),
        );
        let l1 = BankManager::new(
            MemorySpace::L1,
            l1_banks,
            l1_bank_size,
            config.reserved_base(MemorySpace::L1),
            config.alignment(MemorySpace::L1),
        );
        Self { dram, l1 }
    }

    /// Manager of one memory space
    pub const fn manager(&self, space: MemorySpace) -> &BankManager {
        match space {
            MemorySpace::Dram => &self.dram,
            MemorySpace::L1 => &self.l1,
        }
    }

    /// Reserve `size` bytes at a common address in `banks` of `space`
    ///
    /// # Errors
    ///
    /// See [`BankManager::allocate`].
    pub fn allocate(&self, space: MemorySpace, banks: &[BankId], size: u64) -> Result<u64> {
        self.manager(space).allocate(banks, size)
    }

    /// Return a reservation
    ///
    /// # Errors
    ///
    /// See [`BankManager::deallocate`].
    pub fn deallocate(&self, space: MemorySpace, banks: &[BankId], addr: u64, size: u64) -> Result<()> {
        self.manager(space).deallocate(banks, addr, size)
    }

    /// Usage summary of one memory space
    pub fn statistics(&self, space: MemorySpace) -> Statistics {
        self.manager(space).statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn banks(ids: &[u32]) -> Vec<BankId> {
        ids.iter().map(|&i| BankId(i)).collect()
    }

    #[test]
    fn free_list_coalesces() {
        let mut list = FreeList::new(0, 1024);
        assert!(list.reserve(0, 256));
        assert!(list.reserve(256, 256));
        assert!(list.reserve(512, 256));
        assert_eq!(list.blocks, vec![(768, 1024)]);

        assert!(list.release(256, 256));
        assert_eq!(list.blocks, vec![(256, 512), (768, 1024)]);
        assert!(list.release(512, 256));
        assert_eq!(list.blocks, vec![(256, 1024)]);
        assert!(list.release(0, 256));
        assert_eq!(list.blocks, vec![(0, 1024)]);
    }

    #[test]
    fn free_list_rejects_double_release() {
        let mut list = FreeList::new(0, 1024);
        assert!(list.reserve(128, 128));
        assert!(list.release(128, 128));
        assert!(!list.release(128, 128));
        assert!(!list.release(64, 128));
    }

    #[test]
    fn first_fit_respects_alignment() {
        let list = FreeList::new(10, 100);
        assert_eq!(list.first_fit(0, 16, 16), Some(16));
        assert_eq!(list.first_fit(0, 90, 16), None);
        assert_eq!(list.first_fit(70, 16, 16), Some(80));
    }

    #[test]
    fn common_address_across_banks() {
        let mgr = BankManager::new(MemorySpace::Dram, 4, 4096, 0, 32);
        // Bank 1 gets a hole at the bottom first.
        let a = mgr.allocate(&banks(&[1]), 100).unwrap();
        assert_eq!(a, 0);
        let b = mgr.allocate(&banks(&[0, 1, 2, 3]), 64).unwrap();
        assert_eq!(b, 128, "first address free in every bank");
        // Bank 0 still has [0, 128) free.
        assert_eq!(mgr.allocate(&banks(&[0]), 128).unwrap(), 0);
    }

    #[test]
    fn out_of_memory_names_bank() {
        let mgr = BankManager::new(MemorySpace::L1, 3, 1024, 512, 16);
        mgr.allocate(&banks(&[2]), 256).unwrap();
        let err = mgr.allocate(&banks(&[0, 1, 2]), 512).unwrap_err();
        match err {
            MemError::OutOfMemory { space, bank, requested } => {
                assert_eq!(space, MemorySpace::L1);
                assert_eq!(bank, BankId(2));
                assert_eq!(requested, 512);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failed request reserved nothing; the lock was released.
        assert_eq!(mgr.allocate(&banks(&[0, 1]), 512).unwrap(), 512);
    }

    #[test]
    fn oversized_request_is_out_of_memory() {
        let mgr = BankManager::new(MemorySpace::Dram, 2, 1024, 0, 32);
        for size in [u64::MAX, u64::MAX - 30, 1025] {
            match mgr.allocate(&banks(&[1, 0]), size).unwrap_err() {
                MemError::OutOfMemory { bank, .. } => assert_eq!(bank, BankId(0)),
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(mgr.statistics().total_allocated, 0);
        assert!(mgr.deallocate(&banks(&[0]), 0, u64::MAX).unwrap_err().is_bounds());
    }

    #[test]
    fn align_up_overflow() {
        assert_eq!(align_up(33, 32), Some(64));
        assert_eq!(align_up(u64::MAX, 1), Some(u64::MAX));
        assert_eq!(align_up(u64::MAX, 16), None);
    }

    #[test]
    fn unknown_bank_is_bounds_error() {
        let mgr = BankManager::new(MemorySpace::Dram, 2, 1024, 0, 32);
        assert!(mgr.allocate(&banks(&[2]), 32).unwrap_err().is_bounds());
    }

    #[test]
    fn free_and_reuse() {
        let mgr = BankManager::new(MemorySpace::Dram, 8, 1 << 16, 0, 32);
        let all = banks(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let before = mgr.statistics();
        for _ in 0..1000 {
            let a = mgr.allocate(&all, 4000).unwrap();
            let b = mgr.allocate(&all, 100).unwrap();
            mgr.deallocate(&all, a, 4000).unwrap();
            let c = mgr.allocate(&all, 3000).unwrap();
            assert_eq!(c, a, "freed range is reused");
            mgr.deallocate(&all, b, 100).unwrap();
            mgr.deallocate(&all, c, 3000).unwrap();
        }
        assert_eq!(mgr.statistics(), before);
    }

    #[test]
    fn double_free_detected() {
        let mgr = BankManager::new(MemorySpace::Dram, 2, 1024, 0, 32);
        let all = banks(&[0, 1]);
        let a = mgr.allocate(&all, 64).unwrap();
        mgr.deallocate(&all, a, 64).unwrap();
        assert!(mgr.deallocate(&all, a, 64).unwrap_err().is_bounds());
    }

    #[test]
    fn statistics_track_usage() {
        let mgr = BankManager::new(MemorySpace::L1, 2, 2048, 1024, 16);
        let stats = mgr.statistics();
        assert_eq!(stats.bank_capacity, 1024);
        assert_eq!(stats.total_free, 2048);
        mgr.allocate(&banks(&[0]), 100).unwrap();
        let stats = mgr.statistics();
        assert_eq!(stats.total_allocated, 112);
        assert_eq!(stats.largest_free_block, 1024);
    }

    #[test]
    fn concurrent_allocations_do_not_overlap() {
        let mgr = Arc::new(BankManager::new(MemorySpace::L1, 16, 1 << 20, 0, 16));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let mgr = Arc::clone(&mgr);
                std::thread::spawn(move || {
                    let set: Vec<BankId> = (0..16).filter(|b| b % 2 == t % 2 || b < &4).map(BankId).collect();
                    (0..50)
                        .map(|_| (set.clone(), mgr.allocate(&set, 256).unwrap()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut per_bank: Vec<Vec<u64>> = vec![Vec::new(); 16];
        for h in handles {
            for (set, addr) in h.join().unwrap() {
                for b in set {
                    per_bank[b.index() as usize].push(addr);
                }
            }
        }
        for addrs in &mut per_bank {
            let before = addrs.len();
            addrs.sort_unstable();
            addrs.dedup();
            assert_eq!(addrs.len(), before, "two reservations share an address");
        }
    }
}
