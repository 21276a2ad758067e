//! Page address resolution
//!
//! ```text
//! interleaved:  bank = page % num_banks
//!               offset = base + (page / num_banks) * page_size
//!
//! sharded:      (shard, slot) = shard_for_page(page)
//!               bank = bank_for_core(core_for_shard(shard))
//!               offset = base + slot * page_size
//! ```

use crate::buffer::Buffer;
use crate::error::{MemError, Result};
use crate::layout::BankId;
use std::fmt;

/// Physical location of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageAddress {
    /// Host page index
    pub page: u64,
    /// Bank holding the page
    pub bank: BankId,
    /// Byte offset within the bank
    pub offset: u64,
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} -> {} @ {:#x}", self.page, self.bank, self.offset)
    }
}

/// Resolve page `page` of `buffer`
///
/// # Errors
///
/// Returns `UseAfterFree` for a freed buffer and a bounds error if
/// `page >= buffer.num_pages()`.
pub fn address_for_page(buffer: &Buffer, page: u64) -> Result<PageAddress> {
    buffer.ensure_allocated()?;
    if page >= buffer.num_pages() {
        return Err(MemError::bounds(format!(
            "page {page} out of range for buffer {} ({} pages)",
            buffer.id(),
            buffer.num_pages()
        )));
    }
    resolve(buffer, buffer.address()?, page)
}

/// Resolve every page of `buffer`, in page order
///
/// # Errors
///
/// Returns `UseAfterFree` for a freed buffer.
pub fn page_addresses(buffer: &Buffer) -> Result<Vec<PageAddress>> {
    let base = buffer.address()?;
    (0..buffer.num_pages()).map(|page| resolve(buffer, base, page)).collect()
}

fn resolve(buffer: &Buffer, base: u64, page: u64) -> Result<PageAddress> {
    let page_size = buffer.page_size();
    match buffer.shard_spec() {
        None => {
            let num_banks = u64::from(buffer.space_banks());
            Ok(PageAddress {
                page,
                bank: BankId(u32::try_from(page % num_banks).unwrap_or(u32::MAX)),
                offset: base + (page / num_banks) * page_size,
            })
        }
        Some(shard) => {
            let loc = shard.shard_for_page(page)?;
            // Buffer banks are stored in shard order.
            let bank = usize::try_from(loc.shard)
                .ok()
                .and_then(|i| buffer.banks().get(i).copied())
                .ok_or_else(|| MemError::bounds(format!("shard {} has no bank", loc.shard)))?;
            Ok(PageAddress {
                page,
                bank,
                offset: base + loc.offset * page_size,
            })
        }
    }
}
