//! Physical NOC coordinates and logical → physical translation.
//!
//! The logical worker grid is dense; the physical NOC grid is not. DRAM,
//! PCIe and Ethernet endpoints occupy whole rows and columns, and harvested
//! rows disappear entirely. Translation is a per-axis lookup.

use crate::arch::ArchSpec;
use crate::coord::CoreCoord;
use crate::error::{GridError, Result};
use std::fmt;

/// Endpoint on the physical network-on-chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NocCoord {
    /// Physical column.
    pub x: u32,
    /// Physical row.
    pub y: u32,
}

impl NocCoord {
    /// Create a NOC coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for NocCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "noc({},{})", self.x, self.y)
    }
}

/// Per-axis translation tables for worker cores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NocMap {
    columns: Vec<u32>,
    rows: Vec<u32>,
}

impl NocMap {
    /// Build from explicit tables (`columns[x]`, `rows[y]`).
    pub fn new(columns: Vec<u32>, rows: Vec<u32>) -> Self {
        Self { columns, rows }
    }

    /// Tables of an architecture descriptor.
    pub fn for_arch(arch: &ArchSpec) -> Self {
        Self::new(arch.noc_columns.clone(), arch.noc_rows.clone())
    }

    /// Logical grid size covered by the tables.
    pub fn grid_size(&self) -> CoreCoord {
        CoreCoord::new(
            u32::try_from(self.columns.len()).unwrap_or(u32::MAX),
            u32::try_from(self.rows.len()).unwrap_or(u32::MAX),
        )
    }

    /// Translate a logical worker core.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::OutOfGrid`] if the core is outside the tables.
    pub fn to_physical(&self, core: CoreCoord) -> Result<NocCoord> {
        let x = self.columns.get(core.x as usize);
        let y = self.rows.get(core.y as usize);
        match (x, y) {
            (Some(&x), Some(&y)) => Ok(NocCoord::new(x, y)),
            _ => {
                let grid = self.grid_size();
                Err(GridError::OutOfGrid {
                    core,
                    grid_x: grid.x,
                    grid_y: grid.y,
                })
            }
        }
    }

    /// Reverse lookup of a worker endpoint.
    pub fn to_logical(&self, noc: NocCoord) -> Option<CoreCoord> {
        let x = self.columns.iter().position(|&c| c == noc.x)?;
        let y = self.rows.iter().position(|&r| r == noc.y)?;
        Some(CoreCoord::new(
            u32::try_from(x).ok()?,
            u32::try_from(y).ok()?,
        ))
    }
}
