//! Architecture descriptors.
//!
//! ```text
//! Arch          Worker grid   DRAM channels   DRAM/channel   L1/core
//! ────────────  ───────────   ─────────────   ────────────   ────────
//! Grayskull     12 × 9        8               1 GiB          1 MiB
//! Wormhole B0   8 × 8         12              1 GiB          1464 KiB
//! ```
//!
//! The bottom of every core's L1 holds firmware, mailboxes and kernel
//! binaries; buffers are only placed at or above
//! [`ArchSpec::l1_unreserved_base`].

use crate::coord::CoreCoord;
use crate::error::{GridError, Result};
use crate::noc::NocCoord;
use std::fmt;
use std::str::FromStr;

/// Tile height in elements.
pub const TILE_HEIGHT: u32 = 32;
/// Tile width in elements.
pub const TILE_WIDTH: u32 = 32;
/// Elements per tile.
pub const TILE_HW: u32 = TILE_HEIGHT * TILE_WIDTH;

/// Default first allocatable L1 byte.
pub const DEFAULT_L1_UNRESERVED_BASE: u64 = 100 * 1024;

const GIB: u64 = 1024 * 1024 * 1024;

/// Known silicon generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// First generation, 12 × 9 worker grid.
    Grayskull,
    /// Second generation, 8 × 8 worker grid.
    WormholeB0,
}

impl Arch {
    /// Full descriptor for this generation.
    #[must_use]
    pub fn spec(self) -> ArchSpec {
        match self {
            Self::Grayskull => ArchSpec::grayskull(),
            Self::WormholeB0 => ArchSpec::wormhole_b0(),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grayskull => write!(f, "grayskull"),
            Self::WormholeB0 => write!(f, "wormhole_b0"),
        }
    }
}

impl FromStr for Arch {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "grayskull" | "gs" => Ok(Self::Grayskull),
            "wormhole_b0" | "wormhole" | "wh" => Ok(Self::WormholeB0),
            other => Err(GridError::UnknownArch {
                name: other.to_string(),
            }),
        }
    }
}

/// Geometry and memory sizes of one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchSpec {
    /// Human-readable name.
    pub name: String,
    /// Logical worker grid size (columns × rows).
    pub grid: CoreCoord,
    /// Number of DRAM channels (one bank each).
    pub num_dram_channels: u32,
    /// Bytes per DRAM channel.
    pub dram_bank_size: u64,
    /// Bytes of L1 per worker core.
    pub l1_size: u64,
    /// First L1 byte available to buffers.
    pub l1_unreserved_base: u64,
    /// Physical NOC column of each logical column.
    pub noc_columns: Vec<u32>,
    /// Physical NOC row of each logical row.
    pub noc_rows: Vec<u32>,
    /// NOC endpoint of each DRAM channel.
    pub dram_noc: Vec<NocCoord>,
}

impl ArchSpec {
    /// Grayskull: 12 × 9 workers, 8 DRAM channels. Row 6 is the DRAM row
    /// and is skipped in the worker NOC rows.
    pub fn grayskull() -> Self {
        Self {
            name: Arch::Grayskull.to_string(),
            grid: CoreCoord::new(12, 9),
            num_dram_channels: 8,
            dram_bank_size: GIB,
            l1_size: 1024 * 1024,
            l1_unreserved_base: DEFAULT_L1_UNRESERVED_BASE,
            noc_columns: (1..=12).collect(),
            noc_rows: vec![1, 2, 3, 4, 5, 7, 8, 9, 10],
            dram_noc: [(1, 0), (1, 6), (4, 0), (4, 6), (7, 0), (7, 6), (10, 0), (10, 6)]
                .into_iter()
                .map(|(x, y)| NocCoord::new(x, y))
                .collect(),
        }
    }

    /// Wormhole B0: 8 × 8 workers, 12 DRAM channels on columns 0 and 5.
    pub fn wormhole_b0() -> Self {
        Self {
            name: Arch::WormholeB0.to_string(),
            grid: CoreCoord::new(8, 8),
            num_dram_channels: 12,
            dram_bank_size: GIB,
            l1_size: 1464 * 1024,
            l1_unreserved_base: DEFAULT_L1_UNRESERVED_BASE,
            noc_columns: vec![1, 2, 3, 4, 6, 7, 8, 9],
            noc_rows: vec![1, 2, 3, 4, 5, 7, 8, 9],
            dram_noc: [
                (0, 0),
                (0, 1),
                (0, 11),
                (0, 5),
                (0, 6),
                (0, 7),
                (5, 0),
                (5, 1),
                (5, 11),
                (5, 2),
                (5, 9),
                (5, 10),
            ]
            .into_iter()
            .map(|(x, y)| NocCoord::new(x, y))
            .collect(),
        }
    }

    /// Arbitrary geometry with workers at NOC `(x + 1, y + 1)`, DRAM
    /// channels stacked on NOC column 0 and no reserved L1.
    pub fn custom(
        name: impl Into<String>,
        grid: CoreCoord,
        num_dram_channels: u32,
        dram_bank_size: u64,
        l1_size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            grid,
            num_dram_channels,
            dram_bank_size,
            l1_size,
            l1_unreserved_base: 0,
            noc_columns: (1..=grid.x).collect(),
            noc_rows: (1..=grid.y).collect(),
            dram_noc: (0..num_dram_channels).map(|c| NocCoord::new(0, c)).collect(),
        }
    }

    /// Override the first allocatable L1 byte.
    #[must_use]
    pub fn with_l1_unreserved_base(mut self, base: u64) -> Self {
        self.l1_unreserved_base = base;
        self
    }

    /// Number of worker cores.
    ///
    /// Saturates for grids that [`ArchSpec::validate`] rejects.
    pub fn num_worker_cores(&self) -> u32 {
        self.grid.x.saturating_mul(self.grid.y)
    }

    /// NOC endpoint of DRAM channel `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::NoDramChannel`] past the last channel.
    pub fn dram_channel_to_noc(&self, channel: u32) -> Result<NocCoord> {
        self.dram_noc
            .get(channel as usize)
            .copied()
            .ok_or(GridError::NoDramChannel {
                channel,
                channels: self.num_dram_channels,
            })
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidArch`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(GridError::InvalidArch { reason });

        if self.grid.x == 0 || self.grid.y == 0 {
            return invalid(format!("{}: empty worker grid {}", self.name, self.grid));
        }
        if self.grid.x.checked_mul(self.grid.y).is_none() {
            return invalid(format!(
                "{}: {}x{} worker cores overflow a 32-bit bank count",
                self.name, self.grid.x, self.grid.y
            ));
        }
        if self.num_dram_channels == 0 {
            return invalid(format!("{}: no DRAM channels", self.name));
        }
        if self.noc_columns.len() != self.grid.x as usize
            || self.noc_rows.len() != self.grid.y as usize
        {
            return invalid(format!(
                "{}: NOC tables {}x{} do not match grid {}x{}",
                self.name,
                self.noc_columns.len(),
                self.noc_rows.len(),
                self.grid.x,
                self.grid.y
            ));
        }
        if self.dram_noc.len() != self.num_dram_channels as usize {
            return invalid(format!(
                "{}: {} DRAM NOC endpoints for {} channels",
                self.name,
                self.dram_noc.len(),
                self.num_dram_channels
            ));
        }
        if self.l1_unreserved_base > self.l1_size {
            return invalid(format!(
                "{}: L1 unreserved base {:#x} past L1 size {:#x}",
                self.name, self.l1_unreserved_base, self.l1_size
            ));
        }
        Ok(())
    }
}
