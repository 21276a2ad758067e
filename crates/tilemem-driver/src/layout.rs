//! Memory spaces, tensor layouts and bank identities

use std::fmt;

/// Device memory space a buffer lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemorySpace {
    /// Off-chip DRAM, one bank per channel
    #[default]
    Dram,
    /// Per-core SRAM, one bank per worker core
    L1,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dram => f.pad("DRAM"),
            Self::L1 => f.pad("L1"),
        }
    }
}

/// How a buffer's pages are spread over banks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TensorMemoryLayout {
    /// Consecutive pages round-robin across every bank
    #[default]
    Interleaved,
    /// Shards span the full tensor width
    HeightSharded,
    /// Shards span the full tensor height
    WidthSharded,
    /// Shards tile the tensor in both dimensions
    BlockSharded,
}

impl TensorMemoryLayout {
    /// Whether pages are placed by a shard spec
    pub const fn is_sharded(self) -> bool {
        !matches!(self, Self::Interleaved)
    }
}

impl fmt::Display for TensorMemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interleaved => write!(f, "INTERLEAVED"),
            Self::HeightSharded => write!(f, "HEIGHT_SHARDED"),
            Self::WidthSharded => write!(f, "WIDTH_SHARDED"),
            Self::BlockSharded => write!(f, "BLOCK_SHARDED"),
        }
    }
}

/// Bank index within one memory space
///
/// DRAM bank `n` is channel `n`. L1 bank `n` is the worker core at
/// `(n % grid_x, n / grid_x)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BankId(pub u32);

impl BankId {
    /// Raw index
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_layouts() {
        assert!(!TensorMemoryLayout::Interleaved.is_sharded());
        assert!(TensorMemoryLayout::HeightSharded.is_sharded());
        assert!(TensorMemoryLayout::WidthSharded.is_sharded());
        assert!(TensorMemoryLayout::BlockSharded.is_sharded());
    }

    #[test]
    fn display() {
        assert_eq!(MemorySpace::L1.to_string(), "L1");
        assert_eq!(TensorMemoryLayout::BlockSharded.to_string(), "BLOCK_SHARDED");
        assert_eq!(BankId(3).to_string(), "bank 3");
    }
}
