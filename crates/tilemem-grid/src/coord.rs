//! Logical worker-core coordinates.
//!
//! Cores are addressed by `(x, y)` on the logical grid: `x` is the column,
//! `y` the row. The logical grid hides harvested rows and the DRAM/Ethernet
//! columns; see [`crate::noc`] for the physical NOC coordinates.

use std::cmp::Ordering;
use std::fmt;

/// One worker core on the logical grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CoreCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl CoreCoord {
    /// Create a coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Column-major comparison: `x` first, then `y`.
    ///
    /// The derived [`Ord`] is row-major (`y` first); this is the order used
    /// when a shard grid is walked down columns.
    pub fn cmp_col_major(&self, other: &Self) -> Ordering {
        (self.x, self.y).cmp(&(other.x, other.y))
    }
}

/// Row-major: `y` first, then `x`.
impl Ord for CoreCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for CoreCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CoreCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(x={},y={})", self.x, self.y)
    }
}

impl From<(u32, u32)> for CoreCoord {
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y }
    }
}

/// Order in which shard indices walk the cores of a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShardOrientation {
    /// `x` varies fastest: (0,0), (1,0), (0,1), (1,1).
    #[default]
    RowMajor,
    /// `y` varies fastest: (0,0), (0,1), (1,0), (1,1).
    ColMajor,
}

impl fmt::Display for ShardOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowMajor => write!(f, "ROW_MAJOR"),
            Self::ColMajor => write!(f, "COL_MAJOR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_row_major() {
        let mut cores = vec![
            CoreCoord::new(1, 1),
            CoreCoord::new(0, 1),
            CoreCoord::new(1, 0),
            CoreCoord::new(0, 0),
        ];
        cores.sort();
        assert_eq!(
            cores,
            vec![
                CoreCoord::new(0, 0),
                CoreCoord::new(1, 0),
                CoreCoord::new(0, 1),
                CoreCoord::new(1, 1),
            ]
        );
    }

    #[test]
    fn col_major_comparison() {
        let a = CoreCoord::new(0, 1);
        let b = CoreCoord::new(1, 0);
        assert_eq!(a.cmp(&b), Ordering::Greater);
        assert_eq!(a.cmp_col_major(&b), Ordering::Less);
    }

    #[test]
    fn display() {
        assert_eq!(CoreCoord::new(3, 7).to_string(), "(x=3,y=7)");
        assert_eq!(ShardOrientation::ColMajor.to_string(), "COL_MAJOR");
    }
}
