//! Rectangular core ranges and ordered range sets.
//!
//! A [`CoreRangeSet`] keeps its ranges in construction order and rejects
//! overlapping ranges. Its core order is load-bearing: shard `i` of a sharded
//! buffer lands on `ordered_cores()[i]`, so the set never re-sorts itself.

use crate::coord::{CoreCoord, ShardOrientation};
use crate::error::{GridError, Result};
use std::fmt;

/// Inclusive rectangle of cores, `start..=end` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreRange {
    start: CoreCoord,
    end: CoreCoord,
}

impl CoreRange {
    /// Create a range from two corners.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidRange`] if `start` exceeds `end` on either axis.
    pub fn new(start: CoreCoord, end: CoreCoord) -> Result<Self> {
        if start.x > end.x || start.y > end.y {
            return Err(GridError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range holding exactly one core.
    pub const fn single(core: CoreCoord) -> Self {
        Self {
            start: core,
            end: core,
        }
    }

    /// Lower corner.
    pub const fn start(&self) -> CoreCoord {
        self.start
    }

    /// Upper corner (inclusive).
    pub const fn end(&self) -> CoreCoord {
        self.end
    }

    /// Number of columns.
    pub const fn width(&self) -> u32 {
        self.end.x - self.start.x + 1
    }

    /// Number of rows.
    pub const fn height(&self) -> u32 {
        self.end.y - self.start.y + 1
    }

    /// Number of cores in the rectangle.
    pub const fn num_cores(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Whether `core` lies inside the rectangle.
    pub const fn contains(&self, core: CoreCoord) -> bool {
        core.x >= self.start.x
            && core.x <= self.end.x
            && core.y >= self.start.y
            && core.y <= self.end.y
    }

    /// Whether the two rectangles share at least one core.
    pub const fn intersects(&self, other: &Self) -> bool {
        self.start.x <= other.end.x
            && other.start.x <= self.end.x
            && self.start.y <= other.end.y
            && other.start.y <= self.end.y
    }

    /// Shared rectangle, if any.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        Some(Self {
            start: CoreCoord::new(self.start.x.max(other.start.x), self.start.y.max(other.start.y)),
            end: CoreCoord::new(self.end.x.min(other.end.x), self.end.y.min(other.end.y)),
        })
    }

    /// Iterate the cores of the rectangle in the given orientation.
    pub const fn cores(&self, orientation: ShardOrientation) -> CoreIter {
        CoreIter {
            range: *self,
            orientation,
            next: Some(self.start),
        }
    }
}

impl fmt::Display for CoreRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

impl From<CoreCoord> for CoreRange {
    fn from(core: CoreCoord) -> Self {
        Self::single(core)
    }
}

/// Iterator over the cores of one [`CoreRange`].
#[derive(Debug, Clone)]
pub struct CoreIter {
    range: CoreRange,
    orientation: ShardOrientation,
    next: Option<CoreCoord>,
}

impl Iterator for CoreIter {
    type Item = CoreCoord;

    fn next(&mut self) -> Option<CoreCoord> {
        let current = self.next?;
        let CoreRange { start, end } = self.range;
        self.next = match self.orientation {
            ShardOrientation::RowMajor if current.x < end.x => {
                Some(CoreCoord::new(current.x + 1, current.y))
            }
            ShardOrientation::RowMajor if current.y < end.y => {
                Some(CoreCoord::new(start.x, current.y + 1))
            }
            ShardOrientation::ColMajor if current.y < end.y => {
                Some(CoreCoord::new(current.x, current.y + 1))
            }
            ShardOrientation::ColMajor if current.x < end.x => {
                Some(CoreCoord::new(current.x + 1, start.y))
            }
            _ => None,
        };
        Some(current)
    }
}

/// Non-overlapping ranges, kept in construction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CoreRangeSet {
    ranges: Vec<CoreRange>,
}

impl CoreRangeSet {
    /// Build a set from ranges, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Overlap`] naming the first colliding pair.
    pub fn new(ranges: impl IntoIterator<Item = CoreRange>) -> Result<Self> {
        let mut kept: Vec<CoreRange> = Vec::new();
        for range in ranges {
            if let Some(first) = kept.iter().find(|r| r.intersects(&range)) {
                return Err(GridError::Overlap {
                    first: *first,
                    second: range,
                });
            }
            kept.push(range);
        }
        Ok(Self { ranges: kept })
    }

    /// One single-core range per core, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Overlap`] if a core is listed twice.
    pub fn from_cores(cores: &[CoreCoord]) -> Result<Self> {
        Self::new(cores.iter().copied().map(CoreRange::single))
    }

    /// The first `n` cores of a `grid` (width × height) packed into at most
    /// two rectangles: the full rows (or columns) plus the remainder.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::TooManyCores`] if `n` exceeds the grid.
    pub fn first_n_cores(n: usize, grid: CoreCoord, orientation: ShardOrientation) -> Result<Self> {
        let available = grid.x as usize * grid.y as usize;
        if n > available {
            return Err(GridError::TooManyCores {
                requested: n,
                available,
            });
        }
        if n == 0 {
            return Ok(Self::default());
        }

        // Line length along the fast axis.
        let line = match orientation {
            ShardOrientation::RowMajor => grid.x as usize,
            ShardOrientation::ColMajor => grid.y as usize,
        };
        let full = u32::try_from(n / line).unwrap_or(u32::MAX);
        let rem = u32::try_from(n % line).unwrap_or(u32::MAX);

        let mut ranges = Vec::with_capacity(2);
        match orientation {
            ShardOrientation::RowMajor => {
                if full > 0 {
                    ranges.push(CoreRange::new(
                        CoreCoord::new(0, 0),
                        CoreCoord::new(grid.x - 1, full - 1),
                    )?);
                }
                if rem > 0 {
                    ranges.push(CoreRange::new(
                        CoreCoord::new(0, full),
                        CoreCoord::new(rem - 1, full),
                    )?);
                }
            }
            ShardOrientation::ColMajor => {
                if full > 0 {
                    ranges.push(CoreRange::new(
                        CoreCoord::new(0, 0),
                        CoreCoord::new(full - 1, grid.y - 1),
                    )?);
                }
                if rem > 0 {
                    ranges.push(CoreRange::new(
                        CoreCoord::new(full, 0),
                        CoreCoord::new(full, rem - 1),
                    )?);
                }
            }
        }
        Self::new(ranges)
    }

    /// Ranges in construction order.
    pub fn ranges(&self) -> &[CoreRange] {
        &self.ranges
    }

    /// Whether the set holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether any range contains `core`.
    pub fn contains(&self, core: CoreCoord) -> bool {
        self.ranges.iter().any(|r| r.contains(core))
    }

    /// Total cores across all ranges.
    pub fn num_cores(&self) -> usize {
        self.ranges.iter().map(CoreRange::num_cores).sum()
    }

    /// Every core, range by range in construction order, walking each range
    /// in `orientation`.
    pub fn ordered_cores(&self, orientation: ShardOrientation) -> Vec<CoreCoord> {
        let mut cores = Vec::with_capacity(self.num_cores());
        for range in &self.ranges {
            cores.extend(range.cores(orientation));
        }
        cores
    }

    /// Smallest rectangle covering every range.
    pub fn bounding_box(&self) -> Option<CoreRange> {
        let first = self.ranges.first()?;
        let (mut start, mut end) = (first.start, first.end);
        for r in &self.ranges[1..] {
            start.x = start.x.min(r.start.x);
            start.y = start.y.min(r.start.y);
            end.x = end.x.max(r.end.x);
            end.y = end.y.max(r.end.y);
        }
        Some(CoreRange { start, end })
    }
}

impl fmt::Display for CoreRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, "}}")
    }
}

impl TryFrom<CoreRange> for CoreRangeSet {
    type Error = GridError;

    fn try_from(range: CoreRange) -> Result<Self> {
        Self::new([range])
    }
}
