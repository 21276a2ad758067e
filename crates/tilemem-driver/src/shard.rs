//! Shard specifications
//!
//! A sharded tensor is viewed as a `H × W` grid of pages (row-major host
//! order). The grid is cut into shards of `sh × sw` pages; shard `i` lives
//! on the `i`-th core of the core set, walked in the shard orientation.
//!
//! ```text
//! tensor 3 × 5 pages, shard 2 × 2 pages -> 2 × 3 shards
//!
//!   c: 0 1 | 2 3 | 4 .
//! r 0  s0    s1    s2
//!   1  s0    s1    s2
//!   ---------------------
//!   2  s3    s4    s5      (edge shards padded to 2 × 2)
//! ```
//!
//! Edge shards that hang past the tensor still reserve the full
//! `sh * sw` pages so every shard has the same footprint in its bank.

use crate::error::{MemError, Result};
use tilemem_grid::{CoreCoord, CoreRangeSet, ShardOrientation};

/// Core placement and shard shape (in elements)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    /// Cores holding the shards
    pub grid: CoreRangeSet,
    /// Shard `[height, width]` in elements
    pub shape: [u32; 2],
    /// Order in which shards are assigned to cores
    pub orientation: ShardOrientation,
    /// Whether shards carry halo rows for sliding-window ops
    ///
    /// Descriptive only: carried for kernels that read neighbouring rows,
    /// it does not change placement, footprint or page mapping.
    pub halo: bool,
}

impl ShardSpec {
    /// Shard spec without halo
    pub const fn new(grid: CoreRangeSet, shape: [u32; 2], orientation: ShardOrientation) -> Self {
        Self {
            grid,
            shape,
            orientation,
            halo: false,
        }
    }

    /// Set the halo flag
    #[must_use]
    pub const fn with_halo(mut self, halo: bool) -> Self {
        self.halo = halo;
        self
    }

    /// Number of cores in the grid
    pub fn num_cores(&self) -> usize {
        self.grid.num_cores()
    }
}

/// Where a page sits inside the sharded layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardLocation {
    /// Shard index
    pub shard: u64,
    /// Page slot within the shard
    pub offset: u64,
}

/// Shard spec bound to a page shape and a tensor shape
///
/// Validated once at construction; every query afterwards is infallible
/// except for out-of-range indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpecBuffer {
    spec: ShardSpec,
    page_shape: [u32; 2],
    tensor_pages: [u32; 2],
    cores: Vec<CoreCoord>,
}

impl ShardSpecBuffer {
    /// Bind `spec` to a page shape (elements) and a tensor shape (pages)
    ///
    /// # Errors
    ///
    /// Returns a config error if the page or shard shape has a zero
    /// dimension, the shard shape is not a whole number of pages, or there
    /// are more shards than cores.
    pub fn new(spec: ShardSpec, page_shape: [u32; 2], tensor_shape_in_pages: [u32; 2]) -> Result<Self> {
        if page_shape.contains(&0) {
            return Err(MemError::config(format!(
                "page shape {page_shape:?} has a zero dimension"
            )));
        }
        if spec.shape.contains(&0) {
            return Err(MemError::config(format!(
                "shard shape {:?} has a zero dimension",
                spec.shape
            )));
        }
        if spec.shape[0] % page_shape[0] != 0 || spec.shape[1] % page_shape[1] != 0 {
            return Err(MemError::config(format!(
                "shard shape {:?} is not a multiple of page shape {page_shape:?}",
                spec.shape
            )));
        }

        let cores = spec.grid.ordered_cores(spec.orientation);
        let buffer = Self {
            spec,
            page_shape,
            tensor_pages: tensor_shape_in_pages,
            cores,
        };
        let shards = buffer.num_shards();
        if shards > buffer.cores.len() as u64 {
            return Err(MemError::config(format!(
                "{shards} shards do not fit on {} cores",
                buffer.cores.len()
            )));
        }
        Ok(buffer)
    }

    /// Underlying shard spec
    pub const fn spec(&self) -> &ShardSpec {
        &self.spec
    }

    /// Core set holding the shards
    pub const fn grid(&self) -> &CoreRangeSet {
        &self.spec.grid
    }

    /// Shard orientation
    pub const fn orientation(&self) -> ShardOrientation {
        self.spec.orientation
    }

    /// Page `[height, width]` in elements
    pub const fn page_shape(&self) -> [u32; 2] {
        self.page_shape
    }

    /// Tensor `[height, width]` in pages
    pub const fn tensor_shape_in_pages(&self) -> [u32; 2] {
        self.tensor_pages
    }

    /// Shard `[height, width]` in pages
    pub const fn shape_in_pages(&self) -> [u32; 2] {
        [
            self.spec.shape[0] / self.page_shape[0],
            self.spec.shape[1] / self.page_shape[1],
        ]
    }

    /// Shards along `[height, width]`
    pub const fn shard_grid(&self) -> [u32; 2] {
        let [sh, sw] = self.shape_in_pages();
        [self.tensor_pages[0].div_ceil(sh), self.tensor_pages[1].div_ceil(sw)]
    }

    /// Total shards
    pub const fn num_shards(&self) -> u64 {
        let [h, w] = self.shard_grid();
        h as u64 * w as u64
    }

    /// Page slots per shard, padding included
    pub const fn num_pages_per_shard(&self) -> u64 {
        let [sh, sw] = self.shape_in_pages();
        sh as u64 * sw as u64
    }

    /// Pages in the tensor
    pub const fn num_pages(&self) -> u64 {
        self.tensor_pages[0] as u64 * self.tensor_pages[1] as u64
    }

    /// Cores in shard order
    pub fn ordered_cores(&self) -> &[CoreCoord] {
        &self.cores
    }

    /// Cores that actually hold a shard, in shard order
    pub fn shard_cores(&self) -> &[CoreCoord] {
        // num_shards <= cores.len() holds from construction
        let n = usize::try_from(self.num_shards()).unwrap_or(self.cores.len());
        &self.cores[..n.min(self.cores.len())]
    }

    /// Core holding shard `shard`
    ///
    /// # Errors
    ///
    /// Returns a bounds error if `shard >= num_shards()`.
    pub fn core_for_shard(&self, shard: u64) -> Result<CoreCoord> {
        if shard >= self.num_shards() {
            return Err(MemError::bounds(format!(
                "shard {shard} out of range ({} shards)",
                self.num_shards()
            )));
        }
        usize::try_from(shard)
            .ok()
            .and_then(|i| self.cores.get(i).copied())
            .ok_or_else(|| MemError::bounds(format!("shard {shard} has no core")))
    }

    /// Shard and slot of host page `page`
    ///
    /// # Errors
    ///
    /// Returns a bounds error if `page >= num_pages()`.
    pub fn shard_for_page(&self, page: u64) -> Result<ShardLocation> {
        if page >= self.num_pages() {
            return Err(MemError::bounds(format!(
                "page {page} out of range ({} pages)",
                self.num_pages()
            )));
        }
        let width = u64::from(self.tensor_pages[1]);
        let [sh, sw] = self.shape_in_pages().map(u64::from);
        let shards_w = u64::from(self.shard_grid()[1]);
        let (r, c) = (page / width, page % width);
        Ok(ShardLocation {
            shard: (r / sh) * shards_w + c / sw,
            offset: (r % sh) * sw + c % sw,
        })
    }

    /// Host pages stored in `shard`, by slot; `None` marks padding
    ///
    /// # Errors
    ///
    /// Returns a bounds error if `shard >= num_shards()`.
    pub fn pages_in_shard(&self, shard: u64) -> Result<Vec<Option<u64>>> {
        if shard >= self.num_shards() {
            return Err(MemError::bounds(format!(
                "shard {shard} out of range ({} shards)",
                self.num_shards()
            )));
        }
        let [h, w] = self.tensor_pages.map(u64::from);
        let [sh, sw] = self.shape_in_pages().map(u64::from);
        let shards_w = u64::from(self.shard_grid()[1]);
        let (row0, col0) = ((shard / shards_w) * sh, (shard % shards_w) * sw);

        let mut pages = Vec::new();
        for r in row0..row0 + sh {
            for c in col0..col0 + sw {
                pages.push((r < h && c < w).then(|| r * w + c));
            }
        }
        Ok(pages)
    }
}
