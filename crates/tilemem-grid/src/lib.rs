//! Silicon geometry model for tiled AI accelerators.
//!
//! This crate has **no hardware access**. It is a pure model of the chip:
//! worker-core coordinates, rectangular core ranges, ordered range sets,
//! the architecture descriptors (grid size, DRAM channels, bank sizes) and
//! the logical → NOC coordinate tables.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`coord`] | `CoreCoord`, `ShardOrientation` |
//! | [`range`] | `CoreRange`, `CoreRangeSet` (no overlaps, construction order kept) |
//! | [`arch`] | `ArchSpec` presets, tile constants |
//! | [`noc`] | `NocCoord`, logical → physical translation tables |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod arch;
pub mod coord;
mod error;
pub mod noc;
pub mod range;

pub use arch::{Arch, ArchSpec, TILE_HEIGHT, TILE_HW, TILE_WIDTH};
pub use coord::{CoreCoord, ShardOrientation};
pub use error::{GridError, Result};
pub use noc::{NocCoord, NocMap};
pub use range::{CoreRange, CoreRangeSet};
