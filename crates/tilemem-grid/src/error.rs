//! Error types for grid geometry

use crate::coord::CoreCoord;
use crate::range::CoreRange;
use thiserror::Error;

/// Result type alias for grid operations
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors raised while building core ranges and range sets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Range corners are not ordered (`start` must be <= `end` on both axes)
    #[error("Invalid core range: start {start} is not <= end {end}")]
    InvalidRange {
        /// Requested start corner
        start: CoreCoord,
        /// Requested end corner
        end: CoreCoord,
    },

    /// Two ranges of a set share at least one core
    #[error("Core ranges {first} and {second} overlap")]
    Overlap {
        /// Range already in the set
        first: CoreRange,
        /// Range that collided with it
        second: CoreRange,
    },

    /// More cores requested than the grid holds
    #[error("Requested {requested} cores but the grid only has {available}")]
    TooManyCores {
        /// Cores requested
        requested: usize,
        /// Cores on the grid
        available: usize,
    },

    /// Architecture name not recognised
    #[error("Unknown architecture: {name}")]
    UnknownArch {
        /// Name that failed to parse
        name: String,
    },

    /// Architecture descriptor is inconsistent
    #[error("Invalid architecture descriptor: {reason}")]
    InvalidArch {
        /// What is wrong
        reason: String,
    },

    /// DRAM channel index past the last channel
    #[error("DRAM channel {channel} does not exist ({channels} channels)")]
    NoDramChannel {
        /// Requested channel
        channel: u32,
        /// Channels on the chip
        channels: u32,
    },

    /// Core lies outside the logical grid
    #[error("Core {core} is outside the {grid_x}x{grid_y} grid")]
    OutOfGrid {
        /// Offending core
        core: CoreCoord,
        /// Grid width
        grid_x: u32,
        /// Grid height
        grid_y: u32,
    },
}
