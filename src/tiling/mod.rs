//! Memory-bounded tiling of raster stacks.
//!
//! # Block Grid
//!
//! A [`BlockGrid`] splits a raster extent into rectangular blocks described by a [`BlockSpec`].
//! Interior blocks have the nominal block size, the last block column and the last block row
//! shrink to cover the remainder of the extent exactly. The blocks never overlap and leave no
//! gaps.
//!
//! Blocks are always enumerated column-major, i.e. the outer loop runs over the block column
//! index and the inner loop over the block row index. Mosaic reassembly relies on this order.
//!
//! # Raster Stacks
//!
//! A [`RasterStack`] holds N sources with identical geometry. Its [`TileIterator`] lazily reads
//! the same window from every source and yields one [`Tile`] at a time, so that only a single
//! block per source is ever held in memory.

mod stack;

pub use stack::{RasterStack, RasterStackConfig, Tile, TileIterator};

use crate::raster::RasterError;
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use thiserror::Error;

/// The block size that is used if the native storage block size of a source is degenerate.
pub const DEFAULT_BLOCK_SIZE: (usize, usize) = (256, 256);

/// Errors associated with tiling raster stacks.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum TilingError {
    #[error("raster stack contains no sources")]
    EmptyStack,
    #[error("source {source_index} disagrees on {property}: expected {expected}, found {found}")]
    GeometryMismatch {
        source_index: usize,
        property: &'static str,
        expected: String,
        found: String,
    },
    #[error("band {band} is not available in source {source_index} ({band_count} bands)")]
    InvalidBand {
        source_index: usize,
        band: usize,
        band_count: usize,
    },
    #[error("array {array_index} of tile {spec:?} has shape {shape:?}, expected a single band")]
    MixedBandShape {
        array_index: usize,
        spec: BlockSpec,
        shape: Vec<usize>,
    },
    #[error("no bands were requested")]
    NoBands,
    #[error("failed to read block {spec:?} from source {source_index}")]
    Read {
        source_index: usize,
        spec: BlockSpec,
        source: RasterError,
    },
    #[error("source {source_index} cannot be decoded")]
    UnsupportedSource {
        source_index: usize,
        source: RasterError,
    },
}

/// The pixel window covered by a single block.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct BlockSpec {
    /// Column offset of the upper left pixel.
    pub x_offset: usize,

    /// Row offset of the upper left pixel.
    pub y_offset: usize,

    /// Number of columns within the block.
    pub valid_width: usize,

    /// Number of rows within the block.
    pub valid_height: usize,
}

impl BlockSpec {
    /// Returns the number of pixels within the block.
    pub fn area(&self) -> usize {
        self.valid_width * self.valid_height
    }

    /// Returns the (rows, columns) array shape of the block.
    pub fn shape(&self) -> (usize, usize) {
        (self.valid_height, self.valid_width)
    }
}

/// The partition of a raster extent into blocks of a nominal size.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockGrid {
    block_height: usize,
    block_width: usize,
    height: usize,
    width: usize,
}

impl BlockGrid {
    /// Returns the nominal block size (width, height).
    pub fn block_size(&self) -> (usize, usize) {
        (self.block_width, self.block_height)
    }

    /// Derive the nominal block size from the native storage block size of a source.
    ///
    /// The nominal block size is twice the storage block size, or [`DEFAULT_BLOCK_SIZE`] if the
    /// storage block size is degenerate (empty or a single pixel).
    pub fn derive_block_size(native: (usize, usize)) -> (usize, usize) {
        match native {
            (0, _) | (_, 0) | (1, 1) => DEFAULT_BLOCK_SIZE,
            (width, height) => (2 * width, 2 * height),
        }
    }

    /// Returns the raster extent (width, height).
    pub fn extent(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns the linear column-major index of a block, if it is part of the grid.
    ///
    /// The block must match the grid exactly, including its valid size.
    pub fn index_of(&self, spec: &BlockSpec) -> Option<usize> {
        if spec.x_offset % self.block_width != 0 || spec.y_offset % self.block_height != 0 {
            return None;
        }

        let bx = spec.x_offset / self.block_width;
        let by = spec.y_offset / self.block_height;

        match self.spec(bx, by) {
            Some(expected) if expected == *spec => Some(bx * self.ny_blocks() + by),
            _ => None,
        }
    }

    /// Returns `true` if the grid contains no blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total number of blocks.
    pub fn len(&self) -> usize {
        self.nx_blocks() * self.ny_blocks()
    }

    /// Create a new [`BlockGrid`].
    ///
    /// Zero block dimensions are raised to one.
    pub fn new(width: usize, height: usize, block_size: (usize, usize)) -> Self {
        Self {
            block_height: block_size.1.max(1),
            block_width: block_size.0.max(1),
            height,
            width,
        }
    }

    /// Returns the number of block columns.
    pub fn nx_blocks(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    /// Returns the number of block rows.
    pub fn ny_blocks(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Returns the block at block column `bx` and block row `by`.
    pub fn spec(&self, bx: usize, by: usize) -> Option<BlockSpec> {
        if bx >= self.nx_blocks() || by >= self.ny_blocks() {
            return None;
        }

        let x_offset = bx * self.block_width;
        let y_offset = by * self.block_height;

        // The last column / row shrinks to the remainder.
        let valid_width = if bx == self.nx_blocks() - 1 {
            self.width - x_offset
        } else {
            self.block_width
        };

        let valid_height = if by == self.ny_blocks() - 1 {
            self.height - y_offset
        } else {
            self.block_height
        };

        Some(BlockSpec {
            x_offset,
            y_offset,
            valid_width,
            valid_height,
        })
    }

    /// Returns a column-major iterator over all blocks.
    pub fn specs(&self) -> BlockSpecIter {
        BlockSpecIter {
            grid: *self,
            index: 0,
        }
    }
}

/// A column-major iterator over the blocks of a [`BlockGrid`].
#[derive(Clone, Debug)]
pub struct BlockSpecIter {
    grid: BlockGrid,
    index: usize,
}

impl Iterator for BlockSpecIter {
    type Item = BlockSpec;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.grid.len() {
            return None;
        }

        let ny_blocks = self.grid.ny_blocks();
        let spec = self
            .grid
            .spec(self.index / ny_blocks, self.index % ny_blocks);

        self.index += 1;

        spec
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.index);

        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BlockSpecIter {}

impl FusedIterator for BlockSpecIter {}
