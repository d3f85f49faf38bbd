//! Reassembly of per-tile statistics into full-extent grids.
//!
//! Every [`AssimilationResult`] carries its own [`BlockSpec`], so tiles are placed by their
//! offsets and may arrive in any order. The [`MosaicAssembler`] checks each tile against the
//! [`BlockGrid`] it was produced from and refuses duplicates, which makes the final tile count
//! check sufficient for full coverage.

use crate::{
    assim::AssimilationResult,
    fXX,
    tiling::{BlockGrid, BlockSpec},
};
use log::debug;
use ndarray::{Array2, s};
use thiserror::Error;

/// Errors associated with mosaic reassembly.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("tile {spec:?} was placed twice")]
    DuplicateTile { spec: BlockSpec },
    #[error("expected {expected} tiles but found {found}")]
    TileCount { expected: usize, found: usize },
    #[error("tile {spec:?} holds arrays of shape {found:?}")]
    TileShape {
        spec: BlockSpec,
        found: (usize, usize),
    },
    #[error("tile {spec:?} is not part of the block grid")]
    UnexpectedTile { spec: BlockSpec },
}

/// Full-extent mean and standard deviation grids, shaped (rows, columns).
#[derive(Clone, Debug, PartialEq)]
pub struct Mosaic<T> {
    /// Mean yield.
    pub mean: Array2<T>,

    /// Standard deviation of the yield.
    pub std: Array2<T>,
}

/// Places [`AssimilationResult`] tiles into a [`Mosaic`].
#[derive(Clone, Debug)]
pub struct MosaicAssembler<T> {
    grid: BlockGrid,
    mosaic: Mosaic<T>,
    placed: Vec<bool>,
}

impl<T> MosaicAssembler<T>
where
    T: fXX,
{
    /// Returns the number of tiles placed so far.
    pub fn count(&self) -> usize {
        self.placed.iter().filter(|placed| **placed).count()
    }

    /// Consume the assembler and return the [`Mosaic`].
    ///
    /// Fails unless every block of the grid was placed exactly once.
    pub fn finish(self) -> Result<Mosaic<T>, MosaicError> {
        let found = self.count();

        if found != self.grid.len() {
            return Err(MosaicError::TileCount {
                expected: self.grid.len(),
                found,
            });
        }

        Ok(self.mosaic)
    }

    /// Create a new [`MosaicAssembler`] for a block grid, with all pixels initially missing.
    pub fn new(grid: BlockGrid) -> Self {
        let (width, height) = grid.extent();

        Self {
            grid,
            mosaic: Mosaic {
                mean: Array2::from_elem((height, width), T::nan()),
                std: Array2::from_elem((height, width), T::nan()),
            },
            placed: vec![false; grid.len()],
        }
    }

    /// Write a tile into the mosaic at its own offset.
    pub fn place(&mut self, result: &AssimilationResult<T>) -> Result<(), MosaicError> {
        let spec = result.spec;

        let index = self
            .grid
            .index_of(&spec)
            .ok_or(MosaicError::UnexpectedTile { spec })?;

        if result.mean.dim() != spec.shape() || result.std.dim() != spec.shape() {
            return Err(MosaicError::TileShape {
                spec,
                found: result.mean.dim(),
            });
        }

        if self.placed[index] {
            return Err(MosaicError::DuplicateTile { spec });
        }

        let window = s![
            spec.y_offset..(spec.y_offset + spec.valid_height),
            spec.x_offset..(spec.x_offset + spec.valid_width)
        ];

        self.mosaic.mean.slice_mut(window).assign(&result.mean);
        self.mosaic.std.slice_mut(window).assign(&result.std);

        self.placed[index] = true;

        debug!(
            "placed tile {} / {} at ({}, {})",
            self.count(),
            self.grid.len(),
            spec.x_offset,
            spec.y_offset
        );

        Ok(())
    }

    /// Reassemble a complete sequence of tiles, in any order.
    pub fn reassemble<I>(grid: BlockGrid, results: I) -> Result<Mosaic<T>, MosaicError>
    where
        I: IntoIterator<Item = AssimilationResult<T>>,
    {
        let mut assembler = Self::new(grid);

        for result in results {
            assembler.place(&result)?;
        }

        assembler.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, seq::SliceRandom};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn tile_results(grid: &BlockGrid) -> Vec<AssimilationResult<f64>> {
        let (width, _) = grid.extent();

        grid.specs()
            .map(|spec| AssimilationResult {
                spec,
                mean: Array2::from_shape_fn(spec.shape(), |(row, col)| {
                    ((spec.y_offset + row) * width + spec.x_offset + col) as f64
                }),
                std: Array2::from_elem(spec.shape(), spec.x_offset as f64),
            })
            .collect()
    }

    #[test]
    fn test_reassemble() {
        let grid = BlockGrid::new(10, 7, (4, 3));
        let results = tile_results(&grid);

        let mosaic = MosaicAssembler::reassemble(grid, results.clone()).unwrap();

        assert!(mosaic.mean.dim() == (7, 10));
        assert!(
            mosaic
                .mean
                .indexed_iter()
                .all(|((row, col), value)| *value == (row * 10 + col) as f64)
        );
        assert!(mosaic.std[[6, 9]] == 8.0);

        let mut shuffled = results;

        shuffled.shuffle(&mut Xoshiro256PlusPlus::seed_from_u64(7));

        assert!(MosaicAssembler::reassemble(grid, shuffled).unwrap() == mosaic);
    }

    #[test]
    fn test_reassemble_errors() {
        let grid = BlockGrid::new(10, 7, (4, 3));
        let mut results = tile_results(&grid);

        let last = results.pop().unwrap();

        assert!(matches!(
            MosaicAssembler::reassemble(grid, results.clone()),
            Err(MosaicError::TileCount {
                expected: 9,
                found: 8
            })
        ));

        results.push(last.clone());
        results.push(last.clone());

        assert!(matches!(
            MosaicAssembler::reassemble(grid, results.clone()),
            Err(MosaicError::DuplicateTile { .. })
        ));

        let mut assembler = MosaicAssembler::new(grid);

        let misshaped = AssimilationResult {
            spec: last.spec,
            mean: Array2::zeros((3, 4)),
            std: Array2::zeros((3, 4)),
        };

        assert!(matches!(
            assembler.place(&misshaped),
            Err(MosaicError::TileShape { found: (3, 4), .. })
        ));

        let foreign = AssimilationResult::<f64>::missing(BlockSpec {
            x_offset: 1,
            y_offset: 0,
            valid_width: 4,
            valid_height: 3,
        });

        assert!(matches!(
            assembler.place(&foreign),
            Err(MosaicError::UnexpectedTile { .. })
        ));

        assert!(assembler.count() == 0);
    }
}
