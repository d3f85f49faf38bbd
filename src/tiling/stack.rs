use crate::{
    fXX,
    raster::{BlockArray, ElementType, GeoTransform, RasterSource},
    tiling::{BlockGrid, BlockSpec, BlockSpecIter, TilingError},
};
use log::{debug, info};
use ndarray::{Array3, Ix2, s};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// Geometry and georeferencing shared by all sources of a [`RasterStack`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RasterStackConfig {
    /// Raster width in pixels.
    pub width: usize,

    /// Raster height in pixels.
    pub height: usize,

    /// Number of bands of the first source.
    pub band_count: usize,

    /// Affine geo transform of the first source.
    pub geo_transform: GeoTransform,

    /// Spatial reference string of the first source.
    pub projection: String,
}

/// A stack of co-registered raster sources with identical geometry.
#[derive(Debug)]
pub struct RasterStack<S> {
    bands: Vec<usize>,
    config: RasterStackConfig,
    element_types: Vec<ElementType>,
    grid: BlockGrid,
    sources: Vec<S>,
}

impl<S> RasterStack<S>
where
    S: RasterSource,
{
    /// Returns the zero-based band indices that are read from every source.
    pub fn bands(&self) -> &[usize] {
        &self.bands
    }

    /// Returns the shared geometry and georeferencing.
    pub fn config(&self) -> &RasterStackConfig {
        &self.config
    }

    /// Returns the decoded element type of each source.
    pub fn element_types(&self) -> &[ElementType] {
        &self.element_types
    }

    /// Returns the block grid the stack is tiled with.
    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    /// Returns `true` if the stack holds no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns the number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Open a new [`RasterStack`].
    ///
    /// All sources must agree with the first source on width, height, band count, every geo
    /// transform coefficient and projection. If no band list is given all bands are read. The
    /// nominal block size is derived from the native storage block size of the first source
    /// unless `opt_block_size` is given.
    pub fn open(
        sources: Vec<S>,
        opt_bands: Option<Vec<usize>>,
        opt_block_size: Option<(usize, usize)>,
    ) -> Result<Self, TilingError> {
        let first = sources.first().ok_or(TilingError::EmptyStack)?;

        let config = RasterStackConfig {
            width: first.width(),
            height: first.height(),
            band_count: first.band_count(),
            geo_transform: first.geo_transform(),
            projection: first.projection().to_string(),
        };

        let geo_transform = config.geo_transform;

        for (idx, source) in sources.iter().enumerate().skip(1) {
            let other = source.geo_transform();

            let mismatch = if source.width() != config.width {
                Some(("width", config.width.to_string(), source.width().to_string()))
            } else if source.height() != config.height {
                Some((
                    "height",
                    config.height.to_string(),
                    source.height().to_string(),
                ))
            } else if source.band_count() != config.band_count {
                Some((
                    "band count",
                    config.band_count.to_string(),
                    source.band_count().to_string(),
                ))
            } else if other.pixel_size() != geo_transform.pixel_size() {
                Some((
                    "pixel size",
                    format!("{:?}", geo_transform.pixel_size()),
                    format!("{:?}", other.pixel_size()),
                ))
            } else if other.origin() != geo_transform.origin() {
                Some((
                    "origin",
                    format!("{:?}", geo_transform.origin()),
                    format!("{:?}", other.origin()),
                ))
            } else if other.rotation() != geo_transform.rotation() {
                Some((
                    "rotation",
                    format!("{:?}", geo_transform.rotation()),
                    format!("{:?}", other.rotation()),
                ))
            } else if source.projection() != config.projection {
                Some((
                    "projection",
                    config.projection.clone(),
                    source.projection().to_string(),
                ))
            } else {
                None
            };

            if let Some((property, expected, found)) = mismatch {
                return Err(TilingError::GeometryMismatch {
                    source_index: idx,
                    property,
                    expected,
                    found,
                });
            }
        }

        let bands = opt_bands.unwrap_or_else(|| (0..config.band_count).collect());

        if bands.is_empty() {
            return Err(TilingError::NoBands);
        }

        for (idx, source) in sources.iter().enumerate() {
            if let Some(band) = bands.iter().find(|band| **band >= source.band_count()) {
                return Err(TilingError::InvalidBand {
                    source_index: idx,
                    band: *band,
                    band_count: source.band_count(),
                });
            }
        }

        let element_types = sources
            .iter()
            .enumerate()
            .map(|(idx, source)| {
                source
                    .data_type()
                    .parse::<ElementType>()
                    .map_err(|err| TilingError::UnsupportedSource {
                        source_index: idx,
                        source: err,
                    })
            })
            .collect::<Result<Vec<ElementType>, TilingError>>()?;

        let block_size =
            opt_block_size.unwrap_or_else(|| BlockGrid::derive_block_size(first.block_size()));

        info!("block size is ({}, {})", block_size.0, block_size.1);

        let grid = BlockGrid::new(config.width, config.height, block_size);

        Ok(Self {
            bands,
            config,
            element_types,
            grid,
            sources,
        })
    }

    /// Read the block `spec` from every source.
    pub fn read_tile(&self, spec: &BlockSpec) -> Result<Tile, TilingError> {
        let shape = [self.bands.len(), spec.valid_height, spec.valid_width];

        let data = self
            .sources
            .iter()
            .zip(&self.element_types)
            .enumerate()
            .map(|(idx, (source, etype))| {
                let buffer = source.read_window(spec, &self.bands).map_err(|err| {
                    TilingError::Read {
                        source_index: idx,
                        spec: *spec,
                        source: err,
                    }
                })?;

                let array = etype
                    .decode(&buffer, &shape)
                    .map_err(|err| TilingError::Read {
                        source_index: idx,
                        spec: *spec,
                        source: err,
                    })?;

                Ok(match self.bands.len() {
                    1 => array.squeeze_band(),
                    _ => array,
                })
            })
            .collect::<Result<Vec<BlockArray>, TilingError>>()?;

        Ok(Tile { spec: *spec, data })
    }

    /// Returns a lazy iterator over all tiles in column-major block order.
    ///
    /// Each call starts a fresh pass over the raster extent.
    pub fn tiles(&self) -> TileIterator<'_, S> {
        TileIterator {
            counter: 0,
            failed: false,
            specs: self.grid.specs(),
            stack: self,
        }
    }
}

/// The same block read from every source of a [`RasterStack`].
#[derive(Clone, Debug)]
pub struct Tile {
    /// The pixel window of the tile.
    pub spec: BlockSpec,

    /// One array per source, shaped (rows, columns), or (bands, rows, columns) if more than one
    /// band was requested.
    pub data: Vec<BlockArray>,
}

impl Tile {
    /// Returns `true` if the tile holds no arrays.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of arrays (sources).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Stack single band arrays into a (sources, rows, columns) floating point array.
    pub fn stack_single_band<T>(&self) -> Result<Array3<T>, TilingError>
    where
        T: fXX,
    {
        let (rows, cols) = self.spec.shape();

        let mut stacked = Array3::<T>::from_elem((self.data.len(), rows, cols), T::nan());

        for (idx, array) in self.data.iter().enumerate() {
            if array.shape() != [rows, cols] {
                return Err(TilingError::MixedBandShape {
                    array_index: idx,
                    spec: self.spec,
                    shape: array.shape().to_vec(),
                });
            }

            let values = array
                .to_float::<T>()
                .into_dimensionality::<Ix2>()
                .map_err(|_| TilingError::MixedBandShape {
                    array_index: idx,
                    spec: self.spec,
                    shape: array.shape().to_vec(),
                })?;

            stacked.slice_mut(s![idx, .., ..]).assign(&values);
        }

        Ok(stacked)
    }
}

/// A lazy iterator over the tiles of a [`RasterStack`].
///
/// The iterator yields `Err` once if a block read fails and terminates afterwards.
pub struct TileIterator<'a, S> {
    counter: usize,
    failed: bool,
    specs: BlockSpecIter,
    stack: &'a RasterStack<S>,
}

impl<S> Iterator for TileIterator<'_, S>
where
    S: RasterSource,
{
    type Item = Result<Tile, TilingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let spec = self.specs.next()?;

        self.counter += 1;

        debug!(
            "tile #{} at ({}, {}) size {} x {}",
            self.counter, spec.x_offset, spec.y_offset, spec.valid_width, spec.valid_height
        );

        let result = self.stack.read_tile(&spec);

        if result.is_err() {
            self.failed = true;
        }

        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.failed {
            true => (0, Some(0)),
            false => (0, self.specs.size_hint().1),
        }
    }
}

impl<S> FusedIterator for TileIterator<'_, S> where S: RasterSource {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{MemoryRaster, RasterError};

    fn lai_source(width: usize, height: usize, offset: f32) -> MemoryRaster<f32> {
        MemoryRaster::from_fn(width, height, |row, col| {
            offset + (row * width + col) as f32
        })
        .with_block_size((2, 2))
    }

    #[test]
    fn test_stack_tiles() {
        let sources = (0..3)
            .map(|idx| lai_source(10, 10, idx as f32 * 1000.0))
            .collect::<Vec<MemoryRaster<f32>>>();

        let stack = RasterStack::open(sources, None, None).unwrap();

        assert!(stack.grid().block_size() == (4, 4));
        assert!(stack.bands() == [0]);

        let tiles = stack.tiles().collect::<Result<Vec<Tile>, TilingError>>().unwrap();

        assert!(tiles.len() == 9);

        for tile in tiles.iter() {
            assert!(tile.len() == 3);

            for array in tile.data.iter() {
                assert!(array.shape() == [tile.spec.valid_height, tile.spec.valid_width]);
            }
        }

        // Tile (x=4, y=8) holds rows 8..10 and columns 4..8.
        let tile = &tiles[5];

        assert!((tile.spec.x_offset, tile.spec.y_offset) == (4, 8));

        let stacked = tile.stack_single_band::<f64>().unwrap();

        assert!(stacked.dim() == (3, 2, 4));
        assert!(stacked[[0, 0, 0]] == 84.0);
        assert!(stacked[[2, 1, 3]] == 2000.0 + 97.0);

        // The iterator is restartable per invocation.
        assert!(stack.tiles().count() == 9);
    }

    #[test]
    fn test_stack_multi_band() {
        let source = || {
            MemoryRaster::from_values(5, 3, 2, (0..30).map(|v| v as u8).collect())
                .unwrap()
                .with_block_size((2, 2))
        };

        let stack = RasterStack::open(vec![source(), source()], None, None).unwrap();
        let tile = stack.tiles().next().unwrap().unwrap();

        assert!(tile.len() == 2);
        assert!(tile.data[0].shape() == [2, 3, 4]);
        assert!(matches!(
            tile.stack_single_band::<f32>(),
            Err(TilingError::MixedBandShape { .. })
        ));

        let stack = RasterStack::open(vec![source()], Some(vec![1]), Some((5, 3))).unwrap();
        let tiles = stack.tiles().collect::<Vec<_>>();

        assert!(tiles.len() == 1);

        let tile = tiles[0].as_ref().unwrap();

        assert!(tile.data[0].shape() == [3, 5]);
        assert!(tile.stack_single_band::<f32>().unwrap()[[0, 0, 0]] == 15.0);

        assert!(matches!(
            RasterStack::open(vec![source()], Some(vec![2]), None),
            Err(TilingError::InvalidBand { band: 2, .. })
        ));

        assert!(matches!(
            RasterStack::open(vec![source()], Some(vec![]), None),
            Err(TilingError::NoBands)
        ));
    }

    #[test]
    fn test_stack_geometry_mismatch() {
        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), lai_source(10, 9, 0.0)], None, None),
            Err(TilingError::GeometryMismatch {
                source_index: 1,
                property: "height",
                ..
            })
        ));

        let coarse = lai_source(10, 10, 0.0)
            .with_geo_transform(GeoTransform([0.0, 20.0, 0.0, 0.0, 0.0, -20.0]));

        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), coarse], None, None),
            Err(TilingError::GeometryMismatch {
                property: "pixel size",
                ..
            })
        ));

        let shifted = lai_source(10, 10, 0.0)
            .with_geo_transform(GeoTransform([5000.0, 1.0, 0.0, 9000.0, 0.0, -1.0]));

        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), shifted], None, None),
            Err(TilingError::GeometryMismatch {
                property: "origin",
                ..
            })
        ));

        let rotated = lai_source(10, 10, 0.0)
            .with_geo_transform(GeoTransform([0.0, 1.0, 0.1, 0.0, 0.0, -1.0]));

        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), rotated], None, None),
            Err(TilingError::GeometryMismatch {
                property: "rotation",
                ..
            })
        ));

        let reprojected = lai_source(10, 10, 0.0).with_projection("EPSG:4326");

        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), reprojected], None, None),
            Err(TilingError::GeometryMismatch {
                source_index: 1,
                property: "projection",
                ..
            })
        ));

        let three_bands = MemoryRaster::from_values(10, 10, 3, vec![0.0_f32; 300])
            .unwrap()
            .with_block_size((2, 2));

        assert!(matches!(
            RasterStack::open(vec![lai_source(10, 10, 0.0), three_bands], None, None),
            Err(TilingError::GeometryMismatch {
                property: "band count",
                ..
            })
        ));

        assert!(matches!(
            RasterStack::<MemoryRaster<f32>>::open(vec![], None, None),
            Err(TilingError::EmptyStack)
        ));

        let complex = lai_source(10, 10, 0.0).with_data_type("CFloat32");

        assert!(matches!(
            RasterStack::open(vec![complex], None, None),
            Err(TilingError::UnsupportedSource {
                source_index: 0,
                source: RasterError::UnsupportedDataType(_)
            })
        ));
    }

    struct FailingSource {
        inner: MemoryRaster<f32>,
        fail_at: BlockSpec,
    }

    impl RasterSource for FailingSource {
        fn band_count(&self) -> usize {
            self.inner.band_count()
        }

        fn block_size(&self) -> (usize, usize) {
            self.inner.block_size()
        }

        fn data_type(&self) -> &str {
            self.inner.data_type()
        }

        fn geo_transform(&self) -> GeoTransform {
            self.inner.geo_transform()
        }

        fn height(&self) -> usize {
            self.inner.height()
        }

        fn projection(&self) -> &str {
            self.inner.projection()
        }

        fn read_window(
            &self,
            window: &BlockSpec,
            bands: &[usize],
        ) -> Result<Vec<u8>, RasterError> {
            if *window == self.fail_at {
                return Err(RasterError::Io(std::io::Error::other("disk on fire")));
            }

            self.inner.read_window(window, bands)
        }

        fn width(&self) -> usize {
            self.inner.width()
        }
    }

    #[test]
    fn test_stack_read_error() {
        let fail_at = BlockSpec {
            x_offset: 0,
            y_offset: 4,
            valid_width: 4,
            valid_height: 4,
        };

        let sources = vec![
            FailingSource {
                inner: lai_source(10, 10, 0.0),
                fail_at: BlockSpec::default(),
            },
            FailingSource {
                inner: lai_source(10, 10, 0.0),
                fail_at,
            },
        ];

        let stack = RasterStack::open(sources, None, None).unwrap();
        let results = stack.tiles().collect::<Vec<Result<Tile, TilingError>>>();

        // The first tile is fine, the second fails and aborts the iteration.
        assert!(results.len() == 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            &results[1],
            Err(TilingError::Read { source_index: 1, spec, .. }) if *spec == fail_at
        ));
    }
}
