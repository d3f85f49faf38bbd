use crate::{
    raster::{ElementType, GeoTransform, RasterError, RasterSource},
    tiling::BlockSpec,
};
use log::debug;

/// A primitive type that can be stored in a [`MemoryRaster`].
pub trait Pixel: Copy + Send + Sync {
    /// The element type the pixel type maps onto.
    const ELEMENT_TYPE: ElementType;

    /// Append the native endian bytes of the value.
    fn extend_ne_bytes(&self, buffer: &mut Vec<u8>);
}

macro_rules! impl_pixel {
    ($type: ty, $variant: ident) => {
        impl Pixel for $type {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn extend_ne_bytes(&self, buffer: &mut Vec<u8>) {
                buffer.extend_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_pixel!(u8, U8);
impl_pixel!(u16, U16);
impl_pixel!(i16, I16);
impl_pixel!(u32, U32);
impl_pixel!(i32, I32);
impl_pixel!(f32, F32);
impl_pixel!(f64, F64);

/// A raster source that is held entirely in memory.
///
/// Pixel values are stored band-sequential, i.e. ordered as (band, row, column).
#[derive(Clone, Debug)]
pub struct MemoryRaster<P> {
    band_count: usize,
    block_size: (usize, usize),
    data_type: String,
    geo_transform: GeoTransform,
    height: usize,
    projection: String,
    values: Vec<P>,
    width: usize,
}

impl<P> MemoryRaster<P>
where
    P: Pixel,
{
    /// Create a new [`MemoryRaster`] from band-sequential pixel values.
    ///
    /// Returns `None` if the number of values does not match the given geometry.
    pub fn from_values(
        width: usize,
        height: usize,
        band_count: usize,
        values: Vec<P>,
    ) -> Option<Self> {
        if values.len() != width * height * band_count {
            return None;
        }

        Some(Self {
            band_count,
            block_size: (width, 1),
            data_type: P::ELEMENT_TYPE.to_string(),
            geo_transform: GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
            height,
            projection: String::new(),
            values,
            width,
        })
    }

    /// Create a new single band [`MemoryRaster`] filled by a function of (row, column).
    pub fn from_fn<F>(width: usize, height: usize, func: F) -> Self
    where
        F: Fn(usize, usize) -> P,
    {
        let values = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| func(row, col))
            .collect::<Vec<P>>();

        Self {
            band_count: 1,
            block_size: (width, 1),
            data_type: P::ELEMENT_TYPE.to_string(),
            geo_transform: GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
            height,
            projection: String::new(),
            values,
            width,
        }
    }

    /// Set the native storage block size.
    pub fn with_block_size(mut self, block_size: (usize, usize)) -> Self {
        self.block_size = block_size;
        self
    }

    /// Override the declared data type name.
    pub fn with_data_type(mut self, data_type: &str) -> Self {
        self.data_type = data_type.to_string();
        self
    }

    /// Set the geo transform coefficients.
    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = geo_transform;
        self
    }

    /// Set the spatial reference string.
    pub fn with_projection(mut self, projection: &str) -> Self {
        self.projection = projection.to_string();
        self
    }
}

impl<P> RasterSource for MemoryRaster<P>
where
    P: Pixel,
{
    fn band_count(&self) -> usize {
        self.band_count
    }

    fn block_size(&self) -> (usize, usize) {
        self.block_size
    }

    fn data_type(&self) -> &str {
        &self.data_type
    }

    fn geo_transform(&self) -> GeoTransform {
        self.geo_transform
    }

    fn height(&self) -> usize {
        self.height
    }

    fn projection(&self) -> &str {
        &self.projection
    }

    fn read_window(&self, window: &BlockSpec, bands: &[usize]) -> Result<Vec<u8>, RasterError> {
        if window.x_offset + window.valid_width > self.width
            || window.y_offset + window.valid_height > self.height
        {
            return Err(RasterError::WindowOutOfRange {
                window: *window,
                width: self.width,
                height: self.height,
            });
        }

        let mut buffer = Vec::with_capacity(
            bands.len() * window.area() * std::mem::size_of::<P>(),
        );

        for band in bands {
            if *band >= self.band_count {
                return Err(RasterError::BandOutOfRange {
                    band: *band,
                    band_count: self.band_count,
                });
            }

            let band_offset = band * self.width * self.height;

            for row in window.y_offset..(window.y_offset + window.valid_height) {
                let start = band_offset + row * self.width + window.x_offset;

                self.values[start..(start + window.valid_width)]
                    .iter()
                    .for_each(|value| value.extend_ne_bytes(&mut buffer));
            }
        }

        debug!(
            "memory raster read {}x{} at ({}, {}) for {} band(s)",
            window.valid_width,
            window.valid_height,
            window.x_offset,
            window.y_offset,
            bands.len()
        );

        Ok(buffer)
    }

    fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_raster() {
        let raster = MemoryRaster::from_values(3, 2, 2, (0..12).map(|v| v as u16).collect())
            .unwrap()
            .with_block_size((3, 1));

        assert!(raster.data_type() == "UInt16");

        let window = BlockSpec {
            x_offset: 1,
            y_offset: 0,
            valid_width: 2,
            valid_height: 2,
        };

        let block = ElementType::U16
            .decode(&raster.read_window(&window, &[1]).unwrap(), &[1, 2, 2])
            .unwrap()
            .squeeze_band()
            .to_float::<f32>();

        assert!(block[[0, 0]] == 7.0);
        assert!(block[[1, 1]] == 11.0);

        let outside = BlockSpec {
            x_offset: 2,
            ..window
        };

        assert!(matches!(
            raster.read_window(&outside, &[0]),
            Err(RasterError::WindowOutOfRange { .. })
        ));

        assert!(matches!(
            raster.read_window(&window, &[2]),
            Err(RasterError::BandOutOfRange { band: 2, .. })
        ));

        assert!(MemoryRaster::from_values(3, 2, 2, vec![0.0_f32; 11]).is_none());
    }
}
