//! Raster source handles and pixel element types.
//!
//! # Sources
//!
//! Any opened raster container must implement the [`RasterSource`] trait. The trait exposes the
//! raster geometry, the declared element type, the native storage block size and a windowed read
//! returning a raw, band-sequential buffer in native byte order.
//!
//! Container formats are not handled by this crate, only [`MemoryRaster`] is provided as an
//! in-memory implementation.
//!
//! # Element Types
//!
//! The declared data type of a source is a plain name, such as `"Float32"`. It is mapped onto an
//! [`ElementType`] once, when a [`RasterStack`](crate::tiling::RasterStack) is opened, and raw
//! buffers are then decoded into a typed [`BlockArray`].

mod memory;

pub use memory::{MemoryRaster, Pixel};

use crate::{fXX, tiling::BlockSpec};
use derive_more::{Deref, From};
use ndarray::{ArrayD, IxDyn};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors associated with raster sources.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("band {band} does not exist (band count is {band_count})")]
    BandOutOfRange { band: usize, band_count: usize },
    #[error("buffer of {found} bytes cannot hold {expected} bytes")]
    BufferSize { expected: usize, found: usize },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported data type \"{0}\"")]
    UnsupportedDataType(String),
    #[error("window {window:?} exceeds raster extent {width} x {height}")]
    WindowOutOfRange {
        window: BlockSpec,
        width: usize,
        height: usize,
    },
}

/// A handle to an opened raster source.
pub trait RasterSource {
    /// Returns the number of bands.
    fn band_count(&self) -> usize;

    /// Returns the native storage block size (width, height).
    fn block_size(&self) -> (usize, usize);

    /// Returns the declared element type name of the source, e.g. `"UInt16"`.
    fn data_type(&self) -> &str;

    /// Returns the affine geo transform coefficients.
    fn geo_transform(&self) -> GeoTransform;

    /// Returns the raster height in pixels.
    fn height(&self) -> usize;

    /// Returns the opaque spatial reference string.
    fn projection(&self) -> &str;

    /// Read a pixel window for the given (zero-based) bands.
    ///
    /// The returned buffer is band-sequential, i.e. ordered as (band, row, column), and
    /// uses the native byte order.
    fn read_window(&self, window: &BlockSpec, bands: &[usize]) -> Result<Vec<u8>, RasterError>;

    /// Returns the raster width in pixels.
    fn width(&self) -> usize;
}

impl<S> RasterSource for &S
where
    S: RasterSource + ?Sized,
{
    fn band_count(&self) -> usize {
        (**self).band_count()
    }

    fn block_size(&self) -> (usize, usize) {
        (**self).block_size()
    }

    fn data_type(&self) -> &str {
        (**self).data_type()
    }

    fn geo_transform(&self) -> GeoTransform {
        (**self).geo_transform()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn projection(&self) -> &str {
        (**self).projection()
    }

    fn read_window(&self, window: &BlockSpec, bands: &[usize]) -> Result<Vec<u8>, RasterError> {
        (**self).read_window(window, bands)
    }

    fn width(&self) -> usize {
        (**self).width()
    }
}

/// The six affine geo transform coefficients
/// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`.
#[derive(Clone, Copy, Debug, Default, Deref, Deserialize, From, PartialEq, Serialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Returns the pixel size (width, height).
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1], self.0[5])
    }

    /// Returns the (x, y) coordinates of the upper left corner.
    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Returns the row and column rotation terms.
    pub fn rotation(&self) -> (f64, f64) {
        (self.0[2], self.0[4])
    }
}

/// Fixed-width pixel element types a source may declare.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ElementType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ElementType {
    /// Returns the size of a single element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Decode a native endian raw buffer into a typed array of the given shape.
    pub fn decode(&self, buffer: &[u8], shape: &[usize]) -> Result<BlockArray, RasterError> {
        let expected = shape.iter().product::<usize>() * self.size();

        if buffer.len() != expected {
            return Err(RasterError::BufferSize {
                expected,
                found: buffer.len(),
            });
        }

        macro_rules! decode_as {
            ($type: ty, $variant: ident) => {{
                let values = buffer
                    .chunks_exact(std::mem::size_of::<$type>())
                    .map(|bytes| {
                        let mut raw = [0_u8; std::mem::size_of::<$type>()];
                        raw.copy_from_slice(bytes);

                        <$type>::from_ne_bytes(raw)
                    })
                    .collect::<Vec<$type>>();

                BlockArray::$variant(
                    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| {
                        RasterError::BufferSize {
                            expected,
                            found: buffer.len(),
                        }
                    })?,
                )
            }};
        }

        Ok(match self {
            ElementType::U8 => decode_as!(u8, U8),
            ElementType::U16 => decode_as!(u16, U16),
            ElementType::I16 => decode_as!(i16, I16),
            ElementType::U32 => decode_as!(u32, U32),
            ElementType::I32 => decode_as!(i32, I32),
            ElementType::F32 => decode_as!(f32, F32),
            ElementType::F64 => decode_as!(f64, F64),
        })
    }
}

impl FromStr for ElementType {
    type Err = RasterError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "Byte" => Ok(ElementType::U8),
            "UInt16" => Ok(ElementType::U16),
            "Int16" => Ok(ElementType::I16),
            "UInt32" => Ok(ElementType::U32),
            "Int32" => Ok(ElementType::I32),
            "Float32" => Ok(ElementType::F32),
            "Float64" => Ok(ElementType::F64),
            _ => Err(RasterError::UnsupportedDataType(name.to_string())),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "Byte",
            ElementType::U16 => "UInt16",
            ElementType::I16 => "Int16",
            ElementType::U32 => "UInt32",
            ElementType::I32 => "Int32",
            ElementType::F32 => "Float32",
            ElementType::F64 => "Float64",
        };

        write!(f, "{}", name)
    }
}

/// A block of pixels decoded into the native element type of its source.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum BlockArray {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    I16(ArrayD<i16>),
    U32(ArrayD<u32>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! for_each_variant {
    ($self: expr, $array: ident => $body: expr) => {
        match $self {
            BlockArray::U8($array) => $body,
            BlockArray::U16($array) => $body,
            BlockArray::I16($array) => $body,
            BlockArray::U32($array) => $body,
            BlockArray::I32($array) => $body,
            BlockArray::F32($array) => $body,
            BlockArray::F64($array) => $body,
        }
    };
}

impl BlockArray {
    /// Returns the element type of the block.
    pub fn element_type(&self) -> ElementType {
        match self {
            BlockArray::U8(_) => ElementType::U8,
            BlockArray::U16(_) => ElementType::U16,
            BlockArray::I16(_) => ElementType::I16,
            BlockArray::U32(_) => ElementType::U32,
            BlockArray::I32(_) => ElementType::I32,
            BlockArray::F32(_) => ElementType::F32,
            BlockArray::F64(_) => ElementType::F64,
        }
    }

    /// Returns the number of array dimensions.
    pub fn ndim(&self) -> usize {
        for_each_variant!(self, array => array.ndim())
    }

    /// Returns the array shape.
    pub fn shape(&self) -> &[usize] {
        for_each_variant!(self, array => array.shape())
    }

    /// Remove the leading band axis if it has length one.
    pub fn squeeze_band(self) -> Self {
        macro_rules! squeeze {
            ($variant: ident, $array: ident) => {
                if $array.ndim() == 3 && $array.shape()[0] == 1 {
                    BlockArray::$variant($array.index_axis_move(ndarray::Axis(0), 0))
                } else {
                    BlockArray::$variant($array)
                }
            };
        }

        match self {
            BlockArray::U8(array) => squeeze!(U8, array),
            BlockArray::U16(array) => squeeze!(U16, array),
            BlockArray::I16(array) => squeeze!(I16, array),
            BlockArray::U32(array) => squeeze!(U32, array),
            BlockArray::I32(array) => squeeze!(I32, array),
            BlockArray::F32(array) => squeeze!(F32, array),
            BlockArray::F64(array) => squeeze!(F64, array),
        }
    }

    /// Convert the block into floating point values, unrepresentable values become NaN.
    pub fn to_float<T>(&self) -> ArrayD<T>
    where
        T: fXX,
    {
        for_each_variant!(
            self,
            array => array.mapv(|value| <T as NumCast>::from(value).unwrap_or_else(T::nan))
        )
    }
}
