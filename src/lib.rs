#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod assim;
pub mod ensemble;
pub mod matching;
pub mod math;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod tiling;

use assim::AssimilationError;
use ensemble::EnsembleError;
use mosaic::MosaicError;
use ndarray::ScalarOperand;
use num_traits::{Float, FromPrimitive, NumCast};
use pipeline::PipelineError;
use raster::RasterError;
use std::{
    fmt::{Debug, Display},
    iter::Sum,
};
use thiserror::Error;
use tiling::TilingError;

/// Generic container type for errors.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LaiAssimError {
    #[error("assimilation error")]
    Assimilation(#[from] AssimilationError),
    #[error("ensemble error")]
    Ensemble(#[from] EnsembleError),
    #[error("mosaic error")]
    Mosaic(#[from] MosaicError),
    #[error("pipeline error")]
    Pipeline(#[from] PipelineError),
    #[error("raster error")]
    Raster(#[from] RasterError),
    #[error("tiling error")]
    Tiling(#[from] TilingError),
}

/// A trait that describes a generic floating point numbers within the **laiassim** crate. In
/// practical terms this trait is only used for the f32/f64 types.
#[allow(non_camel_case_types)]
pub trait fXX:
    'static
    + Copy
    + Debug
    + Default
    + Display
    + Float
    + FromPrimitive
    + NumCast
    + ScalarOperand
    + Send
    + Sum
    + for<'x> Sum<&'x Self>
    + Sync
{
}

impl fXX for f32 {}
impl fXX for f64 {}
