use crate::{
    LaiAssimError,
    assim::{AssimilationEngine, AssimilationResult},
    ensemble::{EnsembleSlice, EnsembleStore},
    fXX,
    matching::{DatedSource, ObservationMatcher},
    mosaic::{Mosaic, MosaicAssembler},
    pipeline::{OutputSink, PipelineError, PipelineSettings},
    raster::RasterSource,
    tiling::{RasterStack, Tile, TilingError},
};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

/// Diagnostics of a completed run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunSummary {
    /// Number of observations that were assimilated.
    pub matched: usize,

    /// Number of observations without a matching ensemble time step.
    pub skipped: usize,

    /// Number of processed tiles.
    pub tiles: usize,

    /// Number of pixels with a finite mean yield.
    pub valid_pixels: usize,

    /// Wall clock duration in seconds.
    pub elapsed: f64,
}

/// Assimilate every tile of a stack and reassemble the results.
///
/// Tiles are read in batches of `tile_batch` and each batch is assimilated in parallel. The
/// optional cancel flag is checked before every batch, a batch that has been read is always
/// assimilated and placed completely.
pub fn assimilate_stack<T, S>(
    stack: &RasterStack<S>,
    ensemble: &EnsembleSlice<T>,
    engine: &AssimilationEngine<T>,
    tile_batch: usize,
    opt_cancel: Option<&AtomicBool>,
) -> Result<Mosaic<T>, LaiAssimError>
where
    T: fXX,
    S: RasterSource,
{
    let mut assembler = MosaicAssembler::new(*stack.grid());
    let mut tiles = stack.tiles();

    loop {
        if opt_cancel.is_some_and(|cancel| cancel.load(Ordering::Relaxed)) {
            info!("run cancelled after {} tile(s)", assembler.count());

            return Err(PipelineError::Cancelled {
                tiles: assembler.count(),
            }
            .into());
        }

        let batch = tiles
            .by_ref()
            .take(tile_batch.max(1))
            .collect::<Result<Vec<Tile>, TilingError>>()?;

        if batch.is_empty() {
            break;
        }

        let results = batch
            .par_iter()
            .map(|tile| -> Result<AssimilationResult<T>, LaiAssimError> {
                let observed = tile.stack_single_band::<T>()?;

                Ok(engine.assimilate(&tile.spec, observed.view(), ensemble)?)
            })
            .collect::<Result<Vec<AssimilationResult<T>>, LaiAssimError>>()?;

        for result in results.iter() {
            assembler.place(result)?;
        }

        debug!("{} / {} tiles done", assembler.count(), stack.grid().len());
    }

    Ok(assembler.finish()?)
}

/// Run a complete assimilation and write the result to `sink`.
///
/// The observations must be sorted ascending by date. Observations without a matching ensemble
/// time step are skipped before any raster data is read.
pub fn run<T, S, K>(
    observations: Vec<DatedSource<S>>,
    store: &EnsembleStore<T>,
    settings: &PipelineSettings,
    sink: &mut K,
    opt_cancel: Option<&AtomicBool>,
) -> Result<RunSummary, LaiAssimError>
where
    T: fXX,
    S: RasterSource,
    K: OutputSink<T>,
{
    let start = Instant::now();

    let engine = AssimilationEngine::<T>::new(settings.assimilation.clone())?;

    let matched = ObservationMatcher::new(store.time_axis()).match_observations(observations);

    if matched.is_empty() {
        return Err(PipelineError::NoMatchedObservations {
            skipped: matched.skipped.len(),
        }
        .into());
    }

    let ensemble = match settings.location {
        Some(location) => store.location_slice(location, &matched.steps)?,
        None => store.pooled_slice(&matched.steps)?,
    };

    debug!(
        "ensemble slice with {} member(s) and {} step(s)",
        ensemble.member_count(),
        ensemble.step_count()
    );

    let (count_matched, count_skipped) = (matched.len(), matched.skipped.len());

    let stack = RasterStack::open(matched.sources, settings.bands.clone(), settings.block_size)?;

    let mosaic = assimilate_stack(&stack, &ensemble, &engine, settings.tile_batch, opt_cancel)?;

    sink.write(&mosaic, stack.config()).map_err(PipelineError::Sink)?;

    let summary = RunSummary {
        matched: count_matched,
        skipped: count_skipped,
        tiles: stack.grid().len(),
        valid_pixels: mosaic.mean.iter().filter(|value| value.is_finite()).count(),
        elapsed: start.elapsed().as_millis() as f64 / 1e3,
    };

    info!(
        "assimilation run finished\n\tobservations: {} matched, {} skipped\n\ttiles: {} | valid pixels: {} / {}\n\tran in {:.2} sec",
        summary.matched,
        summary.skipped,
        summary.tiles,
        summary.valid_pixels,
        mosaic.mean.len(),
        summary.elapsed,
    );

    Ok(summary)
}
