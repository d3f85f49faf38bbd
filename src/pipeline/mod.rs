//! End-to-end assimilation runs.
//!
//! A run matches the observation dates against the ensemble time axis, opens a
//! [`RasterStack`](crate::tiling::RasterStack) over the matched sources only, assimilates one tile
//! at a time and hands the reassembled [`Mosaic`] to an [`OutputSink`].
//!
//! With [`PipelineSettings::tile_batch`] set to `n > 1`, `n` tiles are read sequentially and then
//! assimilated in parallel. Results are always placed by their own offsets, so the order in which
//! a batch finishes does not matter.

mod run;

pub use run::{RunSummary, assimilate_stack, run};

use crate::{assim::AssimilationSettings, mosaic::Mosaic, tiling::RasterStackConfig};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::Path};
use thiserror::Error;

/// Errors associated with assimilation runs.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run was cancelled after {tiles} tile(s)")]
    Cancelled { tiles: usize },
    #[error("failed to parse settings")]
    ConfigParse(#[from] serde_json::Error),
    #[error("failed to read or write settings file")]
    ConfigIo(#[source] std::io::Error),
    #[error("none of the observations matched the ensemble time axis ({skipped} skipped)")]
    NoMatchedObservations { skipped: usize },
    #[error("output sink failed")]
    Sink(#[source] std::io::Error),
}

/// A consumer of the final yield grids.
pub trait OutputSink<T> {
    /// Write the mean and standard deviation grids together with their georeferencing.
    fn write(&mut self, mosaic: &Mosaic<T>, config: &RasterStackConfig) -> std::io::Result<()>;
}

/// An [`OutputSink`] that keeps the last written mosaic in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink<T> {
    /// The written mosaic and its georeferencing, if any.
    pub output: Option<(Mosaic<T>, RasterStackConfig)>,
}

impl<T> OutputSink<T> for MemorySink<T>
where
    T: Clone,
{
    fn write(&mut self, mosaic: &Mosaic<T>, config: &RasterStackConfig) -> std::io::Result<()> {
        self.output = Some((mosaic.clone(), config.clone()));

        Ok(())
    }
}

/// A data structure that holds the settings of an assimilation run.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Settings of the tolerance band filter.
    #[builder(default)]
    pub assimilation: AssimilationSettings,

    /// Zero-based bands to read, all bands if `None`.
    #[builder(default)]
    pub bands: Option<Vec<usize>>,

    /// Nominal block size (width, height), derived from the storage block size if `None`.
    #[builder(default)]
    pub block_size: Option<(usize, usize)>,

    /// Restrict the ensemble to a single location, all locations are pooled if `None`.
    #[builder(default)]
    pub location: Option<usize>,

    /// Number of tiles that are read before they are assimilated in parallel.
    #[builder(default = 1)]
    pub tile_batch: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            assimilation: AssimilationSettings::default(),
            bands: None,
            block_size: None,
            location: None,
            tile_batch: 1,
        }
    }
}

impl PipelineSettings {
    /// Load settings from a JSON file. Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(PipelineError::ConfigIo)?;

        Ok(serde_json::from_reader(file)?)
    }

    /// Serialize settings to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PipelineError> {
        let mut file = File::create(path).map_err(PipelineError::ConfigIo)?;

        file.write_all(serde_json::to_string_pretty(&self)?.as_bytes())
            .map_err(PipelineError::ConfigIo)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assim::ConsistencyRule;

    #[test]
    fn test_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = PipelineSettingsBuilder::default()
            .block_size(Some((512, 512)))
            .tile_batch(4)
            .assimilation(AssimilationSettings {
                rule: ConsistencyRule::MinFraction(0.8),
                ..Default::default()
            })
            .build()
            .unwrap();

        settings.to_json_file(&path).unwrap();

        assert!(PipelineSettings::from_json_file(&path).unwrap() == settings);

        std::fs::write(&path, r#"{"bands": [0], "assimilation": {"threshold": 2.5}}"#).unwrap();

        let partial = PipelineSettings::from_json_file(&path).unwrap();

        assert!(partial.bands == Some(vec![0]));
        assert!(partial.tile_batch == 1);
        assert!(partial.assimilation.threshold == 2.5);
        assert!(partial.assimilation.valid_range == (0.0, 10.0));

        std::fs::write(&path, "{\"tile_batch\": -1}").unwrap();

        assert!(matches!(
            PipelineSettings::from_json_file(&path),
            Err(PipelineError::ConfigParse(_))
        ));

        assert!(matches!(
            PipelineSettings::from_json_file(dir.path().join("missing.json")),
            Err(PipelineError::ConfigIo(_))
        ));
    }
}
