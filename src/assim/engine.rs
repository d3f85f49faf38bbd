use crate::{
    assim::{AssimilationError, AssimilationResult, AssimilationSettings, ConsistencyRule},
    ensemble::EnsembleSlice,
    fXX,
    math::{T, abs, nanmean_std},
    tiling::BlockSpec,
};
use log::debug;
use ndarray::{Array2, ArrayView1, ArrayView3, Zip, s};
use std::time::Instant;

/// Applies the tolerance band filter to the tiles of an observation stack.
#[derive(Clone, Debug)]
pub struct AssimilationEngine<T> {
    settings: AssimilationSettings,
    threshold: T,
    valid_max: T,
    valid_min: T,
}

impl<T> AssimilationEngine<T>
where
    T: fXX,
{
    /// Compute the yield statistics of a single tile.
    ///
    /// The observations are shaped (steps, rows, columns), one step per matched observation,
    /// and the ensemble slice must provide exactly the same time steps.
    pub fn assimilate(
        &self,
        spec: &BlockSpec,
        observed: ArrayView3<T>,
        ensemble: &EnsembleSlice<T>,
    ) -> Result<AssimilationResult<T>, AssimilationError> {
        let (steps, rows, cols) = observed.dim();

        if (rows, cols) != spec.shape() {
            return Err(AssimilationError::ShapeMismatch {
                spec: *spec,
                expected: spec.shape(),
                found: (rows, cols),
            });
        }

        if steps == 0 {
            return Ok(AssimilationResult::missing(*spec));
        }

        if ensemble.step_count() != steps {
            return Err(AssimilationError::TrajectoryLengthMismatch {
                spec: *spec,
                found: ensemble.step_count(),
                required: steps,
            });
        }

        let start = Instant::now();

        let mut mean = Array2::<T>::from_elem((rows, cols), T::nan());
        let mut std = Array2::<T>::from_elem((rows, cols), T::nan());

        Zip::indexed(&mut mean)
            .and(&mut std)
            .par_for_each(|(row, col), mean, std| {
                (*mean, *std) =
                    self.pixel_statistics(observed.slice(s![.., row, col]), ensemble);
            });

        debug!(
            "assimilated {} pixel(s) x {} member(s) x {} step(s) in {:.3} sec",
            rows * cols,
            ensemble.member_count(),
            steps,
            start.elapsed().as_millis() as f64 / 1e3
        );

        Ok(AssimilationResult { spec: *spec, mean, std })
    }

    /// Returns `true` if a simulated trajectory is consistent with the observations of a pixel.
    fn is_consistent(&self, observed: &ArrayView1<T>, simulated: &ArrayView1<T>) -> bool {
        let (valid, agree) = observed.iter().zip(simulated.iter()).fold(
            (0_usize, 0_usize),
            |(valid, agree), (obs, sim)| {
                if !self.is_valid(*obs) {
                    (valid, agree)
                } else if abs!(*obs - *sim) < self.threshold {
                    (valid + 1, agree + 1)
                } else {
                    (valid + 1, agree)
                }
            },
        );

        match self.settings.rule {
            ConsistencyRule::AllSteps => agree == valid,
            ConsistencyRule::MinFraction(fraction) => {
                valid == 0 || agree as f64 >= fraction * valid as f64
            }
        }
    }

    /// Returns `true` if an observation lies within the valid range.
    fn is_valid(&self, value: T) -> bool {
        self.valid_min <= value && value <= self.valid_max
    }

    /// Create a new [`AssimilationEngine`].
    pub fn new(settings: AssimilationSettings) -> Result<Self, AssimilationError> {
        settings.validate()?;

        Ok(Self {
            threshold: T!(settings.threshold),
            valid_max: T!(settings.valid_range.1),
            valid_min: T!(settings.valid_range.0),
            settings,
        })
    }

    /// Compute the mean and standard deviation of the yield of all consistent members.
    pub fn pixel_statistics(
        &self,
        observed: ArrayView1<T>,
        ensemble: &EnsembleSlice<T>,
    ) -> (T, T) {
        nanmean_std(
            ensemble
                .lai
                .outer_iter()
                .zip(ensemble.yields.iter())
                .filter(|(simulated, _)| self.is_consistent(&observed, simulated))
                .map(|(_, yield_value)| *yield_value)
                .filter(|yield_value| !(self.settings.drop_zero_yield && yield_value.is_zero())),
        )
    }

    /// Returns the settings.
    pub fn settings(&self) -> &AssimilationSettings {
        &self.settings
    }
}
