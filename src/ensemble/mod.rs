//! Simulated crop growth ensembles.
//!
//! An external simulation engine produces, for a set of spatial locations, an ensemble of
//! [`Trajectory`] objects. Every trajectory is a time series of (date, LAI, yield) samples and all
//! trajectories of all locations share one common time axis.
//!
//! The [`EnsembleStore`] validates the common time axis once, when an [`Ensemble`] is inserted,
//! and is read-only afterwards. An [`EnsembleSlice`] restricts the store to the time indices that
//! matched an observation, which is the form consumed by the
//! [`AssimilationEngine`](crate::assim::AssimilationEngine).

use crate::fXX;
use chrono::NaiveDate;
use derive_more::IntoIterator;
use itertools::Itertools;
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors associated with ensembles.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("ensemble member {member} has no samples")]
    EmptyTrajectory { member: usize },
    #[error("ensemble member {member} does not follow the common time axis at step {step}")]
    InconsistentTimeAxis { member: usize, step: usize },
    #[error("location {location} does not exist ({count} locations)")]
    InvalidLocation { location: usize, count: usize },
    #[error("ensemble slice cannot be shaped as {members} members x {steps} steps")]
    SliceShape {
        members: usize,
        steps: usize,
        source: ndarray::ShapeError,
    },
    #[error("ensemble member {member} has {found} time steps, time index {required} is required")]
    TrajectoryLengthMismatch {
        member: usize,
        found: usize,
        required: usize,
    },
}

/// A single simulated sample of a [`Trajectory`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrajectorySample<T> {
    /// Simulation date.
    pub date: NaiveDate,

    /// Simulated leaf area index.
    pub lai: T,

    /// Simulated (accumulated) yield.
    pub yield_value: T,
}

/// The time series of one ensemble member at one location.
#[derive(Clone, Debug, Deserialize, IntoIterator, PartialEq, Serialize)]
pub struct Trajectory<T> {
    #[into_iterator(ref)]
    samples: Vec<TrajectorySample<T>>,
}

impl<T> Trajectory<T>
where
    T: fXX,
{
    /// Returns the simulation dates.
    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.samples.iter().map(|sample| &sample.date)
    }

    /// Create a [`Trajectory`] from an iterator over samples.
    pub fn from_iterator<I: IntoIterator<Item = TrajectorySample<T>>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }

    /// Returns `true` if the trajectory contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns the sample at time step `step`.
    pub fn sample(&self, step: usize) -> Option<&TrajectorySample<T>> {
        self.samples.get(step)
    }

    /// Returns the yield at the last time step, i.e. the final yield of the member.
    pub fn terminal_yield(&self) -> Option<T> {
        self.samples.last().map(|sample| sample.yield_value)
    }
}

/// The ensemble members simulated at one location, indexed by member id.
pub type Ensemble<T> = BTreeMap<usize, Trajectory<T>>;

/// A geographic location for which an ensemble was simulated.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Location {
    /// Longitude in degrees.
    pub lon: f64,

    /// Latitude in degrees.
    pub lat: f64,
}

/// Read-only store of per-location ensembles sharing one time axis.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnsembleStore<T> {
    ensembles: Vec<(Location, Ensemble<T>)>,
    time_axis: Vec<NaiveDate>,
}

impl<T> EnsembleStore<T>
where
    T: fXX,
{
    /// Returns the ensemble of the location with index `location`.
    pub fn ensemble(&self, location: usize) -> Option<&Ensemble<T>> {
        self.ensembles.get(location).map(|(_, ensemble)| ensemble)
    }

    /// Insert the ensemble of a location.
    ///
    /// Every trajectory must contain exactly the dates of the common time axis.
    pub fn insert(
        &mut self,
        location: Location,
        ensemble: Ensemble<T>,
    ) -> Result<(), EnsembleError> {
        for (member, trajectory) in ensemble.iter() {
            if trajectory.is_empty() {
                return Err(EnsembleError::EmptyTrajectory { member: *member });
            }

            if let Some(step) = trajectory
                .dates()
                .zip_longest(self.time_axis.iter())
                .position(|pair| !pair.both().is_some_and(|(a, b)| a == b))
            {
                return Err(EnsembleError::InconsistentTimeAxis {
                    member: *member,
                    step,
                });
            }
        }

        debug!(
            "inserting ensemble at ({:.3}, {:.3}) with {} members",
            location.lon,
            location.lat,
            ensemble.len()
        );

        self.ensembles.push((location, ensemble));

        Ok(())
    }

    /// Returns `true` if the store holds no locations.
    pub fn is_empty(&self) -> bool {
        self.ensembles.is_empty()
    }

    /// Returns the number of locations.
    pub fn len(&self) -> usize {
        self.ensembles.len()
    }

    /// Returns the locations in insertion order.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.ensembles.iter().map(|(location, _)| location)
    }

    /// Returns the total number of members over all locations.
    pub fn member_count(&self) -> usize {
        self.ensembles
            .iter()
            .map(|(_, ensemble)| ensemble.len())
            .sum()
    }

    /// Create an empty [`EnsembleStore`] with the given common time axis.
    pub fn new(time_axis: Vec<NaiveDate>) -> Self {
        Self {
            ensembles: Vec::new(),
            time_axis,
        }
    }

    /// Restrict the members of a single location to the time indices `steps`.
    pub fn location_slice(
        &self,
        location: usize,
        steps: &[usize],
    ) -> Result<EnsembleSlice<T>, EnsembleError> {
        let ensemble = self
            .ensemble(location)
            .ok_or(EnsembleError::InvalidLocation {
                location,
                count: self.len(),
            })?;

        EnsembleSlice::from_trajectories(ensemble.iter(), steps)
    }

    /// Restrict the members of all locations, pooled into one ensemble, to the time indices
    /// `steps`.
    pub fn pooled_slice(&self, steps: &[usize]) -> Result<EnsembleSlice<T>, EnsembleError> {
        EnsembleSlice::from_trajectories(
            self.ensembles
                .iter()
                .flat_map(|(_, ensemble)| ensemble.iter()),
            steps,
        )
    }

    /// Returns the common time axis.
    pub fn time_axis(&self) -> &[NaiveDate] {
        &self.time_axis
    }
}

/// Ensemble members restricted to a set of matched time steps.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EnsembleSlice<T> {
    /// Simulated LAI, shaped (members, steps).
    pub lai: Array2<T>,

    /// Final yield of every member.
    pub yields: Array1<T>,
}

impl<T> EnsembleSlice<T>
where
    T: fXX,
{
    /// Create an [`EnsembleSlice`] from (member id, trajectory) pairs.
    pub fn from_trajectories<'a, I>(members: I, steps: &[usize]) -> Result<Self, EnsembleError>
    where
        I: IntoIterator<Item = (&'a usize, &'a Trajectory<T>)>,
    {
        let mut lai = Vec::new();
        let mut yields = Vec::new();

        for (member, trajectory) in members {
            for step in steps {
                let sample =
                    trajectory
                        .sample(*step)
                        .ok_or(EnsembleError::TrajectoryLengthMismatch {
                            member: *member,
                            found: trajectory.len(),
                            required: *step,
                        })?;

                lai.push(sample.lai);
            }

            yields.push(
                trajectory
                    .terminal_yield()
                    .ok_or(EnsembleError::EmptyTrajectory { member: *member })?,
            );
        }

        let members = yields.len();

        Ok(Self {
            lai: Array2::from_shape_vec((members, steps.len()), lai).map_err(|err| {
                EnsembleError::SliceShape {
                    members,
                    steps: steps.len(),
                    source: err,
                }
            })?,
            yields: Array1::from_vec(yields),
        })
    }

    /// Create an [`EnsembleSlice`] directly from arrays.
    ///
    /// Returns `None` if the number of rows of `lai` differs from the number of yields.
    pub fn from_arrays(lai: Array2<T>, yields: Array1<T>) -> Option<Self> {
        match lai.nrows() == yields.len() {
            true => Some(Self { lai, yields }),
            false => None,
        }
    }

    /// Returns the number of members.
    pub fn member_count(&self) -> usize {
        self.yields.len()
    }

    /// Returns the number of time steps.
    pub fn step_count(&self) -> usize {
        self.lai.ncols()
    }
}
