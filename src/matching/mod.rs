//! Alignment of observation dates with the ensemble time axis.
//!
//! Dates are compared at a coarse (year, day-of-year) granularity through a [`DoyKey`]. The
//! [`ObservationMatcher`] builds a [`DoyKey`] to time index map once per run and then assigns
//! each observation the ensemble time index with the same key. Observations without an exact
//! match are skipped, they are never handed to the tiling stage.

use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// A calendar date reduced to (year, day-of-year).
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DoyKey {
    /// Calendar year.
    pub year: i32,

    /// Day of the year, starting at 1.
    pub ordinal: u32,
}

impl From<NaiveDate> for DoyKey {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            ordinal: date.ordinal(),
        }
    }
}

impl fmt::Display for DoyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:03}", self.year, self.ordinal)
    }
}

/// A raster source together with its acquisition date.
#[derive(Clone, Debug)]
pub struct DatedSource<S> {
    /// Acquisition date.
    pub date: NaiveDate,

    /// The raster source handle.
    pub source: S,
}

impl<S> DatedSource<S> {
    /// Create a new [`DatedSource`].
    pub fn new(source: S, date: NaiveDate) -> Self {
        Self { date, source }
    }
}

/// The observations that matched the ensemble time axis, in input order.
#[derive(Clone, Debug)]
pub struct MatchedObservations<S> {
    /// Dates of the matched observations.
    pub dates: Vec<NaiveDate>,

    /// Dates of the skipped observations.
    pub skipped: Vec<NaiveDate>,

    /// Sources of the matched observations.
    pub sources: Vec<S>,

    /// Ensemble time index of every matched observation.
    pub steps: Vec<usize>,
}

impl<S> MatchedObservations<S> {
    /// Returns `true` if no observation matched.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns the number of matched observations.
    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

/// A map from [`DoyKey`] to ensemble time index.
#[derive(Clone, Debug, Default)]
pub struct TimeIndex(HashMap<DoyKey, usize>);

impl TimeIndex {
    /// Build the index from an ensemble time axis.
    ///
    /// If multiple time steps share a key, the first one is used.
    pub fn from_axis(time_axis: &[NaiveDate]) -> Self {
        let mut map = HashMap::with_capacity(time_axis.len());

        for (idx, date) in time_axis.iter().enumerate() {
            map.entry(DoyKey::from(*date)).or_insert(idx);
        }

        Self(map)
    }

    /// Returns the time index for `date`, if there is one.
    pub fn get(&self, date: &NaiveDate) -> Option<usize> {
        self.0.get(&DoyKey::from(*date)).copied()
    }

    /// Returns `true` if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Assigns observations to ensemble time indices.
#[derive(Clone, Debug)]
pub struct ObservationMatcher {
    index: TimeIndex,
}

impl ObservationMatcher {
    /// Returns the underlying [`TimeIndex`].
    pub fn index(&self) -> &TimeIndex {
        &self.index
    }

    /// Match a list of dated observations, sorted ascending by date.
    pub fn match_observations<S>(
        &self,
        observations: Vec<DatedSource<S>>,
    ) -> MatchedObservations<S> {
        let mut matched = MatchedObservations {
            dates: Vec::new(),
            skipped: Vec::new(),
            sources: Vec::new(),
            steps: Vec::new(),
        };

        for DatedSource { date, source } in observations {
            match self.index.get(&date) {
                Some(step) => {
                    matched.dates.push(date);
                    matched.sources.push(source);
                    matched.steps.push(step);
                }
                None => {
                    debug!("skipping observation {} (no ensemble time step)", DoyKey::from(date));

                    matched.skipped.push(date);
                }
            }
        }

        info!(
            "matched {} observation(s) to the ensemble time axis, skipped {}",
            matched.len(),
            matched.skipped.len()
        );

        matched
    }

    /// Create a new [`ObservationMatcher`] for an ensemble time axis.
    pub fn new(time_axis: &[NaiveDate]) -> Self {
        Self {
            index: TimeIndex::from_axis(time_axis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_doy_key() {
        assert!(DoyKey::from(ymd(2018, 2, 1)).to_string() == "2018032");
        assert!(DoyKey::from(ymd(2017, 12, 31)).to_string() == "2017365");
        assert!(DoyKey::from(ymd(2016, 12, 31)).ordinal == 366);

        // Sub-daily acquisition times collapse onto the same key.
        let acquired =
            NaiveDateTime::parse_from_str("20180415T031541", "%Y%m%dT%H%M%S").unwrap();

        assert!(DoyKey::from(acquired.date()) == DoyKey::from(ymd(2018, 4, 15)));
    }

    #[test]
    fn test_match_observations() {
        let axis = (0..10)
            .map(|idx| ymd(2018, 3, 1 + 2 * idx))
            .collect::<Vec<NaiveDate>>();

        let matcher = ObservationMatcher::new(&axis);

        assert!(matcher.index().len() == 10);

        let observations = vec![
            DatedSource::new("a", ymd(2018, 2, 27)),
            DatedSource::new("b", ymd(2018, 3, 3)),
            DatedSource::new("c", ymd(2018, 3, 4)),
            DatedSource::new("d", ymd(2018, 3, 19)),
            DatedSource::new("e", ymd(2019, 3, 19)),
        ];

        let matched = matcher.match_observations(observations);

        assert!(matched.sources == ["b", "d"]);
        assert!(matched.steps == [1, 9]);
        assert!(matched.dates == [ymd(2018, 3, 3), ymd(2018, 3, 19)]);
        assert!(matched.skipped.len() == 3);

        let nothing = matcher.match_observations(vec![DatedSource::new(0, ymd(2020, 1, 1))]);

        assert!(nothing.is_empty());
    }

    #[test]
    fn test_time_index_duplicates() {
        let index = TimeIndex::from_axis(&[ymd(2018, 1, 1), ymd(2018, 1, 2), ymd(2018, 1, 2)]);

        assert!(index.len() == 2);
        assert!(index.get(&ymd(2018, 1, 2)) == Some(1));
        assert!(index.get(&ymd(2018, 1, 3)).is_none());
    }
}
