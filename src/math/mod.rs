//! Mathematical helper macros and a NaN-aware reducer.
//!
//! The reducer follows the "ignore NaN unless all values are NaN" rule: NaN values are
//! skipped and an input without any finite value reduces to NaN instead of zero.

use crate::fXX;

/// A shorthand for converting constants to type `T`.
macro_rules! T {
    ($value: expr) => {
        T::from_f64($value).unwrap_or_else(T::nan)
    };
}

macro_rules! abs {
    ($value: expr) => {
        num_traits::Float::abs($value)
    };
}

macro_rules! sqrt {
    ($value: expr) => {
        num_traits::Float::sqrt($value)
    };
}

pub(crate) use T;
pub(crate) use abs;
pub(crate) use sqrt;

/// Mean and population standard deviation over all non-NaN values.
///
/// Uses two passes over the buffered values. Returns `(NaN, NaN)` if every value is NaN.
pub fn nanmean_std<T, I>(values: I) -> (T, T)
where
    T: fXX,
    I: IntoIterator<Item = T>,
{
    let values = values
        .into_iter()
        .filter(|value| !value.is_nan())
        .collect::<Vec<T>>();

    if values.is_empty() {
        return (T::nan(), T::nan());
    }

    let count = T::from_usize(values.len()).unwrap_or_else(T::nan);
    let mean = values.iter().sum::<T>() / count;

    let variance = values
        .iter()
        .map(|value| (*value - mean) * (*value - mean))
        .sum::<T>()
        / count;

    (mean, sqrt!(variance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nanmean_std() {
        assert!(nanmean_std([1.0_f64, f64::NAN, 3.0]).0 == 2.0);
        assert!(nanmean_std::<f64, _>([f64::NAN, f64::NAN]).0.is_nan());
        assert!(nanmean_std::<f32, _>([]).0.is_nan());

        let (mean, std) = nanmean_std([2.0_f64, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);

        assert!(mean == 5.0);
        assert!(std == 2.0);

        assert_relative_eq!(nanmean_std([10.0_f32, f32::NAN, 20.0]).1, 5.0);
        assert!(nanmean_std([7.5_f64]).1 == 0.0);
        assert!(nanmean_std::<f64, _>([f64::NAN]).1.is_nan());
    }
}
