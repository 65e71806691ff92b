//! Range expressions used to configure sample generation

use rand::distr::uniform::SampleUniform;
use std::{cmp, fmt};

/// Range expression for configuration
#[derive(Debug, Clone, PartialEq, Copy)]
pub enum ConfRange<T>
where
    T: PartialEq + cmp::PartialOrd + Clone + Copy,
{
    /// In which a T is chosen between `min` and `max`, inclusive of `max`.
    Inclusive {
        /// The minimum of the range.
        min: T,
        /// The maximum of the range.
        max: T,
    },
}

impl<T> ConfRange<T>
where
    T: PartialEq + cmp::PartialOrd + Clone + Copy,
{
    /// Returns true if the range provided by the user is valid, false
    /// otherwise.
    pub fn valid(&self) -> (bool, &'static str) {
        match self {
            Self::Inclusive { min, max } => (min <= max, "min must be less than or equal to max"),
        }
    }

    /// The smallest value this range may produce.
    pub fn start(&self) -> T {
        match self {
            ConfRange::Inclusive { min, .. } => *min,
        }
    }

    /// The largest value this range may produce.
    pub fn end(&self) -> T {
        match self {
            ConfRange::Inclusive { max, .. } => *max,
        }
    }
}

impl<T> ConfRange<T>
where
    T: PartialEq + cmp::PartialOrd + Clone + Copy + SampleUniform,
{
    pub(crate) fn sample<R>(&self, rng: &mut R) -> T
    where
        R: rand::Rng + ?Sized,
    {
        match self {
            ConfRange::Inclusive { min, max } => rng.random_range(*min..=*max),
        }
    }
}

impl<T> fmt::Display for ConfRange<T>
where
    T: PartialEq + cmp::PartialOrd + Clone + Copy + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfRange::Inclusive { min, max } => {
                if min == max {
                    write!(f, "{min}")
                } else {
                    write!(f, "{min}..={max}")
                }
            }
        }
    }
}

/// Random offset added to the running volume before each sample is emitted.
///
/// Integer ranges draw whole-number deltas, real ranges draw fractional ones.
#[derive(Debug, Clone, PartialEq, Copy)]
pub enum Perturbation {
    /// Whole-number deltas
    Integer(ConfRange<i64>),
    /// Fractional deltas
    Real(ConfRange<f64>),
}

impl Perturbation {
    /// Returns true if the perturbation can be sampled, false otherwise.
    pub fn valid(&self) -> (bool, &'static str) {
        match self {
            Self::Integer(range) => range.valid(),
            Self::Real(range) => {
                if !(range.start().is_finite() && range.end().is_finite()) {
                    return (false, "bounds must be finite");
                }
                range.valid()
            }
        }
    }

    pub(crate) fn sample<R>(&self, rng: &mut R) -> f64
    where
        R: rand::Rng + ?Sized,
    {
        match self {
            Self::Integer(range) => range.sample(rng) as f64,
            Self::Real(range) => range.sample(rng),
        }
    }
}

impl fmt::Display for Perturbation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(range) => write!(f, "{range}"),
            Self::Real(range) => write!(f, "{range}"),
        }
    }
}
