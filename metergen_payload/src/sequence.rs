//! Time series of synthetic samples
//!
//! A [`SampleSequence`] walks from `start` to `end` in fixed steps and yields
//! one [`Sample`] per step. Each sample measures a resource drawn uniformly
//! from a pool created when the sequence is built. When a [`Perturbation`] is
//! configured a random delta is folded into the running volume before every
//! emission; gauge and delta meters drop back to the base volume afterwards
//! while cumulative meters keep the running total.

use std::{collections::BTreeMap, num::NonZeroU32};

use chrono::{NaiveDateTime, TimeDelta};
use rand::Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Error, MeterType, Perturbation, Sample};

/// Default metadata attached to every sample's resource
#[must_use]
pub fn default_resource_metadata() -> BTreeMap<String, String> {
    [
        ("display_name", "toto"),
        ("host", "tata"),
        ("image_ref", "test"),
        ("instance_flavor_id", "toto"),
        ("server_group", "toto"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Default origin tag
#[must_use]
pub fn default_source() -> String {
    "artificial".to_string()
}

/// Default meter name
#[must_use]
pub fn default_name() -> String {
    "test_meter".to_string()
}

/// Configure a [`SampleSequence`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Meter name
    pub name: String,
    /// Meter type, decides whether the volume accumulates
    pub meter_type: MeterType,
    /// Measurement unit
    pub unit: Option<String>,
    /// Owning user
    pub user_id: Option<String>,
    /// Owning project
    pub project_id: Option<String>,
    /// Timestamp of the first sample
    pub start: NaiveDateTime,
    /// No sample is stamped later than this
    pub end: NaiveDateTime,
    /// Seconds between consecutive samples
    pub interval: NonZeroU32,
    /// Base volume
    pub volume: f64,
    /// Random offset applied to the running volume, if any
    pub perturbation: Option<Perturbation>,
    /// Size of the resource pool
    pub resources_count: NonZeroU32,
    /// Metadata attached to every sample
    pub resource_metadata: BTreeMap<String, String>,
    /// Origin tag attached to every sample
    pub source: String,
}

impl Config {
    /// Create a configuration spanning `start..=end` with every other field at
    /// its default: a one second interval, a base volume of 1, one resource
    /// and no perturbation.
    #[must_use]
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            name: default_name(),
            meter_type: MeterType::default(),
            unit: None,
            user_id: None,
            project_id: None,
            start,
            end,
            interval: NonZeroU32::MIN,
            volume: 1.0,
            perturbation: None,
            resources_count: NonZeroU32::MIN,
            resource_metadata: default_resource_metadata(),
            source: default_source(),
        }
    }
}

fn random_uuid<R>(rng: &mut R) -> Uuid
where
    R: Rng + ?Sized,
{
    uuid::Builder::from_random_bytes(rng.random()).into_uuid()
}

/// Lazy, finite stream of [`Sample`] instances. See the module documentation
/// for the generation rules.
#[derive(Debug)]
pub struct SampleSequence<R> {
    config: Config,
    rng: R,
    resources: Vec<String>,
    step: TimeDelta,
    /// Timestamp of the next sample, `None` once the clock has run off the
    /// end of the representable range.
    cursor: Option<NaiveDateTime>,
    running_volume: f64,
    emitted: u64,
    finished: bool,
}

impl<R> SampleSequence<R>
where
    R: Rng,
{
    /// Create a new instance of [`SampleSequence`]
    ///
    /// The resource pool is drawn from `rng`, so a seeded `rng` gives a fully
    /// reproducible sequence.
    ///
    /// # Errors
    ///
    /// Function will error if the configured perturbation is not a valid
    /// range.
    pub fn new(config: Config, mut rng: R) -> Result<Self, Error> {
        if let Some(perturbation) = config.perturbation {
            let (valid, reason) = perturbation.valid();
            if !valid {
                return Err(Error::Validation(format!(
                    "perturbation {perturbation} is invalid: {reason}"
                )));
            }
        }

        let resources = (0..config.resources_count.get())
            .map(|_| random_uuid(&mut rng).to_string())
            .collect();
        let step = TimeDelta::seconds(i64::from(config.interval.get()));

        info!("Adding new samples for meter {}.", config.name);
        debug!(
            start = %config.start,
            end = %config.end,
            interval = config.interval.get(),
            resources = config.resources_count.get(),
            "sample sequence configured"
        );

        Ok(Self {
            cursor: Some(config.start),
            running_volume: config.volume,
            config,
            rng,
            resources,
            step,
            emitted: 0,
            finished: false,
        })
    }

    /// The resource identifiers samples are drawn from
    #[must_use]
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// Number of samples yielded so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// The configuration this sequence was built from
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            info!(
                "Added {} new samples for meter {}.",
                self.emitted, self.config.name
            );
        }
    }
}

impl<R> Iterator for SampleSequence<R>
where
    R: Rng,
{
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        let timestamp = match self.cursor {
            Some(ts) if ts <= self.config.end => ts,
            _ => {
                self.finish();
                return None;
            }
        };

        if let Some(perturbation) = &self.config.perturbation {
            self.running_volume += perturbation.sample(&mut self.rng);
        }
        let idx = self.rng.random_range(0..self.resources.len());
        let resource_id = self.resources[idx].clone();

        let sample = Sample {
            id: random_uuid(&mut self.rng).to_string(),
            name: self.config.name.clone(),
            meter_type: self.config.meter_type,
            unit: self.config.unit.clone(),
            volume: self.running_volume,
            user_id: self.config.user_id.clone(),
            project_id: self.config.project_id.clone(),
            resource_id,
            timestamp,
            resource_metadata: self.config.resource_metadata.clone(),
            source: self.config.source.clone(),
        };

        self.emitted += 1;
        self.cursor = timestamp.checked_add_signed(self.step);
        if self.config.meter_type.resets() {
            self.running_volume = self.config.volume;
        }

        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{NaiveDate, TimeDelta};
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::{ConfRange, sample::isoformat};

    fn midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sequence(config: Config, seed: u64) -> SampleSequence<SmallRng> {
        SampleSequence::new(config, SmallRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn four_gauge_samples_over_three_seconds() {
        let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(3));
        config.volume = 5.0;
        let samples: Vec<Sample> = sequence(config, 1).collect();

        assert_eq!(samples.len(), 4);
        let stamps: Vec<String> = samples.iter().map(|s| isoformat(&s.timestamp)).collect();
        assert_eq!(
            stamps,
            [
                "2024-01-01T00:00:00",
                "2024-01-01T00:00:01",
                "2024-01-01T00:00:02",
                "2024-01-01T00:00:03",
            ]
        );
        assert!(samples.iter().all(|s| s.volume == 5.0));
        assert!(samples.iter().all(|s| s.meter_type == MeterType::Gauge));
    }

    #[test]
    fn start_after_end_is_empty() {
        let config = Config::new(midnight() + TimeDelta::seconds(1), midnight());
        let mut seq = sequence(config, 1);
        assert!(seq.next().is_none());
        assert_eq!(seq.emitted(), 0);
    }

    #[test]
    fn single_resource_is_reused() {
        let config = Config::new(midnight(), midnight() + TimeDelta::seconds(9));
        let seq = sequence(config, 7);
        let only = seq.resources()[0].clone();
        assert!(seq.map(|s| s.resource_id).all(|id| id == only));
    }

    #[test]
    fn inverted_perturbation_is_rejected() {
        let mut config = Config::new(midnight(), midnight());
        config.perturbation = Some(Perturbation::Real(ConfRange::Inclusive {
            min: 2.0,
            max: 1.0,
        }));
        let res = SampleSequence::new(config, SmallRng::seed_from_u64(0));
        assert!(matches!(res, Err(Error::Validation(_))));
    }

    #[test]
    fn cumulative_degenerate_perturbation_accumulates() {
        let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(2));
        config.meter_type = MeterType::Cumulative;
        config.volume = 10.0;
        config.perturbation = Some(Perturbation::Integer(ConfRange::Inclusive { min: 2, max: 2 }));
        let volumes: Vec<f64> = sequence(config, 3).map(|s| s.volume).collect();
        assert_eq!(volumes, [12.0, 14.0, 16.0]);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(20));
        config.resources_count = NonZeroU32::new(4).unwrap();
        config.perturbation = Some(Perturbation::Real(ConfRange::Inclusive {
            min: 0.0,
            max: 3.0,
        }));
        let a: Vec<Sample> = sequence(config.clone(), 99).collect();
        let b: Vec<Sample> = sequence(config, 99).collect();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn sample_count_follows_span(seed: u64, span in 0..5_000i64, interval in 1..600u32) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(span));
            config.interval = NonZeroU32::new(interval).unwrap();
            let count = sequence(config, seed).count() as i64;
            prop_assert_eq!(count, span / i64::from(interval) + 1);
        }

        #[test]
        fn last_sample_not_after_end(seed: u64, span in 0..5_000i64, interval in 1..600u32) {
            let end = midnight() + TimeDelta::seconds(span);
            let mut config = Config::new(midnight(), end);
            config.interval = NonZeroU32::new(interval).unwrap();
            let last = sequence(config, seed).last().unwrap();
            prop_assert!(last.timestamp <= end);
            prop_assert!(last.timestamp + TimeDelta::seconds(i64::from(interval)) > end);
        }

        #[test]
        fn resetting_meters_never_compound(
            seed: u64,
            delta_meter: bool,
            volume in 0.0..1_000.0f64,
            min in 0..50i64,
            width in 0..50i64,
        ) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(50));
            config.meter_type = if delta_meter { MeterType::Delta } else { MeterType::Gauge };
            config.volume = volume;
            config.perturbation = Some(Perturbation::Integer(ConfRange::Inclusive { min, max: min + width }));
            for s in sequence(config, seed) {
                let offset = s.volume - volume;
                prop_assert!(offset >= min as f64 - 1e-9);
                prop_assert!(offset <= (min + width) as f64 + 1e-9);
            }
        }

        #[test]
        fn resetting_meters_hold_base_volume_without_perturbation(seed: u64, volume in -1_000.0..1_000.0f64) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(30));
            config.volume = volume;
            prop_assert!(sequence(config, seed).all(|s| s.volume == volume));
        }

        #[test]
        fn cumulative_volume_is_non_decreasing(seed: u64, min in 0.0..10.0f64, width in 0.0..10.0f64) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(100));
            config.meter_type = MeterType::Cumulative;
            config.perturbation = Some(Perturbation::Real(ConfRange::Inclusive { min, max: min + width }));
            let volumes: Vec<f64> = sequence(config, seed).map(|s| s.volume).collect();
            prop_assert!(volumes.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn cumulative_volume_with_negative_range_is_non_increasing(
            seed: u64,
            volume in 0.0..1_000.0f64,
            max in -10..=0i64,
            width in 0..10i64,
        ) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(100));
            config.meter_type = MeterType::Cumulative;
            config.volume = volume;
            config.perturbation = Some(Perturbation::Integer(ConfRange::Inclusive { min: max - width, max }));
            let volumes: Vec<f64> = sequence(config, seed).map(|s| s.volume).collect();
            prop_assert!(volumes[0] <= volume);
            prop_assert!(volumes.windows(2).all(|w| w[0] >= w[1]));
        }

        #[test]
        fn resources_drawn_from_fixed_pool(seed: u64, count in 1..32u32) {
            let mut config = Config::new(midnight(), midnight() + TimeDelta::seconds(200));
            config.resources_count = NonZeroU32::new(count).unwrap();
            let seq = sequence(config, seed);
            let pool: HashSet<String> = seq.resources().iter().cloned().collect();
            prop_assert_eq!(pool.len(), count as usize);
            for s in seq {
                prop_assert!(pool.contains(&s.resource_id));
            }
        }
    }
}
