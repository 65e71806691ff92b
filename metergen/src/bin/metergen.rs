use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use metergen::{
    bound::{self, Bound},
    config,
    mode::{self, Mode, Summary},
    sink::{self, Sink},
};
use metergen_payload::{
    ConfRange, MeterType, Perturbation, SampleSequence,
    sequence::{self, default_name, default_resource_metadata, default_source},
};
use once_cell::sync::Lazy;
use rand::{SeedableRng, rngs::SmallRng};
use regex::Regex;
use tracing::info;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Invalid time window: {0}")]
    Bound(#[from] bound::Error),
    #[error("Unable to open output: {0}")]
    Sink(#[from] sink::Error),
    #[error("Payload generation failed: {0}")]
    Mode(#[from] mode::Error),
    #[error("Sample generation failed: {0}")]
    Payload(#[from] metergen_payload::Error),
}

#[derive(Default, Clone, Debug)]
struct CliKeyValues {
    inner: BTreeMap<String, String>,
}

impl CliKeyValues {
    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|s| s.as_str())
    }
}

impl FromStr for CliKeyValues {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // A key always matches `[[:alnum:]_]+` and is followed by '='. Pairs
        // are delimited by ',' but ',' may also appear inside a value, so the
        // next key marks where a value ends.
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"([[:alnum:]_]+)=").expect("Invalid regex pattern provided"));

        let lead = RE.find(input).map_or(input.len(), |m| m.start());
        if !input[..lead].is_empty() {
            return Err(format!("expected key=value pairs, found {:?}", &input[..lead]));
        }

        let mut labels = BTreeMap::default();

        for cap in RE.captures_iter(input) {
            let key = cap[1].to_string();
            let start = cap.get(0).expect("value 0 not found in Captures").end();

            // Find the next key or run into the end of the input.
            let end = RE.find_at(input, start).map_or(input.len(), |m| m.start());

            let value = input[start..end].trim_end_matches(',').to_string();

            labels.insert(key, value);
        }

        Ok(Self { inner: labels })
    }
}

/// One side of the perturbation range. Whole numbers keep the range
/// integral.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RandomBound {
    Integer(i64),
    Real(f64),
}

impl RandomBound {
    fn is_negative(self) -> bool {
        match self {
            Self::Integer(v) => v < 0,
            Self::Real(v) => v < 0.0,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Integer(v) => v as f64,
            Self::Real(v) => v,
        }
    }
}

impl FromStr for RandomBound {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(v) = input.parse::<i64>() {
            return Ok(Self::Integer(v));
        }
        input
            .parse::<f64>()
            .map(Self::Real)
            .map_err(|err| format!("'{input}' is not a number: {err}"))
    }
}

impl Display for RandomBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
        }
    }
}

/// A negative bound on either side disables perturbation.
fn perturbation(min: RandomBound, max: RandomBound) -> Option<Perturbation> {
    if min.is_negative() || max.is_negative() {
        return None;
    }
    Some(match (min, max) {
        (RandomBound::Integer(min), RandomBound::Integer(max)) => {
            Perturbation::Integer(ConfRange::Inclusive { min, max })
        }
        (min, max) => Perturbation::Real(ConfRange::Inclusive {
            min: min.as_f64(),
            max: max.as_f64(),
        }),
    })
}

#[derive(Parser, Debug)]
#[clap(version, about = "generate data to pump into a message bus", long_about = None)]
struct Args {
    /// file to store the generated data in
    #[clap(long)]
    file: PathBuf,
    /// type of notification payload to generate: polling, pipeline or
    /// notification
    #[clap(long = "type")]
    mode: Mode,
    /// number of samples aggregated in each notification payload
    #[clap(long, default_value_t = NonZeroUsize::MIN)]
    batch_count: NonZeroUsize,
    /// the period between samples, in seconds
    #[clap(long, default_value_t = NonZeroU32::MIN)]
    interval: NonZeroU32,
    /// number of days to step back from now, or a YYYY-MM-DDTHH:MM:SS date,
    /// defining the start of the time window
    #[clap(long, default_value = "31", allow_hyphen_values = true)]
    start: Bound,
    /// number of days to step forward from now, or a YYYY-MM-DDTHH:MM:SS date,
    /// defining the end of the time window
    #[clap(long, default_value = "2", allow_hyphen_values = true)]
    end: Bound,
    /// counter type: gauge, delta or cumulative
    #[clap(long, default_value_t = MeterType::Gauge)]
    meter_type: MeterType,
    /// counter unit
    #[clap(long)]
    unit: Option<String>,
    /// project id of owner
    #[clap(long = "project")]
    project_id: Option<String>,
    /// user id of owner
    #[clap(long = "user")]
    user_id: Option<String>,
    /// lower bound of the random amount added to the volume, negative disables
    #[clap(long = "random_min", default_value = "-1", allow_hyphen_values = true)]
    random_min: RandomBound,
    /// upper bound of the random amount added to the volume, negative disables
    #[clap(long = "random_max", default_value = "-1", allow_hyphen_values = true)]
    random_max: RandomBound,
    /// the number of different resources
    #[clap(long, default_value_t = NonZeroU32::MIN)]
    resources_count: NonZeroU32,
    /// the counter name for the meter data
    #[clap(long, default_value_t = default_name())]
    name: String,
    /// the amount to attach to the meter
    #[clap(long, default_value_t = 1.0, allow_hyphen_values = true)]
    volume: f64,
    /// origin tag of the samples
    #[clap(long, default_value_t = default_source())]
    source: String,
    /// resource metadata, format KEY=VAL,KEY2=VAL
    #[clap(long)]
    resource_metadata: Option<CliKeyValues>,
    /// seed for the random number generator
    #[clap(long)]
    seed: Option<u64>,
    /// host name used to name the pipeline publisher
    #[clap(long)]
    host: Option<String>,
    /// path on disk to a YAML configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
}

fn run(args: Args) -> Result<Summary, Error> {
    let mut config = config::load(args.config_path.as_deref())?;
    if let Some(host) = args.host {
        config.host = Some(host);
    }
    let host = config.host()?;

    let now = bound::now();
    let start = args.start.resolve_start(now)?;
    let end = args.end.resolve_end(now)?;
    info!("Generating samples from {start} to {end} every {}s", args.interval);

    let sequence_config = sequence::Config {
        name: args.name,
        meter_type: args.meter_type,
        unit: args.unit,
        user_id: args.user_id,
        project_id: args.project_id,
        start,
        end,
        interval: args.interval,
        volume: args.volume,
        perturbation: perturbation(args.random_min, args.random_max),
        resources_count: args.resources_count,
        resource_metadata: args
            .resource_metadata
            .map_or_else(default_resource_metadata, |kv| kv.inner),
        source: args.source,
    };
    let rng = match args.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    let samples = SampleSequence::new(sequence_config, rng)?;

    let mut sink = Sink::create(&args.file)?;
    let summary = mode::run(
        args.mode,
        args.batch_count,
        &host,
        &config.telemetry_secret,
        samples,
        &mut sink,
    )?;
    sink.finish()?;
    Ok(summary)
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting metergen {version} run.");

    let args = Args::parse();
    let summary = run(args)?;
    info!(
        "Wrote {} samples in {} lines. Bye. :)",
        summary.samples, summary.lines
    );
    Ok(())
}
