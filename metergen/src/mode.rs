//! Batching of signed samples into message-bus envelopes.
//!
//! A [`Mode`] decides how a batch is wrapped and where it is routed. Samples
//! are signed as they arrive and collected until `batch_count` are held, then
//! flushed as one envelope line. A final partial batch is flushed the same
//! way.

use std::{collections::BTreeMap, fmt, io::Write, num::NonZeroUsize, str::FromStr};

use metergen_payload::{Envelope, MeterMessage, Sample};
use serde::Serialize;
use tracing::{debug, info};

use crate::sink::{self, Sink};

const EXCHANGE: &str = "ceilometer";
const POLLING_ROUTING_KEY: &str = "notifications.sample";
const POLLING_PUBLISHER: &str = "ceilometer.polling";
const POLLING_EVENT_TYPE: &str = "telemetry.polling";
const PIPELINE_ROUTING_KEY: &str = "metering.sample";
const PIPELINE_PUBLISHER_PREFIX: &str = "telemetry.publisher";
const PIPELINE_EVENT_TYPE: &str = "metering";

/// Errors produced while batching
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The selected mode has no handler
    #[error("Mode '{0}' is not supported")]
    UnsupportedMode(Mode),
    /// See [`metergen_payload::Error`]
    #[error(transparent)]
    Payload(#[from] metergen_payload::Error),
    /// See [`sink::Error`]
    #[error(transparent)]
    Sink(#[from] sink::Error),
}

/// Shape of the generated notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Batches wrapped as `{"samples": [...]}`, as a polling agent emits them
    Polling,
    /// Bare batches, as a publishing pipeline emits them
    Pipeline,
    /// Reserved, no handler exists
    Notification,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Polling => "polling",
            Self::Pipeline => "pipeline",
            Self::Notification => "notification",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "polling" => Ok(Self::Polling),
            "pipeline" => Ok(Self::Pipeline),
            "notification" => Ok(Self::Notification),
            other => Err(format!(
                "unknown type '{other}', expected one of polling, pipeline, notification"
            )),
        }
    }
}

/// Envelope payload
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Payload<'a> {
    /// Polling payload, the batch under a `samples` key
    Polling {
        /// The batch
        samples: &'a [MeterMessage],
    },
    /// Pipeline payload, the batch itself
    Pipeline(&'a [MeterMessage]),
}

/// Where and how a batch is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    mode: Mode,
    /// Exchange the line is addressed to
    pub exchange: &'static str,
    /// Routing key the line is addressed to
    pub routing_key: &'static str,
    /// Publisher stamped on the envelope
    pub publisher_id: String,
    /// Event type stamped on the envelope
    pub event_type: &'static str,
}

impl Route {
    /// Resolve the route for `mode`. Pipeline publishers are named after
    /// `host`.
    ///
    /// # Errors
    ///
    /// Function will error if `mode` has no handler.
    pub fn new(mode: Mode, host: &str) -> Result<Self, Error> {
        match mode {
            Mode::Polling => Ok(Self {
                mode,
                exchange: EXCHANGE,
                routing_key: POLLING_ROUTING_KEY,
                publisher_id: POLLING_PUBLISHER.to_string(),
                event_type: POLLING_EVENT_TYPE,
            }),
            Mode::Pipeline => Ok(Self {
                mode,
                exchange: EXCHANGE,
                routing_key: PIPELINE_ROUTING_KEY,
                publisher_id: format!("{PIPELINE_PUBLISHER_PREFIX}.{host}"),
                event_type: PIPELINE_EVENT_TYPE,
            }),
            Mode::Notification => Err(Error::UnsupportedMode(mode)),
        }
    }

    fn payload<'a>(&self, batch: &'a [MeterMessage]) -> Payload<'a> {
        match self.mode {
            Mode::Polling => Payload::Polling { samples: batch },
            Mode::Pipeline | Mode::Notification => Payload::Pipeline(batch),
        }
    }

    /// Wrap `batch` in an envelope and append it to `sink` as one line.
    ///
    /// # Errors
    ///
    /// Function will error if the envelope cannot be encoded or written.
    pub fn flush<W>(&self, batch: &[MeterMessage], sink: &mut Sink<W>) -> Result<(), Error>
    where
        W: Write,
    {
        let envelope = Envelope::new(
            self.publisher_id.as_str(),
            self.event_type,
            self.payload(batch),
        );
        let wire = envelope.serialize(&BTreeMap::new())?;
        sink.write_record(self.exchange, self.routing_key, &wire)?;
        debug!(
            samples = batch.len(),
            message_id = %envelope.message_id,
            "flushed batch"
        );
        Ok(())
    }
}

/// Totals of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    /// Samples written
    pub samples: u64,
    /// Lines written
    pub lines: u64,
}

/// Sign every sample, batch and write to `sink` per `mode`.
///
/// # Errors
///
/// Function will error if `mode` has no handler, a sample cannot be signed or
/// a batch cannot be written. Lines flushed before the error stay written.
pub fn run<I, W>(
    mode: Mode,
    batch_count: NonZeroUsize,
    host: &str,
    secret: &str,
    samples: I,
    sink: &mut Sink<W>,
) -> Result<Summary, Error>
where
    I: IntoIterator<Item = Sample>,
    W: Write,
{
    let route = Route::new(mode, host)?;
    info!(
        mode = %mode,
        publisher = %route.publisher_id,
        batch_count = batch_count.get(),
        "generating payloads"
    );

    let mut summary = Summary::default();
    let mut batch: Vec<MeterMessage> = Vec::with_capacity(batch_count.get());
    for sample in samples {
        batch.push(MeterMessage::from_sample(&sample, secret)?);
        if batch.len() >= batch_count.get() {
            route.flush(&batch, sink)?;
            summary.samples += batch.len() as u64;
            summary.lines += 1;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        route.flush(&batch, sink)?;
        summary.samples += batch.len() as u64;
        summary.lines += 1;
    }
    Ok(summary)
}
