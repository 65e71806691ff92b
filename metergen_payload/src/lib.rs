//! The metergen payloads
//!
//! This library supports sample generation and envelope encoding for the
//! metergen project. A [`SampleSequence`] produces time-stamped [`Sample`]
//! instances, [`signature`] turns those into signed meter messages and
//! [`Envelope`] wraps a batch of messages for the message bus.

#![deny(clippy::cargo)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub use common::config::{ConfRange, Perturbation};
pub use envelope::{Envelope, Wire};
pub use sample::{MeterType, Sample};
pub use sequence::SampleSequence;
pub use signature::MeterMessage;

pub mod common;
pub mod envelope;
pub mod sample;
pub mod sequence;
pub mod signature;

/// Errors related to sample generation and serialization
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Json payload could not be encoded
    #[error("Json payload could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
    /// The signing key was rejected by the MAC
    #[error("Unable to key message signature: {0}")]
    Signature(#[from] hmac::digest::InvalidLength),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}
