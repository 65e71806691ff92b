//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program.
//!
//! Configuration holds the values every generated message depends on but
//! that are not part of the sample itself: the host name publishers are
//! named after and the secret samples are signed with.

use std::{
    env, fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{debug, error};

/// Environment variable that, when set, holds the whole configuration as YAML
pub const CONFIG_ENV_VAR: &str = "METERGEN_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The operating system would not report a host name
    #[error("Failed to look up host name: {0}")]
    Hostname(#[from] nix::Error),
    /// The host name is not valid UTF-8
    #[error("Host name is not valid UTF-8")]
    HostnameEncoding,
}

fn default_telemetry_secret() -> String {
    "change this for valid signing".to_string()
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name of this node, used to name the pipeline publisher. Defaults to
    /// the operating system host name.
    #[serde(default)]
    pub host: Option<String>,
    /// Secret used to sign meter messages
    #[serde(default = "default_telemetry_secret")]
    pub telemetry_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            telemetry_secret: default_telemetry_secret(),
        }
    }
}

impl Config {
    /// The configured host name, falling back to the operating system's.
    ///
    /// # Errors
    ///
    /// Function will error if no host is configured and the operating system
    /// host name cannot be determined.
    pub fn host(&self) -> Result<String, Error> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }
        nix::unistd::gethostname()?
            .into_string()
            .map_err(|_| Error::HostnameEncoding)
    }
}

/// Parse YAML `contents` into a [`Config`].
///
/// # Errors
///
/// Function will error if `contents` is not a valid configuration.
pub fn parse(contents: &str) -> Result<Config, Error> {
    serde_yaml::from_str(contents).map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::SerdeYaml(err)
    })
}

/// Load configuration. The [`CONFIG_ENV_VAR`] environment variable wins over
/// `path`; with neither present the defaults are used.
///
/// # Errors
///
/// Function will error if the configuration source cannot be read or parsed.
pub fn load(path: Option<&Path>) -> Result<Config, Error> {
    if let Ok(env_var_value) = env::var(CONFIG_ENV_VAR) {
        debug!("Using config from env var '{CONFIG_ENV_VAR}'");
        return parse(&env_var_value);
    }
    let Some(path) = path else {
        debug!("No configuration given, using defaults");
        return Ok(Config::default());
    };

    debug!("Attempting to open configuration file at: {}", path.display());
    let mut contents = String::new();
    fs::OpenOptions::new()
        .read(true)
        .open(path)
        .and_then(|mut file| file.read_to_string(&mut contents))
        .map_err(|source| {
            error!("Could not read config file '{}': {}", path.display(), source);
            Error::ReadFile {
                path: path.to_path_buf(),
                source: Box::new(source),
            }
        })?;
    parse(&contents)
}
