//! Service configuration.
//!
//! A [`ServiceConfig`] can be deserialized from JSON or assembled from
//! environment variables. All fields have defaults except the vocabulary list,
//! which must name at least a source and a target vocabulary.
//!
//! | Env Var                | Field            | Default   |
//! |------------------------|------------------|-----------|
//! | `FERRY_VOCABS`         | `vocabs`         | (none)    |
//! | `FERRY_DEVICES`        | `devices`        | `cpu:0`   |
//! | `FERRY_QUEUE_CAPACITY` | `queue_capacity` | unbounded |
//! | `FERRY_MINI_BATCH`     | `mini_batch`     | `1`       |
//! | `FERRY_RIGHT_LEFT`     | `right_left`     | `false`   |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The kind of execution context a worker is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// One execution context. Each configured device gets exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceId {
    pub fn cpu(index: usize) -> Self {
        Self { kind: DeviceKind::Cpu, index }
    }

    pub fn gpu(index: usize) -> Self {
        Self { kind: DeviceKind::Gpu, index }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
        };
        write!(f, "{}:{}", kind, self.index)
    }
}

impl FromStr for DeviceId {
    type Err = ConfigError;

    /// Parses `cpu:0`, `gpu:3`, or a bare kind (`cpu`) meaning index 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue { key: "device", value: s.to_string() };
        let (kind, index) = match s.trim().split_once(':') {
            Some((kind, index)) => (kind, index.parse::<usize>().map_err(|_| invalid())?),
            None => (s.trim(), 0),
        };
        let kind = match kind.to_ascii_lowercase().as_str() {
            "cpu" => DeviceKind::Cpu,
            "gpu" => DeviceKind::Gpu,
            _ => return Err(invalid()),
        };
        Ok(Self { kind, index })
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.to_string()
    }
}

/// Configuration consumed by [`TranslationService::start`](crate::TranslationService::start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Vocabulary files. The first is the source side, the last the target side.
    pub vocabs: Vec<PathBuf>,
    /// One worker is started per device.
    pub devices: Vec<DeviceId>,
    /// Maximum number of queued jobs; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Maximum number of jobs a worker takes from the queue at once.
    pub mini_batch: usize,
    /// Whether the model decodes right-to-left.
    pub right_left: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            vocabs: Vec::new(),
            devices: vec![DeviceId::cpu(0)],
            queue_capacity: None,
            mini_batch: 1,
            right_left: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup. Unset
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(vocabs) = lookup("FERRY_VOCABS") {
            config.vocabs = split_list(&vocabs).map(PathBuf::from).collect();
        }

        if let Some(devices) = lookup("FERRY_DEVICES") {
            config.devices = split_list(&devices)
                .map(str::parse::<DeviceId>)
                .collect::<Result<_, _>>()?;
        }

        if let Some(capacity) = lookup("FERRY_QUEUE_CAPACITY") {
            config.queue_capacity = Some(parse_value("FERRY_QUEUE_CAPACITY", &capacity)?);
        }

        if let Some(mini_batch) = lookup("FERRY_MINI_BATCH") {
            config.mini_batch = parse_value("FERRY_MINI_BATCH", &mini_batch)?;
        }

        if let Some(right_left) = lookup("FERRY_RIGHT_LEFT") {
            config.right_left = parse_value("FERRY_RIGHT_LEFT", &right_left)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vocabs.len() < 2 {
            return Err(ConfigError::InsufficientVocabularies { found: self.vocabs.len() });
        }
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        if self.mini_batch == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mini_batch",
                value: self.mini_batch.to_string(),
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
