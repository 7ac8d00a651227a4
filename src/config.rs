// src/config.rs - Parameter sets and file-level pipeline configuration

use crate::driver::ChannelBinding;
use crate::error::{Result, VigilError};
use crate::value::SignalDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// PARAMETER SETS
// ============================================================================

/// String-keyed option map handed to every stage at registration time
///
/// Unrecognized keys are ignored by the stages; each stage parses the keys it
/// knows into its own typed parameter struct.
///
/// # Examples
///
/// ```rust
/// use vigil::ParameterSet;
///
/// let params = ParameterSet::new()
///     .with("name", "linear")
///     .with("slope", "2.5");
/// assert_eq!(params.get("slope"), Some("2.5"));
/// assert_eq!(params.f64_or("intercept", 0.0)?, 0.0);
/// # Ok::<(), vigil::VigilError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ParamScalar>", into = "BTreeMap<String, String>")]
pub struct ParameterSet {
    values: BTreeMap<String, String>,
}

/// Scalars accepted as parameter values in configuration files
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ParamScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<BTreeMap<String, ParamScalar>> for ParameterSet {
    fn from(raw: BTreeMap<String, ParamScalar>) -> Self {
        let values = raw
            .into_iter()
            .map(|(key, scalar)| {
                let value = match scalar {
                    ParamScalar::Bool(b) => b.to_string(),
                    ParamScalar::Int(i) => i.to_string(),
                    ParamScalar::Float(f) => f.to_string(),
                    ParamScalar::Str(s) => s,
                };
                (key, value)
            })
            .collect();
        Self { values }
    }
}

impl From<ParameterSet> for BTreeMap<String, String> {
    fn from(params: ParameterSet) -> Self {
        params.values
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a key that must be present
    pub fn required(&self, key: &'static str, context: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| VigilError::MissingParameter {
            key,
            context: context.to_string(),
        })
    }

    /// Parse a key, falling back to `default` when absent
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => parse_value(key, raw),
            None => Ok(default),
        }
    }

    /// Parse a key that must be present
    pub fn parse_required<T>(&self, key: &'static str, context: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_value(key, self.required(key, context)?)
    }

    /// Finite floating point value, falling back to `default` when absent
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        let value = self.parse_or(key, default)?;
        ensure_finite(key, value)
    }

    /// Finite floating point value that must be present
    pub fn f64_required(&self, key: &'static str, context: &str) -> Result<f64> {
        let value = self.parse_required(key, context)?;
        ensure_finite(key, value)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| VigilError::InvalidParameter {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn ensure_finite(key: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(VigilError::InvalidParameter {
            key: key.to_string(),
            value: value.to_string(),
            reason: "value must be finite".to_string(),
        })
    }
}

// ============================================================================
// PIPELINE CONFIGURATION FILE
// ============================================================================

/// Complete pipeline configuration, loadable from YAML or JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Driver open parameters (`portName`, `baudRate`, ...)
    #[serde(default)]
    pub driver: ParameterSet,

    /// Raw channels exposed by the driver
    pub channels: Vec<ChannelConfig>,

    /// Linear conversions bound to driver channels
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,

    /// Threshold rules fed from transforms
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,

    /// Mask rules, each a parameter set with `alarmId` and `maskIds`
    #[serde(default)]
    pub masks: Vec<ParameterSet>,

    /// Acquisition timer
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Driver channel registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub device: u32,
    pub channel: u32,
    pub descriptor: SignalDescriptor,
}

impl ChannelConfig {
    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding::new(self.device, self.channel)
    }
}

/// Transform entry registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub id: String,
    pub device: u32,
    pub channel: u32,
    #[serde(default)]
    pub params: ParameterSet,
}

impl TransformConfig {
    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding::new(self.device, self.channel)
    }
}

/// Threshold entry registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub id: String,
    pub upstream: String,
    #[serde(default)]
    pub params: ParameterSet,
}

/// Acquisition scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Top-level identifiers requested on every tick
    #[serde(default)]
    pub signals: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            signals: Vec::new(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

impl PipelineConfig {
    /// Load a configuration file; `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };
        tracing::debug!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Shape checks that do not need the stages; reference resolution is left
    /// to stage registration.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.interval_ms == 0 {
            return Err(VigilError::Config(
                "scheduler interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The built-in plant: four analog channels on device 0, one linear
    /// transform and one greater-than alarm per channel, and alarm `sid:5`
    /// masked by the other three alarms.
    pub fn reference() -> Self {
        let port_name = if cfg!(windows) { "COM1" } else { "/dev/ttyS0" };
        let driver = ParameterSet::new()
            .with("portName", port_name)
            .with("baudRate", "9600")
            .with("parity", "none")
            .with("dataBits", "8")
            .with("stopBits", "1")
            .with("addr", "0");

        let channels = (0..4)
            .map(|channel| ChannelConfig {
                device: 0,
                channel,
                descriptor: SignalDescriptor::analog("N/A", 10.0, 1),
            })
            .collect();

        let transforms = (0..4)
            .map(|channel| TransformConfig {
                id: format!("sid:{}", channel),
                device: 0,
                channel,
                params: ParameterSet::new()
                    .with("name", "linear")
                    .with("slope", "1")
                    .with("intercept", "10000"),
            })
            .collect();

        let thresholds = (5..9)
            .map(|i| ThresholdConfig {
                id: format!("sid:{}", i),
                upstream: format!("sid:{}", i - 5),
                params: ParameterSet::new()
                    .with("name", "greater")
                    .with("threshold", "10080")
                    .with("deadZoneWidth", "1")
                    .with("trueOutput", "1")
                    .with("falseOutput", "0"),
            })
            .collect();

        let masks = vec![ParameterSet::new()
            .with("alarmId", "sid:5")
            .with("maskIds", "sid:6, sid:7, sid:8")];

        Self {
            driver,
            channels,
            transforms,
            thresholds,
            masks,
            scheduler: SchedulerConfig {
                interval_ms: default_interval_ms(),
                signals: (5..9).map(|i| format!("sid:{}", i)).collect(),
            },
        }
    }
}
