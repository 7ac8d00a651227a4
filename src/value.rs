// src/value.rs - Signal descriptors, samples and the three-way request outcome
use crate::error::{Result, VigilError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Kind of a raw driver signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Analog input
    AnalogInput,
    /// Anything the pipeline does not interpret further
    Other,
}

impl Default for SignalKind {
    fn default() -> Self {
        SignalKind::AnalogInput
    }
}

/// Immutable description of a raw driver signal
///
/// # Examples
///
/// ```rust
/// use vigil::SignalDescriptor;
///
/// let descriptor = SignalDescriptor::analog("N/A", 10.0, 1);
/// assert_eq!(descriptor.format(23.456), "23.5");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    /// Signal kind
    #[serde(default)]
    pub kind: SignalKind,
    /// Display name
    pub name: String,
    /// Scale factor reported by the device
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Number of decimals used when rendering values
    #[serde(default)]
    pub precision: usize,
    /// Engineering units
    #[serde(default)]
    pub units: String,
}

fn default_scale() -> f64 {
    1.0
}

impl SignalDescriptor {
    /// Analog input descriptor without units
    pub fn analog(name: impl Into<String>, scale: f64, precision: usize) -> Self {
        Self {
            kind: SignalKind::AnalogInput,
            name: name.into(),
            scale,
            precision,
            units: String::new(),
        }
    }

    /// Attach engineering units
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Render a value with this descriptor's precision and units
    pub fn format(&self, value: f64) -> String {
        if self.units.is_empty() {
            format!("{:.*}", self.precision, value)
        } else {
            format!("{:.*} {}", self.precision, value, self.units)
        }
    }
}

/// A value delivered by a stage together with the descriptor of the driver
/// channel it originates from
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub descriptor: Arc<SignalDescriptor>,
}

impl Sample {
    pub fn new(value: f64, descriptor: Arc<SignalDescriptor>) -> Self {
        Self { value, descriptor }
    }

    /// Same origin, different value
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            descriptor: Arc::clone(&self.descriptor),
        }
    }

    /// Descriptor display name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Value rendered with the descriptor's precision
    pub fn display(&self) -> String {
        self.descriptor.format(self.value)
    }
}

/// Result of an asynchronous value request
///
/// Not-available and failed are ordinary values, not errors: every stage
/// inspects the variant and decides what to forward.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A value is present
    Available(Sample),
    /// The channel exists but has no data yet
    NotAvailable(String),
    /// Transport or protocol fault
    Failed(String),
}

/// Discriminant of [`Outcome`], used for reporting and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Available,
    NotAvailable,
    Failed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Available => write!(f, "available"),
            OutcomeKind::NotAvailable => write!(f, "not-available"),
            OutcomeKind::Failed => write!(f, "failed"),
        }
    }
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Available(_) => OutcomeKind::Available,
            Outcome::NotAvailable(_) => OutcomeKind::NotAvailable,
            Outcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// Numeric value, if available
    pub fn value(&self) -> Option<f64> {
        match self {
            Outcome::Available(sample) => Some(sample.value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Transform the value of an available outcome, passing the other
    /// variants through unchanged
    pub fn map_value<F>(self, f: F) -> Outcome
    where
        F: FnOnce(f64) -> f64,
    {
        match self {
            Outcome::Available(sample) => {
                let value = f(sample.value);
                Outcome::Available(Sample { value, ..sample })
            }
            other => other,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Available(sample) => write!(f, "{} = {}", sample.name(), sample.display()),
            Outcome::NotAvailable(msg) => write!(f, "signal not available - {}", msg),
            Outcome::Failed(msg) => write!(f, "request failed - {}", msg),
        }
    }
}

/// Callback receiving the outcome of a single request, exactly once
pub type ValueCallback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Outcome of a request that has been resolved but not yet completed
pub type PendingValue = BoxFuture<'static, Outcome>;

/// Hand a pending request to the runtime and deliver its outcome to
/// `callback` from the spawned task, never from the caller's stack.
///
/// Fails without running `callback` when called outside a tokio runtime.
pub(crate) fn deliver(pending: PendingValue, callback: ValueCallback) -> Result<()> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| VigilError::Config(format!("value requested outside a tokio runtime: {}", e)))?;
    handle.spawn(async move {
        callback(pending.await);
    });
    Ok(())
}
