// src/transform.rs - Raw-to-engineering-unit conversion stage
use crate::config::ParameterSet;
use crate::driver::{ChannelBinding, ChannelRegistry};
use crate::error::{Result, VigilError};
use crate::stage::ValueSource;
use crate::value::PendingValue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

/// Conversion kinds understood by the `name` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Linear,
}

impl std::str::FromStr for TransformKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "linear" => Ok(TransformKind::Linear),
            other => Err(format!("unsupported conversion '{}'", other)),
        }
    }
}

/// Typed transform parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub kind: TransformKind,
    pub slope: f64,
    pub intercept: f64,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            kind: TransformKind::Linear,
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl TransformParams {
    /// `raw * slope + intercept`
    pub fn apply(&self, raw: f64) -> f64 {
        match self.kind {
            TransformKind::Linear => raw * self.slope + self.intercept,
        }
    }
}

impl TryFrom<&ParameterSet> for TransformParams {
    type Error = VigilError;

    fn try_from(params: &ParameterSet) -> Result<Self> {
        let defaults = TransformParams::default();
        Ok(Self {
            kind: params.parse_or("name", defaults.kind)?,
            slope: params.f64_or("slope", defaults.slope)?,
            intercept: params.f64_or("intercept", defaults.intercept)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct TransformEntry {
    binding: ChannelBinding,
    params: TransformParams,
}

/// Maps identifiers to driver channels and converts their readings
pub struct TransformStage {
    driver: Arc<ChannelRegistry>,
    entries: DashMap<String, TransformEntry>,
}

impl TransformStage {
    pub fn new(driver: Arc<ChannelRegistry>) -> Self {
        Self {
            driver,
            entries: DashMap::new(),
        }
    }

    /// Register `id` as a conversion of the driver channel `binding`
    pub fn add_signal(&self, id: impl Into<String>, params: &ParameterSet, binding: ChannelBinding) -> Result<()> {
        let id = id.into();
        let params = TransformParams::try_from(params)?;
        if !self.driver.contains(binding) {
            return Err(VigilError::UnknownChannel(binding));
        }

        match self.entries.entry(id) {
            Entry::Occupied(slot) => Err(VigilError::DuplicateSignal(slot.key().clone())),
            Entry::Vacant(slot) => {
                info!(
                    "Transform '{}' <- channel {} (slope {}, intercept {})",
                    slot.key(),
                    binding,
                    params.slope,
                    params.intercept
                );
                slot.insert(TransformEntry { binding, params });
                Ok(())
            }
        }
    }

    /// Conversion parameters of `id`
    pub fn params(&self, id: &str) -> Result<TransformParams> {
        self.entries
            .get(id)
            .map(|entry| entry.params)
            .ok_or_else(|| VigilError::UnknownSignal(id.to_string()))
    }

    /// Driver channel `id` reads from
    pub fn binding(&self, id: &str) -> Result<ChannelBinding> {
        self.entries
            .get(id)
            .map(|entry| entry.binding)
            .ok_or_else(|| VigilError::UnknownSignal(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ValueSource for TransformStage {
    fn stage_name(&self) -> &'static str {
        "transform"
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn request(&self, id: &str) -> Result<PendingValue> {
        let entry = *self
            .entries
            .get(id)
            .ok_or_else(|| VigilError::UnknownSignal(id.to_string()))?
            .value();
        let raw = self.driver.request(entry.binding)?;
        Ok(raw
            .map(move |outcome| outcome.map_value(|v| entry.params.apply(v)))
            .boxed())
    }
}
