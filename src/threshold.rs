// src/threshold.rs - Threshold comparison with hysteresis
//
// Each entry compares the value of one transform against a fixed threshold
// and emits one of two configured output codes. Once active, an entry stays
// active until the value moves back past the threshold by the dead zone
// width, which keeps the output from chattering on a noisy signal.
//
// The last boolean per entry is the only evaluation-to-evaluation state in
// the pipeline. It is created by the first available value and is left
// untouched by not-available or failed reads.

use crate::config::ParameterSet;
use crate::error::{Result, VigilError};
use crate::stage::ValueSource;
use crate::transform::TransformStage;
use crate::value::{Outcome, PendingValue};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// PARAMETERS
// ============================================================================

/// Comparison applied between the upstream value and the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl std::str::FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "greater" => Ok(Comparison::Greater),
            "greaterOrEqual" => Ok(Comparison::GreaterOrEqual),
            "less" => Ok(Comparison::Less),
            "lessOrEqual" => Ok(Comparison::LessOrEqual),
            other => Err(format!("unsupported comparison '{}'", other)),
        }
    }
}

impl Comparison {
    /// Activation test
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Less => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
        }
    }

    /// Clearing test for an active entry
    fn clears(self, value: f64, threshold: f64, dead_zone: f64) -> bool {
        match self {
            Comparison::Greater => value <= threshold - dead_zone,
            Comparison::GreaterOrEqual => value < threshold - dead_zone,
            Comparison::Less => value >= threshold + dead_zone,
            Comparison::LessOrEqual => value > threshold + dead_zone,
        }
    }
}

/// Codes delivered for the two boolean states
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputCodes {
    pub active: f64,
    pub inactive: f64,
}

impl OutputCodes {
    pub fn code(&self, active: bool) -> f64 {
        if active {
            self.active
        } else {
            self.inactive
        }
    }

    /// Whether a delivered value is the active code
    pub fn is_active(&self, value: f64) -> bool {
        value == self.active
    }
}

/// Typed threshold parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdParams {
    pub comparison: Comparison,
    pub threshold: f64,
    pub dead_zone: f64,
    pub codes: OutputCodes,
}

impl ThresholdParams {
    /// Next boolean state given the previous one
    pub fn evaluate(&self, previous: Option<bool>, value: f64) -> bool {
        match previous {
            Some(true) => !self.comparison.clears(value, self.threshold, self.dead_zone),
            _ => self.comparison.holds(value, self.threshold),
        }
    }
}

impl TryFrom<&ParameterSet> for ThresholdParams {
    type Error = VigilError;

    fn try_from(params: &ParameterSet) -> Result<Self> {
        let comparison = params.parse_or("name", Comparison::Greater)?;
        let threshold = params.f64_required("threshold", "threshold rule")?;
        let dead_zone = params.f64_or("deadZoneWidth", 0.0)?;
        if dead_zone < 0.0 {
            return Err(VigilError::InvalidParameter {
                key: "deadZoneWidth".to_string(),
                value: dead_zone.to_string(),
                reason: "dead zone width cannot be negative".to_string(),
            });
        }

        let codes = OutputCodes {
            active: params.f64_or("trueOutput", 1.0)?,
            inactive: params.f64_or("falseOutput", 0.0)?,
        };
        if codes.active == codes.inactive {
            return Err(VigilError::Config(format!(
                "trueOutput and falseOutput are both {}",
                codes.active
            )));
        }

        Ok(Self {
            comparison,
            threshold,
            dead_zone,
            codes,
        })
    }
}

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug)]
struct ThresholdEntry {
    id: String,
    upstream: String,
    params: ThresholdParams,
    last: Mutex<Option<bool>>,
}

impl ThresholdEntry {
    fn update(&self, value: f64) -> bool {
        let mut last = self.last.lock();
        let active = self.params.evaluate(*last, value);
        if *last != Some(active) {
            debug!("Threshold '{}' -> {} at {}", self.id, active, value);
        }
        *last = Some(active);
        active
    }
}

/// Boolean-coded alarm conditions derived from transform values
pub struct ThresholdStage {
    transform: Arc<TransformStage>,
    entries: DashMap<String, Arc<ThresholdEntry>>,
}

impl ThresholdStage {
    pub fn new(transform: Arc<TransformStage>) -> Self {
        Self {
            transform,
            entries: DashMap::new(),
        }
    }

    /// Register `id` as a threshold over the transform output `upstream`
    pub fn add_signal(&self, id: impl Into<String>, params: &ParameterSet, upstream: &str) -> Result<()> {
        let id = id.into();
        let params = ThresholdParams::try_from(params)?;
        if !self.transform.contains(upstream) {
            return Err(VigilError::UnknownSignal(upstream.to_string()));
        }

        match self.entries.entry(id) {
            Entry::Occupied(slot) => Err(VigilError::DuplicateSignal(slot.key().clone())),
            Entry::Vacant(slot) => {
                info!(
                    "Threshold '{}' <- '{}' ({:?} {}, dead zone {})",
                    slot.key(),
                    upstream,
                    params.comparison,
                    params.threshold,
                    params.dead_zone
                );
                let entry = ThresholdEntry {
                    id: slot.key().clone(),
                    upstream: upstream.to_string(),
                    params,
                    last: Mutex::new(None),
                };
                slot.insert(Arc::new(entry));
                Ok(())
            }
        }
    }

    fn entry(&self, id: &str) -> Result<Arc<ThresholdEntry>> {
        self.entries
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| VigilError::UnknownSignal(id.to_string()))
    }

    pub fn params(&self, id: &str) -> Result<ThresholdParams> {
        Ok(self.entry(id)?.params)
    }

    pub fn output_codes(&self, id: &str) -> Result<OutputCodes> {
        Ok(self.entry(id)?.params.codes)
    }

    /// Last evaluated state; `None` until the first available value
    pub fn last_state(&self, id: &str) -> Result<Option<bool>> {
        Ok(*self.entry(id)?.last.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ValueSource for ThresholdStage {
    fn stage_name(&self) -> &'static str {
        "threshold"
    }

    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn request(&self, id: &str) -> Result<PendingValue> {
        let entry = self.entry(id)?;
        let upstream = self.transform.request(&entry.upstream)?;
        Ok(upstream
            .map(move |outcome| match outcome {
                Outcome::Available(sample) => {
                    let active = entry.update(sample.value);
                    Outcome::Available(sample.with_value(entry.params.codes.code(active)))
                }
                other => other,
            })
            .boxed())
    }
}
