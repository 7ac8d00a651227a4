// src/report.rs - Outcome reporting to the observability collaborator
use crate::error::VigilError;
use crate::value::{Outcome, OutcomeKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// One completed request, as seen by the acquisition scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeReport {
    /// Scheduler tick that issued the request
    pub tick: u64,
    pub signal: String,
    pub kind: OutcomeKind,
    pub value: Option<f64>,
    /// Value rendered with the channel precision
    pub display: Option<String>,
    /// Descriptor name of the originating channel
    pub source: Option<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeReport {
    pub fn from_outcome(tick: u64, signal: impl Into<String>, outcome: &Outcome) -> Self {
        let mut report = Self {
            tick,
            signal: signal.into(),
            kind: outcome.kind(),
            value: None,
            display: None,
            source: None,
            reason: None,
            timestamp: Utc::now(),
        };
        match outcome {
            Outcome::Available(sample) => {
                report.value = Some(sample.value);
                report.display = Some(sample.display());
                report.source = Some(sample.name().to_string());
            }
            Outcome::NotAvailable(reason) | Outcome::Failed(reason) => {
                report.reason = Some(reason.clone());
            }
        }
        report
    }

    /// A request the stage refused before issuing it
    pub fn rejected(tick: u64, signal: impl Into<String>, err: &VigilError) -> Self {
        Self::from_outcome(tick, signal, &Outcome::Failed(err.to_string()))
    }
}

/// Receives an [`OutcomeReport`] for every completed request
pub trait OutcomeReporter: Send + Sync {
    fn report(&self, report: OutcomeReport);
}

/// Writes each report as a structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl OutcomeReporter for TracingReporter {
    fn report(&self, report: OutcomeReport) {
        let reason = report.reason.as_deref().unwrap_or_default();
        match report.kind {
            OutcomeKind::Available => info!(
                tick = report.tick,
                signal = %report.signal,
                source = report.source.as_deref().unwrap_or_default(),
                "value = {}",
                report.display.as_deref().unwrap_or_default()
            ),
            OutcomeKind::NotAvailable => warn!(
                tick = report.tick,
                signal = %report.signal,
                "signal not available - {}",
                reason
            ),
            OutcomeKind::Failed => error!(
                tick = report.tick,
                signal = %report.signal,
                "request failed - {}",
                reason
            ),
        }
    }
}

/// Forwards every report into an unbounded channel
///
/// Reports are only lost once the receiver has been dropped.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<OutcomeReport>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::UnboundedSender<OutcomeReport>) -> Self {
        Self { tx }
    }

    /// Reporter plus the receiving end of a fresh channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutcomeReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl OutcomeReporter for ChannelReporter {
    fn report(&self, report: OutcomeReport) {
        if let Err(e) = self.tx.send(report) {
            warn!("Outcome report for '{}' dropped: receiver closed", e.0.signal);
        }
    }
}
