// src/simulation.rs
// In-memory transport for the demo binary and the test suite

use crate::driver::{ChannelBinding, DriverConfig, RawRead, Transport};
use crate::error::{Result, VigilError};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone)]
enum ChannelState {
    Value(f64),
    Failed(String),
}

/// Transport whose channel values are set by the caller
///
/// Channels that were never written report not-available, like a device
/// that has not been polled yet.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    channels: DashMap<ChannelBinding, ChannelState>,
    latency: DashMap<ChannelBinding, Duration>,
    noise_amplitude: Option<f64>,
    refuse_open: AtomicBool,
    reads: AtomicU64,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add uniform noise in `[-amplitude, amplitude]` to every available read
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = Some(amplitude.abs());
        self
    }

    /// Make the next `open` fail, as an absent serial port would
    pub fn refuse_open(&self, refuse: bool) {
        self.refuse_open.store(refuse, Ordering::Relaxed);
    }

    pub fn set_value(&self, binding: ChannelBinding, value: f64) {
        self.channels.insert(binding, ChannelState::Value(value));
    }

    pub fn set_failed(&self, binding: ChannelBinding, reason: impl Into<String>) {
        self.channels.insert(binding, ChannelState::Failed(reason.into()));
    }

    /// Forget the channel value so reads report not-available again
    pub fn clear(&self, binding: ChannelBinding) {
        self.channels.remove(&binding);
    }

    /// Delay every read of `binding`
    pub fn set_latency(&self, binding: ChannelBinding, latency: Duration) {
        self.latency.insert(binding, latency);
    }

    /// Total number of reads served
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn noise(&self) -> f64 {
        match self.noise_amplitude {
            Some(amplitude) if amplitude > 0.0 => {
                rand::thread_rng().gen_range(-amplitude..=amplitude)
            }
            _ => 0.0,
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn open(&self, config: &DriverConfig) -> Result<()> {
        if self.refuse_open.load(Ordering::Relaxed) {
            return Err(VigilError::Transport(format!(
                "cannot open {}",
                config.port_name
            )));
        }
        Ok(())
    }

    async fn read(&self, binding: ChannelBinding) -> RawRead {
        let latency = self.latency.get(&binding).map(|d| *d.value());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.reads.fetch_add(1, Ordering::Relaxed);

        let state = self.channels.get(&binding).map(|s| s.value().clone());
        let read = match state {
            Some(ChannelState::Value(v)) => RawRead::Available(v + self.noise()),
            Some(ChannelState::Failed(reason)) => RawRead::Failed(reason),
            None => RawRead::NotAvailable(format!("channel {} not polled yet", binding)),
        };
        trace!("Simulated read {} -> {:?}", binding, read);
        read
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unwritten_channel_is_not_available() {
        let transport = SimulatedTransport::new();
        let read = transport.read(ChannelBinding::new(0, 0)).await;
        assert!(matches!(read, RawRead::NotAvailable(_)));
        assert_eq!(transport.read_count(), 1);
    }

    #[tokio::test]
    async fn test_noise_stays_in_band() {
        let transport = SimulatedTransport::new().with_noise(0.5);
        let binding = ChannelBinding::new(0, 1);
        transport.set_value(binding, 10.0);
        for _ in 0..50 {
            match transport.read(binding).await {
                RawRead::Available(v) => assert!((9.5..=10.5).contains(&v)),
                other => panic!("unexpected read {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_refused_open() {
        let transport = SimulatedTransport::new();
        transport.refuse_open(true);
        let err = transport.open(&DriverConfig::default()).await.unwrap_err();
        assert!(matches!(err, VigilError::Transport(_)));
    }
}
