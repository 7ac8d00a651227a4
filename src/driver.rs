// src/driver.rs - Driver channel registry and hardware transport boundary
use crate::config::ParameterSet;
use crate::error::{Result, VigilError};
use crate::value::{deliver, Outcome, PendingValue, Sample, SignalDescriptor, ValueCallback};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Stable address of a raw signal: device index and channel index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub device: u32,
    pub channel: u32,
}

impl ChannelBinding {
    pub const fn new(device: u32, channel: u32) -> Self {
        Self { device, channel }
    }
}

impl fmt::Display for ChannelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.device, self.channel)
    }
}

// ============================================================================
// DRIVER CONFIGURATION
// ============================================================================

/// Serial line parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "even" => Ok(Parity::Even),
            "odd" => Ok(Parity::Odd),
            other => Err(format!("unknown parity '{}'", other)),
        }
    }
}

/// Parameters used to open the field device
///
/// These are opaque to the pipeline; they are validated here and handed to
/// the [`Transport`] unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub addr: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name().to_string(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            addr: 0,
        }
    }
}

fn default_port_name() -> &'static str {
    if cfg!(windows) {
        "COM1"
    } else {
        "/dev/ttyS0"
    }
}

impl TryFrom<&ParameterSet> for DriverConfig {
    type Error = VigilError;

    fn try_from(params: &ParameterSet) -> Result<Self> {
        let defaults = DriverConfig::default();
        let config = DriverConfig {
            port_name: params
                .get("portName")
                .map(str::to_string)
                .unwrap_or(defaults.port_name),
            baud_rate: params.parse_or("baudRate", defaults.baud_rate)?,
            parity: params.parse_or("parity", defaults.parity)?,
            data_bits: params.parse_or("dataBits", defaults.data_bits)?,
            stop_bits: params.parse_or("stopBits", defaults.stop_bits)?,
            addr: params.parse_or("addr", defaults.addr)?,
        };

        if !(5..=8).contains(&config.data_bits) {
            return Err(VigilError::InvalidParameter {
                key: "dataBits".to_string(),
                value: config.data_bits.to_string(),
                reason: "expected 5 to 8".to_string(),
            });
        }
        if !matches!(config.stop_bits, 1 | 2) {
            return Err(VigilError::InvalidParameter {
                key: "stopBits".to_string(),
                value: config.stop_bits.to_string(),
                reason: "expected 1 or 2".to_string(),
            });
        }
        if config.baud_rate == 0 {
            return Err(VigilError::InvalidParameter {
                key: "baudRate".to_string(),
                value: "0".to_string(),
                reason: "baud rate must be positive".to_string(),
            });
        }
        Ok(config)
    }
}

// ============================================================================
// TRANSPORT BOUNDARY
// ============================================================================

/// Result of a single raw read from the transport
#[derive(Debug, Clone, PartialEq)]
pub enum RawRead {
    Available(f64),
    NotAvailable(String),
    Failed(String),
}

/// Hardware transport collaborator
///
/// Implementations own framing, checksums and the serial line itself; the
/// registry only opens the device once and then issues reads.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the device; failure here is fatal at startup
    async fn open(&self, config: &DriverConfig) -> Result<()>;

    /// Read the current value of one channel
    async fn read(&self, binding: ChannelBinding) -> RawRead;

    /// Short transport name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// CHANNEL REGISTRY
// ============================================================================

/// Maps driver channels to their descriptors and issues asynchronous reads
pub struct ChannelRegistry {
    config: DriverConfig,
    transport: Arc<dyn Transport>,
    channels: DashMap<ChannelBinding, Arc<SignalDescriptor>>,
}

impl ChannelRegistry {
    /// Parse the driver parameters and open the transport
    pub async fn open(params: &ParameterSet, transport: Arc<dyn Transport>) -> Result<Self> {
        let config = DriverConfig::try_from(params)?;
        transport.open(&config).await?;
        info!(
            "Opened {} driver on {} ({} baud, addr {})",
            transport.name(),
            config.port_name,
            config.baud_rate,
            config.addr
        );
        Ok(Self {
            config,
            transport,
            channels: DashMap::new(),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Register a descriptor for a channel; each binding registers once
    pub fn register_channel(&self, binding: ChannelBinding, descriptor: SignalDescriptor) -> Result<()> {
        match self.channels.entry(binding) {
            Entry::Occupied(_) => Err(VigilError::DuplicateChannel(binding)),
            Entry::Vacant(slot) => {
                debug!("Registered channel {} as '{}'", binding, descriptor.name);
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    pub fn contains(&self, binding: ChannelBinding) -> bool {
        self.channels.contains_key(&binding)
    }

    pub fn descriptor(&self, binding: ChannelBinding) -> Result<Arc<SignalDescriptor>> {
        self.channels
            .get(&binding)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(VigilError::UnknownChannel(binding))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Resolve `binding` now and return the read as a pending value
    pub fn request(&self, binding: ChannelBinding) -> Result<PendingValue> {
        let descriptor = self.descriptor(binding)?;
        let transport = Arc::clone(&self.transport);
        Ok(Box::pin(async move {
            match transport.read(binding).await {
                RawRead::Available(raw) => Outcome::Available(Sample::new(raw, descriptor)),
                RawRead::NotAvailable(msg) => Outcome::NotAvailable(msg),
                RawRead::Failed(msg) => Outcome::Failed(msg),
            }
        }))
    }

    /// Issue an asynchronous read; `callback` runs exactly once on a runtime
    /// task. Unregistered bindings, and calls made outside a tokio runtime,
    /// fail here, synchronously.
    pub fn request_value(&self, binding: ChannelBinding, callback: ValueCallback) -> Result<()> {
        deliver(self.request(binding)?, callback)
    }
}
