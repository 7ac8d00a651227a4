//! VIGIL - Alarm evaluation pipeline for industrial analog inputs
//!
//! A chain of four stages, each answering value requests on behalf of the
//! one above it:
//!
//! - **Driver** ([`driver`]): reads raw values from hardware channels
//! - **Transform** ([`transform`]): converts raw readings to engineering units
//! - **Threshold** ([`threshold`]): turns values into alarm codes with hysteresis
//! - **Mask** ([`mask`]): suppresses an alarm while any of its masks is active
//!
//! An [`AcquisitionScheduler`] polls the top-level alarm identifiers on a fixed
//! interval and hands every outcome to an [`OutcomeReporter`].
//!
//! # Feature Flags
//!
//! - `simulation` (default): in-memory [`simulation::SimulatedTransport`] and
//!   the `vigil` demo binary
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil::{Pipeline, PipelineConfig, TracingReporter};
//! use vigil::simulation::SimulatedTransport;
//!
//! # async fn run() -> vigil::Result<()> {
//! vigil::init();
//!
//! let config = PipelineConfig::reference();
//! let pipeline = Pipeline::from_config(&config, Arc::new(SimulatedTransport::new())).await?;
//! let handle = pipeline.scheduler(Arc::new(TracingReporter))?.spawn();
//!
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by every stage
pub mod error;

/// Samples, descriptors and request outcomes
pub mod value;

/// Parameter sets and pipeline configuration files
pub mod config;

/// The value-request contract between stages
pub mod stage;

// ============================================================================
// PIPELINE STAGES
// ============================================================================

/// Hardware channel registry and transport abstraction
pub mod driver;

/// Linear conversion of raw readings
pub mod transform;

/// Hysteresis threshold comparators
pub mod threshold;

/// Alarm suppression rules
pub mod mask;

// ============================================================================
// ACQUISITION
// ============================================================================

/// Outcome reporting
pub mod report;

/// Fixed-interval polling of top-level signals
pub mod scheduler;

/// Composition of the four stages from configuration
pub mod pipeline;

/// In-memory transport
#[cfg(feature = "simulation")]
pub mod simulation;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{ParameterSet, PipelineConfig, SchedulerConfig};
pub use driver::{ChannelBinding, ChannelRegistry, DriverConfig, RawRead, Transport};
pub use error::{Result, VigilError};
pub use mask::{MaskParams, MaskStage};
pub use pipeline::Pipeline;
pub use report::{ChannelReporter, OutcomeReport, OutcomeReporter, TracingReporter};
pub use scheduler::{AcquisitionScheduler, SchedulerHandle, SchedulerStats};
pub use stage::ValueSource;
pub use threshold::{Comparison, OutputCodes, ThresholdParams, ThresholdStage};
pub use transform::{TransformParams, TransformStage};
pub use value::{Outcome, OutcomeKind, PendingValue, Sample, SignalDescriptor, SignalKind, ValueCallback};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// VIGIL version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("VIGIL_GIT_HASH");

    pub const BUILD_TIMESTAMP: &str = env!("VIGIL_BUILD_TIMESTAMP");

    pub const RUSTC_VERSION: &str = env!("VIGIL_RUSTC_VERSION");

    pub const TARGET: &str = env!("VIGIL_TARGET");

    /// Build profile (debug/release)
    pub const PROFILE: &str = env!("VIGIL_PROFILE");
}

/// Install the default tracing subscriber
///
/// Honors `RUST_LOG` and falls back to `vigil=info`. Calling it again, or
/// after another subscriber was installed, has no effect.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
