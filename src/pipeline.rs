// src/pipeline.rs - Wiring of driver, transform, threshold and mask stages
use crate::config::PipelineConfig;
use crate::driver::{ChannelRegistry, Transport};
use crate::error::{Result, VigilError};
use crate::mask::MaskStage;
use crate::report::OutcomeReporter;
use crate::scheduler::AcquisitionScheduler;
use crate::stage::ValueSource;
use crate::threshold::ThresholdStage;
use crate::transform::TransformStage;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The four stages of one alarm chain, registered from a [`PipelineConfig`]
pub struct Pipeline {
    driver: Arc<ChannelRegistry>,
    transform: Arc<TransformStage>,
    threshold: Arc<ThresholdStage>,
    mask: Arc<MaskStage>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Open the driver and register every configured entry, bottom stage
    /// first. Any rejected registration, or a polled signal that no stage
    /// knows, aborts construction.
    pub async fn from_config(config: &PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let driver = Arc::new(ChannelRegistry::open(&config.driver, transport).await?);
        for channel in &config.channels {
            driver.register_channel(channel.binding(), channel.descriptor.clone())?;
        }

        let transform = Arc::new(TransformStage::new(Arc::clone(&driver)));
        for entry in &config.transforms {
            transform.add_signal(entry.id.as_str(), &entry.params, entry.binding())?;
        }

        let threshold = Arc::new(ThresholdStage::new(Arc::clone(&transform)));
        for entry in &config.thresholds {
            threshold.add_signal(entry.id.as_str(), &entry.params, &entry.upstream)?;
        }

        let mask = Arc::new(MaskStage::new(Arc::clone(&threshold)));
        for params in &config.masks {
            mask.add_mask(params)?;
        }

        // Polled identifiers resolve now rather than failing on every tick
        if let Some(id) = config.scheduler.signals.iter().find(|id| !mask.contains(id)) {
            return Err(VigilError::UnknownSignal(id.clone()));
        }

        info!(
            "Pipeline ready: {} channels, {} transforms, {} thresholds, {} mask rules",
            driver.len(),
            transform.len(),
            threshold.len(),
            mask.rule_count()
        );

        Ok(Self {
            driver,
            transform,
            threshold,
            mask,
            config: config.clone(),
        })
    }

    pub fn driver(&self) -> &Arc<ChannelRegistry> {
        &self.driver
    }

    pub fn transform(&self) -> &Arc<TransformStage> {
        &self.transform
    }

    pub fn threshold(&self) -> &Arc<ThresholdStage> {
        &self.threshold
    }

    /// Top of the chain; every alarm request goes through here
    pub fn mask(&self) -> &Arc<MaskStage> {
        &self.mask
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Scheduler polling the configured top-level signals through the mask
    /// stage
    pub fn scheduler(&self, reporter: Arc<dyn OutcomeReporter>) -> Result<AcquisitionScheduler> {
        AcquisitionScheduler::new(
            Arc::clone(&self.mask) as _,
            reporter,
            Duration::from_millis(self.config.scheduler.interval_ms),
            self.config.scheduler.signals.clone(),
        )
    }
}

#[cfg(all(test, feature = "simulation"))]
mod tests {
    use super::*;
    use crate::config::ParameterSet;
    use crate::simulation::SimulatedTransport;

    #[tokio::test]
    async fn test_reference_pipeline_registers_everything() {
        let pipeline = Pipeline::from_config(&PipelineConfig::reference(), Arc::new(SimulatedTransport::new()))
            .await
            .unwrap();
        assert_eq!(pipeline.driver().len(), 4);
        assert_eq!(pipeline.transform().len(), 4);
        assert_eq!(pipeline.threshold().len(), 4);
        assert_eq!(pipeline.mask().rule_count(), 1);
        assert!(pipeline.mask().contains("sid:8"));
        assert!(!pipeline.mask().contains("sid:0"));
    }

    #[tokio::test]
    async fn test_failed_open_aborts_construction() {
        let transport = Arc::new(SimulatedTransport::new());
        transport.refuse_open(true);
        let result = Pipeline::from_config(&PipelineConfig::reference(), transport).await;
        assert!(matches!(result, Err(VigilError::Transport(_))));
    }

    #[tokio::test]
    async fn test_dangling_threshold_upstream_rejected() {
        let mut config = PipelineConfig::reference();
        config.thresholds[0].upstream = "sid:99".to_string();
        let result = Pipeline::from_config(&config, Arc::new(SimulatedTransport::new())).await;
        assert!(matches!(result, Err(VigilError::UnknownSignal(id)) if id == "sid:99"));
    }

    #[tokio::test]
    async fn test_unknown_polled_signal_rejected() {
        let mut config = PipelineConfig::reference();
        config.scheduler.signals.push("sid:99".to_string());
        let result = Pipeline::from_config(&config, Arc::new(SimulatedTransport::new())).await;
        assert!(matches!(result, Err(VigilError::UnknownSignal(id)) if id == "sid:99"));
    }

    #[tokio::test]
    async fn test_unmasked_threshold_may_be_polled() {
        let mut config = PipelineConfig::reference();
        config.scheduler.signals = vec!["sid:6".to_string()];
        let pipeline = Pipeline::from_config(&config, Arc::new(SimulatedTransport::new()))
            .await
            .unwrap();
        assert_eq!(pipeline.config().scheduler.signals, vec!["sid:6"]);
    }

    #[tokio::test]
    async fn test_cyclic_mask_config_rejected() {
        let mut config = PipelineConfig::reference();
        config.masks.push(
            ParameterSet::new()
                .with("alarmId", "sid:6")
                .with("maskIds", "sid:5"),
        );
        let result = Pipeline::from_config(&config, Arc::new(SimulatedTransport::new())).await;
        assert!(matches!(result, Err(VigilError::MaskCycle { .. })));
    }
}
