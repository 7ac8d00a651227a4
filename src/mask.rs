// src/mask.rs - Alarm suppression by related alarms
//
// A mask rule names one alarm and the alarms that mask it. While any mask
// alarm is active, the masked alarm is reported with its inactive code.
//
// Evaluation requests the alarm and all of its masks from the threshold
// stage at once and waits for every one of them. A failed sub-request fails
// the whole evaluation: no masking decision is made on partial data. A mask
// with no data yet counts as inactive.

use crate::config::ParameterSet;
use crate::error::{Result, VigilError};
use crate::stage::ValueSource;
use crate::threshold::{OutputCodes, ThresholdStage};
use crate::value::{Outcome, PendingValue};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Typed mask rule parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskParams {
    pub alarm_id: String,
    pub mask_ids: Vec<String>,
}

impl TryFrom<&ParameterSet> for MaskParams {
    type Error = VigilError;

    fn try_from(params: &ParameterSet) -> Result<Self> {
        let alarm_id = params.required("alarmId", "mask rule")?.trim().to_string();
        if alarm_id.is_empty() {
            return Err(VigilError::InvalidParameter {
                key: "alarmId".to_string(),
                value: String::new(),
                reason: "identifier cannot be empty".to_string(),
            });
        }

        let raw = params.required("maskIds", "mask rule")?;
        let mut seen = HashSet::new();
        let mask_ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect();
        if mask_ids.is_empty() {
            return Err(VigilError::InvalidParameter {
                key: "maskIds".to_string(),
                value: raw.to_string(),
                reason: "at least one mask identifier is required".to_string(),
            });
        }

        Ok(Self { alarm_id, mask_ids })
    }
}

#[derive(Debug)]
struct MaskRule {
    alarm_id: String,
    alarm_codes: OutputCodes,
    masks: Vec<(String, OutputCodes)>,
}

impl MaskRule {
    /// Combine the alarm outcome (first) with the mask outcomes
    fn aggregate(&self, mut outcomes: Vec<Outcome>) -> Outcome {
        let failures: Vec<String> = outcomes
            .iter()
            .zip(std::iter::once(self.alarm_id.as_str()).chain(self.masks.iter().map(|(id, _)| id.as_str())))
            .filter_map(|(outcome, id)| match outcome {
                Outcome::Failed(reason) => Some(format!("{}: {}", id, reason)),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            return Outcome::Failed(failures.join("; "));
        }

        let own = outcomes.remove(0);
        let suppressing: Vec<&str> = outcomes
            .iter()
            .zip(&self.masks)
            .filter(|(outcome, (_, codes))| matches!(outcome.value(), Some(v) if codes.is_active(v)))
            .map(|(_, (id, _))| id.as_str())
            .collect();

        match own {
            Outcome::Available(sample) if !suppressing.is_empty() => {
                debug!("Alarm '{}' masked by {:?}", self.alarm_id, suppressing);
                Outcome::Available(sample.with_value(self.alarm_codes.inactive))
            }
            other => other,
        }
    }
}

/// Top-level stage: masked alarms plus pass-through for every other
/// threshold identifier
pub struct MaskStage {
    threshold: Arc<ThresholdStage>,
    rules: RwLock<HashMap<String, Arc<MaskRule>>>,
}

impl MaskStage {
    pub fn new(threshold: Arc<ThresholdStage>) -> Self {
        Self {
            threshold,
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Register a mask rule from `alarmId` / `maskIds` parameters
    ///
    /// Fails without changing any rule when an identifier is unknown to the
    /// threshold stage, when the alarm already has a rule, or when the rule
    /// would make an alarm mask itself directly or transitively.
    pub fn add_mask(&self, params: &ParameterSet) -> Result<()> {
        let params = MaskParams::try_from(params)?;
        let alarm_codes = self.threshold.output_codes(&params.alarm_id)?;
        let masks = params
            .mask_ids
            .iter()
            .map(|id| Ok((id.clone(), self.threshold.output_codes(id)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut rules = self.rules.write();
        if rules.contains_key(&params.alarm_id) {
            return Err(VigilError::DuplicateSignal(params.alarm_id));
        }
        for mask_id in &params.mask_ids {
            if reaches(&rules, mask_id, &params.alarm_id) {
                return Err(VigilError::MaskCycle {
                    alarm: params.alarm_id,
                    via: mask_id.clone(),
                });
            }
        }

        info!("Mask '{}' <- {:?}", params.alarm_id, params.mask_ids);
        let rule = MaskRule {
            alarm_id: params.alarm_id.clone(),
            alarm_codes,
            masks,
        };
        rules.insert(params.alarm_id, Arc::new(rule));
        Ok(())
    }

    /// Mask identifiers of `alarm_id`, if it has a rule
    pub fn mask_ids(&self, alarm_id: &str) -> Option<Vec<String>> {
        self.rules
            .read()
            .get(alarm_id)
            .map(|rule| rule.masks.iter().map(|(id, _)| id.clone()).collect())
    }

    pub fn is_masked(&self, id: &str) -> bool {
        self.rules.read().contains_key(id)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

/// Whether `target` is reachable from `start` by following mask edges
/// (alarm -> its masks). `start == target` counts as reachable.
fn reaches(rules: &HashMap<String, Arc<MaskRule>>, start: &str, target: &str) -> bool {
    let mut stack = vec![start];
    let mut visited = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == target {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Some(rule) = rules.get(id) {
            stack.extend(rule.masks.iter().map(|(mask, _)| mask.as_str()));
        }
    }
    false
}

impl ValueSource for MaskStage {
    fn stage_name(&self) -> &'static str {
        "mask"
    }

    fn contains(&self, id: &str) -> bool {
        self.is_masked(id) || self.threshold.contains(id)
    }

    fn request(&self, id: &str) -> Result<PendingValue> {
        let rule = match self.rules.read().get(id) {
            Some(rule) => Arc::clone(rule),
            None => return self.threshold.request(id),
        };

        let mut pending = Vec::with_capacity(1 + rule.masks.len());
        pending.push(self.threshold.request(&rule.alarm_id)?);
        for (mask_id, _) in &rule.masks {
            pending.push(self.threshold.request(mask_id)?);
        }

        Ok(join_all(pending)
            .map(move |outcomes| rule.aggregate(outcomes))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_parsing() {
        let params = ParameterSet::new()
            .with("alarmId", "sid:5")
            .with("maskIds", "sid:6, sid:7,,sid:8 , sid:6");
        let parsed = MaskParams::try_from(&params).unwrap();
        assert_eq!(parsed.alarm_id, "sid:5");
        assert_eq!(parsed.mask_ids, vec!["sid:6", "sid:7", "sid:8"]);

        let missing = ParameterSet::new().with("alarmId", "sid:5");
        assert!(matches!(
            MaskParams::try_from(&missing),
            Err(VigilError::MissingParameter { key: "maskIds", .. })
        ));

        let empty = ParameterSet::new()
            .with("alarmId", "sid:5")
            .with("maskIds", " , ");
        assert!(MaskParams::try_from(&empty).is_err());
    }

    #[test]
    fn test_reaches() {
        let codes = OutputCodes {
            active: 1.0,
            inactive: 0.0,
        };
        let mut rules = HashMap::new();
        rules.insert(
            "a".to_string(),
            Arc::new(MaskRule {
                alarm_id: "a".to_string(),
                alarm_codes: codes,
                masks: vec![("b".to_string(), codes)],
            }),
        );
        rules.insert(
            "b".to_string(),
            Arc::new(MaskRule {
                alarm_id: "b".to_string(),
                alarm_codes: codes,
                masks: vec![("c".to_string(), codes)],
            }),
        );
        assert!(reaches(&rules, "a", "c"));
        assert!(!reaches(&rules, "c", "a"));
        assert!(reaches(&rules, "c", "c"));
    }

    #[cfg(feature = "simulation")]
    mod stage {
        use super::super::*;
        use crate::driver::{ChannelBinding, ChannelRegistry};
        use crate::simulation::SimulatedTransport;
        use crate::transform::TransformStage;
        use crate::value::SignalDescriptor;
        use std::time::Duration;

        /// sid:0..3 on channels 0..3 (intercept 10000), sid:5..8 greater 10080
        async fn build() -> (Arc<SimulatedTransport>, MaskStage) {
            let transport = Arc::new(SimulatedTransport::new());
            let driver = ChannelRegistry::open(&ParameterSet::new(), transport.clone())
                .await
                .unwrap();
            let transform = TransformStage::new(Arc::new(driver_with_channels(driver)));
            for i in 0..4 {
                transform
                    .add_signal(
                        format!("sid:{}", i),
                        &ParameterSet::new().with("intercept", "10000"),
                        ChannelBinding::new(0, i),
                    )
                    .unwrap();
            }
            let threshold = ThresholdStage::new(Arc::new(transform));
            for i in 5..9 {
                threshold
                    .add_signal(
                        format!("sid:{}", i),
                        &ParameterSet::new()
                            .with("name", "greater")
                            .with("threshold", "10080")
                            .with("deadZoneWidth", "1")
                            .with("trueOutput", "1")
                            .with("falseOutput", "0"),
                        &format!("sid:{}", i - 5),
                    )
                    .unwrap();
            }
            (transport, MaskStage::new(Arc::new(threshold)))
        }

        fn driver_with_channels(driver: ChannelRegistry) -> ChannelRegistry {
            for i in 0..4 {
                driver
                    .register_channel(ChannelBinding::new(0, i), SignalDescriptor::analog("N/A", 10.0, 1))
                    .unwrap();
            }
            driver
        }

        fn rule(alarm: &str, masks: &str) -> ParameterSet {
            ParameterSet::new().with("alarmId", alarm).with("maskIds", masks)
        }

        fn set_all(transport: &SimulatedTransport, raw: [f64; 4]) {
            for (i, value) in raw.iter().enumerate() {
                transport.set_value(ChannelBinding::new(0, i as u32), *value);
            }
        }

        #[tokio::test]
        async fn test_any_active_mask_suppresses() {
            let (transport, stage) = build().await;
            stage.add_mask(&rule("sid:5", "sid:6, sid:7, sid:8")).unwrap();

            // Alarm active, no mask active
            set_all(&transport, [90.0, 0.0, 0.0, 0.0]);
            assert_eq!(stage.request("sid:5").unwrap().await.value(), Some(1.0));

            // One mask active
            set_all(&transport, [90.0, 0.0, 0.0, 95.0]);
            assert_eq!(stage.request("sid:5").unwrap().await.value(), Some(0.0));

            // Unmasked identifiers pass straight through
            assert_eq!(stage.request("sid:8").unwrap().await.value(), Some(1.0));
        }

        #[tokio::test]
        async fn test_failed_sub_request_fails_aggregate() {
            let (transport, stage) = build().await;
            stage.add_mask(&rule("sid:5", "sid:6, sid:7, sid:8")).unwrap();
            set_all(&transport, [90.0, 0.0, 95.0, 0.0]);
            transport.set_failed(ChannelBinding::new(0, 1), "no response");

            match stage.request("sid:5").unwrap().await {
                Outcome::Failed(reason) => assert!(reason.contains("sid:6: no response")),
                other => panic!("expected failure, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_not_available_mask_counts_as_inactive() {
            let (transport, stage) = build().await;
            stage.add_mask(&rule("sid:5", "sid:6, sid:7")).unwrap();
            transport.set_value(ChannelBinding::new(0, 0), 90.0);
            transport.set_value(ChannelBinding::new(0, 2), 0.0);

            assert_eq!(stage.request("sid:5").unwrap().await.value(), Some(1.0));
        }

        #[tokio::test(start_paused = true)]
        async fn test_completion_order_does_not_matter() {
            let (transport, stage) = build().await;
            stage.add_mask(&rule("sid:5", "sid:6, sid:7")).unwrap();
            set_all(&transport, [90.0, 95.0, 0.0, 0.0]);
            // The alarm itself completes last, the active mask first
            transport.set_latency(ChannelBinding::new(0, 0), Duration::from_millis(30));
            transport.set_latency(ChannelBinding::new(0, 2), Duration::from_millis(20));

            assert_eq!(stage.request("sid:5").unwrap().await.value(), Some(0.0));
            assert_eq!(transport.read_count(), 3);
        }

        #[tokio::test]
        async fn test_cycle_rejected_without_partial_state() {
            let (_, stage) = build().await;
            stage.add_mask(&rule("sid:5", "sid:6")).unwrap();

            let err = stage.add_mask(&rule("sid:6", "sid:5")).unwrap_err();
            assert!(matches!(err, VigilError::MaskCycle { ref alarm, .. } if alarm == "sid:6"));
            assert!(err.is_config());
            assert!(!stage.is_masked("sid:6"));
            assert_eq!(stage.rule_count(), 1);

            // Transitive: 6 -> 7 is fine, 7 -> 5 closes 5 -> 6 -> 7 -> 5
            stage.add_mask(&rule("sid:6", "sid:7")).unwrap();
            assert!(matches!(
                stage.add_mask(&rule("sid:7", "sid:8, sid:5")),
                Err(VigilError::MaskCycle { .. })
            ));
            assert_eq!(stage.mask_ids("sid:6"), Some(vec!["sid:7".to_string()]));
            assert_eq!(stage.mask_ids("sid:7"), None);
        }

        #[tokio::test]
        async fn test_registration_errors() {
            let (_, stage) = build().await;
            assert!(matches!(
                stage.add_mask(&rule("sid:5", "sid:5")),
                Err(VigilError::MaskCycle { .. })
            ));
            assert!(matches!(
                stage.add_mask(&rule("sid:5", "sid:6, sid:42")),
                Err(VigilError::UnknownSignal(id)) if id == "sid:42"
            ));
            assert!(matches!(
                stage.add_mask(&rule("sid:0", "sid:6")),
                Err(VigilError::UnknownSignal(_))
            ));
            stage.add_mask(&rule("sid:5", "sid:6")).unwrap();
            assert!(matches!(
                stage.add_mask(&rule("sid:5", "sid:7")),
                Err(VigilError::DuplicateSignal(_))
            ));
            assert!(matches!(
                stage.get_value("sid:77", Box::new(|_| {})),
                Err(VigilError::UnknownSignal(_))
            ));
        }
    }
}
