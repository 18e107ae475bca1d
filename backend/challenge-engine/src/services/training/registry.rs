/// Model Registry
///
/// One slot per prediction target holding the deployed model behind an
/// `Arc`. Promotion replaces the `Arc` in a single write, so scoring calls
/// running concurrently always see either the old model or the new one,
/// never a partial artifact.
use super::trainer::ValidationMetrics;
use crate::config::TrainingConfig;
use crate::models::PredictionTarget;
use crate::services::scoring::{ModelView, PredictionModel, ServingModels};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Lifecycle of a target's model as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Untrained,
    Deployed,
    /// Deployed and due for retraining
    Stale,
    /// A training cycle is in flight; the deployed model keeps serving
    Retraining,
}

/// Outcome of the most recent completed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleDecision {
    Promoted,
    RolledBack,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrainReason {
    NewExamples(u32),
    ModelAge(Duration),
}

#[derive(Debug, Clone, Default)]
struct ModelSlot {
    model: Option<Arc<PredictionModel>>,
    stale: bool,
    last_attempt_at: Option<DateTime<Utc>>,
    completed_at_last_attempt: u32,
    last_decision: Option<CycleDecision>,
    last_metrics: Option<ValidationMetrics>,
}

/// Read-only copy of a slot for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSnapshot {
    pub target: PredictionTarget,
    pub state: ModelState,
    pub version: Option<u64>,
    pub trained_at: Option<DateTime<Utc>>,
    pub validation_error: Option<f32>,
    pub training_examples: Option<usize>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_decision: Option<CycleDecision>,
    pub last_metrics: Option<ValidationMetrics>,
}

pub struct ModelRegistry {
    config: TrainingConfig,
    slots: DashMap<PredictionTarget, ModelSlot>,
    in_flight: DashMap<PredictionTarget, DateTime<Utc>>,
}

/// Marks a target as training; released on drop, including cancellation
pub struct TrainingGuard<'a> {
    registry: &'a ModelRegistry,
    target: PredictionTarget,
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.registry.in_flight.remove(&self.target);
    }
}

impl ModelRegistry {
    pub fn new(config: TrainingConfig) -> Self {
        let slots = DashMap::new();
        for target in PredictionTarget::ALL {
            slots.insert(target, ModelSlot::default());
        }
        Self {
            config,
            slots,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn deployed(&self, target: PredictionTarget) -> Option<Arc<PredictionModel>> {
        self.slots.get(&target).and_then(|slot| slot.model.clone())
    }

    pub fn view(&self, target: PredictionTarget) -> ModelView {
        self.slots
            .get(&target)
            .map(|slot| ModelView {
                model: slot.model.clone(),
                stale: slot.stale,
            })
            .unwrap_or_default()
    }

    pub fn serving(&self) -> ServingModels {
        ServingModels {
            completion: self.view(PredictionTarget::Completion),
            enjoyment: self.view(PredictionTarget::Enjoyment),
        }
    }

    pub fn state(&self, target: PredictionTarget) -> ModelState {
        if self.in_flight.contains_key(&target) {
            return ModelState::Retraining;
        }
        match self.slots.get(&target) {
            Some(slot) if slot.model.is_some() && slot.stale => ModelState::Stale,
            Some(slot) if slot.model.is_some() => ModelState::Deployed,
            _ => ModelState::Untrained,
        }
    }

    pub fn is_training(&self, target: PredictionTarget) -> bool {
        self.in_flight.contains_key(&target)
    }

    /// Claim the single training slot for `target`; None if a cycle is already running
    pub fn try_begin(&self, target: PredictionTarget, now: DateTime<Utc>) -> Option<TrainingGuard<'_>> {
        match self.in_flight.entry(target) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                Some(TrainingGuard {
                    registry: self,
                    target,
                })
            }
        }
    }

    /// Whether `target` is due for retraining; a deployed model that is due is flagged stale
    pub fn evaluate_trigger(
        &self,
        target: PredictionTarget,
        completed_total: u32,
        now: DateTime<Utc>,
    ) -> Option<RetrainReason> {
        let mut slot = self.slots.entry(target).or_default();

        let new_examples = completed_total.saturating_sub(slot.completed_at_last_attempt);
        let reason = if new_examples >= self.config.retrain_threshold {
            Some(RetrainReason::NewExamples(new_examples))
        } else {
            // A cycle that kept the deployed model restarts the age clock
            let since = slot.last_attempt_at;
            slot.model.as_ref().and_then(|model| {
                let age = now - since.map_or(model.trained_at, |at| at.max(model.trained_at));
                (age >= Duration::hours(self.config.max_model_age_hours))
                    .then_some(RetrainReason::ModelAge(age))
            })
        };

        if reason.is_some() && slot.model.is_some() {
            slot.stale = true;
        }
        reason
    }

    /// Swap in a validated candidate
    pub fn promote(
        &self,
        model: PredictionModel,
        completed_total: u32,
        metrics: ValidationMetrics,
        now: DateTime<Utc>,
    ) {
        let target = model.target;
        let version = model.version;
        let mut slot = self.slots.entry(target).or_default();
        slot.model = Some(Arc::new(model));
        slot.last_decision = Some(CycleDecision::Promoted);
        slot.last_metrics = Some(metrics);
        Self::close_cycle(&mut slot, completed_total, now);

        info!(
            prediction = target.as_str(),
            version,
            error = metrics.error,
            "Model promoted"
        );
    }

    /// Keep the deployed model after a cycle that did not promote
    pub fn retain(
        &self,
        target: PredictionTarget,
        decision: CycleDecision,
        completed_total: u32,
        metrics: Option<ValidationMetrics>,
        now: DateTime<Utc>,
    ) {
        let mut slot = self.slots.entry(target).or_default();
        slot.last_decision = Some(decision);
        if metrics.is_some() {
            slot.last_metrics = metrics;
        }
        Self::close_cycle(&mut slot, completed_total, now);
    }

    /// Install a persisted artifact unless a newer version is already deployed
    pub fn install(&self, model: PredictionModel) -> bool {
        let mut slot = self.slots.entry(model.target).or_default();
        let newer = slot
            .model
            .as_ref()
            .map_or(true, |current| model.version > current.version);
        if newer {
            slot.model = Some(Arc::new(model));
            slot.stale = false;
        }
        newer
    }

    pub fn next_version(&self, target: PredictionTarget) -> u64 {
        self.deployed(target).map_or(1, |m| m.version + 1)
    }

    pub fn snapshot(&self, target: PredictionTarget) -> ModelSnapshot {
        let state = self.state(target);
        let slot = self
            .slots
            .get(&target)
            .map(|slot| slot.clone())
            .unwrap_or_default();
        let model = slot.model.as_deref();

        ModelSnapshot {
            target,
            state,
            version: model.map(|m| m.version),
            trained_at: model.map(|m| m.trained_at),
            validation_error: model.map(|m| m.validation_error),
            training_examples: model.map(|m| m.training_examples),
            last_attempt_at: slot.last_attempt_at,
            last_decision: slot.last_decision,
            last_metrics: slot.last_metrics,
        }
    }

    fn close_cycle(slot: &mut ModelSlot, completed_total: u32, now: DateTime<Utc>) {
        slot.stale = false;
        slot.last_attempt_at = Some(now);
        slot.completed_at_last_attempt = completed_total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(target: PredictionTarget, version: u64, trained_at: DateTime<Utc>) -> PredictionModel {
        PredictionModel {
            target,
            version,
            weights: vec![0.0; 12],
            bias: 0.0,
            trained_at,
            validation_error: 0.2,
            training_examples: 40,
        }
    }

    fn metrics(error: f32) -> ValidationMetrics {
        ValidationMetrics {
            error,
            accuracy: Some(0.8),
            examples: 10,
        }
    }

    #[test]
    fn test_untrained_by_default() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        for target in PredictionTarget::ALL {
            assert_eq!(registry.state(target), ModelState::Untrained);
            assert!(registry.view(target).model.is_none());
        }
        assert_eq!(registry.next_version(PredictionTarget::Completion), 1);
    }

    #[test]
    fn test_single_flight_guard() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        let now = Utc::now();

        let guard = registry.try_begin(PredictionTarget::Completion, now);
        assert!(guard.is_some());
        assert!(registry.try_begin(PredictionTarget::Completion, now).is_none());
        assert!(registry.try_begin(PredictionTarget::Enjoyment, now).is_some());
        assert_eq!(registry.state(PredictionTarget::Completion), ModelState::Retraining);

        drop(guard);
        assert!(registry.try_begin(PredictionTarget::Completion, now).is_some());
    }

    #[test]
    fn test_trigger_on_new_examples_and_age() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        let now = Utc::now();
        let target = PredictionTarget::Completion;

        assert_eq!(registry.evaluate_trigger(target, 49, now), None);
        assert_eq!(
            registry.evaluate_trigger(target, 50, now),
            Some(RetrainReason::NewExamples(50))
        );

        let trained_at = now - Duration::days(8);
        registry.promote(model(target, 1, trained_at), 50, metrics(0.2), trained_at);
        assert_eq!(registry.state(target), ModelState::Deployed);

        assert!(matches!(
            registry.evaluate_trigger(target, 60, now),
            Some(RetrainReason::ModelAge(_))
        ));
        assert_eq!(registry.state(target), ModelState::Stale);
        assert!(registry.view(target).stale);
    }

    #[test]
    fn test_retain_clears_stale_and_resets_counter() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        let now = Utc::now();
        let target = PredictionTarget::Enjoyment;

        registry.promote(model(target, 1, now), 0, metrics(0.1), now);
        assert!(registry.evaluate_trigger(target, 55, now).is_some());
        assert_eq!(registry.state(target), ModelState::Stale);

        registry.retain(target, CycleDecision::RolledBack, 55, Some(metrics(0.4)), now);
        let snapshot = registry.snapshot(target);
        assert_eq!(snapshot.state, ModelState::Deployed);
        assert_eq!(snapshot.version, Some(1));
        assert_eq!(snapshot.last_decision, Some(CycleDecision::RolledBack));
        assert_eq!(registry.evaluate_trigger(target, 60, now), None);
    }

    #[test]
    fn test_rollback_restarts_age_clock() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        let now = Utc::now();
        let target = PredictionTarget::Completion;

        let trained_at = now - Duration::days(8);
        registry.promote(model(target, 1, trained_at), 50, metrics(0.2), trained_at);
        assert!(matches!(
            registry.evaluate_trigger(target, 50, now),
            Some(RetrainReason::ModelAge(_))
        ));

        registry.retain(target, CycleDecision::RolledBack, 50, Some(metrics(0.3)), now);
        let later = now + Duration::minutes(15);
        assert_eq!(registry.evaluate_trigger(target, 50, later), None);
        assert_eq!(registry.state(target), ModelState::Deployed);

        // Due again once a full interval has passed since the rollback
        assert!(matches!(
            registry.evaluate_trigger(target, 50, now + Duration::days(8)),
            Some(RetrainReason::ModelAge(_))
        ));
    }

    #[test]
    fn test_install_keeps_newer_model() {
        let registry = ModelRegistry::new(TrainingConfig::default());
        let now = Utc::now();
        let target = PredictionTarget::TimingQuality;

        assert!(registry.install(model(target, 3, now)));
        assert!(!registry.install(model(target, 2, now)));
        assert_eq!(registry.deployed(target).map(|m| m.version), Some(3));
        assert_eq!(registry.next_version(target), 4);
    }
}
