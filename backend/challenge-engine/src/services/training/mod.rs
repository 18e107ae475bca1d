// ============================================
// Training & Versioning Pipeline
// ============================================
//
// One training routine parameterized over PredictionTarget:
// 1. Claim the per-target single-flight guard (second trigger is a no-op)
// 2. Replay history into labeled examples, split 80/20 chronologically
// 3. Fit a candidate on the blocking pool, polling the cancel flag
// 4. Evaluate candidate and deployed model on the same held-out tail
// 5. Promote, or keep the deployed model and clear its stale flag
//
// Exactly one decision is made per completed cycle. A cancelled cycle
// leaves the registry untouched.

pub mod dataset;
pub mod registry;
pub mod trainer;

pub use dataset::{LabeledExample, TrainingSet};
pub use registry::{CycleDecision, ModelRegistry, ModelSnapshot, ModelState, RetrainReason};
pub use trainer::{CancelFlag, FittedParameters, GradientDescentTrainer, Trainer, ValidationMetrics};

use crate::models::{InteractionRecord, PredictionTarget};
use crate::services::profile_builder::ProfileBuilder;
use crate::services::scoring::{FeatureExtractor, PredictionModel, ScoringError};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Insufficient data for {}: {available} examples, {required} required", target.as_str())]
    InsufficientData {
        target: PredictionTarget,
        available: usize,
        required: usize,
    },

    #[error(
        "Validation regression for {}: candidate error {candidate_error:.4} vs deployed {deployed_error:.4}",
        target.as_str()
    )]
    ValidationRegression {
        target: PredictionTarget,
        candidate_error: f32,
        deployed_error: f32,
    },

    #[error("Training cancelled for {}", .0.as_str())]
    Cancelled(PredictionTarget),

    #[error("Training diverged for {}", .0.as_str())]
    Diverged(PredictionTarget),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

pub type Result<T> = std::result::Result<T, TrainingError>;

/// Result of one training cycle
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingOutcome {
    Promoted {
        version: u64,
        metrics: ValidationMetrics,
    },
    RolledBack {
        candidate: ValidationMetrics,
        deployed: ValidationMetrics,
    },
    InsufficientData {
        available: usize,
        required: usize,
    },
    /// Another cycle for the same target was already running
    AlreadyRunning,
}

/// Output of the blocking half of a cycle
enum Evaluated {
    Candidate {
        model: PredictionModel,
        candidate: ValidationMetrics,
        deployed: ValidationMetrics,
    },
    Insufficient(usize),
}

pub struct TrainingPipeline {
    registry: Arc<ModelRegistry>,
    trainer: Arc<dyn Trainer>,
    profiles: Arc<ProfileBuilder>,
    extractor: FeatureExtractor,
}

impl TrainingPipeline {
    pub fn new(
        registry: Arc<ModelRegistry>,
        trainer: Arc<dyn Trainer>,
        profiles: Arc<ProfileBuilder>,
        extractor: FeatureExtractor,
    ) -> Self {
        Self {
            registry,
            trainer,
            profiles,
            extractor,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run one full cycle for `target` over `history`
    pub async fn run_cycle(
        &self,
        target: PredictionTarget,
        history: Arc<Vec<InteractionRecord>>,
        now: DateTime<Utc>,
        cancel: CancelFlag,
    ) -> Result<TrainingOutcome> {
        let Some(_guard) = self.registry.try_begin(target, now) else {
            info!(prediction = target.as_str(), "Training already in flight, trigger ignored");
            return Ok(TrainingOutcome::AlreadyRunning);
        };

        let completed_total = history.iter().filter(|r| r.is_completed()).count() as u32;
        let deployed = self.registry.deployed(target);
        let version = self.registry.next_version(target);
        let config = self.registry.config().clone();
        let trainer = self.trainer.clone();
        let profiles = self.profiles.clone();
        let extractor = self.extractor.clone();

        let evaluated = tokio::task::spawn_blocking(move || -> Result<Evaluated> {
            let set = TrainingSet::build(target, &history, &profiles, &extractor);
            if set.len() < config.min_training_examples.max(2) {
                return Ok(Evaluated::Insufficient(set.len()));
            }

            let (train, validation) = set.split(config.validation_fraction);
            let (train_x, train_y) = TrainingSet::to_arrays(target, train)?;
            let (valid_x, valid_y) = TrainingSet::to_arrays(target, validation)?;

            let params = trainer.fit(target, &train_x, &train_y, &cancel)?;
            if cancel.is_cancelled() {
                return Err(TrainingError::Cancelled(target));
            }

            let mut model = PredictionModel {
                target,
                version,
                weights: params.weights,
                bias: params.bias,
                trained_at: now,
                validation_error: 0.0,
                training_examples: train.len(),
            };
            let candidate =
                ValidationMetrics::evaluate(target, &model.predict(&valid_x)?, &valid_y);
            model.validation_error = candidate.error;

            // Untrained slot: compare against always predicting the training mean
            let deployed_predictions = match deployed {
                Some(current) => current.predict(&valid_x)?,
                None => Array1::from_elem(valid_y.len(), train_y.mean().unwrap_or(0.5)),
            };
            let deployed = ValidationMetrics::evaluate(target, &deployed_predictions, &valid_y);

            Ok(Evaluated::Candidate {
                model,
                candidate,
                deployed,
            })
        })
        .await
        .map_err(|e| TrainingError::Worker(e.to_string()))??;

        let required = self.registry.config().min_training_examples;
        match evaluated {
            Evaluated::Insufficient(available) => {
                let error = TrainingError::InsufficientData {
                    target,
                    available,
                    required,
                };
                info!(error = %error, "Training skipped");
                self.registry
                    .retain(target, CycleDecision::InsufficientData, completed_total, None, now);
                Ok(TrainingOutcome::InsufficientData {
                    available,
                    required,
                })
            }
            Evaluated::Candidate {
                model,
                candidate,
                deployed,
            } => {
                let epsilon = self.registry.config().promotion_epsilon;
                if candidate.error <= deployed.error + epsilon {
                    let version = model.version;
                    self.registry.promote(model, completed_total, candidate, now);
                    Ok(TrainingOutcome::Promoted {
                        version,
                        metrics: candidate,
                    })
                } else {
                    let error = TrainingError::ValidationRegression {
                        target,
                        candidate_error: candidate.error,
                        deployed_error: deployed.error,
                    };
                    warn!(error = %error, "Candidate discarded, deployed model retained");
                    self.registry.retain(
                        target,
                        CycleDecision::RolledBack,
                        completed_total,
                        Some(candidate),
                        now,
                    );
                    Ok(TrainingOutcome::RolledBack { candidate, deployed })
                }
            }
        }
    }
}
