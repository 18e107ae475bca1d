/// Prediction Model
///
/// Logistic model shared by every prediction target: `p = sigmoid(w·x + b)`.
/// Completion and timing-quality are fitted on 0/1 labels, enjoyment on
/// ratings mapped to 0..1; all outputs are probabilities / normalized scores.
///
/// Artifacts are immutable once trained and serialize to JSON so a deployed
/// model can be persisted and restored across launches.
use super::features::feature_size;
use super::{Result, ScoringError};
use crate::models::PredictionTarget;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionModel {
    pub target: PredictionTarget,
    pub version: u64,
    pub weights: Vec<f32>,
    pub bias: f32,
    pub trained_at: DateTime<Utc>,
    /// Mean squared error on the held-out split it was trained with
    pub validation_error: f32,
    pub training_examples: usize,
}

impl PredictionModel {
    /// Predict one value per row of `features`
    pub fn predict(&self, features: &Array2<f32>) -> Result<Array1<f32>> {
        if features.ncols() != self.weights.len() {
            return Err(ScoringError::InvalidInput(format!(
                "Expected {} features, got {}",
                self.weights.len(),
                features.ncols()
            )));
        }

        let weights = Array1::from_vec(self.weights.clone());
        let logits = features.dot(&weights) + self.bias;
        Ok(logits.mapv(crate::utils::sigmoid))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ScoringError::ModelUnavailable {
            target: self.target,
            reason: format!("serialization failed: {}", e),
        })
    }

    /// Load a persisted artifact, rejecting ones that do not fit the target
    pub fn from_json(target: PredictionTarget, json: &str) -> Result<Self> {
        let model: PredictionModel =
            serde_json::from_str(json).map_err(|e| ScoringError::ModelUnavailable {
                target,
                reason: format!("artifact failed to parse: {}", e),
            })?;

        if model.target != target {
            return Err(ScoringError::ModelUnavailable {
                target,
                reason: format!("artifact is for {}", model.target.as_str()),
            });
        }
        if model.weights.len() != feature_size(target)
            || model.weights.iter().any(|w| !w.is_finite())
            || !model.bias.is_finite()
        {
            return Err(ScoringError::ModelUnavailable {
                target,
                reason: "artifact weights malformed".to_string(),
            });
        }

        Ok(model)
    }
}

/// Read-only view of one target's serving model
#[derive(Debug, Clone, Default)]
pub struct ModelView {
    pub model: Option<Arc<PredictionModel>>,
    /// Deployed model is due for retraining
    pub stale: bool,
}

/// Models used by one scoring call
#[derive(Debug, Clone, Default)]
pub struct ServingModels {
    pub completion: ModelView,
    pub enjoyment: ModelView,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(weights: Vec<f32>, bias: f32) -> PredictionModel {
        PredictionModel {
            target: PredictionTarget::Completion,
            version: 1,
            weights,
            bias,
            trained_at: Utc::now(),
            validation_error: 0.1,
            training_examples: 100,
        }
    }

    #[test]
    fn test_predict_batch() {
        let mut weights = vec![0.0; 12];
        weights[0] = 4.0;
        let m = model(weights, -2.0);

        let mut rows = vec![0.0f32; 24];
        rows[0] = 1.0; // first row: strong completion rate
        let features = Array2::from_shape_vec((2, 12), rows).unwrap();

        let scores = m.predict(&features).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > 0.85);
        assert!(scores[1] < 0.15);
    }

    #[test]
    fn test_invalid_feature_vector_size() {
        let m = model(vec![0.0; 12], 0.0);
        let features = Array2::from_shape_vec((1, 5), vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();

        let result = m.predict(&features);
        assert!(matches!(result, Err(ScoringError::InvalidInput(_))));
    }

    #[test]
    fn test_artifact_round_trip_checks_target() {
        let m = model(vec![0.1; 12], 0.2);
        let json = m.to_json().unwrap();

        assert_eq!(
            PredictionModel::from_json(PredictionTarget::Completion, &json).unwrap(),
            m
        );
        assert!(matches!(
            PredictionModel::from_json(PredictionTarget::Enjoyment, &json),
            Err(ScoringError::ModelUnavailable { .. })
        ));
        assert!(PredictionModel::from_json(PredictionTarget::Completion, "{not json").is_err());
    }
}
