use super::{Result, TrainingError};
use crate::config::TrainingConfig;
use crate::models::PredictionTarget;
use crate::utils::sigmoid;
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation signal, checked between epochs
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parameters produced by a fit, before versioning
#[derive(Debug, Clone, PartialEq)]
pub struct FittedParameters {
    pub weights: Vec<f32>,
    pub bias: f32,
}

/// Held-out evaluation of a predictor
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    /// Mean squared error (lower is better)
    pub error: f32,
    /// Share of correct 0/1 calls at 0.5, binary targets only
    pub accuracy: Option<f32>,
    pub examples: usize,
}

impl ValidationMetrics {
    pub fn evaluate(target: PredictionTarget, predictions: &Array1<f32>, labels: &Array1<f32>) -> Self {
        let error = (predictions - labels).mapv(|d| d * d).mean().unwrap_or(0.0);
        let accuracy = (target.is_binary() && !labels.is_empty()).then(|| {
            let hits = predictions
                .iter()
                .zip(labels.iter())
                .filter(|(p, y)| (**p >= 0.5) == (**y >= 0.5))
                .count();
            hits as f32 / labels.len() as f32
        });

        Self {
            error,
            accuracy,
            examples: labels.len(),
        }
    }
}

/// Fits model parameters for one target.
///
/// Implementations are CPU-bound and run on the blocking pool; they must
/// poll `cancel` and return `TrainingError::Cancelled` promptly.
#[cfg_attr(test, mockall::automock)]
pub trait Trainer: Send + Sync {
    fn fit(
        &self,
        target: PredictionTarget,
        features: &Array2<f32>,
        labels: &Array1<f32>,
        cancel: &CancelFlag,
    ) -> Result<FittedParameters>;
}

/// Batch gradient descent on cross-entropy with L2 regularization
#[derive(Debug, Clone)]
pub struct GradientDescentTrainer {
    epochs: usize,
    learning_rate: f32,
    l2_penalty: f32,
}

impl GradientDescentTrainer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            epochs: config.epochs.max(1),
            learning_rate: config.learning_rate,
            l2_penalty: config.l2_penalty.max(0.0),
        }
    }
}

impl Trainer for GradientDescentTrainer {
    fn fit(
        &self,
        target: PredictionTarget,
        features: &Array2<f32>,
        labels: &Array1<f32>,
        cancel: &CancelFlag,
    ) -> Result<FittedParameters> {
        let n = features.nrows();
        if n == 0 || labels.len() != n {
            return Err(TrainingError::Dataset(format!(
                "{} rows against {} labels",
                n,
                labels.len()
            )));
        }

        let scale = 1.0 / n as f32;
        let mut weights = Array1::<f32>::zeros(features.ncols());
        let mut bias = 0.0f32;

        for _ in 0..self.epochs {
            if cancel.is_cancelled() {
                return Err(TrainingError::Cancelled(target));
            }

            let predictions = (features.dot(&weights) + bias).mapv(sigmoid);
            let residuals = &predictions - labels;

            let gradient = features.t().dot(&residuals) * scale + &weights * self.l2_penalty;
            weights.scaled_add(-self.learning_rate, &gradient);
            bias -= self.learning_rate * residuals.sum() * scale;
        }

        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(TrainingError::Diverged(target));
        }

        Ok(FittedParameters {
            weights: weights.to_vec(),
            bias,
        })
    }
}
