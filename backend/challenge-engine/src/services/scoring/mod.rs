/// Candidate Scoring Module
///
/// Estimates, per candidate, how likely the user is to complete it, how much
/// they will enjoy it and how much it stretches them.
///
/// # Architecture
/// - **Feature Layer**: profile + challenge + moment → fixed-width vectors
/// - **Model Layer**: logistic models held by the training registry
/// - **Scoring Layer**: batch prediction with per-term fallback
///
/// # Workflow
/// 1. Drop malformed or duplicate catalog entries
/// 2. Predict completion and enjoyment (model → heuristic → base-rate)
/// 3. Add the growth reward from the comfort-zone curve
/// 4. Combine with the configured weights
pub mod features;
pub mod growth;
pub mod model;
pub mod scorer;

pub use features::{CandidateFeatures, FeatureExtractor};
pub use growth::GrowthCurve;
pub use model::{ModelView, PredictionModel, ServingModels};
pub use scorer::{CandidateScorer, ScoringBatch, ScoringContext, SkippedCandidate};

use crate::models::PredictionTarget;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Corrupt candidate attributes for {candidate_id}: {reason}")]
    CorruptCandidateAttributes { candidate_id: String, reason: String },

    #[error("Model unavailable for {}: {reason}", target.as_str())]
    ModelUnavailable {
        target: PredictionTarget,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ScoringError>;
