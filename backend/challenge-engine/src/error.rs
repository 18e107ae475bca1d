use crate::config::ConfigError;
use crate::services::profile_builder::ProfileBuilderError;
use crate::services::scoring::ScoringError;
use crate::services::selection::SelectionError;
use crate::services::training::TrainingError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Profile(#[from] ProfileBuilderError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Constraints eliminated every candidate; the caller should widen the pool
    pub fn is_no_eligible_candidate(&self) -> bool {
        matches!(
            self,
            EngineError::Selection(SelectionError::NoEligibleCandidate { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
