/// Candidate Scoring Module
///
/// Combines completion, enjoyment and growth predictions into one score per
/// candidate. Each learned term falls back independently:
/// deployed model → profile heuristic (untrained model) → category base-rate
/// (insufficient profile).
use super::features::{FeatureExtractor, CANDIDATE_FEATURE_SIZE};
use super::growth::GrowthCurve;
use super::model::{ModelView, ServingModels};
use super::{Result, ScoringError};
use crate::config::ScoringConfig;
use crate::models::{CandidateAttributes, PredictionSource, PredictionTarget, ScoredCandidate};
use crate::services::profile_builder::UserProfile;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Per-request inputs besides profile and pool
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    pub now: DateTime<Utc>,
}

/// A catalog entry left out of scoring
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCandidate {
    pub candidate_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ScoringBatch {
    /// Same order as the valid input candidates
    pub scored: Vec<ScoredCandidate>,
    pub skipped: Vec<SkippedCandidate>,
    /// Some term was not produced by a deployed model
    pub fallback_active: bool,
}

pub struct CandidateScorer {
    config: ScoringConfig,
    extractor: FeatureExtractor,
    growth: GrowthCurve,
}

impl CandidateScorer {
    pub fn new(config: ScoringConfig, extractor: FeatureExtractor) -> Self {
        Self {
            growth: GrowthCurve::from_config(&config),
            config,
            extractor,
        }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Score every well-formed candidate; malformed entries are skipped with a warning
    pub fn score(
        &self,
        profile: &UserProfile,
        candidates: &[CandidateAttributes],
        context: &ScoringContext,
        models: &ServingModels,
    ) -> ScoringBatch {
        let (valid, skipped) = partition_valid(candidates);

        if valid.is_empty() {
            return ScoringBatch {
                scored: Vec::new(),
                skipped,
                fallback_active: true,
            };
        }

        let (completion, completion_source) =
            self.predict_term(PredictionTarget::Completion, profile, &valid, context, &models.completion);
        let (enjoyment, enjoyment_source) =
            self.predict_term(PredictionTarget::Enjoyment, profile, &valid, context, &models.enjoyment);

        let source_confidence =
            (self.confidence(completion_source) + self.confidence(enjoyment_source)) / 2.0;
        let source = if self.confidence(completion_source) <= self.confidence(enjoyment_source) {
            completion_source
        } else {
            enjoyment_source
        };

        let scored: Vec<ScoredCandidate> = valid
            .iter()
            .zip(completion.iter().zip(enjoyment.iter()))
            .map(|(candidate, (&c, &e))| {
                let growth = self.growth.potential(candidate.difficulty, profile.comfort_zone);
                let combined = self.config.completion_weight * c
                    + self.config.enjoyment_weight * e
                    + self.config.growth_weight * growth;

                ScoredCandidate {
                    candidate_id: candidate.candidate_id.clone(),
                    category: candidate.category,
                    difficulty: candidate.difficulty,
                    completion_probability: c,
                    enjoyment_estimate: e,
                    growth_potential: growth,
                    combined_score: combined,
                    confidence: source_confidence * self.evidence(profile, candidate),
                    source,
                }
            })
            .collect();

        let fallback_active = !is_learned(completion_source) || !is_learned(enjoyment_source);

        debug!(
            scored = scored.len(),
            skipped = skipped.len(),
            completion_source = ?completion_source,
            enjoyment_source = ?enjoyment_source,
            fallback_active,
            "Candidates scored"
        );

        ScoringBatch {
            scored,
            skipped,
            fallback_active,
        }
    }

    /// Predict one term for all candidates, degrading to heuristics when needed
    fn predict_term(
        &self,
        target: PredictionTarget,
        profile: &UserProfile,
        candidates: &[&CandidateAttributes],
        context: &ScoringContext,
        view: &ModelView,
    ) -> (Vec<f32>, PredictionSource) {
        if !profile.is_ready() {
            return (
                candidates
                    .iter()
                    .map(|c| self.base_rate_prediction(target, c))
                    .collect(),
                PredictionSource::BaseRate,
            );
        }

        if view.model.is_some() {
            match self.learned_prediction(target, profile, candidates, context, view) {
                Ok(values) => {
                    let source = if view.stale {
                        PredictionSource::LearnedStale
                    } else {
                        PredictionSource::Learned
                    };
                    return (values, source);
                }
                Err(e) => {
                    warn!(prediction = target.as_str(), error = %e, "Model unusable, scoring heuristically");
                }
            }
        }

        (
            candidates
                .iter()
                .map(|c| self.heuristic_prediction(target, profile, c))
                .collect(),
            PredictionSource::ProfileHeuristic,
        )
    }

    fn learned_prediction(
        &self,
        target: PredictionTarget,
        profile: &UserProfile,
        candidates: &[&CandidateAttributes],
        context: &ScoringContext,
        view: &ModelView,
    ) -> Result<Vec<f32>> {
        let model = view.model.as_ref().ok_or_else(|| ScoringError::ModelUnavailable {
            target,
            reason: "no deployed model".to_string(),
        })?;

        let rows: Vec<f32> = candidates
            .iter()
            .flat_map(|c| {
                self.extractor
                    .candidate_features(profile, &c.traits(), context.now)
                    .to_vector()
            })
            .collect();
        let matrix = Array2::from_shape_vec((candidates.len(), CANDIDATE_FEATURE_SIZE), rows)
            .map_err(|e| ScoringError::InvalidInput(format!("Failed to build feature matrix: {}", e)))?;

        let predictions = model.predict(&matrix)?;
        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(ScoringError::ModelUnavailable {
                target,
                reason: "non-finite prediction".to_string(),
            });
        }

        Ok(predictions.iter().map(|p| p.clamp(0.0, 1.0)).collect())
    }

    /// Pre-training approximation from the user's own profile
    fn heuristic_prediction(
        &self,
        target: PredictionTarget,
        profile: &UserProfile,
        candidate: &CandidateAttributes,
    ) -> f32 {
        let strength = self.config.prior_strength;
        match target {
            PredictionTarget::Enjoyment => {
                profile.smoothed_enjoyment(candidate.category, self.config.enjoyment_prior, strength)
            }
            _ => {
                let category_rate = profile.smoothed_completion_rate(
                    candidate.category,
                    self.config.base_rate(candidate.category),
                    strength,
                );
                let prefs = profile.preferences.for_traits(&candidate.traits());
                let preference = prefs.iter().sum::<f32>() / prefs.len() as f32;
                0.8 * category_rate + 0.2 * preference
            }
        }
    }

    /// Cold start: population base-rates and a neutral enjoyment prior
    fn base_rate_prediction(&self, target: PredictionTarget, candidate: &CandidateAttributes) -> f32 {
        match target {
            PredictionTarget::Enjoyment => self.config.enjoyment_prior,
            _ => self.config.base_rate(candidate.category),
        }
    }

    fn confidence(&self, source: PredictionSource) -> f32 {
        match source {
            PredictionSource::Learned => self.config.confidence_learned,
            PredictionSource::LearnedStale => self.config.confidence_stale,
            PredictionSource::ProfileHeuristic => self.config.confidence_heuristic,
            PredictionSource::BaseRate => self.config.confidence_base_rate,
        }
    }

    /// 0.5 for a category never attempted, approaching 1.0 with history
    fn evidence(&self, profile: &UserProfile, candidate: &CandidateAttributes) -> f32 {
        let attempts = profile.category(candidate.category).map_or(0, |stats| stats.attempts) as f32;
        let strength = self.config.prior_strength.max(f32::EPSILON);
        0.5 + 0.5 * attempts / (attempts + strength)
    }
}

fn is_learned(source: PredictionSource) -> bool {
    matches!(source, PredictionSource::Learned | PredictionSource::LearnedStale)
}

/// Split the pool into well-formed candidates and skipped entries (malformed or duplicate)
fn partition_valid(candidates: &[CandidateAttributes]) -> (Vec<&CandidateAttributes>, Vec<SkippedCandidate>) {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for candidate in candidates {
        let verdict = candidate.validate().and_then(|_| {
            if seen.insert(candidate.candidate_id.as_str()) {
                Ok(())
            } else {
                Err("duplicate candidate id".to_string())
            }
        });

        match verdict {
            Ok(()) => valid.push(candidate),
            Err(reason) => {
                let error = ScoringError::CorruptCandidateAttributes {
                    candidate_id: candidate.candidate_id.clone(),
                    reason: reason.clone(),
                };
                warn!(error = %error, "Skipping catalog entry");
                skipped.push(SkippedCandidate {
                    candidate_id: candidate.candidate_id.clone(),
                    reason,
                });
            }
        }
    }

    (valid, skipped)
}
