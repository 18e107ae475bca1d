/// Training Examples
///
/// Replays the interaction log in order and labels every terminal record
/// using the profile as it stood just before that record. Features therefore
/// never see the outcome they are asked to predict.
use super::{Result, TrainingError};
use crate::models::{InteractionRecord, PredictionTarget};
use crate::services::profile_builder::ProfileBuilder;
use crate::services::scoring::features::{feature_size, FeatureExtractor};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: Vec<f32>,
    pub label: f32,
    pub observed_at: DateTime<Utc>,
}

/// Examples for one target, oldest first
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub target: PredictionTarget,
    pub examples: Vec<LabeledExample>,
}

impl TrainingSet {
    pub fn build(
        target: PredictionTarget,
        history: &[InteractionRecord],
        profiles: &ProfileBuilder,
        extractor: &FeatureExtractor,
    ) -> Self {
        let mut acc = profiles.accumulator();
        let mut examples = Vec::new();

        for record in history {
            if record.is_terminal() {
                if let Some(label) = label_for(target, record) {
                    let profile = profiles.snapshot(&acc, None, record.assigned_at);
                    let features = match target {
                        PredictionTarget::TimingQuality => {
                            extractor.timing_features(&profile, record.acted_at())
                        }
                        _ => extractor
                            .candidate_features(&profile, &record.traits, record.assigned_at)
                            .to_vector(),
                    };
                    examples.push(LabeledExample {
                        features,
                        label,
                        observed_at: record.acted_at(),
                    });
                }
            }
            acc.absorb(record);
        }

        // Stable: records acted on at the same instant keep log order
        examples.sort_by_key(|e| e.observed_at);

        Self { target, examples }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Chronological split: the newest `validation_fraction` is held out
    pub fn split(&self, validation_fraction: f32) -> (&[LabeledExample], &[LabeledExample]) {
        let n = self.examples.len();
        if n < 2 {
            return (&self.examples[..], &[]);
        }
        let held_out = ((n as f32 * validation_fraction).round() as usize).clamp(1, n - 1);
        self.examples.split_at(n - held_out)
    }

    /// Feature matrix and label vector for a slice of examples
    pub fn to_arrays(
        target: PredictionTarget,
        examples: &[LabeledExample],
    ) -> Result<(Array2<f32>, Array1<f32>)> {
        let width = feature_size(target);
        let flat: Vec<f32> = examples
            .iter()
            .flat_map(|e| e.features.iter().copied())
            .collect();
        let features = Array2::from_shape_vec((examples.len(), width), flat)
            .map_err(|e| TrainingError::Dataset(format!("feature matrix for {}: {}", target.as_str(), e)))?;
        let labels = Array1::from_iter(examples.iter().map(|e| e.label));
        Ok((features, labels))
    }
}

fn label_for(target: PredictionTarget, record: &InteractionRecord) -> Option<f32> {
    match target {
        PredictionTarget::Completion | PredictionTarget::TimingQuality => {
            Some(if record.is_completed() { 1.0 } else { 0.0 })
        }
        PredictionTarget::Enjoyment => record
            .is_completed()
            .then(|| record.normalized_rating())
            .flatten(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfileConfig, ScoringConfig, TemporalConfig};
    use crate::models::{
        CandidateAttributes, Category, CostClass, LocationClass, Outcome, SocialRequirement,
        TimeInvestment,
    };
    use crate::services::scoring::features::{CANDIDATE_FEATURE_SIZE, TIMING_FEATURE_SIZE};
    use chrono::Duration;

    fn candidate() -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: "c".to_string(),
            category: Category::Outdoor,
            time_investment: TimeInvestment::Moderate,
            social_requirement: SocialRequirement::Partner,
            cost: CostClass::Low,
            difficulty: 3,
            location: LocationClass::Outdoor,
            tags: vec![],
            content_hash: "h".to_string(),
        }
    }

    fn history() -> Vec<InteractionRecord> {
        let start = Utc::now() - Duration::days(20);
        let mut records = Vec::new();
        for i in 0..10 {
            let pending = InteractionRecord::assigned(&candidate(), start + Duration::days(i));
            let outcome = if i % 3 == 0 { Outcome::Skipped } else { Outcome::Completed };
            let mut terminal = pending.clone().with_outcome(outcome);
            if outcome == Outcome::Completed && i % 2 == 0 {
                terminal = terminal.with_rating(4);
            }
            records.push(pending);
            records.push(terminal);
        }
        records
    }

    fn build(target: PredictionTarget) -> TrainingSet {
        let profiles = ProfileBuilder::new(ProfileConfig::default(), TemporalConfig::default());
        let extractor = FeatureExtractor::new(ScoringConfig::default(), 0);
        TrainingSet::build(target, &history(), &profiles, &extractor)
    }

    #[test]
    fn test_labels_per_target() {
        let completion = build(PredictionTarget::Completion);
        assert_eq!(completion.len(), 10);
        assert_eq!(completion.examples[0].label, 0.0);
        assert_eq!(completion.examples[1].label, 1.0);
        assert_eq!(completion.examples[0].features.len(), CANDIDATE_FEATURE_SIZE);

        // completed and rated: i = 2, 4, 8
        let enjoyment = build(PredictionTarget::Enjoyment);
        assert_eq!(enjoyment.len(), 3);
        assert!(enjoyment.examples.iter().all(|e| (e.label - 0.75).abs() < 1e-6));

        let timing = build(PredictionTarget::TimingQuality);
        assert_eq!(timing.examples[0].features.len(), TIMING_FEATURE_SIZE);
    }

    #[test]
    fn test_features_exclude_own_outcome() {
        let completion = build(PredictionTarget::Completion);
        // First example sees an empty profile: configured outdoor base-rate
        assert!((completion.examples[0].features[0] - 0.52).abs() < 1e-6);
    }

    #[test]
    fn test_chronological_split() {
        let set = build(PredictionTarget::Completion);
        let (train, validation) = set.split(0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(validation.len(), 2);
        assert!(train.last().unwrap().observed_at <= validation[0].observed_at);

        let (features, labels) =
            TrainingSet::to_arrays(PredictionTarget::Completion, train).unwrap();
        assert_eq!(features.dim(), (8, CANDIDATE_FEATURE_SIZE));
        assert_eq!(labels.len(), 8);
    }
}
