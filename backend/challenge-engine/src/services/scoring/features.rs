/// Feature Engineering
///
/// Maps (profile, challenge, moment) onto the fixed-width vectors consumed by
/// the prediction models. Serving and training share this code so a model
/// always sees features computed the same way it was fitted on.
use crate::config::ScoringConfig;
use crate::models::{ChallengeTraits, PredictionTarget};
use crate::services::profile_builder::UserProfile;
use crate::services::temporal::device_offset;
use crate::utils::normalize_score;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use std::f32::consts::TAU;

/// Completion / enjoyment feature vector size
/// - Category: 2 (smoothed completion rate, smoothed enjoyment)
/// - Difficulty: 2 (difficulty, stretch past comfort zone)
/// - Attribute preferences: 4 (time, social, cost, location)
/// - Timing: 2 (hour share, weekday share)
/// - History: 2 (streak, experience)
pub const CANDIDATE_FEATURE_SIZE: usize = 12;

/// Timing-quality feature vector size: cyclic hour (2), cyclic weekday (2), hour share, weekday share
pub const TIMING_FEATURE_SIZE: usize = 6;

pub fn feature_size(target: PredictionTarget) -> usize {
    match target {
        PredictionTarget::Completion | PredictionTarget::Enjoyment => CANDIDATE_FEATURE_SIZE,
        PredictionTarget::TimingQuality => TIMING_FEATURE_SIZE,
    }
}

/// Features for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFeatures {
    pub category_completion_rate: f32,
    pub category_enjoyment: f32,
    pub difficulty: f32,
    pub stretch: f32,
    pub time_preference: f32,
    pub social_preference: f32,
    pub cost_preference: f32,
    pub location_preference: f32,
    pub hour_share: f32,
    pub day_share: f32,
    pub streak: f32,
    pub experience: f32,
}

impl CandidateFeatures {
    pub fn to_vector(&self) -> Vec<f32> {
        vec![
            self.category_completion_rate,
            self.category_enjoyment,
            self.difficulty,
            self.stretch,
            self.time_preference,
            self.social_preference,
            self.cost_preference,
            self.location_preference,
            self.hour_share,
            self.day_share,
            self.streak,
            self.experience,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    scoring: ScoringConfig,
    offset: FixedOffset,
}

impl FeatureExtractor {
    pub fn new(scoring: ScoringConfig, utc_offset_minutes: i32) -> Self {
        Self {
            scoring,
            offset: device_offset(utc_offset_minutes),
        }
    }

    pub fn candidate_features(
        &self,
        profile: &UserProfile,
        traits: &ChallengeTraits,
        at: DateTime<Utc>,
    ) -> CandidateFeatures {
        let (hour, day) = self.local_hour_and_day(at);
        let prefs = profile.preferences.for_traits(traits);
        let strength = self.scoring.prior_strength;

        CandidateFeatures {
            category_completion_rate: profile.smoothed_completion_rate(
                traits.category,
                self.scoring.base_rate(traits.category),
                strength,
            ),
            category_enjoyment: profile.smoothed_enjoyment(
                traits.category,
                self.scoring.enjoyment_prior,
                strength,
            ),
            difficulty: normalize_score(f32::from(traits.difficulty), 1.0, 5.0),
            stretch: normalize_score(f32::from(traits.difficulty) - profile.comfort_zone, -4.0, 4.0),
            time_preference: prefs[0],
            social_preference: prefs[1],
            cost_preference: prefs[2],
            location_preference: prefs[3],
            hour_share: share(&profile.preferred_hours, hour),
            day_share: share(&profile.day_of_week, day),
            streak: (profile.current_streak as f32 / 7.0).min(1.0),
            experience: normalize_score((1.0 + profile.total_completed as f32).ln(), 0.0, 101f32.ln()),
        }
    }

    pub fn timing_features(&self, profile: &UserProfile, at: DateTime<Utc>) -> Vec<f32> {
        let (hour, day) = self.local_hour_and_day(at);
        let hour_angle = TAU * hour as f32 / 24.0;
        let day_angle = TAU * day as f32 / 7.0;
        vec![
            hour_angle.sin(),
            hour_angle.cos(),
            day_angle.sin(),
            day_angle.cos(),
            share(&profile.preferred_hours, hour),
            share(&profile.day_of_week, day),
        ]
    }

    pub fn local_hour_and_day(&self, at: DateTime<Utc>) -> (usize, usize) {
        let local = at.with_timezone(&self.offset);
        (
            local.hour() as usize,
            local.weekday().num_days_from_monday() as usize,
        )
    }
}

fn share(histogram: &[u32], idx: usize) -> f32 {
    let total: u32 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    histogram.get(idx).copied().unwrap_or(0) as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfileConfig, TemporalConfig};
    use crate::models::{Category, CostClass, LocationClass, SocialRequirement, TimeInvestment};
    use crate::services::profile_builder::ProfileBuilder;

    fn traits(category: Category, difficulty: u8) -> ChallengeTraits {
        ChallengeTraits {
            category,
            time_investment: TimeInvestment::Quick,
            social_requirement: SocialRequirement::Group,
            cost: CostClass::Free,
            difficulty,
            location: LocationClass::Home,
        }
    }

    fn empty_profile() -> UserProfile {
        ProfileBuilder::new(ProfileConfig::default(), TemporalConfig::default())
            .rebuild_profile(&[], None, Utc::now())
    }

    #[test]
    fn test_vector_layout() {
        let extractor = FeatureExtractor::new(ScoringConfig::default(), 0);
        let features =
            extractor.candidate_features(&empty_profile(), &traits(Category::Mindfulness, 4), Utc::now());
        let vector = features.to_vector();

        assert_eq!(vector.len(), CANDIDATE_FEATURE_SIZE);
        // no history: configured base-rate and neutral enjoyment
        assert!((vector[0] - 0.70).abs() < 1e-6);
        assert!((vector[1] - 0.5).abs() < 1e-6);
        assert!((vector[2] - 0.75).abs() < 1e-6);
        // difficulty 4 against default comfort zone 2
        assert!((vector[3] - 0.75).abs() < 1e-6);
        assert_eq!(vector[8], 0.0);
    }

    #[test]
    fn test_timing_vector_is_cyclic() {
        let extractor = FeatureExtractor::new(ScoringConfig::default(), 0);
        let midnight = DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let vector = extractor.timing_features(&empty_profile(), midnight);

        assert_eq!(vector.len(), TIMING_FEATURE_SIZE);
        assert!(vector[0].abs() < 1e-6);
        assert!((vector[1] - 1.0).abs() < 1e-6);
        assert_eq!(feature_size(PredictionTarget::TimingQuality), vector.len());
    }
}
