// ============================================
// User Profile Builder
// ============================================
//
// Turns the ordered interaction history into a versioned UserProfile:
// 1. Per-category completion rate and mean rating
// 2. Attribute-class preference vectors (time, social, cost, location)
// 3. Comfort zone (difficulty reliably completed) and growth trajectory
// 4. Timing histograms and streaks via the temporal accumulator
//
// ┌──────────────────────┐    absorb    ┌─────────────────────┐
// │ InteractionRecord log│ ───────────▶ │ ProfileAccumulator  │
// └──────────────────────┘              └──────────┬──────────┘
//                                                  │ snapshot
//                                       ┌──────────▼──────────┐
//                                       │ UserProfile (vN+1)  │
//                                       └─────────────────────┘
//
// The profile is a pure function of the history and the `as_of` instant.
// With fewer completions than `min_completed` the profile is still returned,
// flagged InsufficientData so scoring can take the cold-start path.

pub mod accumulator;
pub mod profile;

pub use accumulator::ProfileAccumulator;
pub use profile::{AttributePreferences, CategoryStats, ProfileReadiness, UserProfile};

use crate::config::{ProfileConfig, TemporalConfig};
use crate::models::InteractionRecord;
use crate::services::temporal::TemporalAnalyzer;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProfileBuilderError {
    #[error("Insufficient data: {completed} completed interactions, {required} required")]
    InsufficientData { completed: u32, required: u32 },

    #[error("Profile inconsistent with history: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, ProfileBuilderError>;

pub struct ProfileBuilder {
    config: ProfileConfig,
    temporal: TemporalAnalyzer,
}

impl ProfileBuilder {
    pub fn new(config: ProfileConfig, temporal: TemporalConfig) -> Self {
        Self {
            config,
            temporal: TemporalAnalyzer::new(temporal),
        }
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn temporal(&self) -> &TemporalAnalyzer {
        &self.temporal
    }

    /// Empty accumulator for incremental rebuilds
    pub fn accumulator(&self) -> ProfileAccumulator {
        ProfileAccumulator::new(&self.config, self.temporal.accumulator())
    }

    /// Absorb newly appended records
    pub fn extend(&self, acc: &mut ProfileAccumulator, records: &[InteractionRecord]) {
        for record in records {
            acc.absorb(record);
        }
    }

    /// Full rebuild from the complete history
    pub fn rebuild_profile(
        &self,
        history: &[InteractionRecord],
        previous: Option<&UserProfile>,
        as_of: DateTime<Utc>,
    ) -> UserProfile {
        let mut acc = self.accumulator();
        self.extend(&mut acc, history);
        let profile = self.snapshot(&acc, previous, as_of);

        debug!(
            version = profile.version,
            completed = profile.total_completed,
            comfort_zone = profile.comfort_zone,
            ready = profile.is_ready(),
            "Profile rebuilt from full history"
        );

        profile
    }

    /// Freeze the accumulator into a new profile version
    pub fn snapshot(
        &self,
        acc: &ProfileAccumulator,
        previous: Option<&UserProfile>,
        as_of: DateTime<Utc>,
    ) -> UserProfile {
        let completed = acc.completed();
        let readiness = if completed >= self.config.min_completed {
            ProfileReadiness::Ready
        } else {
            ProfileReadiness::InsufficientData {
                completed,
                required: self.config.min_completed,
            }
        };

        // A rebuild may move the comfort zone by at most one step
        let comfort_zone = match previous {
            Some(prev) => acc
                .comfort_zone()
                .clamp(prev.comfort_zone - 1.0, prev.comfort_zone + 1.0),
            None => acc.comfort_zone(),
        };

        let days_since_first_interaction = acc
            .first_interaction_at()
            .map(|first| (as_of - first).num_days().max(0) as u32)
            .unwrap_or(0);

        let growth_trajectory = matches!(readiness, ProfileReadiness::Ready)
            .then(|| acc.growth_trajectory());

        let temporal = acc.temporal();
        UserProfile {
            version: previous.map_or(1, |p| p.version + 1),
            rebuilt_at: as_of,
            readiness,
            total_completed: completed,
            total_resolved: acc.resolved(),
            current_streak: temporal.streak(as_of).current,
            days_since_first_interaction,
            categories: acc.category_stats(),
            preferred_hours: temporal.hour_histogram(),
            day_of_week: temporal.day_histogram(),
            preferences: acc.preferences(),
            comfort_zone,
            growth_trajectory,
        }
    }

    /// Compare an incrementally maintained accumulator against a full rebuild
    pub fn verify_consistency(
        &self,
        acc: &ProfileAccumulator,
        history: &[InteractionRecord],
    ) -> Result<()> {
        let mut full = self.accumulator();
        self.extend(&mut full, history);

        if full == *acc {
            return Ok(());
        }

        Err(ProfileBuilderError::Inconsistent(format!(
            "incremental state saw {} entries ({} completed), full rebuild saw {} ({} completed)",
            acc.absorbed(),
            acc.completed(),
            full.absorbed(),
            full.completed()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CandidateAttributes, Category, CostClass, LocationClass, Outcome, SocialRequirement,
        TimeInvestment,
    };
    use chrono::Duration;

    fn candidate(category: Category, difficulty: u8) -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: format!("{}-{}", category.as_str(), difficulty),
            category,
            time_investment: TimeInvestment::Quick,
            social_requirement: SocialRequirement::Solo,
            cost: CostClass::Low,
            difficulty,
            location: LocationClass::Home,
            tags: vec![],
            content_hash: "h".to_string(),
        }
    }

    fn history(n: usize, start: DateTime<Utc>) -> Vec<InteractionRecord> {
        (0..n)
            .map(|i| {
                InteractionRecord::assigned(
                    &candidate(Category::Creative, 2),
                    start + Duration::hours(i as i64 * 20),
                )
                .with_outcome(Outcome::Completed)
                .with_rating(5)
            })
            .collect()
    }

    fn builder() -> ProfileBuilder {
        ProfileBuilder::new(ProfileConfig::default(), TemporalConfig::default())
    }

    #[test]
    fn test_insufficient_history_is_flagged_not_failed() {
        let start = Utc::now() - Duration::days(30);
        let profile = builder().rebuild_profile(&history(4, start), None, Utc::now());

        assert!(!profile.is_ready());
        assert_eq!(
            profile.readiness,
            ProfileReadiness::InsufficientData {
                completed: 4,
                required: 10
            }
        );
        assert!(profile.growth_trajectory.is_none());
        assert!(matches!(
            profile.require_ready(),
            Err(ProfileBuilderError::InsufficientData { completed: 4, .. })
        ));
    }

    #[test]
    fn test_category_aggregates() {
        let start = Utc::now() - Duration::days(30);
        let profile = builder().rebuild_profile(&history(12, start), None, Utc::now());

        assert!(profile.is_ready());
        let creative = profile.category(Category::Creative).unwrap();
        assert_eq!(creative.completed, 12);
        assert_eq!(creative.mean_rating, Some(5.0));
        assert!((creative.completion_rate - 1.0).abs() < 1e-6);
        assert_eq!(profile.comfort_zone, 2.0);
        assert_eq!(profile.days_since_first_interaction, 30);
    }

    #[test]
    fn test_version_increments() {
        let start = Utc::now() - Duration::days(30);
        let h = history(3, start);
        let first = builder().rebuild_profile(&h, None, Utc::now());
        let second = builder().rebuild_profile(&h, Some(&first), Utc::now());
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
    }

    #[test]
    fn test_rebuild_clamps_against_previous_profile() {
        let start = Utc::now() - Duration::days(30);
        let as_of = Utc::now();
        let easy = builder().rebuild_profile(&history(2, start), None, as_of);
        assert_eq!(easy.comfort_zone, 2.0);

        let mut hard: Vec<_> = (0..6)
            .map(|i| {
                InteractionRecord::assigned(
                    &candidate(Category::Physical, 5),
                    start + Duration::hours(i),
                )
                .with_outcome(Outcome::Completed)
            })
            .collect();
        hard.extend(history(2, start));

        // The replay alone would reach 5; the previous snapshot caps it at 3
        let next = builder().rebuild_profile(&hard, Some(&easy), as_of);
        assert_eq!(next.comfort_zone, 3.0);
    }

    #[test]
    fn test_incremental_matches_full_rebuild() {
        let start = Utc::now() - Duration::days(30);
        let h = history(15, start);
        let b = builder();

        let mut acc = b.accumulator();
        b.extend(&mut acc, &h[..7]);
        b.extend(&mut acc, &h[7..]);

        assert!(b.verify_consistency(&acc, &h).is_ok());
        assert!(b.verify_consistency(&acc, &h[..10]).is_err());
    }
}
