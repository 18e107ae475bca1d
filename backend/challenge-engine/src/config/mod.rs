use crate::models::Category;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {section} config from environment: {source}")]
    Env {
        section: &'static str,
        #[source]
        source: envy::Error,
    },

    #[error("Invalid {section} config: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profile: ProfileConfig,
    pub temporal: TemporalConfig,
    pub scoring: ScoringConfig,
    pub selection: SelectionConfig,
    pub training: TrainingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Completed interactions needed before the profile is trusted
    pub min_completed: u32,
    /// Comfort zone before any evidence exists
    pub default_comfort_zone: f32,
    /// Completion rate a difficulty level needs to count as "reliably completed"
    pub reliability_threshold: f32,
    /// Completions a difficulty level needs before it can become the comfort zone
    pub min_completions_per_level: u32,
    /// Most recent attempts used for the growth trajectory slope
    pub growth_window: usize,
    /// Full-rebuild comparison cadence for the incremental profile (0 disables)
    pub consistency_check_every: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            min_completed: 10,
            default_comfort_zone: 2.0,
            reliability_threshold: 0.6,
            min_completions_per_level: 2,
            growth_window: 20,
            consistency_check_every: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Device offset from UTC, used to bucket hours and days
    pub utc_offset_minutes: i32,
    /// Number of peak hours / days reported
    pub peak_count: usize,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            peak_count: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub completion_weight: f32,
    pub enjoyment_weight: f32,
    pub growth_weight: f32,

    /// Stretch (difficulty - comfort zone) at which growth potential peaks
    pub growth_peak_stretch: f32,
    /// Stretch after which growth potential decays exponentially
    pub growth_tail_start: f32,
    /// Growth potential remaining at `growth_tail_start`
    pub growth_tail_value: f32,
    /// Half-life, in difficulty steps, of the decay past the tail start
    pub growth_tail_half_life: f32,

    /// Neutral enjoyment prior used on cold start
    pub enjoyment_prior: f32,
    /// Pseudo-observations blended into per-category rates
    pub prior_strength: f32,

    pub confidence_learned: f32,
    pub confidence_stale: f32,
    pub confidence_heuristic: f32,
    pub confidence_base_rate: f32,

    /// Population completion base-rates per category
    #[serde(skip)]
    pub category_base_rates: BTreeMap<Category, f32>,
    pub default_base_rate: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let category_base_rates = [
            (Category::Creative, 0.62),
            (Category::Physical, 0.55),
            (Category::Social, 0.48),
            (Category::Culinary, 0.66),
            (Category::Learning, 0.58),
            (Category::Outdoor, 0.52),
            (Category::Mindfulness, 0.70),
            (Category::Cultural, 0.50),
        ]
        .into_iter()
        .collect();

        Self {
            completion_weight: 0.4,
            enjoyment_weight: 0.4,
            growth_weight: 0.2,
            growth_peak_stretch: 1.0,
            growth_tail_start: 2.0,
            growth_tail_value: 0.25,
            growth_tail_half_life: 0.5,
            enjoyment_prior: 0.5,
            prior_strength: 2.0,
            confidence_learned: 0.9,
            confidence_stale: 0.7,
            confidence_heuristic: 0.5,
            confidence_base_rate: 0.3,
            category_base_rates,
            default_base_rate: 0.55,
        }
    }
}

impl ScoringConfig {
    pub fn base_rate(&self, category: Category) -> f32 {
        self.category_base_rates
            .get(&category)
            .copied()
            .unwrap_or(self.default_base_rate)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Hard bound: difficulty may exceed the comfort zone by at most this many steps
    pub max_stretch: f32,
    /// Categories presented within this many days are excluded
    pub exclusion_window_days: i64,
    /// Recent-category exclusion is skipped if it would leave fewer candidates than this
    pub diversity_min_pool: usize,
    /// Cap on same-category entries in one shortlist
    pub max_same_category: usize,
    /// Scores closer than this are ranked by confidence first
    pub near_tie_epsilon: f32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_stretch: 2.0,
            exclusion_window_days: 2,
            diversity_min_pool: 3,
            max_same_category: 2,
            near_tie_epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// New completed examples since the last attempt that trigger a retrain
    pub retrain_threshold: u32,
    /// Model age that triggers a retrain
    pub max_model_age_hours: i64,
    /// Chronological tail held out for validation
    pub validation_fraction: f32,
    /// A candidate may be worse than the deployed model by at most this much
    pub promotion_epsilon: f32,
    /// Labeled examples required before a fit is attempted
    pub min_training_examples: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            retrain_threshold: 50,
            max_model_age_hours: 24 * 7,
            validation_fraction: 0.2,
            promotion_epsilon: 0.01,
            min_training_examples: 20,
            epochs: 400,
            learning_rate: 0.5,
            l2_penalty: 0.001,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between trigger evaluations
    pub tick_secs: u64,
    /// Exit after a single evaluation pass
    pub run_once: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 15 * 60,
            run_once: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `CHALLENGE_<SECTION>_<FIELD>` environment variables.
    ///
    /// Missing variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            profile: section("profile", "CHALLENGE_PROFILE_")?,
            temporal: section("temporal", "CHALLENGE_TEMPORAL_")?,
            scoring: section("scoring", "CHALLENGE_SCORING_")?,
            selection: section("selection", "CHALLENGE_SELECTION_")?,
            training: section("training", "CHALLENGE_TRAINING_")?,
            scheduler: section("scheduler", "CHALLENGE_SCHEDULER_")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scoring = &self.scoring;
        let weights = [
            scoring.completion_weight,
            scoring.enjoyment_weight,
            scoring.growth_weight,
        ];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f32>() <= 0.0 {
            return Err(invalid("scoring", "weights must be non-negative and not all zero"));
        }
        if scoring.growth_tail_start < scoring.growth_peak_stretch || scoring.growth_peak_stretch <= 0.0
        {
            return Err(invalid(
                "scoring",
                "growth curve needs 0 < peak stretch <= tail start",
            ));
        }

        if self.selection.max_same_category == 0 {
            return Err(invalid("selection", "max_same_category must be at least 1"));
        }
        if self.selection.exclusion_window_days < 0 {
            return Err(invalid("selection", "exclusion window cannot be negative"));
        }

        let fraction = self.training.validation_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(invalid("training", "validation_fraction must be in (0, 1)"));
        }
        if self.training.epochs == 0 || self.training.learning_rate <= 0.0 {
            return Err(invalid("training", "epochs and learning_rate must be positive"));
        }

        if self.profile.min_completions_per_level == 0 {
            return Err(invalid("profile", "min_completions_per_level must be at least 1"));
        }

        Ok(())
    }
}

fn section<T: serde::de::DeserializeOwned>(name: &'static str, prefix: &str) -> Result<T> {
    envy::prefixed(prefix)
        .from_env::<T>()
        .map_err(|source| ConfigError::Env {
            section: name,
            source,
        })
}

fn invalid(section: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        section,
        reason: reason.to_string(),
    }
}
