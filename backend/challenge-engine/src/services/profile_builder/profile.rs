use super::{ProfileBuilderError, Result};
use crate::models::{AttributeClass, Category, ChallengeTraits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived per-user aggregate, rebuilt from the interaction history.
///
/// Snapshots are immutable values; a rebuild always yields a new one with a
/// higher `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub version: u64,
    pub rebuilt_at: DateTime<Utc>,
    pub readiness: ProfileReadiness,
    pub total_completed: u32,
    pub total_resolved: u32,
    pub current_streak: u32,
    pub days_since_first_interaction: u32,
    pub categories: BTreeMap<Category, CategoryStats>,
    pub preferred_hours: [u32; 24],
    pub day_of_week: [u32; 7],
    pub preferences: AttributePreferences,
    /// Difficulty level the user reliably completes
    pub comfort_zone: f32,
    /// Slope of attempted difficulty per attempt; unset while data is insufficient
    pub growth_trajectory: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProfileReadiness {
    Ready,
    InsufficientData { completed: u32, required: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub attempts: u32,
    pub completed: u32,
    pub completion_rate: f32,
    /// Mean 1-5 rating over rated completions
    pub mean_rating: Option<f32>,
    pub rated: u32,
}

/// Smoothed completion rate per attribute class, indexed by `AttributeClass::index`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePreferences {
    pub time_investment: Vec<f32>,
    pub social_requirement: Vec<f32>,
    pub cost: Vec<f32>,
    pub location: Vec<f32>,
}

impl AttributePreferences {
    pub fn neutral() -> Self {
        use crate::models::{CostClass, LocationClass, SocialRequirement, TimeInvestment};
        Self {
            time_investment: vec![0.5; TimeInvestment::COUNT],
            social_requirement: vec![0.5; SocialRequirement::COUNT],
            cost: vec![0.5; CostClass::COUNT],
            location: vec![0.5; LocationClass::COUNT],
        }
    }

    /// Preference values matching one challenge, in a fixed order
    pub fn for_traits(&self, traits: &ChallengeTraits) -> [f32; 4] {
        [
            lookup(&self.time_investment, traits.time_investment),
            lookup(&self.social_requirement, traits.social_requirement),
            lookup(&self.cost, traits.cost),
            lookup(&self.location, traits.location),
        ]
    }
}

fn lookup<C: AttributeClass>(values: &[f32], class: C) -> f32 {
    values.get(class.index()).copied().unwrap_or(0.5)
}

impl UserProfile {
    pub fn is_ready(&self) -> bool {
        matches!(self.readiness, ProfileReadiness::Ready)
    }

    /// Surface the insufficient-data state as an error for callers that need a trusted profile
    pub fn require_ready(&self) -> Result<()> {
        match self.readiness {
            ProfileReadiness::Ready => Ok(()),
            ProfileReadiness::InsufficientData {
                completed,
                required,
            } => Err(ProfileBuilderError::InsufficientData {
                completed,
                required,
            }),
        }
    }

    pub fn category(&self, category: Category) -> Option<&CategoryStats> {
        self.categories.get(&category)
    }

    /// Completion rate blended with `prior` using `strength` pseudo-observations
    pub fn smoothed_completion_rate(&self, category: Category, prior: f32, strength: f32) -> f32 {
        match self.category(category) {
            Some(stats) if stats.attempts > 0 => {
                (stats.completed as f32 + prior * strength) / (stats.attempts as f32 + strength)
            }
            _ => prior,
        }
    }

    /// Mean rating mapped to 0..1 and blended with `prior`
    pub fn smoothed_enjoyment(&self, category: Category, prior: f32, strength: f32) -> f32 {
        match self.category(category) {
            Some(CategoryStats {
                mean_rating: Some(mean),
                rated,
                ..
            }) if *rated > 0 => {
                let normalized = ((mean - 1.0) / 4.0).clamp(0.0, 1.0);
                (normalized * *rated as f32 + prior * strength) / (*rated as f32 + strength)
            }
            _ => prior,
        }
    }
}
