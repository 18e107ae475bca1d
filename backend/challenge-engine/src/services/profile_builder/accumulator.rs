// Incremental profile state.
//
// Every aggregate in the profile is a fold over the history, so the
// accumulator can absorb newly appended records without revisiting old ones.
// A full rebuild is the same fold started from an empty accumulator.

use super::profile::{AttributePreferences, CategoryStats};
use crate::config::ProfileConfig;
use crate::models::{
    AttributeClass, Category, ChallengeTraits, CostClass, InteractionRecord, LocationClass,
    SocialRequirement, TimeInvestment, MAX_DIFFICULTY, MIN_DIFFICULTY,
};
use crate::services::temporal::TemporalAccumulator;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tally {
    attempts: u32,
    completed: u32,
}

impl Tally {
    fn record(&mut self, completed: bool) {
        self.attempts += 1;
        self.completed += u32::from(completed);
    }

    /// Laplace-smoothed completion rate, 0.5 with no attempts
    fn smoothed(&self) -> f32 {
        (self.completed as f32 + 1.0) / (self.attempts as f32 + 2.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CategoryTally {
    outcomes: Tally,
    rating_sum: u32,
    rated: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct ClassTallies {
    time_investment: Vec<Tally>,
    social_requirement: Vec<Tally>,
    cost: Vec<Tally>,
    location: Vec<Tally>,
}

impl ClassTallies {
    fn new() -> Self {
        Self {
            time_investment: vec![Tally::default(); TimeInvestment::COUNT],
            social_requirement: vec![Tally::default(); SocialRequirement::COUNT],
            cost: vec![Tally::default(); CostClass::COUNT],
            location: vec![Tally::default(); LocationClass::COUNT],
        }
    }

    fn record(&mut self, traits: &ChallengeTraits, completed: bool) {
        self.time_investment[traits.time_investment.index()].record(completed);
        self.social_requirement[traits.social_requirement.index()].record(completed);
        self.cost[traits.cost.index()].record(completed);
        self.location[traits.location.index()].record(completed);
    }

    fn preferences(&self) -> AttributePreferences {
        let smooth =
            |tallies: &[Tally]| -> Vec<f32> { tallies.iter().map(Tally::smoothed).collect() };
        AttributePreferences {
            time_investment: smooth(&self.time_investment),
            social_requirement: smooth(&self.social_requirement),
            cost: smooth(&self.cost),
            location: smooth(&self.location),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAccumulator {
    reliability_threshold: f32,
    min_completions_per_level: u32,
    growth_window: usize,

    /// Log entries seen so far, pending ones included
    absorbed: usize,
    first_interaction_at: Option<DateTime<Utc>>,
    resolved: u32,
    completed: u32,
    categories: BTreeMap<Category, CategoryTally>,
    classes: ClassTallies,
    levels: [Tally; MAX_DIFFICULTY as usize],
    comfort_zone: f32,
    recent_difficulties: VecDeque<u8>,
    temporal: TemporalAccumulator,
}

impl ProfileAccumulator {
    pub fn new(config: &ProfileConfig, temporal: TemporalAccumulator) -> Self {
        Self {
            reliability_threshold: config.reliability_threshold,
            min_completions_per_level: config.min_completions_per_level,
            growth_window: config.growth_window.max(2),
            absorbed: 0,
            first_interaction_at: None,
            resolved: 0,
            completed: 0,
            categories: BTreeMap::new(),
            classes: ClassTallies::new(),
            levels: [Tally::default(); MAX_DIFFICULTY as usize],
            comfort_zone: config
                .default_comfort_zone
                .round()
                .clamp(f32::from(MIN_DIFFICULTY), f32::from(MAX_DIFFICULTY)),
            recent_difficulties: VecDeque::new(),
            temporal,
        }
    }

    pub fn absorb(&mut self, record: &InteractionRecord) {
        self.absorbed += 1;
        self.first_interaction_at = Some(match self.first_interaction_at {
            Some(first) => first.min(record.assigned_at),
            None => record.assigned_at,
        });

        if !record.is_terminal() {
            return;
        }

        let completed = record.is_completed();
        let traits = &record.traits;

        self.resolved += 1;
        self.completed += u32::from(completed);

        let category = self.categories.entry(traits.category).or_default();
        category.outcomes.record(completed);
        if completed {
            if let Some(rating) = record.rating.filter(|r| (1..=5).contains(r)) {
                category.rating_sum += u32::from(rating);
                category.rated += 1;
            }
        }

        self.classes.record(traits, completed);

        let level = traits.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        self.levels[usize::from(level - 1)].record(completed);

        self.recent_difficulties.push_back(level);
        if self.recent_difficulties.len() > self.growth_window {
            self.recent_difficulties.pop_front();
        }

        self.temporal.absorb(record);
        self.step_comfort_zone();
    }

    /// Move the comfort zone at most one step toward the current raw ceiling
    fn step_comfort_zone(&mut self) {
        if let Some(ceiling) = self.raw_ceiling() {
            self.comfort_zone = ceiling.clamp(self.comfort_zone - 1.0, self.comfort_zone + 1.0);
        }
    }

    /// Highest difficulty completed often and reliably enough, if any
    fn raw_ceiling(&self) -> Option<f32> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, tally)| {
                tally.completed >= self.min_completions_per_level
                    && tally.completed as f32 / tally.attempts as f32 >= self.reliability_threshold
            })
            .map(|(idx, _)| (idx + 1) as f32)
    }

    pub fn absorbed(&self) -> usize {
        self.absorbed
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn resolved(&self) -> u32 {
        self.resolved
    }

    pub fn comfort_zone(&self) -> f32 {
        self.comfort_zone
    }

    pub fn first_interaction_at(&self) -> Option<DateTime<Utc>> {
        self.first_interaction_at
    }

    pub fn temporal(&self) -> &TemporalAccumulator {
        &self.temporal
    }

    pub fn category_stats(&self) -> BTreeMap<Category, CategoryStats> {
        self.categories
            .iter()
            .map(|(category, tally)| {
                let stats = CategoryStats {
                    attempts: tally.outcomes.attempts,
                    completed: tally.outcomes.completed,
                    completion_rate: if tally.outcomes.attempts > 0 {
                        tally.outcomes.completed as f32 / tally.outcomes.attempts as f32
                    } else {
                        0.0
                    },
                    mean_rating: (tally.rated > 0)
                        .then(|| tally.rating_sum as f32 / tally.rated as f32),
                    rated: tally.rated,
                };
                (*category, stats)
            })
            .collect()
    }

    pub fn preferences(&self) -> AttributePreferences {
        self.classes.preferences()
    }

    /// Least-squares slope of attempted difficulty over the recent window
    pub fn growth_trajectory(&self) -> f32 {
        let n = self.recent_difficulties.len();
        if n < 2 {
            return 0.0;
        }

        let mean_x = (n - 1) as f32 / 2.0;
        let mean_y =
            self.recent_difficulties.iter().map(|&d| f32::from(d)).sum::<f32>() / n as f32;

        let (mut num, mut den) = (0.0f32, 0.0f32);
        for (i, &d) in self.recent_difficulties.iter().enumerate() {
            let dx = i as f32 - mean_x;
            num += dx * (f32::from(d) - mean_y);
            den += dx * dx;
        }

        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemporalConfig;
    use crate::models::{CandidateAttributes, Outcome};
    use crate::services::temporal::TemporalAnalyzer;

    fn record(difficulty: u8, outcome: Outcome) -> InteractionRecord {
        let candidate = CandidateAttributes {
            candidate_id: format!("d{}", difficulty),
            category: Category::Physical,
            time_investment: TimeInvestment::Moderate,
            social_requirement: SocialRequirement::Solo,
            cost: CostClass::Free,
            difficulty,
            location: LocationClass::Outdoor,
            tags: vec![],
            content_hash: "h".to_string(),
        };
        InteractionRecord::assigned(&candidate, Utc::now()).with_outcome(outcome)
    }

    fn accumulator() -> ProfileAccumulator {
        let temporal = TemporalAnalyzer::new(TemporalConfig::default()).accumulator();
        ProfileAccumulator::new(&ProfileConfig::default(), temporal)
    }

    #[test]
    fn test_comfort_zone_climbs_one_step_at_a_time() {
        let mut acc = accumulator();
        assert_eq!(acc.comfort_zone(), 2.0);

        // Two reliable completions at level 5 move the ceiling, but only by one step
        acc.absorb(&record(5, Outcome::Completed));
        acc.absorb(&record(5, Outcome::Completed));
        assert_eq!(acc.comfort_zone(), 3.0);

        acc.absorb(&record(5, Outcome::Completed));
        assert_eq!(acc.comfort_zone(), 4.0);
        acc.absorb(&record(5, Outcome::Completed));
        assert_eq!(acc.comfort_zone(), 5.0);
    }

    #[test]
    fn test_comfort_zone_unchanged_without_reliable_level() {
        let mut acc = accumulator();
        acc.absorb(&record(4, Outcome::Skipped));
        acc.absorb(&record(4, Outcome::Expired));
        assert_eq!(acc.comfort_zone(), 2.0);
    }

    #[test]
    fn test_pending_records_only_count_as_seen() {
        let mut acc = accumulator();
        let mut pending = record(3, Outcome::Completed);
        pending.outcome = None;
        acc.absorb(&pending);

        assert_eq!(acc.absorbed(), 1);
        assert_eq!(acc.resolved(), 0);
        assert!(acc.first_interaction_at().is_some());
    }

    #[test]
    fn test_growth_trajectory_slope() {
        let mut acc = accumulator();
        for d in 1..=5 {
            acc.absorb(&record(d, Outcome::Completed));
        }
        assert!((acc.growth_trajectory() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_class_preferences_smoothed() {
        let mut acc = accumulator();
        acc.absorb(&record(2, Outcome::Completed));
        let prefs = acc.preferences();
        // one completion out of one attempt: (1 + 1) / (1 + 2)
        assert!((prefs.location[LocationClass::Outdoor.index()] - 2.0 / 3.0).abs() < 1e-6);
        assert!((prefs.location[LocationClass::Home.index()] - 0.5).abs() < 1e-6);
    }
}
