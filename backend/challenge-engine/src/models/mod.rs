use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CandidateId = String;

/// Lowest and highest difficulty a catalog entry may carry
pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Creative,
    Physical,
    Social,
    Culinary,
    Learning,
    Outdoor,
    Mindfulness,
    Cultural,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Creative,
        Category::Physical,
        Category::Social,
        Category::Culinary,
        Category::Learning,
        Category::Outdoor,
        Category::Mindfulness,
        Category::Cultural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Creative => "creative",
            Category::Physical => "physical",
            Category::Social => "social",
            Category::Culinary => "culinary",
            Category::Learning => "learning",
            Category::Outdoor => "outdoor",
            Category::Mindfulness => "mindfulness",
            Category::Cultural => "cultural",
        }
    }
}

/// A closed set of attribute classes that can be tallied into a preference vector
pub trait AttributeClass: Copy {
    const COUNT: usize;

    fn index(self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInvestment {
    Quick,    // under 30 minutes
    Moderate, // an afternoon
    Extended, // a day or more
}

impl AttributeClass for TimeInvestment {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialRequirement {
    Solo,
    Partner,
    Group,
}

impl AttributeClass for SocialRequirement {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Free,
    Low,
    Medium,
    High,
}

impl AttributeClass for CostClass {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationClass {
    Home,
    Local,
    Outdoor,
    Travel,
}

impl AttributeClass for LocationClass {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

/// Static attributes of a challenge as they were at assignment time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeTraits {
    pub category: Category,
    pub time_investment: TimeInvestment,
    pub social_requirement: SocialRequirement,
    pub cost: CostClass,
    pub difficulty: u8,
    pub location: LocationClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Skipped,
    Expired,
}

/// One assigned challenge and, once the user acted, its terminal outcome.
///
/// Records are append-only: a pending assignment may be followed by exactly one
/// terminal entry carrying the same `interaction_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub interaction_id: Uuid,
    pub candidate_id: CandidateId,
    pub traits: ChallengeTraits,
    pub assigned_at: DateTime<Utc>,
    /// None while the assignment is still awaiting the user
    pub outcome: Option<Outcome>,
    /// 1-5 rating given after completion
    pub rating: Option<u8>,
    pub completion_minutes: Option<u32>,
    pub photo_captured: Option<bool>,
    pub shared: Option<bool>,
}

impl InteractionRecord {
    /// Pending record for a freshly assigned candidate
    pub fn assigned(candidate: &CandidateAttributes, assigned_at: DateTime<Utc>) -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            candidate_id: candidate.candidate_id.clone(),
            traits: candidate.traits(),
            assigned_at,
            outcome: None,
            rating: None,
            completion_minutes: None,
            photo_captured: None,
            shared: None,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_completion_minutes(mut self, minutes: u32) -> Self {
        self.completion_minutes = Some(minutes);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Some(Outcome::Completed)
    }

    /// Best estimate of when the user acted on the challenge
    pub fn acted_at(&self) -> DateTime<Utc> {
        match self.completion_minutes {
            Some(minutes) => self.assigned_at + Duration::minutes(i64::from(minutes)),
            None => self.assigned_at,
        }
    }

    /// Rating mapped from 1..=5 onto 0.0..=1.0
    pub fn normalized_rating(&self) -> Option<f32> {
        self.rating
            .filter(|r| (1..=5).contains(r))
            .map(|r| f32::from(r - 1) / 4.0)
    }
}

/// Catalog descriptor of an available challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAttributes {
    pub candidate_id: CandidateId,
    pub category: Category,
    pub time_investment: TimeInvestment,
    pub social_requirement: SocialRequirement,
    pub cost: CostClass,
    pub difficulty: u8,
    pub location: LocationClass,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content_hash: String,
}

impl CandidateAttributes {
    pub fn traits(&self) -> ChallengeTraits {
        ChallengeTraits {
            category: self.category,
            time_investment: self.time_investment,
            social_requirement: self.social_requirement,
            cost: self.cost,
            difficulty: self.difficulty,
            location: self.location,
        }
    }

    /// Returns the reason the entry is malformed, if any
    pub fn validate(&self) -> Result<(), String> {
        if self.candidate_id.trim().is_empty() {
            return Err("empty candidate id".to_string());
        }
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(format!(
                "difficulty {} outside {}..={}",
                self.difficulty, MIN_DIFFICULTY, MAX_DIFFICULTY
            ));
        }
        if self.content_hash.trim().is_empty() {
            return Err("missing content hash".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    Completion,
    Enjoyment,
    TimingQuality,
}

impl PredictionTarget {
    pub const ALL: [PredictionTarget; 3] = [
        PredictionTarget::Completion,
        PredictionTarget::Enjoyment,
        PredictionTarget::TimingQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionTarget::Completion => "completion",
            PredictionTarget::Enjoyment => "enjoyment",
            PredictionTarget::TimingQuality => "timing_quality",
        }
    }

    /// Whether labels are 0/1 outcomes (reported with accuracy as well as error)
    pub fn is_binary(&self) -> bool {
        !matches!(self, PredictionTarget::Enjoyment)
    }
}

/// Where a prediction came from; drives the confidence attached to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    /// Deployed model
    Learned,
    /// Deployed model that is due for retraining
    LearnedStale,
    /// Untrained model, approximated from the user's own profile
    ProfileHeuristic,
    /// Insufficient profile, configured category base-rates
    BaseRate,
}

/// Per-request scoring result. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate_id: CandidateId,
    pub category: Category,
    pub difficulty: u8,
    pub completion_probability: f32,
    pub enjoyment_estimate: f32,
    pub growth_potential: f32,
    pub combined_score: f32,
    pub confidence: f32,
    pub source: PredictionSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(difficulty: u8) -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: "c-1".to_string(),
            category: Category::Creative,
            time_investment: TimeInvestment::Quick,
            social_requirement: SocialRequirement::Solo,
            cost: CostClass::Free,
            difficulty,
            location: LocationClass::Home,
            tags: vec![],
            content_hash: "ab12".to_string(),
        }
    }

    #[test]
    fn test_validate_difficulty_range() {
        assert!(candidate(3).validate().is_ok());
        assert!(candidate(0).validate().is_err());
        assert!(candidate(6).validate().is_err());
    }

    #[test]
    fn test_normalized_rating() {
        let record = InteractionRecord::assigned(&candidate(2), Utc::now())
            .with_outcome(Outcome::Completed)
            .with_rating(5);
        assert_eq!(record.normalized_rating(), Some(1.0));

        let unrated = InteractionRecord::assigned(&candidate(2), Utc::now());
        assert_eq!(unrated.normalized_rating(), None);
    }

    #[test]
    fn test_acted_at_adds_duration() {
        let at = Utc::now();
        let record = InteractionRecord::assigned(&candidate(2), at).with_completion_minutes(90);
        assert_eq!(record.acted_at(), at + Duration::minutes(90));
    }

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::Mindfulness).unwrap();
        assert_eq!(json, "\"mindfulness\"");
    }
}
