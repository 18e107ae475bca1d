// ============================================
// Temporal Pattern Analyzer
// ============================================
//
// Derives timing features from interaction history:
// 1. Preferred hours (24-bucket histogram of completions)
// 2. Day-of-week effect (7 buckets, 0 = Monday)
// 3. Streak behavior (current / longest / mean runs of active days)
// 4. Optional season and weather breakdowns when context is supplied
//
// Ties between equally busy hours (or days) go to the bucket that was
// observed first in the history, not the numerically smallest one.

mod streaks;

pub use streaks::StreakSummary;

use crate::config::TemporalConfig;
use crate::models::InteractionRecord;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Timing summary for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPatterns {
    pub hour_histogram: [u32; 24],
    pub day_histogram: [u32; 7],
    /// Busiest hours, busiest first
    pub peak_hours: Vec<u8>,
    /// Busiest days of week, busiest first
    pub peak_days: Vec<u8>,
    pub streak: StreakSummary,
    pub seasons: Option<BTreeMap<Season, OutcomeTally>>,
    pub weather: Option<BTreeMap<String, OutcomeTally>>,
}

impl TemporalPatterns {
    /// Relative activity (0..1) at a local hour and weekday; 0.5 when nothing is known
    pub fn activity_score(&self, hour: u8, day: u8) -> f32 {
        let hour_score = relative_share(&self.hour_histogram, hour as usize);
        let day_score = relative_share(&self.day_histogram, day as usize);
        match (hour_score, day_score) {
            (Some(h), Some(d)) => (h + d) / 2.0,
            _ => 0.5,
        }
    }
}

/// Externally supplied enrichment; the analyzer works without it
#[derive(Debug, Clone, Default)]
pub struct TemporalContext {
    pub hemisphere: Option<Hemisphere>,
    /// Weather label per local date, e.g. "rain"
    pub weather_by_date: BTreeMap<NaiveDate, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    Northern,
    Southern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    fn from_month(month: u32, hemisphere: Hemisphere) -> Self {
        let northern = match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        };
        match hemisphere {
            Hemisphere::Northern => northern,
            Hemisphere::Southern => match northern {
                Season::Winter => Season::Summer,
                Season::Spring => Season::Autumn,
                Season::Summer => Season::Winter,
                Season::Autumn => Season::Spring,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutcomeTally {
    pub attempts: u32,
    pub completed: u32,
}

impl OutcomeTally {
    pub fn completion_rate(&self) -> f32 {
        if self.attempts == 0 {
            0.0
        } else {
            self.completed as f32 / self.attempts as f32
        }
    }
}

/// Running timing aggregates, extended one record at a time
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalAccumulator {
    offset: FixedOffset,
    hour_counts: [u32; 24],
    day_counts: [u32; 7],
    hour_first_seen: [Option<u32>; 24],
    day_first_seen: [Option<u32>; 7],
    observations: u32,
    active_dates: BTreeSet<NaiveDate>,
}

impl TemporalAccumulator {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            hour_counts: [0; 24],
            day_counts: [0; 7],
            hour_first_seen: [None; 24],
            day_first_seen: [None; 7],
            observations: 0,
            active_dates: BTreeSet::new(),
        }
    }

    /// Fold one record in; only completions shape the timing histograms
    pub fn absorb(&mut self, record: &InteractionRecord) {
        if !record.is_completed() {
            return;
        }

        let local = record.acted_at().with_timezone(&self.offset);
        let hour = local.hour() as usize;
        let day = local.weekday().num_days_from_monday() as usize;

        self.hour_counts[hour] += 1;
        self.day_counts[day] += 1;
        self.hour_first_seen[hour].get_or_insert(self.observations);
        self.day_first_seen[day].get_or_insert(self.observations);
        self.observations += 1;
        self.active_dates.insert(local.date_naive());
    }

    pub fn hour_histogram(&self) -> [u32; 24] {
        self.hour_counts
    }

    pub fn day_histogram(&self) -> [u32; 7] {
        self.day_counts
    }

    pub fn hour_share(&self, hour: u8) -> f32 {
        share(&self.hour_counts, hour as usize)
    }

    pub fn day_share(&self, day: u8) -> f32 {
        share(&self.day_counts, day as usize)
    }

    pub fn local_hour_and_day(&self, at: DateTime<Utc>) -> (u8, u8) {
        let local = at.with_timezone(&self.offset);
        (
            local.hour() as u8,
            local.weekday().num_days_from_monday() as u8,
        )
    }

    pub fn peak_hours(&self, n: usize) -> Vec<u8> {
        peaks(&self.hour_counts, &self.hour_first_seen, n)
    }

    pub fn peak_days(&self, n: usize) -> Vec<u8> {
        peaks(&self.day_counts, &self.day_first_seen, n)
    }

    pub fn streak(&self, as_of: DateTime<Utc>) -> StreakSummary {
        let today = as_of.with_timezone(&self.offset).date_naive();
        StreakSummary::from_dates(&self.active_dates, today)
    }
}

pub struct TemporalAnalyzer {
    config: TemporalConfig,
}

impl TemporalAnalyzer {
    pub fn new(config: TemporalConfig) -> Self {
        Self { config }
    }

    pub fn offset(&self) -> FixedOffset {
        device_offset(self.config.utc_offset_minutes)
    }

    pub fn accumulator(&self) -> TemporalAccumulator {
        TemporalAccumulator::new(self.offset())
    }

    /// Compute timing patterns from the full history
    pub fn analyze_timings(
        &self,
        history: &[InteractionRecord],
        as_of: DateTime<Utc>,
        context: Option<&TemporalContext>,
    ) -> TemporalPatterns {
        let mut acc = self.accumulator();
        for record in history {
            acc.absorb(record);
        }

        let patterns = self.patterns_from(&acc, history, as_of, context);

        debug!(
            records = history.len(),
            peak_hours = ?patterns.peak_hours,
            current_streak = patterns.streak.current,
            "Temporal patterns analyzed"
        );

        patterns
    }

    /// Build the pattern summary from an existing accumulator
    pub fn patterns_from(
        &self,
        acc: &TemporalAccumulator,
        history: &[InteractionRecord],
        as_of: DateTime<Utc>,
        context: Option<&TemporalContext>,
    ) -> TemporalPatterns {
        let (seasons, weather) = match context {
            Some(ctx) => (
                ctx.hemisphere
                    .map(|hemisphere| self.season_breakdown(history, hemisphere)),
                (!ctx.weather_by_date.is_empty())
                    .then(|| self.weather_breakdown(history, &ctx.weather_by_date)),
            ),
            None => (None, None),
        };

        TemporalPatterns {
            hour_histogram: acc.hour_histogram(),
            day_histogram: acc.day_histogram(),
            peak_hours: acc.peak_hours(self.config.peak_count),
            peak_days: acc.peak_days(self.config.peak_count),
            streak: acc.streak(as_of),
            seasons,
            weather,
        }
    }

    fn season_breakdown(
        &self,
        history: &[InteractionRecord],
        hemisphere: Hemisphere,
    ) -> BTreeMap<Season, OutcomeTally> {
        let offset = self.offset();
        let mut tallies = BTreeMap::new();
        for record in history.iter().filter(|r| r.is_terminal()) {
            let month = record.acted_at().with_timezone(&offset).month();
            let tally: &mut OutcomeTally = tallies
                .entry(Season::from_month(month, hemisphere))
                .or_default();
            tally.attempts += 1;
            tally.completed += u32::from(record.is_completed());
        }
        tallies
    }

    fn weather_breakdown(
        &self,
        history: &[InteractionRecord],
        weather_by_date: &BTreeMap<NaiveDate, String>,
    ) -> BTreeMap<String, OutcomeTally> {
        let offset = self.offset();
        let mut tallies: BTreeMap<String, OutcomeTally> = BTreeMap::new();
        for record in history.iter().filter(|r| r.is_terminal()) {
            let date = record.acted_at().with_timezone(&offset).date_naive();
            if let Some(label) = weather_by_date.get(&date) {
                let tally = tallies.entry(label.clone()).or_default();
                tally.attempts += 1;
                tally.completed += u32::from(record.is_completed());
            }
        }
        tallies
    }
}

pub(crate) fn device_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        warn!(minutes, "UTC offset out of range, using UTC");
        Utc.fix()
    })
}

fn share(counts: &[u32], idx: usize) -> f32 {
    let total: u32 = counts.iter().sum();
    match counts.get(idx) {
        Some(&count) if total > 0 => count as f32 / total as f32,
        _ => 0.0,
    }
}

fn relative_share(counts: &[u32], idx: usize) -> Option<f32> {
    let max = counts.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return None;
    }
    counts.get(idx).map(|&count| count as f32 / max as f32)
}

fn peaks(counts: &[u32], first_seen: &[Option<u32>], n: usize) -> Vec<u8> {
    let mut buckets: Vec<(usize, u32, u32)> = counts
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .map(|(idx, count)| (idx, count, first_seen[idx].unwrap_or(u32::MAX)))
        .collect();
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    buckets.into_iter().take(n).map(|(idx, _, _)| idx as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CandidateAttributes, Category, CostClass, LocationClass, Outcome, SocialRequirement,
        TimeInvestment,
    };

    fn candidate() -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: "c".to_string(),
            category: Category::Outdoor,
            time_investment: TimeInvestment::Quick,
            social_requirement: SocialRequirement::Solo,
            cost: CostClass::Free,
            difficulty: 2,
            location: LocationClass::Local,
            tags: vec![],
            content_hash: "h".to_string(),
        }
    }

    fn completed_at(rfc3339: &str) -> InteractionRecord {
        let at = DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc);
        InteractionRecord::assigned(&candidate(), at).with_outcome(Outcome::Completed)
    }

    fn analyzer() -> TemporalAnalyzer {
        TemporalAnalyzer::new(TemporalConfig::default())
    }

    #[test]
    fn test_histograms_count_completions_only() {
        let skipped = completed_at("2026-03-02T09:00:00Z").with_outcome(Outcome::Skipped);
        let history = vec![
            completed_at("2026-03-02T09:15:00Z"), // Monday
            completed_at("2026-03-03T09:40:00Z"), // Tuesday
            skipped,
        ];
        let as_of = history[1].assigned_at;
        let patterns = analyzer().analyze_timings(&history, as_of, None);

        assert_eq!(patterns.hour_histogram[9], 2);
        assert_eq!(patterns.day_histogram[0], 1);
        assert_eq!(patterns.day_histogram[1], 1);
        assert_eq!(patterns.peak_hours, vec![9]);
    }

    #[test]
    fn test_peak_tie_breaks_by_earliest_observation() {
        // 21:00 seen first, then 07:00; both twice
        let history = vec![
            completed_at("2026-03-02T21:00:00Z"),
            completed_at("2026-03-03T07:00:00Z"),
            completed_at("2026-03-04T07:00:00Z"),
            completed_at("2026-03-05T21:00:00Z"),
        ];
        let as_of = history[3].assigned_at;
        let patterns = analyzer().analyze_timings(&history, as_of, None);
        assert_eq!(patterns.peak_hours, vec![21, 7]);
    }

    #[test]
    fn test_utc_offset_shifts_buckets() {
        let config = TemporalConfig {
            utc_offset_minutes: 120,
            ..Default::default()
        };
        let history = vec![completed_at("2026-03-02T23:30:00Z")];
        let patterns =
            TemporalAnalyzer::new(config).analyze_timings(&history, history[0].assigned_at, None);
        // 01:30 local on Tuesday
        assert_eq!(patterns.hour_histogram[1], 1);
        assert_eq!(patterns.day_histogram[1], 1);
    }

    #[test]
    fn test_weather_breakdown_needs_context() {
        let history = vec![
            completed_at("2026-03-02T10:00:00Z"),
            completed_at("2026-03-03T10:00:00Z").with_outcome(Outcome::Expired),
        ];
        let as_of = history[1].assigned_at;

        let plain = analyzer().analyze_timings(&history, as_of, None);
        assert!(plain.weather.is_none());
        assert!(plain.seasons.is_none());

        let mut context = TemporalContext {
            hemisphere: Some(Hemisphere::Southern),
            ..Default::default()
        };
        context
            .weather_by_date
            .insert(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(), "rain".to_string());

        let enriched = analyzer().analyze_timings(&history, as_of, Some(&context));
        let rain = enriched.weather.unwrap()["rain"];
        assert_eq!(rain.attempts, 1);
        assert_eq!(rain.completed, 0);
        // March in the southern hemisphere
        assert_eq!(enriched.seasons.unwrap()[&Season::Autumn].attempts, 2);
    }

    #[test]
    fn test_activity_score_neutral_without_data() {
        let patterns = analyzer().analyze_timings(&[], Utc::now(), None);
        assert!((patterns.activity_score(12, 3) - 0.5).abs() < 1e-6);
    }
}
