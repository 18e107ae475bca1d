use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

/// Runs of consecutive active days
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreakSummary {
    /// Length of the run ending today or yesterday, else 0
    pub current: u32,
    pub longest: u32,
    pub mean_length: f32,
    pub active_days: u32,
    /// Days from the first to the last active day, inclusive
    pub span_days: u32,
    /// active_days / span_days
    pub consistency: f32,
}

impl StreakSummary {
    pub fn from_dates(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> Self {
        let (first, last) = match (dates.first(), dates.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Self::default(),
        };

        let mut runs: Vec<u32> = Vec::new();
        let mut previous: Option<NaiveDate> = None;
        for &date in dates {
            let extends = previous.is_some_and(|prev| (date - prev).num_days() == 1);
            if extends {
                if let Some(run) = runs.last_mut() {
                    *run += 1;
                }
            } else {
                runs.push(1);
            }
            previous = Some(date);
        }

        let gap = (today - last).num_days();
        let current = if (0..=1).contains(&gap) {
            runs.last().copied().unwrap_or(0)
        } else {
            0
        };

        let active_days = dates.len() as u32;
        let span_days = ((last - first).num_days() + 1).max(1) as u32;

        Self {
            current,
            longest: runs.iter().copied().max().unwrap_or(0),
            mean_length: runs.iter().sum::<u32>() as f32 / runs.len() as f32,
            active_days,
            span_days,
            consistency: active_days as f32 / span_days as f32,
        }
    }
}
