// ============================================
// Selection Optimizer
// ============================================
//
// Picks the final ordered shortlist from scored candidates:
// 1. Hard comfort-zone bound (difficulty <= comfort zone + max stretch)
// 2. Recent-category exclusion, skipped when it would starve the pool
// 3. Rank: near-tie group, confidence, raw score, candidate id
// 4. Single forward pass enforcing the same-category quota
//
// The result is deterministic for fixed inputs. An empty pool after step 1
// is NoEligibleCandidate; a short pool is returned short.

use crate::config::SelectionConfig;
use crate::models::{CandidateId, Category, InteractionRecord, ScoredCandidate};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("No eligible candidate: {reason}")]
    NoEligibleCandidate { reason: String },

    #[error("Invalid shortlist size: {0}")]
    InvalidShortlistSize(usize),
}

pub type Result<T> = std::result::Result<T, SelectionError>;

/// Per-request constraints
#[derive(Debug, Clone)]
pub struct SelectionConstraints {
    pub comfort_zone: f32,
    /// Categories presented inside the exclusion window
    pub recent_categories: BTreeSet<Category>,
}

impl SelectionConstraints {
    pub fn new(comfort_zone: f32) -> Self {
        Self {
            comfort_zone,
            recent_categories: BTreeSet::new(),
        }
    }

    pub fn with_recent_categories(mut self, categories: impl IntoIterator<Item = Category>) -> Self {
        self.recent_categories.extend(categories);
        self
    }
}

pub struct SelectionOptimizer {
    config: SelectionConfig,
}

impl SelectionOptimizer {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Categories of every assignment presented within the exclusion window, pending or resolved
    pub fn recent_categories(&self, history: &[InteractionRecord], now: DateTime<Utc>) -> BTreeSet<Category> {
        let cutoff = now - Duration::days(self.config.exclusion_window_days);
        history
            .iter()
            .filter(|r| r.assigned_at >= cutoff && r.assigned_at <= now)
            .map(|r| r.traits.category)
            .collect()
    }

    /// Ordered shortlist of at most `k` candidate ids
    pub fn select(
        &self,
        scored: &[ScoredCandidate],
        constraints: &SelectionConstraints,
        k: usize,
    ) -> Result<Vec<CandidateId>> {
        if k == 0 {
            return Err(SelectionError::InvalidShortlistSize(k));
        }

        // 1. Hard comfort-zone bound
        let ceiling = constraints.comfort_zone + self.config.max_stretch;
        let bounded: Vec<&ScoredCandidate> = scored
            .iter()
            .filter(|c| f32::from(c.difficulty) <= ceiling)
            .collect();

        if bounded.is_empty() {
            return Err(SelectionError::NoEligibleCandidate {
                reason: format!(
                    "all {} candidates exceed difficulty ceiling {:.1}",
                    scored.len(),
                    ceiling
                ),
            });
        }

        // 2. Recent-category exclusion with escape valve
        let fresh: Vec<&ScoredCandidate> = bounded
            .iter()
            .copied()
            .filter(|c| !constraints.recent_categories.contains(&c.category))
            .collect();
        let exclusion_applied = fresh.len() >= self.config.diversity_min_pool.max(1);
        let pool = if exclusion_applied { fresh } else { bounded };

        // 3. Rank
        let pool = self.rank(pool);

        // 4. Diversity quota
        let picked = self.apply_quota(&pool, k);

        debug!(
            eligible = pool.len(),
            exclusion_applied,
            returned = picked.len(),
            k,
            "Shortlist selected"
        );

        Ok(picked)
    }

    /// Score order, except that candidates within `near_tie_epsilon` of their
    /// group's top score are ordered by confidence first
    fn rank<'a>(&self, mut pool: Vec<&'a ScoredCandidate>) -> Vec<&'a ScoredCandidate> {
        pool.sort_by(|a, b| {
            b.combined_score
                .total_cmp(&a.combined_score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });

        let epsilon = self.config.near_tie_epsilon;
        if epsilon.is_nan() || epsilon <= 0.0 {
            return pool;
        }

        let mut group = 0usize;
        let mut head: Option<f32> = None;
        let mut grouped: Vec<(usize, &ScoredCandidate)> = Vec::with_capacity(pool.len());
        for candidate in pool {
            match head {
                Some(top) if top - candidate.combined_score < epsilon => {}
                Some(_) => {
                    group += 1;
                    head = Some(candidate.combined_score);
                }
                None => head = Some(candidate.combined_score),
            }
            grouped.push((group, candidate));
        }

        grouped.sort_by(|(group_a, a), (group_b, b)| {
            group_a
                .cmp(group_b)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| b.combined_score.total_cmp(&a.combined_score))
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });
        grouped.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Walk the ranked pool once; a candidate over quota is passed over for the next-best
    fn apply_quota(&self, ranked: &[&ScoredCandidate], k: usize) -> Vec<CandidateId> {
        let quota = self.config.max_same_category.max(1);
        let mut per_category: HashMap<Category, usize> = HashMap::new();
        let mut picked = Vec::with_capacity(k.min(ranked.len()));

        for candidate in ranked {
            if picked.len() == k {
                break;
            }
            let count = per_category.entry(candidate.category).or_insert(0);
            if *count >= quota {
                continue;
            }
            *count += 1;
            picked.push(candidate.candidate_id.clone());
        }

        picked
    }
}
