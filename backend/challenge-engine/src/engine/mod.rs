// ============================================
// Challenge Engine
// ============================================
//
// Caller-facing entry point tying the services together.
//
// Serving path (never trains):
//   store ─▶ incremental profile ─▶ scorer ─▶ selection optimizer ─▶ id
//
// Learning path (background or forced):
//   store ─▶ training pipeline ─▶ registry swap
//
// The profile cache is single-writer: one rebuild at a time behind the
// write lock, any number of readers in between.

pub mod diagnostics;

pub use diagnostics::Diagnostics;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::models::{CandidateId, Category, InteractionRecord, PredictionTarget};
use crate::services::profile_builder::{ProfileAccumulator, ProfileBuilder, UserProfile};
use crate::services::scoring::{
    CandidateScorer, FeatureExtractor, PredictionModel, ScoringContext, ScoringError,
};
use crate::services::selection::{SelectionConstraints, SelectionError, SelectionOptimizer};
use crate::services::temporal::{TemporalContext, TemporalPatterns};
use crate::services::training::{
    self, CancelFlag, GradientDescentTrainer, ModelRegistry, Trainer, TrainingOutcome,
    TrainingPipeline,
};
use crate::store::{CandidateCatalog, InteractionStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use ndarray::Array2;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Per-target result of a training request
pub type CycleResult = (PredictionTarget, training::Result<TrainingOutcome>);

struct ProfileCache {
    acc: ProfileAccumulator,
    history: Vec<InteractionRecord>,
    profile: Option<UserProfile>,
    rebuilds: u64,
}

/// Profile plus the per-request state selection needs
struct ServingState {
    profile: UserProfile,
    recent: BTreeSet<Category>,
}

pub struct ChallengeEngine {
    config: EngineConfig,
    store: Arc<dyn InteractionStore>,
    catalog: Arc<dyn CandidateCatalog>,
    profiles: Arc<ProfileBuilder>,
    scorer: CandidateScorer,
    selector: SelectionOptimizer,
    registry: Arc<ModelRegistry>,
    pipeline: TrainingPipeline,
    cache: RwLock<ProfileCache>,
    diagnostics_tx: watch::Sender<Diagnostics>,
}

impl ChallengeEngine {
    /// Engine with the default gradient-descent trainer
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CandidateCatalog>,
    ) -> Result<Self> {
        let trainer = Arc::new(GradientDescentTrainer::new(&config.training));
        Self::with_trainer(config, store, catalog, trainer)
    }

    pub fn with_trainer(
        config: EngineConfig,
        store: Arc<dyn InteractionStore>,
        catalog: Arc<dyn CandidateCatalog>,
        trainer: Arc<dyn Trainer>,
    ) -> Result<Self> {
        config.validate()?;

        let profiles = Arc::new(ProfileBuilder::new(
            config.profile.clone(),
            config.temporal.clone(),
        ));
        let extractor =
            FeatureExtractor::new(config.scoring.clone(), config.temporal.utc_offset_minutes);
        let registry = Arc::new(ModelRegistry::new(config.training.clone()));
        let pipeline = TrainingPipeline::new(
            registry.clone(),
            trainer,
            profiles.clone(),
            extractor.clone(),
        );
        let (diagnostics_tx, _) = watch::channel(Diagnostics::empty(Utc::now()));

        info!(
            min_completed = config.profile.min_completed,
            max_stretch = config.selection.max_stretch,
            retrain_threshold = config.training.retrain_threshold,
            "Challenge engine initialized"
        );

        Ok(Self {
            scorer: CandidateScorer::new(config.scoring.clone(), extractor),
            selector: SelectionOptimizer::new(config.selection.clone()),
            cache: RwLock::new(ProfileCache {
                acc: profiles.accumulator(),
                history: Vec::new(),
                profile: None,
                rebuilds: 0,
            }),
            config,
            store,
            catalog,
            profiles,
            registry,
            pipeline,
            diagnostics_tx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Pick the next challenge from up to `pool_size` active candidates
    pub async fn select_challenge(&self, pool_size: Option<usize>) -> Result<CandidateId> {
        self.select_shortlist(1, pool_size)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::Selection(SelectionError::NoEligibleCandidate {
                    reason: "empty shortlist".to_string(),
                })
            })
    }

    /// Ordered shortlist of at most `k` challenges
    pub async fn select_shortlist(&self, k: usize, pool_size: Option<usize>) -> Result<Vec<CandidateId>> {
        self.select_shortlist_at(k, pool_size, Utc::now()).await
    }

    /// Shortlist as of `now`; serving is deterministic for fixed history, catalog and models
    pub async fn select_shortlist_at(
        &self,
        k: usize,
        pool_size: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateId>> {
        let state = self.refresh_profile(now).await?;
        let candidates = self.catalog.active_candidates(now, pool_size).await?;

        let batch = self.scorer.score(
            &state.profile,
            &candidates,
            &ScoringContext { now },
            &self.registry.serving(),
        );

        let constraints = SelectionConstraints::new(state.profile.comfort_zone)
            .with_recent_categories(state.recent);
        let picked = self.selector.select(&batch.scored, &constraints, k)?;

        debug!(
            profile_version = state.profile.version,
            pool = candidates.len(),
            skipped = batch.skipped.len(),
            fallback_active = batch.fallback_active,
            picked = ?picked,
            "Challenge selection complete"
        );

        Ok(picked)
    }

    /// Append an interaction; retraining is left to the trigger policy
    pub async fn record_outcome(&self, record: InteractionRecord) -> Result<()> {
        self.store.append(record).await?;
        Ok(())
    }

    /// Current profile, rebuilt if the history changed
    pub async fn profile(&self) -> Result<UserProfile> {
        Ok(self.refresh_profile(Utc::now()).await?.profile)
    }

    /// Timing summary for the timing-recommendation consumer
    pub async fn temporal_patterns(&self, context: Option<&TemporalContext>) -> Result<TemporalPatterns> {
        let now = Utc::now();
        self.refresh_profile(now).await?;
        let cache = self.cache.read().await;
        Ok(self
            .profiles
            .temporal()
            .patterns_from(cache.acc.temporal(), &cache.history, now, context))
    }

    /// How good a moment `at` is to present a challenge (0..1)
    pub async fn timing_quality(&self, at: DateTime<Utc>) -> Result<f32> {
        let state = self.refresh_profile(Utc::now()).await?;

        if let Some(model) = self.registry.deployed(PredictionTarget::TimingQuality) {
            let features = self.scorer.extractor().timing_features(&state.profile, at);
            let width = features.len();
            let prediction = Array2::from_shape_vec((1, width), features)
                .map_err(|e| ScoringError::InvalidInput(e.to_string()))
                .and_then(|matrix| model.predict(&matrix));
            match prediction {
                Ok(values) if values.iter().all(|v| v.is_finite()) => {
                    return Ok(values.iter().copied().next().unwrap_or(0.5).clamp(0.0, 1.0));
                }
                Ok(_) => warn!("Timing model produced non-finite output, using histograms"),
                Err(e) => warn!(error = %e, "Timing model unusable, using histograms"),
            }
        }

        let cache = self.cache.read().await;
        let temporal = cache.acc.temporal();
        let (hour, day) = temporal.local_hour_and_day(at);
        let patterns = self
            .profiles
            .temporal()
            .patterns_from(temporal, &cache.history, at, None);
        Ok(patterns.activity_score(hour, day))
    }

    /// Read-only operational summary
    pub async fn diagnostics(&self) -> Diagnostics {
        let cache = self.cache.read().await;
        let profile = cache.profile.as_ref();
        let profile_ready = profile.map_or(false, |p| p.is_ready());
        let serving = self.registry.serving();

        Diagnostics {
            generated_at: Utc::now(),
            profile_version: profile.map(|p| p.version),
            profile_ready,
            fallback_active: !profile_ready
                || serving.completion.model.is_none()
                || serving.enjoyment.model.is_none(),
            models: PredictionTarget::ALL
                .iter()
                .map(|target| self.registry.snapshot(*target))
                .collect(),
        }
    }

    /// Receiver that sees a fresh summary after every rebuild and training cycle
    pub fn watch_diagnostics(&self) -> watch::Receiver<Diagnostics> {
        self.diagnostics_tx.subscribe()
    }

    /// Train `target` (or every target) now, regardless of the trigger policy
    pub async fn force_retrain(&self, target: Option<PredictionTarget>) -> Result<Vec<CycleResult>> {
        let targets = match target {
            Some(target) => vec![target],
            None => PredictionTarget::ALL.to_vec(),
        };
        info!(targets = ?targets, "Forced retrain requested");
        self.train(&targets, CancelFlag::new()).await
    }

    /// Evaluate the trigger policy and train whichever targets are due
    pub async fn run_due_training(&self, cancel: CancelFlag) -> Result<Vec<CycleResult>> {
        let now = Utc::now();
        self.refresh_profile(now).await?;
        let completed = self.cache.read().await.acc.completed();

        let due: Vec<PredictionTarget> = PredictionTarget::ALL
            .iter()
            .copied()
            .filter(|target| match self.registry.evaluate_trigger(*target, completed, now) {
                Some(reason) => {
                    info!(prediction = target.as_str(), reason = ?reason, "Retrain due");
                    true
                }
                None => false,
            })
            .collect();

        if due.is_empty() {
            return Ok(Vec::new());
        }
        self.train(&due, cancel).await
    }

    /// Install a persisted model artifact; a bad artifact keeps the current model
    pub fn restore_model(&self, target: PredictionTarget, json: &str) -> Result<bool> {
        let model = PredictionModel::from_json(target, json).map_err(|e| {
            warn!(error = %e, "Model artifact rejected, cold-start scoring stays active");
            e
        })?;
        let installed = self.registry.install(model);
        info!(prediction = target.as_str(), installed, "Model artifact restored");
        Ok(installed)
    }

    async fn train(&self, targets: &[PredictionTarget], cancel: CancelFlag) -> Result<Vec<CycleResult>> {
        let now = Utc::now();
        self.refresh_profile(now).await?;
        let history = Arc::new(self.cache.read().await.history.clone());

        let cycles = targets.iter().map(|&target| {
            let history = history.clone();
            let cancel = cancel.clone();
            async move {
                (
                    target,
                    self.pipeline.run_cycle(target, history, now, cancel).await,
                )
            }
        });
        let results = join_all(cycles).await;

        for (target, result) in &results {
            if let Err(e) = result {
                warn!(prediction = target.as_str(), error = %e, "Training cycle failed");
            }
        }

        self.publish_diagnostics().await;
        Ok(results)
    }

    /// Bring the cached profile up to date with the store
    async fn refresh_profile(&self, now: DateTime<Utc>) -> Result<ServingState> {
        let stored = self.store.len().await?;

        {
            let cache = self.cache.read().await;
            if let Some(profile) = cache.profile.as_ref() {
                if cache.history.len() == stored {
                    return Ok(ServingState {
                        profile: profile.clone(),
                        recent: self.selector.recent_categories(&cache.history, now),
                    });
                }
            }
        }

        let mut cache = self.cache.write().await;
        let appended = self.store.fetch_history(cache.history.len()).await?;

        if let Some(profile) = cache.profile.as_ref() {
            if appended.is_empty() {
                return Ok(ServingState {
                    profile: profile.clone(),
                    recent: self.selector.recent_categories(&cache.history, now),
                });
            }
        }

        self.profiles.extend(&mut cache.acc, &appended);
        cache.history.extend(appended);
        cache.rebuilds += 1;

        let every = u64::from(self.config.profile.consistency_check_every);
        if every > 0 && cache.rebuilds % every == 0 {
            if let Err(e) = self.profiles.verify_consistency(&cache.acc, &cache.history) {
                warn!(error = %e, "Incremental profile diverged, replacing with full rebuild");
                let mut full = self.profiles.accumulator();
                self.profiles.extend(&mut full, &cache.history);
                cache.acc = full;
            }
        }

        let profile = self.profiles.snapshot(&cache.acc, cache.profile.as_ref(), now);
        info!(
            version = profile.version,
            completed = profile.total_completed,
            comfort_zone = profile.comfort_zone,
            ready = profile.is_ready(),
            "Profile rebuilt"
        );
        cache.profile = Some(profile.clone());
        let recent = self.selector.recent_categories(&cache.history, now);
        drop(cache);

        self.publish_diagnostics().await;
        Ok(ServingState { profile, recent })
    }

    async fn publish_diagnostics(&self) {
        let diagnostics = self.diagnostics().await;
        // Best-effort: no receiver is fine
        self.diagnostics_tx.send_replace(diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CandidateAttributes, CostClass, LocationClass, Outcome, SocialRequirement, TimeInvestment,
    };
    use crate::services::training::ModelState;
    use crate::store::{InMemoryCatalog, InMemoryInteractionStore};
    use chrono::Duration;

    fn candidate(id: &str, category: Category, difficulty: u8) -> CandidateAttributes {
        CandidateAttributes {
            candidate_id: id.to_string(),
            category,
            time_investment: TimeInvestment::Quick,
            social_requirement: SocialRequirement::Solo,
            cost: CostClass::Free,
            difficulty,
            location: LocationClass::Home,
            tags: vec![],
            content_hash: format!("hash-{}", id),
        }
    }

    async fn engine(
        history: Vec<InteractionRecord>,
        pool: Vec<CandidateAttributes>,
    ) -> (ChallengeEngine, Arc<InMemoryInteractionStore>) {
        let store = Arc::new(InMemoryInteractionStore::with_history(history).await.unwrap());
        let catalog = Arc::new(InMemoryCatalog::with_candidates(pool).await);
        let engine = ChallengeEngine::new(EngineConfig::default(), store.clone(), catalog).unwrap();
        (engine, store)
    }

    fn completions(n: i64, category: Category, start: DateTime<Utc>) -> Vec<InteractionRecord> {
        (0..n)
            .map(|i| {
                InteractionRecord::assigned(&candidate("past", category, 2), start + Duration::hours(i * 7))
                    .with_outcome(Outcome::Completed)
                    .with_rating(5)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cold_start_still_selects() {
        let pool = vec![
            candidate("a", Category::Creative, 1),
            candidate("b", Category::Mindfulness, 2),
        ];
        let (engine, _) = engine(Vec::new(), pool).await;

        let picked = engine.select_challenge(None).await.unwrap();
        assert_eq!(picked, "b");

        let diagnostics = engine.diagnostics().await;
        assert!(diagnostics.fallback_active);
        assert_eq!(diagnostics.profile_version, Some(1));
        assert!(!diagnostics.profile_ready);
    }

    #[tokio::test]
    async fn test_profile_rebuilt_only_when_history_changes() {
        let start = Utc::now() - Duration::days(10);
        let (engine, _) = engine(completions(3, Category::Social, start), vec![]).await;

        let first = engine.profile().await.unwrap();
        let again = engine.profile().await.unwrap();
        assert_eq!(first.version, again.version);

        let next = InteractionRecord::assigned(&candidate("x", Category::Social, 2), Utc::now())
            .with_outcome(Outcome::Skipped);
        engine.record_outcome(next).await.unwrap();
        let rebuilt = engine.profile().await.unwrap();
        assert_eq!(rebuilt.version, first.version + 1);
        assert_eq!(rebuilt.total_resolved, 4);
    }

    #[tokio::test]
    async fn test_restore_rejects_bad_artifact() {
        let (engine, _) = engine(Vec::new(), vec![]).await;

        let result = engine.restore_model(PredictionTarget::Completion, "{\"broken\":");
        assert!(matches!(result, Err(EngineError::Scoring(ScoringError::ModelUnavailable { .. }))));
        assert_eq!(
            engine.registry().state(PredictionTarget::Completion),
            ModelState::Untrained
        );
    }

    #[tokio::test]
    async fn test_forced_retrain_promotes_and_publishes() {
        let start = Utc::now() - Duration::days(30);
        let mut history = completions(30, Category::Creative, start);
        history.extend((0..30).map(|i| {
            InteractionRecord::assigned(
                &candidate("hard", Category::Physical, 4),
                start + Duration::hours(i * 7 + 3),
            )
            .with_outcome(Outcome::Skipped)
        }));
        let (engine, _) = engine(history, vec![]).await;
        let mut rx = engine.watch_diagnostics();

        let results = engine
            .force_retrain(Some(PredictionTarget::Completion))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].1,
            Ok(TrainingOutcome::Promoted { version: 1, .. })
        ));

        assert!(rx.has_changed().unwrap());
        let published = rx.borrow_and_update().clone();
        let completion = published.model(PredictionTarget::Completion).unwrap();
        assert_eq!(completion.version, Some(1));
        // Enjoyment is still untrained
        assert!(published.fallback_active);
    }

    #[tokio::test]
    async fn test_timing_quality_from_histograms() {
        let start = DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let history: Vec<_> = (0..6)
            .map(|i| {
                InteractionRecord::assigned(
                    &candidate("c", Category::Outdoor, 2),
                    start + Duration::days(i * 7),
                )
                .with_outcome(Outcome::Completed)
            })
            .collect();
        let (engine, _) = engine(history, vec![]).await;

        // Every completion landed on a Monday at 09:00
        let peak = engine.timing_quality(start).await.unwrap();
        let off_peak = engine.timing_quality(start + Duration::hours(5)).await.unwrap();
        assert!((peak - 1.0).abs() < 1e-6);
        assert!(off_peak < peak);
    }
}
