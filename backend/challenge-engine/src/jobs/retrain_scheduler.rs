// ============================================
// Retrain Scheduler
// ============================================
//
// Periodically evaluates the retrain trigger for every target, independent
// of the serving path.
//
// Workflow:
// 1. Tick every `tick_secs` (or once, with `run_once`)
// 2. Ask the engine which targets are due (new examples or model age)
// 3. Run the due cycles on the blocking pool
// 4. Record per-pass statistics
//
// Shutdown cancels an in-flight cycle through its CancelFlag; the deployed
// models are untouched by a cancelled cycle.

use crate::config::SchedulerConfig;
use crate::engine::ChallengeEngine;
use crate::services::training::{CancelFlag, TrainingError, TrainingOutcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info};

/// Retrain scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub passes: u32,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub cycles_started: u32,
    pub promotions: u32,
    pub rollbacks: u32,
    pub skipped: u32,
    pub failures: u32,
    pub cancelled: u32,
    pub last_pass_duration_ms: u64,
}

/// Retrain scheduler runner
pub struct RetrainScheduler {
    config: SchedulerConfig,
    engine: Arc<ChallengeEngine>,
    cancel: CancelFlag,
}

impl RetrainScheduler {
    pub fn new(config: SchedulerConfig, engine: Arc<ChallengeEngine>) -> Self {
        Self {
            config,
            engine,
            cancel: CancelFlag::new(),
        }
    }

    /// Spawn the scheduling loop
    ///
    /// # Returns
    /// - `watch::Sender<()>` - Send to request shutdown
    /// - `JoinHandle` - Resolves to the accumulated statistics
    pub fn spawn(
        self,
    ) -> (
        watch::Sender<()>,
        tokio::task::JoinHandle<anyhow::Result<SchedulerStats>>,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(async move { self.run(shutdown_rx).await });
        (shutdown_tx, handle)
    }

    /// Run until shutdown (or after one pass with `run_once`)
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> anyhow::Result<SchedulerStats> {
        let mut stats = SchedulerStats::default();

        if self.config.run_once {
            self.run_single_pass(&mut stats).await?;
            return Ok(stats);
        }

        info!(tick_secs = self.config.tick_secs, "Retrain scheduler started");
        let mut timer = interval(Duration::from_secs(self.config.tick_secs.max(1)));

        // Trips the cancel flag as soon as shutdown arrives, including mid-pass
        let cancel = self.cancel.clone();
        let mut cancel_rx = shutdown_rx.clone();
        let watcher = tokio::spawn(async move {
            let _ = cancel_rx.changed().await;
            cancel.cancel();
        });

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Retrain scheduler received shutdown signal");
                    self.cancel.cancel();
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.run_single_pass(&mut stats).await {
                        error!(error = %e, "Retrain pass failed");
                    }
                }
            }
        }
        watcher.abort();

        info!(
            passes = stats.passes,
            promotions = stats.promotions,
            rollbacks = stats.rollbacks,
            "Retrain scheduler stopped"
        );
        Ok(stats)
    }

    /// Evaluate triggers once and run whatever is due
    pub async fn run_single_pass(&self, stats: &mut SchedulerStats) -> anyhow::Result<()> {
        let start_time = Instant::now();
        stats.passes += 1;
        stats.last_pass_at = Some(Utc::now());

        let results = self
            .engine
            .run_due_training(self.cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!("trigger evaluation failed: {}", e))?;

        for (target, result) in results {
            stats.cycles_started += 1;
            match result {
                Ok(TrainingOutcome::Promoted { version, .. }) => {
                    stats.promotions += 1;
                    info!(prediction = target.as_str(), version, "Scheduled cycle promoted");
                }
                Ok(TrainingOutcome::RolledBack { .. }) => stats.rollbacks += 1,
                Ok(TrainingOutcome::InsufficientData { .. } | TrainingOutcome::AlreadyRunning) => {
                    stats.skipped += 1
                }
                Err(TrainingError::Cancelled(_)) => stats.cancelled += 1,
                Err(e) => {
                    stats.failures += 1;
                    error!(prediction = target.as_str(), error = %e, "Scheduled cycle failed");
                }
            }
        }

        stats.last_pass_duration_ms = start_time.elapsed().as_millis() as u64;
        Ok(())
    }
}
