// ============================================
// Background Jobs Module
// ============================================
//
// Contains background job runners for:
// 1. Periodic retrain-trigger evaluation per prediction target
//
// Jobs never run on the serving path; the host spawns them and keeps the
// shutdown sender.

pub mod retrain_scheduler;

pub use retrain_scheduler::{RetrainScheduler, SchedulerStats};
