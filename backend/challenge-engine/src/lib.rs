pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{ChallengeEngine, Diagnostics};
pub use error::{EngineError, Result};
pub use jobs::RetrainScheduler;
pub use store::{CandidateCatalog, InMemoryCatalog, InMemoryInteractionStore, InteractionStore};
