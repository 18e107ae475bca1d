pub mod profile_builder;
pub mod scoring;
pub mod selection;
pub mod temporal;
pub mod training;

pub use profile_builder::{ProfileBuilder, UserProfile};
pub use scoring::CandidateScorer;
pub use selection::SelectionOptimizer;
pub use temporal::TemporalAnalyzer;
pub use training::{ModelRegistry, TrainingPipeline};
