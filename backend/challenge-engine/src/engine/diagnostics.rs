use crate::services::training::ModelSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Read-only operational summary.
///
/// Carries versions, timestamps and validation metrics only; no interaction
/// content leaves the engine through it, so it is safe to export in aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub generated_at: DateTime<Utc>,
    /// None until the first rebuild
    pub profile_version: Option<u64>,
    pub profile_ready: bool,
    /// Some scoring term is served by a heuristic rather than a deployed model
    pub fallback_active: bool,
    pub models: Vec<ModelSnapshot>,
}

impl Diagnostics {
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            profile_version: None,
            profile_ready: false,
            fallback_active: true,
            models: Vec::new(),
        }
    }

    pub fn model(&self, target: crate::models::PredictionTarget) -> Option<&ModelSnapshot> {
        self.models.iter().find(|m| m.target == target)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_diagnostics_report_fallback() {
        let diagnostics = Diagnostics::empty(Utc::now());
        assert!(diagnostics.fallback_active);
        assert!(diagnostics.profile_version.is_none());

        let json = diagnostics.to_json().unwrap();
        assert!(json.contains("\"fallback_active\":true"));
    }
}
