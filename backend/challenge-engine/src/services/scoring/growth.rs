use crate::config::ScoringConfig;
use crate::utils::exponential_decay;

/// Deterministic reward for stretching past the comfort zone.
///
/// Zero at or below the comfort zone, rising linearly to 1.0 at the peak
/// stretch, falling linearly to `tail_value` at `tail_start`, then decaying
/// exponentially.
#[derive(Debug, Clone, Copy)]
pub struct GrowthCurve {
    peak: f32,
    tail_start: f32,
    tail_value: f32,
    tail_half_life: f32,
}

impl GrowthCurve {
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self {
            peak: config.growth_peak_stretch,
            tail_start: config.growth_tail_start,
            tail_value: config.growth_tail_value.clamp(0.0, 1.0),
            tail_half_life: config.growth_tail_half_life,
        }
    }

    pub fn potential(&self, difficulty: u8, comfort_zone: f32) -> f32 {
        self.at_stretch(f32::from(difficulty) - comfort_zone)
    }

    pub fn at_stretch(&self, stretch: f32) -> f32 {
        if stretch <= 0.0 || !stretch.is_finite() {
            0.0
        } else if stretch <= self.peak {
            stretch / self.peak
        } else if stretch <= self.tail_start {
            let span = (self.tail_start - self.peak).max(f32::EPSILON);
            1.0 - (1.0 - self.tail_value) * (stretch - self.peak) / span
        } else {
            self.tail_value * exponential_decay(stretch - self.tail_start, self.tail_half_life)
        }
    }
}
