// Numeric helpers shared by scoring and training

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f32, min: f32, max: f32) -> f32 {
    if max - min < f32::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Exponential decay with the given half-life (same unit as `elapsed`)
pub fn exponential_decay(elapsed: f32, half_life: f32) -> f32 {
    if half_life <= 0.0 {
        return 0.0;
    }
    (-elapsed / half_life * std::f32::consts::LN_2).exp()
}

pub fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}
