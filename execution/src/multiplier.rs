use crate::uniform;
use rand::Rng;

/// Growth applied on every tick.
pub const GROWTH_STEP: f64 = 0.01;
/// Above this multiplier every tick adds a random shift on top of the step.
pub const ACCELERATION_THRESHOLD: f64 = 3.0;
pub const MIN_SHIFT: f64 = 0.01;

/// Multiplier after one tick.
pub fn grow_multiplier<R: Rng + ?Sized>(rng: &mut R, multiplier: f64, max_shift: f64) -> f64 {
    let mut next = multiplier + GROWTH_STEP;
    if next >= ACCELERATION_THRESHOLD {
        next += uniform(rng, MIN_SHIFT, max_shift.max(MIN_SHIFT));
    }
    next
}
