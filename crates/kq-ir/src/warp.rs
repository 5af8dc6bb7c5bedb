//! Stateless warp functions `(x, amount) -> y`.
//!
//! Envelope engines chain these: time is scaled by pitch, wrapped into a
//! loop, the envelope is read and the result is mapped into an output
//! range.

/// Time-scale factor for an envelope whose speed follows pitch.
/// `amount` 0 keeps real time; 1 doubles speed per octave above `center`.
pub fn pitch_scale(pitch_cents: f64, amount: f64, center_cents: f64) -> f64 {
    if amount == 0.0 {
        return 1.0;
    }
    libm::exp2(amount * (pitch_cents - center_cents) / 1200.0)
}

/// Wrap `x` into `[start, end)` once it has passed `end`.
pub fn loop_x(x: f64, start: f64, end: f64) -> f64 {
    let width = end - start;
    if x < end || width <= 0.0 {
        return x;
    }
    start + libm::fmod(x - start, width)
}

/// Map `x` linearly from `[from_min, from_max]` to `[to_min, to_max]`.
/// An empty source range maps everything to `to_min`.
pub fn map_range(x: f64, from_min: f64, from_max: f64, to_min: f64, to_max: f64) -> f64 {
    let width = from_max - from_min;
    if width == 0.0 {
        return to_min;
    }
    to_min + (x - from_min) / width * (to_max - to_min)
}

/// Bend `x` in `[0, 1]` by `amount`: 0 is the identity, positive values
/// push the curve down and negative values push it up.
pub fn power_warp(x: f64, amount: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    libm::pow(x, libm::exp2(amount))
}

/// Linear amplitude to force-linear value: `y = x^2`, keeping the sign.
pub fn linear_force(x: f64) -> f64 {
    x * x.abs()
}
