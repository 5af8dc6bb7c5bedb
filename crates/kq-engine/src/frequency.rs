//! Pitch and level conversions.
//!
//! Pitch is expressed in cents relative to A4 = 440 Hz; levels are in dB
//! where 0 dB is unity gain.

/// Frequency of 0 cents.
pub const REFERENCE_HZ: f64 = 440.0;

/// Levels at or below this are treated as silence.
pub const SILENCE_DB: f64 = -384.0;

/// Convert a pitch in cents to a frequency in Hz.
///
/// Formula: hz = 440 * 2^(cents / 1200).
pub fn cents_to_hz(cents: f64) -> f64 {
    REFERENCE_HZ * libm::exp2(cents / 1200.0)
}

/// Convert a frequency in Hz to cents. Non-positive input maps to the
/// lowest representable pitch.
pub fn hz_to_cents(hz: f64) -> f64 {
    if hz <= 0.0 {
        return f64::MIN;
    }
    1200.0 * libm::log2(hz / REFERENCE_HZ)
}

/// Convert dB to a linear gain factor. Non-finite or very low levels
/// give exactly zero.
pub fn db_to_scale(db: f64) -> f64 {
    if db.is_nan() || db <= SILENCE_DB {
        return 0.0;
    }
    libm::exp10(db / 20.0)
}

/// Convert a linear gain to dB, clamped at `SILENCE_DB`.
pub fn scale_to_db(scale: f64) -> f64 {
    if scale <= 0.0 {
        return SILENCE_DB;
    }
    (20.0 * libm::log10(scale)).max(SILENCE_DB)
}

/// Source frames to step per output frame when playing data recorded for
/// `base_freq` at `pitch` cents, corrected by `offset` cents.
///
/// Formula: base_freq * 2^((pitch - offset) / 1200) / audio_rate.
pub fn playback_increment(base_freq: f64, pitch: f64, offset: f64, audio_rate: u32) -> f64 {
    if audio_rate == 0 {
        return 0.0;
    }
    base_freq * libm::exp2((pitch - offset) / 1200.0) / audio_rate as f64
}
