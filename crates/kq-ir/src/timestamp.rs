//! Exact musical time.
//!
//! `Timestamp` counts whole beats plus a remainder in units of
//! `1 / BEAT_DEN` beat. Every conversion to and from frames or
//! nanoseconds is done in 128-bit integers, so there is no drift
//! between a position and the frame grid it maps onto.

use core::cmp::Ordering;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// Remainder units per beat: 2^7 * 3^4 * 5 * 7 * 11 * 13 * 17.
/// Divisible by every subdivision from 1 to 18.
pub const BEAT_DEN: i32 = 882_161_280;

const BEAT_DEN_WIDE: i128 = BEAT_DEN as i128;

/// Micro-BPM per BPM.
const TEMPO_SCALE: i128 = 1_000_000;

/// Seconds per minute expressed in micro-BPM-compatible units.
const MINUTE_SCALED: i128 = 60 * TEMPO_SCALE;

const NANOS_PER_MINUTE_SCALED: i128 = 60_000_000_000 * TEMPO_SCALE;

/// A position or duration in musical time.
///
/// Ordering: beats first, then remainder. `rem` is always in `0..BEAT_DEN`,
/// so negative positions carry their sign in `beats` only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Whole beats.
    pub beats: i64,
    /// Fraction of a beat: `0..BEAT_DEN`.
    pub rem: i32,
}

/// Result of converting a duration to frames.
///
/// `frames` is rounded toward negative infinity; `residual` is the part of
/// the duration the whole frames do not cover, so
/// `Timestamp::from_frames(frames, ..) + residual` is the original value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSpan {
    pub frames: i64,
    pub residual: Timestamp,
}

/// Tempo in beats per minute, held as fixed-point micro-BPM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tempo {
    micro_bpm: u64,
}

impl Tempo {
    /// Lowest accepted tempo.
    pub const MIN_BPM: f64 = 1.0;
    /// Highest accepted tempo.
    pub const MAX_BPM: f64 = 999.0;

    /// Create a tempo, clamping to `MIN_BPM..=MAX_BPM`.
    /// Non-finite input yields the default tempo.
    pub fn from_bpm(bpm: f64) -> Self {
        if !bpm.is_finite() {
            return Self::default();
        }
        let clamped = bpm.clamp(Self::MIN_BPM, Self::MAX_BPM);
        Self {
            micro_bpm: libm::round(clamped * TEMPO_SCALE as f64) as u64,
        }
    }

    /// Tempo in beats per minute.
    pub fn bpm(self) -> f64 {
        self.micro_bpm as f64 / TEMPO_SCALE as f64
    }

    /// Raw fixed-point value.
    pub fn micro_bpm(self) -> u64 {
        self.micro_bpm
    }

    fn wide(self) -> i128 {
        self.micro_bpm as i128
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            micro_bpm: 120 * TEMPO_SCALE as u64,
        }
    }
}

impl Timestamp {
    /// The zero position.
    pub const ZERO: Timestamp = Timestamp { beats: 0, rem: 0 };

    /// Create a timestamp, normalizing `rem` into `0..BEAT_DEN`.
    pub fn new(beats: i64, rem: i64) -> Self {
        Self::from_total(beats as i128 * BEAT_DEN_WIDE + rem as i128)
    }

    /// Create a timestamp at a whole beat.
    pub const fn from_beats(beats: i64) -> Self {
        Self { beats, rem: 0 }
    }

    /// Create a timestamp from already-canonical parts, or `None` if `rem`
    /// is out of range.
    pub fn from_parts(beats: i64, rem: i64) -> Option<Self> {
        if (0..BEAT_DEN as i64).contains(&rem) {
            Some(Self {
                beats,
                rem: rem as i32,
            })
        } else {
            None
        }
    }

    /// `num / den` beats, rounded down to the remainder grid.
    /// A zero denominator yields zero.
    pub fn from_fraction(num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        Self::from_total((num as i128 * BEAT_DEN_WIDE).div_euclid(den as i128))
    }

    /// Position in remainder units from zero.
    pub fn total_rem(self) -> i128 {
        self.beats as i128 * BEAT_DEN_WIDE + self.rem as i128
    }

    /// Build from remainder units, saturating at the `i64` beat range.
    pub fn from_total(total: i128) -> Self {
        let beats = total.div_euclid(BEAT_DEN_WIDE);
        let rem = total.rem_euclid(BEAT_DEN_WIDE) as i32;
        if beats > i64::MAX as i128 {
            Self {
                beats: i64::MAX,
                rem: BEAT_DEN - 1,
            }
        } else if beats < i64::MIN as i128 {
            Self {
                beats: i64::MIN,
                rem: 0,
            }
        } else {
            Self {
                beats: beats as i64,
                rem,
            }
        }
    }

    /// True if the position lies before zero.
    pub fn is_negative(self) -> bool {
        self.beats < 0
    }

    /// True if this is exactly zero.
    pub fn is_zero(self) -> bool {
        self.beats == 0 && self.rem == 0
    }

    /// Multiply by an integer factor, saturating.
    pub fn mul_scalar(self, factor: i64) -> Self {
        match self.total_rem().checked_mul(factor as i128) {
            Some(total) => Self::from_total(total),
            None if (self.beats < 0) != (factor < 0) => Self::from_total(i128::MIN),
            None => Self::from_total(i128::MAX),
        }
    }

    /// Scale by `num / den`, rounding down. A zero denominator yields zero.
    pub fn mul_ratio(self, num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::ZERO;
        }
        match self.total_rem().checked_mul(num as i128) {
            Some(total) => Self::from_total(total.div_euclid(den as i128)),
            None if self.is_negative() != ((num < 0) != (den < 0)) => Self::from_total(i128::MIN),
            None => Self::from_total(i128::MAX),
        }
    }

    /// Duration in beats as a float (for display and slide rates).
    pub fn to_beats_f64(self) -> f64 {
        self.beats as f64 + self.rem as f64 / BEAT_DEN as f64
    }

    /// Convert to whole frames, carrying the uncovered residual.
    pub fn to_frames(self, audio_rate: u32, tempo: Tempo) -> FrameSpan {
        let den = BEAT_DEN_WIDE * tempo.wide();
        let frames = match self.total_rem().checked_mul(MINUTE_SCALED * audio_rate as i128) {
            Some(num) => saturate_i64(num.div_euclid(den)),
            None if self.is_negative() => i64::MIN,
            None => i64::MAX,
        };
        let covered = Self::from_frames(frames, audio_rate, tempo);
        FrameSpan {
            frames,
            residual: self - covered,
        }
    }

    /// The first whole frame at or after this position.
    pub fn to_frames_ceil(self, audio_rate: u32, tempo: Tempo) -> i64 {
        let den = BEAT_DEN_WIDE * tempo.wide();
        match self.total_rem().checked_mul(MINUTE_SCALED * audio_rate as i128) {
            Some(num) => saturate_i64(-((-num).div_euclid(den))),
            None if self.is_negative() => i64::MIN,
            None => i64::MAX,
        }
    }

    /// Position of a whole frame count, rounded down to the remainder grid.
    pub fn from_frames(frames: i64, audio_rate: u32, tempo: Tempo) -> Self {
        if audio_rate == 0 {
            return Self::ZERO;
        }
        let den = MINUTE_SCALED * audio_rate as i128;
        match (frames as i128).checked_mul(BEAT_DEN_WIDE * tempo.wide()) {
            Some(num) => Self::from_total(num.div_euclid(den)),
            None if frames < 0 => Self::from_total(i128::MIN),
            None => Self::from_total(i128::MAX),
        }
    }

    /// Duration in nanoseconds at a fixed tempo, rounded down.
    pub fn to_nanos(self, tempo: Tempo) -> i64 {
        let den = BEAT_DEN_WIDE * tempo.wide();
        match self.total_rem().checked_mul(NANOS_PER_MINUTE_SCALED) {
            Some(num) => saturate_i64(num.div_euclid(den)),
            None if self.is_negative() => i64::MIN,
            None => i64::MAX,
        }
    }

    /// Musical duration covered by `nanos` at a fixed tempo, rounded down.
    pub fn from_nanos(nanos: i64, tempo: Tempo) -> Self {
        let num = nanos as i128 * BEAT_DEN_WIDE;
        match num.checked_mul(tempo.wide()) {
            Some(num) => Self::from_total(num.div_euclid(NANOS_PER_MINUTE_SCALED)),
            None if nanos < 0 => Self::from_total(i128::MIN),
            None => Self::from_total(i128::MAX),
        }
    }
}

fn saturate_i64(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.beats.cmp(&other.beats).then(self.rem.cmp(&other.rem))
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Self) -> Self {
        Self::from_total(self.total_rem() + rhs.total_rem())
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Self) -> Self {
        Self::from_total(self.total_rem() - rhs.total_rem())
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Timestamp {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bpm(v: f64) -> Tempo {
        Tempo::from_bpm(v)
    }

    #[test]
    fn beat_den_divisible_by_common_subdivisions() {
        for d in 1..=18 {
            assert_eq!(BEAT_DEN % d, 0, "BEAT_DEN not divisible by {}", d);
        }
    }

    #[test]
    fn new_normalizes_negative_rem() {
        let t = Timestamp::new(1, -1);
        assert_eq!(t.beats, 0);
        assert_eq!(t.rem, BEAT_DEN - 1);

        let t = Timestamp::new(0, -(BEAT_DEN as i64) * 2 - 5);
        assert_eq!(t.beats, -3);
        assert_eq!(t.rem, BEAT_DEN - 5);
    }

    #[test]
    fn from_parts_rejects_out_of_range_rem() {
        assert!(Timestamp::from_parts(0, BEAT_DEN as i64).is_none());
        assert!(Timestamp::from_parts(0, -1).is_none());
        assert_eq!(
            Timestamp::from_parts(2, 5),
            Some(Timestamp { beats: 2, rem: 5 })
        );
    }

    #[test]
    fn ordering() {
        let a = Timestamp::new(0, 10);
        let b = Timestamp::from_beats(1);
        let c = Timestamp::new(-1, BEAT_DEN as i64 - 1);
        assert!(c < a);
        assert!(a < b);
        assert!(Timestamp::ZERO < a);
    }

    #[test]
    fn add_and_sub_carry() {
        let half = Timestamp::from_fraction(1, 2);
        assert_eq!(half + half, Timestamp::from_beats(1));
        assert_eq!(Timestamp::ZERO - half, Timestamp::new(-1, BEAT_DEN as i64 / 2));

        let mut t = Timestamp::from_beats(3);
        t -= Timestamp::from_fraction(1, 3);
        t += Timestamp::from_fraction(1, 3);
        assert_eq!(t, Timestamp::from_beats(3));
    }

    #[test]
    fn thirds_are_exact() {
        let third = Timestamp::from_fraction(1, 3);
        assert_eq!(third + third + third, Timestamp::from_beats(1));
    }

    #[test]
    fn mul_scalar_and_saturation() {
        let t = Timestamp::from_fraction(3, 4);
        assert_eq!(t.mul_scalar(4), Timestamp::from_beats(3));
        assert_eq!(t.mul_scalar(-4), Timestamp::from_beats(-3));

        let big = Timestamp::from_beats(i64::MAX / 2);
        let sat = big.mul_scalar(4);
        assert_eq!(sat.beats, i64::MAX);
        assert_eq!(sat.rem, BEAT_DEN - 1);
    }

    #[test]
    fn mul_ratio_scales() {
        let t = Timestamp::from_beats(3);
        assert_eq!(t.mul_ratio(1, 3), Timestamp::from_beats(1));
        assert_eq!(t.mul_ratio(0, 5), Timestamp::ZERO);
        assert_eq!(t.mul_ratio(1, 0), Timestamp::ZERO);
    }

    #[test]
    fn one_beat_at_120_bpm_is_half_a_second() {
        let span = Timestamp::from_beats(1).to_frames(48000, bpm(120.0));
        assert_eq!(span.frames, 24000);
        assert_eq!(span.residual, Timestamp::ZERO);
    }

    #[test]
    fn frame_aligned_round_trip() {
        for &(rate, tempo) in &[(48000, 120.0), (44100, 133.0), (96000, 60.0)] {
            let t = Timestamp::from_beats(7);
            let span = t.to_frames(rate, bpm(tempo));
            if span.residual.is_zero() {
                assert_eq!(Timestamp::from_frames(span.frames, rate, bpm(tempo)), t);
            }
        }
    }

    #[test]
    fn residual_completes_round_trip() {
        let tempo = bpm(137.5);
        for &t in &[
            Timestamp::new(0, 1),
            Timestamp::from_fraction(5, 7),
            Timestamp::new(1234, 98_765_432),
            Timestamp::new(-3, 17),
        ] {
            let span = t.to_frames(44100, tempo);
            let back = Timestamp::from_frames(span.frames, 44100, tempo) + span.residual;
            assert_eq!(back, t, "round trip failed for {:?}", t);
            assert!(!span.residual.is_negative());
            let one_frame = Timestamp::from_frames(1, 44100, tempo);
            assert!(span.residual <= one_frame + Timestamp::new(0, 2));
        }
    }

    #[test]
    fn ceil_rounds_up_to_next_frame() {
        let tempo = bpm(120.0);
        let t = Timestamp::from_beats(1) + Timestamp::new(0, 1);
        assert_eq!(t.to_frames(48000, tempo).frames, 24000);
        assert_eq!(t.to_frames_ceil(48000, tempo), 24001);
        assert_eq!(Timestamp::from_beats(1).to_frames_ceil(48000, tempo), 24000);
    }

    #[test]
    fn nanos_conversion() {
        let four = Timestamp::from_beats(4);
        assert_eq!(four.to_nanos(bpm(120.0)), 2_000_000_000);
        assert_eq!(four.to_nanos(bpm(240.0)), 1_000_000_000);
        assert_eq!(Timestamp::from_nanos(500_000_000, bpm(120.0)), Timestamp::from_beats(1));
    }

    #[test]
    fn tempo_clamps_and_rejects_nan() {
        assert_eq!(Tempo::from_bpm(0.0).bpm(), Tempo::MIN_BPM);
        assert_eq!(Tempo::from_bpm(5000.0).bpm(), Tempo::MAX_BPM);
        assert_eq!(Tempo::from_bpm(f64::NAN), Tempo::default());
        assert_eq!(Tempo::default().bpm(), 120.0);
    }
}
