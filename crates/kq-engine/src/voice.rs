//! Voices and voice groups.

use alloc::vec::Vec;

use crate::processor::VoiceState;

slotmap::new_key_type! {
    /// Handle of a voice group in the pool.
    pub struct GroupKey;
}

/// Index of a voice slot in the pool's arena.
pub type VoiceId = u32;

/// Per-processor state of one note.
#[derive(Debug)]
pub struct Voice {
    /// Position of the processor in its unit's slot list.
    pub slot: usize,
    pub state: VoiceState,
    /// Delay-line space, sized once per audio rate.
    pub scratch: Vec<f32>,
    /// Next voice of the same group, or next free slot.
    pub(crate) next: Option<VoiceId>,
}

impl Voice {
    pub(crate) fn new(scratch: Vec<f32>) -> Self {
        Self {
            slot: 0,
            state: VoiceState::Empty,
            scratch,
            next: None,
        }
    }
}

/// Linear gain ramp to zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fade {
    pub remaining: u64,
    pub total: u64,
}

impl Fade {
    pub fn new(frames: u64) -> Self {
        Self {
            remaining: frames,
            total: frames.max(1),
        }
    }

    /// Gain `offset` frames into the current slice.
    #[inline]
    pub fn gain_at(&self, offset: usize) -> f32 {
        let left = self.remaining.saturating_sub(offset as u64);
        (left as f64 / self.total as f64) as f32
    }

    pub fn advance(&mut self, frames: usize) {
        self.remaining = self.remaining.saturating_sub(frames as u64);
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }
}

/// Where a group is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupPhase {
    Active,
    /// Note-off received.
    Released,
    /// Stolen; fading out outside the voice limit.
    Stolen,
}

/// All voices started by one note-on.
#[derive(Clone, Debug)]
pub struct VoiceGroup {
    pub channel: usize,
    pub unit: usize,
    /// Execution plan of the unit this group follows.
    pub plan: usize,
    /// Allocation order, for stealing.
    pub serial: u64,
    pub phase: GroupPhase,
    pub fade: Option<Fade>,
    /// Current pitch in cents.
    pub pitch: f64,
    /// Current force in dB.
    pub force: f64,
    /// A voice reported completion.
    pub finished: bool,
    pub(crate) first: Option<VoiceId>,
    pub(crate) voices: usize,
}

impl VoiceGroup {
    pub fn is_released(&self) -> bool {
        self.phase != GroupPhase::Active
    }

    /// Gain of the group `offset` frames into the slice.
    #[inline]
    pub fn gain_at(&self, offset: usize) -> f32 {
        self.fade.map_or(1.0, |f| f.gain_at(offset))
    }

    pub fn voice_count(&self) -> usize {
        self.voices
    }

    /// True once the group will produce no more sound.
    pub fn is_done(&self) -> bool {
        self.finished || self.fade.is_some_and(|f| f.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_ramps_to_zero() {
        let mut fade = Fade::new(4);
        assert_eq!(fade.gain_at(0), 1.0);
        assert_eq!(fade.gain_at(2), 0.5);
        assert_eq!(fade.gain_at(9), 0.0);
        fade.advance(3);
        assert_eq!(fade.gain_at(0), 0.25);
        assert!(!fade.is_done());
        fade.advance(3);
        assert!(fade.is_done());
    }

    #[test]
    fn zero_length_fade_is_done_at_once() {
        let fade = Fade::new(0);
        assert!(fade.is_done());
        assert_eq!(fade.gain_at(0), 0.0);
    }
}
