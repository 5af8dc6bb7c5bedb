//! Per-channel playback state.

use heapless::FnvIndexMap;
use kq_ir::{Name, Timestamp, VarValue};

use crate::slider::Slider;
use crate::voice::GroupKey;

/// Maximum number of channel-local variables.
pub const LOCAL_VARS_MAX: usize = 16;

/// Maximum nesting of `?if` blocks.
pub const CONDITION_DEPTH: usize = 16;

pub type LocalVars = FnvIndexMap<Name, VarValue, LOCAL_VARS_MAX>;

/// Nested `?if` / `?else` / `?end` blocks of one boundary.
#[derive(Clone, Debug, Default)]
pub struct ConditionStack {
    blocks: heapless::Vec<bool, CONDITION_DEPTH>,
    /// Blocks opened past the depth limit; they are always false.
    overflow: usize,
}

impl ConditionStack {
    pub fn open(&mut self, holds: bool) {
        if self.overflow > 0 || self.blocks.push(holds).is_err() {
            self.overflow += 1;
        }
    }

    /// Invert the innermost block.
    pub fn invert(&mut self) {
        if self.overflow > 0 {
            return;
        }
        if let Some(top) = self.blocks.last_mut() {
            *top = !*top;
        }
    }

    pub fn close(&mut self) {
        if self.overflow > 0 {
            self.overflow -= 1;
        } else {
            self.blocks.pop();
        }
    }

    /// True if every open block holds.
    pub fn allows(&self) -> bool {
        self.overflow == 0 && self.blocks.iter().all(|&b| b)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.overflow = 0;
    }
}

/// Playback state for a single channel.
#[derive(Clone, Debug)]
pub struct ChannelState {
    /// Audio unit that receives the channel's notes
    pub unit: usize,
    /// Expression override for new notes
    pub expression: Option<Name>,
    /// Channel volume in dB
    pub volume_db: f64,
    /// Force in dB
    pub force: Slider,
    pub force_slide_len: Timestamp,
    /// Pitch in cents
    pub pitch: Slider,
    pub pitch_slide_len: Timestamp,
    /// Control addressed by `.c` and `/c`
    pub control_name: Option<Name>,
    pub control: Slider,
    pub control_slide_len: Timestamp,
    /// Last control value handed to the unit
    pub control_applied: Option<f64>,
    /// Variable addressed by `.v` and `.lv`
    pub var_name: Option<Name>,
    pub vars: LocalVars,
    pub conditions: ConditionStack,
    /// Seeds per-note randomness
    pub rng: fastrand::Rng,
    /// Group of the last note-on, until note-off
    pub foreground: Option<GroupKey>,
}

impl ChannelState {
    pub fn new(unit: usize, seed: u64) -> Self {
        Self {
            unit,
            expression: None,
            volume_db: 0.0,
            force: Slider::new(0.0),
            force_slide_len: Timestamp::ZERO,
            pitch: Slider::new(0.0),
            pitch_slide_len: Timestamp::ZERO,
            control_name: None,
            control: Slider::new(0.0),
            control_slide_len: Timestamp::ZERO,
            control_applied: None,
            var_name: None,
            vars: LocalVars::new(),
            conditions: ConditionStack::default(),
            rng: fastrand::Rng::with_seed(seed),
            foreground: None,
        }
    }

    /// Frames until one of the channel's slides changes value.
    pub fn frames_to_update(&self) -> Option<u64> {
        [&self.force, &self.pitch, &self.control]
            .into_iter()
            .filter_map(Slider::frames_to_update)
            .min()
    }

    pub fn advance(&mut self, frames: u64) {
        self.force.advance(frames);
        self.pitch.advance(frames);
        self.control.advance(frames);
    }

    /// Control value not yet handed to the unit, if any.
    pub fn pending_control(&self) -> Option<(Name, f64)> {
        let name = self.control_name?;
        let value = self.control.value();
        (self.control_applied != Some(value)).then_some((name, value))
    }

    /// Store a channel-local variable. A full table drops the assignment.
    pub fn set_var(&mut self, name: Name, value: VarValue) -> bool {
        self.vars.insert(name, value).is_ok()
    }
}

/// Seed of channel `index` derived from the composition's master seed.
pub fn channel_seed(master: u64, index: usize) -> u64 {
    master ^ (index as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
