//! Song-wide playback state: tempo, volume, variables and jumps.

use heapless::FnvIndexMap;
use kq_ir::{Name, PatInstRef, Song, Tempo, Timestamp, VarValue};

use crate::slider::Slider;

/// Maximum number of global variables.
pub const GLOBAL_VARS_MAX: usize = 64;

/// Maximum number of `mj` triggers with a running counter.
pub const JUMP_CONTEXTS_MAX: usize = 32;

pub type GlobalVars = FnvIndexMap<Name, VarValue, GLOBAL_VARS_MAX>;

/// Identity of one `mj` trigger in the album.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpKey {
    pub inst: PatInstRef,
    pub column: u8,
    pub trigger: u32,
}

/// Jump waiting to replace the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingJump {
    /// Order-list position of the target.
    pub position: usize,
    pub row: Timestamp,
}

#[derive(Clone, Debug)]
pub struct GlobalState {
    /// Tempo in BPM
    pub tempo: Slider,
    pub tempo_slide_len: Timestamp,
    /// Global volume in dB
    pub volume: Slider,
    pub volume_slide_len: Timestamp,
    pub vars: GlobalVars,
    /// Value snapshotted by `mj` triggers firing for the first time
    pub jump_counter: i64,
    pub jump_target: Option<PatInstRef>,
    pub jump_row: Timestamp,
    jump_contexts: heapless::Vec<(JumpKey, i64), JUMP_CONTEXTS_MAX>,
}

impl GlobalState {
    pub fn new(song: Option<&Song>) -> Self {
        let (bpm, volume) = song.map_or((Tempo::default().bpm(), 0.0), |s| {
            (s.tempo.bpm(), s.global_volume)
        });
        Self {
            tempo: Slider::new(bpm),
            tempo_slide_len: Timestamp::ZERO,
            volume: Slider::new(volume),
            volume_slide_len: Timestamp::ZERO,
            vars: GlobalVars::new(),
            jump_counter: 1,
            jump_target: None,
            jump_row: Timestamp::ZERO,
            jump_contexts: heapless::Vec::new(),
        }
    }

    /// Current tempo, quantized to the slide grid.
    pub fn tempo(&self) -> Tempo {
        Tempo::from_bpm(self.tempo.value())
    }

    pub fn frames_to_update(&self) -> Option<u64> {
        match (self.tempo.frames_to_update(), self.volume.frames_to_update()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn advance(&mut self, frames: u64) {
        self.tempo.advance(frames);
        self.volume.advance(frames);
    }

    /// Decide whether the `mj` trigger `key` jumps now.
    ///
    /// The first time a trigger fires it takes the counter register; each
    /// jump uses one count and an exhausted trigger falls through once,
    /// forgetting its context. `None` stands for events without a trigger
    /// and uses the register itself.
    pub fn take_jump(&mut self, key: Option<JumpKey>) -> bool {
        let Some(key) = key else {
            if self.jump_counter > 0 {
                self.jump_counter -= 1;
                return true;
            }
            return false;
        };
        let index = match self.jump_contexts.iter().position(|(k, _)| *k == key) {
            Some(i) => i,
            None => {
                if self.jump_contexts.push((key, self.jump_counter)).is_err() {
                    log::warn!("too many active jump counters, ignoring jump");
                    return false;
                }
                self.jump_contexts.len() - 1
            }
        };
        let count = &mut self.jump_contexts[index].1;
        if *count > 0 {
            *count -= 1;
            true
        } else {
            self.jump_contexts.swap_remove(index);
            false
        }
    }

    /// Store a global variable. A full table drops the assignment.
    pub fn set_var(&mut self, name: Name, value: VarValue) -> bool {
        self.vars.insert(name, value).is_ok()
    }
}
