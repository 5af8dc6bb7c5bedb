//! Pitch source: note pitch plus offset and vibrato.

use core::f64::consts::TAU;

use kq_ir::{Params, ProcessorKind};

use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct Pitch {
    offset: f64,
    vibrato_speed: f64,
    vibrato_depth: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PitchVoice {
    /// Frames rendered since note-on.
    frame: u64,
}

impl Pitch {
    pub fn new(params: &Params) -> Self {
        Self {
            offset: params.float("offset", 0.0),
            vibrato_speed: params.float("vibrato_speed", 0.0),
            vibrato_depth: params.float("vibrato_depth", 0.0),
        }
    }
}

impl Processor for Pitch {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Pitch
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::Pitch(PitchVoice::default())
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::Pitch(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Active;
        };
        let base = ctx.pitch + self.offset;
        let rate = ctx.audio_rate.max(1) as f64;
        let vibrato = self.vibrato_depth != 0.0 && self.vibrato_speed != 0.0;
        for (i, out) in io.output(0).iter_mut().enumerate() {
            let mut cents = base;
            if vibrato {
                let t = (st.frame + i as u64) as f64 / rate;
                cents += self.vibrato_depth * libm::sin(TAU * self.vibrato_speed * t);
            }
            *out = cents as f32;
        }
        st.frame += io.frames() as u64;
        VoiceStatus::Active
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "offset" => self.offset = value,
            "vibrato_speed" => self.vibrato_speed = value,
            "vibrato_depth" => self.vibrato_depth = value,
            _ => return false,
        }
        true
    }
}
