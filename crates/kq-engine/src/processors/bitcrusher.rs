//! Sample-rate and resolution reduction.

use kq_ir::{Params, ProcessorKind};

use crate::frequency::cents_to_hz;
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

const RESOLUTION_MAX: f64 = 32.0;

pub struct BitCrusher {
    cutoff: f64,
    resolution: f64,
    mixed: CrushState,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrushState {
    phase: f64,
    held: [f32; 2],
}

impl Default for CrushState {
    fn default() -> Self {
        // Start due so the first frame is sampled.
        Self {
            phase: 1.0,
            held: [0.0; 2],
        }
    }
}

fn quantize(x: f32, bits: f64) -> f32 {
    if bits >= RESOLUTION_MAX {
        return x;
    }
    let levels = libm::exp2(bits.max(1.0) - 1.0);
    (libm::round(x as f64 * levels) / levels) as f32
}

impl BitCrusher {
    pub fn new(params: &Params) -> Self {
        Self {
            cutoff: params.float("cutoff", 9600.0),
            resolution: params.float("resolution", 16.0),
            mixed: CrushState::default(),
        }
    }

    fn run(&self, st: &mut CrushState, io: &mut PortIo<'_>, audio_rate: u32) {
        let left = io.input(0);
        let right = io.input(1);
        let cutoff_in = io.input(2);
        let res_in = io.input(3);
        let rate = audio_rate.max(1) as f64;
        for i in 0..io.frames() {
            let cutoff = self.cutoff + cutoff_in.map_or(0.0, |c| c[i] as f64);
            let bits = self.resolution + res_in.map_or(0.0, |r| r[i] as f64);
            if st.phase >= 1.0 {
                st.phase -= libm::floor(st.phase);
                st.held = [
                    left.map_or(0.0, |s| s[i]),
                    right.map_or(0.0, |s| s[i]),
                ];
            }
            st.phase += (cents_to_hz(cutoff) / rate).min(1.0);
            io.output(0)[i] = quantize(st.held[0], bits);
            io.output(1)[i] = quantize(st.held[1], bits);
        }
    }
}

impl Processor for BitCrusher {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::BitCrusher
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::BitCrusher(CrushState::default())
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        match state {
            VoiceState::BitCrusher(st) => self.run(st, io, ctx.audio_rate),
            _ => io.clear_outputs(),
        }
        VoiceStatus::Active
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, audio_rate: u32) {
        let mut st = self.mixed;
        self.run(&mut st, io, audio_rate);
        self.mixed = st;
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "cutoff" => self.cutoff = value,
            "resolution" => self.resolution = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.mixed = CrushState::default();
    }
}
