//! Stereo panning.

use kq_ir::{Params, ProcessorKind};

use crate::processor::{PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};
use crate::processors::additive::pan_gains;

pub struct Panning {
    panning: f64,
}

impl Panning {
    pub fn new(params: &Params) -> Self {
        Self {
            panning: params.float("panning", 0.0).clamp(-1.0, 1.0),
        }
    }

    fn run(&self, io: &mut PortIo<'_>) {
        let left = io.input(0);
        let right = io.input(1);
        let offset = io.input(2);
        for i in 0..io.frames() {
            let pan = self.panning + offset.map_or(0.0, |o| o[i] as f64);
            let (gl, gr) = pan_gains(pan);
            io.output(0)[i] = left.map_or(0.0, |s| s[i] * gl as f32);
            io.output(1)[i] = right.map_or(0.0, |s| s[i] * gr as f32);
        }
    }
}

impl Processor for Panning {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Panning
    }

    fn process_voice(
        &self,
        _state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        _ctx: &VoiceContext,
    ) -> VoiceStatus {
        self.run(io);
        VoiceStatus::Active
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, _audio_rate: u32) {
        self.run(io);
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        if name == "panning" {
            self.panning = value.clamp(-1.0, 1.0);
            return true;
        }
        false
    }
}
