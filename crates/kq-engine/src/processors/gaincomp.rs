//! Gain compensation through a level map.

use alloc::sync::Arc;

use kq_ir::{Envelope, Params, ProcessorKind};

use crate::processor::{PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct GainComp {
    map: Option<Arc<Envelope>>,
}

impl GainComp {
    pub fn new(params: &Params) -> Self {
        let map = params
            .bool("map_enabled", false)
            .then(|| params.envelope("map").cloned())
            .flatten();
        Self { map }
    }

    fn run(&self, io: &mut PortIo<'_>) {
        let Some(map) = &self.map else {
            io.pass_stereo();
            return;
        };
        for port in 0..2 {
            let input = io.input(port);
            let out = io.output(port);
            match input {
                Some(src) => {
                    for (o, &s) in out.iter_mut().zip(src) {
                        let mag = map.value_at(libm::fabs(s as f64)) as f32;
                        *o = if s < 0.0 { -mag } else { mag };
                    }
                }
                None => out.fill(0.0),
            }
        }
    }
}

impl Processor for GainComp {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::GainComp
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
}
