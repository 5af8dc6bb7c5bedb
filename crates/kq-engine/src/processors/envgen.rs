//! Envelope generator: a breakpoint envelope as a control signal.

use alloc::sync::Arc;

use kq_ir::warp;
use kq_ir::{Envelope, Params, ProcessorKind};

use crate::envelope_state::EnvelopeState;
use crate::frequency::db_to_scale;
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct EnvGen {
    env: Arc<Envelope>,
    looping: bool,
    y_min: f64,
    y_max: f64,
    scale_amount: f64,
    scale_center: f64,
    linear_force: bool,
    trig_release: bool,
}

#[derive(Clone, Debug, Default)]
pub struct EnvGenVoice {
    env: EnvelopeState,
}

impl EnvGen {
    pub fn new(params: &Params) -> Self {
        Self {
            env: params
                .envelope("env")
                .cloned()
                .unwrap_or_else(|| Arc::new(Envelope::constant(1.0))),
            looping: params.bool("loop_enabled", false),
            y_min: params.float("y_min", 0.0),
            y_max: params.float("y_max", 1.0),
            scale_amount: params.float("scale_amount", 0.0),
            scale_center: params.float("scale_center", 0.0),
            linear_force: params.bool("linear_force", false),
            trig_release: params.bool("trig_release", false),
        }
    }
}

impl Processor for EnvGen {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::EnvGen
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::EnvGen(EnvGenVoice {
            env: EnvelopeState::new(&self.env),
        })
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::EnvGen(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Active;
        };
        let force = io.input(0);
        let running = !self.trig_release || ctx.released;
        let dx = warp::pitch_scale(ctx.pitch, self.scale_amount, self.scale_center)
            / ctx.audio_rate.max(1) as f64;
        for (i, out) in io.output(0).iter_mut().enumerate() {
            let v = st.env.value(&self.env);
            let mut y = self.y_min + v * (self.y_max - self.y_min);
            if self.linear_force {
                let db = force.map_or(ctx.force, |f| f[i] as f64);
                y *= db_to_scale(db);
            }
            *out = y as f32;
            if running {
                st.env.advance(&self.env, dx, self.looping && !ctx.released);
            }
        }
        VoiceStatus::Active
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "y_min" => self.y_min = value,
            "y_max" => self.y_max = value,
            "scale_amount" => self.scale_amount = value,
            "scale_center" => self.scale_center = value,
            _ => return false,
        }
        true
    }
}
