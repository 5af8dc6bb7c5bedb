//! Force source: note force, global force, per-note variation and the
//! force and release envelopes. This processor owns note release.

use alloc::sync::Arc;

use kq_ir::warp;
use kq_ir::{Envelope, Params, ProcessorKind};

use crate::envelope_state::EnvelopeState;
use crate::frequency::{scale_to_db, SILENCE_DB};
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

/// Release fade used when no release envelope is enabled.
pub const DEFAULT_RELEASE_FADE: f64 = 0.002;

pub struct Force {
    global_force: f64,
    variation: f64,
    env: Option<Arc<Envelope>>,
    env_loop: bool,
    scale_amount: f64,
    scale_center: f64,
    release_env: Option<Arc<Envelope>>,
    release_fade: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ForceVoice {
    /// Random offset chosen at note-on, in dB.
    variation: f64,
    pitch: f64,
    env: EnvelopeState,
    release: EnvelopeState,
    /// Frames since note-off.
    released_frames: u64,
}

impl Force {
    pub fn new(params: &Params) -> Self {
        let env = params
            .bool("env_enabled", false)
            .then(|| params.envelope("env").cloned())
            .flatten();
        let release_env = params
            .bool("release_env_enabled", false)
            .then(|| params.envelope("release_env").cloned())
            .flatten();
        Self {
            global_force: params.float("global_force", 0.0),
            variation: params.float("force_variation", 0.0).max(0.0),
            env,
            env_loop: params.bool("env_loop_enabled", false),
            scale_amount: params.float("env_scale_amount", 0.0),
            scale_center: params.float("env_scale_center", 0.0),
            release_env,
            release_fade: params.float("release_fade", DEFAULT_RELEASE_FADE).max(0.0),
        }
    }

    /// Force offset in dB at the current frame, or `None` once the voice
    /// has run out.
    fn frame_offset(&self, st: &mut ForceVoice, released: bool, rate: f64) -> Option<f64> {
        let mut db = self.global_force + st.variation;
        if let Some(env) = &self.env {
            let y = st.env.value(env);
            if st.env.is_finished() && env.last_y() <= 0.0 {
                return None;
            }
            db += scale_to_db(y);
            let speed = warp::pitch_scale(st.pitch, self.scale_amount, self.scale_center);
            st.env.advance(env, speed / rate, self.env_loop && !released);
        }
        if released {
            match &self.release_env {
                Some(rel) => {
                    if st.release.is_finished() {
                        return None;
                    }
                    db += scale_to_db(st.release.value(rel));
                    st.release.advance(rel, 1.0 / rate, false);
                }
                None => {
                    let fade_frames = self.release_fade * rate;
                    if st.released_frames as f64 >= fade_frames {
                        return None;
                    }
                    db += scale_to_db(1.0 - st.released_frames as f64 / fade_frames);
                }
            }
            st.released_frames += 1;
        }
        Some(db)
    }
}

impl Processor for Force {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Force
    }

    fn allocate_state(&self, note: &NoteStart) -> VoiceState {
        let mut rng = fastrand::Rng::with_seed(note.seed);
        VoiceState::Force(ForceVoice {
            variation: (rng.f64() - 0.5) * self.variation,
            pitch: note.pitch,
            env: self.env.as_deref().map(EnvelopeState::new).unwrap_or_default(),
            release: self
                .release_env
                .as_deref()
                .map(EnvelopeState::new)
                .unwrap_or_default(),
            released_frames: 0,
        })
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::Force(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Finished;
        };
        st.pitch = ctx.pitch;
        let rate = ctx.audio_rate.max(1) as f64;
        let mut status = VoiceStatus::Active;
        for out in io.output(0).iter_mut() {
            if status == VoiceStatus::Finished {
                *out = SILENCE_DB as f32;
                continue;
            }
            match self.frame_offset(st, ctx.released, rate) {
                Some(db) => *out = (ctx.force + db) as f32,
                None => {
                    *out = SILENCE_DB as f32;
                    status = VoiceStatus::Finished;
                }
            }
        }
        status
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "global_force" => self.global_force = value,
            "release_fade" => self.release_fade = value.max(0.0),
            _ => return false,
        }
        true
    }

    fn handles_release(&self) -> bool {
        true
    }
}
