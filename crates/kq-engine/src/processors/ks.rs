//! Karplus-Strong plucked string.

use kq_ir::{Params, ProcessorKind};

use crate::frequency::{cents_to_hz, db_to_scale};
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

/// Lowest pitch the delay line is sized for, in Hz.
pub const LOWEST_HZ: f64 = 20.0;

/// Loss per pass through the string.
const FEEDBACK: f32 = 0.996;

pub struct KarplusStrong {
    damp: f64,
}

#[derive(Clone, Debug, Default)]
pub struct KsVoice {
    seed: u64,
    excited: bool,
    write: usize,
    prev: f32,
}

/// Scratch frames a voice needs at `audio_rate`.
pub fn scratch_len(audio_rate: u32) -> usize {
    (audio_rate as f64 / LOWEST_HZ) as usize + 2
}

impl KarplusStrong {
    pub fn new(params: &Params) -> Self {
        Self {
            damp: params.float("damp", 50.0).clamp(0.0, 100.0),
        }
    }
}

fn read_at(line: &[f32], write: usize, delay: f64) -> f32 {
    let len = line.len();
    let pos = write as f64 + len as f64 - delay;
    let idx = pos as usize;
    let frac = (pos - idx as f64) as f32;
    let a = line[idx % len];
    let b = line[(idx + 1) % len];
    a + (b - a) * frac
}

impl Processor for KarplusStrong {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::KarplusStrong
    }

    fn scratch_len(&self, audio_rate: u32) -> usize {
        scratch_len(audio_rate)
    }

    fn allocate_state(&self, note: &NoteStart) -> VoiceState {
        VoiceState::Ks(KsVoice {
            seed: note.seed,
            ..KsVoice::default()
        })
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::Ks(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Active;
        };
        if scratch.len() < 4 {
            io.clear_outputs();
            return VoiceStatus::Active;
        }
        let pitch_in = io.input(0);
        let force_in = io.input(1);
        let excitation = io.input(2);
        let rate = ctx.audio_rate.max(1) as f64;
        let max_delay = (scratch.len() - 2) as f64;
        if !st.excited {
            st.excited = true;
            scratch.fill(0.0);
            if excitation.is_none() {
                let hz = cents_to_hz(pitch_in.map_or(ctx.pitch, |p| p[0] as f64));
                let burst = ((rate / hz) as usize).clamp(1, scratch.len());
                let mut rng = fastrand::Rng::with_seed(st.seed);
                for s in &mut scratch[..burst] {
                    *s = rng.f32() * 2.0 - 1.0;
                }
                st.write = burst;
            }
        }
        let a = (self.damp / 200.0) as f32;
        let len = scratch.len();
        for i in 0..io.frames() {
            let hz = cents_to_hz(pitch_in.map_or(ctx.pitch, |p| p[i] as f64));
            let delay = (rate / hz).clamp(1.0, max_delay);
            let y = read_at(scratch, st.write, delay);
            let filtered = y + a * (st.prev - y);
            st.prev = y;
            let input = excitation.map_or(0.0, |e| e[i]);
            scratch[st.write] = filtered * FEEDBACK + input;
            st.write = (st.write + 1) % len;
            let gain = db_to_scale(force_in.map_or(ctx.force, |f| f[i] as f64)) as f32;
            io.output(0)[i] = y * gain;
            io.output(1)[i] = y * gain;
        }
        VoiceStatus::Active
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        if name == "damp" {
            self.damp = value.clamp(0.0, 100.0);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use kq_ir::AudioBuffer;

    fn pluck(seed: u64, frames: usize) -> Vec<f32> {
        let proc = KarplusStrong::new(&Params::new());
        let mut st = proc.allocate_state(&NoteStart {
            pitch: 0.0,
            force: 0.0,
            hit: None,
            seed,
            audio_rate: 48000,
        });
        let mut scratch = vec![0.0; scratch_len(48000)];
        let inputs = AudioBuffer::new(3, frames);
        let mut outputs = AudioBuffer::new(2, frames);
        let ctx = VoiceContext {
            audio_rate: 48000,
            pitch: 0.0,
            force: 0.0,
            released: false,
        };
        let mut io = PortIo::new(&inputs, 0, &mut outputs, frames);
        proc.process_voice(&mut st, &mut scratch, &mut io, &ctx);
        outputs.channel(0).to_vec()
    }

    #[test]
    fn scratch_covers_lowest_pitch() {
        assert_eq!(scratch_len(48000), 2402);
    }

    #[test]
    fn pluck_is_deterministic_per_seed() {
        assert_eq!(pluck(3, 512), pluck(3, 512));
        assert_ne!(pluck(3, 512), pluck(4, 512));
    }

    #[test]
    fn string_decays() {
        let out = pluck(9, 48000);
        let energy = |s: &[f32]| s.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&out[..4800]) > energy(&out[43200..]) * 4.0);
    }
}
