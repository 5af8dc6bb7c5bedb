//! Additive synthesis from a small set of harmonic tones.

use arrayvec::ArrayVec;

use kq_ir::{Params, ProcessorKind};

use crate::frequency::{cents_to_hz, db_to_scale};
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

/// Maximum number of tones.
pub const TONES_MAX: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Saw,
}

impl Waveform {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "triangle" => Some(Waveform::Triangle),
            "square" => Some(Waveform::Square),
            "saw" => Some(Waveform::Saw),
            _ => None,
        }
    }

    /// Value at `phase` in cycles, `0.0..1.0`.
    pub fn at(self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => libm::sin(core::f64::consts::TAU * phase),
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Saw => 2.0 * phase - 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tone {
    ratio: f64,
    left: f64,
    right: f64,
}

pub struct Additive {
    waveform: Waveform,
    tones: ArrayVec<Tone, TONES_MAX>,
}

#[derive(Clone, Debug, Default)]
pub struct AddVoice {
    phases: [f64; TONES_MAX],
}

/// Left and right gains of a pan position in `-1..=1`.
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

impl Additive {
    pub fn new(params: &Params) -> Self {
        let waveform = params
            .text("waveform")
            .and_then(Waveform::from_name)
            .unwrap_or(Waveform::Sine);
        let pitches = params.num_list("tone_pitches").unwrap_or(&[1.0]);
        let volumes = params.num_list("tone_volumes").unwrap_or(&[]);
        let pannings = params.num_list("tone_pannings").unwrap_or(&[]);
        let tones = pitches
            .iter()
            .enumerate()
            .take(TONES_MAX)
            .map(|(i, &ratio)| {
                let gain = db_to_scale(volumes.get(i).copied().unwrap_or(0.0));
                let (l, r) = pan_gains(pannings.get(i).copied().unwrap_or(0.0));
                Tone {
                    ratio,
                    left: gain * l,
                    right: gain * r,
                }
            })
            .collect();
        Self { waveform, tones }
    }
}

impl Processor for Additive {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Additive
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::Additive(AddVoice::default())
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::Additive(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Active;
        };
        let pitch_in = io.input(0);
        let force_in = io.input(1);
        let rate = ctx.audio_rate.max(1) as f64;
        for i in 0..io.frames() {
            let hz = cents_to_hz(pitch_in.map_or(ctx.pitch, |p| p[i] as f64));
            let gain = db_to_scale(force_in.map_or(ctx.force, |f| f[i] as f64));
            let (mut l, mut r) = (0.0, 0.0);
            for (tone, phase) in self.tones.iter().zip(st.phases.iter_mut()) {
                let s = self.waveform.at(*phase) * gain;
                l += s * tone.left;
                r += s * tone.right;
                *phase = libm::fmod(*phase + hz * tone.ratio / rate, 1.0);
            }
            io.output(0)[i] = l as f32;
            io.output(1)[i] = r as f32;
        }
        VoiceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec;
    use kq_ir::{AudioBuffer, ParamValue};

    #[test]
    fn waveforms_hit_expected_points() {
        assert!(Waveform::Sine.at(0.25) > 0.999);
        assert_eq!(Waveform::Triangle.at(0.25), 1.0);
        assert_eq!(Waveform::Triangle.at(0.75), -1.0);
        assert_eq!(Waveform::Square.at(0.1), 1.0);
        assert_eq!(Waveform::Saw.at(0.0), -1.0);
        assert_eq!(Waveform::from_name("noise"), None);
    }

    #[test]
    fn pan_gains_keep_center_at_unity() {
        assert_eq!(pan_gains(0.0), (1.0, 1.0));
        assert_eq!(pan_gains(-1.0), (1.0, 0.0));
        assert_eq!(pan_gains(5.0), (0.0, 1.0));
    }

    #[test]
    fn panned_tone_only_reaches_one_side() {
        let mut params = Params::new();
        params.insert("waveform", ParamValue::Text(String::from("square")));
        params.insert("tone_pannings", ParamValue::NumList(vec![1.0]));
        let proc = Additive::new(&params);
        let mut st = VoiceState::Additive(AddVoice::default());
        let inputs = AudioBuffer::new(2, 16);
        let mut outputs = AudioBuffer::new(2, 16);
        let ctx = VoiceContext {
            audio_rate: 48000,
            pitch: 0.0,
            force: 0.0,
            released: false,
        };
        let mut io = PortIo::new(&inputs, 0, &mut outputs, 16);
        proc.process_voice(&mut st, &mut [], &mut io, &ctx);
        assert!(outputs.channel(0).iter().all(|&s| s == 0.0));
        assert!(outputs.channel(1).iter().all(|&s| s == 1.0));
    }
}
