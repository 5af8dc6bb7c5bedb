//! Freeverb-style stereo reverb: parallel damped combs into series
//! allpasses.

use alloc::vec::Vec;

use kq_ir::{Error, Params, ProcessorKind, Result};

use crate::frequency::db_to_scale;
use crate::processor::{PortIo, Processor};

/// Comb lengths in frames at 44.1 kHz.
const COMB_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass lengths in frames at 44.1 kHz.
const ALLPASS_LENGTHS: [usize; 4] = [556, 441, 341, 225];

/// Extra length of the right channel's lines.
const STEREO_SPREAD: usize = 23;

const INPUT_GAIN: f32 = 0.015;
const ALLPASS_FEEDBACK: f32 = 0.5;

#[derive(Default)]
struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.store = output * (1.0 - damp) + self.store * damp;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

#[derive(Default)]
struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
}

impl Allpass {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        buffered - input
    }
}

fn line(len: usize) -> Result<Vec<f32>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::memory("reverb line"))?;
    v.resize(len, 0.0);
    Ok(v)
}

pub struct Freeverb {
    refl: f64,
    damp: f64,
    gain: f64,
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<Allpass>; 2],
}

impl Freeverb {
    pub fn new(params: &Params) -> Self {
        Self {
            refl: params.float("refl", 20.0),
            damp: params.float("damp", 20.0),
            gain: params.float("gain", 0.0),
            combs: [Vec::new(), Vec::new()],
            allpasses: [Vec::new(), Vec::new()],
        }
    }

    /// Comb feedback: reflectivity is the level drop per pass in dB.
    fn feedback(&self) -> f32 {
        (1.0 - db_to_scale(-self.refl.max(0.0))).clamp(0.0, 0.99) as f32
    }
}

impl Processor for Freeverb {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Freeverb
    }

    fn set_audio_rate(&mut self, audio_rate: u32) -> Result<()> {
        let scale = audio_rate as f64 / 44100.0;
        let scaled = |len: usize| ((len as f64 * scale) as usize).max(1);
        for (ch, spread) in [0, STEREO_SPREAD].into_iter().enumerate() {
            self.combs[ch].clear();
            for len in COMB_LENGTHS {
                self.combs[ch].push(Comb {
                    buffer: line(scaled(len + spread))?,
                    ..Comb::default()
                });
            }
            self.allpasses[ch].clear();
            for len in ALLPASS_LENGTHS {
                self.allpasses[ch].push(Allpass {
                    buffer: line(scaled(len + spread))?,
                    ..Allpass::default()
                });
            }
        }
        Ok(())
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, _audio_rate: u32) {
        if self.combs[0].is_empty() {
            io.clear_outputs();
            return;
        }
        let feedback = self.feedback();
        let damp = (self.damp / 100.0).clamp(0.0, 1.0) as f32;
        let wet = db_to_scale(self.gain) as f32;
        let left = io.input(0);
        let right = io.input(1);
        for i in 0..io.frames() {
            let mono = (left.map_or(0.0, |s| s[i]) + right.map_or(0.0, |s| s[i])) * INPUT_GAIN;
            for ch in 0..2 {
                let mut acc = 0.0;
                for comb in &mut self.combs[ch] {
                    acc += comb.process(mono, feedback, damp);
                }
                for ap in &mut self.allpasses[ch] {
                    acc = ap.process(acc);
                }
                io.output(ch)[i] = acc * wet;
            }
        }
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "refl" => self.refl = value,
            "damp" => self.damp = value,
            "gain" => self.gain = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        for comb in self.combs.iter_mut().flatten() {
            comb.buffer.fill(0.0);
            comb.store = 0.0;
        }
        for ap in self.allpasses.iter_mut().flatten() {
            ap.buffer.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::AudioBuffer;

    fn tail(reverb: &mut Freeverb) -> f32 {
        let frames = 48000;
        let mut inputs = AudioBuffer::new(2, frames);
        inputs.channel_mut(0)[0] = 1.0;
        let mut outputs = AudioBuffer::new(2, frames);
        let mut io = PortIo::new(&inputs, 0b01, &mut outputs, frames);
        reverb.process_signal(&mut io, 48000);
        outputs.channel(1)[24000..].iter().map(|s| s.abs()).sum()
    }

    #[test]
    fn impulse_produces_decaying_tail() {
        let mut reverb = Freeverb::new(&Params::new());
        reverb.set_audio_rate(48000).unwrap();
        let long = tail(&mut reverb);
        assert!(long > 0.0);
        reverb.reset();
        reverb.set_control("refl", 3.0);
        let short = tail(&mut reverb);
        assert!(short < long);
    }

    #[test]
    fn unprepared_reverb_is_silent() {
        let mut reverb = Freeverb::new(&Params::new());
        let inputs = AudioBuffer::new(2, 4);
        let mut outputs = AudioBuffer::new(2, 4);
        outputs.channel_mut(0).fill(1.0);
        let mut io = PortIo::new(&inputs, 0b11, &mut outputs, 4);
        reverb.process_signal(&mut io, 48000);
        assert!(outputs.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn reflectivity_sets_feedback() {
        let reverb = Freeverb::new(&Params::new());
        assert!((reverb.feedback() - 0.9).abs() < 1e-6);
    }
}
