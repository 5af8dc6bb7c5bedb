//! Stereo feedback delay.

use alloc::vec::Vec;

use kq_ir::{Error, Params, ProcessorKind, Result};

use crate::processor::{PortIo, Processor};

pub struct Delay {
    max_delay: f64,
    delay: f64,
    feedback: f64,
    lines: [Vec<f32>; 2],
    write: usize,
}

impl Delay {
    pub fn new(params: &Params) -> Self {
        Self {
            max_delay: params.float("max_delay", 2.0).clamp(0.001, 60.0),
            delay: params.float("delay", 0.25),
            feedback: params.float("feedback", 0.0),
            lines: [Vec::new(), Vec::new()],
            write: 0,
        }
    }

    fn read(line: &[f32], write: usize, delay: f64) -> f32 {
        let len = line.len();
        let pos = write as f64 + len as f64 - delay;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = line[idx % len];
        let b = line[(idx + 1) % len];
        a + (b - a) * frac
    }
}

impl Processor for Delay {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Delay
    }

    fn set_audio_rate(&mut self, audio_rate: u32) -> Result<()> {
        let len = (self.max_delay * audio_rate as f64) as usize + 2;
        for line in &mut self.lines {
            line.clear();
            line.try_reserve_exact(len)
                .map_err(|_| Error::memory("delay line"))?;
            line.resize(len, 0.0);
        }
        self.write = 0;
        Ok(())
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, audio_rate: u32) {
        let len = self.lines[0].len();
        if len < 3 {
            io.clear_outputs();
            return;
        }
        let inputs = [io.input(0), io.input(1)];
        let offset = io.input(2);
        let rate = audio_rate.max(1) as f64;
        let feedback = self.feedback.clamp(-0.999, 0.999) as f32;
        for i in 0..io.frames() {
            let seconds = self.delay + offset.map_or(0.0, |o| o[i] as f64);
            let delay = (seconds * rate).clamp(1.0, (len - 2) as f64);
            for ch in 0..2 {
                let line = &mut self.lines[ch];
                let out = Self::read(line, self.write, delay);
                let x = inputs[ch].map_or(0.0, |s| s[i]);
                line[self.write] = x + out * feedback;
                io.output(ch)[i] = out;
            }
            self.write = (self.write + 1) % len;
        }
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "delay" => self.delay = value,
            "feedback" => self.feedback = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write = 0;
    }
}
