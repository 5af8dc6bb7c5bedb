//! Stereo record-and-replay looper.

use alloc::vec::Vec;

use kq_ir::{Error, Params, ProcessorKind, Result};

use crate::processor::{PortIo, Processor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Pass,
    Record,
    Play,
}

impl Mode {
    fn from_value(value: f64) -> Self {
        match libm::round(value) as i64 {
            1 => Mode::Record,
            2 => Mode::Play,
            _ => Mode::Pass,
        }
    }
}

pub struct Looper {
    max_rec_time: f64,
    mode: Mode,
    speed: f64,
    buffers: [Vec<f32>; 2],
    /// Recorded length in frames.
    recorded: usize,
    play_pos: f64,
}

impl Looper {
    pub fn new(params: &Params) -> Self {
        Self {
            max_rec_time: params.float("max_rec_time", 16.0).clamp(0.0, 60.0),
            mode: Mode::from_value(params.float("mode", 0.0)),
            speed: params.float("speed", 1.0),
            buffers: [Vec::new(), Vec::new()],
            recorded: 0,
            play_pos: 0.0,
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        match mode {
            Mode::Record => self.recorded = 0,
            Mode::Play => self.play_pos = 0.0,
            Mode::Pass => {}
        }
        self.mode = mode;
    }
}

impl Processor for Looper {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Looper
    }

    fn set_audio_rate(&mut self, audio_rate: u32) -> Result<()> {
        let len = (self.max_rec_time * audio_rate as f64) as usize;
        for buf in &mut self.buffers {
            buf.clear();
            buf.try_reserve_exact(len)
                .map_err(|_| Error::memory("looper buffer"))?;
            buf.resize(len, 0.0);
        }
        self.recorded = 0;
        self.play_pos = 0.0;
        Ok(())
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, _audio_rate: u32) {
        match self.mode {
            Mode::Pass => io.pass_stereo(),
            Mode::Record => {
                io.pass_stereo();
                let capacity = self.buffers[0].len();
                let take = io.frames().min(capacity - self.recorded);
                for ch in 0..2 {
                    let src = &io.output(ch)[..take];
                    self.buffers[ch][self.recorded..self.recorded + take].copy_from_slice(src);
                }
                self.recorded += take;
            }
            Mode::Play => {
                if self.recorded == 0 {
                    io.clear_outputs();
                    return;
                }
                let len = self.recorded as f64;
                for i in 0..io.frames() {
                    let idx = self.play_pos as usize;
                    for ch in 0..2 {
                        io.output(ch)[i] = self.buffers[ch][idx];
                    }
                    self.play_pos += self.speed;
                    self.play_pos = self.play_pos.rem_euclid(len);
                }
            }
        }
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "mode" => self.set_mode(Mode::from_value(value)),
            "speed" => self.speed = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.recorded = 0;
        self.play_pos = 0.0;
    }
}
