//! Stereo-linked downward and upward compressor.

use kq_ir::{Params, ProcessorKind};

use crate::frequency::{db_to_scale, scale_to_db, SILENCE_DB};
use crate::processor::{PortIo, Processor};

pub struct Compress {
    attack: f64,
    release: f64,
    down_enabled: bool,
    down_threshold: f64,
    down_ratio: f64,
    up_enabled: bool,
    up_threshold: f64,
    up_ratio: f64,
    /// Followed signal level as a linear amplitude.
    level: f64,
}

/// One-pole coefficient for a time constant in milliseconds.
fn follower_coef(ms: f64, audio_rate: u32) -> f64 {
    let frames = ms.max(0.0) * 0.001 * audio_rate as f64;
    if frames < 1.0 {
        0.0
    } else {
        libm::exp(-1.0 / frames)
    }
}

impl Compress {
    pub fn new(params: &Params) -> Self {
        Self {
            attack: params.float("attack", 10.0),
            release: params.float("release", 100.0),
            down_enabled: params.bool("down_enabled", true),
            down_threshold: params.float("down_threshold", -12.0),
            down_ratio: params.float("down_ratio", 4.0),
            up_enabled: params.bool("up_enabled", false),
            up_threshold: params.float("up_threshold", -50.0),
            up_ratio: params.float("up_ratio", 2.0),
            level: 0.0,
        }
    }

    /// Gain change in dB for a followed level in dB.
    fn gain_db(&self, level_db: f64) -> f64 {
        let mut gain = 0.0;
        if self.down_enabled && level_db > self.down_threshold {
            gain += (self.down_threshold - level_db) * (1.0 - 1.0 / self.down_ratio.max(1.0));
        }
        if self.up_enabled && level_db < self.up_threshold && level_db > SILENCE_DB {
            gain += (self.up_threshold - level_db) * (1.0 - 1.0 / self.up_ratio.max(1.0));
        }
        gain
    }
}

impl Processor for Compress {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Compress
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, audio_rate: u32) {
        let left = io.input(0);
        let right = io.input(1);
        let attack = follower_coef(self.attack, audio_rate);
        let release = follower_coef(self.release, audio_rate);
        for i in 0..io.frames() {
            let l = left.map_or(0.0, |s| s[i]);
            let r = right.map_or(0.0, |s| s[i]);
            let peak = l.abs().max(r.abs()) as f64;
            let coef = if peak > self.level { attack } else { release };
            self.level = peak + (self.level - peak) * coef;
            let gain = db_to_scale(self.gain_db(scale_to_db(self.level))) as f32;
            io.output(0)[i] = l * gain;
            io.output(1)[i] = r * gain;
        }
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "attack" => self.attack = value,
            "release" => self.release = value,
            "down_threshold" => self.down_threshold = value,
            "down_ratio" => self.down_ratio = value,
            "up_threshold" => self.up_threshold = value,
            "up_ratio" => self.up_ratio = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.level = 0.0;
    }
}
