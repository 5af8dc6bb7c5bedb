//! Biquad low-pass and high-pass filter.

use core::f64::consts::{FRAC_1_SQRT_2, TAU};

use kq_ir::{Params, ProcessorKind};

use crate::frequency::cents_to_hz;
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
}

impl FilterType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "lowpass" => Some(FilterType::LowPass),
            "highpass" => Some(FilterType::HighPass),
            _ => None,
        }
    }
}

/// Normalized biquad coefficients (`a0 == 1`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coefs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Coefs {
    /// Coefficients for `cutoff` cents and `resonance` in `0..=100`.
    pub fn new(ty: FilterType, cutoff: f64, resonance: f64, audio_rate: u32) -> Self {
        let rate = audio_rate.max(1) as f64;
        let hz = cents_to_hz(cutoff).clamp(1.0, rate * 0.49);
        let q = FRAC_1_SQRT_2 * libm::exp2(resonance.clamp(0.0, 100.0) * 0.04);
        let w0 = TAU * hz / rate;
        let (sin, cos) = (libm::sin(w0), libm::cos(w0));
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match ty {
            FilterType::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterType::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Filter history of both channels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FilterState {
    x1: [f64; 2],
    x2: [f64; 2],
    y1: [f64; 2],
    y2: [f64; 2],
}

impl FilterState {
    #[inline]
    fn tick(&mut self, ch: usize, c: &Coefs, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1[ch] + c.b2 * self.x2[ch]
            - c.a1 * self.y1[ch]
            - c.a2 * self.y2[ch];
        self.x2[ch] = self.x1[ch];
        self.x1[ch] = x;
        self.y2[ch] = self.y1[ch];
        self.y1[ch] = y;
        y
    }
}

pub struct Filter {
    ty: FilterType,
    cutoff: f64,
    resonance: f64,
    mixed: FilterState,
}

impl Filter {
    pub fn new(params: &Params) -> Self {
        Self {
            ty: params
                .text("type")
                .and_then(FilterType::from_name)
                .unwrap_or(FilterType::LowPass),
            cutoff: params.float("cutoff", 6000.0),
            resonance: params.float("resonance", 0.0),
            mixed: FilterState::default(),
        }
    }

    fn run(&self, st: &mut FilterState, io: &mut PortIo<'_>, audio_rate: u32) {
        let left = io.input(0);
        let right = io.input(1);
        let cutoff_in = io.input(2);
        let res_in = io.input(3);
        let modulated = cutoff_in.is_some() || res_in.is_some();
        let mut coefs = Coefs::new(self.ty, self.cutoff, self.resonance, audio_rate);
        for i in 0..io.frames() {
            if modulated {
                let cutoff = self.cutoff + cutoff_in.map_or(0.0, |c| c[i] as f64);
                let res = self.resonance + res_in.map_or(0.0, |r| r[i] as f64);
                coefs = Coefs::new(self.ty, cutoff, res, audio_rate);
            }
            let l = st.tick(0, &coefs, left.map_or(0.0, |s| s[i] as f64));
            let r = st.tick(1, &coefs, right.map_or(0.0, |s| s[i] as f64));
            io.output(0)[i] = l as f32;
            io.output(1)[i] = r as f32;
        }
    }
}

impl Processor for Filter {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Filter
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::Filter(FilterState::default())
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        match state {
            VoiceState::Filter(st) => self.run(st, io, ctx.audio_rate),
            _ => io.clear_outputs(),
        }
        VoiceStatus::Active
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, audio_rate: u32) {
        let mut st = self.mixed;
        self.run(&mut st, io, audio_rate);
        self.mixed = st;
    }

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        match name {
            "cutoff" => self.cutoff = value,
            "resonance" => self.resonance = value,
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.mixed = FilterState::default();
    }
}
