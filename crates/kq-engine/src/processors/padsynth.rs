//! PADsynth: a looped wavetable built from band-limited harmonics with
//! random phases.

use alloc::vec::Vec;

use kq_ir::{Params, ProcessorKind, DEFAULT_SAMPLE_RATE};

use crate::frequency::{cents_to_hz, db_to_scale};
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

const TABLE_RATE: f64 = DEFAULT_SAMPLE_RATE as f64;
const LENGTH_MIN: usize = 1024;
const LENGTH_MAX: usize = 1 << 20;

pub struct PadSynth {
    table: Vec<f32>,
    base_freq: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PadVoice {
    pos: f64,
}

/// Settings the table is generated from.
#[derive(Clone, Debug, PartialEq)]
pub struct PadSettings {
    pub length: usize,
    pub base_freq: f64,
    /// Harmonic bandwidth in cents.
    pub bandwidth: f64,
    pub harmonics: Vec<f64>,
    pub seed: u64,
}

impl PadSettings {
    pub fn from_params(params: &Params) -> Self {
        Self {
            length: (params.int("sample_length", 16384).max(0) as usize).clamp(LENGTH_MIN, LENGTH_MAX),
            base_freq: params.float("base_freq", 440.0).max(1.0),
            bandwidth: params.float("bandwidth", 10.0).max(0.0),
            harmonics: params
                .num_list("harmonics")
                .map(<[f64]>::to_vec)
                .unwrap_or_else(|| alloc::vec![1.0, 0.5, 0.333, 0.25]),
            seed: params.int("seed", 0) as u64,
        }
    }

    /// Amplitude profile over `length / 2` frequency bins.
    fn spectrum(&self) -> Vec<f64> {
        let bins = self.length / 2;
        let mut amps = alloc::vec![0.0; bins];
        let bin_hz = TABLE_RATE / self.length as f64;
        for (h, &amp) in self.harmonics.iter().enumerate() {
            let freq = self.base_freq * (h + 1) as f64;
            let bw_hz = ((libm::exp2(self.bandwidth / 1200.0) - 1.0) * freq).max(bin_hz);
            for (i, slot) in amps.iter_mut().enumerate().skip(1) {
                let x = (i as f64 * bin_hz - freq) / bw_hz;
                if x.abs() < 5.0 {
                    *slot += amp * libm::exp(-x * x) / bw_hz;
                }
            }
        }
        amps
    }
}

#[cfg(feature = "std")]
fn synthesize(settings: &PadSettings) -> Vec<f32> {
    use rustfft::num_complex::Complex;
    use rustfft::FftPlanner;

    let n = settings.length;
    let mut rng = fastrand::Rng::with_seed(settings.seed);
    let mut buf: Vec<Complex<f64>> = alloc::vec![Complex::new(0.0, 0.0); n];
    for (i, amp) in settings.spectrum().into_iter().enumerate() {
        let phase = rng.f64() * core::f64::consts::TAU;
        buf[i] = Complex::new(amp * libm::cos(phase), amp * libm::sin(phase));
    }
    FftPlanner::new().plan_fft_inverse(n).process(&mut buf);
    normalize(buf.iter().map(|c| c.re).collect())
}

#[cfg(not(feature = "std"))]
fn synthesize(settings: &PadSettings) -> Vec<f32> {
    // Direct sum over the harmonics without bandwidth spread.
    let n = settings.length;
    let mut rng = fastrand::Rng::with_seed(settings.seed);
    let mut out = alloc::vec![0.0; n];
    let cycles = settings.base_freq * n as f64 / TABLE_RATE;
    for (h, &amp) in settings.harmonics.iter().enumerate() {
        let phase = rng.f64() * core::f64::consts::TAU;
        let k = libm::round(cycles * (h + 1) as f64);
        for (i, s) in out.iter_mut().enumerate() {
            *s += amp * libm::sin(core::f64::consts::TAU * k * i as f64 / n as f64 + phase);
        }
    }
    normalize(out)
}

fn normalize(data: Vec<f64>) -> Vec<f32> {
    let peak = data.iter().fold(0.0f64, |m, s| m.max(s.abs()));
    let scale = if peak > 0.0 { 1.0 / peak } else { 0.0 };
    data.into_iter().map(|s| (s * scale) as f32).collect()
}

impl PadSynth {
    pub fn new(params: &Params) -> Self {
        let settings = PadSettings::from_params(params);
        log::debug!(
            "padsynth: building {} frame table at {} Hz",
            settings.length,
            settings.base_freq
        );
        Self {
            table: synthesize(&settings),
            base_freq: settings.base_freq,
        }
    }

    pub fn table(&self) -> &[f32] {
        &self.table
    }
}

impl Processor for PadSynth {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::PadSynth
    }

    fn allocate_state(&self, note: &NoteStart) -> VoiceState {
        let mut rng = fastrand::Rng::with_seed(note.seed);
        VoiceState::PadSynth(PadVoice {
            pos: rng.usize(..self.table.len().max(1)) as f64,
        })
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::PadSynth(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Active;
        };
        let len = self.table.len();
        if len == 0 {
            io.clear_outputs();
            return VoiceStatus::Active;
        }
        let pitch_in = io.input(0);
        let force_in = io.input(1);
        let rate = ctx.audio_rate.max(1) as f64;
        for i in 0..io.frames() {
            let hz = cents_to_hz(pitch_in.map_or(ctx.pitch, |p| p[i] as f64));
            let gain = db_to_scale(force_in.map_or(ctx.force, |f| f[i] as f64)) as f32;
            let idx = st.pos as usize;
            let frac = (st.pos - idx as f64) as f32;
            let a = self.table[idx % len];
            let b = self.table[(idx + 1) % len];
            let s = (a + (b - a) * frac) * gain;
            io.output(0)[i] = s;
            io.output(1)[i] = s;
            st.pos = libm::fmod(st.pos + hz / self.base_freq * TABLE_RATE / rate, len as f64);
        }
        VoiceStatus::Active
    }
}
