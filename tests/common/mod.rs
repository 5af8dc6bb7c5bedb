//! Shared composition builders and signal measurements for the
//! integration tests.

#![allow(dead_code)]

use std::f64::consts::TAU;

use kq_handle::Handle;
use kq_ir::Pcm;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

pub const RATE: u32 = 48000;

/// One song of `pat_000` with an additive sine instrument wired to the
/// master output. Columns and extra keys are added per test.
pub const SINE_SONG: &[(&str, &str)] = &[
    ("album/p_manifest.json", "{}"),
    ("album/p_tracks.json", "[0]"),
    ("song_00/p_manifest.json", "{}"),
    ("song_00/p_order_list.json", "[[0,0]]"),
    ("pat_000/p_manifest.json", "{}"),
    ("pat_000/p_pattern.json", r#"{"length":[4,0]}"#),
    ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
    ("au_00/proc_00/p_manifest.json", r#"{"type":"add"}"#),
    ("au_00/p_connections.json", r#"[["proc_00/out_00","out_00"],["proc_00/out_01","out_01"]]"#),
    ("p_connections.json", r#"[["au_00/out_00","out_00"],["au_00/out_01","out_01"]]"#),
];

/// A one-beat song at 60 BPM whose instrument plays a one-second 440 Hz
/// sample through pitch and force processors.
pub const SAMPLE_SONG: &[(&str, &str)] = &[
    ("album/p_manifest.json", "{}"),
    ("album/p_tracks.json", "[0]"),
    ("song_00/p_manifest.json", "{}"),
    ("song_00/p_order_list.json", "[[0,0]]"),
    ("song_00/p_tempo.json", "60"),
    ("pat_000/p_manifest.json", "{}"),
    ("pat_000/p_pattern.json", r#"{"length":[1,0]}"#),
    ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
    ("au_00/proc_00/p_manifest.json", r#"{"type":"sample"}"#),
    ("au_00/proc_01/p_manifest.json", r#"{"type":"pitch"}"#),
    ("au_00/proc_02/p_manifest.json", r#"{"type":"force"}"#),
    (
        "au_00/p_connections.json",
        r#"[["proc_01/out_00","proc_00/in_00"],["proc_02/out_00","proc_00/in_01"],
           ["proc_00/out_00","out_00"],["proc_00/out_01","out_01"]]"#,
    ),
    ("p_connections.json", r#"[["au_00/out_00","out_00"],["au_00/out_01","out_01"]]"#),
];

pub const SAMPLE_KEY: &str = "au_00/proc_00/c/smp_000/p_sample.wav";

/// A handle at `RATE` holding `base` followed by `extra`.
pub fn handle_with(base: &[(&str, &str)], extra: &[(&str, &str)]) -> Handle {
    let mut handle = Handle::new(RATE).unwrap();
    for (key, json) in base.iter().chain(extra) {
        handle
            .set_data(key, json.as_bytes())
            .unwrap_or_else(|e| panic!("set {} failed: {}", key, e));
    }
    handle
}

/// `SAMPLE_SONG` with its sine sample loaded.
pub fn sample_handle(extra: &[(&str, &str)]) -> Handle {
    let mut handle = handle_with(SAMPLE_SONG, extra);
    handle.put_pcm(SAMPLE_KEY, sine_pcm(440.0, RATE as usize)).unwrap();
    handle
}

pub fn sine_pcm(freq: f64, frames: usize) -> Pcm {
    let data = (0..frames)
        .map(|i| (TAU * freq * i as f64 / RATE as f64).sin() as f32)
        .collect();
    Pcm::mono(Some(RATE), data)
}

/// Left channel of everything `play` produces until the song ends.
pub fn render_all(handle: &mut Handle, chunk: usize) -> Vec<f32> {
    let mut out = Vec::new();
    loop {
        let n = handle.play(chunk).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(handle.get_buffer(0));
    }
}

/// Left channel of exactly `frames` frames, or fewer at song end.
pub fn render_frames(handle: &mut Handle, frames: usize) -> Vec<f32> {
    let mut out = Vec::new();
    while out.len() < frames {
        let n = handle.play((frames - out.len()).min(handle.buffer_size())).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(handle.get_buffer(0));
    }
    out
}

pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Frequency of the strongest FFT bin, refined by parabolic
/// interpolation over its neighbours.
pub fn peak_frequency(samples: &[f32], rate: u32) -> f64 {
    let n = samples.len();
    let mut buf: Vec<Complex<f64>> = samples
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let w = 0.5 - 0.5 * (TAU * i as f64 / n as f64).cos();
            Complex::new(s as f64 * w, 0.0)
        })
        .collect();
    FftPlanner::new().plan_fft_forward(n).process(&mut buf);

    let mags: Vec<f64> = buf[..n / 2].iter().map(|c| c.norm()).collect();
    let peak = (1..mags.len() - 1)
        .max_by(|&a, &b| mags[a].total_cmp(&mags[b]))
        .unwrap();
    let (l, c, r) = (mags[peak - 1], mags[peak], mags[peak + 1]);
    let denom = l - 2.0 * c + r;
    let shift = if denom == 0.0 { 0.0 } else { 0.5 * (l - r) / denom };
    (peak as f64 + shift) * rate as f64 / n as f64
}
