//! Sample data types.

use alloc::sync::Arc;
use alloc::vec::Vec;

/// Rate assumed for samples whose data carries no rate of its own.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Decoded PCM audio, one plane per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Pcm {
    /// Rate the data was recorded at, if known.
    pub rate: Option<u32>,
    channels: Vec<Vec<f32>>,
}

impl Pcm {
    /// Build from per-channel planes. Planes are truncated to the shortest
    /// one; at most two channels are kept.
    pub fn new(rate: Option<u32>, mut channels: Vec<Vec<f32>>) -> Self {
        channels.truncate(2);
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut channels {
            ch.truncate(len);
        }
        Self { rate, channels }
    }

    pub fn mono(rate: Option<u32>, data: Vec<f32>) -> Self {
        Self::new(rate, alloc::vec![data])
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Read-only access to one channel; mono data answers for both.
    pub fn channel(&self, ch: usize) -> &[f32] {
        match self.channels.len() {
            0 => &[],
            n => &self.channels[ch.min(n - 1)],
        }
    }

    /// Linearly interpolated value at a fractional frame position.
    /// Positions outside the data read as silence.
    pub fn interpolated(&self, ch: usize, pos: f64) -> f32 {
        if pos < 0.0 {
            return 0.0;
        }
        let data = self.channel(ch);
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = data.get(idx).copied().unwrap_or(0.0);
        let b = data.get(idx + 1).copied().unwrap_or(0.0);
        a + (b - a) * frac
    }
}

/// Sample loop mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    /// Play once
    #[default]
    Off,
    /// Forward loop
    Unidirectional,
    /// Ping-pong loop
    Bidirectional,
}

impl LoopMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "off" => Some(LoopMode::Off),
            "uni" => Some(LoopMode::Unidirectional),
            "bi" => Some(LoopMode::Bidirectional),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LoopMode::Off => "off",
            LoopMode::Unidirectional => "uni",
            LoopMode::Bidirectional => "bi",
        }
    }
}

/// Playback metadata from `p_sh_sample.json`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleHeader {
    /// Playback rate at which the sample sounds at 0 cents. `None` means
    /// the data's own rate.
    pub freq: Option<f64>,
    pub loop_mode: LoopMode,
    pub loop_start: usize,
    pub loop_end: usize,
}

impl Default for SampleHeader {
    fn default() -> Self {
        Self {
            freq: None,
            loop_mode: LoopMode::Off,
            loop_start: 0,
            loop_end: 0,
        }
    }
}

/// A playable sample: header plus shared PCM data.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub header: SampleHeader,
    pub pcm: Arc<Pcm>,
}

impl Sample {
    pub fn new(header: SampleHeader, pcm: Arc<Pcm>) -> Self {
        Self { header, pcm }
    }

    /// Frames per second at 0 cents.
    pub fn base_freq(&self) -> f64 {
        self.header
            .freq
            .unwrap_or(self.pcm.rate.unwrap_or(DEFAULT_SAMPLE_RATE) as f64)
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Loop bounds if the loop is enabled and non-empty, clamped to the data.
    pub fn loop_range(&self) -> Option<(usize, usize)> {
        if self.header.loop_mode == LoopMode::Off {
            return None;
        }
        let end = self.header.loop_end.min(self.len());
        (self.header.loop_start < end).then_some((self.header.loop_start, end))
    }
}
