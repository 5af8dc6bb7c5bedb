//! Processor kinds, port tables and signal types.

/// Maximum port index used by any device or interface.
pub const PORTS_MAX: usize = 16;

/// Semantic kind of a port. Edges require equal kinds on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// One audio channel (left or right).
    Audio,
    /// Pitch in cents relative to A4 = 440 Hz.
    Pitch,
    /// Force in dB, 0 = unity.
    Force,
    /// Plain float stream.
    Control,
}

impl PortKind {
    pub fn name(self) -> &'static str {
        match self {
            PortKind::Audio => "audio",
            PortKind::Pitch => "pitch",
            PortKind::Force => "force",
            PortKind::Control => "control",
        }
    }
}

/// Per-voice or whole-buffer rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalType {
    Voice,
    Mixed,
}

impl SignalType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "voice" => Some(SignalType::Voice),
            "mixed" => Some(SignalType::Mixed),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalType::Voice => "voice",
            SignalType::Mixed => "mixed",
        }
    }
}

/// Input and output port kinds of a processor type, indexed by port number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortTable {
    pub inputs: &'static [PortKind],
    pub outputs: &'static [PortKind],
}

use PortKind::{Audio as A, Control as C, Force as F, Pitch as P};

const NONE: &[PortKind] = &[];
const STEREO: &[PortKind] = &[A, A];
const GENERATOR_IN: &[PortKind] = &[P, F];
const KS_IN: &[PortKind] = &[P, F, A];
const STEREO_CC: &[PortKind] = &[A, A, C, C];
const STEREO_C: &[PortKind] = &[A, A, C];
const STEREO_F: &[PortKind] = &[A, A, F];
const QUAD: &[PortKind] = &[A, A, A, A];
const PITCH: &[PortKind] = &[P];
const FORCE: &[PortKind] = &[F];
const CONTROL: &[PortKind] = &[C];
const VOICE: &[SignalType] = &[SignalType::Voice];
const MIXED: &[SignalType] = &[SignalType::Mixed];
const EITHER: &[SignalType] = &[SignalType::Voice, SignalType::Mixed];

/// The closed set of processor types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Pitch,
    Force,
    EnvGen,
    Sample,
    Additive,
    KarplusStrong,
    PadSynth,
    Filter,
    Volume,
    Panning,
    RingMod,
    BitCrusher,
    GainComp,
    RangeMap,
    Slope,
    Delay,
    Freeverb,
    Compress,
    Looper,
}

impl ProcessorKind {
    pub const ALL: &'static [ProcessorKind] = &[
        ProcessorKind::Pitch,
        ProcessorKind::Force,
        ProcessorKind::EnvGen,
        ProcessorKind::Sample,
        ProcessorKind::Additive,
        ProcessorKind::KarplusStrong,
        ProcessorKind::PadSynth,
        ProcessorKind::Filter,
        ProcessorKind::Volume,
        ProcessorKind::Panning,
        ProcessorKind::RingMod,
        ProcessorKind::BitCrusher,
        ProcessorKind::GainComp,
        ProcessorKind::RangeMap,
        ProcessorKind::Slope,
        ProcessorKind::Delay,
        ProcessorKind::Freeverb,
        ProcessorKind::Compress,
        ProcessorKind::Looper,
    ];

    /// Manifest name of the type.
    pub fn name(self) -> &'static str {
        match self {
            ProcessorKind::Pitch => "pitch",
            ProcessorKind::Force => "force",
            ProcessorKind::EnvGen => "envgen",
            ProcessorKind::Sample => "sample",
            ProcessorKind::Additive => "add",
            ProcessorKind::KarplusStrong => "ks",
            ProcessorKind::PadSynth => "padsynth",
            ProcessorKind::Filter => "filter",
            ProcessorKind::Volume => "volume",
            ProcessorKind::Panning => "panning",
            ProcessorKind::RingMod => "ringmod",
            ProcessorKind::BitCrusher => "bitcrusher",
            ProcessorKind::GainComp => "gaincomp",
            ProcessorKind::RangeMap => "rangemap",
            ProcessorKind::Slope => "slope",
            ProcessorKind::Delay => "delay",
            ProcessorKind::Freeverb => "freeverb",
            ProcessorKind::Compress => "compress",
            ProcessorKind::Looper => "looper",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn ports(self) -> PortTable {
        let (inputs, outputs) = match self {
            ProcessorKind::Pitch => (NONE, PITCH),
            ProcessorKind::Force => (NONE, FORCE),
            ProcessorKind::EnvGen => (FORCE, CONTROL),
            ProcessorKind::Sample | ProcessorKind::Additive | ProcessorKind::PadSynth => {
                (GENERATOR_IN, STEREO)
            }
            ProcessorKind::KarplusStrong => (KS_IN, STEREO),
            ProcessorKind::Filter | ProcessorKind::BitCrusher => (STEREO_CC, STEREO),
            ProcessorKind::Volume => (STEREO_F, STEREO),
            ProcessorKind::Panning | ProcessorKind::Delay => (STEREO_C, STEREO),
            ProcessorKind::RingMod => (QUAD, STEREO),
            ProcessorKind::GainComp
            | ProcessorKind::Freeverb
            | ProcessorKind::Compress
            | ProcessorKind::Looper => (STEREO, STEREO),
            ProcessorKind::RangeMap | ProcessorKind::Slope => (CONTROL, CONTROL),
        };
        PortTable { inputs, outputs }
    }

    /// Supported signal types; the first is the default.
    pub fn signal_types(self) -> &'static [SignalType] {
        match self {
            ProcessorKind::Pitch
            | ProcessorKind::Force
            | ProcessorKind::EnvGen
            | ProcessorKind::Sample
            | ProcessorKind::Additive
            | ProcessorKind::KarplusStrong
            | ProcessorKind::PadSynth => VOICE,
            ProcessorKind::Filter
            | ProcessorKind::Volume
            | ProcessorKind::Panning
            | ProcessorKind::RingMod
            | ProcessorKind::BitCrusher
            | ProcessorKind::GainComp
            | ProcessorKind::RangeMap
            | ProcessorKind::Slope => EITHER,
            ProcessorKind::Delay
            | ProcessorKind::Freeverb
            | ProcessorKind::Compress
            | ProcessorKind::Looper => MIXED,
        }
    }

    pub fn default_signal_type(self) -> SignalType {
        self.signal_types()[0]
    }

    pub fn supports(self, signal: SignalType) -> bool {
        self.signal_types().contains(&signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for &kind in ProcessorKind::ALL {
            assert_eq!(ProcessorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProcessorKind::from_name("chorus"), None);
    }

    #[test]
    fn generators_take_pitch_and_force() {
        let ports = ProcessorKind::Sample.ports();
        assert_eq!(ports.inputs, &[PortKind::Pitch, PortKind::Force]);
        assert_eq!(ports.outputs, &[PortKind::Audio, PortKind::Audio]);
        assert_eq!(ProcessorKind::KarplusStrong.ports().inputs[2], PortKind::Audio);
    }

    #[test]
    fn port_counts_stay_within_limit() {
        for &kind in ProcessorKind::ALL {
            let ports = kind.ports();
            assert!(ports.inputs.len() <= PORTS_MAX);
            assert!(ports.outputs.len() <= PORTS_MAX);
            assert!(!kind.signal_types().is_empty());
        }
    }

    #[test]
    fn mixed_only_types_default_to_mixed() {
        assert_eq!(ProcessorKind::Delay.default_signal_type(), SignalType::Mixed);
        assert!(!ProcessorKind::Freeverb.supports(SignalType::Voice));
        assert_eq!(ProcessorKind::Filter.default_signal_type(), SignalType::Voice);
        assert!(ProcessorKind::Filter.supports(SignalType::Mixed));
    }
}
