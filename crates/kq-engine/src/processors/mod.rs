//! Built-in processor implementations.

pub mod additive;
pub mod bitcrusher;
pub mod compress;
pub mod delay;
pub mod envgen;
pub mod filter;
pub mod force;
pub mod freeverb;
pub mod gaincomp;
pub mod ks;
pub mod looper;
pub mod padsynth;
pub mod panning;
pub mod pitch;
pub mod rangemap;
pub mod ringmod;
pub mod sample;
pub mod slope;
pub mod volume;

use alloc::boxed::Box;

use kq_ir::{ProcessorKind, ProcessorSpec, Result};

use crate::processor::Processor;

/// Create a processor from its spec and prepare it for `audio_rate`.
pub fn create_processor(spec: &ProcessorSpec, audio_rate: u32) -> Result<Box<dyn Processor>> {
    let p = &spec.params;
    let mut proc: Box<dyn Processor> = match spec.kind {
        ProcessorKind::Pitch => Box::new(pitch::Pitch::new(p)),
        ProcessorKind::Force => Box::new(force::Force::new(p)),
        ProcessorKind::EnvGen => Box::new(envgen::EnvGen::new(p)),
        ProcessorKind::Sample => Box::new(sample::SampleProc::new(spec)),
        ProcessorKind::Additive => Box::new(additive::Additive::new(p)),
        ProcessorKind::KarplusStrong => Box::new(ks::KarplusStrong::new(p)),
        ProcessorKind::PadSynth => Box::new(padsynth::PadSynth::new(p)),
        ProcessorKind::Filter => Box::new(filter::Filter::new(p)),
        ProcessorKind::Volume => Box::new(volume::Volume::new(p)),
        ProcessorKind::Panning => Box::new(panning::Panning::new(p)),
        ProcessorKind::RingMod => Box::new(ringmod::RingMod::new(p)),
        ProcessorKind::BitCrusher => Box::new(bitcrusher::BitCrusher::new(p)),
        ProcessorKind::GainComp => Box::new(gaincomp::GainComp::new(p)),
        ProcessorKind::RangeMap => Box::new(rangemap::RangeMap::new(p)),
        ProcessorKind::Slope => Box::new(slope::Slope::new(p)),
        ProcessorKind::Delay => Box::new(delay::Delay::new(p)),
        ProcessorKind::Freeverb => Box::new(freeverb::Freeverb::new(p)),
        ProcessorKind::Compress => Box::new(compress::Compress::new(p)),
        ProcessorKind::Looper => Box::new(looper::Looper::new(p)),
    };
    proc.set_audio_rate(audio_rate)?;
    Ok(proc)
}
