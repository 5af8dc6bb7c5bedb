//! Sample playback with note and hit maps.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use kq_ir::{nearest_note, HitMapEntry, NoteMapEntry, ProcessorKind, ProcessorSpec, Sample, SampleChoice};

use crate::frequency::{db_to_scale, playback_increment};
use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

const DEFAULT_CHOICE: SampleChoice = SampleChoice {
    sample: 0,
    cents_offset: 0.0,
    volume_db: 0.0,
};

pub struct SampleProc {
    note_map: Vec<NoteMapEntry>,
    hit_map: Vec<HitMapEntry>,
    samples: BTreeMap<usize, Sample>,
}

#[derive(Clone, Debug, Default)]
pub struct SampleVoice {
    sample: usize,
    cents_offset: f64,
    gain: f64,
    /// Read position in source frames.
    pos: f64,
    /// False while a ping-pong loop runs backwards.
    backwards: bool,
    done: bool,
}

impl SampleProc {
    pub fn new(spec: &ProcessorSpec) -> Self {
        Self {
            note_map: spec.note_map.clone(),
            hit_map: spec.hit_map.clone(),
            samples: spec.samples.clone(),
        }
    }

    fn choices(&self, note: &NoteStart) -> &[SampleChoice] {
        if let Some(hit) = note.hit {
            return self
                .hit_map
                .iter()
                .find(|e| e.hit == hit)
                .map_or(&[], |e| e.choices.as_slice());
        }
        if self.note_map.is_empty() {
            return core::slice::from_ref(&DEFAULT_CHOICE);
        }
        nearest_note(&self.note_map, note.pitch).map_or(&[], |e| e.choices.as_slice())
    }
}

/// Move `pos` by `inc` frames honouring the sample's loop mode. Returns
/// false once a one-shot sample has run out.
fn step(sample: &Sample, st: &mut SampleVoice, inc: f64) -> bool {
    match sample.loop_range() {
        None => {
            st.pos += inc;
            st.pos < sample.len() as f64
        }
        Some((start, end)) => {
            let (start, end) = (start as f64, end as f64);
            let width = end - start;
            if sample.header.loop_mode == kq_ir::LoopMode::Bidirectional {
                if st.backwards {
                    st.pos -= inc;
                    if st.pos < start {
                        st.pos = (start + (start - st.pos)).min(end);
                        st.backwards = false;
                    }
                } else {
                    st.pos += inc;
                    if st.pos >= end {
                        st.pos = (end - (st.pos - end)).max(start);
                        st.backwards = true;
                    }
                }
            } else {
                st.pos += inc;
                if st.pos >= end {
                    st.pos = start + libm::fmod(st.pos - end, width);
                }
            }
            true
        }
    }
}

impl Processor for SampleProc {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Sample
    }

    fn allocate_state(&self, note: &NoteStart) -> VoiceState {
        let choices = self.choices(note);
        if choices.is_empty() {
            return VoiceState::Sample(SampleVoice {
                done: true,
                ..SampleVoice::default()
            });
        }
        let mut rng = fastrand::Rng::with_seed(note.seed);
        let choice = choices[rng.usize(..choices.len())];
        VoiceState::Sample(SampleVoice {
            sample: choice.sample,
            cents_offset: choice.cents_offset,
            gain: db_to_scale(choice.volume_db),
            pos: 0.0,
            backwards: false,
            done: false,
        })
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        let VoiceState::Sample(st) = state else {
            io.clear_outputs();
            return VoiceStatus::Finished;
        };
        let sample = match self.samples.get(&st.sample) {
            Some(s) if !st.done && !s.is_empty() => s,
            _ => {
                io.clear_outputs();
                return VoiceStatus::Finished;
            }
        };
        let pitch_in = io.input(0);
        let force_in = io.input(1);
        let base_freq = sample.base_freq();
        for i in 0..io.frames() {
            if st.done {
                io.output(0)[i] = 0.0;
                io.output(1)[i] = 0.0;
                continue;
            }
            let pitch = pitch_in.map_or(ctx.pitch, |p| p[i] as f64);
            let force = force_in.map_or(ctx.force, |f| f[i] as f64);
            let gain = (st.gain * db_to_scale(force)) as f32;
            io.output(0)[i] = sample.pcm.interpolated(0, st.pos) * gain;
            io.output(1)[i] = sample.pcm.interpolated(1, st.pos) * gain;
            let inc = playback_increment(base_freq, pitch, st.cents_offset, ctx.audio_rate);
            if !step(sample, st, inc) {
                st.done = true;
            }
        }
        if st.done {
            VoiceStatus::Finished
        } else {
            VoiceStatus::Active
        }
    }
}
