//! Processor trait and the buffers it works on.

use kq_ir::{AudioBuffer, PortTable, ProcessorKind, Result};

use crate::processors::{
    additive::AddVoice, bitcrusher::CrushState, envgen::EnvGenVoice, filter::FilterState,
    force::ForceVoice, ks::KsVoice, padsynth::PadVoice, pitch::PitchVoice, sample::SampleVoice,
    slope::SlopeState,
};

/// Per-voice state of one processor. Each variant belongs to one
/// processor type; stateless types use `Empty`.
#[derive(Clone, Debug, Default)]
pub enum VoiceState {
    #[default]
    Empty,
    Pitch(PitchVoice),
    Force(ForceVoice),
    EnvGen(EnvGenVoice),
    Sample(SampleVoice),
    Additive(AddVoice),
    Ks(KsVoice),
    PadSynth(PadVoice),
    Filter(FilterState),
    BitCrusher(CrushState),
    Slope(SlopeState),
}

/// Whether a voice keeps sounding after a slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceStatus {
    Active,
    /// The voice is done; its whole group finishes.
    Finished,
}

/// Parameters of a starting note.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteStart {
    /// Pitch in cents.
    pub pitch: f64,
    /// Force in dB.
    pub force: f64,
    /// Hit index for hit notes.
    pub hit: Option<usize>,
    /// Seed for per-note randomness.
    pub seed: u64,
    pub audio_rate: u32,
}

/// Per-slice state a voice processor reads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceContext {
    pub audio_rate: u32,
    /// Current pitch of the note in cents.
    pub pitch: f64,
    /// Current force of the note in dB.
    pub force: f64,
    /// Note-off has been received.
    pub released: bool,
}

/// Input and output ports of one process call.
///
/// Inputs and outputs are planar buffers with one channel per port. Only
/// the first `frames` frames are in use.
pub struct PortIo<'a> {
    inputs: &'a AudioBuffer,
    connected: u32,
    outputs: &'a mut AudioBuffer,
    frames: usize,
}

impl<'a> PortIo<'a> {
    /// `connected` holds one bit per input port that has an incoming edge.
    pub fn new(
        inputs: &'a AudioBuffer,
        connected: u32,
        outputs: &'a mut AudioBuffer,
        frames: usize,
    ) -> Self {
        let mut frames = frames.min(outputs.frames());
        if inputs.channels() > 0 {
            frames = frames.min(inputs.frames());
        }
        Self {
            inputs,
            connected,
            outputs,
            frames,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Input samples of `port`, or `None` if nothing is connected to it.
    pub fn input(&self, port: usize) -> Option<&'a [f32]> {
        let inputs: &'a AudioBuffer = self.inputs;
        if port >= inputs.channels() || self.connected & (1 << port) == 0 {
            return None;
        }
        Some(&inputs.channel(port)[..self.frames])
    }

    /// Output samples of `port`.
    pub fn output(&mut self, port: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.outputs.channel_mut(port)[..frames]
    }

    pub fn output_count(&self) -> usize {
        self.outputs.channels()
    }

    /// Zero every output.
    pub fn clear_outputs(&mut self) {
        self.outputs.silence_range(self.frames);
    }

    /// Copy stereo input ports 0 and 1 to the outputs; missing inputs
    /// become silence.
    pub fn pass_stereo(&mut self) {
        for port in 0..2 {
            let input = self.input(port);
            let out = self.output(port);
            match input {
                Some(src) => out.copy_from_slice(src),
                None => out.fill(0.0),
            }
        }
    }
}

/// A processor instance of one audio unit.
///
/// Voice processors keep their per-note state in a `VoiceState` handed
/// back on every call; mixed processors keep state in `self`.
pub trait Processor: Send {
    fn kind(&self) -> ProcessorKind;

    fn port_info(&self) -> PortTable {
        self.kind().ports()
    }

    /// Prepare rate-dependent state. Never called while rendering.
    fn set_audio_rate(&mut self, _audio_rate: u32) -> Result<()> {
        Ok(())
    }

    /// Frames of per-voice scratch space needed at `audio_rate`.
    fn scratch_len(&self, _audio_rate: u32) -> usize {
        0
    }

    /// State for a new voice of this processor.
    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::Empty
    }

    /// Return a voice's state to the pool.
    fn free_state(&self, state: &mut VoiceState) {
        *state = VoiceState::Empty;
    }

    /// Render one voice. `scratch` is a per-voice buffer for delay lines.
    fn process_voice(
        &self,
        _state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        _ctx: &VoiceContext,
    ) -> VoiceStatus {
        io.clear_outputs();
        VoiceStatus::Active
    }

    /// Render the summed signal of the whole unit.
    fn process_signal(&mut self, io: &mut PortIo<'_>, _audio_rate: u32) {
        io.clear_outputs();
    }

    /// Set a float parameter by name. Returns false for unknown names.
    fn set_control(&mut self, _name: &str, _value: f64) -> bool {
        false
    }

    /// Clear mixed-signal state such as delay lines.
    fn reset(&mut self) {}

    /// True if this processor ends its voice after note-off on its own.
    fn handles_release(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_inputs_are_absent() {
        let mut inputs = AudioBuffer::new(2, 4);
        inputs.channel_mut(1).fill(0.5);
        let mut outputs = AudioBuffer::new(2, 4);
        let io = PortIo::new(&inputs, 0b10, &mut outputs, 3);
        assert!(io.input(0).is_none());
        assert_eq!(io.input(1), Some(&[0.5, 0.5, 0.5][..]));
        assert!(io.input(7).is_none());
    }

    #[test]
    fn pass_stereo_silences_missing_ports() {
        let mut inputs = AudioBuffer::new(2, 2);
        inputs.channel_mut(0).fill(1.0);
        inputs.channel_mut(1).fill(2.0);
        let mut outputs = AudioBuffer::new(2, 2);
        outputs.channel_mut(1).fill(9.0);
        PortIo::new(&inputs, 0b01, &mut outputs, 2).pass_stereo();
        assert_eq!(outputs.channel(0), &[1.0, 1.0]);
        assert_eq!(outputs.channel(1), &[0.0, 0.0]);
    }

    #[test]
    fn frames_are_capped_by_output_size() {
        let inputs = AudioBuffer::new(1, 8);
        let mut outputs = AudioBuffer::new(1, 4);
        let mut io = PortIo::new(&inputs, 1, &mut outputs, 100);
        assert_eq!(io.frames(), 4);
        assert_eq!(io.output(0).len(), 4);
    }
}
