//! Ring modulator: multiplies two stereo inputs.

use kq_ir::{Params, ProcessorKind};

use crate::processor::{PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct RingMod;

impl RingMod {
    pub fn new(_params: &Params) -> Self {
        RingMod
    }

    fn run(&self, io: &mut PortIo<'_>) {
        for ch in 0..2 {
            let a = io.input(ch);
            let b = io.input(ch + 2);
            let out = io.output(ch);
            match (a, b) {
                (Some(a), Some(b)) => {
                    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
                        *o = x * y;
                    }
                }
                _ => out.fill(0.0),
            }
        }
    }
}

impl Processor for RingMod {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::RingMod
    }

    fn process_voice(
        &self,
        _state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        _ctx: &VoiceContext,
    ) -> VoiceStatus {
        self.run(io);
        VoiceStatus::Active
    }

    fn process_signal(&mut self, io: &mut PortIo<'_>, _audio_rate: u32) {
        self.run(io);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::AudioBuffer;

    #[test]
    fn multiplies_matching_channels() {
        let mut inputs = AudioBuffer::new(4, 2);
        inputs.channel_mut(0).copy_from_slice(&[1.0, -2.0]);
        inputs.channel_mut(2).copy_from_slice(&[0.5, 0.5]);
        inputs.channel_mut(1).fill(1.0);
        let mut outputs = AudioBuffer::new(2, 2);
        outputs.channel_mut(1).fill(7.0);
        let mut io = PortIo::new(&inputs, 0b0111, &mut outputs, 2);
        RingMod.process_signal(&mut io, 48000);
        assert_eq!(outputs.channel(0), &[0.5, -1.0]);
        // Right modulator is unconnected.
        assert_eq!(outputs.channel(1), &[0.0, 0.0]);
    }
}
