//! Gain stage with an optional force input.

use kq_ir::{Params, ProcessorKind};

use crate::frequency::db_to_scale;
use crate::processor::{PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct Volume {
    volume: f64,
}

impl Volume {
    pub fn new(params: &Params) -> Self {
        Self {
            volume: params.float("volume", 0.0),
        }
    }

    fn run(&self, io: &mut PortIo<'_>) {
        let force = io.input(2);
        let base = db_to_scale(self.volume);
        for port in 0..2 {
            let input = io.input(port);
            let out = io.output(port);
            match input {
                Some(src) => {
                    for (i, (o, s)) in out.iter_mut().zip(src).enumerate() {
                        let gain = match force {
                            Some(f) => base * db_to_scale(f[i] as f64),
                            None => base,
                        };
                        *o = s * gain as f32;
                    }
                }
                None => out.fill(0.0),
            }
        }
    }
}

impl Processor for Volume {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Volume
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

    fn set_control(&mut self, name: &str, value: f64) -> bool {
        if name == "volume" {
            self.volume = value;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::AudioBuffer;

    #[test]
    fn applies_volume_and_force() {
        let mut v = Volume::new(&Params::new());
        v.set_control("volume", -6.0206);
        let mut inputs = AudioBuffer::new(3, 4);
        inputs.channel_mut(0).fill(1.0);
        inputs.channel_mut(1).fill(1.0);
        inputs.channel_mut(2).fill(-6.0206);
        let mut outputs = AudioBuffer::new(2, 4);
        let mut io = PortIo::new(&inputs, 0b011, &mut outputs, 4);
        v.process_signal(&mut io, 48000);
        assert!((outputs.channel(0)[0] - 0.5).abs() < 1e-4);
        let mut io = PortIo::new(&inputs, 0b111, &mut outputs, 4);
        v.process_signal(&mut io, 48000);
        assert!((outputs.channel(1)[3] - 0.25).abs() < 1e-4);
    }
}
