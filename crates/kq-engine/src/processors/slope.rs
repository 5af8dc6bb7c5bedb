//! Rate of change of a control signal.

use kq_ir::{Params, ProcessorKind};

use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct Slope {
    range: f64,
    smoothing: f64,
    mixed: SlopeState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SlopeState {
    prev: Option<f64>,
    smoothed: f64,
}

impl Slope {
    pub fn new(params: &Params) -> Self {
        Self {
            range: params.float("range", 1.0),
            smoothing: params.float("smoothing", 0.0).max(0.0),
            mixed: SlopeState::default(),
        }
    }

    fn run(&self, st: &mut SlopeState, io: &mut PortIo<'_>, audio_rate: u32) {
        let rate = audio_rate.max(1) as f64;
        let input = io.input(0);
        let range = if self.range == 0.0 { 1.0 } else { self.range };
        // One-pole smoothing coefficient for the configured time.
        let k = if self.smoothing > 0.0 {
            1.0 - libm::exp(-1.0 / (self.smoothing * rate))
        } else {
            1.0
        };
        for (i, out) in io.output(0).iter_mut().enumerate() {
            let x = input.map_or(0.0, |s| s[i] as f64);
            let slope = match st.prev {
                Some(prev) => (x - prev) * rate / range,
                None => 0.0,
            };
            st.prev = Some(x);
            st.smoothed += k * (slope - st.smoothed);
            *out = st.smoothed as f32;
        }
    }
}

impl Processor for Slope {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Slope
    }

    fn allocate_state(&self, _note: &NoteStart) -> VoiceState {
        VoiceState::Slope(SlopeState::default())
    }

    fn process_voice(
        &self,
        state: &mut VoiceState,
        _scratch: &mut [f32],
        io: &mut PortIo<'_>,
        ctx: &VoiceContext,
    ) -> VoiceStatus {
        match state {
            VoiceState::Slope(st) => self.run(st, io, ctx.audio_rate),
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
            "range" => self.range = value,
            "smoothing" => self.smoothing = value.max(0.0),
            _ => return false,
        }
        true
    }

    fn reset(&mut self) {
        self.mixed = SlopeState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::AudioBuffer;

    #[test]
    fn ramp_has_constant_slope() {
        let mut slope = Slope::new(&Params::new());
        let mut inputs = AudioBuffer::new(1, 4);
        inputs.channel_mut(0).copy_from_slice(&[0.0, 0.5, 1.0, 1.5]);
        let mut outputs = AudioBuffer::new(1, 4);
        let mut io = PortIo::new(&inputs, 1, &mut outputs, 4);
        slope.process_signal(&mut io, 10);
        assert_eq!(outputs.channel(0), &[0.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn state_carries_across_calls() {
        let mut slope = Slope::new(&Params::new());
        let mut inputs = AudioBuffer::new(1, 1);
        let mut outputs = AudioBuffer::new(1, 1);
        inputs.channel_mut(0)[0] = 1.0;
        slope.process_signal(&mut PortIo::new(&inputs, 1, &mut outputs, 1), 1);
        inputs.channel_mut(0)[0] = 3.0;
        slope.process_signal(&mut PortIo::new(&inputs, 1, &mut outputs, 1), 1);
        assert_eq!(outputs.channel(0), &[2.0]);
    }
}
