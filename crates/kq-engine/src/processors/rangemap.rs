//! Linear range mapping of a control signal.

use kq_ir::warp;
use kq_ir::{Params, ProcessorKind};

use crate::processor::{PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};

pub struct RangeMap {
    from_min: f64,
    from_max: f64,
    min_to: f64,
    max_to: f64,
    clamp_min: bool,
    clamp_max: bool,
}

impl RangeMap {
    pub fn new(params: &Params) -> Self {
        Self {
            from_min: params.float("from_min", 0.0),
            from_max: params.float("from_max", 1.0),
            min_to: params.float("min_to", 0.0),
            max_to: params.float("max_to", 1.0),
            clamp_min: params.bool("clamp_dest_min", false),
            clamp_max: params.bool("clamp_dest_max", false),
        }
    }

    pub fn map(&self, x: f64) -> f64 {
        let mut y = warp::map_range(x, self.from_min, self.from_max, self.min_to, self.max_to);
        let (lo, hi) = if self.min_to <= self.max_to {
            (self.min_to, self.max_to)
        } else {
            (self.max_to, self.min_to)
        };
        if self.clamp_min {
            y = y.max(lo);
        }
        if self.clamp_max {
            y = y.min(hi);
        }
        y
    }

    fn run(&self, io: &mut PortIo<'_>) {
        let input = io.input(0);
        for (i, out) in io.output(0).iter_mut().enumerate() {
            *out = self.map(input.map_or(0.0, |s| s[i] as f64)) as f32;
        }
    }
}

impl Processor for RangeMap {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::RangeMap
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
        match name {
            "from_min" => self.from_min = value,
            "from_max" => self.from_max = value,
            "min_to" => self.min_to = value,
            "max_to" => self.max_to = value,
            _ => return false,
        }
        true
    }
}
