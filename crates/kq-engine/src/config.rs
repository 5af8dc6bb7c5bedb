//! Engine tunables.

/// Limits and defaults of one engine instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Voice groups that may sound at once before stealing starts.
    pub voice_limit: usize,
    /// Fade applied to a stolen voice group, in milliseconds.
    pub steal_fade_ms: f64,
    /// Maximum nesting of binding expansion.
    pub binding_depth: usize,
    /// Maximum events dispatched at one slice boundary.
    pub events_per_slice: usize,
    /// Entries kept in the dispatched-event log.
    pub event_log_capacity: usize,
    /// Frames between value updates of an active slide.
    pub slide_step: u32,
}

/// Hard cap of `binding_depth`; the work-list is sized for it.
pub const BINDING_DEPTH_MAX: usize = 16;

/// Voice slots held back for fading groups, as a share of the limit.
const FADE_RESERVE_DIVISOR: usize = 4;

impl EngineConfig {
    /// Voice slots kept free for fading groups.
    pub fn fade_reserve(&self) -> usize {
        (self.voice_limit / FADE_RESERVE_DIVISOR).max(1)
    }

    /// Copy with every field forced into its supported range.
    pub fn sanitized(mut self) -> Self {
        self.voice_limit = self.voice_limit.clamp(1, 4096);
        if !self.steal_fade_ms.is_finite() || self.steal_fade_ms < 0.0 {
            self.steal_fade_ms = Self::default().steal_fade_ms;
        }
        self.binding_depth = self.binding_depth.clamp(1, BINDING_DEPTH_MAX);
        self.events_per_slice = self.events_per_slice.max(1);
        self.slide_step = self.slide_step.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voice_limit: 256,
            steal_fade_ms: 2.0,
            binding_depth: BINDING_DEPTH_MAX,
            events_per_slice: 1024,
            event_log_capacity: 4096,
            slide_step: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.voice_limit, 256);
        assert_eq!(cfg.steal_fade_ms, 2.0);
        assert_eq!(cfg.binding_depth, 16);
        assert_eq!(cfg.events_per_slice, 1024);
        assert_eq!(cfg.slide_step, 64);
        assert_eq!(cfg.fade_reserve(), 64);
    }

    #[test]
    fn sanitized_clamps_out_of_range_fields() {
        let cfg = EngineConfig {
            voice_limit: 0,
            steal_fade_ms: f64::NAN,
            binding_depth: 100,
            events_per_slice: 0,
            event_log_capacity: 0,
            slide_step: 0,
        }
        .sanitized();
        assert_eq!(cfg.voice_limit, 1);
        assert_eq!(cfg.steal_fade_ms, 2.0);
        assert_eq!(cfg.binding_depth, BINDING_DEPTH_MAX);
        assert_eq!(cfg.events_per_slice, 1);
        assert_eq!(cfg.slide_step, 1);
        assert_eq!(cfg.fade_reserve(), 1);
    }
}
