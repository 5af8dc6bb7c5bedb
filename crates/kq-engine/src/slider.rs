//! Linear parameter slides updated on a fixed frame grid.

/// A value that moves linearly to a target over a number of frames.
///
/// The value only changes at grid points (every `step` frames from the
/// slide's start, plus the final frame), so it does not depend on how
/// rendering is sliced between those points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Slider {
    from: f64,
    target: f64,
    length: u64,
    elapsed: u64,
    step: u32,
}

impl Slider {
    /// A slider resting at `value`.
    pub fn new(value: f64) -> Self {
        Self {
            from: value,
            target: value,
            length: 0,
            elapsed: 0,
            step: 1,
        }
    }

    /// Jump to `value`, cancelling any slide.
    pub fn set(&mut self, value: f64) {
        *self = Self::new(value);
    }

    /// Start sliding from the current value to `target` over `frames`.
    pub fn start(&mut self, target: f64, frames: u64, step: u32) {
        if frames == 0 {
            self.set(target);
            return;
        }
        self.from = self.value();
        self.target = target;
        self.length = frames;
        self.elapsed = 0;
        self.step = step.max(1);
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        if self.elapsed >= self.length {
            return self.target;
        }
        let grid = self.elapsed - self.elapsed % self.step as u64;
        self.from + (self.target - self.from) * (grid as f64 / self.length as f64)
    }

    /// Value the slide ends at.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.elapsed < self.length
    }

    /// Frames until the value next changes, if sliding.
    pub fn frames_to_update(&self) -> Option<u64> {
        if !self.is_active() {
            return None;
        }
        let to_grid = self.step as u64 - self.elapsed % self.step as u64;
        Some(to_grid.min(self.length - self.elapsed))
    }

    pub fn advance(&mut self, frames: u64) {
        self.elapsed = self.elapsed.saturating_add(frames).min(self.length);
    }
}

impl Default for Slider {
    fn default() -> Self {
        Self::new(0.0)
    }
}
