//! Runtime evaluator for breakpoint envelopes.

use kq_ir::warp;
use kq_ir::Envelope;

/// Playback position within an `Envelope` whose x axis is seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvelopeState {
    /// Current x position.
    x: f64,
    /// One-shot envelope passed its last node.
    finished: bool,
}

impl EnvelopeState {
    /// Create a state at the first node.
    pub fn new(envelope: &Envelope) -> Self {
        Self {
            x: envelope.first_x(),
            finished: false,
        }
    }

    /// Output value at the current position.
    pub fn value(&self, envelope: &Envelope) -> f64 {
        envelope.value_at(self.x)
    }

    pub fn position(&self) -> f64 {
        self.x
    }

    /// Whether the envelope has passed its last node.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance by `dx`. While `looping` is set and the envelope has loop
    /// marks, the position wraps inside the loop instead of running out.
    pub fn advance(&mut self, envelope: &Envelope, dx: f64, looping: bool) {
        if self.finished {
            return;
        }
        self.x += dx;
        if looping {
            if let Some((start, end)) = envelope.loop_range() {
                self.x = warp::loop_x(self.x, start, end);
                return;
            }
        }
        if self.x >= envelope.last_x() {
            self.x = envelope.last_x();
            self.finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn decay() -> Envelope {
        Envelope::new(vec![(0.0, 1.0), (1.0, 0.5), (2.0, 0.0)], vec![0, 1], false).unwrap()
    }

    #[test]
    fn starts_at_first_node() {
        let env = decay();
        let st = EnvelopeState::new(&env);
        assert_eq!(st.value(&env), 1.0);
        assert!(!st.is_finished());
    }

    #[test]
    fn one_shot_finishes_at_last_node() {
        let env = decay();
        let mut st = EnvelopeState::new(&env);
        st.advance(&env, 0.5, false);
        assert!((st.value(&env) - 0.75).abs() < 1e-12);
        st.advance(&env, 2.0, false);
        assert!(st.is_finished());
        assert_eq!(st.value(&env), 0.0);
        assert_eq!(st.position(), 2.0);
    }

    #[test]
    fn looping_wraps_between_marks() {
        let env = decay();
        let mut st = EnvelopeState::new(&env);
        st.advance(&env, 1.25, true);
        assert!((st.position() - 0.25).abs() < 1e-12);
        assert!(!st.is_finished());
    }

    #[test]
    fn looping_without_marks_runs_out() {
        let env = Envelope::new(vec![(0.0, 1.0), (1.0, 0.0)], vec![], false).unwrap();
        let mut st = EnvelopeState::new(&env);
        st.advance(&env, 3.0, true);
        assert!(st.is_finished());
    }
}
