//! Breakpoint envelopes.
//!
//! An `Envelope` is a list of `(x, y)` nodes with strictly increasing `x`,
//! interpolated either linearly or smoothly (cubic Hermite through the
//! nodes). Marks are node indices; by convention mark 0 is the loop start
//! and mark 1 the loop end. Evaluation is a pure function of `x`.

use alloc::string::ToString;
use alloc::vec::Vec;

use crate::error::FormatError;

/// Index into `marks` of the loop start node.
pub const MARK_LOOP_START: usize = 0;
/// Index into `marks` of the loop end node.
pub const MARK_LOOP_END: usize = 1;

/// Maximum nodes per envelope.
pub const MAX_NODES: usize = 4096;

/// Interpolation between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurveKind {
    /// Straight line to the next node.
    Linear,
    /// Cubic Hermite with tangents from the neighbouring nodes.
    Smooth,
}

/// Interpolate between two values using `curve` at position `t` (0.0..1.0).
/// `m0` and `m1` are the endpoint tangents scaled to the segment width;
/// they are ignored for linear curves.
pub fn interpolate(curve: CurveKind, from: f64, to: f64, m0: f64, m1: f64, t: f64) -> f64 {
    match curve {
        CurveKind::Linear => from + (to - from) * t,
        CurveKind::Smooth => {
            let t2 = t * t;
            let t3 = t2 * t;
            let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
            let h10 = t3 - 2.0 * t2 + t;
            let h01 = -2.0 * t3 + 3.0 * t2;
            let h11 = t3 - t2;
            h00 * from + h10 * m0 + h01 * to + h11 * m1
        }
    }
}

/// A piecewise curve over `x`.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    nodes: Vec<(f64, f64)>,
    marks: Vec<usize>,
    curve: CurveKind,
}

impl Envelope {
    /// Build and validate an envelope. Needs at least one node, strictly
    /// increasing finite `x` values and marks that index existing nodes.
    pub fn new(nodes: Vec<(f64, f64)>, marks: Vec<usize>, smooth: bool) -> Result<Self, FormatError> {
        if nodes.is_empty() {
            return Err(FormatError::Envelope("no nodes".to_string()));
        }
        if nodes.len() > MAX_NODES {
            return Err(FormatError::Envelope("too many nodes".to_string()));
        }
        if nodes.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(FormatError::Envelope("non-finite node".to_string()));
        }
        if nodes.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(FormatError::Envelope("node x values must increase".to_string()));
        }
        if marks.iter().any(|&m| m >= nodes.len()) {
            return Err(FormatError::Envelope("mark out of range".to_string()));
        }
        let curve = if smooth { CurveKind::Smooth } else { CurveKind::Linear };
        Ok(Self { nodes, marks, curve })
    }

    /// A flat envelope at `y`.
    pub fn constant(y: f64) -> Self {
        Self {
            nodes: alloc::vec![(0.0, y), (1.0, y)],
            marks: Vec::new(),
            curve: CurveKind::Linear,
        }
    }

    pub fn nodes(&self) -> &[(f64, f64)] {
        &self.nodes
    }

    pub fn marks(&self) -> &[usize] {
        &self.marks
    }

    pub fn curve(&self) -> CurveKind {
        self.curve
    }

    pub fn first_x(&self) -> f64 {
        self.nodes[0].0
    }

    pub fn last_x(&self) -> f64 {
        self.nodes[self.nodes.len() - 1].0
    }

    pub fn last_y(&self) -> f64 {
        self.nodes[self.nodes.len() - 1].1
    }

    /// Node index of a mark, if present.
    pub fn mark(&self, which: usize) -> Option<usize> {
        self.marks.get(which).copied()
    }

    /// Loop bounds in `x`, if both loop marks exist and enclose a range.
    pub fn loop_range(&self) -> Option<(f64, f64)> {
        let start = self.mark(MARK_LOOP_START)?;
        let end = self.mark(MARK_LOOP_END)?;
        (start < end).then(|| (self.nodes[start].0, self.nodes[end].0))
    }

    /// Envelope value at `x`. Values outside the node range hold the
    /// nearest endpoint.
    pub fn value_at(&self, x: f64) -> f64 {
        let n = self.nodes.len();
        if x <= self.nodes[0].0 || n == 1 {
            return self.nodes[0].1;
        }
        if x >= self.nodes[n - 1].0 {
            return self.nodes[n - 1].1;
        }
        let i = self.nodes.partition_point(|&(nx, _)| nx <= x) - 1;
        let (x0, y0) = self.nodes[i];
        let (x1, y1) = self.nodes[i + 1];
        let width = x1 - x0;
        let t = (x - x0) / width;
        let (m0, m1) = match self.curve {
            CurveKind::Linear => (0.0, 0.0),
            CurveKind::Smooth => (self.tangent(i) * width, self.tangent(i + 1) * width),
        };
        interpolate(self.curve, y0, y1, m0, m1, t)
    }

    // Catmull-Rom style slope at node `i`, one-sided at the ends.
    fn tangent(&self, i: usize) -> f64 {
        let n = self.nodes.len();
        let (a, b) = match i {
            0 => (0, 1),
            _ if i == n - 1 => (n - 2, n - 1),
            _ => (i - 1, i + 1),
        };
        let (xa, ya) = self.nodes[a];
        let (xb, yb) = self.nodes[b];
        (yb - ya) / (xb - xa)
    }
}
