//! Audio units (instruments and effects) and their processors.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::envelope::Envelope;
use crate::event::Name;
use crate::graph::{Edge, Endpoint};
use crate::processor::{ProcessorKind, SignalType};
use crate::sample::Sample;
use crate::timestamp::Timestamp;

/// Instrument or effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitKind {
    Instrument,
    Effect,
}

impl UnitKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "instrument" => Some(UnitKind::Instrument),
            "effect" => Some(UnitKind::Effect),
            _ => None,
        }
    }
}

/// A decoded processor parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(Timestamp),
    Envelope(Arc<Envelope>),
    NumList(Vec<f64>),
}

/// Parameters of one processor, keyed by name without the type prefix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str, default: f64) -> f64 {
        match self.values.get(name) {
            Some(ParamValue::Float(f)) => *f,
            Some(ParamValue::Int(i)) => *i as f64,
            _ => default,
        }
    }

    pub fn int(&self, name: &str, default: i64) -> i64 {
        match self.values.get(name) {
            Some(ParamValue::Int(i)) => *i,
            _ => default,
        }
    }

    pub fn bool(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(ParamValue::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn envelope(&self, name: &str) -> Option<&Arc<Envelope>> {
        match self.values.get(name) {
            Some(ParamValue::Envelope(e)) => Some(e),
            _ => None,
        }
    }

    pub fn num_list(&self, name: &str) -> Option<&[f64]> {
        match self.values.get(name) {
            Some(ParamValue::NumList(v)) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// `[sample, cents_offset, volume_db]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleChoice {
    pub sample: usize,
    pub cents_offset: f64,
    pub volume_db: f64,
}

/// Note map entry: samples to pick from near `cents`.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteMapEntry {
    pub cents: f64,
    pub choices: Vec<SampleChoice>,
}

/// Hit map entry: samples to pick from for one hit index.
#[derive(Clone, Debug, PartialEq)]
pub struct HitMapEntry {
    pub hit: usize,
    pub choices: Vec<SampleChoice>,
}

/// Entry whose pitch is nearest to `cents`; ties go to the earlier entry.
pub fn nearest_note(map: &[NoteMapEntry], cents: f64) -> Option<&NoteMapEntry> {
    let mut best: Option<&NoteMapEntry> = None;
    for entry in map {
        let closer = match best {
            Some(b) => libm::fabs(entry.cents - cents) < libm::fabs(b.cents - cents),
            None => true,
        };
        if closer {
            best = Some(entry);
        }
    }
    best
}

/// Decoded processor: type, signal type, parameters and sample data.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessorSpec {
    pub kind: ProcessorKind,
    pub signal_type: SignalType,
    pub params: Params,
    pub note_map: Vec<NoteMapEntry>,
    pub hit_map: Vec<HitMapEntry>,
    pub samples: BTreeMap<usize, Sample>,
}

impl ProcessorSpec {
    pub fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            signal_type: kind.default_signal_type(),
            params: Params::new(),
            note_map: Vec::new(),
            hit_map: Vec::new(),
            samples: BTreeMap::new(),
        }
    }

    pub fn hit_choices(&self, hit: usize) -> Option<&[SampleChoice]> {
        self.hit_map
            .iter()
            .find(|e| e.hit == hit)
            .map(|e| e.choices.as_slice())
    }
}

/// Expression filters of an instrument.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expressions {
    /// Expression applied to notes when the channel has no override.
    pub default_note: Option<Name>,
    /// Excluded processors per expression name.
    pub filters: BTreeMap<Name, Vec<usize>>,
}

/// An instrument or effect with its processor sub-graph.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioUnit {
    pub kind: UnitKind,
    pub processors: BTreeMap<usize, Arc<ProcessorSpec>>,
    pub edges: Vec<Edge>,
    /// Excluded processors per hit index; presence marks the hit as existing.
    pub hits: BTreeMap<usize, Vec<usize>>,
    pub expressions: Expressions,
}

impl AudioUnit {
    pub fn new(kind: UnitKind) -> Self {
        Self {
            kind,
            processors: BTreeMap::new(),
            edges: Vec::new(),
            hits: BTreeMap::new(),
            expressions: Expressions::default(),
        }
    }

    pub fn processor(&self, index: usize) -> Option<&Arc<ProcessorSpec>> {
        self.processors.get(&index)
    }

    /// Number of interface input ports, derived from the edges.
    pub fn in_port_count(&self) -> usize {
        self.edges
            .iter()
            .filter_map(|e| match e.from {
                Endpoint::Interface { port } => Some(port + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Number of interface output ports, derived from the edges.
    pub fn out_port_count(&self) -> usize {
        self.edges
            .iter()
            .filter_map(|e| match e.to {
                Endpoint::Interface { port } => Some(port + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Processors excluded for a note played with `hit` or `expression`.
    pub fn excluded(&self, hit: Option<usize>, expression: Option<&Name>) -> &[usize] {
        if let Some(h) = hit {
            return self.hits.get(&h).map(Vec::as_slice).unwrap_or(&[]);
        }
        let name = expression.or(self.expressions.default_note.as_ref());
        name.and_then(|n| self.expressions.filters.get(n))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
