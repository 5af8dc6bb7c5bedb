//! Decoded store values.

use std::sync::Arc;

use kq_ir::{
    Bindings, Column, Edge, Expressions, HitMapEntry, NoteMapEntry, ParamValue, PatInstRef, Pcm,
    ProcessorKind, SampleHeader, SignalType, Tempo, Timestamp, UnitKind,
};

/// A store entry decoded according to its key template.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// `p_manifest.json` of albums, songs, patterns and hits.
    Manifest,
    UnitManifest(UnitKind),
    ProcManifest(ProcessorKind),
    Tracks(Vec<usize>),
    OrderList(Vec<PatInstRef>),
    Tempo(Tempo),
    /// Global volume in dB.
    Volume(f64),
    PatternLength(Timestamp),
    Column(Arc<Column>),
    Connections(Vec<Edge>),
    Expressions(Expressions),
    /// Excluded processors of a hit.
    ProcFilter(Vec<usize>),
    SignalType(SignalType),
    Param(ParamValue),
    NoteMap(Vec<NoteMapEntry>),
    HitMap(Vec<HitMapEntry>),
    SampleHeader(SampleHeader),
    Pcm(Arc<Pcm>),
    Bindings(Bindings),
    ChannelDefaults(Vec<usize>),
    RandomSeed(u64),
    /// Valid data under a key no template matches.
    Opaque,
}

/// One stored key: the bytes as written (absent for `put_pcm` data) and
/// their decoded form.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub raw: Option<Arc<[u8]>>,
    pub value: Value,
}

impl Entry {
    pub fn new(raw: &[u8], value: Value) -> Self {
        Self {
            raw: Some(Arc::from(raw)),
            value,
        }
    }

    pub fn decoded(value: Value) -> Self {
        Self { raw: None, value }
    }

    /// Decoded PCM, if this entry holds sample data.
    pub fn pcm(&self) -> Option<&Arc<Pcm>> {
        match &self.value {
            Value::Pcm(p) => Some(p),
            _ => None,
        }
    }
}
