//! JSON wire formats of the key templates.
//!
//! Each template has a serde wire struct; `decode` parses the bytes written
//! to a key and converts them into a typed `Value`. Event arguments are
//! parsed here too, since triggers, bindings and live events share them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use kq_ir::song::{CHANNELS, HITS_MAX, INSTANCES_MAX, PATTERNS_MAX, PROCESSORS_MAX, SAMPLES_MAX, SONGS_MAX, UNITS_MAX};
use kq_ir::{
    parse_name, ArgType, Binding, BindingTarget, Bindings, Column, Condition, Edge, Envelope, Event,
    EventArg, EventKind, Expressions, FormatError, GraphLevel, HitMapEntry, LoopMode, Name,
    NoteMapEntry, ParamValue, PatInstRef, ProcessorKind, SampleChoice, SampleHeader, SignalType,
    Tempo, Text, Timestamp, UnitKind, VarValue,
};

use crate::key::{KeyKind, ParamType, Suffix};
use crate::value::Value;
use crate::wav;

/// `[beats, rem]`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimestampWire(pub i64, pub i64);

impl TimestampWire {
    pub fn to_timestamp(self) -> Result<Timestamp, FormatError> {
        Timestamp::from_parts(self.0, self.1).ok_or(FormatError::Timestamp)
    }
}

#[derive(Debug, Deserialize)]
struct UnitManifestWire {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ProcManifestWire {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PatternWire {
    length: TimestampWire,
}

/// `[ts, name, arg]`; the argument may be omitted.
#[derive(Debug, Deserialize)]
struct TriggerWire(TimestampWire, String, #[serde(default)] Json);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExpressionsWire {
    default_note: Option<String>,
    expressions: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeWire {
    nodes: Vec<(f64, f64)>,
    #[serde(default)]
    marks: Vec<usize>,
    #[serde(default)]
    smooth: bool,
}

/// `[sample, cents_offset, volume_db]`.
type ChoiceWire = (usize, f64, f64);

#[derive(Debug, Deserialize)]
struct SampleHeaderWire {
    #[serde(default)]
    freq: Option<f64>,
    #[serde(default = "default_loop_mode")]
    loop_mode: String,
    #[serde(default)]
    loop_start: usize,
    #[serde(default)]
    loop_end: usize,
}

fn default_loop_mode() -> String {
    "off".into()
}

/// `[channel_offset, name, arg]`.
#[derive(Debug, Deserialize)]
struct TargetWire(i32, String, #[serde(default)] Json);

#[derive(Debug, Deserialize)]
struct BindingWire {
    event: String,
    #[serde(default)]
    conditions: Vec<(String, Json)>,
    targets: Vec<TargetWire>,
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FormatError> {
    serde_json::from_slice(bytes).map_err(|e| FormatError::Json(e.to_string()))
}

fn schema(message: impl Into<String>) -> FormatError {
    FormatError::Schema(message.into())
}

fn check_indices(list: &[usize], limit: usize, what: &str) -> Result<(), FormatError> {
    match list.iter().find(|&&i| i >= limit) {
        Some(i) => Err(schema(format!("{} index {} out of range", what, i))),
        None => Ok(()),
    }
}

/// Decode the bytes written to a key.
pub fn decode(kind: &KeyKind, suffix: Suffix, bytes: &[u8]) -> Result<Value, FormatError> {
    match suffix {
        Suffix::Json => decode_json(kind, bytes),
        Suffix::Wav => match kind {
            KeyKind::SampleData { .. } => Ok(Value::Pcm(Arc::new(wav::decode(bytes)?))),
            _ => Ok(Value::Opaque),
        },
        Suffix::WavPack => match kind {
            KeyKind::SampleData { .. } => Err(schema("WavPack data must be supplied decoded")),
            _ => Ok(Value::Opaque),
        },
    }
}

fn decode_json(kind: &KeyKind, bytes: &[u8]) -> Result<Value, FormatError> {
    let value = match kind {
        KeyKind::AlbumManifest
        | KeyKind::SongManifest(_)
        | KeyKind::PatternManifest(_)
        | KeyKind::HitManifest { .. } => {
            parse::<serde_json::Map<String, Json>>(bytes)?;
            Value::Manifest
        }
        KeyKind::AlbumTracks => {
            let tracks: Vec<usize> = parse(bytes)?;
            check_indices(&tracks, SONGS_MAX, "song")?;
            Value::Tracks(tracks)
        }
        KeyKind::SongOrder(_) => {
            let refs: Vec<(usize, usize)> = parse(bytes)?;
            let mut order = Vec::with_capacity(refs.len());
            for (pattern, instance) in refs {
                if pattern >= PATTERNS_MAX || instance >= INSTANCES_MAX {
                    return Err(schema(format!("pattern instance [{}, {}] out of range", pattern, instance)));
                }
                order.push(PatInstRef::new(pattern as u16, instance as u16));
            }
            Value::OrderList(order)
        }
        KeyKind::SongTempo(_) => {
            let bpm: f64 = parse(bytes)?;
            if !(Tempo::MIN_BPM..=Tempo::MAX_BPM).contains(&bpm) {
                return Err(schema(format!("tempo {} out of range", bpm)));
            }
            Value::Tempo(Tempo::from_bpm(bpm))
        }
        KeyKind::SongGlobalVolume(_) => Value::Volume(finite(parse(bytes)?)?),
        KeyKind::PatternDef(_) => {
            let wire: PatternWire = parse(bytes)?;
            Value::PatternLength(wire.length.to_timestamp()?)
        }
        KeyKind::Column { column, .. } => {
            let wire: Vec<TriggerWire> = parse(bytes)?;
            let mut events = Vec::with_capacity(wire.len());
            for TriggerWire(ts, name, arg) in wire {
                events.push((ts.to_timestamp()?, parse_event(&name, &arg, false)?));
            }
            Value::Column(Arc::new(Column::from_events(*column, events)?))
        }
        KeyKind::UnitManifest(_) => {
            let wire: UnitManifestWire = parse(bytes)?;
            Value::UnitManifest(
                UnitKind::from_name(&wire.kind).ok_or(FormatError::UnknownUnitType(wire.kind))?,
            )
        }
        KeyKind::UnitConnections(_) => Value::Connections(parse_edges(bytes, GraphLevel::Unit)?),
        KeyKind::Connections => Value::Connections(parse_edges(bytes, GraphLevel::Top)?),
        KeyKind::UnitExpressions(_) => {
            let wire: ExpressionsWire = parse(bytes)?;
            let mut expressions = Expressions {
                default_note: wire.default_note.as_deref().map(name_arg).transpose()?,
                filters: BTreeMap::new(),
            };
            for (name, excluded) in wire.expressions {
                check_indices(&excluded, PROCESSORS_MAX, "processor")?;
                expressions.filters.insert(name_arg(&name)?, excluded);
            }
            Value::Expressions(expressions)
        }
        KeyKind::HitFilter { .. } => {
            let excluded: Vec<usize> = parse(bytes)?;
            check_indices(&excluded, PROCESSORS_MAX, "processor")?;
            Value::ProcFilter(excluded)
        }
        KeyKind::ProcManifest { .. } => {
            let wire: ProcManifestWire = parse(bytes)?;
            Value::ProcManifest(
                ProcessorKind::from_name(&wire.kind).ok_or(FormatError::UnknownProcessor(wire.kind))?,
            )
        }
        KeyKind::ProcSignalType { .. } => {
            let name: String = parse(bytes)?;
            Value::SignalType(
                SignalType::from_name(&name).ok_or_else(|| schema(format!("unknown signal type {:?}", name)))?,
            )
        }
        KeyKind::Param { ty, .. } => Value::Param(decode_param(*ty, bytes)?),
        KeyKind::NoteMap { .. } => {
            let wire: Vec<(f64, Vec<ChoiceWire>)> = parse(bytes)?;
            let mut map = Vec::with_capacity(wire.len());
            for (cents, choices) in wire {
                map.push(NoteMapEntry {
                    cents: finite(cents)?,
                    choices: sample_choices(choices)?,
                });
            }
            Value::NoteMap(map)
        }
        KeyKind::HitMap { .. } => {
            let wire: Vec<(usize, Vec<ChoiceWire>)> = parse(bytes)?;
            let mut map = Vec::with_capacity(wire.len());
            for (hit, choices) in wire {
                if hit >= HITS_MAX {
                    return Err(schema(format!("hit index {} out of range", hit)));
                }
                map.push(HitMapEntry {
                    hit,
                    choices: sample_choices(choices)?,
                });
            }
            Value::HitMap(map)
        }
        KeyKind::SampleHeader { .. } => {
            let wire: SampleHeaderWire = parse(bytes)?;
            let loop_mode = LoopMode::from_name(&wire.loop_mode)
                .ok_or_else(|| schema(format!("unknown loop mode {:?}", wire.loop_mode)))?;
            if let Some(f) = wire.freq {
                if !(f.is_finite() && f > 0.0) {
                    return Err(schema("sample frequency must be positive"));
                }
            }
            Value::SampleHeader(SampleHeader {
                freq: wire.freq,
                loop_mode,
                loop_start: wire.loop_start,
                loop_end: wire.loop_end,
            })
        }
        KeyKind::SampleData { .. } => return Err(schema("sample data must be WAV or decoded PCM")),
        KeyKind::Bindings => Value::Bindings(decode_bindings(bytes)?),
        KeyKind::ChannelDefaults => {
            let units: Vec<usize> = parse(bytes)?;
            check_indices(&units, UNITS_MAX, "audio unit")?;
            if units.len() > CHANNELS {
                return Err(schema("more channel defaults than channels"));
            }
            Value::ChannelDefaults(units)
        }
        KeyKind::RandomSeed => Value::RandomSeed(parse(bytes)?),
        KeyKind::Unknown => {
            parse::<Json>(bytes)?;
            Value::Opaque
        }
    };
    Ok(value)
}

fn finite(v: f64) -> Result<f64, FormatError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(schema("number must be finite"))
    }
}

fn sample_choices(wire: Vec<ChoiceWire>) -> Result<Vec<SampleChoice>, FormatError> {
    wire.into_iter()
        .map(|(sample, cents_offset, volume_db)| {
            if sample >= SAMPLES_MAX {
                return Err(schema(format!("sample index {} out of range", sample)));
            }
            Ok(SampleChoice {
                sample,
                cents_offset: finite(cents_offset)?,
                volume_db: finite(volume_db)?,
            })
        })
        .collect()
}

fn parse_edges(bytes: &[u8], level: GraphLevel) -> Result<Vec<Edge>, FormatError> {
    let wire: Vec<(String, String)> = parse(bytes)?;
    let mut edges = wire
        .iter()
        .map(|(src, dst)| Edge::parse(src, dst, level))
        .collect::<Result<Vec<_>, _>>()?;
    kq_ir::graph::merge_duplicates(&mut edges);
    Ok(edges)
}

fn decode_param(ty: ParamType, bytes: &[u8]) -> Result<ParamValue, FormatError> {
    let value = match ty {
        ParamType::Bool => ParamValue::Bool(parse(bytes)?),
        ParamType::Int => ParamValue::Int(parse(bytes)?),
        ParamType::Float => ParamValue::Float(finite(parse(bytes)?)?),
        ParamType::Text => ParamValue::Text(parse(bytes)?),
        ParamType::Timestamp => ParamValue::Timestamp(parse::<TimestampWire>(bytes)?.to_timestamp()?),
        ParamType::Envelope => {
            let wire: EnvelopeWire = parse(bytes)?;
            ParamValue::Envelope(Arc::new(Envelope::new(wire.nodes, wire.marks, wire.smooth)?))
        }
        ParamType::NumList => {
            let list: Vec<f64> = parse(bytes)?;
            ParamValue::NumList(list.into_iter().map(finite).collect::<Result<_, _>>()?)
        }
    };
    Ok(value)
}

fn decode_bindings(bytes: &[u8]) -> Result<Bindings, FormatError> {
    let wire: Vec<BindingWire> = parse(bytes)?;
    let mut list = Vec::with_capacity(wire.len());
    for b in wire {
        let source = EventKind::from_name(&b.event).ok_or_else(|| FormatError::UnknownEvent(b.event.clone()))?;
        let mut conditions = Vec::with_capacity(b.conditions.len());
        for (var, value) in &b.conditions {
            let value = var_value(value)
                .ok_or_else(|| schema(format!("condition on {:?} needs a plain value", var)))?;
            conditions.push(Condition {
                var: name_arg(var)?,
                value,
            });
        }
        let mut targets = Vec::with_capacity(b.targets.len());
        for TargetWire(channel_offset, name, arg) in &b.targets {
            targets.push(BindingTarget {
                channel_offset: *channel_offset,
                event: parse_event(name, arg, true)?,
            });
        }
        list.push(Binding {
            source,
            conditions,
            targets,
        });
    }
    Ok(Bindings::new(list))
}

fn name_arg(s: &str) -> Result<Name, FormatError> {
    parse_name(s).ok_or_else(|| schema(format!("invalid name {:?}", s)))
}

/// A JSON bool, number or `[beats, rem]` as a variable value.
pub fn var_value(v: &Json) -> Option<VarValue> {
    match v {
        Json::Bool(b) => Some(VarValue::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Some(VarValue::Int(i)),
            None => n.as_f64().map(VarValue::Float),
        },
        Json::Array(_) => {
            let wire: TimestampWire = serde_json::from_value(v.clone()).ok()?;
            wire.to_timestamp().ok().map(VarValue::Timestamp)
        }
        _ => None,
    }
}

/// Parse `name` and its JSON argument into a checked event.
/// `"$"` (pass the source argument through) is accepted only when
/// `pass_through` is set, as in binding targets.
pub fn parse_event(name: &str, arg: &Json, pass_through: bool) -> Result<Event, FormatError> {
    let kind = EventKind::from_name(name).ok_or_else(|| FormatError::UnknownEvent(name.into()))?;
    let bad = |reason: &str| FormatError::EventArgument {
        event: name.into(),
        reason: reason.into(),
    };
    let ty = kind.arg_type();

    if let Json::String(s) = arg {
        if let Some(var) = s.strip_prefix('$') {
            if !matches!(ty, ArgType::Name | ArgType::OptName | ArgType::Text | ArgType::None) {
                if var.is_empty() {
                    return if pass_through {
                        Ok(Event::raw(kind, EventArg::PassThrough))
                    } else {
                        Err(bad("pass-through outside a binding"))
                    };
                }
                let var = parse_name(var).ok_or_else(|| bad("invalid variable name"))?;
                return Ok(Event::raw(kind, EventArg::VarRef(var)));
            }
        }
    }

    let arg = match (ty, arg) {
        (ArgType::None, Json::Null) => EventArg::None,
        (ArgType::Bool, Json::Bool(b)) => EventArg::Bool(*b),
        (ArgType::Int, Json::Number(n)) => match n.as_i64() {
            Some(i) => EventArg::Int(i),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => EventArg::Int(f as i64),
                _ => return Err(bad("expected an integer")),
            },
        },
        (ArgType::Float, Json::Number(n)) => {
            EventArg::Float(n.as_f64().filter(|f| f.is_finite()).ok_or_else(|| bad("expected a number"))?)
        }
        (ArgType::Timestamp, Json::Array(_)) => EventArg::Timestamp(
            serde_json::from_value::<TimestampWire>(arg.clone())
                .map_err(|_| bad("expected [beats, rem]"))?
                .to_timestamp()?,
        ),
        (ArgType::Name, Json::String(s)) | (ArgType::OptName, Json::String(s)) => {
            EventArg::Name(parse_name(s).ok_or_else(|| bad("invalid name"))?)
        }
        (ArgType::OptName, Json::Null) => EventArg::None,
        (ArgType::Text, Json::String(s)) => EventArg::Text(Text::from(s).map_err(|_| bad("string too long"))?),
        (ArgType::Value, v) => var_value(v).map(EventArg::from).ok_or_else(|| bad("expected a value"))?,
        (ArgType::PatInst, Json::Array(_)) => {
            let (pattern, instance): (u16, u16) =
                serde_json::from_value(arg.clone()).map_err(|_| bad("expected [pattern, instance]"))?;
            if pattern as usize >= PATTERNS_MAX || instance as usize >= INSTANCES_MAX {
                return Err(bad("pattern instance out of range"));
            }
            EventArg::PatInst(PatInstRef::new(pattern, instance))
        }
        _ => return Err(bad(&format!("expected {:?}", ty))),
    };
    Event::new(kind, arg)
}
