//! Event taxonomy for trigger columns, live input and bindings.
//!
//! Every event is a closed `EventKind` plus a typed `EventArg`. Names and
//! short strings are stored inline (`ArrayString`), so events are `Copy`
//! and can move through the render path without touching the heap.

use arrayvec::ArrayString;

use crate::error::FormatError;
use crate::pattern::PatInstRef;
use crate::timestamp::Timestamp;

/// Maximum length of an identifier (variable, expression or control name).
pub const NAME_CAPACITY: usize = 32;

/// Maximum length of a free-form string argument.
pub const TEXT_CAPACITY: usize = 64;

/// An identifier: `[a-z_][a-z0-9_]*`, at most `NAME_CAPACITY` bytes.
pub type Name = ArrayString<NAME_CAPACITY>;

/// A short free-form string.
pub type Text = ArrayString<TEXT_CAPACITY>;

/// Parse an identifier, or `None` if it is empty, too long or has
/// characters outside `[a-z0-9_]`.
pub fn parse_name(s: &str) -> Option<Name> {
    let mut chars = s.chars();
    let first = chars.next()?;
    if !(first.is_ascii_lowercase() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return None;
    }
    ArrayString::from(s).ok()
}

/// Where an event is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTarget {
    /// Global playback state (tempo, volume, jumps, global variables).
    Global,
    /// Per-channel state and voices.
    Channel,
    /// Processors of the channel's current audio unit.
    Device,
    /// No runtime effect (comments).
    None,
}

/// Argument type accepted by an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    None,
    Bool,
    Int,
    Float,
    Timestamp,
    Name,
    /// A name or null.
    OptName,
    Text,
    /// Any variable value: bool, int, float or timestamp.
    Value,
    PatInst,
}

macro_rules! event_kinds {
    ($( $variant:ident => $name:literal, $target:ident, $arg:ident; )*) => {
        /// The closed set of event names.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $( $variant, )*
        }

        impl EventKind {
            /// Every event kind, in declaration order.
            pub const ALL: &'static [EventKind] = &[ $( EventKind::$variant, )* ];

            /// Wire name of the event.
            pub fn name(self) -> &'static str {
                match self {
                    $( EventKind::$variant => $name, )*
                }
            }

            /// Look up an event by its wire name.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(EventKind::$variant), )*
                    _ => None,
                }
            }

            /// Where the event is routed.
            pub fn target(self) -> EventTarget {
                match self {
                    $( EventKind::$variant => EventTarget::$target, )*
                }
            }

            /// The argument type the event expects.
            pub fn arg_type(self) -> ArgType {
                match self {
                    $( EventKind::$variant => ArgType::$arg, )*
                }
            }
        }
    };
}

event_kinds! {
    Comment => "#", None, Text;
    If => "?if", Channel, Bool;
    Else => "?else", Channel, None;
    EndIf => "?end", Channel, None;
    VarName => ".vn", Channel, Name;
    SetGlobalVar => ".v", Global, Value;
    SetLocalVar => ".lv", Channel, Value;
    Tempo => "mt", Global, Float;
    TempoSlide => "m/t", Global, Float;
    TempoSlideLength => "m/=t", Global, Timestamp;
    GlobalVolume => "msv", Global, Float;
    VolumeSlide => "m/v", Global, Float;
    VolumeSlideLength => "m/=v", Global, Timestamp;
    JumpCounter => "m.jc", Global, Int;
    JumpPattern => "m.jp", Global, PatInst;
    JumpRow => "m.jr", Global, Timestamp;
    Jump => "mj", Global, None;
    AudioUnit => ".a", Channel, Int;
    Expression => ".x", Channel, OptName;
    NoteOn => "n+", Channel, Float;
    Hit => "h", Channel, Int;
    NoteOff => "n-", Channel, None;
    ChannelVolume => "cv", Channel, Float;
    Force => ".f", Channel, Float;
    ForceSlide => "/f", Channel, Float;
    ForceSlideLength => "/=f", Channel, Timestamp;
    PitchSlide => "/p", Channel, Float;
    PitchSlideLength => "/=p", Channel, Timestamp;
    ControlName => ".cn", Device, Name;
    Control => ".c", Device, Float;
    ControlSlide => "/c", Device, Float;
    ControlSlideLength => "/=c", Device, Timestamp;
}

impl EventKind {
    /// Events that start or stop voices; skipped while seeking.
    pub fn is_voice_event(self) -> bool {
        matches!(self, EventKind::NoteOn | EventKind::Hit | EventKind::NoteOff)
    }

    /// Condition-block events, which are evaluated even inside a false block.
    pub fn is_control_flow(self) -> bool {
        matches!(self, EventKind::If | EventKind::Else | EventKind::EndIf)
    }
}

/// A variable value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(Timestamp),
}

impl VarValue {
    /// Convert to the argument an event of type `ty` expects, if compatible.
    /// Ints widen to floats; integral floats narrow to ints; numbers are
    /// truthy when non-zero.
    pub fn coerce(self, ty: ArgType) -> Option<EventArg> {
        match (ty, self) {
            (ArgType::Value, v) => Some(EventArg::from(v)),
            (ArgType::Bool, VarValue::Bool(b)) => Some(EventArg::Bool(b)),
            (ArgType::Bool, VarValue::Int(i)) => Some(EventArg::Bool(i != 0)),
            (ArgType::Bool, VarValue::Float(f)) => Some(EventArg::Bool(f != 0.0)),
            (ArgType::Int, VarValue::Int(i)) => Some(EventArg::Int(i)),
            (ArgType::Int, VarValue::Float(f)) if libm::trunc(f) == f => {
                Some(EventArg::Int(f as i64))
            }
            (ArgType::Float, VarValue::Int(i)) => Some(EventArg::Float(i as f64)),
            (ArgType::Float, VarValue::Float(f)) => Some(EventArg::Float(f)),
            (ArgType::Timestamp, VarValue::Timestamp(t)) => Some(EventArg::Timestamp(t)),
            _ => None,
        }
    }
}

impl From<VarValue> for EventArg {
    fn from(v: VarValue) -> Self {
        match v {
            VarValue::Bool(b) => EventArg::Bool(b),
            VarValue::Int(i) => EventArg::Int(i),
            VarValue::Float(f) => EventArg::Float(f),
            VarValue::Timestamp(t) => EventArg::Timestamp(t),
        }
    }
}

/// An event argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventArg {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(Timestamp),
    Name(Name),
    Text(Text),
    PatInst(PatInstRef),
    /// `"$name"`: read a variable when the event is dispatched.
    VarRef(Name),
    /// `"$"` in a binding target: reuse the source event's argument.
    PassThrough,
}

impl EventArg {
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            EventArg::Float(f) => Some(f),
            EventArg::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            EventArg::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            EventArg::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match *self {
            EventArg::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            EventArg::Name(n) => Some(n),
            _ => None,
        }
    }

    /// The argument as a variable value, if it is one.
    pub fn to_value(&self) -> Option<VarValue> {
        match *self {
            EventArg::Bool(b) => Some(VarValue::Bool(b)),
            EventArg::Int(i) => Some(VarValue::Int(i)),
            EventArg::Float(f) => Some(VarValue::Float(f)),
            EventArg::Timestamp(t) => Some(VarValue::Timestamp(t)),
            _ => None,
        }
    }

    /// True if this argument is acceptable for `ty` before variable
    /// resolution. References are accepted wherever a value is expected.
    pub fn conforms_to(&self, ty: ArgType) -> bool {
        match (ty, self) {
            (_, EventArg::PassThrough) => ty != ArgType::None,
            (ArgType::Name | ArgType::OptName | ArgType::Text | ArgType::None, EventArg::VarRef(_)) => {
                false
            }
            (_, EventArg::VarRef(_)) => true,
            (ArgType::None, EventArg::None) => true,
            (ArgType::Bool, EventArg::Bool(_)) => true,
            (ArgType::Int, EventArg::Int(_)) => true,
            (ArgType::Float, EventArg::Float(_) | EventArg::Int(_)) => true,
            (ArgType::Timestamp, EventArg::Timestamp(_)) => true,
            (ArgType::Name, EventArg::Name(_)) => true,
            (ArgType::OptName, EventArg::Name(_) | EventArg::None) => true,
            (ArgType::Text, EventArg::Text(_)) => true,
            (
                ArgType::Value,
                EventArg::Bool(_) | EventArg::Int(_) | EventArg::Float(_) | EventArg::Timestamp(_),
            ) => true,
            (ArgType::PatInst, EventArg::PatInst(_)) => true,
            _ => false,
        }
    }
}

/// A named instruction with its argument.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub arg: EventArg,
}

impl Event {
    /// Create an event, checking the argument against the event's type.
    pub fn new(kind: EventKind, arg: EventArg) -> Result<Self, FormatError> {
        if !arg.conforms_to(kind.arg_type()) {
            return Err(FormatError::EventArgument {
                event: kind.name().into(),
                reason: alloc::format!("expected {:?}", kind.arg_type()),
            });
        }
        Ok(Self { kind, arg })
    }

    /// Create an event without a type check (for trusted callers).
    pub const fn raw(kind: EventKind, arg: EventArg) -> Self {
        Self { kind, arg }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_lookup() {
        for &kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("n+"), Some(EventKind::NoteOn));
        assert_eq!(EventKind::from_name("bogus"), None);
    }

    #[test]
    fn names_are_unique() {
        for (i, a) in EventKind::ALL.iter().enumerate() {
            for b in &EventKind::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }

    #[test]
    fn parse_name_accepts_identifiers_only() {
        assert!(parse_name("cutoff").is_some());
        assert!(parse_name("_x1").is_some());
        assert!(parse_name("").is_none());
        assert!(parse_name("1abc").is_none());
        assert!(parse_name("Upper").is_none());
        assert!(parse_name("with space").is_none());
        assert!(parse_name(&"a".repeat(NAME_CAPACITY + 1)).is_none());
    }

    #[test]
    fn note_on_accepts_int_and_float() {
        assert!(Event::new(EventKind::NoteOn, EventArg::Float(-1200.0)).is_ok());
        assert!(Event::new(EventKind::NoteOn, EventArg::Int(0)).is_ok());
        assert!(Event::new(EventKind::NoteOn, EventArg::None).is_err());
    }

    #[test]
    fn var_refs_allowed_for_values_but_not_names() {
        let r = EventArg::VarRef(parse_name("x").unwrap());
        assert!(r.conforms_to(ArgType::Float));
        assert!(r.conforms_to(ArgType::Bool));
        assert!(!r.conforms_to(ArgType::Name));
        assert!(!r.conforms_to(ArgType::None));
    }

    #[test]
    fn coerce_widens_and_narrows() {
        assert_eq!(VarValue::Int(3).coerce(ArgType::Float), Some(EventArg::Float(3.0)));
        assert_eq!(VarValue::Float(2.0).coerce(ArgType::Int), Some(EventArg::Int(2)));
        assert_eq!(VarValue::Float(2.5).coerce(ArgType::Int), None);
        assert_eq!(VarValue::Int(0).coerce(ArgType::Bool), Some(EventArg::Bool(false)));
        assert_eq!(VarValue::Bool(true).coerce(ArgType::Timestamp), None);
    }

    #[test]
    fn voice_events_are_flagged() {
        assert!(EventKind::NoteOn.is_voice_event());
        assert!(EventKind::Hit.is_voice_event());
        assert!(EventKind::NoteOff.is_voice_event());
        assert!(!EventKind::Tempo.is_voice_event());
        assert_eq!(EventKind::Tempo.target(), EventTarget::Global);
        assert_eq!(EventKind::Control.target(), EventTarget::Device);
    }
}
