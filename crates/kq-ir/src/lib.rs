//! Core types for the kunquat renderer.
//!
//! This crate defines the decoded composition model (songs, patterns,
//! audio units, processors, bindings), exact musical time, the event
//! taxonomy and the shared error type. The store decodes into these types
//! and the engine consumes them.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod audio_buffer;
mod audio_unit;
mod binding;
pub mod envelope;
pub mod error;
mod event;
pub mod graph;
mod pattern;
mod processor;
mod sample;
pub mod song;
mod timestamp;
pub mod warp;

pub use audio_buffer::AudioBuffer;
pub use audio_unit::{
    nearest_note, AudioUnit, Expressions, HitMapEntry, NoteMapEntry, ParamValue, Params,
    ProcessorSpec, SampleChoice, UnitKind,
};
pub use binding::{Binding, BindingTarget, Bindings, Condition};
pub use envelope::{CurveKind, Envelope};
pub use error::{Error, ErrorKind, FormatError, Result};
pub use event::{
    parse_name, ArgType, Event, EventArg, EventKind, EventTarget, Name, Text, VarValue,
    NAME_CAPACITY, TEXT_CAPACITY,
};
pub use graph::{Edge, Endpoint, GraphLevel};
pub use pattern::{Column, PatInstRef, Pattern, Trigger, COLUMNS_MAX};
pub use processor::{PortKind, PortTable, ProcessorKind, SignalType, PORTS_MAX};
pub use sample::{LoopMode, Pcm, Sample, SampleHeader, DEFAULT_SAMPLE_RATE};
pub use song::{Album, Composition, Song, CHANNELS};
pub use timestamp::{FrameSpan, Tempo, Timestamp, BEAT_DEN};
