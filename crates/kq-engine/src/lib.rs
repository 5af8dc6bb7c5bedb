//! Playback engine for the kunquat renderer.
//!
//! Walks the song's order list, dispatches pattern and live events through
//! the binding work-list, runs voice groups and mixed-signal processors
//! through each unit's graph and mixes the result into a stereo buffer.
//! Nothing on the render path allocates once the engine is built.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod bindings;
pub mod channel;
pub mod config;
mod dispatch;
pub mod envelope_state;
pub mod event_queue;
pub mod frequency;
pub mod global;
mod mixer;
pub mod processor;
pub mod processors;
pub mod scheduler;
pub mod slider;
pub mod unit;
pub mod voice;
pub mod voice_pool;

pub use config::EngineConfig;
pub use event_queue::ChannelEvent;
pub use frequency::{cents_to_hz, db_to_scale};
pub use mixer::{
    Engine, AUDIO_RATE_RANGE, BUFFER_SIZE_MAX, DEFAULT_BUFFER_SIZE, OUTPUT_CHANNELS,
};
pub use processor::{Processor, VoiceState};
pub use processors::create_processor;
