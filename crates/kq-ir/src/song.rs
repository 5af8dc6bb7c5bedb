//! Songs, the album and the complete decoded composition.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::audio_unit::AudioUnit;
use crate::binding::Bindings;
use crate::graph::Edge;
use crate::pattern::{PatInstRef, Pattern};
use crate::timestamp::Tempo;

/// Number of channels.
pub const CHANNELS: usize = 64;
pub const SONGS_MAX: usize = 256;
pub const PATTERNS_MAX: usize = 1024;
pub const INSTANCES_MAX: usize = 1024;
pub const UNITS_MAX: usize = 256;
pub const PROCESSORS_MAX: usize = 256;
pub const HITS_MAX: usize = 256;
pub const SAMPLES_MAX: usize = 512;

/// An ordered list of pattern instances with starting tempo and volume.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub order: Vec<PatInstRef>,
    pub tempo: Tempo,
    /// Initial global volume in dB.
    pub global_volume: f64,
}

impl Default for Song {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            tempo: Tempo::default(),
            global_volume: 0.0,
        }
    }
}

impl Song {
    /// Order-list position of a pattern instance.
    pub fn position_of(&self, inst: PatInstRef) -> Option<usize> {
        self.order.iter().position(|&r| r == inst)
    }
}

/// Song indices in play order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Album {
    pub tracks: Vec<usize>,
}

/// A complete, decoded composition.
///
/// Every region is `Arc`-shared so a rebuilt snapshot reuses unchanged
/// parts of the previous one.
#[derive(Clone, Debug, Default)]
pub struct Composition {
    /// `None` when the album has no manifest.
    pub album: Option<Arc<Album>>,
    pub songs: BTreeMap<usize, Arc<Song>>,
    pub patterns: BTreeMap<usize, Arc<Pattern>>,
    pub units: BTreeMap<usize, Arc<AudioUnit>>,
    pub connections: Arc<Vec<Edge>>,
    pub bindings: Arc<Bindings>,
    /// Initial audio unit per channel.
    pub channel_defaults: Arc<Vec<usize>>,
    pub random_seed: u64,
}

impl Composition {
    /// Song index played as album track `track`. Without an album, track
    /// numbers are song indices.
    pub fn track_song(&self, track: usize) -> Option<usize> {
        match &self.album {
            Some(album) => album.tracks.get(track).copied(),
            None => self.songs.contains_key(&track).then_some(track),
        }
    }

    /// The song played as album track `track`.
    pub fn track(&self, track: usize) -> Option<&Arc<Song>> {
        self.songs.get(&self.track_song(track)?)
    }

    pub fn pattern(&self, index: usize) -> Option<&Arc<Pattern>> {
        self.patterns.get(&index)
    }

    pub fn unit(&self, index: usize) -> Option<&Arc<AudioUnit>> {
        self.units.get(&index)
    }

    /// Pattern of an order-list entry.
    pub fn instance_pattern(&self, inst: PatInstRef) -> Option<&Arc<Pattern>> {
        self.patterns.get(&(inst.pattern as usize))
    }

    /// Default audio unit of `channel`, or unit 0.
    pub fn channel_default(&self, channel: usize) -> usize {
        self.channel_defaults.get(channel).copied().unwrap_or(0)
    }
}
