//! Decoded read views over the store.
//!
//! Views are caches: each region is rebuilt from store entries when the
//! generation of its tag moves, and `snapshot` assembles a `Composition`
//! sharing every unchanged region with the previous one.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use kq_ir::{
    Album, AudioUnit, Bindings, Composition, Edge, Expressions, Pattern, ProcessorSpec, Sample,
    SampleHeader, Song, Timestamp, UnitKind,
};

use crate::key::{classify, pattern_prefix, proc_prefix, unit_prefix, DirtyTag, KeyKind};
use crate::store::Store;
use crate::value::Value;

/// Length of a pattern without `p_pattern.json`.
pub const DEFAULT_PATTERN_LENGTH: Timestamp = Timestamp::from_beats(16);

#[derive(Clone, Debug)]
struct Cached<T> {
    generation: u64,
    value: T,
}

#[derive(Clone, Debug, Default)]
struct Structure {
    album: Option<Arc<Album>>,
    songs: BTreeMap<usize, Arc<Song>>,
}

#[derive(Clone, Debug, Default)]
struct Globals {
    channel_defaults: Arc<Vec<usize>>,
    random_seed: u64,
}

#[derive(Debug, Default)]
pub struct Views {
    structure: Option<Cached<Structure>>,
    patterns: BTreeMap<usize, Cached<Option<Arc<Pattern>>>>,
    units: BTreeMap<usize, Cached<Option<Arc<AudioUnit>>>>,
    processors: BTreeMap<(usize, usize), Cached<Option<Arc<ProcessorSpec>>>>,
    connections: Option<Cached<Arc<Vec<Edge>>>>,
    bindings: Option<Cached<Arc<Bindings>>>,
    globals: Option<Cached<Globals>>,
    snapshot: Option<Cached<Arc<Composition>>>,
}

/// Return the cached value if its generation is current, else rebuild it.
fn refresh<T>(slot: &mut Option<Cached<T>>, generation: u64, build: impl FnOnce() -> T) -> &T {
    if slot.as_ref().is_some_and(|c| c.generation != generation) {
        *slot = None;
    }
    &slot.get_or_insert_with(|| Cached {
        generation,
        value: build(),
    })
    .value
}

impl Views {
    pub fn new() -> Self {
        Self::default()
    }

    /// Song `index`, if its manifest exists.
    pub fn get_song(&mut self, store: &Store, index: usize) -> Option<Arc<Song>> {
        self.structure(store).songs.get(&index).cloned()
    }

    /// The album, if its manifest exists.
    pub fn get_album(&mut self, store: &Store) -> Option<Arc<Album>> {
        self.structure(store).album.clone()
    }

    /// Pattern `index`, if its manifest exists.
    pub fn get_pattern(&mut self, store: &Store, index: usize) -> Option<Arc<Pattern>> {
        let generation = store.generation(DirtyTag::Pattern(index));
        let slot = self.patterns.entry(index).or_insert(Cached {
            generation: u64::MAX,
            value: None,
        });
        if slot.generation != generation {
            debug!("rebuilding pattern {}", index);
            *slot = Cached {
                generation,
                value: build_pattern(store, index).map(Arc::new),
            };
        }
        slot.value.clone()
    }

    /// Audio unit `index`, if its manifest exists.
    pub fn get_audio_unit(&mut self, store: &Store, index: usize) -> Option<Arc<AudioUnit>> {
        let generation = store
            .generation(DirtyTag::Unit(index))
            .max(store.latest_generation(DirtyTag::Processor(index, 0), DirtyTag::Processor(index, usize::MAX)));
        let current = self.units.get(&index).is_some_and(|c| c.generation == generation);
        if !current {
            debug!("rebuilding audio unit {}", index);
            let unit = self.build_unit(store, index).map(Arc::new);
            self.units.insert(index, Cached { generation, value: unit });
        }
        self.units.get(&index).and_then(|c| c.value.clone())
    }

    /// Processor `proc` of unit `unit`, if its manifest exists.
    pub fn get_processor(&mut self, store: &Store, unit: usize, proc: usize) -> Option<Arc<ProcessorSpec>> {
        let generation = store.generation(DirtyTag::Processor(unit, proc));
        let slot = self.processors.entry((unit, proc)).or_insert(Cached {
            generation: u64::MAX,
            value: None,
        });
        if slot.generation != generation {
            *slot = Cached {
                generation,
                value: build_processor(store, unit, proc).map(Arc::new),
            };
        }
        slot.value.clone()
    }

    /// A complete composition. Regions whose tags have not moved since the
    /// previous snapshot are shared with it.
    pub fn snapshot(&mut self, store: &Store) -> Arc<Composition> {
        if let Some(c) = &self.snapshot {
            if c.generation == store.revision() {
                return c.value.clone();
            }
        }

        let structure = self.structure(store).clone();
        let connections = refresh(&mut self.connections, store.generation(DirtyTag::Connections), || {
            match store.value("p_connections.json") {
                Some(Value::Connections(edges)) => Arc::new(edges.clone()),
                _ => Arc::default(),
            }
        })
        .clone();
        let bindings = refresh(&mut self.bindings, store.generation(DirtyTag::Bindings), || {
            match store.value("p_bind.json") {
                Some(Value::Bindings(b)) => Arc::new(b.clone()),
                _ => Arc::default(),
            }
        })
        .clone();
        let globals = refresh(&mut self.globals, store.generation(DirtyTag::Globals), || Globals {
            channel_defaults: match store.value("p_channel_defaults.json") {
                Some(Value::ChannelDefaults(d)) => Arc::new(d.clone()),
                _ => Arc::default(),
            },
            random_seed: match store.value("p_random_seed.json") {
                Some(Value::RandomSeed(s)) => *s,
                _ => 0,
            },
        })
        .clone();

        let mut patterns = BTreeMap::new();
        for index in manifest_indices(store, "pat_", |k| match k {
            KeyKind::PatternManifest(p) => Some(p),
            _ => None,
        }) {
            if let Some(p) = self.get_pattern(store, index) {
                patterns.insert(index, p);
            }
        }
        let mut units = BTreeMap::new();
        for index in manifest_indices(store, "au_", |k| match k {
            KeyKind::UnitManifest(u) => Some(u),
            _ => None,
        }) {
            if let Some(u) = self.get_audio_unit(store, index) {
                units.insert(index, u);
            }
        }
        self.patterns.retain(|i, _| patterns.contains_key(i));
        self.units.retain(|i, _| units.contains_key(i));

        let composition = Arc::new(Composition {
            album: structure.album,
            songs: structure.songs,
            patterns,
            units,
            connections,
            bindings,
            channel_defaults: globals.channel_defaults,
            random_seed: globals.random_seed,
        });
        debug!("composition snapshot at revision {}", store.revision());
        self.snapshot = Some(Cached {
            generation: store.revision(),
            value: composition.clone(),
        });
        composition
    }

    fn structure(&mut self, store: &Store) -> &Structure {
        refresh(&mut self.structure, store.generation(DirtyTag::Structure), || {
            debug!("rebuilding song structure");
            build_structure(store)
        })
    }

    fn build_unit(&mut self, store: &Store, index: usize) -> Option<AudioUnit> {
        let prefix = unit_prefix(index);
        let kind = match store.value(&format!("{}p_manifest.json", prefix)) {
            Some(Value::UnitManifest(kind)) => *kind,
            _ => return None,
        };
        let mut unit = AudioUnit::new(kind);
        let mut hit_filters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut procs = Vec::new();
        for (key, entry) in store.iter(&prefix) {
            match (classify(key), &entry.value) {
                (KeyKind::UnitConnections(_), Value::Connections(edges)) => unit.edges = edges.clone(),
                (KeyKind::UnitExpressions(_), Value::Expressions(e)) => unit.expressions = e.clone(),
                (KeyKind::HitManifest { hit, .. }, _) => {
                    unit.hits.entry(hit).or_default();
                }
                (KeyKind::HitFilter { hit, .. }, Value::ProcFilter(excluded)) => {
                    hit_filters.insert(hit, excluded.clone());
                }
                (KeyKind::ProcManifest { proc, .. }, _) => procs.push(proc),
                _ => {}
            }
        }
        for (hit, excluded) in hit_filters {
            if let Some(slot) = unit.hits.get_mut(&hit) {
                *slot = excluded;
            }
        }
        if kind == UnitKind::Effect {
            unit.expressions = Expressions::default();
            unit.hits.clear();
        }
        self.processors.retain(|&(u, p), _| u != index || procs.contains(&p));
        for proc in procs {
            if let Some(spec) = self.get_processor(store, index, proc) {
                unit.processors.insert(proc, spec);
            }
        }
        Some(unit)
    }
}

/// Indices of manifests directly under `root`-prefixed directories.
fn manifest_indices(store: &Store, root: &str, pick: impl Fn(KeyKind) -> Option<usize>) -> Vec<usize> {
    store
        .iter(root)
        .filter(|(k, _)| k.ends_with("/p_manifest.json"))
        .filter_map(|(k, _)| pick(classify(k)))
        .collect()
}

fn build_structure(store: &Store) -> Structure {
    let album = store.contains("album/p_manifest.json").then(|| {
        let tracks = match store.value("album/p_tracks.json") {
            Some(Value::Tracks(t)) => t.clone(),
            _ => Vec::new(),
        };
        Arc::new(Album { tracks })
    });

    let mut songs: BTreeMap<usize, Song> = BTreeMap::new();
    let mut pending: Vec<(usize, &Value)> = Vec::new();
    for (key, entry) in store.iter("song_") {
        match classify(key) {
            KeyKind::SongManifest(s) => {
                songs.insert(s, Song::default());
            }
            KeyKind::SongOrder(s) | KeyKind::SongTempo(s) | KeyKind::SongGlobalVolume(s) => {
                pending.push((s, &entry.value));
            }
            _ => {}
        }
    }
    for (s, value) in pending {
        let Some(song) = songs.get_mut(&s) else { continue };
        match value {
            Value::OrderList(order) => song.order = order.clone(),
            Value::Tempo(t) => song.tempo = *t,
            Value::Volume(v) => song.global_volume = *v,
            _ => {}
        }
    }
    Structure {
        album,
        songs: songs.into_iter().map(|(i, s)| (i, Arc::new(s))).collect(),
    }
}

fn build_pattern(store: &Store, index: usize) -> Option<Pattern> {
    let prefix = pattern_prefix(index);
    if !store.contains(&format!("{}p_manifest.json", prefix)) {
        return None;
    }
    let length = match store.value(&format!("{}p_pattern.json", prefix)) {
        Some(Value::PatternLength(len)) => *len,
        _ => DEFAULT_PATTERN_LENGTH,
    };
    let mut pattern = Pattern::new(length);
    for (key, entry) in store.iter(&prefix) {
        if let (KeyKind::Column { column, .. }, Value::Column(col)) = (classify(key), &entry.value) {
            pattern.set_column(column, (**col).clone());
        }
    }
    Some(pattern)
}

fn build_processor(store: &Store, unit: usize, proc: usize) -> Option<ProcessorSpec> {
    let prefix = proc_prefix(unit, proc);
    let kind = match store.value(&format!("{}p_manifest.json", prefix)) {
        Some(Value::ProcManifest(kind)) => *kind,
        _ => return None,
    };
    let mut spec = ProcessorSpec::new(kind);
    let mut headers: BTreeMap<usize, SampleHeader> = BTreeMap::new();
    let mut data = BTreeMap::new();
    for (key, entry) in store.iter(&prefix) {
        match (classify(key), &entry.value) {
            (KeyKind::ProcSignalType { .. }, Value::SignalType(t)) => spec.signal_type = *t,
            (KeyKind::Param { name, .. }, Value::Param(v)) => spec.params.insert(name, v.clone()),
            (KeyKind::NoteMap { .. }, Value::NoteMap(m)) => spec.note_map = m.clone(),
            (KeyKind::HitMap { .. }, Value::HitMap(m)) => spec.hit_map = m.clone(),
            (KeyKind::SampleHeader { sample, .. }, Value::SampleHeader(h)) => {
                headers.insert(sample, *h);
            }
            (KeyKind::SampleData { sample, .. }, Value::Pcm(pcm)) => {
                data.insert(sample, pcm.clone());
            }
            _ => {}
        }
    }
    for (sample, pcm) in data {
        let header = headers.get(&sample).copied().unwrap_or_default();
        spec.samples.insert(sample, Sample::new(header, pcm));
    }
    Some(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kq_ir::{EventKind, PatInstRef, ProcessorKind, SignalType, Tempo};

    fn store_with(entries: &[(&str, &str)]) -> Store {
        let mut store = Store::new();
        for (k, v) in entries {
            store.put(k, v.as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn song_view_collects_song_keys() {
        let store = store_with(&[
            ("song_00/p_manifest.json", "{}"),
            ("song_00/p_order_list.json", "[[0,0],[1,0]]"),
            ("song_00/p_tempo.json", "90"),
            ("song_01/p_order_list.json", "[[2,0]]"),
        ]);
        let mut views = Views::new();
        let song = views.get_song(&store, 0).unwrap();
        assert_eq!(song.order, vec![PatInstRef::new(0, 0), PatInstRef::new(1, 0)]);
        assert_eq!(song.tempo, Tempo::from_bpm(90.0));
        // No manifest, no song.
        assert!(views.get_song(&store, 1).is_none());
        assert!(views.get_album(&store).is_none());
    }

    #[test]
    fn pattern_view_rebuilds_only_when_its_tag_moves() {
        let mut store = store_with(&[
            ("pat_000/p_manifest.json", "{}"),
            ("pat_000/p_pattern.json", r#"{"length":[2,0]}"#),
            ("pat_000/col_01/p_triggers.json", r#"[[[0,0],"n+",0]]"#),
            ("pat_001/p_manifest.json", "{}"),
        ]);
        let mut views = Views::new();
        let first = views.get_pattern(&store, 0).unwrap();
        assert_eq!(first.length, Timestamp::from_beats(2));
        assert_eq!(first.column(1).triggers()[0].event.kind, EventKind::NoteOn);
        assert_eq!(views.get_pattern(&store, 1).unwrap().length, DEFAULT_PATTERN_LENGTH);

        store.put("pat_001/p_pattern.json", r#"{"length":[1,0]}"#.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &views.get_pattern(&store, 0).unwrap()));
        store.put("pat_000/p_pattern.json", r#"{"length":[3,0]}"#.as_bytes()).unwrap();
        let second = views.get_pattern(&store, 0).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.length, Timestamp::from_beats(3));
    }

    #[test]
    fn unit_view_assembles_processors_and_filters() {
        let store = store_with(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/p_connections.json", r#"[["proc_00/out_00","out_00"]]"#),
            ("au_00/hit_02/p_manifest.json", "{}"),
            ("au_00/hit_02/p_hit_proc_filter.json", "[1]"),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"volume"}"#),
            ("au_00/proc_00/p_signal_type.json", r#""mixed""#),
            ("au_00/proc_00/c/p_f_volume.json", "-6"),
            ("au_00/proc_01/c/p_f_volume.json", "-6"),
        ]);
        let mut views = Views::new();
        let unit = views.get_audio_unit(&store, 0).unwrap();
        assert_eq!(unit.kind, UnitKind::Instrument);
        assert_eq!(unit.processors.len(), 1);
        let proc = unit.processor(0).unwrap();
        assert_eq!(proc.kind, ProcessorKind::Volume);
        assert_eq!(proc.signal_type, SignalType::Mixed);
        assert_eq!(proc.params.float("volume", 0.0), -6.0);
        assert_eq!(unit.excluded(Some(2), None), &[1]);
        assert_eq!(unit.out_port_count(), 1);
    }

    #[test]
    fn snapshot_shares_unchanged_regions() {
        let mut store = store_with(&[
            ("pat_000/p_manifest.json", "{}"),
            ("au_00/p_manifest.json", r#"{"type":"effect"}"#),
            ("song_00/p_manifest.json", "{}"),
        ]);
        let mut views = Views::new();
        let a = views.snapshot(&store);
        assert!(Arc::ptr_eq(&a, &views.snapshot(&store)));
        store.put("au_00/proc_00/p_manifest.json", r#"{"type":"delay"}"#.as_bytes()).unwrap();
        let b = views.snapshot(&store);
        assert!(Arc::ptr_eq(&a.patterns[&0], &b.patterns[&0]));
        assert!(!Arc::ptr_eq(&a.units[&0], &b.units[&0]));
        assert_eq!(b.units[&0].processors.len(), 1);
        assert_eq!(b.track_song(0), Some(0));
    }

    #[test]
    fn samples_need_data() {
        let mut store = store_with(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"sample"}"#),
            ("au_00/proc_00/c/smp_001/p_sh_sample.json", r#"{"freq":44100}"#),
        ]);
        store
            .put_pcm("au_00/proc_00/c/smp_000/p_sample.wv", kq_ir::Pcm::mono(Some(8000), vec![0.0; 4]))
            .unwrap();
        let mut views = Views::new();
        let unit = views.get_audio_unit(&store, 0).unwrap();
        let spec = unit.processor(0).unwrap();
        assert_eq!(spec.samples.len(), 1);
        assert_eq!(spec.samples[&0].base_freq(), 8000.0);
    }
}
