//! Key syntax and key-template classification.
//!
//! A key is a slash-separated path such as `pat_001/col_02/p_triggers.json`.
//! `classify` maps a key onto the template it instantiates, carrying the
//! hex indices it contains; `KeyKind::tag` names the region a write to it
//! invalidates.

use kq_ir::song::{HITS_MAX, PATTERNS_MAX, PROCESSORS_MAX, SAMPLES_MAX, SONGS_MAX, UNITS_MAX};
use kq_ir::{Error, Result, COLUMNS_MAX};

/// Maximum key length in bytes.
pub const KEY_MAX: usize = 256;

/// Check key syntax: non-empty components of `[a-z0-9_.]`, a format suffix
/// on the last component, at most `KEY_MAX` bytes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > KEY_MAX {
        return Err(Error::argument(format!("invalid key length: {:?}", key)));
    }
    for component in key.split('/') {
        if component.is_empty()
            || !component
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'.')
        {
            return Err(Error::argument(format!("invalid key: {:?}", key)));
        }
    }
    if Suffix::of(key).is_none() {
        return Err(Error::argument(format!("key has no format suffix: {:?}", key)));
    }
    Ok(())
}

/// Value encoding selected by the key suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suffix {
    Json,
    Wav,
    WavPack,
}

impl Suffix {
    pub fn of(key: &str) -> Option<Self> {
        let last = key.rsplit('/').next()?;
        if last.ends_with(".json") {
            Some(Suffix::Json)
        } else if last.ends_with(".wav") {
            Some(Suffix::Wav)
        } else if last.ends_with(".wv") {
            Some(Suffix::WavPack)
        } else {
            None
        }
    }
}

/// Processor parameter value type, from the `p_<t>_` prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Envelope,
    NumList,
}

impl ParamType {
    fn from_prefix(p: &str) -> Option<Self> {
        match p {
            "b" => Some(ParamType::Bool),
            "i" => Some(ParamType::Int),
            "f" => Some(ParamType::Float),
            "s" => Some(ParamType::Text),
            "t" => Some(ParamType::Timestamp),
            "e" => Some(ParamType::Envelope),
            "ln" => Some(ParamType::NumList),
            _ => None,
        }
    }
}

/// Region of the composition a key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirtyTag {
    /// Album and song lists.
    Structure,
    Pattern(usize),
    Unit(usize),
    Processor(usize, usize),
    /// Top-level connection graph.
    Connections,
    Bindings,
    /// Channel defaults and random seed.
    Globals,
}

/// The template a key instantiates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyKind {
    AlbumManifest,
    AlbumTracks,
    SongManifest(usize),
    SongOrder(usize),
    SongTempo(usize),
    SongGlobalVolume(usize),
    PatternManifest(usize),
    PatternDef(usize),
    Column { pattern: usize, column: usize },
    UnitManifest(usize),
    UnitConnections(usize),
    UnitExpressions(usize),
    HitManifest { unit: usize, hit: usize },
    HitFilter { unit: usize, hit: usize },
    ProcManifest { unit: usize, proc: usize },
    ProcSignalType { unit: usize, proc: usize },
    Param { unit: usize, proc: usize, ty: ParamType, name: String },
    NoteMap { unit: usize, proc: usize },
    HitMap { unit: usize, proc: usize },
    SampleHeader { unit: usize, proc: usize, sample: usize },
    SampleData { unit: usize, proc: usize, sample: usize },
    Connections,
    Bindings,
    ChannelDefaults,
    RandomSeed,
    /// Under a recognised directory but matching no template; kept opaque.
    Unknown,
}

impl KeyKind {
    /// Region invalidated by writing this key.
    pub fn tag(&self) -> Option<DirtyTag> {
        use KeyKind::*;
        match *self {
            AlbumManifest | AlbumTracks | SongManifest(_) | SongOrder(_) | SongTempo(_)
            | SongGlobalVolume(_) => Some(DirtyTag::Structure),
            PatternManifest(p) | PatternDef(p) | Column { pattern: p, .. } => Some(DirtyTag::Pattern(p)),
            UnitManifest(u) | UnitConnections(u) | UnitExpressions(u) | HitManifest { unit: u, .. }
            | HitFilter { unit: u, .. } => Some(DirtyTag::Unit(u)),
            ProcManifest { unit, proc }
            | ProcSignalType { unit, proc }
            | Param { unit, proc, .. }
            | NoteMap { unit, proc }
            | HitMap { unit, proc }
            | SampleHeader { unit, proc, .. }
            | SampleData { unit, proc, .. } => Some(DirtyTag::Processor(unit, proc)),
            Connections => Some(DirtyTag::Connections),
            Bindings => Some(DirtyTag::Bindings),
            ChannelDefaults | RandomSeed => Some(DirtyTag::Globals),
            Unknown => None,
        }
    }
}

fn indexed(component: &str, prefix: &str, width: usize, limit: usize) -> Option<usize> {
    let digits = component.strip_prefix(prefix)?;
    if digits.len() != width || !digits.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return None;
    }
    let index = usize::from_str_radix(digits, 16).ok()?;
    (index < limit).then_some(index)
}

/// Map a syntactically valid key onto its template.
pub fn classify(key: &str) -> KeyKind {
    let parts: Vec<&str> = key.split('/').collect();
    classify_parts(&parts).unwrap_or(KeyKind::Unknown)
}

fn classify_parts(parts: &[&str]) -> Option<KeyKind> {
    let kind = match parts {
        ["album", "p_manifest.json"] => KeyKind::AlbumManifest,
        ["album", "p_tracks.json"] => KeyKind::AlbumTracks,
        ["p_connections.json"] => KeyKind::Connections,
        ["p_bind.json"] => KeyKind::Bindings,
        ["p_channel_defaults.json"] => KeyKind::ChannelDefaults,
        ["p_random_seed.json"] => KeyKind::RandomSeed,
        [song, leaf] if song.starts_with("song_") => {
            let s = indexed(song, "song_", 2, SONGS_MAX)?;
            match *leaf {
                "p_manifest.json" => KeyKind::SongManifest(s),
                "p_order_list.json" => KeyKind::SongOrder(s),
                "p_tempo.json" => KeyKind::SongTempo(s),
                "p_global_vol.json" => KeyKind::SongGlobalVolume(s),
                _ => return None,
            }
        }
        [pat, leaf] if pat.starts_with("pat_") => {
            let p = indexed(pat, "pat_", 3, PATTERNS_MAX)?;
            match *leaf {
                "p_manifest.json" => KeyKind::PatternManifest(p),
                "p_pattern.json" => KeyKind::PatternDef(p),
                _ => return None,
            }
        }
        [pat, col, "p_triggers.json"] => KeyKind::Column {
            pattern: indexed(pat, "pat_", 3, PATTERNS_MAX)?,
            column: indexed(col, "col_", 2, COLUMNS_MAX)?,
        },
        [au, rest @ ..] if au.starts_with("au_") => {
            let unit = indexed(au, "au_", 2, UNITS_MAX)?;
            classify_unit(unit, rest)?
        }
        _ => return None,
    };
    Some(kind)
}

fn classify_unit(unit: usize, parts: &[&str]) -> Option<KeyKind> {
    let kind = match parts {
        ["p_manifest.json"] => KeyKind::UnitManifest(unit),
        ["p_connections.json"] => KeyKind::UnitConnections(unit),
        ["p_expressions.json"] => KeyKind::UnitExpressions(unit),
        [hit, leaf] if hit.starts_with("hit_") => {
            let hit = indexed(hit, "hit_", 2, HITS_MAX)?;
            match *leaf {
                "p_manifest.json" => KeyKind::HitManifest { unit, hit },
                "p_hit_proc_filter.json" => KeyKind::HitFilter { unit, hit },
                _ => return None,
            }
        }
        [proc, rest @ ..] if proc.starts_with("proc_") => {
            let proc = indexed(proc, "proc_", 2, PROCESSORS_MAX)?;
            classify_proc(unit, proc, rest)?
        }
        _ => return None,
    };
    Some(kind)
}

fn classify_proc(unit: usize, proc: usize, parts: &[&str]) -> Option<KeyKind> {
    let kind = match parts {
        ["p_manifest.json"] => KeyKind::ProcManifest { unit, proc },
        ["p_signal_type.json"] => KeyKind::ProcSignalType { unit, proc },
        ["c", "p_nm_note_map.json"] => KeyKind::NoteMap { unit, proc },
        ["c", "p_hm_hit_map.json"] => KeyKind::HitMap { unit, proc },
        ["c", smp, leaf] if smp.starts_with("smp_") => {
            let sample = indexed(smp, "smp_", 3, SAMPLES_MAX)?;
            match *leaf {
                "p_sh_sample.json" => KeyKind::SampleHeader { unit, proc, sample },
                "p_sample.wav" | "p_sample.wv" => KeyKind::SampleData { unit, proc, sample },
                _ => return None,
            }
        }
        ["c", leaf] => {
            let stem = leaf.strip_prefix("p_")?.strip_suffix(".json")?;
            let (prefix, name) = stem.split_once('_')?;
            let ty = ParamType::from_prefix(prefix)?;
            if name.is_empty() {
                return None;
            }
            KeyKind::Param {
                unit,
                proc,
                ty,
                name: name.to_string(),
            }
        }
        _ => return None,
    };
    Some(kind)
}

/// Key of a processor's region prefix, e.g. `au_01/proc_02/`.
pub fn proc_prefix(unit: usize, proc: usize) -> String {
    format!("au_{:02x}/proc_{:02x}/", unit, proc)
}

pub fn unit_prefix(unit: usize) -> String {
    format!("au_{:02x}/", unit)
}

pub fn pattern_prefix(pattern: usize) -> String {
    format!("pat_{:03x}/", pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_bad_syntax() {
        assert!(validate_key("pat_000/p_pattern.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("pat_000//p_pattern.json").is_err());
        assert!(validate_key("Pat_000/p_pattern.json").is_err());
        assert!(validate_key("pat_000/p_pattern").is_err());
        assert!(validate_key("pat 000/p_pattern.json").is_err());
        let long = format!("{}.json", "a".repeat(KEY_MAX));
        assert!(validate_key(&long).is_err());
    }

    #[test]
    fn classifies_composition_keys() {
        assert_eq!(classify("album/p_tracks.json"), KeyKind::AlbumTracks);
        assert_eq!(classify("song_0a/p_order_list.json"), KeyKind::SongOrder(10));
        assert_eq!(
            classify("pat_01f/col_3f/p_triggers.json"),
            KeyKind::Column { pattern: 31, column: 63 }
        );
        assert_eq!(classify("au_03/hit_01/p_hit_proc_filter.json"), KeyKind::HitFilter { unit: 3, hit: 1 });
        assert_eq!(classify("p_bind.json"), KeyKind::Bindings);
    }

    #[test]
    fn classifies_processor_keys() {
        assert_eq!(
            classify("au_00/proc_01/c/p_f_volume.json"),
            KeyKind::Param { unit: 0, proc: 1, ty: ParamType::Float, name: "volume".into() }
        );
        assert_eq!(
            classify("au_00/proc_01/c/p_ln_tone_pitches.json"),
            KeyKind::Param { unit: 0, proc: 1, ty: ParamType::NumList, name: "tone_pitches".into() }
        );
        assert_eq!(classify("au_00/proc_01/c/p_nm_note_map.json"), KeyKind::NoteMap { unit: 0, proc: 1 });
        assert_eq!(
            classify("au_00/proc_01/c/smp_1ff/p_sample.wav"),
            KeyKind::SampleData { unit: 0, proc: 1, sample: 511 }
        );
    }

    #[test]
    fn out_of_range_or_malformed_indices_are_unknown() {
        assert_eq!(classify("pat_400/p_pattern.json"), KeyKind::Unknown);
        assert_eq!(classify("pat_40/p_pattern.json"), KeyKind::Unknown);
        assert_eq!(classify("pat_000/col_40/p_triggers.json"), KeyKind::Unknown);
        assert_eq!(classify("au_00/proc_00/c/p_x_thing.json"), KeyKind::Unknown);
        assert_eq!(classify("au_00/p_unrelated.json"), KeyKind::Unknown);
    }

    #[test]
    fn tags_group_regions() {
        assert_eq!(classify("song_00/p_tempo.json").tag(), Some(DirtyTag::Structure));
        assert_eq!(classify("pat_002/col_00/p_triggers.json").tag(), Some(DirtyTag::Pattern(2)));
        assert_eq!(classify("au_01/proc_02/c/p_f_cutoff.json").tag(), Some(DirtyTag::Processor(1, 2)));
        assert_eq!(classify("au_01/p_connections.json").tag(), Some(DirtyTag::Unit(1)));
        assert_eq!(classify("p_random_seed.json").tag(), Some(DirtyTag::Globals));
        assert_eq!(KeyKind::Unknown.tag(), None);
    }

    #[test]
    fn prefixes_use_fixed_width_hex() {
        assert_eq!(proc_prefix(3, 10), "au_03/proc_0a/");
        assert_eq!(pattern_prefix(31), "pat_01f/");
    }
}
