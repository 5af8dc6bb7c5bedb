//! Whole-composition consistency checks.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use kq_ir::graph::execution_order;
use kq_ir::{
    AudioUnit, Composition, Edge, Endpoint, Error, FormatError, GraphLevel, PortKind, Result,
    SampleChoice, SignalType, UnitKind,
};

/// Master output ports: left and right.
pub const MASTER_PORTS: usize = 2;

/// Check everything a render relies on. Errors carry the key of the
/// offending entry.
pub fn validate(comp: &Composition) -> Result<()> {
    check_patterns(comp)?;
    check_songs(comp)?;
    for (&index, unit) in &comp.units {
        check_unit(index, unit)?;
    }
    check_connections(comp)?;
    debug!(
        "validated {} songs, {} patterns, {} audio units",
        comp.songs.len(),
        comp.patterns.len(),
        comp.units.len()
    );
    Ok(())
}

fn check_patterns(comp: &Composition) -> Result<()> {
    for (&index, pattern) in &comp.patterns {
        if pattern.length.is_negative() || pattern.length.is_zero() {
            return Err(Error::format_at(
                format!("pat_{:03x}/p_pattern.json", index),
                FormatError::inconsistent("pattern length must be positive"),
            ));
        }
    }
    Ok(())
}

fn check_songs(comp: &Composition) -> Result<()> {
    let mut owners = BTreeMap::new();
    for (&index, song) in &comp.songs {
        let key = format!("song_{:02x}/p_order_list.json", index);
        let mut seen = BTreeSet::new();
        for inst in &song.order {
            if comp.instance_pattern(*inst).is_none() {
                return Err(Error::format_at(
                    key,
                    FormatError::inconsistent(format!("pattern {} does not exist", inst.pattern)),
                ));
            }
            if !seen.insert(inst.pattern) {
                return Err(Error::format_at(
                    key,
                    FormatError::inconsistent(format!("pattern {} appears twice", inst.pattern)),
                ));
            }
            if let Some(other) = owners.insert(*inst, index) {
                return Err(Error::format_at(
                    key,
                    FormatError::inconsistent(format!(
                        "pattern instance [{}, {}] is also used by song {}",
                        inst.pattern, inst.instance, other
                    )),
                ));
            }
        }
    }
    if let Some(album) = &comp.album {
        if let Some(track) = album.tracks.iter().find(|t| !comp.songs.contains_key(t)) {
            return Err(Error::format_at(
                "album/p_tracks.json",
                FormatError::inconsistent(format!("song {} does not exist", track)),
            ));
        }
    }
    Ok(())
}

fn unit_key(unit: usize, leaf: &str) -> String {
    format!("au_{:02x}/{}", unit, leaf)
}

fn check_unit(index: usize, unit: &AudioUnit) -> Result<()> {
    for (&p, spec) in &unit.processors {
        let key = unit_key(index, &format!("proc_{:02x}/p_signal_type.json", p));
        if !spec.kind.supports(spec.signal_type) {
            return Err(Error::format_at(
                key,
                FormatError::inconsistent(format!(
                    "{} processors cannot be {}",
                    spec.kind.name(),
                    spec.signal_type.name()
                )),
            ));
        }
        if unit.kind == UnitKind::Effect && spec.signal_type == SignalType::Voice {
            return Err(Error::format_at(
                key,
                FormatError::inconsistent("effect units contain only mixed processors"),
            ));
        }
        check_samples(index, p, unit)?;
    }

    let key = unit_key(index, "p_connections.json");
    let at = |e: FormatError| Error::format_at(key.clone(), e);
    for edge in &unit.edges {
        check_unit_edge(unit, edge).map_err(at)?;
    }
    let devices: Vec<usize> = unit.processors.keys().copied().collect();
    let pairs: Vec<(usize, usize)> = unit.edges.iter().filter_map(Edge::device_pair).collect();
    execution_order(&devices, &pairs, GraphLevel::Unit).map_err(at)?;
    Ok(())
}

fn check_unit_edge(unit: &AudioUnit, edge: &Edge) -> std::result::Result<(), FormatError> {
    let (from_name, to_name) = edge.names(GraphLevel::Unit);
    let source = match edge.from {
        Endpoint::Device { index, port } => {
            let spec = unit.processor(index).ok_or_else(|| FormatError::Endpoint(from_name.clone()))?;
            let kind = *spec
                .kind
                .ports()
                .outputs
                .get(port)
                .ok_or_else(|| FormatError::Endpoint(from_name.clone()))?;
            Some((kind, spec.signal_type))
        }
        Endpoint::Interface { .. } => None,
    };
    let dest = match edge.to {
        Endpoint::Device { index, port } => {
            let spec = unit.processor(index).ok_or_else(|| FormatError::Endpoint(to_name.clone()))?;
            let kind = *spec
                .kind
                .ports()
                .inputs
                .get(port)
                .ok_or_else(|| FormatError::Endpoint(to_name.clone()))?;
            Some((kind, spec.signal_type))
        }
        Endpoint::Interface { .. } => None,
    };

    let from_kind = source.map_or(PortKind::Audio, |(k, _)| k);
    let to_kind = dest.map_or(PortKind::Audio, |(k, _)| k);
    if from_kind != to_kind {
        return Err(FormatError::PortMismatch {
            from: from_name,
            to: to_name,
        });
    }
    // Only voice processors feed voice processors.
    if let Some((_, SignalType::Voice)) = dest {
        if !matches!(source, Some((_, SignalType::Voice))) {
            return Err(FormatError::SignalType {
                from: from_name,
                to: to_name,
            });
        }
    }
    Ok(())
}

fn check_samples(unit_index: usize, proc: usize, unit: &AudioUnit) -> Result<()> {
    let Some(spec) = unit.processor(proc) else {
        return Ok(());
    };
    let missing = |c: &&SampleChoice| !spec.samples.contains_key(&c.sample);
    let from_notes = spec.note_map.iter().flat_map(|e| e.choices.iter()).find(missing);
    let from_hits = spec.hit_map.iter().flat_map(|e| e.choices.iter()).find(missing);
    let (leaf, choice) = match (from_notes, from_hits) {
        (Some(c), _) => ("c/p_nm_note_map.json", c),
        (None, Some(c)) => ("c/p_hm_hit_map.json", c),
        (None, None) => return Ok(()),
    };
    Err(Error::format_at(
        unit_key(unit_index, &format!("proc_{:02x}/{}", proc, leaf)),
        FormatError::MissingSample {
            unit: unit_index,
            processor: proc,
            sample: choice.sample,
        },
    ))
}

fn check_connections(comp: &Composition) -> Result<()> {
    let at = |e: FormatError| Error::format_at("p_connections.json", e);
    for edge in comp.connections.iter() {
        let (from_name, to_name) = edge.names(GraphLevel::Top);
        if let Endpoint::Device { index, port } = edge.from {
            let ok = comp.unit(index).is_some_and(|u| port < u.out_port_count());
            if !ok {
                return Err(at(FormatError::Endpoint(from_name)));
            }
        }
        match edge.to {
            Endpoint::Device { index, port } => {
                let ok = comp.unit(index).is_some_and(|u| port < u.in_port_count());
                if !ok {
                    return Err(at(FormatError::Endpoint(to_name)));
                }
            }
            Endpoint::Interface { port } if port >= MASTER_PORTS => {
                return Err(at(FormatError::Endpoint(to_name)));
            }
            Endpoint::Interface { .. } => {}
        }
    }
    let devices: Vec<usize> = comp.units.keys().copied().collect();
    let pairs: Vec<(usize, usize)> = comp.connections.iter().filter_map(Edge::device_pair).collect();
    execution_order(&devices, &pairs, GraphLevel::Top).map_err(at)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::view::Views;

    fn composition(entries: &[(&str, &str)]) -> std::sync::Arc<Composition> {
        let mut store = Store::new();
        for (k, v) in entries {
            store.put(k, v.as_bytes()).unwrap();
        }
        Views::new().snapshot(&store)
    }

    fn format_kind(result: Result<()>) -> &'static str {
        result.unwrap_err().format_error().map(FormatError::kind).unwrap_or("not a format error")
    }

    const EFFECT: &str = r#"{"type":"effect"}"#;
    const PASS: &str = r#"[["in_00","proc_00/in_00"],["proc_00/out_00","out_00"]]"#;

    #[test]
    fn empty_composition_is_valid() {
        assert!(validate(&Composition::default()).is_ok());
    }

    #[test]
    fn top_level_cycle_is_reported_with_path() {
        let mut entries = Vec::new();
        for u in ["au_00", "au_01", "au_02"] {
            entries.push((format!("{}/p_manifest.json", u), EFFECT.to_string()));
            entries.push((format!("{}/p_connections.json", u), r#"[["in_00","out_00"]]"#.to_string()));
        }
        entries.push((
            "p_connections.json".into(),
            r#"[["au_00/out_00","au_01/in_00"],["au_01/out_00","au_02/in_00"],["au_02/out_00","au_00/in_00"]]"#
                .into(),
        ));
        let refs: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let err = validate(&composition(&refs)).unwrap_err();
        match err.format_error() {
            Some(FormatError::GraphCycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn order_lists_are_checked() {
        let missing = composition(&[("song_00/p_manifest.json", "{}"), ("song_00/p_order_list.json", "[[0,0]]")]);
        assert_eq!(format_kind(validate(&missing)), "inconsistent");

        let shared = composition(&[
            ("pat_000/p_manifest.json", "{}"),
            ("song_00/p_manifest.json", "{}"),
            ("song_00/p_order_list.json", "[[0,0]]"),
            ("song_01/p_manifest.json", "{}"),
            ("song_01/p_order_list.json", "[[0,0]]"),
        ]);
        assert!(validate(&shared).is_err());

        let twice = composition(&[
            ("pat_000/p_manifest.json", "{}"),
            ("song_00/p_manifest.json", "{}"),
            ("song_00/p_order_list.json", "[[0,0],[0,1]]"),
        ]);
        assert!(validate(&twice).is_err());

        let ok = composition(&[
            ("pat_000/p_manifest.json", "{}"),
            ("song_00/p_manifest.json", "{}"),
            ("song_00/p_order_list.json", "[[0,0]]"),
            ("song_01/p_manifest.json", "{}"),
            ("song_01/p_order_list.json", "[[0,1]]"),
        ]);
        assert!(validate(&ok).is_ok());
    }

    #[test]
    fn zero_length_pattern_rejected() {
        let comp = composition(&[("pat_000/p_manifest.json", "{}"), ("pat_000/p_pattern.json", r#"{"length":[0,0]}"#)]);
        let err = validate(&comp).unwrap_err();
        assert!(matches!(err, Error::Format { key: Some(ref k), .. } if k == "pat_000/p_pattern.json"));
    }

    #[test]
    fn port_kinds_must_match() {
        let comp = composition(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"pitch"}"#),
            ("au_00/proc_01/p_manifest.json", r#"{"type":"sample"}"#),
            ("au_00/p_connections.json", r#"[["proc_00/out_00","proc_01/in_01"]]"#),
        ]);
        assert_eq!(format_kind(validate(&comp)), "port_mismatch");
    }

    #[test]
    fn undeclared_ports_rejected() {
        let comp = composition(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"pitch"}"#),
            ("au_00/p_connections.json", r#"[["proc_00/out_01","out_00"]]"#),
        ]);
        assert_eq!(format_kind(validate(&comp)), "endpoint");
    }

    #[test]
    fn mixed_into_voice_rejected() {
        let comp = composition(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"volume"}"#),
            ("au_00/proc_00/p_signal_type.json", r#""mixed""#),
            ("au_00/proc_01/p_manifest.json", r#"{"type":"volume"}"#),
            ("au_00/p_connections.json", r#"[["proc_00/out_00","proc_01/in_00"]]"#),
        ]);
        assert_eq!(format_kind(validate(&comp)), "signal_type");
    }

    #[test]
    fn effect_units_need_mixed_processors() {
        let voice = composition(&[
            ("au_00/p_manifest.json", EFFECT),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"volume"}"#),
            ("au_00/p_connections.json", PASS),
        ]);
        assert!(validate(&voice).is_err());
        let mixed = composition(&[
            ("au_00/p_manifest.json", EFFECT),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"delay"}"#),
            ("au_00/p_connections.json", PASS),
            ("p_connections.json", r#"[["au_00/out_00","out_00"]]"#),
        ]);
        assert!(validate(&mixed).is_ok());
    }

    #[test]
    fn unsupported_signal_type_rejected() {
        let comp = composition(&[
            ("au_00/p_manifest.json", EFFECT),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"pitch"}"#),
            ("au_00/proc_00/p_signal_type.json", r#""mixed""#),
        ]);
        assert!(validate(&comp).is_err());
    }

    #[test]
    fn master_has_two_ports() {
        let comp = composition(&[
            ("au_00/p_manifest.json", EFFECT),
            ("au_00/p_connections.json", r#"[["in_00","out_00"],["in_00","out_01"],["in_00","out_02"]]"#),
            ("p_connections.json", r#"[["au_00/out_02","out_02"]]"#),
        ]);
        assert_eq!(format_kind(validate(&comp)), "endpoint");
    }

    #[test]
    fn missing_sample_reported() {
        let comp = composition(&[
            ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
            ("au_00/proc_00/p_manifest.json", r#"{"type":"sample"}"#),
            ("au_00/proc_00/c/p_nm_note_map.json", "[[0, [[3, 0, 0]]]]"),
        ]);
        let err = validate(&comp).unwrap_err();
        assert_eq!(
            err.format_error(),
            Some(&FormatError::MissingSample {
                unit: 0,
                processor: 0,
                sample: 3
            })
        );
    }
}
