//! Integration tests for the store, views and validation working together.

use kq_ir::{ErrorKind, FormatError, Timestamp};
use kq_store::{validate, Store, Value, Views};

fn load(entries: &[(&str, &str)]) -> Store {
    let mut store = Store::new();
    for (key, json) in entries {
        store
            .put(key, json.as_bytes())
            .unwrap_or_else(|e| panic!("put {} failed: {}", key, e));
    }
    store
}

const SONG: &[(&str, &str)] = &[
    ("album/p_manifest.json", "{}"),
    ("album/p_tracks.json", "[0]"),
    ("song_00/p_manifest.json", "{}"),
    ("song_00/p_order_list.json", "[[0,0],[1,0]]"),
    ("pat_000/p_manifest.json", "{}"),
    ("pat_000/p_pattern.json", r#"{"length":[4,0]}"#),
    ("pat_000/col_00/p_triggers.json", r#"[[[0,0],"n+",0],[[2,0],"n-",null]]"#),
    ("pat_001/p_manifest.json", "{}"),
    ("pat_001/p_pattern.json", r#"{"length":[4,0]}"#),
    ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
    ("au_00/proc_00/p_manifest.json", r#"{"type":"add"}"#),
    ("au_00/p_connections.json", r#"[["proc_00/out_00","out_00"],["proc_00/out_01","out_01"]]"#),
    ("p_connections.json", r#"[["au_00/out_00","out_00"],["au_00/out_01","out_01"]]"#),
];

#[test]
fn set_then_get_returns_what_was_set() {
    let store = load(SONG);
    for (key, json) in SONG {
        assert_eq!(store.get(key).as_deref(), Some(json.as_bytes()), "{}", key);
    }
    assert!(store.get("pat_002/p_manifest.json").is_none());
}

#[test]
fn complete_song_validates() {
    let store = load(SONG);
    let comp = Views::new().snapshot(&store);
    validate(&comp).unwrap();
    assert_eq!(comp.track_song(0), Some(0));
    assert_eq!(comp.track(0).unwrap().order.len(), 2);
    assert_eq!(comp.pattern(0).unwrap().length, Timestamp::from_beats(4));
}

#[test]
fn unknown_keys_are_kept_but_ignored() {
    let mut store = load(SONG);
    store.put("au_00/m_editor_state.json", r#"{"zoom": 2}"#.as_bytes()).unwrap();
    assert_eq!(store.value("au_00/m_editor_state.json"), Some(&Value::Opaque));
    let err = store.put("au_00/m_editor_state.json", b"{zoom").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    validate(&Views::new().snapshot(&store)).unwrap();
}

#[test]
fn cycle_introduced_in_a_transaction_fails_validation() {
    let mut store = load(SONG);
    let mut views = Views::new();
    store
        .transaction(
            |_| Ok(()),
            |tx| {
                for u in ["au_01", "au_02"] {
                    tx.put(&format!("{}/p_manifest.json", u), br#"{"type":"effect"}"#)?;
                    tx.put(&format!("{}/p_connections.json", u), br#"[["in_00","out_00"]]"#)?;
                }
                tx.put(
                    "p_connections.json",
                    br#"[["au_01/out_00","au_02/in_00"],["au_02/out_00","au_01/in_00"]]"#,
                )
            },
        )
        .unwrap();
    let err = validate(&views.snapshot(&store)).unwrap_err();
    assert_eq!(err.format_error().map(FormatError::kind), Some("graph_cycle"));

    // Repair and revalidate through the same views.
    store.delete("p_connections.json").unwrap();
    validate(&views.snapshot(&store)).unwrap();
}

#[test]
fn failed_transaction_is_invisible() {
    let mut store = load(SONG);
    let revision = store.revision();
    let result = store.transaction(
        |_| Ok(()),
        |tx| {
            tx.delete("pat_001/p_manifest.json")?;
            tx.put("pat_000/col_01/p_triggers.json", br#"[[[0,0],"nope",0]]"#)
        },
    );
    assert!(result.is_err());
    assert_eq!(store.revision(), revision);
    assert!(store.contains("pat_001/p_manifest.json"));
}
