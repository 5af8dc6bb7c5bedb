//! Allocation-free render path tests.
//!
//! These tests verify that `Handle::play()` does not allocate once the
//! engine is built. They render compositions that start and release
//! voices, steal voices, slide controls, jump and expand bindings.

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

use kq_engine::EngineConfig;
use kq_handle::Handle;

const RATE: u32 = 48000;

const BASE: &[(&str, &str)] = &[
    ("song_00/p_manifest.json", "{}"),
    ("song_00/p_order_list.json", "[[0,0],[1,0]]"),
    ("pat_000/p_manifest.json", "{}"),
    ("pat_000/p_pattern.json", r#"{"length":[4,0]}"#),
    ("pat_001/p_manifest.json", "{}"),
    ("pat_001/p_pattern.json", r#"{"length":[4,0]}"#),
    ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
    ("au_00/proc_00/p_manifest.json", r#"{"type":"add"}"#),
    ("au_00/proc_01/p_manifest.json", r#"{"type":"force"}"#),
    ("au_00/proc_02/p_manifest.json", r#"{"type":"filter"}"#),
    (
        "au_00/p_connections.json",
        r#"[["proc_01/out_00","proc_00/in_01"],["proc_00/out_00","proc_02/in_00"],
           ["proc_00/out_01","proc_02/in_01"],["proc_02/out_00","out_00"],["proc_02/out_01","out_01"]]"#,
    ),
    ("au_01/p_manifest.json", r#"{"type":"effect"}"#),
    ("au_01/proc_00/p_manifest.json", r#"{"type":"delay"}"#),
    ("au_01/proc_01/p_manifest.json", r#"{"type":"freeverb"}"#),
    (
        "au_01/p_connections.json",
        r#"[["in_00","proc_00/in_00"],["in_01","proc_00/in_01"],["proc_00/out_00","proc_01/in_00"],
           ["proc_00/out_01","proc_01/in_01"],["proc_01/out_00","out_00"],["proc_01/out_01","out_01"]]"#,
    ),
    (
        "p_connections.json",
        r#"[["au_00/out_00","au_01/in_00"],["au_00/out_01","au_01/in_01"],
           ["au_01/out_00","out_00"],["au_01/out_01","out_01"]]"#,
    ),
];

/// Build the engine and position it outside the checked region.
fn prepared(extra: &[(&str, &str)], config: EngineConfig, buffer_size: usize) -> Handle {
    let mut h = Handle::with_config(RATE, config).unwrap();
    for (key, json) in BASE.iter().chain(extra) {
        h.set_data(key, json.as_bytes()).unwrap();
    }
    h.set_buffer_size(buffer_size).unwrap();
    h.validate().unwrap();
    h.set_position(0, 0).unwrap();
    h
}

/// Render until the song ends, aborting on any heap allocation.
fn assert_render_alloc_free(mut h: Handle) {
    let rendered = assert_no_alloc(|| {
        let mut total = 0;
        loop {
            match h.play(h.buffer_size()) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) => return Err(e),
            }
        }
    });
    let total = rendered.unwrap();
    assert_eq!(total, RATE as usize * 4);
}

#[test]
fn notes_and_slides_alloc_free() {
    let h = prepared(
        &[
            (
                "pat_000/col_00/p_triggers.json",
                r#"[[[0,0],"n+",0],[[0,0],"/=p",[1,0]],[[0,0],"/p",700],[[1,0],".f",-6],
                    [[2,0],"n-",null],[[3,0],"n+",-1200],[[3,0],"/=f",[1,0]],[[3,0],"/f",-30]]"#,
            ),
            (
                "pat_000/col_01/p_triggers.json",
                r#"[[[0,0],".a",0],[[0,0],".cn","cutoff"],[[0,0],"/=c",[2,0]],[[0,0],"/c",4000],
                    [[1,0],"n+",300],[[2,0],"m/=v",[1,0]],[[2,0],"m/v",-6]]"#,
            ),
            ("pat_001/col_00/p_triggers.json", r#"[[[0,0],"n+",200],[[2,0],"n+",400],[[3,0],"n-",null]]"#),
        ],
        EngineConfig::default(),
        512,
    );
    assert_render_alloc_free(h);
}

#[test]
fn voice_stealing_alloc_free() {
    let mut extra = Vec::new();
    let columns: Vec<(String, String)> = (0..8)
        .map(|c| {
            (
                format!("pat_000/col_{:02x}/p_triggers.json", c),
                format!(r#"[[[0,0],"n+",{}],[[1,{}],"n+",{}]]"#, c * 100, c * 1000, c * 50),
            )
        })
        .collect();
    for (key, json) in &columns {
        extra.push((key.as_str(), json.as_str()));
    }
    let config = EngineConfig {
        voice_limit: 3,
        ..EngineConfig::default()
    };
    assert_render_alloc_free(prepared(&extra, config, 4096));
}

#[test]
fn jumps_and_bindings_alloc_free() {
    let mut h = prepared(
        &[
            (
                "pat_000/col_00/p_triggers.json",
                r#"[[[0,0],"n+",0],[[1,0],"m.jc",1],[[1,0],"m.jr",[0,0]],[[1,0],"mj",null]]"#,
            ),
            ("p_bind.json", r#"[{"event":"n+","targets":[[1,"n+","$"],[2,".f",-3]]}]"#),
        ],
        EngineConfig::default(),
        1000,
    );
    // One beat repeats once: 4.5 s in total.
    let total = assert_no_alloc(|| {
        let mut total = 0;
        while let Ok(n) = h.play(1000) {
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    });
    assert_eq!(total, RATE as usize * 9 / 2);
    assert!(h.error().is_none());
}
