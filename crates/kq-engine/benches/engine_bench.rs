//! Render throughput of the playback engine.
//!
//! Run with: cargo bench -p kq-engine --bench engine_bench

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use kq_engine::Engine;
use kq_ir::graph::GraphLevel;
use kq_ir::{
    AudioUnit, Column, Composition, Edge, Event, EventArg, EventKind, PatInstRef, Pattern,
    ProcessorKind, ProcessorSpec, Song, Tempo, Timestamp, UnitKind,
};

/// One additive instrument playing a chord on `voices` channels, looping.
fn chord_composition(voices: usize) -> Arc<Composition> {
    let mut pattern = Pattern::new(Timestamp::from_beats(16));
    for ch in 0..voices {
        let note = Event::raw(EventKind::NoteOn, EventArg::Float(ch as f64 * 100.0));
        let column = Column::from_events(ch, [(Timestamp::ZERO, note)]).unwrap();
        pattern.set_column(ch, column);
    }
    let mut unit = AudioUnit::new(UnitKind::Instrument);
    unit.processors
        .insert(0, Arc::new(ProcessorSpec::new(ProcessorKind::Additive)));
    unit.edges = vec![
        Edge::parse("proc_00/out_00", "out_00", GraphLevel::Unit).unwrap(),
        Edge::parse("proc_00/out_01", "out_01", GraphLevel::Unit).unwrap(),
    ];

    let mut comp = Composition::default();
    comp.patterns.insert(0, Arc::new(pattern));
    comp.songs.insert(
        0,
        Arc::new(Song {
            order: vec![PatInstRef::new(0, 0)],
            tempo: Tempo::from_bpm(120.0),
            global_volume: -12.0,
        }),
    );
    comp.units = BTreeMap::from([(0, Arc::new(unit))]);
    comp.connections = Arc::new(vec![
        Edge::parse("au_00/out_00", "out_00", GraphLevel::Top).unwrap(),
        Edge::parse("au_00/out_01", "out_01", GraphLevel::Top).unwrap(),
    ]);
    Arc::new(comp)
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_4096");
    for voices in [1usize, 8, 32] {
        let comp = chord_composition(voices);
        group.bench_with_input(BenchmarkId::from_parameter(voices), &comp, |b, comp| {
            let mut engine = Engine::new(comp.clone(), 48000, 4096).unwrap();
            b.iter(|| {
                if engine.play(4096).unwrap() == 0 {
                    engine.set_position(0, 0).unwrap();
                }
                black_box(engine.buffer(0));
            })
        });
    }
    group.finish();
}

fn bench_seek(c: &mut Criterion) {
    let comp = chord_composition(8);
    let mut engine = Engine::new(comp, 48000, 4096).unwrap();
    c.bench_function("seek_4s", |b| {
        b.iter(|| engine.set_position(0, black_box(4_000_000_000)).unwrap())
    });
}

criterion_group!(benches, bench_render, bench_seek);
criterion_main!(benches);
