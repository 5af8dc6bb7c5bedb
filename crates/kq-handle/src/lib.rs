//! Handle API for the kunquat renderer.
//!
//! A `Handle` owns a key/value store and the playback engine built from
//! it. Callers write composition data as keys, then pull audio with
//! `play` and `get_buffer`. The engine is rebuilt lazily whenever the
//! store, the audio rate or the buffer size changed. A rebuild after a
//! store change continues from the previous playback position.

mod events;
mod export;
mod report;

use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value as Json;

use kq_engine::{Engine, EngineConfig, AUDIO_RATE_RANGE, BUFFER_SIZE_MAX, DEFAULT_BUFFER_SIZE};
use kq_ir::{Composition, Error, Pcm, Result};
use kq_store::{Progress, Store, Transaction, Views};

pub use events::FiredEvent;
pub use export::write_wav;
pub use kq_engine::ChannelEvent;
pub use kq_ir::ErrorKind;
pub use kq_store::WavFormat;
pub use report::{ErrorReport, Report};

/// A composition together with its renderer.
pub struct Handle {
    store: Store,
    views: Views,
    config: EngineConfig,
    audio_rate: u32,
    buffer_size: usize,
    engine: Option<Engine>,
    /// Store revision of the last successful validation
    validated: Option<u64>,
    error: Option<Error>,
    /// Set when a render aborted; `play` renders nothing until cleared.
    aborted: bool,
}

fn check_audio_rate(rate: u32) -> Result<()> {
    if AUDIO_RATE_RANGE.contains(&rate) {
        Ok(())
    } else {
        Err(Error::argument(format!(
            "audio rate {} outside {}..={}",
            rate,
            AUDIO_RATE_RANGE.start(),
            AUDIO_RATE_RANGE.end()
        )))
    }
}

impl Handle {
    pub fn new(audio_rate: u32) -> Result<Self> {
        Self::with_config(audio_rate, EngineConfig::default())
    }

    pub fn with_config(audio_rate: u32, config: EngineConfig) -> Result<Self> {
        check_audio_rate(audio_rate)?;
        Ok(Self {
            store: Store::new(),
            views: Views::new(),
            config: config.sanitized(),
            audio_rate,
            buffer_size: DEFAULT_BUFFER_SIZE,
            engine: None,
            validated: None,
            error: None,
            aborted: false,
        })
    }

    // --- Data ---

    /// Parse and store `bytes` under `key`. A rejected write leaves the
    /// previous value in place.
    pub fn set_data(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let result = self.store.put(key, bytes);
        self.record(result)
    }

    /// Bytes stored under `key`, or `None` if the key is unset.
    pub fn get_data(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    /// Store decoded sample data under a `p_sample.wav` or `.wv` key.
    pub fn put_pcm(&mut self, key: &str, pcm: Pcm) -> Result<()> {
        let result = self.store.put_pcm(key, pcm);
        self.record(result)
    }

    pub fn delete_data(&mut self, key: &str) -> Result<bool> {
        let result = self.store.delete(key);
        self.record(result)
    }

    /// Apply several writes at once; see `Store::transaction`.
    pub fn transaction<T, N, F>(&mut self, notifier: N, f: F) -> Result<T>
    where
        N: FnMut(&Progress<'_>) -> std::result::Result<(), String>,
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let result = self.store.transaction(notifier, f);
        self.record(result)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Check the whole composition and rebuild the engine from it.
    pub fn validate(&mut self) -> Result<()> {
        let result = self.rebuild();
        self.record(result)
    }

    fn rebuild(&mut self) -> Result<()> {
        let comp: Arc<Composition> = self.views.snapshot(&self.store);
        kq_store::validate(&comp)?;
        let mut engine = Engine::with_config(comp, self.audio_rate, self.buffer_size, self.config)?;
        if let Some(old) = self.engine.take() {
            engine.resume_from(old)?;
        }
        debug!(
            "engine rebuilt at revision {} ({} Hz, {} frames)",
            self.store.revision(),
            self.audio_rate,
            self.buffer_size
        );
        self.engine = Some(engine);
        self.validated = Some(self.store.revision());
        Ok(())
    }

    fn ready(&mut self) -> Result<&mut Engine> {
        if self.validated != Some(self.store.revision()) || self.engine.is_none() {
            self.rebuild()?;
        }
        self.engine
            .as_mut()
            .ok_or_else(|| Error::argument("no engine"))
    }

    // --- Settings ---

    pub fn audio_rate(&self) -> u32 {
        self.audio_rate
    }

    pub fn set_audio_rate(&mut self, rate: u32) -> Result<()> {
        let result = check_audio_rate(rate);
        self.record(result)?;
        if rate != self.audio_rate {
            self.audio_rate = rate;
            self.engine = None;
        }
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn set_buffer_size(&mut self, frames: usize) -> Result<()> {
        if !(1..=BUFFER_SIZE_MAX).contains(&frames) {
            let err = Error::argument(format!("buffer size {} outside 1..={}", frames, BUFFER_SIZE_MAX));
            return self.record(Err(err));
        }
        if frames != self.buffer_size {
            self.buffer_size = frames;
            self.engine = None;
        }
        Ok(())
    }

    /// Fade length for stolen voices, in milliseconds.
    pub fn set_steal_fade(&mut self, ms: f64) -> Result<()> {
        if !ms.is_finite() || ms < 0.0 {
            return self.record(Err(Error::argument(format!("invalid steal fade {}", ms))));
        }
        self.config.steal_fade_ms = ms;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_steal_fade(ms);
        }
        Ok(())
    }

    // --- Rendering ---

    /// Render up to `frames` frames (at most the buffer size). Returns
    /// fewer only at the end of the song, and 0 after a failed render
    /// until `clear_error`.
    pub fn play(&mut self, frames: usize) -> Result<usize> {
        if self.aborted {
            return Ok(0);
        }
        let engine = match self.ready() {
            Ok(engine) => engine,
            Err(e) => return self.record(Err(e)),
        };
        let result = engine.play(frames);
        if result.is_err() {
            self.aborted = true;
        }
        self.record(result)
    }

    /// Output of the last `play` for channel 0 (left) or 1 (right).
    pub fn get_buffer(&self, channel: usize) -> &[f32] {
        self.engine.as_ref().map_or(&[], |e| e.buffer(channel))
    }

    /// Restart `track` at `nanos` nanoseconds.
    pub fn set_position(&mut self, track: usize, nanos: i64) -> Result<()> {
        let result = self.ready().and_then(|engine| engine.set_position(track, nanos));
        self.record(result)
    }

    /// Current position in nanoseconds.
    pub fn get_position(&self) -> i64 {
        self.engine.as_ref().map_or(0, Engine::position)
    }

    /// Length of `track` in nanoseconds.
    pub fn get_duration(&mut self, track: usize) -> Result<i64> {
        let result = self.ready().and_then(|engine| engine.duration(track));
        self.record(result)
    }

    /// Queue a live event, e.g. `fire_event(0, "n+", &json!(0))`. It takes
    /// effect at the start of the next `play`.
    pub fn fire_event(&mut self, channel: usize, name: &str, arg: &Json) -> Result<()> {
        let result = kq_store::parse_event(name, arg, false)
            .map_err(Error::from)
            .and_then(|event| self.ready()?.fire_event(channel, event));
        self.record(result)
    }

    /// Every event dispatched since the last call, oldest first.
    pub fn receive_events(&mut self) -> Vec<FiredEvent> {
        match self.engine.as_mut() {
            Some(engine) => engine
                .receive_events()
                .iter()
                .map(FiredEvent::from)
                .collect(),
            None => Vec::new(),
        }
    }

    // --- Errors ---

    /// The last error any operation returned.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.aborted = false;
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{}", e);
            self.error = Some(e.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SONG: &[(&str, &str)] = &[
        ("album/p_manifest.json", "{}"),
        ("album/p_tracks.json", "[0]"),
        ("song_00/p_manifest.json", "{}"),
        ("song_00/p_order_list.json", "[[0,0]]"),
        ("pat_000/p_manifest.json", "{}"),
        ("pat_000/p_pattern.json", r#"{"length":[1,0]}"#),
        ("au_00/p_manifest.json", r#"{"type":"instrument"}"#),
        ("au_00/proc_00/p_manifest.json", r#"{"type":"add"}"#),
        ("au_00/p_connections.json", r#"[["proc_00/out_00","out_00"],["proc_00/out_01","out_01"]]"#),
        ("p_connections.json", r#"[["au_00/out_00","out_00"],["au_00/out_01","out_01"]]"#),
    ];

    fn handle() -> Handle {
        let mut h = Handle::new(48000).unwrap();
        for (key, json) in SONG {
            h.set_data(key, json.as_bytes()).unwrap();
        }
        h
    }

    #[test]
    fn rejects_bad_settings_without_changing_state() {
        assert!(Handle::new(0).is_err());
        let mut h = handle();
        assert_eq!(h.set_audio_rate(0).unwrap_err().kind(), ErrorKind::Argument);
        assert_eq!(h.audio_rate(), 48000);
        assert!(h.set_buffer_size(0).is_err());
        assert!(h.set_buffer_size(BUFFER_SIZE_MAX + 1).is_err());
        assert_eq!(h.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert!(h.error().is_some());
        h.clear_error();
        assert!(h.error().is_none());
    }

    #[test]
    fn plays_until_song_end() {
        let mut h = handle();
        h.set_buffer_size(10000).unwrap();
        assert_eq!(h.play(20000).unwrap(), 10000);
        assert_eq!(h.get_buffer(0).len(), 10000);
        assert_eq!(h.play(20000).unwrap(), 10000);
        assert_eq!(h.play(20000).unwrap(), 4000);
        assert_eq!(h.play(20000).unwrap(), 0);
        assert_eq!(h.play(20000).unwrap(), 0);
        h.set_position(0, 0).unwrap();
        assert_eq!(h.play(100).unwrap(), 100);
        assert_eq!(h.get_duration(0).unwrap(), 500_000_000);
    }

    #[test]
    fn timeline_change_keeps_the_position() {
        let mut h = handle();
        h.play(1200).unwrap();
        h.set_data("pat_000/p_pattern.json", br#"{"length":[2,0]}"#).unwrap();
        assert_eq!(h.get_duration(0).unwrap(), 1_000_000_000);
        h.play(1200).unwrap();
        assert_eq!(h.get_position(), 50_000_000);
    }

    #[test]
    fn parameter_change_keeps_the_position() {
        let mut h = handle();
        h.set_buffer_size(4096).unwrap();
        h.play(4096).unwrap();
        h.play(4096).unwrap();
        h.set_data("au_00/proc_00/c/p_s_waveform.json", br#""square""#).unwrap();
        h.play(16).unwrap();
        assert_eq!(h.get_position(), 171_000_000);
    }

    #[test]
    fn unrelated_change_keeps_sounding_voices() {
        let mut h = handle();
        h.fire_event(0, "n+", &json!(0)).unwrap();
        h.play(256).unwrap();
        h.set_data("p_random_seed.json", b"7").unwrap();
        h.play(256).unwrap();
        assert_eq!(h.get_position(), 10_666_667);
        assert!(h.get_buffer(0).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn fixed_composition_plays_without_clearing() {
        let mut h = handle();
        h.set_data("song_00/p_order_list.json", b"[[5,0]]").unwrap();
        assert_eq!(h.play(64).unwrap_err().kind(), ErrorKind::Format);
        h.set_data("song_00/p_order_list.json", b"[[0,0]]").unwrap();
        assert_eq!(h.play(64).unwrap(), 64);
    }

    #[test]
    fn rejected_write_keeps_old_value() {
        let mut h = handle();
        let err = h.set_data("pat_000/p_pattern.json", b"{length").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(h.get_data("pat_000/p_pattern.json").unwrap(), br#"{"length":[1,0]}"#);
        h.validate().unwrap();
    }

    #[test]
    fn live_events_round_trip_through_the_log() {
        let mut h = handle();
        h.fire_event(0, "n+", &json!(-1200)).unwrap();
        h.fire_event(0, ".f", &json!(-6.0)).unwrap();
        assert!(h.fire_event(0, "nope", &json!(null)).is_err());
        assert!(h.fire_event(99, "n-", &json!(null)).is_err());
        h.play(128).unwrap();
        let fired = h.receive_events();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].name, "n+");
        assert_eq!(fired[0].arg, json!(-1200.0));
        assert_eq!(fired[1].arg, json!(-6.0));
        assert!(h.get_buffer(0).iter().any(|&s| s != 0.0));
    }

    #[test]
    fn failed_render_silences_until_cleared() {
        let mut h = handle();
        h.set_data(
            "p_bind.json",
            br#"[{"event":"cv","conditions":[],"targets":[[0,"cv","$"]]}]"#,
        )
        .unwrap();
        h.fire_event(0, "cv", &json!(-1.0)).unwrap();
        let err = h.play(64).unwrap_err();
        assert_eq!(err.format_error().map(|e| e.kind()), Some("binding_depth"));
        assert_eq!(h.play(64).unwrap(), 0);
        h.clear_error();
        assert_eq!(h.play(64).unwrap(), 64);
    }

    #[test]
    fn handle_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Handle>();
    }
}
