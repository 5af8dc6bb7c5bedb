//! Main playback engine.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use kq_ir::graph::{execution_order, GraphLevel};
use kq_ir::{AudioBuffer, Composition, Endpoint, Error, Event, FormatError, Result, CHANNELS};
use log::debug;

use crate::bindings::WorkList;
use crate::channel::{channel_seed, ChannelState};
use crate::config::EngineConfig;
use crate::event_queue::{ChannelEvent, EventLog, LiveQueue};
use crate::frequency::db_to_scale;
use crate::global::{GlobalState, PendingJump};
use crate::processors::force::DEFAULT_RELEASE_FADE;
use crate::scheduler::{Cursor, DueTrigger, DURATION_SLICES_MAX};
use crate::unit::UnitRuntime;
use crate::voice::GroupKey;
use crate::voice_pool::VoicePool;

/// Largest render buffer in frames.
pub const BUFFER_SIZE_MAX: usize = 1_048_576;

/// Render buffer size of a new handle.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Accepted audio rates.
pub const AUDIO_RATE_RANGE: core::ops::RangeInclusive<u32> = 8_000..=192_000;

/// Number of output channels.
pub const OUTPUT_CHANNELS: usize = 2;

/// How the slice loop treats events and audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Dispatch everything and produce audio.
    Render,
    /// Fast-forward: skip voice events and audio, keep everything else.
    Seek,
    /// Like `Seek`, but leave the audio units untouched.
    Measure,
}

/// Edge between two units, or from a unit to the master output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct UnitLink {
    pub src: usize,
    pub src_port: usize,
    /// `None` is the master output.
    pub dst: Option<usize>,
    pub dst_port: usize,
}

/// Everything a seek resets and a duration measurement saves.
#[derive(Clone, Debug)]
pub(crate) struct Playback {
    pub cursor: Cursor,
    pub global: GlobalState,
    pub channels: Vec<ChannelState>,
}

impl Playback {
    fn start(comp: &Composition, track: usize, audio_rate: u32) -> Self {
        let song = comp.track(track);
        let global = GlobalState::new(song.map(|s| &**s));
        Self {
            cursor: Cursor::new(comp, track, global.tempo(), audio_rate),
            global,
            channels: (0..CHANNELS)
                .map(|c| ChannelState::new(comp.channel_default(c), channel_seed(comp.random_seed, c)))
                .collect(),
        }
    }
}

/// The playback engine of one composition at a fixed audio rate and
/// buffer size.
pub struct Engine {
    pub(crate) comp: Arc<Composition>,
    pub(crate) config: EngineConfig,
    pub(crate) audio_rate: u32,
    buffer_size: usize,
    pub(crate) play: Playback,
    /// Unit runtimes indexed by unit number
    pub(crate) units: Vec<Option<UnitRuntime>>,
    unit_order: Vec<usize>,
    links: Vec<UnitLink>,
    pub(crate) pool: VoicePool,
    keys: Vec<GroupKey>,
    due: Vec<DueTrigger>,
    pub(crate) work: WorkList,
    live: LiveQueue,
    pub(crate) log: EventLog,
    output: AudioBuffer,
    rendered: usize,
    pub(crate) mode: RunMode,
    pub(crate) pending_jump: Option<PendingJump>,
    /// Fade applied on note-off when no processor handles release
    pub(crate) release_frames: u64,
}

/// True if both compositions share every song, pattern and the album.
fn same_timeline(a: &Composition, b: &Composition) -> bool {
    fn same<T>(x: &BTreeMap<usize, Arc<T>>, y: &BTreeMap<usize, Arc<T>>) -> bool {
        x.len() == y.len() && x.iter().zip(y).all(|((i, p), (j, q))| i == j && Arc::ptr_eq(p, q))
    }
    let album = match (&a.album, &b.album) {
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        (None, None) => true,
        _ => false,
    };
    album && same(&a.songs, &b.songs) && same(&a.patterns, &b.patterns)
}

fn ms_to_frames(ms: f64, audio_rate: u32) -> u64 {
    libm::round(ms.max(0.0) * audio_rate as f64 / 1000.0) as u64
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new(comp: Arc<Composition>, audio_rate: u32, buffer_size: usize) -> Result<Self> {
        Self::with_config(comp, audio_rate, buffer_size, EngineConfig::default())
    }

    pub fn with_config(
        comp: Arc<Composition>,
        audio_rate: u32,
        buffer_size: usize,
        config: EngineConfig,
    ) -> Result<Self> {
        if !AUDIO_RATE_RANGE.contains(&audio_rate) {
            return Err(Error::argument(alloc::format!("unsupported audio rate {}", audio_rate)));
        }
        if !(1..=BUFFER_SIZE_MAX).contains(&buffer_size) {
            return Err(Error::argument(alloc::format!("unsupported buffer size {}", buffer_size)));
        }
        let config = config.sanitized();

        let unit_count = comp.units.keys().next_back().map_or(0, |&i| i + 1);
        let mut units = Vec::new();
        units.try_reserve_exact(unit_count)?;
        units.resize_with(unit_count, || None);
        for (&index, unit) in &comp.units {
            units[index] = Some(UnitRuntime::new(index, unit, audio_rate, buffer_size)?);
        }

        let devices: Vec<usize> = comp.units.keys().copied().collect();
        let pairs: Vec<(usize, usize)> = comp
            .connections
            .iter()
            .filter_map(|e| e.device_pair())
            .collect();
        let unit_order = execution_order(&devices, &pairs, GraphLevel::Top)?;
        let links = resolve_links(&comp, &units);

        let group_voices = units.iter().flatten().map(UnitRuntime::max_group_voices).max().unwrap_or(0);
        let scratch_len = units
            .iter()
            .flatten()
            .map(|u| u.scratch_len(audio_rate))
            .max()
            .unwrap_or(0);
        let mut pool = VoicePool::new(&config, group_voices, scratch_len)?;
        pool.set_steal_fade(ms_to_frames(config.steal_fade_ms, audio_rate));

        let mut keys = Vec::new();
        keys.try_reserve_exact(pool.group_capacity())?;
        let mut due = Vec::new();
        due.try_reserve_exact(config.events_per_slice)?;

        debug!(
            "engine: {} units, {} links, rate {}, buffer {}",
            comp.units.len(),
            links.len(),
            audio_rate,
            buffer_size
        );
        Ok(Self {
            play: Playback::start(&comp, 0, audio_rate),
            work: WorkList::new(&config),
            log: EventLog::with_capacity(config.event_log_capacity)?,
            output: AudioBuffer::try_new(OUTPUT_CHANNELS, buffer_size)?,
            release_frames: ms_to_frames(DEFAULT_RELEASE_FADE * 1000.0, audio_rate),
            comp,
            config,
            audio_rate,
            buffer_size,
            units,
            unit_order,
            links,
            pool,
            keys,
            due,
            live: LiveQueue::new(),
            rendered: 0,
            mode: RunMode::Render,
            pending_jump: None,
        })
    }

    pub fn audio_rate(&self) -> u32 {
        self.audio_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn composition(&self) -> &Arc<Composition> {
        &self.comp
    }

    /// Album track being played.
    pub fn track(&self) -> usize {
        self.play.cursor.track
    }

    /// True once the cursor has left the last order-list entry.
    pub fn is_finished(&self) -> bool {
        self.play.cursor.is_finished()
    }

    /// Voice groups currently sounding, including fading ones.
    pub fn active_groups(&self) -> usize {
        self.pool.len()
    }

    /// Render up to `frames` frames (capped at the buffer size). Returns
    /// fewer frames only at the end of the track.
    ///
    /// On error the rest of the buffer stays silent.
    pub fn play(&mut self, frames: usize) -> Result<usize> {
        let frames = frames.min(self.buffer_size);
        self.output.silence_range(frames);
        self.rendered = 0;
        self.mode = RunMode::Render;
        let mut done = 0;
        #[cfg(feature = "alloc_check")]
        let result = assert_no_alloc::assert_no_alloc(|| self.render(frames as u64, &mut done));
        #[cfg(not(feature = "alloc_check"))]
        let result = self.render(frames as u64, &mut done);
        self.rendered = done as usize;
        result.map(|_| self.rendered)
    }

    fn render(&mut self, frames: u64, done: &mut u64) -> Result<()> {
        self.dispatch_live()?;
        self.run(frames, done)
    }

    /// Output of the last `play` call for `channel` (0 = left, 1 = right).
    pub fn buffer(&self, channel: usize) -> &[f32] {
        if channel >= OUTPUT_CHANNELS {
            return &[];
        }
        &self.output.channel(channel)[..self.rendered]
    }

    /// Restart playback of `track` and fast-forward to `nanos`.
    pub fn set_position(&mut self, track: usize, nanos: i64) -> Result<()> {
        if nanos < 0 {
            return Err(Error::argument("negative position"));
        }
        if self.comp.track(track).is_none() && !self.comp.songs.is_empty() {
            return Err(Error::argument(alloc::format!("no song at track {}", track)));
        }
        self.play = Playback::start(&self.comp, track, self.audio_rate);
        self.pool.clear();
        for unit in self.units.iter_mut().flatten() {
            unit.reset();
        }
        self.live.clear();
        self.pending_jump = None;
        self.rendered = 0;

        let frames = (nanos as i128 * self.audio_rate as i128 / 1_000_000_000) as u64;
        self.mode = RunMode::Seek;
        let mut done = 0;
        let result = self.run(frames, &mut done);
        self.mode = RunMode::Render;
        debug!("seek to {} ns of track {} landed on frame {}", nanos, track, done);
        result
    }

    /// Continue where `old`, an engine built from an earlier version of
    /// the same composition, left off.
    ///
    /// With songs and patterns unchanged, playback state and queued
    /// events move over as they are. Otherwise the old position is found
    /// again by seeking. Units whose definition did not change keep their
    /// state and sounding voices.
    pub fn resume_from(&mut self, mut old: Engine) -> Result<()> {
        if old.audio_rate != self.audio_rate || old.buffer_size != self.buffer_size {
            return Ok(());
        }
        if !same_timeline(&old.comp, &self.comp) {
            let track = old.track();
            if self.comp.track(track).is_none() {
                debug!("track {} is gone, restarting", track);
                return Ok(());
            }
            let nanos = old.position();
            debug!("timeline changed, seeking back to {} ns", nanos);
            return self.set_position(track, nanos);
        }

        for (&index, unit) in &self.comp.units {
            let kept = old.comp.units.get(&index).is_some_and(|u| Arc::ptr_eq(u, unit));
            if kept {
                if let (Some(new), Some(prev)) = (self.units.get_mut(index), old.units.get_mut(index)) {
                    if prev.is_some() {
                        core::mem::swap(new, prev);
                    }
                }
            }
        }
        let keep_voices = self.pool.same_shape(&old.pool);
        if keep_voices {
            let (new, prev) = (&self.comp, &old.comp);
            old.pool.retain_units(|u| match (new.units.get(&u), prev.units.get(&u)) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            });
            core::mem::swap(&mut self.pool, &mut old.pool);
        }

        self.play = old.play;
        if !keep_voices {
            for ch in &mut self.play.channels {
                ch.foreground = None;
            }
        }
        self.pending_jump = old.pending_jump;
        self.live = old.live;
        self.log = old.log;
        debug!(
            "resumed at {} ns with {} voice groups",
            self.position(),
            self.pool.len()
        );
        Ok(())
    }

    /// Playback position in nanoseconds from the start of the track.
    pub fn position(&self) -> i64 {
        self.play.cursor.nanos()
    }

    /// Length of `track` in nanoseconds, following jumps and tempo changes.
    /// Leaves the playback state as it was.
    pub fn duration(&mut self, track: usize) -> Result<i64> {
        if self.comp.track(track).is_none() {
            return Ok(0);
        }
        let saved = core::mem::replace(&mut self.play, Playback::start(&self.comp, track, self.audio_rate));
        let saved_jump = self.pending_jump.take();
        self.mode = RunMode::Measure;
        let mut done = 0;
        let result = self.run(u64::MAX, &mut done);
        let nanos = self.play.cursor.nanos();
        self.mode = RunMode::Render;
        self.play = saved;
        self.pending_jump = saved_jump;
        result.map(|_| nanos)
    }

    /// Queue an event for dispatch at the start of the next `play`.
    pub fn fire_event(&mut self, channel: usize, event: Event) -> Result<()> {
        if channel >= CHANNELS {
            return Err(Error::argument(alloc::format!("channel {} out of range", channel)));
        }
        self.live.push(channel, event)
    }

    /// Take every event dispatched since the last call.
    pub fn receive_events(&mut self) -> Vec<ChannelEvent> {
        self.log.drain()
    }

    pub fn set_steal_fade(&mut self, ms: f64) {
        self.config.steal_fade_ms = ms;
        self.config = self.config.sanitized();
        self.pool
            .set_steal_fade(ms_to_frames(self.config.steal_fade_ms, self.audio_rate));
    }

    fn dispatch_live(&mut self) -> Result<()> {
        if self.live.is_empty() {
            return Ok(());
        }
        self.begin_boundary();
        while let Some(ev) = self.live.pop() {
            self.fire(ev.channel, ev.event, None)?;
        }
        Ok(())
    }

    fn begin_boundary(&mut self) {
        self.work.begin_slice();
        self.clear_conditions();
    }

    fn clear_conditions(&mut self) {
        for ch in &mut self.play.channels {
            ch.conditions.clear();
        }
    }

    /// Process everything due at the current frame: jumps, triggers and
    /// pattern changes, until the cursor rests inside a pattern.
    ///
    /// Jumps taken at one frame share a single event budget.
    fn boundary(&mut self) -> Result<()> {
        self.work.begin_slice();
        loop {
            if let Some(jump) = self.pending_jump.take() {
                self.work.charge()?;
                self.play.cursor.jump(&self.comp, jump.position, jump.row);
            }
            self.clear_conditions();
            self.play.cursor.collect_due(&mut self.due)?;
            for i in 0..self.due.len() {
                let due = self.due[i];
                self.fire(due.channel, due.event, Some(due.key))?;
                if self.pending_jump.is_some() {
                    break;
                }
            }
            if self.pending_jump.is_some() {
                continue;
            }
            self.play.cursor.set_tempo(self.play.global.tempo());
            if self.play.cursor.at_pattern_end() {
                self.play.cursor.next_pattern(&self.comp);
                continue;
            }
            return Ok(());
        }
    }

    /// Run the slice loop for up to `frames` frames, counting them in `done`.
    fn run(&mut self, frames: u64, done: &mut u64) -> Result<()> {
        let mut slices = 0u64;
        while *done < frames && !self.play.cursor.is_finished() {
            self.boundary()?;
            if self.play.cursor.is_finished() {
                break;
            }
            let mut slice = (frames - *done).min(self.play.cursor.frames_to_boundary());
            if let Some(n) = self.play.global.frames_to_update() {
                slice = slice.min(n);
            }
            for ch in &self.play.channels {
                if let Some(n) = ch.frames_to_update() {
                    slice = slice.min(n);
                }
            }
            let slice = slice.max(1);

            self.apply_controls();
            if self.mode == RunMode::Render {
                self.render_slice(*done as usize, slice as usize);
            }
            self.play.global.advance(slice);
            for ch in &mut self.play.channels {
                ch.advance(slice);
            }
            self.play.cursor.advance(slice);
            self.play.cursor.set_tempo(self.play.global.tempo());
            *done += slice;

            slices += 1;
            if self.mode == RunMode::Measure && slices > DURATION_SLICES_MAX {
                return Err(FormatError::DurationLimit {
                    slices: DURATION_SLICES_MAX,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Hand control slides to the units and note slides to the foreground
    /// groups.
    fn apply_controls(&mut self) {
        let Self {
            play,
            units,
            pool,
            mode,
            ..
        } = self;
        for ch in &mut play.channels {
            if let Some((name, value)) = ch.pending_control() {
                if *mode != RunMode::Measure {
                    if let Some(unit) = units.get_mut(ch.unit).and_then(Option::as_mut) {
                        unit.set_control(&name, value);
                    }
                }
                ch.control_applied = Some(value);
            }
            if let Some(key) = ch.foreground {
                match pool.get_mut(key) {
                    Some(group) => {
                        group.pitch = ch.pitch.value();
                        group.force = ch.force.value();
                    }
                    None => ch.foreground = None,
                }
            }
        }
    }

    fn render_slice(&mut self, offset: usize, frames: usize) {
        let rate = self.audio_rate;
        let Self {
            units,
            unit_order,
            links,
            pool,
            keys,
            play,
            output,
            ..
        } = self;

        for &u in unit_order.iter() {
            let Some(mut unit) = units[u].take() else { continue };
            unit.begin_slice(frames);
            for l in links.iter().filter(|l| l.dst == Some(u)) {
                let Some(src) = units[l.src].as_ref() else { continue };
                let from = &src.output.channel(l.src_port)[..frames];
                let to = &mut unit.input.channel_mut(l.dst_port)[..frames];
                for (t, f) in to.iter_mut().zip(from) {
                    *t += f;
                }
            }
            if unit.has_voices() {
                pool.collect_unit(u, keys);
                for &key in keys.iter() {
                    let gain = pool
                        .get(key)
                        .map_or(1.0, |g| db_to_scale(play.channels[g.channel].volume_db) as f32);
                    unit.render_group(pool, key, frames, rate, gain);
                }
            }
            unit.render_mixed(frames, rate);
            units[u] = Some(unit);
        }

        let gain = db_to_scale(play.global.volume.value()) as f32;
        for l in links.iter().filter(|l| l.dst.is_none()) {
            let Some(src) = units[l.src].as_ref() else { continue };
            let from = &src.output.channel(l.src_port)[..frames];
            let to = &mut output.channel_mut(l.dst_port)[offset..offset + frames];
            for (t, f) in to.iter_mut().zip(from) {
                *t += f * gain;
            }
        }
        pool.reap();
    }
}

/// Top-level edges between existing units and ports.
fn resolve_links(comp: &Composition, units: &[Option<UnitRuntime>]) -> Vec<UnitLink> {
    let unit = |i: usize| units.get(i).and_then(Option::as_ref);
    comp.connections
        .iter()
        .filter_map(|edge| {
            let Endpoint::Device { index: src, port: src_port } = edge.from else {
                return None;
            };
            if src_port >= unit(src)?.output.channels() {
                return None;
            }
            let (dst, dst_port) = match edge.to {
                Endpoint::Device { index, port } => {
                    (port < unit(index)?.input.channels()).then_some((Some(index), port))?
                }
                Endpoint::Interface { port } => (port < OUTPUT_CHANNELS).then_some((None, port))?,
            };
            Some(UnitLink {
                src,
                src_port,
                dst,
                dst_port,
            })
        })
        .collect()
}
