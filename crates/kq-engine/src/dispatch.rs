//! Event dispatch: variable resolution, condition blocks, the effect of
//! each event kind and binding expansion.

use kq_ir::{Event, EventArg, EventKind, Result, Timestamp};
use log::{trace, warn};

use crate::bindings::WorkItem;
use crate::global::{JumpKey, PendingJump};
use crate::mixer::{Engine, RunMode};
use crate::processor::NoteStart;
use crate::voice_pool::GroupStart;

impl Engine {
    /// Dispatch `event` on `channel` together with everything its bindings
    /// expand to. `key` identifies the trigger the event came from.
    pub(crate) fn fire(&mut self, channel: usize, event: Event, key: Option<JumpKey>) -> Result<()> {
        self.work.start(channel, event)?;
        while let Some(item) = self.work.next()? {
            let Some(event) = self.resolve(&item) else {
                continue;
            };
            let ch = &self.play.channels[item.channel];
            if !event.kind.is_control_flow() && !ch.conditions.allows() {
                continue;
            }
            if self.mode == RunMode::Render || !event.kind.is_voice_event() {
                self.apply(item.channel, event, key);
            }
            if self.mode == RunMode::Render {
                self.log.push(item.channel, event);
            }
            if self.pending_jump.is_some() {
                self.work.abandon();
                break;
            }

            let resolved = WorkItem { event, ..item };
            let Self {
                work, comp, play, ..
            } = self;
            let locals = &play.channels[item.channel].vars;
            let globals = &play.global.vars;
            work.expand(&resolved, &comp.bindings, |name| {
                locals.get(name).or_else(|| globals.get(name)).copied()
            })?;
        }
        Ok(())
    }

    /// Replace a variable reference by its value, channel-local first.
    fn resolve(&self, item: &WorkItem) -> Option<Event> {
        let EventArg::VarRef(name) = item.event.arg else {
            return Some(item.event);
        };
        let value = self.play.channels[item.channel]
            .vars
            .get(&name)
            .or_else(|| self.play.global.vars.get(&name))
            .copied();
        match value.and_then(|v| v.coerce(item.event.kind.arg_type())) {
            Some(arg) => Some(Event::raw(item.event.kind, arg)),
            None => {
                warn!(
                    "skipping {} on channel {}: ${} is unset or has the wrong type",
                    item.event.kind.name(),
                    item.channel,
                    name
                );
                None
            }
        }
    }

    fn slide_frames(&self, length: Timestamp) -> u64 {
        length
            .to_frames(self.audio_rate, self.play.cursor.tempo())
            .frames
            .max(0) as u64
    }

    fn apply(&mut self, channel: usize, event: Event, key: Option<JumpKey>) {
        trace!("ch {:02}: {} {:?}", channel, event.kind.name(), event.arg);
        let arg = event.arg;
        let step = self.config.slide_step;
        let float = arg.as_float().unwrap_or(0.0);
        let stamp = arg.as_timestamp().unwrap_or(Timestamp::ZERO);
        match event.kind {
            EventKind::Comment => {}
            EventKind::If => {
                let holds = arg.as_bool().unwrap_or(false);
                self.play.channels[channel].conditions.open(holds);
            }
            EventKind::Else => self.play.channels[channel].conditions.invert(),
            EventKind::EndIf => self.play.channels[channel].conditions.close(),
            EventKind::VarName => self.play.channels[channel].var_name = arg.as_name().copied(),
            EventKind::SetGlobalVar => {
                let ch = &self.play.channels[channel];
                if let (Some(name), Some(value)) = (ch.var_name, arg.to_value()) {
                    if !self.play.global.set_var(name, value) {
                        warn!("global variable table is full, dropping ${}", name);
                    }
                }
            }
            EventKind::SetLocalVar => {
                let ch = &mut self.play.channels[channel];
                if let (Some(name), Some(value)) = (ch.var_name, arg.to_value()) {
                    if !ch.set_var(name, value) {
                        warn!("channel {} variable table is full, dropping ${}", channel, name);
                    }
                }
            }

            EventKind::Tempo => self.play.global.tempo.set(clamp_bpm(float)),
            EventKind::TempoSlide => {
                let frames = self.slide_frames(self.play.global.tempo_slide_len);
                self.play.global.tempo.start(clamp_bpm(float), frames, step);
            }
            EventKind::TempoSlideLength => self.play.global.tempo_slide_len = stamp,
            EventKind::GlobalVolume => self.play.global.volume.set(float),
            EventKind::VolumeSlide => {
                let frames = self.slide_frames(self.play.global.volume_slide_len);
                self.play.global.volume.start(float, frames, step);
            }
            EventKind::VolumeSlideLength => self.play.global.volume_slide_len = stamp,
            EventKind::JumpCounter => {
                self.play.global.jump_counter = arg.as_int().unwrap_or(0).max(0);
            }
            EventKind::JumpPattern => {
                if let EventArg::PatInst(inst) = arg {
                    self.play.global.jump_target = Some(inst);
                }
            }
            EventKind::JumpRow => self.play.global.jump_row = stamp,
            EventKind::Jump => self.jump(key),

            EventKind::AudioUnit => match arg.as_int() {
                Some(unit) if unit >= 0 => {
                    let ch = &mut self.play.channels[channel];
                    ch.unit = unit as usize;
                    ch.control_applied = None;
                }
                _ => warn!("channel {}: invalid audio unit {:?}", channel, arg),
            },
            EventKind::Expression => self.play.channels[channel].expression = arg.as_name().copied(),
            EventKind::NoteOn => self.note_on(channel, float, None),
            EventKind::Hit => match arg.as_int() {
                Some(hit) if hit >= 0 => self.note_on(channel, 0.0, Some(hit as usize)),
                _ => warn!("channel {}: invalid hit {:?}", channel, arg),
            },
            EventKind::NoteOff => self.release_foreground(channel),
            EventKind::ChannelVolume => self.play.channels[channel].volume_db = float,

            EventKind::Force => self.play.channels[channel].force.set(float),
            EventKind::ForceSlide => {
                let frames = self.slide_frames(self.play.channels[channel].force_slide_len);
                self.play.channels[channel].force.start(float, frames, step);
            }
            EventKind::ForceSlideLength => self.play.channels[channel].force_slide_len = stamp,
            EventKind::PitchSlide => {
                let frames = self.slide_frames(self.play.channels[channel].pitch_slide_len);
                self.play.channels[channel].pitch.start(float, frames, step);
            }
            EventKind::PitchSlideLength => self.play.channels[channel].pitch_slide_len = stamp,

            EventKind::ControlName => {
                let ch = &mut self.play.channels[channel];
                ch.control_name = arg.as_name().copied();
                ch.control_applied = None;
            }
            EventKind::Control => {
                let ch = &mut self.play.channels[channel];
                ch.control.set(float);
                ch.control_applied = None;
            }
            EventKind::ControlSlide => {
                let frames = self.slide_frames(self.play.channels[channel].control_slide_len);
                self.play.channels[channel].control.start(float, frames, step);
            }
            EventKind::ControlSlideLength => self.play.channels[channel].control_slide_len = stamp,
        }
    }

    /// Queue a jump to the current jump target if the trigger's counter
    /// allows it.
    fn jump(&mut self, key: Option<JumpKey>) {
        let cursor = &self.play.cursor;
        let Some(song) = cursor.song() else {
            return;
        };
        let Some(target) = self.play.global.jump_target.or(cursor.inst()) else {
            return;
        };
        let Some(position) = song.position_of(target) else {
            warn!(
                "jump target [{}, {}] is not in the current song",
                target.pattern, target.instance
            );
            return;
        };
        let row = self.play.global.jump_row;
        let in_range = self
            .comp
            .instance_pattern(target)
            .is_some_and(|p| !row.is_negative() && row < p.length);
        if !in_range {
            warn!("jump row {:?} is outside pattern {}", row, target.pattern);
            return;
        }
        if self.play.global.take_jump(key) {
            self.pending_jump = Some(PendingJump { position, row });
        }
    }

    /// Start a voice group on the channel's audio unit. The previous
    /// foreground note is released first.
    fn note_on(&mut self, channel: usize, pitch: f64, hit: Option<usize>) {
        self.release_foreground(channel);
        let audio_rate = self.audio_rate;
        let Self {
            play, units, pool, ..
        } = self;
        let ch = &mut play.channels[channel];
        let Some(unit) = units.get(ch.unit).and_then(Option::as_ref) else {
            warn!("channel {}: no audio unit {}", channel, ch.unit);
            return;
        };
        if !unit.has_voices() || hit.is_some_and(|h| !unit.has_hit(h)) {
            return;
        }
        let plan = unit.plan_for(hit, ch.expression.as_ref());
        if hit.is_none() {
            ch.pitch.set(pitch);
        }
        let note = NoteStart {
            pitch,
            force: ch.force.value(),
            hit,
            seed: ch.rng.u64(..),
            audio_rate,
        };
        let start = GroupStart {
            channel,
            unit: ch.unit,
            plan,
            pitch,
            force: note.force,
        };
        ch.foreground = pool.start(start, &unit.plan(plan).slots, |slot, state| {
            *state = unit.allocate_state(slot, &note);
        });
        if ch.foreground.is_none() {
            warn!("channel {}: no voices left for a new note", channel);
        }
    }

    /// Release the channel's foreground group. Groups without a processor
    /// that handles release get a short fade instead.
    fn release_foreground(&mut self, channel: usize) {
        let Some(key) = self.play.channels[channel].foreground.take() else {
            return;
        };
        let Some(group) = self.pool.get(key) else {
            return;
        };
        let handled = self
            .units
            .get(group.unit)
            .and_then(Option::as_ref)
            .is_some_and(|u| u.plan(group.plan).handles_release);
        if self.pool.release(key) && !handled {
            self.pool.fade_out(key, self.release_frames);
        }
    }
}

fn clamp_bpm(bpm: f64) -> f64 {
    bpm.clamp(kq_ir::Tempo::MIN_BPM, kq_ir::Tempo::MAX_BPM)
}
