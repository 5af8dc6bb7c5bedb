//! Playback cursor: walks a song's order list and finds trigger
//! boundaries on the frame grid.
//!
//! Position is kept as a segment origin (exact, pattern-relative) plus the
//! whole frames rendered since then. A trigger at `pos` fires on the first
//! frame at or after it. Tempo changes and pattern changes open a new
//! segment, so converting between frames and beats never drifts.

use alloc::sync::Arc;
use alloc::vec::Vec;

use kq_ir::{
    Composition, Event, FormatError, PatInstRef, Pattern, Song, Tempo, Timestamp, COLUMNS_MAX,
};
use log::{debug, trace};

use crate::global::JumpKey;

/// Slices after which a duration measurement gives up.
pub const DURATION_SLICES_MAX: u64 = 10_000_000;

/// A trigger due at the current boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DueTrigger {
    pub channel: usize,
    pub key: JumpKey,
    pub event: Event,
}

#[derive(Clone, Debug)]
struct Current {
    inst: PatInstRef,
    pattern: Arc<Pattern>,
}

#[derive(Clone, Debug)]
pub struct Cursor {
    /// Album track being played
    pub track: usize,
    song: Option<Arc<Song>>,
    /// Order-list position
    position: usize,
    current: Option<Current>,
    /// Pattern whose end-of-pattern triggers are still due
    carry: Option<Current>,
    /// Pattern-relative start of the segment
    origin: Timestamp,
    /// Frames since the segment start
    elapsed: u64,
    tempo: Tempo,
    audio_rate: u32,
    /// Next unfired trigger per column
    next: [u32; COLUMNS_MAX],
    /// Nanoseconds played before the segment start
    nanos: i64,
}

impl Cursor {
    /// Cursor at the start of album track `track`. A missing or empty song
    /// gives a finished cursor.
    pub fn new(comp: &Composition, track: usize, tempo: Tempo, audio_rate: u32) -> Self {
        let mut cursor = Self {
            track,
            song: comp.track(track).cloned(),
            position: 0,
            current: None,
            carry: None,
            origin: Timestamp::ZERO,
            elapsed: 0,
            tempo,
            audio_rate,
            next: [0; COLUMNS_MAX],
            nanos: 0,
        };
        cursor.enter(comp, 0, Timestamp::ZERO);
        cursor
    }

    fn enter(&mut self, comp: &Composition, position: usize, row: Timestamp) {
        self.position = position;
        self.current = self.song.as_ref().and_then(|song| {
            let inst = *song.order.get(position)?;
            let pattern = comp.instance_pattern(inst)?.clone();
            Some(Current { inst, pattern })
        });
        self.origin = row;
        self.elapsed = 0;
        match &self.current {
            Some(cur) => {
                for (next, column) in self.next.iter_mut().zip(cur.pattern.columns()) {
                    *next = column.first_at_or_after(row) as u32;
                }
                trace!("entered order position {} at {:?}", position, row);
            }
            None => debug!("track {} ends at order position {}", self.track, position),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    pub fn song(&self) -> Option<&Arc<Song>> {
        self.song.as_ref()
    }

    pub fn inst(&self) -> Option<PatInstRef> {
        self.current.as_ref().map(|c| c.inst)
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Exact pattern-relative position.
    pub fn row(&self) -> Timestamp {
        self.origin + Timestamp::from_frames(self.elapsed as i64, self.audio_rate, self.tempo)
    }

    /// Playback time since the start of the track.
    pub fn nanos(&self) -> i64 {
        self.nanos.saturating_add(self.segment_nanos())
    }

    /// Nanoseconds of the frames played in the current segment, rounded.
    fn segment_nanos(&self) -> i64 {
        let rate = self.audio_rate.max(1) as i128;
        ((self.elapsed as i128 * 1_000_000_000 + rate / 2) / rate) as i64
    }

    fn frame_of(&self, pos: Timestamp) -> u64 {
        (pos - self.origin)
            .to_frames_ceil(self.audio_rate, self.tempo)
            .max(0) as u64
    }

    fn end_frame(&self) -> u64 {
        self.current
            .as_ref()
            .map_or(0, |cur| self.frame_of(cur.pattern.length))
    }

    /// True when the pattern has been played to its end.
    pub fn at_pattern_end(&self) -> bool {
        self.current.is_some() && self.elapsed >= self.end_frame()
    }

    /// Frames until the next trigger or the pattern end, whichever is first.
    pub fn frames_to_boundary(&self) -> u64 {
        let Some(cur) = &self.current else { return 0 };
        let length = cur.pattern.length;
        let mut frame = self.end_frame();
        for (column, &next) in cur.pattern.columns().iter().zip(&self.next) {
            if let Some(t) = column.triggers().get(next as usize) {
                if t.pos < length {
                    frame = frame.min(self.frame_of(t.pos));
                }
            }
        }
        frame.saturating_sub(self.elapsed)
    }

    /// Collect the triggers due now, ordered by channel then ordinal.
    /// Triggers carried over from the previous pattern's end come first
    /// within their channel.
    pub fn collect_due(&mut self, out: &mut Vec<DueTrigger>) -> Result<(), FormatError> {
        out.clear();
        let carry = self.carry.take();
        let Some(cur) = self.current.clone() else {
            return Ok(());
        };
        let limit = out.capacity();
        let push = |out: &mut Vec<DueTrigger>, item: DueTrigger| {
            if out.len() >= limit {
                return Err(FormatError::BindingOverflow { limit });
            }
            out.push(item);
            Ok(())
        };

        for channel in 0..COLUMNS_MAX {
            if let Some(prev) = &carry {
                let column = prev.pattern.column(channel);
                let start = column.first_at_or_after(prev.pattern.length);
                for (i, t) in column.triggers().iter().enumerate().skip(start) {
                    if t.pos != prev.pattern.length {
                        break;
                    }
                    push(out, due(channel, prev.inst, i, t.event))?;
                }
            }
            let column = cur.pattern.column(channel);
            let triggers = column.triggers();
            let mut next = self.next[channel] as usize;
            while let Some(t) = triggers.get(next) {
                if t.pos >= cur.pattern.length || self.frame_of(t.pos) > self.elapsed {
                    break;
                }
                push(out, due(channel, cur.inst, next, t.event))?;
                next += 1;
            }
            self.next[channel] = next as u32;
        }
        Ok(())
    }

    pub fn advance(&mut self, frames: u64) {
        self.elapsed += frames;
    }

    /// Open a new segment at the current position if the tempo changed.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        if tempo == self.tempo {
            return;
        }
        let segment = Timestamp::from_frames(self.elapsed as i64, self.audio_rate, self.tempo);
        self.nanos = self.nanos.saturating_add(self.segment_nanos());
        self.origin += segment;
        self.elapsed = 0;
        self.tempo = tempo;
    }

    /// Move on to the next order-list entry after reaching the pattern end.
    pub fn next_pattern(&mut self, comp: &Composition) {
        let Some(cur) = self.current.take() else { return };
        let length = cur.pattern.length;
        let overshoot = self.row() - length;
        self.nanos = self.nanos.saturating_add((length - self.origin).to_nanos(self.tempo));
        self.enter(comp, self.position + 1, Timestamp::ZERO);
        if !self.is_finished() {
            self.origin = overshoot;
            self.carry = Some(cur);
        }
    }

    /// Continue at `row` of order-list position `position`.
    pub fn jump(&mut self, comp: &Composition, position: usize, row: Timestamp) {
        self.nanos = self.nanos.saturating_add(self.segment_nanos());
        self.carry = None;
        self.enter(comp, position, row);
    }
}

fn due(channel: usize, inst: PatInstRef, index: usize, event: Event) -> DueTrigger {
    DueTrigger {
        channel,
        key: JumpKey {
            inst,
            column: channel as u8,
            trigger: index as u32,
        },
        event,
    }
}
