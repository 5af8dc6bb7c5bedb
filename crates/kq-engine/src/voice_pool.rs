//! VoicePool: group allocation, stealing and the voice arena.

use alloc::vec::Vec;

use kq_ir::{Error, Result};
use log::{trace, warn};
use slotmap::SlotMap;

use crate::config::EngineConfig;
use crate::processor::VoiceState;
use crate::voice::{Fade, GroupKey, GroupPhase, Voice, VoiceGroup, VoiceId};

/// Parameters of a group about to start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupStart {
    pub channel: usize,
    pub unit: usize,
    pub plan: usize,
    pub pitch: f64,
    pub force: f64,
}

/// Fixed-capacity pool of voice groups.
///
/// Groups live in a slot map sized once; their voices are chained through
/// an arena whose free slots form a linked list. Nothing here allocates
/// after `new`.
pub struct VoicePool {
    groups: SlotMap<GroupKey, VoiceGroup>,
    voices: Vec<Voice>,
    free: Option<VoiceId>,
    free_voices: usize,
    /// Groups that may sound before stealing starts.
    limit: usize,
    /// Extra group slots for stolen groups still fading.
    reserve: usize,
    serial: u64,
    steal_fade: u64,
}

impl VoicePool {
    /// Create a pool for groups of up to `group_voices` voices, each voice
    /// owning `scratch_len` frames of scratch space.
    pub fn new(config: &EngineConfig, group_voices: usize, scratch_len: usize) -> Result<Self> {
        let limit = config.voice_limit.max(1);
        let reserve = config.fade_reserve();
        let group_slots = limit + reserve;
        let voice_slots = group_slots
            .checked_mul(group_voices.max(1))
            .ok_or_else(|| Error::memory("voice arena size overflow"))?;

        let mut voices = Vec::new();
        voices.try_reserve_exact(voice_slots)?;
        for i in 0..voice_slots {
            let mut scratch = Vec::new();
            scratch.try_reserve_exact(scratch_len)?;
            scratch.resize(scratch_len, 0.0);
            let mut voice = Voice::new(scratch);
            voice.next = (i + 1 < voice_slots).then_some(i as VoiceId + 1);
            voices.push(voice);
        }

        Ok(Self {
            groups: SlotMap::with_capacity_and_key(group_slots),
            free: (voice_slots > 0).then_some(0),
            free_voices: voice_slots,
            voices,
            limit,
            reserve,
            serial: 0,
            steal_fade: 0,
        })
    }

    /// Fade length of stolen groups in frames.
    pub fn set_steal_fade(&mut self, frames: u64) {
        self.steal_fade = frames;
    }

    /// Start a group with one voice per entry of `slots`, stealing if the
    /// limit is reached. `init` fills in each voice's state.
    pub fn start(
        &mut self,
        start: GroupStart,
        slots: &[usize],
        mut init: impl FnMut(usize, &mut VoiceState),
    ) -> Option<GroupKey> {
        if slots.len() > self.voices.len() {
            warn!("note needs {} voices, arena holds {}", slots.len(), self.voices.len());
            return None;
        }
        let victim = if self.active_count() >= self.limit {
            self.steal(start.channel)
        } else {
            None
        };
        while self.stolen_count() > self.reserve {
            if !self.kill_quietest(victim) {
                break;
            }
        }
        while self.free_voices < slots.len() {
            if !self.kill_quietest(victim) && !self.kill_quietest(None) && !self.kill_oldest() {
                return None;
            }
        }

        let mut first = None;
        let mut last: Option<VoiceId> = None;
        for &slot in slots {
            let id = self.free?;
            let voice = &mut self.voices[id as usize];
            self.free = voice.next;
            self.free_voices -= 1;
            voice.slot = slot;
            voice.next = None;
            voice.scratch.fill(0.0);
            init(slot, &mut voice.state);
            match last {
                Some(prev) => self.voices[prev as usize].next = Some(id),
                None => first = Some(id),
            }
            last = Some(id);
        }

        self.serial += 1;
        let key = self.groups.insert(VoiceGroup {
            channel: start.channel,
            unit: start.unit,
            plan: start.plan,
            serial: self.serial,
            phase: GroupPhase::Active,
            fade: None,
            pitch: start.pitch,
            force: start.force,
            finished: false,
            first,
            voices: slots.len(),
        });
        trace!("group {:?} started on channel {}", key, start.channel);
        Some(key)
    }

    /// Pick a victim: the oldest released group, else the oldest on
    /// `channel`, else the oldest of all. Returns the victim if it is left
    /// fading.
    fn steal(&mut self, channel: usize) -> Option<GroupKey> {
        let oldest = |pred: &dyn Fn(&VoiceGroup) -> bool| {
            self.groups
                .iter()
                .filter(|&(_, g)| g.phase != GroupPhase::Stolen && pred(g))
                .min_by_key(|(_, g)| g.serial)
                .map(|(k, _)| k)
        };
        let victim = oldest(&|g| g.phase == GroupPhase::Released)
            .or_else(|| oldest(&|g| g.channel == channel))
            .or_else(|| oldest(&|_| true));
        let key = victim?;
        if self.steal_fade == 0 {
            self.kill(key);
            return None;
        }
        let frames = self.steal_fade;
        let group = self.groups.get_mut(key)?;
        group.phase = GroupPhase::Stolen;
        group.fade = Some(match group.fade {
            Some(f) if f.remaining <= frames => f,
            _ => Fade::new(frames),
        });
        trace!("stole group {:?} from channel {}", key, group.channel);
        Some(key)
    }

    /// Kill the stolen group nearest to silence, sparing `spare`.
    fn kill_quietest(&mut self, spare: Option<GroupKey>) -> bool {
        let quietest = self
            .groups
            .iter()
            .filter(|&(k, g)| g.phase == GroupPhase::Stolen && Some(k) != spare)
            .min_by_key(|(_, g)| (g.fade.map_or(0, |f| f.remaining), g.serial))
            .map(|(k, _)| k);
        self.kill_some(quietest)
    }

    fn kill_oldest(&mut self) -> bool {
        let oldest = self
            .groups
            .iter()
            .min_by_key(|(_, g)| g.serial)
            .map(|(k, _)| k);
        self.kill_some(oldest)
    }

    fn kill_some(&mut self, key: Option<GroupKey>) -> bool {
        match key {
            Some(key) => {
                self.kill(key);
                true
            }
            None => false,
        }
    }

    /// Mark a group released. Returns false if the key is stale.
    pub fn release(&mut self, key: GroupKey) -> bool {
        match self.groups.get_mut(key) {
            Some(group) => {
                if group.phase == GroupPhase::Active {
                    group.phase = GroupPhase::Released;
                }
                true
            }
            None => false,
        }
    }

    /// Start fading a group out over `frames`, unless it already fades
    /// out sooner.
    pub fn fade_out(&mut self, key: GroupKey, frames: u64) {
        if let Some(group) = self.groups.get_mut(key) {
            match group.fade {
                Some(f) if f.remaining <= frames => {}
                _ => group.fade = Some(Fade::new(frames)),
            }
        }
    }

    /// Remove a group at once and free its voices.
    pub fn kill(&mut self, key: GroupKey) {
        if let Some(group) = self.groups.remove(key) {
            Self::free_chain(&mut self.voices, &mut self.free, &mut self.free_voices, group.first);
        }
    }

    fn free_chain(
        voices: &mut [Voice],
        free: &mut Option<VoiceId>,
        free_voices: &mut usize,
        first: Option<VoiceId>,
    ) {
        let mut id = first;
        while let Some(v) = id {
            let voice = &mut voices[v as usize];
            id = voice.next;
            voice.state = VoiceState::Empty;
            voice.next = *free;
            *free = Some(v);
            *free_voices += 1;
        }
    }

    /// Drop every finished or fully faded group.
    pub fn reap(&mut self) {
        let Self {
            groups,
            voices,
            free,
            free_voices,
            ..
        } = self;
        groups.retain(|key, group| {
            if !group.is_done() {
                return true;
            }
            trace!("group {:?} on channel {} done", key, group.channel);
            Self::free_chain(voices, free, free_voices, group.first);
            false
        });
    }

    /// Kill the groups of every unit for which `keep` is false.
    pub fn retain_units(&mut self, keep: impl Fn(usize) -> bool) {
        let Self {
            groups,
            voices,
            free,
            free_voices,
            ..
        } = self;
        groups.retain(|_, group| {
            if keep(group.unit) {
                return true;
            }
            Self::free_chain(voices, free, free_voices, group.first);
            false
        });
    }

    /// True if both pools hold the same arena and limits.
    pub fn same_shape(&self, other: &VoicePool) -> bool {
        let scratch = |p: &VoicePool| p.voices.first().map_or(0, |v| v.scratch.len());
        self.voices.len() == other.voices.len()
            && scratch(self) == scratch(other)
            && self.limit == other.limit
            && self.reserve == other.reserve
    }

    /// Kill every group.
    pub fn clear(&mut self) {
        let Self {
            groups,
            voices,
            free,
            free_voices,
            ..
        } = self;
        for (_, group) in groups.drain() {
            Self::free_chain(voices, free, free_voices, group.first);
        }
        self.serial = 0;
    }

    pub fn get(&self, key: GroupKey) -> Option<&VoiceGroup> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: GroupKey) -> Option<&mut VoiceGroup> {
        self.groups.get_mut(key)
    }

    pub fn contains(&self, key: GroupKey) -> bool {
        self.groups.contains_key(key)
    }

    /// Keys of the groups of `unit`, oldest first, written into `out`.
    pub fn collect_unit(&self, unit: usize, out: &mut Vec<GroupKey>) {
        out.clear();
        for (key, group) in &self.groups {
            if group.unit == unit && out.len() < out.capacity() {
                out.push(key);
            }
        }
        out.sort_unstable_by_key(|&k| self.groups[k].serial);
    }

    /// Keys of every group, written into `out`.
    pub fn collect_all(&self, out: &mut Vec<GroupKey>) {
        out.clear();
        for (key, _) in &self.groups {
            if out.len() < out.capacity() {
                out.push(key);
            }
        }
    }

    /// Maximum number of groups alive at once.
    pub fn group_capacity(&self) -> usize {
        self.limit + self.reserve
    }

    pub fn first_voice(&self, key: GroupKey) -> Option<VoiceId> {
        self.groups.get(key).and_then(|g| g.first)
    }

    pub fn voice(&self, id: VoiceId) -> &Voice {
        &self.voices[id as usize]
    }

    pub fn voice_mut(&mut self, id: VoiceId) -> &mut Voice {
        &mut self.voices[id as usize]
    }

    /// Groups counting against the voice limit.
    pub fn active_count(&self) -> usize {
        self.groups.values().filter(|g| g.phase != GroupPhase::Stolen).count()
    }

    fn stolen_count(&self) -> usize {
        self.groups.values().filter(|g| g.phase == GroupPhase::Stolen).count()
    }

    /// Groups alive, including fading ones.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn free_voices(&self) -> usize {
        self.free_voices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::pitch::PitchVoice;

    fn pool(limit: usize) -> VoicePool {
        let config = EngineConfig {
            voice_limit: limit,
            ..EngineConfig::default()
        };
        let mut pool = VoicePool::new(&config, 2, 4).unwrap();
        pool.set_steal_fade(96);
        pool
    }

    fn start(pool: &mut VoicePool, channel: usize) -> GroupKey {
        let s = GroupStart {
            channel,
            unit: 0,
            plan: 0,
            pitch: 0.0,
            force: 0.0,
        };
        pool.start(s, &[0, 1], |_, st| *st = VoiceState::Pitch(PitchVoice::default()))
            .unwrap()
    }

    // === Allocation tests ===

    #[test]
    fn new_pool_is_empty() {
        let p = pool(4);
        assert!(p.is_empty());
        assert_eq!(p.group_capacity(), 5);
        assert_eq!(p.free_voices(), 10);
    }

    #[test]
    fn start_links_voices_in_slot_order() {
        let mut p = pool(4);
        let key = start(&mut p, 0);
        let first = p.first_voice(key).unwrap();
        assert_eq!(p.voice(first).slot, 0);
        let second = p.voice(first).next.unwrap();
        assert_eq!(p.voice(second).slot, 1);
        assert!(p.voice(second).next.is_none());
        assert!(matches!(p.voice(first).state, VoiceState::Pitch(_)));
        assert_eq!(p.free_voices(), 8);
    }

    #[test]
    fn kill_returns_voices() {
        let mut p = pool(4);
        let key = start(&mut p, 0);
        p.kill(key);
        assert!(!p.contains(key));
        assert_eq!(p.free_voices(), 10);
    }

    #[test]
    fn reap_drops_finished_and_faded_groups() {
        let mut p = pool(4);
        let a = start(&mut p, 0);
        let b = start(&mut p, 1);
        let c = start(&mut p, 2);
        p.get_mut(a).unwrap().finished = true;
        p.fade_out(b, 0);
        p.reap();
        assert!(!p.contains(a));
        assert!(!p.contains(b));
        assert!(p.contains(c));
        assert_eq!(p.free_voices(), 8);
    }

    // === Stealing tests ===

    #[test]
    fn steal_prefers_released_groups() {
        let mut p = pool(3);
        let a = start(&mut p, 0);
        let b = start(&mut p, 1);
        let c = start(&mut p, 2);
        p.release(b);
        start(&mut p, 0);
        assert_eq!(p.get(b).unwrap().phase, GroupPhase::Stolen);
        assert_eq!(p.get(a).unwrap().phase, GroupPhase::Active);
        assert_eq!(p.get(c).unwrap().phase, GroupPhase::Active);
        assert_eq!(p.active_count(), 3);
    }

    #[test]
    fn steal_prefers_same_channel_then_oldest() {
        let mut p = pool(3);
        let a = start(&mut p, 0);
        let b = start(&mut p, 1);
        let _c = start(&mut p, 1);
        start(&mut p, 1);
        assert_eq!(p.get(b).unwrap().phase, GroupPhase::Stolen);
        assert_eq!(p.get(a).unwrap().phase, GroupPhase::Active);
        start(&mut p, 5);
        assert_eq!(p.get(a).unwrap().phase, GroupPhase::Stolen);
    }

    #[test]
    fn stolen_group_fades_over_steal_length() {
        let mut p = pool(1);
        let a = start(&mut p, 0);
        start(&mut p, 0);
        let fade = p.get(a).unwrap().fade.unwrap();
        assert_eq!(fade.remaining, 96);
        assert_eq!(p.get(a).unwrap().gain_at(48), 0.5);
    }

    #[test]
    fn reserve_overflow_spares_the_new_victim() {
        // Limit 1, reserve 1: the second steal kills the first victim.
        let mut p = pool(1);
        let a = start(&mut p, 0);
        let b = start(&mut p, 0);
        start(&mut p, 0);
        assert!(!p.contains(a));
        assert_eq!(p.get(b).unwrap().phase, GroupPhase::Stolen);
        assert_eq!(p.get(b).unwrap().fade.unwrap().remaining, 96);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn reserve_overflow_kills_the_quietest_stolen() {
        // Limit 8, reserve 2.
        let mut p = pool(8);
        let groups: Vec<GroupKey> = (0..8).map(|ch| start(&mut p, ch)).collect();
        start(&mut p, 1);
        start(&mut p, 0);
        assert_eq!(p.get(groups[1]).unwrap().phase, GroupPhase::Stolen);
        assert_eq!(p.get(groups[0]).unwrap().phase, GroupPhase::Stolen);
        // The younger victim has faded further.
        p.get_mut(groups[1]).unwrap().fade.as_mut().unwrap().remaining = 10;

        start(&mut p, 2);
        assert!(!p.contains(groups[1]));
        assert_eq!(p.get(groups[0]).unwrap().phase, GroupPhase::Stolen);
        assert_eq!(p.get(groups[2]).unwrap().fade.unwrap().remaining, 96);
    }

    #[test]
    fn retain_units_frees_dropped_groups() {
        let mut p = pool(4);
        let a = start(&mut p, 0);
        let s = GroupStart {
            channel: 1,
            unit: 3,
            plan: 0,
            pitch: 0.0,
            force: 0.0,
        };
        let b = p.start(s, &[0], |_, _| {}).unwrap();
        p.retain_units(|unit| unit != 3);
        assert!(p.contains(a));
        assert!(!p.contains(b));
        assert_eq!(p.free_voices(), 8);
        assert!(p.same_shape(&pool(4)));
        assert!(!p.same_shape(&pool(8)));
    }

    #[test]
    fn zero_steal_fade_kills_at_once() {
        let mut p = pool(1);
        p.set_steal_fade(0);
        let a = start(&mut p, 0);
        start(&mut p, 0);
        assert!(!p.contains(a));
    }

    // === Iteration tests ===

    #[test]
    fn collect_unit_orders_by_age() {
        let mut p = pool(4);
        let a = start(&mut p, 3);
        let b = start(&mut p, 1);
        let mut out = Vec::with_capacity(p.group_capacity());
        p.collect_unit(0, &mut out);
        assert_eq!(out, [a, b]);
        p.collect_unit(1, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn clear_frees_everything() {
        let mut p = pool(4);
        start(&mut p, 0);
        start(&mut p, 1);
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.free_voices(), 10);
    }
}
