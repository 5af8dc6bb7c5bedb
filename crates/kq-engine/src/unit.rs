//! Runtime graph of one audio unit.
//!
//! Voice processors run once per voice group; their outputs are summed
//! (with the group's gain) where an edge leaves the voice part of the
//! graph. Mixed processors then run once per slice on those sums and on
//! the unit's inputs.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use kq_ir::graph::{execution_order, GraphLevel};
use kq_ir::{
    AudioBuffer, AudioUnit, Endpoint, Name, PortTable, ProcessorKind, Result, SignalType, UnitKind,
};
use log::debug;

use crate::processor::{NoteStart, PortIo, Processor, VoiceContext, VoiceState, VoiceStatus};
use crate::processors::create_processor;
use crate::voice::GroupKey;
use crate::voice_pool::VoicePool;

/// One processor instance of the unit.
pub struct ProcSlot {
    /// Processor index within the unit (`proc_XX`).
    pub index: usize,
    pub proc: Box<dyn Processor>,
    pub signal: SignalType,
    pub ports: PortTable,
}

/// An edge resolved to slot positions. `None` is the unit interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Link {
    src: Option<usize>,
    src_port: usize,
    dst: Option<usize>,
    dst_port: usize,
}

/// Voice processors that run for one hit or expression.
#[derive(Debug)]
pub struct VoicePlan {
    /// Slots in execution order.
    pub slots: Vec<usize>,
    /// Edges between voice slots of the plan.
    voice_links: Vec<Link>,
    /// Edges from voice slots of the plan into the mixed part or the output.
    collapse_links: Vec<Link>,
    /// Connected input ports per slot position.
    connected: Vec<u32>,
    /// Some processor of the plan ends its voice after note-off.
    pub handles_release: bool,
}

pub struct UnitRuntime {
    pub index: usize,
    pub kind: UnitKind,
    slots: Vec<ProcSlot>,
    mixed_links: Vec<Link>,
    mixed_order: Vec<usize>,
    mixed_connected: Vec<u32>,
    plans: Vec<VoicePlan>,
    hit_plans: BTreeMap<usize, usize>,
    expr_plans: BTreeMap<Name, usize>,
    default_expression: Option<Name>,
    voice_in: AudioBuffer,
    slot_out: Vec<AudioBuffer>,
    mixed_in: Vec<AudioBuffer>,
    gains: Vec<f32>,
    /// Signal arriving at the unit's input ports.
    pub input: AudioBuffer,
    /// Signal leaving the unit's output ports.
    pub output: AudioBuffer,
}

fn port_bit(port: usize) -> u32 {
    1u32.checked_shl(port as u32).unwrap_or(0)
}

impl UnitRuntime {
    pub fn new(index: usize, unit: &AudioUnit, audio_rate: u32, buffer_size: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(unit.processors.len());
        for (&proc_index, spec) in &unit.processors {
            let signal = if spec.kind.supports(spec.signal_type) {
                spec.signal_type
            } else {
                spec.kind.default_signal_type()
            };
            slots.push(ProcSlot {
                index: proc_index,
                proc: create_processor(spec, audio_rate)?,
                signal,
                ports: spec.kind.ports(),
            });
        }
        let position: BTreeMap<usize, usize> =
            slots.iter().enumerate().map(|(pos, s)| (s.index, pos)).collect();

        let mut links = Vec::new();
        for edge in &unit.edges {
            let resolve = |ep: Endpoint| match ep {
                Endpoint::Device { index, port } => position.get(&index).map(|&p| (Some(p), port)),
                Endpoint::Interface { port } => Some((None, port)),
            };
            let (Some((src, src_port)), Some((dst, dst_port))) = (resolve(edge.from), resolve(edge.to))
            else {
                continue;
            };
            let fits = src.map_or(true, |s| src_port < slots[s].ports.outputs.len())
                && dst.map_or(true, |d| dst_port < slots[d].ports.inputs.len());
            if fits {
                links.push(Link {
                    src,
                    src_port,
                    dst,
                    dst_port,
                });
            }
        }

        let devices: Vec<usize> = (0..slots.len()).collect();
        let pairs: Vec<(usize, usize)> = links
            .iter()
            .filter_map(|l| Some((l.src?, l.dst?)))
            .collect();
        let order = execution_order(&devices, &pairs, GraphLevel::Unit)?;

        let is_voice = |s: Option<usize>| s.is_some_and(|s| slots[s].signal == SignalType::Voice);
        let voice_order: Vec<usize> = order.iter().copied().filter(|&s| is_voice(Some(s))).collect();
        let mixed_order: Vec<usize> = order.iter().copied().filter(|&s| !is_voice(Some(s))).collect();
        let mixed_links: Vec<Link> = links.iter().copied().filter(|l| !is_voice(l.src)).collect();

        let mut mixed_connected = vec![0u32; slots.len()];
        for l in &links {
            if let Some(d) = l.dst {
                if !is_voice(Some(d)) {
                    mixed_connected[d] |= port_bit(l.dst_port);
                }
            }
        }

        let mut plans = Vec::new();
        let mut plan_for = |excluded: &[usize]| -> usize {
            let included: Vec<usize> = voice_order
                .iter()
                .copied()
                .filter(|&s| !excluded.contains(&slots[s].index))
                .collect();
            let in_plan = |s: Option<usize>| s.is_some_and(|s| included.contains(&s));
            let voice_links: Vec<Link> = links
                .iter()
                .copied()
                .filter(|l| in_plan(l.src) && in_plan(l.dst))
                .collect();
            let collapse_links: Vec<Link> = links
                .iter()
                .copied()
                .filter(|l| in_plan(l.src) && !is_voice(l.dst))
                .collect();
            let mut connected = vec![0u32; slots.len()];
            for l in &voice_links {
                if let Some(d) = l.dst {
                    connected[d] |= port_bit(l.dst_port);
                }
            }
            let handles_release = included.iter().any(|&s| slots[s].proc.handles_release());
            plans.push(VoicePlan {
                slots: included,
                voice_links,
                collapse_links,
                connected,
                handles_release,
            });
            plans.len() - 1
        };

        plan_for(&[]);
        let mut hit_plans = BTreeMap::new();
        let mut expr_plans = BTreeMap::new();
        if unit.kind == UnitKind::Instrument {
            for (&hit, excluded) in &unit.hits {
                hit_plans.insert(hit, plan_for(excluded));
            }
            for (name, excluded) in &unit.expressions.filters {
                expr_plans.insert(*name, plan_for(excluded));
            }
        }

        let voice_inputs = voice_order
            .iter()
            .map(|&s| slots[s].ports.inputs.len())
            .max()
            .unwrap_or(0);
        let mut slot_out = Vec::with_capacity(slots.len());
        let mut mixed_in = Vec::with_capacity(slots.len());
        for slot in &slots {
            slot_out.push(AudioBuffer::try_new(slot.ports.outputs.len(), buffer_size)?);
            mixed_in.push(match slot.signal {
                SignalType::Mixed => AudioBuffer::try_new(slot.ports.inputs.len(), buffer_size)?,
                SignalType::Voice => AudioBuffer::default(),
            });
        }

        debug!(
            "unit {}: {} processors, {} voice plans",
            index,
            slots.len(),
            plans.len()
        );
        Ok(Self {
            index,
            kind: unit.kind,
            slots,
            mixed_links,
            mixed_order,
            mixed_connected,
            plans,
            hit_plans,
            expr_plans,
            default_expression: unit.expressions.default_note,
            voice_in: AudioBuffer::try_new(voice_inputs, buffer_size)?,
            slot_out,
            mixed_in,
            gains: vec![0.0; buffer_size],
            input: AudioBuffer::try_new(unit.in_port_count(), buffer_size)?,
            output: AudioBuffer::try_new(unit.out_port_count(), buffer_size)?,
        })
    }

    /// Plan for a note played with `hit` or under `expression`.
    pub fn plan_for(&self, hit: Option<usize>, expression: Option<&Name>) -> usize {
        if let Some(h) = hit {
            return self.hit_plans.get(&h).copied().unwrap_or(0);
        }
        expression
            .or(self.default_expression.as_ref())
            .and_then(|n| self.expr_plans.get(n))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_hit(&self, hit: usize) -> bool {
        self.hit_plans.contains_key(&hit)
    }

    pub fn plan(&self, plan: usize) -> &VoicePlan {
        &self.plans[plan.min(self.plans.len() - 1)]
    }

    /// Most voice processors any plan runs.
    pub fn max_group_voices(&self) -> usize {
        self.plans.iter().map(|p| p.slots.len()).max().unwrap_or(0)
    }

    /// Most scratch frames any voice processor needs.
    pub fn scratch_len(&self, audio_rate: u32) -> usize {
        self.slots
            .iter()
            .filter(|s| s.signal == SignalType::Voice)
            .map(|s| s.proc.scratch_len(audio_rate))
            .max()
            .unwrap_or(0)
    }

    pub fn has_voices(&self) -> bool {
        self.kind == UnitKind::Instrument && !self.plans[0].slots.is_empty()
    }

    pub fn slots(&self) -> &[ProcSlot] {
        &self.slots
    }

    /// Initial state of the voice for `slot`.
    pub fn allocate_state(&self, slot: usize, note: &NoteStart) -> VoiceState {
        self.slots[slot].proc.allocate_state(note)
    }

    /// Set a float parameter on every processor that knows it.
    pub fn set_control(&mut self, name: &str, value: f64) -> bool {
        let mut any = false;
        for slot in &mut self.slots {
            any |= slot.proc.set_control(name, value);
        }
        any
    }

    /// Clear mixed-signal state.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.proc.reset();
        }
    }

    /// Silence the inputs and sums of the next `frames` frames.
    pub fn begin_slice(&mut self, frames: usize) {
        for buf in &mut self.mixed_in {
            buf.silence_range(frames);
        }
        self.input.silence_range(frames);
        self.output.silence_range(frames);
    }

    /// Render one voice group and add it to the unit's sums.
    pub fn render_group(
        &mut self,
        pool: &mut VoicePool,
        key: GroupKey,
        frames: usize,
        audio_rate: u32,
        channel_gain: f32,
    ) {
        let Some(group) = pool.get(key).cloned() else { return };
        let plan = &self.plans[group.plan.min(self.plans.len() - 1)];
        let ctx = VoiceContext {
            audio_rate,
            pitch: group.pitch,
            force: group.force,
            released: group.is_released(),
        };

        let mut finished = false;
        let mut id = group.first;
        for &slot in &plan.slots {
            let Some(vid) = id else { break };
            self.voice_in.silence_range(frames);
            for l in plan.voice_links.iter().filter(|l| l.dst == Some(slot)) {
                let Some(src) = l.src else { continue };
                let from = &self.slot_out[src].channel(l.src_port)[..frames];
                let to = &mut self.voice_in.channel_mut(l.dst_port)[..frames];
                for (t, f) in to.iter_mut().zip(from) {
                    *t += f;
                }
            }
            let voice = pool.voice_mut(vid);
            id = voice.next;
            let mut io = PortIo::new(&self.voice_in, plan.connected[slot], &mut self.slot_out[slot], frames);
            let status = self.slots[slot].proc.process_voice(
                &mut voice.state,
                &mut voice.scratch,
                &mut io,
                &ctx,
            );
            finished |= status == VoiceStatus::Finished;
        }

        for (i, g) in self.gains[..frames].iter_mut().enumerate() {
            *g = group.gain_at(i) * channel_gain;
        }
        for l in &plan.collapse_links {
            let Some(src) = l.src else { continue };
            let from = &self.slot_out[src].channel(l.src_port)[..frames];
            let to = match l.dst {
                Some(d) => self.mixed_in[d].channel_mut(l.dst_port),
                None if l.dst_port < self.output.channels() => self.output.channel_mut(l.dst_port),
                None => continue,
            };
            for ((t, f), g) in to[..frames].iter_mut().zip(from).zip(&self.gains) {
                *t += f * g;
            }
        }

        if let Some(g) = pool.get_mut(key) {
            g.finished |= finished;
            if let Some(fade) = &mut g.fade {
                fade.advance(frames);
            }
        }
    }

    /// Run the mixed processors and route their outputs. Call after every
    /// group has been rendered and `input` holds this slice's input.
    pub fn render_mixed(&mut self, frames: usize, audio_rate: u32) {
        for &m in &self.mixed_order {
            for l in self.mixed_links.iter().filter(|l| l.dst == Some(m)) {
                let from = match l.src {
                    Some(s) => &self.slot_out[s],
                    None => &self.input,
                };
                if l.src_port >= from.channels() {
                    continue;
                }
                let from = &from.channel(l.src_port)[..frames];
                let to = &mut self.mixed_in[m].channel_mut(l.dst_port)[..frames];
                for (t, f) in to.iter_mut().zip(from) {
                    *t += f;
                }
            }
            let mut io = PortIo::new(&self.mixed_in[m], self.mixed_connected[m], &mut self.slot_out[m], frames);
            self.slots[m].proc.process_signal(&mut io, audio_rate);
        }

        for l in self.mixed_links.iter().filter(|l| l.dst.is_none()) {
            if l.dst_port >= self.output.channels() {
                continue;
            }
            let from = match l.src {
                Some(s) => &self.slot_out[s],
                None => &self.input,
            };
            if l.src_port >= from.channels() {
                continue;
            }
            let from = &from.channel(l.src_port)[..frames];
            let to = &mut self.output.channel_mut(l.dst_port)[..frames];
            for (t, f) in to.iter_mut().zip(from) {
                *t += f;
            }
        }
    }

    /// Kind of the processor at `slot`.
    pub fn slot_kind(&self, slot: usize) -> ProcessorKind {
        self.slots[slot].proc.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::voice_pool::GroupStart;
    use alloc::sync::Arc;
    use kq_ir::{parse_name, Edge, ParamValue, ProcessorSpec};

    fn unit_with(kind: UnitKind, procs: &[(usize, ProcessorSpec)], edges: &[(&str, &str)]) -> AudioUnit {
        let mut unit = AudioUnit::new(kind);
        for (i, spec) in procs {
            unit.processors.insert(*i, Arc::new(spec.clone()));
        }
        unit.edges = edges
            .iter()
            .map(|(s, d)| Edge::parse(s, d, GraphLevel::Unit).unwrap())
            .collect();
        unit
    }

    fn start_note(rt: &UnitRuntime, pool: &mut VoicePool, plan: usize) -> GroupKey {
        let note = NoteStart {
            pitch: 0.0,
            force: 0.0,
            hit: None,
            seed: 1,
            audio_rate: 48000,
        };
        let start = GroupStart {
            channel: 0,
            unit: rt.index,
            plan,
            pitch: 0.0,
            force: 0.0,
        };
        pool.start(start, &rt.plan(plan).slots, |slot, st| *st = rt.allocate_state(slot, &note))
            .unwrap()
    }

    fn pool_for(rt: &UnitRuntime) -> VoicePool {
        VoicePool::new(&EngineConfig::default(), rt.max_group_voices(), rt.scratch_len(48000)).unwrap()
    }

    #[test]
    fn voice_output_reaches_unit_output() {
        let unit = unit_with(
            UnitKind::Instrument,
            &[(0, ProcessorSpec::new(ProcessorKind::Additive))],
            &[("proc_00/out_00", "out_00"), ("proc_00/out_01", "out_01")],
        );
        let mut rt = UnitRuntime::new(0, &unit, 48000, 64).unwrap();
        let mut pool = pool_for(&rt);
        let key = start_note(&rt, &mut pool, 0);
        rt.begin_slice(64);
        rt.render_group(&mut pool, key, 64, 48000, 0.5);
        rt.render_mixed(64, 48000);
        let peak = rt.output.channel(0).iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.4 && peak <= 0.5, "peak {}", peak);
        assert_eq!(rt.output.channel(0), rt.output.channel(1));
    }

    #[test]
    fn mixed_stage_processes_summed_voices() {
        let mut vol = ProcessorSpec::new(ProcessorKind::Volume);
        vol.signal_type = SignalType::Mixed;
        vol.params.insert("volume", ParamValue::Float(-6.0206));
        let unit = unit_with(
            UnitKind::Instrument,
            &[(0, ProcessorSpec::new(ProcessorKind::Additive)), (1, vol)],
            &[
                ("proc_00/out_00", "proc_01/in_00"),
                ("proc_01/out_00", "out_00"),
                ("proc_00/out_00", "out_01"),
            ],
        );
        let mut rt = UnitRuntime::new(0, &unit, 48000, 32).unwrap();
        let mut pool = pool_for(&rt);
        let a = start_note(&rt, &mut pool, 0);
        let b = start_note(&rt, &mut pool, 0);
        rt.begin_slice(32);
        rt.render_group(&mut pool, a, 32, 48000, 1.0);
        rt.render_group(&mut pool, b, 32, 48000, 1.0);
        rt.render_mixed(32, 48000);
        for i in 0..32 {
            let direct = rt.output.channel(1)[i];
            assert!((rt.output.channel(0)[i] - direct * 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn effect_passes_input_through_mixed_chain() {
        let mut vol = ProcessorSpec::new(ProcessorKind::Volume);
        vol.signal_type = SignalType::Mixed;
        let unit = unit_with(
            UnitKind::Effect,
            &[(0, vol)],
            &[("in_00", "proc_00/in_00"), ("proc_00/out_00", "out_00"), ("in_01", "out_01")],
        );
        let mut rt = UnitRuntime::new(3, &unit, 48000, 8).unwrap();
        assert!(!rt.has_voices());
        rt.begin_slice(8);
        rt.input.channel_mut(0).fill(0.25);
        rt.input.channel_mut(1).fill(-0.5);
        rt.render_mixed(8, 48000);
        assert_eq!(rt.output.channel(0), &[0.25; 8]);
        assert_eq!(rt.output.channel(1), &[-0.5; 8]);
    }

    #[test]
    fn hits_and_expressions_pick_filtered_plans() {
        let mut unit = unit_with(
            UnitKind::Instrument,
            &[
                (0, ProcessorSpec::new(ProcessorKind::Additive)),
                (1, ProcessorSpec::new(ProcessorKind::Additive)),
            ],
            &[("proc_00/out_00", "out_00"), ("proc_01/out_00", "out_00")],
        );
        unit.hits.insert(2, vec![1]);
        let soft = parse_name("soft").unwrap();
        unit.expressions.filters.insert(soft, vec![0]);
        let rt = UnitRuntime::new(0, &unit, 48000, 8).unwrap();
        assert_eq!(rt.plan(rt.plan_for(None, None)).slots, [0, 1]);
        assert_eq!(rt.plan(rt.plan_for(Some(2), None)).slots, [0]);
        assert!(rt.has_hit(2) && !rt.has_hit(9));
        assert_eq!(rt.plan(rt.plan_for(Some(9), None)).slots, [0, 1]);
        assert_eq!(rt.plan(rt.plan_for(None, Some(&soft))).slots, [1]);
        assert_eq!(rt.max_group_voices(), 2);
    }

    #[test]
    fn force_processor_owns_release() {
        let unit = unit_with(
            UnitKind::Instrument,
            &[
                (0, ProcessorSpec::new(ProcessorKind::Force)),
                (1, ProcessorSpec::new(ProcessorKind::Additive)),
            ],
            &[("proc_00/out_00", "proc_01/in_01"), ("proc_01/out_00", "out_00")],
        );
        let rt = UnitRuntime::new(0, &unit, 48000, 8).unwrap();
        assert!(rt.plan(0).handles_release);
        assert_eq!(rt.slot_kind(rt.plan(0).slots[0]), ProcessorKind::Force);
    }

    #[test]
    fn ks_voices_get_scratch() {
        let unit = unit_with(
            UnitKind::Instrument,
            &[(0, ProcessorSpec::new(ProcessorKind::KarplusStrong))],
            &[("proc_00/out_00", "out_00")],
        );
        let rt = UnitRuntime::new(0, &unit, 48000, 8).unwrap();
        assert_eq!(rt.scratch_len(48000), crate::processors::ks::scratch_len(48000));
    }
}
