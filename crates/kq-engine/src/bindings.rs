//! Binding expansion with an explicit work-list.
//!
//! Each fired event is pushed as a work item; after it takes effect, the
//! targets of every matching binding are pushed on top so they run next,
//! in declaration order, before any later event of the boundary.
//!
//! A binding applies at most once along one expansion path. A binding
//! that reproduces its own source event on the same channel can never
//! terminate and fails with `BindingDepth`.

use kq_ir::{
    ArgType, Binding, Bindings, Condition, Event, EventArg, FormatError, Name, VarValue, CHANNELS,
};

use crate::config::{EngineConfig, BINDING_DEPTH_MAX};

/// Work-list capacity. Expansions that need more fail like an overlong slice.
pub const WORK_LIST_MAX: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkItem {
    pub channel: usize,
    pub event: Event,
    /// Number of bindings between this event and the one that started
    /// the expansion.
    pub depth: usize,
    /// Index of the binding that produced this event.
    pub binding: Option<usize>,
}

/// Depth-first stack of events waiting to be dispatched.
#[derive(Debug)]
pub struct WorkList {
    items: heapless::Vec<WorkItem, WORK_LIST_MAX>,
    /// Bindings that led to the last popped item, outermost first.
    path: heapless::Vec<usize, BINDING_DEPTH_MAX>,
    depth_limit: usize,
    event_limit: usize,
    /// Events dispatched in the current slice.
    dispatched: usize,
}

impl WorkList {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            items: heapless::Vec::new(),
            path: heapless::Vec::new(),
            depth_limit: config.binding_depth,
            event_limit: config.events_per_slice,
            dispatched: 0,
        }
    }

    /// Begin a new slice boundary; the event budget starts over.
    pub fn begin_slice(&mut self) {
        self.items.clear();
        self.path.clear();
        self.dispatched = 0;
    }

    /// Count one unit of work against the budget of the boundary.
    pub fn charge(&mut self) -> Result<(), FormatError> {
        self.dispatched += 1;
        if self.dispatched > self.event_limit {
            return Err(FormatError::BindingOverflow {
                limit: self.event_limit,
            });
        }
        Ok(())
    }

    /// Start expanding a fired event.
    pub fn start(&mut self, channel: usize, event: Event) -> Result<(), FormatError> {
        self.items.clear();
        self.path.clear();
        self.push(WorkItem {
            channel,
            event,
            depth: 0,
            binding: None,
        })
    }

    /// Next event to dispatch, counted against the slice budget.
    pub fn next(&mut self) -> Result<Option<WorkItem>, FormatError> {
        let Some(item) = self.items.pop() else {
            return Ok(None);
        };
        self.charge()?;
        self.path.truncate(item.depth.saturating_sub(1));
        if let Some(b) = item.binding {
            // depth <= BINDING_DEPTH_MAX
            let _ = self.path.push(b);
        }
        Ok(Some(item))
    }

    /// Drop everything still waiting.
    pub fn abandon(&mut self) {
        self.items.clear();
    }

    /// Push the targets of every binding of `source` whose conditions hold,
    /// so that they pop in declaration order.
    pub fn expand(
        &mut self,
        source: &WorkItem,
        bindings: &Bindings,
        mut lookup: impl FnMut(&Name) -> Option<VarValue>,
    ) -> Result<(), FormatError> {
        let base = self.items.len();
        let matching = bindings
            .all()
            .iter()
            .enumerate()
            .filter(|(_, b)| b.source == source.event.kind);
        for (index, binding) in matching {
            if self.path.contains(&index) || !conditions_hold(binding, &mut lookup) {
                continue;
            }
            if source.depth + 1 > self.depth_limit || reproduces_source(binding) {
                return Err(FormatError::BindingDepth {
                    limit: self.depth_limit,
                });
            }
            for target in &binding.targets {
                let channel = source.channel as i64 + target.channel_offset as i64;
                if !(0..CHANNELS as i64).contains(&channel) {
                    continue;
                }
                let Some(arg) = resolve_pass_through(target.event, source.event.arg) else {
                    log::warn!(
                        "binding target {} cannot take the argument of {}",
                        target.event.kind.name(),
                        source.event.kind.name()
                    );
                    continue;
                };
                self.push(WorkItem {
                    channel: channel as usize,
                    event: Event::raw(target.event.kind, arg),
                    depth: source.depth + 1,
                    binding: Some(index),
                })?;
            }
        }
        self.items[base..].reverse();
        Ok(())
    }

    fn push(&mut self, item: WorkItem) -> Result<(), FormatError> {
        self.items.push(item).map_err(|_| FormatError::BindingOverflow {
            limit: self.event_limit,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn reproduces_source(binding: &Binding) -> bool {
    binding
        .targets
        .iter()
        .any(|t| t.channel_offset == 0 && t.event.kind == binding.source)
}

fn conditions_hold(binding: &Binding, lookup: &mut impl FnMut(&Name) -> Option<VarValue>) -> bool {
    binding
        .conditions
        .iter()
        .all(|Condition { var, value }| lookup(var).is_some_and(|v| values_equal(v, *value)))
}

/// Variable equality with numeric widening.
pub fn values_equal(a: VarValue, b: VarValue) -> bool {
    match (a, b) {
        (VarValue::Int(x), VarValue::Float(y)) | (VarValue::Float(y), VarValue::Int(x)) => {
            x as f64 == y
        }
        _ => a == b,
    }
}

/// Argument of a binding target, taking `"$"` from the source event.
fn resolve_pass_through(target: Event, source: EventArg) -> Option<EventArg> {
    if target.arg != EventArg::PassThrough {
        return Some(target.arg);
    }
    let ty = target.kind.arg_type();
    if let Some(v) = source.to_value() {
        return v.coerce(ty);
    }
    match source {
        EventArg::VarRef(_) | EventArg::PassThrough => None,
        EventArg::None if ty == ArgType::OptName => Some(EventArg::None),
        other if other.conforms_to(ty) => Some(other),
        _ => None,
    }
}
