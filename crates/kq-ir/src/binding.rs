//! Event bindings: one event firing causes others on nearby channels.

use alloc::vec::Vec;

use crate::event::{Event, EventKind, Name, VarValue};

/// `[var, value]`: holds when the named variable equals the value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Condition {
    pub var: Name,
    pub value: VarValue,
}

/// `[channel_offset, name, arg]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BindingTarget {
    pub channel_offset: i32,
    pub event: Event,
}

/// One binding rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub source: EventKind,
    pub conditions: Vec<Condition>,
    pub targets: Vec<BindingTarget>,
}

/// All bindings of a composition, grouped by source event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    list: Vec<Binding>,
}

impl Bindings {
    pub fn new(list: Vec<Binding>) -> Self {
        Self { list }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn all(&self) -> &[Binding] {
        &self.list
    }

    /// Bindings triggered by `kind`, in declaration order.
    pub fn for_event(&self, kind: EventKind) -> impl Iterator<Item = &Binding> {
        self.list.iter().filter(move |b| b.source == kind)
    }
}
