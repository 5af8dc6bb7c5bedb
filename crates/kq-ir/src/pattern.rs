//! Patterns, trigger columns and pattern-instance references.

use alloc::vec::Vec;

use crate::error::FormatError;
use crate::event::Event;
use crate::timestamp::Timestamp;

/// Number of trigger columns per pattern (one per channel).
pub const COLUMNS_MAX: usize = 64;

/// One occurrence of a pattern in the album: `[pattern, instance]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatInstRef {
    pub pattern: u16,
    pub instance: u16,
}

impl PatInstRef {
    pub const fn new(pattern: u16, instance: u16) -> Self {
        Self { pattern, instance }
    }
}

/// An event placed at a position in a column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trigger {
    pub pos: Timestamp,
    /// Insertion order among triggers sharing `pos`.
    pub ordinal: u32,
    pub event: Event,
}

/// Time-ordered trigger list of one channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Column {
    triggers: Vec<Trigger>,
}

impl Column {
    /// Build a column from `(position, event)` pairs in list order.
    ///
    /// Positions must be non-decreasing and non-negative; ordinals are
    /// assigned by order of appearance within each position.
    pub fn from_events(
        column: usize,
        events: impl IntoIterator<Item = (Timestamp, Event)>,
    ) -> Result<Self, FormatError> {
        let mut triggers: Vec<Trigger> = Vec::new();
        for (index, (pos, event)) in events.into_iter().enumerate() {
            if pos.is_negative() {
                return Err(FormatError::TriggerOrder { column, index });
            }
            let ordinal = match triggers.last() {
                Some(prev) if prev.pos > pos => {
                    return Err(FormatError::TriggerOrder { column, index });
                }
                Some(prev) if prev.pos == pos => prev.ordinal + 1,
                _ => 0,
            };
            triggers.push(Trigger {
                pos,
                ordinal,
                event,
            });
        }
        Ok(Self { triggers })
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Index of the first trigger at or after `pos`.
    pub fn first_at_or_after(&self, pos: Timestamp) -> usize {
        self.triggers.partition_point(|t| t.pos < pos)
    }
}

/// A pattern: a length plus one trigger column per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub length: Timestamp,
    columns: Vec<Column>,
}

impl Pattern {
    /// Create an empty pattern. Validation rejects non-positive lengths.
    pub fn new(length: Timestamp) -> Self {
        Self {
            length,
            columns: (0..COLUMNS_MAX).map(|_| Column::default()).collect(),
        }
    }

    /// Replace one column. Out-of-range indices are ignored.
    pub fn set_column(&mut self, index: usize, column: Column) {
        if let Some(slot) = self.columns.get_mut(index) {
            *slot = column;
        }
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index.min(COLUMNS_MAX - 1)]
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}
