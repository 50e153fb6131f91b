//! Client-local annotations on document nodes.
//!
//! Consumers often need to hang UI state off synchronized nodes (an expanded
//! flag on a row, a selection on a list). Writing those into the document
//! itself would mix them with server data, so they live here instead, keyed
//! by the node's JSON Pointer.
//!
//! Pointers name positions, not nodes, so the table follows the patch engine:
//! [`Annotations::rebase`] replays each [`Edit`] of a delta, shifting array
//! indices past inserts and removals, carrying moved subtrees along and
//! dropping entries of overwritten nodes. Full snapshots merge slot by slot,
//! so after them [`Annotations::prune`] only has to drop entries whose node
//! no longer exists.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::patch::{Edit, Slot};

/// Side table of annotations keyed by node pointer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    nodes: BTreeMap<String, Map<String, Value>>,
}

impl Annotations {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` on the node at `pointer`, returning the previous value.
    pub fn set(&mut self, pointer: &str, key: &str, value: Value) -> Option<Value> {
        self.nodes
            .entry(pointer.to_string())
            .or_default()
            .insert(key.to_string(), value)
    }

    /// Read `key` on the node at `pointer`.
    pub fn get(&self, pointer: &str, key: &str) -> Option<&Value> {
        self.nodes.get(pointer).and_then(|node| node.get(key))
    }

    /// Remove `key` from the node at `pointer`.
    pub fn remove(&mut self, pointer: &str, key: &str) -> Option<Value> {
        let node = self.nodes.get_mut(pointer)?;
        let removed = node.remove(key);
        if node.is_empty() {
            self.nodes.remove(pointer);
        }
        removed
    }

    /// All annotations on the node at `pointer`.
    pub fn node(&self, pointer: &str) -> Option<&Map<String, Value>> {
        self.nodes.get(pointer)
    }

    /// Number of annotated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node carries annotations.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Re-key entries after one patch edit so they stay on their nodes.
    pub fn rebase(&mut self, edit: &Edit) {
        match edit {
            Edit::Added(slot) => self.insert_slot(slot),
            Edit::Removed(slot) => self.remove_slot(slot),
            Edit::Replaced(slot) => self.clear_slot(slot),
            Edit::Moved { from, to } => {
                let moved = self.take_within(&from.pointer());
                self.remove_slot(from);
                self.insert_slot(to);
                let to = to.pointer();
                for (suffix, node) in moved {
                    self.nodes.insert(format!("{to}{suffix}"), node);
                }
            }
        }
    }

    /// A value now occupies `slot`.
    fn insert_slot(&mut self, slot: &Slot) {
        match slot {
            Slot::Index { parent, index } => self.shift(parent, *index, true),
            _ => self.clear_slot(slot),
        }
    }

    /// The value at `slot` is gone.
    fn remove_slot(&mut self, slot: &Slot) {
        self.clear_slot(slot);
        if let Slot::Index { parent, index } = slot {
            self.shift(parent, index + 1, false);
        }
    }

    /// Drop entries of the node at `slot` and below. The root node itself
    /// survives, only its members changed.
    fn clear_slot(&mut self, slot: &Slot) {
        let base = slot.pointer();
        let keep_base = matches!(slot, Slot::Root);
        self.nodes
            .retain(|pointer, _| !is_within(pointer, &base) || (keep_base && *pointer == base));
    }

    /// Remove entries at or below `base`, returning them keyed by the rest
    /// of their pointer.
    fn take_within(&mut self, base: &str) -> Vec<(String, Map<String, Value>)> {
        let (taken, kept) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition::<Vec<_>, _>(|(pointer, _)| is_within(pointer, base));
        self.nodes = kept.into_iter().collect();
        taken
            .into_iter()
            .map(|(pointer, node)| (pointer[base.len()..].to_string(), node))
            .collect()
    }

    /// Move entries under elements `from..` of the array at `parent` one
    /// position up or down.
    fn shift(&mut self, parent: &str, from: usize, up: bool) {
        let prefix = format!("{parent}/");
        self.nodes = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|(pointer, node)| {
                let Some(rest) = pointer.strip_prefix(&prefix) else {
                    return (pointer, node);
                };
                let (segment, tail) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
                let index = match segment.parse::<usize>() {
                    Ok(i) if i >= from && segment.bytes().all(|b| b.is_ascii_digit()) => i,
                    _ => return (pointer, node),
                };
                let index = if up { index + 1 } else { index - 1 };
                (format!("{prefix}{index}{tail}"), node)
            })
            .collect();
    }

    /// Drop annotations whose node no longer resolves in `doc`.
    ///
    /// Returns how many nodes were dropped.
    pub fn prune(&mut self, doc: &Value) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|pointer, _| doc.pointer(pointer).is_some());
        before - self.nodes.len()
    }
}

/// Whether `pointer` names `base` or a node below it.
fn is_within(pointer: &str, base: &str) -> bool {
    pointer
        .strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
