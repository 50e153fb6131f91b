//! Full-snapshot reconciliation.
//!
//! When an update is not a delta, its body replaces the whole document. Rather
//! than swapping the document out, [`merge`] walks the existing tree and
//! reconciles it in place, so every composite that survives keeps its slot:
//! - scalars (and composites of a different kind) are replaced wholesale
//! - arrays are truncated to the new length, then merged element-by-element
//! - objects lose keys the snapshot no longer has, then merge key-by-key
//!
//! Object keys starting with the private prefix (`$` by default) are
//! client-local and survive a merge even when the snapshot lacks them.

use serde_json::Value;

/// Prefix of object keys that merges never delete.
pub const DEFAULT_PRIVATE_PREFIX: char = '$';

/// Options for [`merge_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Keys starting with this character are kept when absent from the
    /// snapshot. `None` prunes every absent key.
    pub private_prefix: Option<char>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            private_prefix: Some(DEFAULT_PRIVATE_PREFIX),
        }
    }
}

impl MergeOptions {
    /// Merge without any private-key convention.
    pub fn strict() -> Self {
        Self {
            private_prefix: None,
        }
    }

    fn is_private(&self, key: &str) -> bool {
        self.private_prefix
            .is_some_and(|prefix| key.starts_with(prefix))
    }
}

/// Reconcile `dst` toward `src` with the default options.
pub fn merge(dst: &mut Value, src: &Value) {
    merge_with(dst, src, &MergeOptions::default());
}

/// Reconcile `dst` toward `src`, preserving `dst`'s slot and the slots of
/// nested composites that exist on both sides.
pub fn merge_with(dst: &mut Value, src: &Value, options: &MergeOptions) {
    match (dst, src) {
        (Value::Array(dst), Value::Array(src)) => {
            dst.truncate(src.len());
            for (i, item) in src.iter().enumerate() {
                match dst.get_mut(i) {
                    Some(existing) => merge_with(existing, item, options),
                    None => dst.push(item.clone()),
                }
            }
        }
        (Value::Object(dst), Value::Object(src)) => {
            dst.retain(|key, _| src.contains_key(key) || options.is_private(key));
            for (key, item) in src {
                match dst.get_mut(key) {
                    Some(existing) => merge_with(existing, item, options),
                    None => {
                        dst.insert(key.clone(), item.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}
