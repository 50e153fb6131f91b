//! RFC 6902 patch application.
//!
//! Operations are applied in order against a `serde_json::Value` tree. Paths
//! are RFC 6901 pointers: the path is split on `/`, each segment after the
//! first is unescaped (`~1` → `/`, then `~0` → `~`), and when the container
//! being traversed is an array the segment must be a base-10 index or `-`
//! (one past the end).
//!
//! Two modes:
//! - lenient (`validate == false`) follows splice semantics where the target
//!   is missing: array inserts clamp to the end, removes of absent targets are
//!   no-ops, and replaces of absent object keys insert them.
//! - validating (`validate == true`) rejects out-of-bounds inserts and absent
//!   targets with a [`PatchError`].
//!
//! [`validate`] runs the validating mode on a deep copy, so a sequence that
//! fails part-way never touches live state. [`apply_validated`] is what the
//! sync pipeline uses.
//!
//! The root of an object document keeps its slot: `add` and `replace` at the
//! empty path clear its members and copy the new value's members in.
//!
//! The `*_with` variants report every structural change as an [`Edit`], with
//! `-` and array positions resolved, so side tables keyed by pointer can
//! follow the nodes they describe.

use livesync_types::{parse_operations, OpKind, PatchError, PatchOperation};
use serde_json::Value;

/// A location in the tree, with array positions resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// The document root.
    Root,
    /// Member `key` of the object at pointer `parent`.
    Key {
        /// Pointer of the containing object.
        parent: String,
        /// Unescaped member name.
        key: String,
    },
    /// Element `index` of the array at pointer `parent`.
    Index {
        /// Pointer of the containing array.
        parent: String,
        /// Resolved position.
        index: usize,
    },
}

impl Slot {
    /// The slot's own pointer.
    pub fn pointer(&self) -> String {
        match self {
            Slot::Root => String::new(),
            Slot::Key { parent, key } => format!("{parent}/{}", escape(key)),
            Slot::Index { parent, index } => format!("{parent}/{index}"),
        }
    }
}

/// A structural change made by one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// A value was placed at the slot. Later array elements moved up by one;
    /// an object member already there was overwritten.
    Added(Slot),
    /// The value at the slot was removed. Later array elements moved down by one.
    Removed(Slot),
    /// The value at the slot was overwritten.
    Replaced(Slot),
    /// The value at `from` was removed and re-added at `to`.
    Moved {
        /// Where it was.
        from: Slot,
        /// Where it is now.
        to: Slot,
    },
}

/// Apply `ops` to `tree` in order.
///
/// Returns `Ok(true)` when every operation was applied and `Ok(false)` when a
/// `test` operation did not match. In that case the remaining operations are
/// skipped. Any other failure aborts with an error; operations before the
/// failing one stay applied, which is why live state goes through
/// [`apply_validated`].
pub fn apply(tree: &mut Value, ops: &[PatchOperation], validate: bool) -> Result<bool, PatchError> {
    Ok(apply_sequence(tree, ops, validate, &mut |_| {})?.is_none())
}

/// Check `ops` against a disposable copy of `tree`.
///
/// A `test` mismatch is reported as [`PatchError::TestFailed`].
pub fn validate(ops: &[PatchOperation], tree: &Value) -> Result<(), PatchError> {
    let mut scratch = tree.clone();
    match apply_sequence(&mut scratch, ops, true, &mut |_| {})? {
        None => Ok(()),
        Some(index) => Err(PatchError::TestFailed {
            index,
            path: ops[index].path.clone(),
        }),
    }
}

/// Validate `ops` against a copy of `tree`, then apply them to `tree`.
///
/// On error `tree` is unchanged.
pub fn apply_validated(tree: &mut Value, ops: &[PatchOperation]) -> Result<(), PatchError> {
    apply_validated_with(tree, ops, |_| {})
}

/// [`apply_validated`], reporting each change to `observe` as it is made.
///
/// Nothing is reported when validation fails.
pub fn apply_validated_with(
    tree: &mut Value,
    ops: &[PatchOperation],
    mut observe: impl FnMut(Edit),
) -> Result<(), PatchError> {
    validate(ops, tree)?;
    apply_sequence(tree, ops, true, &mut observe)?;
    Ok(())
}

/// Decode a delta body and apply it with [`apply_validated`].
pub fn apply_body(tree: &mut Value, body: &Value) -> Result<(), PatchError> {
    apply_body_with(tree, body, |_| {})
}

/// Decode a delta body and apply it with [`apply_validated_with`].
pub fn apply_body_with(
    tree: &mut Value,
    body: &Value,
    observe: impl FnMut(Edit),
) -> Result<(), PatchError> {
    let ops = parse_operations(body)?;
    apply_validated_with(tree, &ops, observe)
}

/// Structural equality used by `test`.
///
/// Arrays compare element-wise, objects by key set and values, and numbers by
/// numeric value, so `1` equals `1.0`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| deep_equal(x, y)))
        }
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                x == y
            } else {
                a.as_f64() == b.as_f64()
            }
        }
        (a, b) => a == b,
    }
}

/// Unescape one pointer segment.
pub fn unescape(segment: &str) -> String {
    if segment.contains('~') {
        segment.replace("~1", "/").replace("~0", "~")
    } else {
        segment.to_string()
    }
}

/// Escape a key for use as a pointer segment.
pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Returns the index of the first failing `test`, if any.
fn apply_sequence(
    tree: &mut Value,
    ops: &[PatchOperation],
    validate: bool,
    observe: &mut dyn FnMut(Edit),
) -> Result<Option<usize>, PatchError> {
    for (index, op) in ops.iter().enumerate() {
        let mut ctx = OpContext {
            index,
            path: &op.path,
            validate,
        };
        let passed = match op.op {
            OpKind::Add | OpKind::Copy => {
                let value = match op.op {
                    OpKind::Copy => {
                        let from = required_from(op, index)?;
                        ctx.path = from;
                        let value = get(tree, &ctx)
                            .map_err(|_| from_missing(index, from))?
                            .cloned()
                            .ok_or_else(|| from_missing(index, from))?;
                        ctx.path = &op.path;
                        value
                    }
                    _ => required_value(op, index)?.clone(),
                };
                observe(Edit::Added(add(tree, &ctx, value)?));
                true
            }
            OpKind::Remove => {
                if let Some(slot) = remove(tree, &ctx)? {
                    observe(Edit::Removed(slot));
                }
                true
            }
            OpKind::Replace => {
                observe(Edit::Replaced(replace(
                    tree,
                    &ctx,
                    required_value(op, index)?.clone(),
                )?));
                true
            }
            OpKind::Move => {
                let from = required_from(op, index)?;
                if from != op.path {
                    if op.path.starts_with(from) && op.path[from.len()..].starts_with('/') {
                        return Err(PatchError::MoveIntoSelf {
                            index,
                            path: op.path.clone(),
                        });
                    }
                    ctx.path = from;
                    let value = get(tree, &ctx)
                        .map_err(|_| from_missing(index, from))?
                        .cloned()
                        .ok_or_else(|| from_missing(index, from))?;
                    let removed = remove(tree, &ctx)?;
                    ctx.path = &op.path;
                    let to = add(tree, &ctx, value)?;
                    if let Some(from) = removed {
                        observe(Edit::Moved { from, to });
                    }
                }
                true
            }
            OpKind::Test => {
                let expected = required_value(op, index)?;
                get(tree, &ctx)?.is_some_and(|current| deep_equal(current, expected))
            }
        };
        if !passed {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

struct OpContext<'a> {
    index: usize,
    path: &'a str,
    validate: bool,
}

impl OpContext<'_> {
    fn unresolvable(&self) -> PatchError {
        PatchError::PathUnresolvable {
            index: self.index,
            path: self.path.to_string(),
        }
    }

    fn illegal_index(&self) -> PatchError {
        PatchError::IllegalArrayIndex {
            index: self.index,
            path: self.path.to_string(),
        }
    }

    fn invalid_target(&self) -> PatchError {
        PatchError::InvalidTarget {
            index: self.index,
            path: self.path.to_string(),
        }
    }

    /// Split the path into unescaped segments. The root path has none.
    fn segments(&self) -> Result<Vec<String>, PatchError> {
        if self.path.is_empty() {
            return Ok(Vec::new());
        }
        match self.path.strip_prefix('/') {
            Some(rest) => Ok(rest.split('/').map(unescape).collect()),
            None => Err(self.unresolvable()),
        }
    }

    /// Parse an array segment. `-` addresses one past the end.
    fn array_index(&self, segment: &str, len: usize) -> Result<usize, PatchError> {
        if segment == "-" {
            return Ok(len);
        }
        if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.illegal_index());
        }
        segment.parse().map_err(|_| self.illegal_index())
    }

    /// Walk to the container holding the final segment, returning it with
    /// its canonical pointer.
    fn parent<'v>(
        &self,
        tree: &'v mut Value,
        segments: &[String],
    ) -> Result<(&'v mut Value, String), PatchError> {
        let mut node = tree;
        let mut pointer = String::new();
        for segment in &segments[..segments.len() - 1] {
            node = match node {
                Value::Object(map) => {
                    pointer.push('/');
                    pointer.push_str(&escape(segment));
                    map.get_mut(segment).ok_or_else(|| self.unresolvable())?
                }
                Value::Array(items) => {
                    let i = self.array_index(segment, items.len())?;
                    pointer.push('/');
                    pointer.push_str(&i.to_string());
                    items.get_mut(i).ok_or_else(|| self.unresolvable())?
                }
                _ => return Err(self.invalid_target()),
            };
        }
        Ok((node, pointer))
    }
}

fn required_value(op: &PatchOperation, index: usize) -> Result<&Value, PatchError> {
    op.value.as_ref().ok_or(PatchError::ValueRequired { index })
}

fn required_from(op: &PatchOperation, index: usize) -> Result<&str, PatchError> {
    op.from.as_deref().ok_or(PatchError::FromRequired { index })
}

fn from_missing(index: usize, from: &str) -> PatchError {
    PatchError::FromUnresolvable {
        index,
        from: from.to_string(),
    }
}

/// Put `value` at the root. An object root is refilled in place; array
/// members land under their decimal indices.
fn replace_root(tree: &mut Value, value: Value) {
    let Value::Object(root) = tree else {
        *tree = value;
        return;
    };
    root.clear();
    match value {
        Value::Object(members) => root.extend(members),
        Value::Array(items) => root.extend(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), item)),
        ),
        _ => {}
    }
}

fn add(tree: &mut Value, ctx: &OpContext<'_>, value: Value) -> Result<Slot, PatchError> {
    let segments = ctx.segments()?;
    let Some(key) = segments.last() else {
        replace_root(tree, value);
        return Ok(Slot::Root);
    };
    let (parent, pointer) = ctx.parent(tree, &segments).map_err(|err| match err {
        PatchError::PathUnresolvable { index, path } => PatchError::PathCannotAdd { index, path },
        other => other,
    })?;
    match parent {
        Value::Object(map) => {
            map.insert(key.clone(), value);
            Ok(Slot::Key {
                parent: pointer,
                key: key.clone(),
            })
        }
        Value::Array(items) => {
            let mut i = ctx.array_index(key, items.len())?;
            if i > items.len() {
                if ctx.validate {
                    return Err(PatchError::ValueOutOfBounds {
                        index: ctx.index,
                        path: ctx.path.to_string(),
                    });
                }
                i = items.len();
            }
            items.insert(i, value);
            Ok(Slot::Index {
                parent: pointer,
                index: i,
            })
        }
        _ => Err(ctx.invalid_target()),
    }
}

/// Returns the emptied slot, or `None` for a lenient miss.
fn remove(tree: &mut Value, ctx: &OpContext<'_>) -> Result<Option<Slot>, PatchError> {
    let segments = ctx.segments()?;
    let Some(key) = segments.last() else {
        match tree {
            Value::Object(map) => map.clear(),
            Value::Array(items) => items.clear(),
            other => *other = Value::Null,
        }
        return Ok(Some(Slot::Root));
    };
    let (parent, pointer) = ctx.parent(tree, &segments)?;
    let removed = match parent {
        Value::Object(map) => map.remove(key).map(|_| Slot::Key {
            parent: pointer,
            key: key.clone(),
        }),
        Value::Array(items) => {
            let i = ctx.array_index(key, items.len())?;
            (i < items.len()).then(|| {
                items.remove(i);
                Slot::Index {
                    parent: pointer,
                    index: i,
                }
            })
        }
        _ => return Err(ctx.invalid_target()),
    };
    if removed.is_none() && ctx.validate {
        return Err(ctx.unresolvable());
    }
    Ok(removed)
}

fn replace(tree: &mut Value, ctx: &OpContext<'_>, value: Value) -> Result<Slot, PatchError> {
    let segments = ctx.segments()?;
    let Some(key) = segments.last() else {
        replace_root(tree, value);
        return Ok(Slot::Root);
    };
    let (parent, pointer) = ctx.parent(tree, &segments)?;
    match parent {
        Value::Object(map) => {
            if ctx.validate && !map.contains_key(key) {
                return Err(ctx.unresolvable());
            }
            map.insert(key.clone(), value);
            Ok(Slot::Key {
                parent: pointer,
                key: key.clone(),
            })
        }
        Value::Array(items) => {
            let i = ctx.array_index(key, items.len())?;
            let slot = items.get_mut(i).ok_or_else(|| ctx.unresolvable())?;
            *slot = value;
            Ok(Slot::Index {
                parent: pointer,
                index: i,
            })
        }
        _ => Err(ctx.invalid_target()),
    }
}

/// The engine-internal `_get`: read the value at `ctx.path`.
///
/// A missing final segment is `Ok(None)`; a missing intermediate is an error.
fn get<'v>(tree: &'v mut Value, ctx: &OpContext<'_>) -> Result<Option<&'v Value>, PatchError> {
    let segments = ctx.segments()?;
    let Some(key) = segments.last() else {
        return Ok(Some(&*tree));
    };
    let found = match ctx.parent(tree, &segments)?.0 {
        Value::Object(map) => map.get(key),
        Value::Array(items) => {
            let i = ctx.array_index(key, items.len())?;
            items.get(i)
        }
        _ => return Err(ctx.invalid_target()),
    };
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(body: Value) -> Vec<PatchOperation> {
        parse_operations(&body).unwrap()
    }

    // ===========================================
    // Scenario Tests
    // ===========================================

    #[test]
    fn append_with_dash() {
        let mut tree = json!({"a": [1, 2, 3]});
        let patch = ops(json!([{"op": "add", "path": "/a/-", "value": 4}]));
        assert!(apply(&mut tree, &patch, true).unwrap());
        assert_eq!(tree, json!({"a": [1, 2, 3, 4]}));
    }

    #[test]
    fn replace_nested_key() {
        let mut tree = json!({"a": {"b": 1}});
        let patch = ops(json!([{"op": "replace", "path": "/a/b", "value": 2}]));
        assert!(apply(&mut tree, &patch, true).unwrap());
        assert_eq!(tree, json!({"a": {"b": 2}}));
    }

    // ===========================================
    // Operation Tests
    // ===========================================

    #[test]
    fn add_inserts_into_array_middle() {
        let mut tree = json!([1, 3]);
        apply(&mut tree, &[PatchOperation::add("/1", json!(2))], true).unwrap();
        assert_eq!(tree, json!([1, 2, 3]));
    }

    #[test]
    fn add_then_remove_restores_tree() {
        let original = json!({"a": {"b": [1, 2]}, "c": "x"});
        for path in ["/a/z", "/a/b/0", "/a/b/-", "/new"] {
            let mut tree = original.clone();
            apply(&mut tree, &[PatchOperation::add(path, json!({"k": 1}))], true).unwrap();
            assert_ne!(tree, original);
            let remove_path = if path == "/a/b/-" { "/a/b/2" } else { path };
            apply(&mut tree, &[PatchOperation::remove(remove_path)], true).unwrap();
            assert_eq!(tree, original, "round trip through {}", path);
        }
    }

    #[test]
    fn remove_from_array_shifts() {
        let mut tree = json!({"a": [1, 2, 3]});
        apply(&mut tree, &[PatchOperation::remove("/a/0")], true).unwrap();
        assert_eq!(tree, json!({"a": [2, 3]}));
    }

    #[test]
    fn move_relocates_value() {
        let mut tree = json!({"a": {"x": 1}, "b": {}});
        apply(&mut tree, &[PatchOperation::move_from("/a/x", "/b/y")], true).unwrap();
        assert_eq!(tree, json!({"a": {}, "b": {"y": 1}}));
    }

    #[test]
    fn move_within_array() {
        let mut tree = json!([1, 2, 3]);
        apply(&mut tree, &[PatchOperation::move_from("/0", "/-")], true).unwrap();
        assert_eq!(tree, json!([2, 3, 1]));
    }

    #[test]
    fn move_onto_itself_is_noop() {
        let mut tree = json!({"a": 1});
        apply(&mut tree, &[PatchOperation::move_from("/a", "/a")], true).unwrap();
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn move_into_own_child_rejected() {
        let mut tree = json!({"a": {"b": {}}});
        let err = apply(&mut tree, &[PatchOperation::move_from("/a", "/a/b/c")], true)
            .unwrap_err();
        assert!(matches!(err, PatchError::MoveIntoSelf { index: 0, .. }));
    }

    #[test]
    fn copy_duplicates_value() {
        let mut tree = json!({"a": {"list": [1]}});
        apply(&mut tree, &[PatchOperation::copy_from("/a/list", "/b")], true).unwrap();
        assert_eq!(tree, json!({"a": {"list": [1]}, "b": [1]}));
    }

    #[test]
    fn copy_from_missing_path_rejected() {
        let mut tree = json!({});
        let err = apply(&mut tree, &[PatchOperation::copy_from("/nope/x", "/b")], true)
            .unwrap_err();
        assert_eq!(
            err,
            PatchError::FromUnresolvable {
                index: 0,
                from: "/nope/x".into()
            }
        );
    }

    #[test]
    fn escaped_segments() {
        let mut tree = json!({"a/b": {"c~d": 1}});
        apply(&mut tree, &[PatchOperation::replace("/a~1b/c~0d", json!(2))], true).unwrap();
        assert_eq!(tree, json!({"a/b": {"c~d": 2}}));
    }

    #[test]
    fn unescape_order_is_tilde_one_first() {
        assert_eq!(unescape("~01"), "~1");
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(escape("a/~b"), "a~1~0b");
    }

    #[test]
    fn empty_key_segment() {
        let mut tree = json!({});
        apply(&mut tree, &[PatchOperation::add("/", json!(1))], true).unwrap();
        assert_eq!(tree, json!({"": 1}));
    }

    // ===========================================
    // Root Path Tests
    // ===========================================

    #[test]
    fn root_replace_refills_object_in_place() {
        let mut tree = json!({"a": 1});
        apply(&mut tree, &[PatchOperation::replace("", json!({"b": 2}))], true).unwrap();
        assert_eq!(tree, json!({"b": 2}));

        apply(&mut tree, &[PatchOperation::add("", json!([1, 2]))], true).unwrap();
        assert_eq!(tree, json!({"0": 1, "1": 2}));

        apply(&mut tree, &[PatchOperation::replace("", json!(7))], true).unwrap();
        assert_eq!(tree, json!({}));
    }

    #[test]
    fn root_replace_swaps_non_object_tree() {
        let mut tree = json!([1]);
        apply(&mut tree, &[PatchOperation::replace("", json!([1, 2]))], true).unwrap();
        assert_eq!(tree, json!([1, 2]));
    }

    #[test]
    fn root_remove_clears_in_place() {
        let mut tree = json!({"a": 1, "b": 2});
        apply(&mut tree, &[PatchOperation::remove("")], true).unwrap();
        assert_eq!(tree, json!({}));
    }

    #[test]
    fn root_test_compares_whole_tree() {
        let mut tree = json!({"a": [1]});
        assert!(apply(&mut tree, &[PatchOperation::test("", json!({"a": [1.0]}))], true).unwrap());
    }

    // ===========================================
    // Test Operation
    // ===========================================

    #[test]
    fn test_match_succeeds_without_mutation() {
        let mut tree = json!({"a": {"b": [1, {"c": true}]}});
        let before = tree.clone();
        let ok = apply(
            &mut tree,
            &[PatchOperation::test("/a/b", json!([1, {"c": true}]))],
            true,
        )
        .unwrap();
        assert!(ok);
        assert_eq!(tree, before);
    }

    #[test]
    fn test_mismatch_fails_without_mutation() {
        let mut tree = json!({"a": {"b": 1}});
        let before = tree.clone();
        let ok = apply(&mut tree, &[PatchOperation::test("/a/b", json!(2))], true).unwrap();
        assert!(!ok);
        assert_eq!(tree, before);
    }

    #[test]
    fn failing_test_skips_remaining_ops() {
        let mut tree = json!({"a": 1});
        let ok = apply(
            &mut tree,
            &[
                PatchOperation::test("/a", json!(5)),
                PatchOperation::replace("/a", json!(9)),
            ],
            false,
        )
        .unwrap();
        assert!(!ok);
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn test_missing_key_is_mismatch() {
        let mut tree = json!({});
        assert!(!apply(&mut tree, &[PatchOperation::test("/a", json!(null))], true).unwrap());
    }

    #[test]
    fn deep_equal_rules() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(deep_equal(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})));
        assert!(!deep_equal(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"b": 1})));
        assert!(!deep_equal(&json!("1"), &json!(1)));
        assert!(deep_equal(&json!(null), &json!(null)));
    }

    // ===========================================
    // Validation Tests
    // ===========================================

    #[test]
    fn non_numeric_array_segment_rejected() {
        let mut tree = json!({"a": [1]});
        let err = apply(&mut tree, &[PatchOperation::add("/a/x", json!(1))], true).unwrap_err();
        assert!(matches!(err, PatchError::IllegalArrayIndex { index: 0, .. }));
    }

    #[test]
    fn out_of_bounds_add_rejected_when_validating() {
        let mut tree = json!([1]);
        let err = apply(&mut tree, &[PatchOperation::add("/5", json!(2))], true).unwrap_err();
        assert!(matches!(err, PatchError::ValueOutOfBounds { .. }));
    }

    #[test]
    fn out_of_bounds_add_clamps_when_lenient() {
        let mut tree = json!([1]);
        apply(&mut tree, &[PatchOperation::add("/5", json!(2))], false).unwrap();
        assert_eq!(tree, json!([1, 2]));
    }

    #[test]
    fn missing_targets_rejected_when_validating() {
        let mut tree = json!({"a": {}, "l": []});
        let cases = [
            PatchOperation::remove("/a/missing"),
            PatchOperation::replace("/a/missing", json!(1)),
            PatchOperation::remove("/l/0"),
        ];
        for op in cases {
            let err = apply(&mut tree, std::slice::from_ref(&op), true).unwrap_err();
            assert!(
                matches!(err, PatchError::PathUnresolvable { .. }),
                "{:?} gave {:?}",
                op,
                err
            );
        }
    }

    #[test]
    fn missing_targets_tolerated_when_lenient() {
        let mut tree = json!({"a": {}});
        apply(&mut tree, &[PatchOperation::remove("/a/missing")], false).unwrap();
        apply(&mut tree, &[PatchOperation::replace("/a/k", json!(1))], false).unwrap();
        assert_eq!(tree, json!({"a": {"k": 1}}));
    }

    #[test]
    fn add_under_missing_parent_rejected() {
        let mut tree = json!({});
        let err = apply(&mut tree, &[PatchOperation::add("/x/y/z", json!(1))], false).unwrap_err();
        assert_eq!(
            err,
            PatchError::PathCannotAdd {
                index: 0,
                path: "/x/y/z".into()
            }
        );
    }

    #[test]
    fn path_through_scalar_rejected() {
        let mut tree = json!({"a": 1});
        let err = apply(&mut tree, &[PatchOperation::add("/a/b", json!(1))], true).unwrap_err();
        assert!(matches!(err, PatchError::InvalidTarget { .. }));
    }

    #[test]
    fn relative_path_rejected() {
        let mut tree = json!({"a": 1});
        let err = apply(&mut tree, &[PatchOperation::remove("a")], true).unwrap_err();
        assert!(matches!(err, PatchError::PathUnresolvable { .. }));
    }

    #[test]
    fn validate_leaves_tree_untouched_on_failure() {
        let tree = json!({"a": 1});
        let patch = vec![
            PatchOperation::replace("/a", json!(2)),
            PatchOperation::remove("/missing"),
        ];
        assert!(validate(&patch, &tree).is_err());
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn apply_validated_is_all_or_nothing() {
        let mut tree = json!({"a": 1, "list": [1, 2]});
        let patch = vec![
            PatchOperation::replace("/a", json!(2)),
            PatchOperation::add("/list/9", json!(3)),
        ];
        let err = apply_validated(&mut tree, &patch).unwrap_err();
        assert!(matches!(err, PatchError::ValueOutOfBounds { index: 1, .. }));
        assert_eq!(tree, json!({"a": 1, "list": [1, 2]}));
    }

    #[test]
    fn validate_reports_test_failure() {
        let tree = json!({"a": 1});
        let err = validate(&[PatchOperation::test("/a", json!(2))], &tree).unwrap_err();
        assert_eq!(
            err,
            PatchError::TestFailed {
                index: 0,
                path: "/a".into()
            }
        );
    }

    #[test]
    fn validated_result_matches_validation_copy() {
        let snapshot = json!({"users": [{"name": "a"}, {"name": "b"}], "count": 2});
        let patch = ops(json!([
            {"op": "add", "path": "/users/-", "value": {"name": "c"}},
            {"op": "replace", "path": "/count", "value": 3},
            {"op": "move", "from": "/users/0", "path": "/first"},
            {"op": "copy", "from": "/first", "path": "/users/0"},
            {"op": "test", "path": "/count", "value": 3}
        ]));

        let mut scratch = snapshot.clone();
        assert!(apply(&mut scratch, &patch, true).unwrap());

        let mut live = snapshot.clone();
        apply_validated(&mut live, &patch).unwrap();
        assert_eq!(live, scratch);
    }

    #[test]
    fn apply_body_decodes_and_applies() {
        let mut tree = json!({"n": 0});
        apply_body(&mut tree, &json!([{"op": "replace", "path": "/n", "value": 1}])).unwrap();
        assert_eq!(tree, json!({"n": 1}));
        assert_eq!(
            apply_body(&mut tree, &json!({"op": "replace"})),
            Err(PatchError::SequenceNotAnArray)
        );
    }

    // ===========================================
    // Edit Reporting Tests
    // ===========================================

    fn edits(tree: &mut Value, body: Value) -> Vec<Edit> {
        let mut seen = Vec::new();
        apply_body_with(tree, &body, |edit| seen.push(edit)).unwrap();
        seen
    }

    #[test]
    fn edits_resolve_array_positions() {
        let mut tree = json!({"rows": [1, 2], "a~b": {}});
        let seen = edits(
            &mut tree,
            json!([
                {"op": "add", "path": "/rows/-", "value": 3},
                {"op": "remove", "path": "/rows/0"},
                {"op": "replace", "path": "/a~0b", "value": 1}
            ]),
        );
        assert_eq!(
            seen,
            vec![
                Edit::Added(Slot::Index {
                    parent: "/rows".into(),
                    index: 2
                }),
                Edit::Removed(Slot::Index {
                    parent: "/rows".into(),
                    index: 0
                }),
                Edit::Replaced(Slot::Key {
                    parent: String::new(),
                    key: "a~b".into()
                }),
            ]
        );
        assert_eq!(
            Slot::Key {
                parent: String::new(),
                key: "a~b".into()
            }
            .pointer(),
            "/a~0b"
        );
    }

    #[test]
    fn move_reports_both_slots() {
        let mut tree = json!({"rows": [{"id": "a"}, {"id": "b"}]});
        let seen = edits(
            &mut tree,
            json!([{"op": "move", "from": "/rows/0", "path": "/rows/-"}]),
        );
        assert_eq!(
            seen,
            vec![Edit::Moved {
                from: Slot::Index {
                    parent: "/rows".into(),
                    index: 0
                },
                to: Slot::Index {
                    parent: "/rows".into(),
                    index: 1
                },
            }]
        );
        assert_eq!(tree, json!({"rows": [{"id": "b"}, {"id": "a"}]}));
    }

    #[test]
    fn failed_validation_reports_nothing() {
        let mut tree = json!({"a": 1});
        let mut seen = Vec::new();
        let body = json!([
            {"op": "remove", "path": "/a"},
            {"op": "remove", "path": "/missing"}
        ]);
        assert!(apply_body_with(&mut tree, &body, |edit| seen.push(edit)).is_err());
        assert!(seen.is_empty());
        assert_eq!(tree, json!({"a": 1}));
    }
}
