//! Versioned node properties.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Properties of a single node, ordered by name.
pub type PropMap = BTreeMap<String, Bytes>;

/// One property edit. `value: None` removes the property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropChange {
    pub name: String,
    pub value: Option<Bytes>,
}

impl PropChange {
    pub fn set(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// The edits that turn `old` into `new`, in name order.
pub fn diff_props(old: &PropMap, new: &PropMap) -> Vec<PropChange> {
    let mut changes = Vec::new();
    for (name, old_value) in old {
        match new.get(name) {
            Some(new_value) if new_value == old_value => {}
            Some(new_value) => changes.push(PropChange::set(name.clone(), new_value.clone())),
            None => changes.push(PropChange::delete(name.clone())),
        }
    }
    for (name, new_value) in new {
        if !old.contains_key(name) {
            changes.push(PropChange::set(name.clone(), new_value.clone()));
        }
    }
    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

/// Apply one edit in place.
pub fn apply_prop_change(props: &mut PropMap, name: &str, value: Option<&[u8]>) {
    match value {
        Some(v) => {
            props.insert(name.to_string(), Bytes::copy_from_slice(v));
        }
        None => {
            props.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> PropMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
            .collect()
    }

    #[test]
    fn identical_maps_have_no_changes() {
        let a = props(&[("x", "1")]);
        assert!(diff_props(&a, &a).is_empty());
    }

    #[test]
    fn detects_set_modify_delete() {
        let old = props(&[("keep", "1"), ("modify", "a"), ("drop", "z")]);
        let new = props(&[("keep", "1"), ("modify", "b"), ("add", "n")]);
        let changes = diff_props(&old, &new);
        assert_eq!(
            changes,
            vec![
                PropChange::set("add", "n"),
                PropChange::delete("drop"),
                PropChange::set("modify", "b"),
            ]
        );
    }

    #[test]
    fn applying_diff_reproduces_target() {
        let old = props(&[("a", "1"), ("b", "2")]);
        let new = props(&[("b", "3"), ("c", "4")]);
        let mut patched = old.clone();
        for change in diff_props(&old, &new) {
            apply_prop_change(&mut patched, &change.name, change.value.as_deref());
        }
        assert_eq!(patched, new);
    }
}
