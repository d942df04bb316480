// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use crate::{
    store::{ContainerKind, Uid},
    values::Value,
};

/// One recorded mutation of a container.
///
/// A change can do two things: project the ambient value it implies onto a
/// copy of the container's storage before commit, and apply itself to the
/// real storage at commit. Both are the same operation on different copies,
/// which is what keeps ambient reads and committed state in agreement.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Sets (`Some`) or unsets (`None`) a complex property.
    Set {
        property: String,
        value: Option<Value>,
    },
    /// Inserts an element at `index`.
    Add { index: usize, element: Value },
    /// Removes the element at `index`; the removed element is kept for
    /// event listeners and reference bookkeeping.
    Remove { index: usize, element: Value },
    /// Removes every element; the removed elements are kept for listeners.
    Clear { removed: Vec<Value> },
}

impl Change {
    /// Applies this change to a container's property/element storage.
    ///
    /// Kind mismatches are ignored rather than raised: staging validated the
    /// container kind, and a container never changes kind, so a mismatch
    /// here cannot occur through the public API.
    pub(crate) fn apply(&self, kind: &mut ContainerKind) {
        match (self, kind) {
            (Change::Set { property, value }, ContainerKind::Complex { props }) => match value {
                Some(v) => {
                    props.insert(property.clone(), v.clone());
                }
                None => {
                    props.remove(property);
                }
            },
            (Change::Add { index, element }, ContainerKind::List { elems }) => {
                elems.insert((*index).min(elems.len()), element.clone());
            }
            (Change::Remove { index, .. }, ContainerKind::List { elems }) => {
                if *index < elems.len() {
                    elems.remove(*index);
                }
            }
            (Change::Clear { .. }, ContainerKind::List { elems }) => {
                elems.clear();
            }
            _ => {}
        }
    }
}

/// The ordered set of pending [`Change`]s for one container within one
/// transaction.
///
/// Anchored to the container's identity (its [`Uid`]), not to its current
/// storage, so clones never collide with their source.
#[derive(Debug, Clone)]
pub struct Changeset {
    target: Uid,
    changes: Vec<Change>,
}

impl Changeset {
    pub(crate) fn new(target: Uid) -> Self {
        Self {
            target,
            changes: Vec::new(),
        }
    }

    /// The container this changeset targets.
    pub fn target(&self) -> Uid {
        self.target
    }

    /// The recorded changes, in staging order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Whether at least one change is recorded.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub(crate) fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Appends another changeset's changes after this one's, preserving each
    /// side's internal order. Used when a nested transaction merges into its
    /// parent.
    pub(crate) fn absorb(&mut self, other: Changeset) {
        self.changes.extend(other.changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContainerKind;

    fn list_kind(elems: Vec<Value>) -> ContainerKind {
        ContainerKind::List { elems }
    }

    #[test]
    fn add_then_remove_projects_to_nothing() {
        let mut kind = list_kind(vec![]);
        Change::Add {
            index: 0,
            element: Value::from("e"),
        }
        .apply(&mut kind);
        Change::Remove {
            index: 0,
            element: Value::from("e"),
        }
        .apply(&mut kind);
        match kind {
            ContainerKind::List { elems } => assert!(elems.is_empty()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn clamped_add_appends() {
        let mut kind = list_kind(vec![Value::from("a")]);
        Change::Add {
            index: 99,
            element: Value::from("b"),
        }
        .apply(&mut kind);
        match kind {
            ContainerKind::List { elems } => {
                assert_eq!(elems, vec![Value::from("a"), Value::from("b")]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn set_and_unset_round_trip() {
        let mut props = crate::create_map();
        props.insert("family".to_string(), Value::from("DejaVu"));
        let mut kind = ContainerKind::Complex { props };

        Change::Set {
            property: "family".to_string(),
            value: Some(Value::from("Mono")),
        }
        .apply(&mut kind);
        Change::Set {
            property: "family".to_string(),
            value: None,
        }
        .apply(&mut kind);

        match kind {
            ContainerKind::Complex { props } => assert!(props.get("family").is_none()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn changeset_records_in_order() {
        let mut changeset = Changeset::new(Uid::mint());
        assert!(!changeset.has_changes());
        changeset.push(Change::Add {
            index: 0,
            element: Value::from("a"),
        });
        changeset.push(Change::Clear { removed: vec![] });
        assert!(changeset.has_changes());
        assert_eq!(changeset.changes().len(), 2);
        assert!(matches!(changeset.changes()[0], Change::Add { .. }));
    }
}
