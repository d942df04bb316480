// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The container arena.
//!
//! A [`ContainerStore`] owns every container state, keyed by [`Uid`].
//! Containers never hold direct references to each other — slots store uids —
//! so cyclic model graphs carry no ownership cycles, and "who points at me"
//! is answered by an explicit, committed [`ReferenceList`] per container.
//!
//! Two container kinds exist:
//!
//! - **Complex**: a typed record with named property slots.
//! - **List**: an ordered sequence of elements of a declared element type.
//!
//! # Identity and versioning
//!
//! Every container gets a process-unique [`Uid`] at construction — minted
//! from an ever-incrementing counter, never reset, never reused — and a
//! version that starts at 0 and is bumped only when a transaction whose
//! changeset for that container has changes commits. Cloning a container
//! copies its property/element storage but *not* its identity: the clone has
//! a fresh uid, version 0, no pending changeset, and no references.
//!
//! # Ambient reads
//!
//! All read accessors (`property`, `elements`, `len`, `references`, ...)
//! return the *ambient* view: the committed state projected through the
//! pending changes of every open transaction, innermost last. With no open
//! transaction, the ambient view is the committed state.
//!
//! # Mutation discipline
//!
//! Mutators (`set`, `list_add`, ...) never write committed state directly.
//! They stage [`Change`](crate::transaction::Change) records into the
//! ambient transaction's changeset — entering a one-shot, auto-accepted
//! scope when none is open — so committed state is only ever written by the
//! commit routine.

use crate::{
    Result,
    error::{Error, ValidationErrors},
    events::{EventSource, ListenerHandle, Listener},
    transaction::{Change, ChangeEvent, RefDelta, Transaction},
    types::{TypeRegistry, dynamic::AttributeContext},
    values::Value,
};
use smallvec::SmallVec;
use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// Process-wide uid mint. Never reset, so a uid is never reused and never
/// equal across instances, even across stores.
static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// The process-unique identity of a container.
///
/// Monotonically increasing, stable for the instance's lifetime, safe as a
/// map key for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct Uid(u64);

impl Uid {
    pub(crate) fn mint() -> Self {
        Uid(NEXT_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One committed back-reference: `referrer` contains the referenced
/// container, through the named property slot (`None` for a list position).
///
/// A reference never implies ownership of the referrer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct Reference {
    pub referrer: Uid,
    pub property: Option<String>,
}

impl Reference {
    pub fn new(referrer: Uid, property: Option<String>) -> Self {
        Self { referrer, property }
    }
}

/// An ordered collection of back-references.
///
/// Maintained by construction wiring and the transaction machinery only;
/// read-only from the outside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct ReferenceList(SmallVec<[Reference; 2]>);

impl ReferenceList {
    pub(crate) fn add(&mut self, reference: Reference) {
        self.0.push(reference);
    }

    /// Removes the first entry equal to `reference`, if any.
    pub(crate) fn remove(&mut self, reference: &Reference) {
        if let Some(at) = self.0.iter().position(|r| r == reference) {
            self.0.remove(at);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.0.iter().any(|r| r == reference)
    }
}

impl<'a> IntoIterator for &'a ReferenceList {
    type Item = &'a Reference;
    type IntoIter = std::slice::Iter<'a, Reference>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The property/element storage of one container.
#[derive(Debug, Clone)]
pub(crate) enum ContainerKind {
    Complex {
        props: HashMap<String, Value, crate::TesseraRandomState>,
    },
    List {
        elems: Vec<Value>,
    },
}

/// One container's committed state.
#[derive(Debug, Clone)]
pub(crate) struct ContainerState {
    pub(crate) uid: Uid,
    pub(crate) version: u64,
    /// Complex: the complex type name. List: the registered list-type name,
    /// or the element type name for ad-hoc lists.
    pub(crate) type_name: String,
    /// For lists, the declared element type.
    pub(crate) element_type: Option<String>,
    pub(crate) kind: ContainerKind,
    pub(crate) refs: ReferenceList,
}

/// The arena owning container states, the type registry, the committed
/// back-reference lists, per-container change event sources, and the stack
/// of open transactions.
///
/// See the [module documentation](self) for the reading and mutation
/// disciplines.
#[derive(Debug)]
pub struct ContainerStore {
    pub(crate) containers: HashMap<Uid, ContainerState, crate::TesseraRandomState>,
    pub(crate) registry: TypeRegistry,
    pub(crate) txns: Vec<Transaction>,
    pub(crate) next_version: u64,
    pub(crate) change_sources: HashMap<Uid, EventSource<ChangeEvent>, crate::TesseraRandomState>,
}

impl Default for ContainerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerStore {
    /// An empty store with the built-in simple types registered.
    pub fn new() -> Self {
        Self::with_registry(TypeRegistry::new())
    }

    /// An empty store using the given registry.
    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self {
            containers: crate::create_map(),
            registry,
            txns: Vec::new(),
            next_version: 0,
            change_sources: crate::create_map(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.containers.contains_key(&uid)
    }

    /// How many containers the store holds.
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    pub(crate) fn require(&self, uid: Uid) -> Result<&ContainerState> {
        self.containers
            .get(&uid)
            .ok_or(Error::UnknownContainer(uid))
    }

    // ------------------------------------------------------------------
    // construction

    /// Constructs a complex container of the given registered type.
    ///
    /// Property defaults from the type's descriptors are applied first, then
    /// the given values. Container-valued properties wire a committed
    /// back-reference on the referenced container immediately: this is the
    /// only reference write that bypasses the transaction machinery, and it
    /// is reserved for initial object-graph wiring. Re-parenting after
    /// construction always goes through changes.
    pub fn new_complex(
        &mut self,
        type_name: &str,
        props: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Uid> {
        let descriptor = self.registry.require(type_name)?;
        if !descriptor.is_complex() {
            return Err(Error::ArgumentInvalid {
                name: "type_name",
                reason: format!("`{type_name}` is not a complex type"),
            });
        }

        // defaults first, own storage second
        let mut storage: HashMap<String, Value, crate::TesseraRandomState> = crate::create_map();
        for p in self.registry.properties_of(type_name)? {
            if let Some(default) = p.default() {
                storage.insert(p.name().to_string(), Value::Simple(default.clone()));
            }
        }
        for (name, value) in props {
            if self.registry.property_of(type_name, &name)?.is_none() {
                return Err(Error::ArgumentInvalid {
                    name: "props",
                    reason: format!("`{type_name}` has no property `{name}`"),
                });
            }
            if let Value::Container(child) = &value
                && !self.contains(*child)
            {
                return Err(Error::UnknownContainer(*child));
            }
            storage.insert(name, value);
        }

        let uid = Uid::mint();
        let children: Vec<(String, Uid)> = storage
            .iter()
            .filter_map(|(name, v)| v.as_container().map(|c| (name.clone(), c)))
            .collect();
        self.containers.insert(
            uid,
            ContainerState {
                uid,
                version: 0,
                type_name: type_name.to_string(),
                element_type: None,
                kind: ContainerKind::Complex { props: storage },
                refs: ReferenceList::default(),
            },
        );
        for (property, child) in children {
            self.wire_reference(child, Reference::new(uid, Some(property)));
        }
        Ok(uid)
    }

    /// Constructs an empty list container.
    ///
    /// `type_name` is either a registered list type (whose declared element
    /// type and occurrence constraints apply) or any registered type, used
    /// directly as the element type of an ad-hoc list.
    pub fn new_list(&mut self, type_name: &str) -> Result<Uid> {
        let descriptor = self.registry.require(type_name)?;
        let element_type = match descriptor.kind() {
            crate::types::TypeKind::List { element, .. } => element.clone(),
            _ => type_name.to_string(),
        };
        let uid = Uid::mint();
        self.containers.insert(
            uid,
            ContainerState {
                uid,
                version: 0,
                type_name: type_name.to_string(),
                element_type: Some(element_type),
                kind: ContainerKind::List { elems: Vec::new() },
                refs: ReferenceList::default(),
            },
        );
        Ok(uid)
    }

    /// Shallow clone: property/element storage is copied (containers stay
    /// shared), while identity, version, changeset and references are reset.
    ///
    /// Shared children gain a committed back-reference to the clone, the
    /// same wiring that construction performs.
    pub fn clone_container(&mut self, uid: Uid) -> Result<Uid> {
        let source = self.require(uid)?;
        let type_name = source.type_name.clone();
        let element_type = source.element_type.clone();
        let kind = self.ambient_kind(uid)?;

        let clone = Uid::mint();
        let mut wires: Vec<(Uid, Reference)> = Vec::new();
        match &kind {
            ContainerKind::Complex { props } => {
                for (name, v) in props {
                    if let Some(child) = v.as_container() {
                        wires.push((child, Reference::new(clone, Some(name.clone()))));
                    }
                }
            }
            ContainerKind::List { elems } => {
                for v in elems {
                    if let Some(child) = v.as_container() {
                        wires.push((child, Reference::new(clone, None)));
                    }
                }
            }
        }
        self.containers.insert(
            clone,
            ContainerState {
                uid: clone,
                version: 0,
                type_name,
                element_type,
                kind,
                refs: ReferenceList::default(),
            },
        );
        for (child, reference) in wires {
            self.wire_reference(child, reference);
        }
        Ok(clone)
    }

    fn wire_reference(&mut self, target: Uid, reference: Reference) {
        if let Some(state) = self.containers.get_mut(&target) {
            state.refs.add(reference);
        }
    }

    // ------------------------------------------------------------------
    // ambient reads

    /// The committed state projected through every open transaction's
    /// pending changes for `uid`.
    pub(crate) fn ambient_kind(&self, uid: Uid) -> Result<ContainerKind> {
        let mut kind = self.require(uid)?.kind.clone();
        for txn in &self.txns {
            if let Some(changeset) = txn.changesets.get(&uid) {
                for change in changeset.changes() {
                    change.apply(&mut kind);
                }
            }
        }
        Ok(kind)
    }

    /// The container's commit version. Starts at 0; only ever bumped by a
    /// committing transaction whose changeset for this container had
    /// changes.
    pub fn version(&self, uid: Uid) -> Result<u64> {
        Ok(self.require(uid)?.version)
    }

    /// The container's declared type name.
    pub fn type_name(&self, uid: Uid) -> Result<&str> {
        Ok(&self.require(uid)?.type_name)
    }

    /// For lists, the declared element type.
    pub fn element_type(&self, uid: Uid) -> Result<Option<&str>> {
        Ok(self.require(uid)?.element_type.as_deref())
    }

    pub fn is_list(&self, uid: Uid) -> Result<bool> {
        Ok(matches!(self.require(uid)?.kind, ContainerKind::List { .. }))
    }

    pub fn is_complex(&self, uid: Uid) -> Result<bool> {
        Ok(matches!(
            self.require(uid)?.kind,
            ContainerKind::Complex { .. }
        ))
    }

    /// The ambient value of a complex property, or `None` when unset.
    pub fn property(&self, uid: Uid, name: &str) -> Result<Option<Value>> {
        match self.ambient_kind(uid)? {
            ContainerKind::Complex { props } => Ok(props.get(name).cloned()),
            ContainerKind::List { .. } => Err(Error::OperationInvalid {
                reason: format!("container {uid} is a list; it has no properties"),
            }),
        }
    }

    /// The ambient elements of a list.
    pub fn elements(&self, uid: Uid) -> Result<Vec<Value>> {
        match self.ambient_kind(uid)? {
            ContainerKind::List { elems } => Ok(elems),
            ContainerKind::Complex { .. } => Err(Error::OperationInvalid {
                reason: format!("container {uid} is a complex; it has no elements"),
            }),
        }
    }

    /// The ambient element count of a list.
    pub fn len(&self, uid: Uid) -> Result<usize> {
        Ok(self.elements(uid)?.len())
    }

    /// The ambient element at `index`, or `None` past the end.
    pub fn at(&self, uid: Uid, index: usize) -> Result<Option<Value>> {
        Ok(self.elements(uid)?.get(index).cloned())
    }

    /// The ambient reference list: committed back-references plus the
    /// pending reference deltas of every open transaction, in stack order.
    /// Pending removals subtract.
    pub fn references(&self, uid: Uid) -> Result<ReferenceList> {
        let mut refs = self.require(uid)?.refs.clone();
        for txn in &self.txns {
            for delta in &txn.ref_deltas {
                if delta.target == uid {
                    delta.apply(&mut refs);
                }
            }
        }
        Ok(refs)
    }

    // ------------------------------------------------------------------
    // change events

    /// The change event source for a container. Event type names follow the
    /// `"change:<phase>"` convention: `"change:init"`, `"change:will"`,
    /// `"change:finally"`.
    pub fn change_events(&mut self, uid: Uid) -> Result<EventSource<ChangeEvent>> {
        self.require(uid)?;
        Ok(self.change_sources.entry(uid).or_default().clone())
    }

    /// Registers a change listener; shorthand for
    /// `change_events(uid)?.on(types, listener, priority)`.
    pub fn on_change(
        &mut self,
        uid: Uid,
        types: &str,
        listener: &Listener<ChangeEvent>,
        priority: i32,
    ) -> Result<ListenerHandle> {
        Ok(self.change_events(uid)?.on(types, listener, priority))
    }

    // ------------------------------------------------------------------
    // mutators

    /// Sets a complex property to `value`.
    ///
    /// Staged as a [`Change::Set`]; setting a property to its current
    /// ambient value is a no-op and stages nothing. Read-only properties
    /// reject with an operation-invalid error.
    pub fn set(&mut self, target: Uid, property: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.check_settable(target, property)?;
        if let Value::Container(child) = &value
            && !self.contains(*child)
        {
            return Err(Error::UnknownContainer(*child));
        }

        let old = self.property(target, property)?;
        if old.as_ref() == Some(&value) {
            return Ok(());
        }

        let mut deltas = Vec::new();
        if let Some(Value::Container(o)) = &old {
            deltas.push(RefDelta::removed(
                *o,
                Reference::new(target, Some(property.to_string())),
                target,
            ));
        }
        if let Value::Container(n) = &value {
            deltas.push(RefDelta::added(
                *n,
                Reference::new(target, Some(property.to_string())),
                target,
            ));
        }
        self.apply_staged(
            target,
            Change::Set {
                property: property.to_string(),
                value: Some(value),
            },
            deltas,
        )
    }

    /// Unsets a complex property. A no-op when the property has no value.
    pub fn unset(&mut self, target: Uid, property: &str) -> Result<()> {
        self.check_settable(target, property)?;
        let Some(old) = self.property(target, property)? else {
            return Ok(());
        };

        let mut deltas = Vec::new();
        if let Value::Container(o) = &old {
            deltas.push(RefDelta::removed(
                *o,
                Reference::new(target, Some(property.to_string())),
                target,
            ));
        }
        self.apply_staged(
            target,
            Change::Set {
                property: property.to_string(),
                value: None,
            },
            deltas,
        )
    }

    fn check_settable(&self, target: Uid, property: &str) -> Result<()> {
        let state = self.require(target)?;
        if !matches!(state.kind, ContainerKind::Complex { .. }) {
            return Err(Error::OperationInvalid {
                reason: format!("container {target} is a list; it has no properties"),
            });
        }
        let descriptor = self
            .registry
            .property_of(&state.type_name, property)?
            .ok_or_else(|| Error::ArgumentInvalid {
                name: "property",
                reason: format!("`{}` has no property `{property}`", state.type_name),
            })?;
        if descriptor.is_read_only() {
            return Err(Error::OperationInvalid {
                reason: format!(
                    "property `{property}` of `{}` is read-only",
                    state.type_name
                ),
            });
        }
        Ok(())
    }

    /// Appends an element to a list; staged as a [`Change::Add`].
    pub fn list_add(&mut self, list: Uid, element: impl Into<Value>) -> Result<()> {
        let index = self.len(list)?;
        self.list_insert(list, index, element)
    }

    /// Inserts an element at `index` (at most the ambient length).
    pub fn list_insert(&mut self, list: Uid, index: usize, element: impl Into<Value>) -> Result<()> {
        let element = element.into();
        let len = self.len(list)?;
        if index > len {
            return Err(Error::ArgumentInvalid {
                name: "index",
                reason: format!("index {index} is out of bounds for length {len}"),
            });
        }
        if let Value::Container(child) = &element
            && !self.contains(*child)
        {
            return Err(Error::UnknownContainer(*child));
        }

        let mut deltas = Vec::new();
        if let Value::Container(child) = &element {
            deltas.push(RefDelta::added(*child, Reference::new(list, None), list));
        }
        self.apply_staged(list, Change::Add { index, element }, deltas)
    }

    /// Removes the first element equal (by key) to `element`. Returns
    /// whether an element was removed.
    pub fn list_remove(&mut self, list: Uid, element: &Value) -> Result<bool> {
        let elems = self.elements(list)?;
        let Some(index) = elems.iter().position(|e| e.key() == element.key()) else {
            return Ok(false);
        };
        self.remove_at(list, index, elems[index].clone())?;
        Ok(true)
    }

    /// Removes the element at `index`.
    pub fn list_remove_at(&mut self, list: Uid, index: usize) -> Result<()> {
        let elems = self.elements(list)?;
        let Some(element) = elems.get(index).cloned() else {
            return Err(Error::ArgumentInvalid {
                name: "index",
                reason: format!("index {index} is out of bounds for length {}", elems.len()),
            });
        };
        self.remove_at(list, index, element)
    }

    fn remove_at(&mut self, list: Uid, index: usize, element: Value) -> Result<()> {
        let mut deltas = Vec::new();
        if let Value::Container(child) = &element {
            deltas.push(RefDelta::removed(*child, Reference::new(list, None), list));
        }
        self.apply_staged(list, Change::Remove { index, element }, deltas)
    }

    /// Removes every element of a list; staged as a [`Change::Clear`].
    pub fn list_clear(&mut self, list: Uid) -> Result<()> {
        let removed = self.elements(list)?;
        if removed.is_empty() {
            return Ok(());
        }
        let mut deltas = Vec::new();
        for e in &removed {
            if let Value::Container(child) = e {
                deltas.push(RefDelta::removed(*child, Reference::new(list, None), list));
            }
        }
        self.apply_staged(list, Change::Clear { removed }, deltas)
    }

    // ------------------------------------------------------------------
    // validation

    /// Validates a container's ambient state against its type: required
    /// properties, discrete domains of simple-typed slots, and the
    /// occurrence range of typed lists.
    ///
    /// Violations are collected, never raised.
    pub fn validate(&self, uid: Uid) -> Result<ValidationErrors> {
        let state = self.require(uid)?;
        let cx = AttributeContext {
            store: self,
            owner: Some(uid),
        };
        let mut errors = ValidationErrors::new();
        match self.ambient_kind(uid)? {
            ContainerKind::Complex { props } => {
                let type_name = state.type_name.clone();
                for descriptor in self.registry.properties_of(&type_name)? {
                    let owner = format!("{type_name}.{}", descriptor.name());
                    match props.get(descriptor.name()) {
                        None => {
                            if descriptor.is_required() {
                                errors.push(crate::ValidationError::Required {
                                    owner: type_name.clone(),
                                    property: descriptor.name().to_string(),
                                });
                            }
                        }
                        Some(Value::Simple(s)) => {
                            errors.merge(self.registry.validate_simple(
                                descriptor.value_type(),
                                s.value(),
                                &cx,
                                &owner,
                            )?);
                        }
                        Some(Value::Container(_)) => {
                            // container-valued slots validate on their own
                        }
                    }
                }
            }
            ContainerKind::List { elems } => {
                let owner = state.type_name.clone();
                errors.merge(
                    self.registry
                        .validate_count(&owner, elems.len(), &cx, &owner)?,
                );
                if let Some(element_type) = state.element_type.as_deref() {
                    for e in &elems {
                        if let Value::Simple(s) = e {
                            errors.merge(self.registry.validate_simple(
                                element_type,
                                s.value(),
                                &cx,
                                &owner,
                            )?);
                        }
                    }
                }
            }
        }
        Ok(errors)
    }
}
