// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Dynamic, inherited, monotonic type attributes.
//!
//! A [`DynamicAttribute`] is a type-level attribute value that is either a
//! constant or a function evaluated against the owning instance. Attributes
//! accumulate: every set appends to the type's local chain, and the
//! *effective* value folds the inherited value with each local value through
//! [`Monotonic::combine`].
//!
//! Because `combine` can only ever narrow, a set that would grow the
//! effective value simply has no effect — by construction, not by runtime
//! policing. That makes the monotonic law (`effective = inherited ∩ local`)
//! a pure function that can be tested in isolation from the type system.

use crate::store::{ContainerStore, Uid};
use std::{fmt, sync::Arc};

/// The instance context a computed attribute is evaluated against.
#[derive(Clone, Copy)]
pub struct AttributeContext<'a> {
    /// The store holding the owning instance, for graph lookups.
    pub store: &'a ContainerStore,
    /// The owning instance, when the attribute is evaluated for one.
    pub owner: Option<Uid>,
}

/// A constant, or a per-instance function producing the attribute value.
pub enum DynamicAttribute<T> {
    Constant(T),
    Computed(Arc<dyn Fn(&AttributeContext<'_>) -> T>),
}

impl<T: Clone> DynamicAttribute<T> {
    /// Evaluates the attribute for the given instance context.
    pub fn resolve(&self, cx: &AttributeContext<'_>) -> T {
        match self {
            DynamicAttribute::Constant(v) => v.clone(),
            DynamicAttribute::Computed(f) => f(cx),
        }
    }

    /// The constant value, when this attribute is not computed.
    pub fn as_constant(&self) -> Option<&T> {
        match self {
            DynamicAttribute::Constant(v) => Some(v),
            DynamicAttribute::Computed(_) => None,
        }
    }
}

impl<T> From<T> for DynamicAttribute<T> {
    fn from(v: T) -> Self {
        DynamicAttribute::Constant(v)
    }
}

impl<T: Clone> Clone for DynamicAttribute<T> {
    fn clone(&self) -> Self {
        match self {
            DynamicAttribute::Constant(v) => DynamicAttribute::Constant(v.clone()),
            DynamicAttribute::Computed(f) => DynamicAttribute::Computed(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for DynamicAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicAttribute::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            DynamicAttribute::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Values whose combination can only narrow.
///
/// `combine(base, local)` must be a "shrinking" operation: the result never
/// admits anything `base` does not. Implementations:
/// [`Domain`](super::domain::Domain) (set intersection) and
/// [`CountRange`](super::domain::CountRange) (range intersection).
pub trait Monotonic: Sized {
    fn combine(base: &Self, local: &Self) -> Self;
}

/// Folds an inherited effective value with a chain of local attribute values.
///
/// `None` means "unconstrained": with no inherited value and no locals the
/// result is `None`, and the first local becomes the initial effective value.
pub fn effective<T>(
    inherited: Option<T>,
    locals: &[DynamicAttribute<T>],
    cx: &AttributeContext<'_>,
) -> Option<T>
where
    T: Monotonic + Clone,
{
    let mut acc = inherited;
    for local in locals {
        let v = local.resolve(cx);
        acc = Some(match acc {
            Some(base) => Monotonic::combine(&base, &v),
            None => v,
        });
    }
    acc
}
