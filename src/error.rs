// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Error taxonomy.
//!
//! Errors fall into a few deliberately distinct families:
//!
//! - **Argument errors** ([`Error::ArgumentRequired`], [`Error::ArgumentInvalid`])
//!   and **operation errors** ([`Error::OperationInvalid`]) are raised
//!   synchronously at the call site, before any transaction is touched.
//! - **Validation errors** ([`ValidationError`]) are *returned, not raised*:
//!   they are collected into a [`ValidationErrors`] list so that multiple
//!   violations can be reported together, and merged deterministically.
//! - **Rejections** are ordinary [`Error`] values captured by the phase
//!   engine and surfaced as a terminal execution state.
//! - **Cancellation is not an error.** A canceled transaction or action is a
//!   first-class outcome carrying an optional reason; see
//!   [`CommitOutcome`](crate::transaction::CommitOutcome) and
//!   [`Execution`](crate::action::Execution).

use crate::store::Uid;
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Any error raised or captured by the store, transaction or action layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A required argument was not provided.
    #[error("required argument `{name}` is missing")]
    ArgumentRequired { name: &'static str },

    /// An argument was provided but has the wrong shape.
    #[error("invalid argument `{name}`: {reason}")]
    ArgumentInvalid { name: &'static str, reason: String },

    /// A structural change would violate an invariant, for example narrowing
    /// the domain of a type that already has descendants.
    #[error("operation not allowed: {reason}")]
    OperationInvalid { reason: String },

    /// The given uid does not resolve to a container in this store.
    #[error("unknown container {0}")]
    UnknownContainer(Uid),

    /// The given name does not resolve to a registered type.
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// One or more values failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// A listener returned a deferred reply in a phase that must complete
    /// synchronously. Only the `do` phase may suspend.
    #[error("listener for `{event_type}` returned a deferred reply outside the do phase")]
    ListenerDeferred { event_type: String },

    /// The ambient transaction was canceled before the mutation committed.
    ///
    /// Only produced by the implicit one-shot scope that mutators enter when
    /// no transaction is open; an explicit `accept` reports cancellation as
    /// an outcome instead.
    #[error("transaction canceled{}", fmt_reason(.reason))]
    Canceled { reason: Option<String> },

    /// A listener-originated failure with no more specific classification.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::OperationInvalid`].
    pub fn operation(reason: impl Into<String>) -> Self {
        Error::OperationInvalid {
            reason: reason.into(),
        }
    }

    /// Wraps an arbitrary message, typically produced by an event listener
    /// that wants to reject the in-flight execution.
    pub fn other(message: impl fmt::Display) -> Self {
        Error::Other(message.to_string())
    }
}

fn fmt_reason(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": {r}"),
        None => String::new(),
    }
}

/// A single validation violation.
///
/// Validation never raises; violations are collected into a
/// [`ValidationErrors`] list so a caller can report all of them at once.
#[derive(Error, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationError {
    /// A value's key is not present in the effective domain of its type.
    #[error("value `{value}` of `{owner}` is not in the allowed domain")]
    NotInDomain { owner: String, value: String },

    /// A list's length falls outside the effective occurrence range.
    #[error("`{owner}` has {actual} elements, outside the allowed range {min}..={}", fmt_max(.max))]
    CountOutOfRange {
        owner: String,
        actual: usize,
        min: usize,
        max: Option<usize>,
    },

    /// A property that requires a value has none.
    #[error("property `{property}` of `{owner}` requires a value")]
    Required { owner: String, property: String },
}

fn fmt_max(max: &Option<usize>) -> String {
    match max {
        Some(m) => m.to_string(),
        None => "∞".to_string(),
    }
}

/// An ordered, deduplicated collection of [`ValidationError`]s.
///
/// Two collections covering the same violations merge to the same result
/// regardless of the order they were produced in, which keeps reported
/// diagnostics stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one violation, keeping the collection sorted and free of
    /// duplicates.
    pub fn push(&mut self, error: ValidationError) {
        if let Err(at) = self.0.binary_search(&error) {
            self.0.insert(at, error);
        }
    }

    /// Merges another collection into this one. Deterministic: the result
    /// depends only on the union of the violations.
    pub fn merge(&mut self, other: ValidationErrors) {
        for e in other.0 {
            self.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// `Ok(())` when empty, otherwise `Err(Error::Validation(self))`.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(e: ValidationError) -> Self {
        let mut v = ValidationErrors::new();
        v.push(e);
        v
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no validation errors");
        }
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
