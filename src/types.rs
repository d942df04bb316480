// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The reflective type system.
//!
//! A [`TypeRegistry`] holds named [`TypeDescriptor`]s — simple types, complex
//! (record) types with [`PropertyDescriptor`]s, and list types — related by
//! single inheritance. Four simple base types are built in: `boolean`,
//! `integer`, `number` and `string`.
//!
//! Type-level attributes (the discrete [`Domain`] of a simple type, the
//! [`CountRange`] of a list type) are *dynamic*, *inherited* and
//! *monotonic*: they may be constants or per-instance functions, absent
//! local values fall back to the nearest ancestor, and every set can only
//! narrow the effective value. See [`dynamic`] for the combination law.
//!
//! # Example
//!
//! ```rust
//! use tessera::types::{TypeRegistry, domain::Domain, dynamic::AttributeContext};
//! use tessera::ContainerStore;
//!
//! let mut registry = TypeRegistry::new();
//! registry.define_simple("side", "string").unwrap();
//! registry
//!     .set_domain("side", Domain::new(["left", "right", "top", "bottom"]))
//!     .unwrap();
//!
//! let store = ContainerStore::new();
//! let cx = AttributeContext { store: &store, owner: None };
//! let effective = registry.effective_domain("side", &cx).unwrap().unwrap();
//! assert!(effective.contains_key("left"));
//! assert!(!effective.contains_key("center"));
//! ```

use crate::{
    Result,
    error::{Error, ValidationError, ValidationErrors},
    values::{Simple, SimpleValue},
};
use std::collections::HashMap;

pub mod domain;
pub mod dynamic;

use domain::{CountRange, Domain};
use dynamic::{AttributeContext, DynamicAttribute};

/// Describes one property of a complex type.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    value_type: String,
    read_only: bool,
    required: bool,
    default: Option<Simple>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, value_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
            read_only: false,
            required: false,
            default: None,
        }
    }

    /// Marks the property as not settable after construction.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks the property as requiring a value to validate.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// A value used when the property is not given at construction.
    pub fn with_default(mut self, default: impl Into<Simple>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &str {
        &self.value_type
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default(&self) -> Option<&Simple> {
        self.default.as_ref()
    }
}

/// What kind of values a type describes, plus the kind-specific attribute
/// chains.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// A scalar type, optionally restricted to a discrete domain.
    Simple {
        domain: Vec<DynamicAttribute<Domain>>,
    },
    /// A record type with named properties.
    Complex { properties: Vec<PropertyDescriptor> },
    /// A list type with a declared element type and occurrence constraints.
    List {
        element: String,
        count: Vec<DynamicAttribute<CountRange>>,
    },
}

/// A named type: kind, base link, and presentation metadata.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    base: Option<String>,
    label: Option<String>,
    description: Option<String>,
    kind: TypeKind,
    has_descendants: bool,
}

impl TypeDescriptor {
    pub fn simple(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Simple { domain: Vec::new() })
    }

    pub fn complex(
        name: impl Into<String>,
        properties: impl IntoIterator<Item = PropertyDescriptor>,
    ) -> Self {
        Self::with_kind(
            name,
            TypeKind::Complex {
                properties: properties.into_iter().collect(),
            },
        )
    }

    pub fn list(name: impl Into<String>, element: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            TypeKind::List {
                element: element.into(),
                count: Vec::new(),
            },
        )
    }

    fn with_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            base: None,
            label: None,
            description: None,
            kind,
            has_descendants: false,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Whether other types derive from this one. Once true, monotonic
    /// attributes of this type are frozen.
    pub fn has_descendants(&self) -> bool {
        self.has_descendants
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.kind, TypeKind::Simple { .. })
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.kind, TypeKind::Complex { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List { .. })
    }

    /// This type's own property descriptor, not consulting ancestors.
    /// Use [`TypeRegistry::property_of`] for the inherited view.
    pub fn own_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        match &self.kind {
            TypeKind::Complex { properties } => properties.iter().find(|p| p.name == name),
            _ => None,
        }
    }

    fn same_kind(&self, other: &TypeDescriptor) -> bool {
        matches!(
            (&self.kind, &other.kind),
            (TypeKind::Simple { .. }, TypeKind::Simple { .. })
                | (TypeKind::Complex { .. }, TypeKind::Complex { .. })
                | (TypeKind::List { .. }, TypeKind::List { .. })
        )
    }
}

/// The registry of named types.
///
/// Every [`ContainerStore`](crate::ContainerStore) owns one; complexes and
/// lists are constructed against it and validated through it.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDescriptor, crate::TesseraRandomState>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding the built-in simple base types `boolean`,
    /// `integer`, `number` and `string`.
    pub fn new() -> Self {
        let mut registry = Self {
            types: crate::create_map(),
        };
        for builtin in ["boolean", "integer", "number", "string"] {
            registry
                .define(TypeDescriptor::simple(builtin))
                .expect("built-in types are distinct");
        }
        registry
    }

    /// Registers a new type.
    ///
    /// The name must be unused, and the base (when given) must already be
    /// registered and of the same kind. Defining a subtype marks its base as
    /// having descendants, freezing the base's monotonic attributes.
    pub fn define(&mut self, descriptor: TypeDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::ArgumentRequired { name: "name" });
        }
        if self.types.contains_key(&descriptor.name) {
            return Err(Error::operation(format!(
                "type `{}` is already defined",
                descriptor.name
            )));
        }
        if let Some(base_name) = descriptor.base.clone() {
            let base = self
                .types
                .get_mut(&base_name)
                .ok_or_else(|| Error::UnknownType(base_name.clone()))?;
            if !base.same_kind(&descriptor) {
                return Err(Error::operation(format!(
                    "type `{}` cannot derive from `{base_name}`: kinds differ",
                    descriptor.name
                )));
            }
            base.has_descendants = true;
        }
        self.types.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Registers a simple type deriving from `base`.
    pub fn define_simple(&mut self, name: &str, base: &str) -> Result<()> {
        self.define(TypeDescriptor::simple(name).with_base(base))
    }

    /// Registers a complex type with the given own properties.
    pub fn define_complex(
        &mut self,
        name: &str,
        properties: impl IntoIterator<Item = PropertyDescriptor>,
    ) -> Result<()> {
        self.define(TypeDescriptor::complex(name, properties))
    }

    /// Registers a list type over `element`.
    pub fn define_list(&mut self, name: &str, element: &str) -> Result<()> {
        if !self.contains(element) {
            return Err(Error::UnknownType(element.to_string()));
        }
        self.define(TypeDescriptor::list(name, element))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&TypeDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    fn require_mut(&mut self, name: &str) -> Result<&mut TypeDescriptor> {
        self.types
            .get_mut(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    pub fn set_label(&mut self, name: &str, label: impl Into<String>) -> Result<()> {
        self.require_mut(name)?.label = Some(label.into());
        Ok(())
    }

    pub fn set_description(&mut self, name: &str, description: impl Into<String>) -> Result<()> {
        self.require_mut(name)?.description = Some(description.into());
        Ok(())
    }

    /// Narrows the domain of a simple type.
    ///
    /// The set is appended to the type's local attribute chain; the effective
    /// domain is the intersection of the inherited domain with every local
    /// value, so a set that would widen has no effect. Raises an
    /// operation-invalid error when the type already has descendants, since
    /// narrowing after specialization would break subtypes' assumptions.
    pub fn set_domain(
        &mut self,
        name: &str,
        attribute: impl Into<DynamicAttribute<Domain>>,
    ) -> Result<()> {
        let descriptor = self.require_mut(name)?;
        if descriptor.has_descendants {
            return Err(Error::operation(format!(
                "cannot restrict the domain of `{name}`: it already has descendants"
            )));
        }
        match &mut descriptor.kind {
            TypeKind::Simple { domain } => {
                domain.push(attribute.into());
                Ok(())
            }
            _ => Err(Error::operation(format!(
                "`{name}` is not a simple type; only simple types have a domain"
            ))),
        }
    }

    /// Narrows the occurrence range of a list type. Same monotonic and
    /// freezing rules as [`set_domain`](Self::set_domain).
    pub fn set_count_range(
        &mut self,
        name: &str,
        attribute: impl Into<DynamicAttribute<CountRange>>,
    ) -> Result<()> {
        let descriptor = self.require_mut(name)?;
        if descriptor.has_descendants {
            return Err(Error::operation(format!(
                "cannot restrict the occurrence range of `{name}`: it already has descendants"
            )));
        }
        match &mut descriptor.kind {
            TypeKind::List { count, .. } => {
                count.push(attribute.into());
                Ok(())
            }
            _ => Err(Error::operation(format!(
                "`{name}` is not a list type; only list types have an occurrence range"
            ))),
        }
    }

    /// The ancestor chain of `name`, root first, `name` last.
    fn chain(&self, name: &str) -> Result<Vec<&TypeDescriptor>> {
        let mut chain = Vec::new();
        let mut cursor = Some(name);
        while let Some(n) = cursor {
            let td = self.require(n)?;
            chain.push(td);
            cursor = td.base();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `actual` is `declared` or descends from it.
    pub fn is_assignable(&self, declared: &str, actual: &str) -> Result<bool> {
        Ok(self.chain(actual)?.iter().any(|td| td.name() == declared))
    }

    /// The effective domain of a simple type: the nearest ancestor's
    /// effective domain intersected with every local set, evaluated against
    /// `cx`. `None` means unrestricted.
    pub fn effective_domain(
        &self,
        name: &str,
        cx: &AttributeContext<'_>,
    ) -> Result<Option<Domain>> {
        let mut acc = None;
        for td in self.chain(name)? {
            if let TypeKind::Simple { domain } = &td.kind {
                acc = dynamic::effective(acc, domain, cx);
            }
        }
        Ok(acc)
    }

    /// The effective occurrence range of a list type. `None` means
    /// unrestricted.
    pub fn effective_count_range(
        &self,
        name: &str,
        cx: &AttributeContext<'_>,
    ) -> Result<Option<CountRange>> {
        let mut acc = None;
        for td in self.chain(name)? {
            if let TypeKind::List { count, .. } = &td.kind {
                acc = dynamic::effective(acc, count, cx);
            }
        }
        Ok(acc)
    }

    /// The property descriptor visible on `type_name` for `property`,
    /// consulting ancestors nearest-first.
    pub fn property_of(
        &self,
        type_name: &str,
        property: &str,
    ) -> Result<Option<&PropertyDescriptor>> {
        let chain = self.chain(type_name)?;
        Ok(chain
            .iter()
            .rev()
            .find_map(|td| td.own_property(property)))
    }

    /// Every property visible on `type_name`: ancestors' first, own last.
    pub fn properties_of(&self, type_name: &str) -> Result<Vec<&PropertyDescriptor>> {
        let mut out = Vec::new();
        for td in self.chain(type_name)? {
            if let TypeKind::Complex { properties } = &td.kind {
                out.extend(properties.iter());
            }
        }
        Ok(out)
    }

    /// Validates a simple value against a simple type's effective domain.
    ///
    /// Violations are collected, not raised: the result combines with other
    /// [`ValidationErrors`] deterministically.
    pub fn validate_simple(
        &self,
        type_name: &str,
        value: &SimpleValue,
        cx: &AttributeContext<'_>,
        owner: &str,
    ) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(domain) = self.effective_domain(type_name, cx)?
            && !domain.contains(value)
        {
            errors.push(ValidationError::NotInDomain {
                owner: owner.to_string(),
                value: value.key(),
            });
        }
        Ok(errors)
    }

    /// Validates a list length against a list type's effective range.
    pub fn validate_count(
        &self,
        type_name: &str,
        count: usize,
        cx: &AttributeContext<'_>,
        owner: &str,
    ) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(range) = self.effective_count_range(type_name, cx)?
            && !range.contains(count)
        {
            errors.push(ValidationError::CountOutOfRange {
                owner: owner.to_string(),
                actual: count,
                min: range.min,
                max: range.max,
            });
        }
        Ok(errors)
    }
}
