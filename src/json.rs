// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Plain-object (JSON) representation of values and type definitions.
//!
//! Collaborators persist and transmit model state as plain JSON-like
//! structures. The shapes are:
//!
//! - **Simple values**: a bare JSON scalar when unambiguous, or the
//!   annotated form `{"_": type, "v": value, "f": formatted}` when the value
//!   carries a formatted label or the bare scalar would decode to a
//!   different payload kind.
//! - **Complexes**: property-keyed objects with the type under `"_"`:
//!   `{"_": "font", "family": "DejaVu", "size": 12.5}`.
//! - **Lists**: `{"_": ["side"], "d": ["left", "right"]}` — the element
//!   type as a one-element array, the elements under `"d"`.
//! - **Type definitions**: `{"id", "base", "label", "description"}` plus
//!   `"domain"` for simple types, `"element"`/`"count"` for list types and
//!   `"props"` for complex types.
//!
//! Deserializing a container spec constructs real containers in the store;
//! round-tripping yields values equal by type and key. Computed (function)
//! attribute values have no plain-object form and are omitted; constant
//! domain and count-range state round-trips without loss.
//!
//! # Example
//!
//! ```rust
//! use tessera::{ContainerStore, json};
//! use serde_json::json;
//!
//! let mut store = ContainerStore::new();
//! store.registry_mut().define_complex("font", [
//!     tessera::types::PropertyDescriptor::new("family", "string"),
//! ]).unwrap();
//!
//! let font = json::from_spec(&mut store, &json!({"_": "font", "family": "DejaVu"})).unwrap();
//! let spec = json::to_spec(&store, &font).unwrap();
//! assert_eq!(spec["_"], "font");
//! assert_eq!(spec["family"], "DejaVu");
//! ```

use crate::{
    Result,
    error::Error,
    store::{ContainerKind, ContainerStore, Uid},
    types::{PropertyDescriptor, TypeDescriptor, TypeKind, TypeRegistry, domain},
    types::dynamic::{DynamicAttribute, Monotonic},
    values::{Simple, SimpleValue, Value},
};
use serde_json::{Map, Value as Json};
use std::collections::HashSet;

/// Converts a [`SimpleValue`] to a bare [`serde_json::Value`] scalar.
impl From<&SimpleValue> for Json {
    fn from(value: &SimpleValue) -> Self {
        match value {
            SimpleValue::Bool(v) => (*v).into(),
            SimpleValue::I64(v) => (*v).into(),
            SimpleValue::U64(v) => (*v).into(),
            SimpleValue::Double(v) => (*v).into(),
            SimpleValue::String(v) => v.clone().into(),
        }
    }
}

/// Whether the bare scalar form of `value` would decode back to the same
/// payload kind.
fn decodes_bare(value: &SimpleValue) -> bool {
    match value {
        SimpleValue::Bool(_) | SimpleValue::I64(_) | SimpleValue::String(_) => true,
        // small u64s decode as i64
        SimpleValue::U64(v) => *v > i64::MAX as u64,
        SimpleValue::Double(v) => v.is_finite(),
    }
}

fn simple_to_spec(simple: &Simple) -> Result<Json> {
    if let SimpleValue::Double(v) = simple.value()
        && !v.is_finite()
    {
        return Err(Error::ArgumentInvalid {
            name: "value",
            reason: format!("`{v}` has no JSON representation"),
        });
    }
    if simple.formatted().is_none() && decodes_bare(simple.value()) {
        return Ok(simple.value().into());
    }
    let mut obj = Map::new();
    obj.insert("_".to_string(), simple.type_name().into());
    obj.insert("v".to_string(), simple.value().into());
    if let Some(formatted) = simple.formatted() {
        obj.insert("f".to_string(), formatted.into());
    }
    Ok(Json::Object(obj))
}

/// Serializes a value — simple, complex or list — to its plain-object spec.
///
/// Containers are walked recursively through the store's ambient state.
/// A cyclic container graph has no tree representation and is rejected with
/// an operation-invalid error.
pub fn to_spec(store: &ContainerStore, value: &Value) -> Result<Json> {
    let mut visiting = HashSet::new();
    value_to_spec(store, value, &mut visiting)
}

fn value_to_spec(store: &ContainerStore, value: &Value, visiting: &mut HashSet<Uid>) -> Result<Json> {
    match value {
        Value::Simple(simple) => simple_to_spec(simple),
        Value::Container(uid) => container_to_spec(store, *uid, visiting),
    }
}

fn container_to_spec(
    store: &ContainerStore,
    uid: Uid,
    visiting: &mut HashSet<Uid>,
) -> Result<Json> {
    if !visiting.insert(uid) {
        return Err(Error::operation(format!(
            "container {uid} participates in a reference cycle; cycles have no spec form"
        )));
    }
    let type_name = store.type_name(uid)?.to_string();
    let spec = match store.ambient_kind(uid)? {
        ContainerKind::Complex { props } => {
            let mut obj = Map::new();
            obj.insert("_".to_string(), type_name.into());
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                obj.insert(name.clone(), value_to_spec(store, &props[name], visiting)?);
            }
            Json::Object(obj)
        }
        ContainerKind::List { elems } => {
            let element_type = store
                .element_type(uid)?
                .expect("lists always declare an element type")
                .to_string();
            let mut data = Vec::with_capacity(elems.len());
            for e in &elems {
                data.push(value_to_spec(store, e, visiting)?);
            }
            let mut obj = Map::new();
            obj.insert("_".to_string(), Json::Array(vec![element_type.into()]));
            obj.insert("d".to_string(), Json::Array(data));
            Json::Object(obj)
        }
    };
    visiting.remove(&uid);
    Ok(spec)
}

/// Parses a plain-object spec, constructing containers in the store as
/// needed, and returns the resulting value.
pub fn from_spec(store: &mut ContainerStore, spec: &Json) -> Result<Value> {
    match spec {
        Json::Null => Err(Error::ArgumentInvalid {
            name: "spec",
            reason: "null is not a value".to_string(),
        }),
        Json::Bool(v) => Ok(Value::from(*v)),
        Json::Number(_) => Ok(Value::Simple(Simple::new(number_from_spec(spec)?))),
        Json::String(v) => Ok(Value::from(v.as_str())),
        Json::Array(_) => Err(Error::ArgumentInvalid {
            name: "spec",
            reason: "lists use the object form: {\"_\": [element], \"d\": [...]}".to_string(),
        }),
        Json::Object(obj) => object_from_spec(store, obj),
    }
}

fn number_from_spec(spec: &Json) -> Result<SimpleValue> {
    let n = spec.as_number().ok_or_else(|| Error::ArgumentInvalid {
        name: "spec",
        reason: format!("expected a number, got `{spec}`"),
    })?;
    if let Some(v) = n.as_i64() {
        Ok(SimpleValue::I64(v))
    } else if let Some(v) = n.as_u64() {
        Ok(SimpleValue::U64(v))
    } else {
        Ok(SimpleValue::Double(n.as_f64().expect("finite JSON number")))
    }
}

fn object_from_spec(store: &mut ContainerStore, obj: &Map<String, Json>) -> Result<Value> {
    match obj.get("_") {
        Some(Json::String(type_name)) if obj.contains_key("v") => {
            annotated_simple_from_spec(store.registry(), type_name, obj)
        }
        Some(Json::String(type_name)) => {
            let type_name = type_name.clone();
            let mut props = Vec::new();
            for (name, child) in obj {
                if name == "_" {
                    continue;
                }
                props.push((name.clone(), from_spec(store, child)?));
            }
            Ok(Value::Container(store.new_complex(&type_name, props)?))
        }
        Some(Json::Array(annotation)) => {
            let [Json::String(element_type)] = annotation.as_slice() else {
                return Err(Error::ArgumentInvalid {
                    name: "spec",
                    reason: "a list annotation is a one-element array: [element]".to_string(),
                });
            };
            let element_type = element_type.clone();
            let data = match obj.get("d") {
                Some(Json::Array(data)) => data.clone(),
                Some(other) => {
                    return Err(Error::ArgumentInvalid {
                        name: "spec",
                        reason: format!("`d` must be an array, got `{other}`"),
                    });
                }
                None => Vec::new(),
            };
            let list = store.new_list(&element_type)?;
            for child in &data {
                let element = from_spec(store, child)?;
                store.list_add(list, element)?;
            }
            Ok(Value::Container(list))
        }
        _ => Err(Error::ArgumentInvalid {
            name: "spec",
            reason: "an object spec requires a `_` type annotation".to_string(),
        }),
    }
}

fn annotated_simple_from_spec(
    registry: &TypeRegistry,
    type_name: &str,
    obj: &Map<String, Json>,
) -> Result<Value> {
    // resolve derived simple types to their built-in root
    let mut root = registry.require(type_name)?;
    if !root.is_simple() {
        return Err(Error::ArgumentInvalid {
            name: "spec",
            reason: format!("`{type_name}` is not a simple type"),
        });
    }
    while let Some(base) = root.base() {
        root = registry.require(base)?;
    }

    let v = &obj["v"];
    let payload = match (root.name(), v) {
        ("boolean", Json::Bool(b)) => SimpleValue::Bool(*b),
        ("integer", n @ Json::Number(_)) => match number_from_spec(n)? {
            p @ (SimpleValue::I64(_) | SimpleValue::U64(_)) => p,
            _ => {
                return Err(Error::ArgumentInvalid {
                    name: "spec",
                    reason: format!("`{v}` is not an integer"),
                });
            }
        },
        ("number", n @ Json::Number(_)) => SimpleValue::Double(
            n.as_f64().expect("checked: JSON number"),
        ),
        ("string", Json::String(s)) => SimpleValue::String(s.clone()),
        _ => {
            return Err(Error::ArgumentInvalid {
                name: "spec",
                reason: format!("`{v}` is not a valid `{type_name}` payload"),
            });
        }
    };
    let simple = match obj.get("f") {
        Some(Json::String(formatted)) => Simple::with_formatted(payload, formatted.as_str()),
        Some(other) => {
            return Err(Error::ArgumentInvalid {
                name: "spec",
                reason: format!("`f` must be a string, got `{other}`"),
            });
        }
        None => Simple::new(payload),
    };
    Ok(Value::Simple(simple))
}

/// Serializes a type definition: identity, base, presentation metadata, and
/// the constant part of its monotonic attribute state.
///
/// Computed attribute values are omitted — a function has no plain-object
/// form; constant domain and count-range state round-trips.
pub fn type_to_spec(registry: &TypeRegistry, name: &str) -> Result<Json> {
    let descriptor = registry.require(name)?;
    let mut obj = Map::new();
    obj.insert("id".to_string(), descriptor.name().into());
    if let Some(base) = descriptor.base() {
        obj.insert("base".to_string(), base.into());
    }
    if let Some(label) = descriptor.label() {
        obj.insert("label".to_string(), label.into());
    }
    if let Some(description) = descriptor.description() {
        obj.insert("description".to_string(), description.into());
    }
    match descriptor.kind() {
        TypeKind::Simple { domain } => {
            if let Some(constant) = fold_constants(domain) {
                let mut values = Vec::with_capacity(constant.len());
                for v in constant.iter() {
                    values.push(simple_to_spec(v)?);
                }
                obj.insert("domain".to_string(), Json::Array(values));
            }
        }
        TypeKind::List { element, count } => {
            obj.insert("element".to_string(), element.as_str().into());
            if let Some(range) = fold_constants(count) {
                let mut spec = Map::new();
                spec.insert("min".to_string(), range.min.into());
                if let Some(max) = range.max {
                    spec.insert("max".to_string(), max.into());
                }
                obj.insert("count".to_string(), Json::Object(spec));
            }
        }
        TypeKind::Complex { properties } => {
            let mut props = Vec::with_capacity(properties.len());
            for p in properties {
                let mut spec = Map::new();
                spec.insert("name".to_string(), p.name().into());
                spec.insert("type".to_string(), p.value_type().into());
                if p.is_read_only() {
                    spec.insert("read_only".to_string(), true.into());
                }
                if p.is_required() {
                    spec.insert("required".to_string(), true.into());
                }
                if let Some(default) = p.default() {
                    spec.insert("default".to_string(), simple_to_spec(default)?);
                }
                props.push(Json::Object(spec));
            }
            obj.insert("props".to_string(), Json::Array(props));
        }
    }
    Ok(Json::Object(obj))
}

/// Folds a chain of attribute values down to its constant part; computed
/// entries are skipped with a note, since they cannot be represented.
fn fold_constants<T: Monotonic + Clone>(locals: &[DynamicAttribute<T>]) -> Option<T> {
    let mut acc: Option<T> = None;
    for local in locals {
        match local.as_constant() {
            Some(v) => {
                acc = Some(match acc {
                    Some(base) => Monotonic::combine(&base, v),
                    None => v.clone(),
                });
            }
            None => {
                tracing::debug!("computed attribute values have no spec form; omitted");
            }
        }
    }
    acc
}

/// Parses a type definition spec and registers the type. Returns the new
/// type's id.
pub fn type_from_spec(registry: &mut TypeRegistry, spec: &Json) -> Result<String> {
    let obj = spec.as_object().ok_or_else(|| Error::ArgumentInvalid {
        name: "spec",
        reason: "a type spec is an object".to_string(),
    })?;
    let id = obj
        .get("id")
        .and_then(Json::as_str)
        .ok_or(Error::ArgumentRequired { name: "id" })?
        .to_string();
    let base = obj.get("base").and_then(Json::as_str).map(str::to_string);

    let mut descriptor = if let Some(props) = obj.get("props") {
        let props = props.as_array().ok_or_else(|| Error::ArgumentInvalid {
            name: "props",
            reason: "`props` must be an array".to_string(),
        })?;
        let mut descriptors = Vec::with_capacity(props.len());
        for p in props {
            descriptors.push(property_from_spec(registry, p)?);
        }
        TypeDescriptor::complex(&id, descriptors)
    } else if let Some(element) = obj.get("element") {
        let element = element.as_str().ok_or_else(|| Error::ArgumentInvalid {
            name: "element",
            reason: "`element` must be a type name".to_string(),
        })?;
        TypeDescriptor::list(&id, element)
    } else {
        TypeDescriptor::simple(&id)
    };
    if let Some(base) = base {
        descriptor = descriptor.with_base(base);
    }
    if let Some(label) = obj.get("label").and_then(Json::as_str) {
        descriptor = descriptor.with_label(label);
    }
    if let Some(description) = obj.get("description").and_then(Json::as_str) {
        descriptor = descriptor.with_description(description);
    }
    registry.define(descriptor)?;

    if let Some(domain) = obj.get("domain") {
        let values = domain.as_array().ok_or_else(|| Error::ArgumentInvalid {
            name: "domain",
            reason: "`domain` must be an array".to_string(),
        })?;
        let mut simples = Vec::with_capacity(values.len());
        for v in values {
            simples.push(domain_value_from_spec(registry, v)?);
        }
        registry.set_domain(&id, domain::Domain::new(simples))?;
    }
    if let Some(count) = obj.get("count") {
        let count = count.as_object().ok_or_else(|| Error::ArgumentInvalid {
            name: "count",
            reason: "`count` must be an object".to_string(),
        })?;
        let min = count
            .get("min")
            .and_then(Json::as_u64)
            .unwrap_or(0) as usize;
        let max = count.get("max").and_then(Json::as_u64).map(|m| m as usize);
        registry.set_count_range(&id, domain::CountRange::new(min, max))?;
    }
    Ok(id)
}

fn property_from_spec(registry: &TypeRegistry, spec: &Json) -> Result<PropertyDescriptor> {
    let obj = spec.as_object().ok_or_else(|| Error::ArgumentInvalid {
        name: "props",
        reason: "a property spec is an object".to_string(),
    })?;
    let name = obj
        .get("name")
        .and_then(Json::as_str)
        .ok_or(Error::ArgumentRequired { name: "name" })?;
    let value_type = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or(Error::ArgumentRequired { name: "type" })?;
    let mut descriptor = PropertyDescriptor::new(name, value_type);
    if obj.get("read_only").and_then(Json::as_bool).unwrap_or(false) {
        descriptor = descriptor.read_only();
    }
    if obj.get("required").and_then(Json::as_bool).unwrap_or(false) {
        descriptor = descriptor.required();
    }
    if let Some(default) = obj.get("default") {
        let Value::Simple(simple) = simple_value_only(registry, default)? else {
            unreachable!("simple_value_only returns simples");
        };
        descriptor = descriptor.with_default(simple);
    }
    Ok(descriptor)
}

fn domain_value_from_spec(registry: &TypeRegistry, spec: &Json) -> Result<Simple> {
    match simple_value_only(registry, spec)? {
        Value::Simple(simple) => Ok(simple),
        Value::Container(_) => unreachable!("simple_value_only returns simples"),
    }
}

/// Parses a spec that must denote a simple value (no containers).
fn simple_value_only(registry: &TypeRegistry, spec: &Json) -> Result<Value> {
    match spec {
        Json::Bool(v) => Ok(Value::from(*v)),
        Json::Number(_) => Ok(Value::Simple(Simple::new(number_from_spec(spec)?))),
        Json::String(v) => Ok(Value::from(v.as_str())),
        Json::Object(obj) => match obj.get("_") {
            Some(Json::String(type_name)) if obj.contains_key("v") => {
                annotated_simple_from_spec(registry, type_name, obj)
            }
            _ => Err(Error::ArgumentInvalid {
                name: "spec",
                reason: format!("expected a simple value, got `{spec}`"),
            }),
        },
        _ => Err(Error::ArgumentInvalid {
            name: "spec",
            reason: format!("expected a simple value, got `{spec}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> ContainerStore {
        let mut store = ContainerStore::new();
        store
            .registry_mut()
            .define_complex(
                "font",
                [
                    PropertyDescriptor::new("family", "string"),
                    PropertyDescriptor::new("size", "number"),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn bare_scalars_round_trip() {
        let mut store = fixture();
        for spec in [json!(true), json!(-3), json!("abc"), json!(2.5)] {
            let value = from_spec(&mut store, &spec).unwrap();
            assert_eq!(to_spec(&store, &value).unwrap(), spec);
        }
    }

    #[test]
    fn formatted_simple_uses_annotated_form() {
        let store = ContainerStore::new();
        let value = Value::Simple(Simple::with_formatted(1234.5, "1,234.5"));
        let spec = to_spec(&store, &value).unwrap();
        assert_eq!(spec, json!({"_": "number", "v": 1234.5, "f": "1,234.5"}));

        let mut store = store;
        let back = from_spec(&mut store, &spec).unwrap();
        assert_eq!(back, value);
        let simple = back.as_simple().unwrap();
        assert_eq!(simple.formatted(), Some("1,234.5"));
    }

    #[test]
    fn small_u64_is_annotated_large_is_bare() {
        let store = ContainerStore::new();
        let small = to_spec(&store, &Value::from(42u64)).unwrap();
        assert_eq!(small, json!({"_": "integer", "v": 42}));

        let large = to_spec(&store, &Value::from(u64::MAX)).unwrap();
        assert_eq!(large, json!(u64::MAX));
    }

    #[test]
    fn non_finite_double_has_no_spec() {
        let store = ContainerStore::new();
        assert!(to_spec(&store, &Value::from(f64::NAN)).is_err());
    }

    #[test]
    fn complex_round_trip_by_type_and_key() {
        let mut store = fixture();
        let spec = json!({"_": "font", "family": "DejaVu", "size": 12.5});
        let font = from_spec(&mut store, &spec).unwrap();
        let out = to_spec(&store, &font).unwrap();
        assert_eq!(out, spec);

        // a second round trip constructs a distinct container with equal content
        let again = from_spec(&mut store, &out).unwrap();
        assert_ne!(again, font, "containers differ by identity");
        assert_eq!(to_spec(&store, &again).unwrap(), out);
    }

    #[test]
    fn list_round_trip() {
        let mut store = fixture();
        let spec = json!({"_": ["string"], "d": ["left", "right"]});
        let list = from_spec(&mut store, &spec).unwrap();
        let uid = list.as_container().unwrap();
        assert_eq!(store.len(uid).unwrap(), 2);
        assert_eq!(to_spec(&store, &list).unwrap(), spec);
    }

    #[test]
    fn nested_containers_round_trip() {
        let mut store = fixture();
        store
            .registry_mut()
            .define_complex(
                "style",
                [PropertyDescriptor::new("font", "font")],
            )
            .unwrap();
        let spec = json!({"_": "style", "font": {"_": "font", "family": "Mono", "size": 10.5}});
        let style = from_spec(&mut store, &spec).unwrap();
        assert_eq!(to_spec(&store, &style).unwrap(), spec);

        // construction wired the back-reference
        let font_uid = store
            .property(style.as_container().unwrap(), "font")
            .unwrap()
            .unwrap()
            .as_container()
            .unwrap();
        assert_eq!(store.references(font_uid).unwrap().len(), 1);
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let mut store = ContainerStore::new();
        store
            .registry_mut()
            .define_complex("node", [PropertyDescriptor::new("next", "node")])
            .unwrap();
        let a = store.new_complex("node", []).unwrap();
        let b = store
            .new_complex("node", [("next".to_string(), Value::Container(a))])
            .unwrap();
        store.set(a, "next", Value::Container(b)).unwrap();

        assert!(matches!(
            to_spec(&store, &Value::Container(a)),
            Err(Error::OperationInvalid { .. })
        ));
    }

    #[test]
    fn type_definition_round_trip_preserves_attribute_state() {
        let mut registry = TypeRegistry::new();
        registry.define_simple("side", "string").unwrap();
        registry.set_label("side", "Side").unwrap();
        registry
            .set_description("side", "Where the legend goes")
            .unwrap();
        registry
            .set_domain("side", domain::Domain::new(["left", "right"]))
            .unwrap();

        let spec = type_to_spec(&registry, "side").unwrap();
        assert_eq!(
            spec,
            json!({
                "id": "side",
                "base": "string",
                "label": "Side",
                "description": "Where the legend goes",
                "domain": ["left", "right"],
            })
        );

        let mut fresh = TypeRegistry::new();
        let id = type_from_spec(&mut fresh, &spec).unwrap();
        assert_eq!(type_to_spec(&fresh, &id).unwrap(), spec);
    }

    #[test]
    fn list_type_round_trip_preserves_count() {
        let mut registry = TypeRegistry::new();
        registry.define_list("sides", "string").unwrap();
        registry
            .set_count_range("sides", domain::CountRange::new(1, Some(2)))
            .unwrap();

        let spec = type_to_spec(&registry, "sides").unwrap();
        assert_eq!(
            spec,
            json!({"id": "sides", "element": "string", "count": {"min": 1, "max": 2}})
        );

        let mut fresh = TypeRegistry::new();
        let id = type_from_spec(&mut fresh, &spec).unwrap();
        assert_eq!(type_to_spec(&fresh, &id).unwrap(), spec);
    }

    #[test]
    fn complex_type_round_trip() {
        let mut registry = TypeRegistry::new();
        registry
            .define(
                TypeDescriptor::complex(
                    "font",
                    [
                        PropertyDescriptor::new("family", "string")
                            .with_default(Simple::new("sans")),
                        PropertyDescriptor::new("id", "string").read_only(),
                    ],
                )
                .with_label("Font"),
            )
            .unwrap();

        let spec = type_to_spec(&registry, "font").unwrap();
        let mut fresh = TypeRegistry::new();
        let id = type_from_spec(&mut fresh, &spec).unwrap();
        assert_eq!(type_to_spec(&fresh, &id).unwrap(), spec);

        let p = fresh.property_of("font", "family").unwrap().unwrap();
        assert_eq!(p.default().unwrap().key(), "sans");
        assert!(fresh.property_of("font", "id").unwrap().unwrap().is_read_only());
    }

    #[test]
    fn derived_simple_annotation_resolves_to_root_payload() {
        let mut store = ContainerStore::new();
        store.registry_mut().define_simple("side", "string").unwrap();
        let value = from_spec(&mut store, &json!({"_": "side", "v": "left"})).unwrap();
        assert_eq!(value, Value::from("left"));
    }
}
