//! Host-side validation of a submitted configuration against a compiled schema.
//!
//! Runs before projection; the projector relies on its guarantees.

use crdform_core::{Cardinality, Diagnostic};
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::{AttrType, Attribute, CompiledValidator, ResourceSchema};

/// Validate `config` (keyed by wire names) and return every problem found. `null` counts as unset.
pub fn validate(schema: &ResourceSchema, config: &Value) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    match config {
        Value::Object(map) => check_object(&schema.attributes, map, "", &mut diags),
        other => diags.push(
            Diagnostic::error("Invalid configuration").with_detail(format!("expected an object, got {}", json_kind(other))),
        ),
    }
    diags
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() { name.to_string() } else { format!("{}.{}", parent, name) }
}

fn is_set(v: Option<&Value>) -> bool {
    !matches!(v, None | Some(Value::Null))
}

fn check_object(attrs: &[Attribute], map: &Map<String, Value>, path: &str, diags: &mut Vec<Diagnostic>) {
    for key in map.keys() {
        if !attrs.iter().any(|a| &a.name == key) {
            diags.push(
                Diagnostic::error("Unsupported attribute")
                    .with_detail(format!("an attribute named {:?} is not expected here", key))
                    .at(join(path, key)),
            );
        }
    }
    let mut groups_seen: FxHashSet<Vec<String>> = FxHashSet::default();
    for attr in attrs {
        let at = join(path, &attr.name);
        let value = map.get(&attr.name);
        match (attr.cardinality, is_set(value)) {
            (Cardinality::Computed, true) => diags.push(
                Diagnostic::error("Value for unconfigurable attribute")
                    .with_detail(format!("{:?} is computed by the provider and cannot be set", attr.name))
                    .at(at.clone()),
            ),
            (Cardinality::Required, false) => diags.push(
                Diagnostic::error("Missing required attribute")
                    .with_detail(format!("the attribute {:?} is required", attr.name))
                    .at(at.clone()),
            ),
            (Cardinality::Required | Cardinality::Optional, true) => {
                if let Some(v) = value {
                    check_value(attr, v, &at, diags);
                }
            }
            _ => {}
        }
        for v in &attr.validators {
            if let CompiledValidator::ExactlyOneOf(names) = v {
                let mut group = names.clone();
                group.sort();
                if !groups_seen.insert(group) {
                    continue;
                }
                let set = names.iter().filter(|n| is_set(map.get(n.as_str()))).count();
                if set != 1 {
                    diags.push(
                        Diagnostic::error("Invalid attribute combination")
                            .with_detail(format!("exactly one of {} must be set, found {}", names.join(", "), set))
                            .at(at.clone()),
                    );
                }
            }
        }
    }
}

fn check_value(attr: &Attribute, v: &Value, path: &str, diags: &mut Vec<Diagnostic>) {
    let type_ok = match (&attr.ty, v) {
        (AttrType::String, Value::String(_)) => true,
        (AttrType::Int64, Value::Number(n)) => n.as_i64().is_some(),
        (AttrType::Float64, Value::Number(_)) => true,
        (AttrType::Bool, Value::Bool(_)) => true,
        (AttrType::IntOrString, Value::String(_)) => true,
        (AttrType::IntOrString, Value::Number(n)) => n.as_i64().is_some(),
        (AttrType::Dynamic, Value::Array(_) | Value::Object(_)) => false,
        (AttrType::Dynamic, _) => true,
        (AttrType::List { .. }, Value::Array(_)) => true,
        (AttrType::Map { .. } | AttrType::Object { .. }, Value::Object(_)) => true,
        _ => false,
    };
    if !type_ok {
        diags.push(
            Diagnostic::error("Incorrect attribute value type")
                .with_detail(format!("expected {}, got {}", attr.ty.label(), json_kind(v)))
                .at(path.to_string()),
        );
        return;
    }
    for validator in &attr.validators {
        if let Some(problem) = check_validator(validator, v) {
            diags.push(Diagnostic::error("Invalid attribute value").with_detail(problem).at(path.to_string()));
        }
    }
    match (&attr.ty, v) {
        (AttrType::List { element }, Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let at = format!("{}[{}]", path, i);
                if item.is_null() && !matches!(element.ty, AttrType::Dynamic) {
                    diags.push(Diagnostic::error("Invalid attribute value").with_detail("list elements cannot be null").at(at));
                } else {
                    check_value(element, item, &at, diags);
                }
            }
        }
        (AttrType::Map { element }, Value::Object(entries)) => {
            for (k, item) in entries.iter() {
                let at = format!("{}[{:?}]", path, k);
                if item.is_null() && !matches!(element.ty, AttrType::Dynamic) {
                    diags.push(Diagnostic::error("Invalid attribute value").with_detail("map values cannot be null").at(at));
                } else {
                    check_value(element, item, &at, diags);
                }
            }
        }
        (AttrType::Object { attributes }, Value::Object(map)) => check_object(attributes, map, path, diags),
        _ => {}
    }
}

/// Evaluate one value-level validator; `ExactlyOneOf` is checked at the parent object.
fn check_validator(validator: &CompiledValidator, v: &Value) -> Option<String> {
    match validator {
        CompiledValidator::NonEmpty => {
            let empty = match v {
                Value::String(s) => s.is_empty(),
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                _ => false,
            };
            empty.then(|| validator.describe())
        }
        CompiledValidator::OneOf(values) => match v {
            Value::String(s) if !values.iter().any(|x| x == s) => {
                Some(format!("{}; got {:?}", validator.describe(), s))
            }
            _ => None,
        },
        CompiledValidator::Matches { regex, .. } => match v {
            Value::String(s) if !regex.is_match(s) => Some(format!("{}; got {:?}", validator.describe(), s)),
            _ => None,
        },
        CompiledValidator::Between { min, max } => {
            let n = v.as_f64()?;
            let below = min.map(|lo| n < lo).unwrap_or(false);
            let above = max.map(|hi| n > hi).unwrap_or(false);
            (below || above).then(|| format!("{}; got {}", validator.describe(), n))
        }
        CompiledValidator::ExactlyOneOf(_) => None,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
