//! Import `apiextensions.k8s.io` CustomResourceDefinition manifests as descriptors.
//!
//! One descriptor per served version, built from `openAPIV3Schema.properties.spec`.

use crdform_core::{snake_case, Descriptor, Field, FieldType, Gvk, Validator};
use serde_json::Value;

use crate::SchemaError;

/// Whether a YAML document is a CRD manifest rather than a descriptor definition.
pub fn is_crd_manifest(v: &serde_yaml::Value) -> bool {
    let kind = v.get("kind").and_then(|s| s.as_str());
    let api_version = v.get("apiVersion").and_then(|s| s.as_str()).unwrap_or("");
    kind == Some("CustomResourceDefinition") && api_version.starts_with("apiextensions.k8s.io/")
}

/// Build descriptors for every served version of a CRD.
pub fn descriptors_from_crd(crd: &Value) -> Result<Vec<Descriptor>, SchemaError> {
    let crd_name = crd.get("metadata").and_then(|m| m.get("name")).and_then(|s| s.as_str()).unwrap_or("<unnamed>");
    let unsupported = |message: &str| SchemaError::Unsupported { path: crd_name.to_string(), message: message.to_string() };

    let spec = crd.get("spec").ok_or_else(|| unsupported("CRD has no spec"))?;
    let group = spec.get("group").and_then(|s| s.as_str()).ok_or_else(|| unsupported("CRD spec.group missing"))?;
    let kind = spec
        .get("names")
        .and_then(|n| n.get("kind"))
        .and_then(|s| s.as_str())
        .ok_or_else(|| unsupported("CRD spec.names.kind missing"))?;
    let namespaced = spec.get("scope").and_then(|s| s.as_str()).map(|s| s != "Cluster").unwrap_or(true);

    // legacy v1beta1 manifests carry one schema for every version
    let legacy_schema = spec.get("validation").and_then(|s| s.get("openAPIV3Schema"));
    let versions = spec.get("versions").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let versions: Vec<Value> = if versions.is_empty() {
        match spec.get("version").and_then(|s| s.as_str()) {
            Some(v) => vec![serde_json::json!({ "name": v, "served": true })],
            None => return Err(unsupported("CRD declares no versions")),
        }
    } else {
        versions
    };

    let mut out = Vec::new();
    for ver in versions.iter() {
        if !ver.get("served").and_then(|b| b.as_bool()).unwrap_or(true) {
            continue;
        }
        let Some(version) = ver.get("name").and_then(|s| s.as_str()) else { continue };
        let schema = ver.get("schema").and_then(|s| s.get("openAPIV3Schema")).or(legacy_schema);
        let mut desc = Descriptor::new(Gvk::new(group, version, kind));
        desc.namespaced = namespaced;
        if let Some(schema) = schema {
            desc.description = schema.get("description").and_then(|s| s.as_str()).map(|s| s.to_string());
            if let Some(spec_schema) = schema.get("properties").and_then(|p| p.get("spec")) {
                let required = required_names(schema).iter().any(|n| n == "spec");
                let mut field = field_from_schema("spec", spec_schema, required, "spec")?;
                // an open spec keeps its keys verbatim as a map of dynamic values
                if !matches!(field.ty, FieldType::Object(_) | FieldType::Map(_)) {
                    field.ty = FieldType::Map(Box::new(Field::new("", FieldType::Dynamic)));
                }
                field.name = "spec".to_string();
                field.key = "spec".to_string();
                desc.spec = Some(field);
            }
        }
        out.push(desc);
    }
    Ok(out)
}

fn required_names(node: &Value) -> Vec<String> {
    node.get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|s| s.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn field_from_schema(key: &str, node: &Value, required: bool, path: &str) -> Result<Field, SchemaError> {
    let ty = type_of(node, path)?;
    let mut field = Field::new(snake_case(key), ty).with_key(key);
    if required {
        field = field.required();
    }
    if let Some(d) = node.get("description").and_then(|s| s.as_str()) {
        field = field.with_description(d);
    }
    for v in validators_of(node) {
        field = field.with_validator(v);
    }
    Ok(field)
}

fn type_of(node: &Value, path: &str) -> Result<FieldType, SchemaError> {
    if flag(node, "x-kubernetes-int-or-string") {
        return Ok(FieldType::IntOrString);
    }
    let ty = node.get("type").and_then(|s| s.as_str()).unwrap_or("");
    Ok(match ty {
        "string" => FieldType::String,
        "integer" => FieldType::Int64,
        "number" => FieldType::Float64,
        "boolean" => FieldType::Bool,
        "array" => {
            let element = match node.get("items") {
                Some(items) => field_from_schema("", items, false, &format!("{}[*]", path))?,
                None => Field::new("", FieldType::Dynamic),
            };
            FieldType::List(Box::new(element))
        }
        "object" | "" => object_type(node, path)?,
        other => {
            return Err(SchemaError::Unsupported { path: path.to_string(), message: format!("unsupported schema type {:?}", other) })
        }
    })
}

fn object_type(node: &Value, path: &str) -> Result<FieldType, SchemaError> {
    if let Some(props) = node.get("properties").and_then(|p| p.as_object()).filter(|p| !p.is_empty()) {
        let required = required_names(node);
        let mut fields = Vec::with_capacity(props.len());
        for (k, v) in props.iter() {
            let child_path = format!("{}.{}", path, snake_case(k));
            fields.push(field_from_schema(k, v, required.iter().any(|r| r == k), &child_path)?);
        }
        return Ok(FieldType::Object(fields));
    }
    match node.get("additionalProperties") {
        Some(Value::Object(inner)) if !inner.is_empty() => {
            let element = field_from_schema("", &Value::Object(inner.clone()), false, &format!("{}[*]", path))?;
            Ok(FieldType::Map(Box::new(element)))
        }
        _ => {
            let typed_object = node.get("type").and_then(|s| s.as_str()) == Some("object");
            if typed_object || flag(node, "x-kubernetes-preserve-unknown-fields") {
                Ok(FieldType::Map(Box::new(Field::new("", FieldType::Dynamic))))
            } else {
                Ok(FieldType::Dynamic)
            }
        }
    }
}

fn validators_of(node: &Value) -> Vec<Validator> {
    let mut out = Vec::new();
    let min_len = ["minLength", "minItems", "minProperties"]
        .iter()
        .filter_map(|k| node.get(*k).and_then(|n| n.as_u64()))
        .max()
        .unwrap_or(0);
    if min_len >= 1 {
        out.push(Validator::NonEmpty);
    }
    if let Some(values) = node.get("enum").and_then(|e| e.as_array()) {
        let strings: Vec<String> = values.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
        if !strings.is_empty() && strings.len() == values.len() {
            out.push(Validator::OneOf { values: strings });
        }
    }
    if let Some(pattern) = node.get("pattern").and_then(|s| s.as_str()) {
        out.push(Validator::Matches { pattern: pattern.to_string(), message: None });
    }
    let min = node.get("minimum").and_then(|n| n.as_f64());
    let max = node.get("maximum").and_then(|n| n.as_f64());
    if min.is_some() || max.is_some() {
        out.push(Validator::Between { min, max });
    }
    out
}

fn flag(node: &Value, name: &str) -> bool {
    node.get(name).and_then(|b| b.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crd() -> Value {
        serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "widgets.example.com" },
            "spec": {
                "group": "example.com",
                "names": { "kind": "Widget", "plural": "widgets" },
                "scope": "Cluster",
                "versions": [
                    { "name": "v1alpha1", "served": false, "storage": false },
                    { "name": "v1", "served": true, "storage": true, "schema": { "openAPIV3Schema": {
                        "type": "object",
                        "description": "A widget.",
                        "required": ["spec"],
                        "properties": {
                            "spec": {
                                "type": "object",
                                "required": ["size"],
                                "properties": {
                                    "size": { "type": "integer", "minimum": 1, "maximum": 10 },
                                    "color": { "type": "string", "enum": ["red", "blue"] },
                                    "port": { "x-kubernetes-int-or-string": true },
                                    "tags": { "type": "array", "minItems": 1, "items": { "type": "string" } },
                                    "labels": { "type": "object", "additionalProperties": { "type": "string" } },
                                    "extra": { "type": "object", "x-kubernetes-preserve-unknown-fields": true },
                                    "tlsConfig": { "type": "object", "properties": { "caFile": { "type": "string", "pattern": "^/" } } }
                                }
                            },
                            "status": { "type": "object" }
                        }
                    } } }
                ]
            }
        })
    }

    #[test]
    fn imports_served_versions_only() {
        let descs = descriptors_from_crd(&crd()).unwrap();
        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.type_name(), "example_com_widget_v1");
        assert!(!d.namespaced);
        assert_eq!(d.description.as_deref(), Some("A widget."));
        assert!(d.spec.as_ref().unwrap().is_required());
    }

    #[test]
    fn maps_openapi_nodes_to_field_types() {
        let descs = descriptors_from_crd(&crd()).unwrap();
        let spec = descs[0].spec.clone().unwrap();
        let size = spec.child("size").unwrap();
        assert!(size.is_required());
        assert_eq!(size.ty, FieldType::Int64);
        assert_eq!(size.validators[0], Validator::Between { min: Some(1.0), max: Some(10.0) });
        assert_eq!(spec.child("color").unwrap().validators[0], Validator::OneOf { values: vec!["red".into(), "blue".into()] });
        assert_eq!(spec.child("port").unwrap().ty, FieldType::IntOrString);
        let tags = spec.child("tags").unwrap();
        assert!(matches!(tags.ty, FieldType::List(_)));
        assert_eq!(tags.validators[0], Validator::NonEmpty);
        match &spec.child("labels").unwrap().ty {
            FieldType::Map(e) => assert_eq!(e.ty, FieldType::String),
            other => panic!("unexpected {:?}", other),
        }
        match &spec.child("extra").unwrap().ty {
            FieldType::Map(e) => assert_eq!(e.ty, FieldType::Dynamic),
            other => panic!("unexpected {:?}", other),
        }
        let tls = spec.child("tls_config").unwrap();
        assert_eq!(tls.key, "tlsConfig");
        assert_eq!(tls.child("ca_file").unwrap().key, "caFile");
    }

    #[test]
    fn open_spec_is_a_map_of_dynamic_values() {
        let crd = serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "opens.x.io" },
            "spec": {
                "group": "x.io",
                "names": { "kind": "Open" },
                "versions": [{ "name": "v1", "served": true, "schema": { "openAPIV3Schema": {
                    "type": "object",
                    "properties": { "spec": { "type": "object", "x-kubernetes-preserve-unknown-fields": true } }
                } } }]
            }
        });
        let descs = descriptors_from_crd(&crd).unwrap();
        let spec = descs[0].spec.as_ref().unwrap();
        assert_eq!(spec.key, "spec");
        match &spec.ty {
            FieldType::Map(e) => assert_eq!(e.ty, FieldType::Dynamic),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn legacy_manifest_shares_one_schema_across_versions() {
        let crd = serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1beta1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "gadgets.x.io" },
            "spec": {
                "group": "x.io",
                "version": "v1beta1",
                "names": { "kind": "Gadget" },
                "scope": "Namespaced",
                "validation": { "openAPIV3Schema": {
                    "type": "object",
                    "properties": { "spec": { "type": "object", "properties": { "replicaCount": { "type": "integer" } } } }
                } }
            }
        });
        let descs = descriptors_from_crd(&crd).unwrap();
        assert_eq!(descs.len(), 1);
        let d = &descs[0];
        assert_eq!(d.type_name(), "x_io_gadget_v1beta1");
        assert!(d.namespaced);
        let spec = d.spec.as_ref().unwrap();
        assert!(!spec.is_required());
        let replicas = spec.child("replica_count").unwrap();
        assert_eq!(replicas.ty, FieldType::Int64);
        assert_eq!(replicas.key, "replicaCount");

        let mut multi = crd.clone();
        multi["spec"]["versions"] = serde_json::json!([{ "name": "v1", "served": true }, { "name": "v2", "served": true }]);
        let names: Vec<String> = descriptors_from_crd(&multi).unwrap().iter().map(|d| d.type_name()).collect();
        assert_eq!(names, ["x_io_gadget_v1", "x_io_gadget_v2"]);
    }

    #[test]
    fn crd_detection_requires_apiextensions_group() {
        let y: serde_yaml::Value = serde_yaml::from_str("apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\n").unwrap();
        assert!(is_crd_manifest(&y));
        let y: serde_yaml::Value = serde_yaml::from_str("apiVersion: x.io/v1\nkind: CustomResourceDefinition\n").unwrap();
        assert!(!is_crd_manifest(&y));
    }
}
