//! crdform core types: resource descriptors, field trees, resource state and errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod error;
mod naming;
mod state;

pub use error::{Diagnostic, Error, Result, Severity};
pub use naming::{camel_case, snake_case};
pub use state::{Address, MemoryStore, ResourceState, StateStore};

/// Group/Version/Kind of one custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Value of the `apiVersion` key: `group/version`, or only `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Stable resource type name `<group>_<kind>_<version>`, e.g.
    /// `cert-manager.io/v1 Certificate` becomes `cert_manager_io_certificate_v1`.
    pub fn type_name(&self) -> String {
        let mut out = String::with_capacity(self.group.len() + self.kind.len() + self.version.len() + 2);
        for c in self.group.chars() {
            match c {
                '.' | '-' => out.push('_'),
                c => out.push(c.to_ascii_lowercase()),
            }
        }
        if !out.is_empty() { out.push('_'); }
        out.push_str(&snake_case(&self.kind));
        out.push('_');
        out.push_str(&self.version.to_ascii_lowercase());
        out
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Who supplies the value of a field. Exactly one per node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Required,
    #[default]
    Optional,
    /// Produced by the system, never by the caller.
    Computed,
}

/// Declarative constraint attached to one field.
///
/// Validators are data here; the schema compiler turns them into predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validator {
    /// Strings must have at least one character, lists and maps at least one element.
    NonEmpty,
    /// String value must be one of the listed values.
    OneOf { values: Vec<String> },
    /// String value must match the regular expression.
    Matches {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Numeric value must lie in the inclusive range.
    Between {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// Exactly one of this field and the named siblings must be set.
    ExactlyOneOf { siblings: Vec<String> },
}

/// Semantic type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Int64,
    Bool,
    Float64,
    List(Box<Field>),
    Map(Box<Field>),
    Object(Vec<Field>),
    IntOrString,
    Dynamic,
}

impl FieldType {
    pub fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int64 => "int64",
            FieldType::Bool => "bool",
            FieldType::Float64 => "float64",
            FieldType::List(_) => "list",
            FieldType::Map(_) => "map",
            FieldType::Object(_) => "object",
            FieldType::IntOrString => "int_or_string",
            FieldType::Dynamic => "dynamic",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, FieldType::List(_) | FieldType::Map(_))
    }
}

/// One node of a field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Wire key in the submitted configuration (snake_case).
    pub name: String,
    /// Key in the serialized YAML document (camelCase unless overridden).
    pub key: String,
    pub ty: FieldType,
    pub cardinality: Cardinality,
    pub description: Option<String>,
    pub validators: SmallVec<[Validator; 2]>,
}

impl Field {
    /// Optional field whose YAML key is the camelCase form of `name`.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        let key = camel_case(&name);
        Self { name, key, ty, cardinality: Cardinality::Optional, description: None, validators: SmallVec::new() }
    }

    pub fn string(name: impl Into<String>) -> Self { Self::new(name, FieldType::String) }
    pub fn int64(name: impl Into<String>) -> Self { Self::new(name, FieldType::Int64) }
    pub fn bool(name: impl Into<String>) -> Self { Self::new(name, FieldType::Bool) }
    pub fn float64(name: impl Into<String>) -> Self { Self::new(name, FieldType::Float64) }
    pub fn object(name: impl Into<String>, fields: Vec<Field>) -> Self { Self::new(name, FieldType::Object(fields)) }
    pub fn list(name: impl Into<String>, element: Field) -> Self { Self::new(name, FieldType::List(Box::new(element))) }
    pub fn map(name: impl Into<String>, element: Field) -> Self { Self::new(name, FieldType::Map(Box::new(element))) }

    pub fn required(mut self) -> Self { self.cardinality = Cardinality::Required; self }
    pub fn optional(mut self) -> Self { self.cardinality = Cardinality::Optional; self }
    pub fn computed(mut self) -> Self { self.cardinality = Cardinality::Computed; self }

    pub fn with_key(mut self, key: impl Into<String>) -> Self { self.key = key.into(); self }
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn with_validator(mut self, v: Validator) -> Self { self.validators.push(v); self }

    pub fn is_required(&self) -> bool { self.cardinality == Cardinality::Required }
    pub fn is_computed(&self) -> bool { self.cardinality == Cardinality::Computed }

    /// Children of an object field, empty for every other type.
    pub fn children(&self) -> &[Field] {
        match &self.ty {
            FieldType::Object(fields) => fields,
            _ => &[],
        }
    }

    /// Look up a direct child by wire name.
    pub fn child(&self, name: &str) -> Option<&Field> {
        self.children().iter().find(|f| f.name == name)
    }
}

/// Declarative metadata for one CRD. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub gvk: Gvk,
    pub namespaced: bool,
    pub description: Option<String>,
    /// The `spec` block, an object field. `None` when the CRD declares no spec.
    pub spec: Option<Field>,
}

impl Descriptor {
    pub fn new(gvk: Gvk) -> Self {
        Self { gvk, namespaced: true, description: None, spec: None }
    }

    pub fn cluster_scoped(mut self) -> Self { self.namespaced = false; self }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach the spec field tree. The spec is required when `required` is set.
    pub fn with_spec(mut self, fields: Vec<Field>, required: bool) -> Self {
        let spec = Field::object("spec", fields);
        self.spec = Some(if required { spec.required() } else { spec });
        self
    }

    pub fn type_name(&self) -> String { self.gvk.type_name() }
    pub fn api_version(&self) -> String { self.gvk.api_version() }
    pub fn kind(&self) -> &str { &self.gvk.kind }

    /// Field tree of the standard `metadata` block. `namespace` only exists for namespaced kinds.
    pub fn metadata(&self) -> Field {
        let mut fields = Vec::with_capacity(4);
        fields.push(
            Field::string("name")
                .required()
                .with_description("Unique name of the object within its namespace or cluster.")
                .with_validator(Validator::NonEmpty)
                .with_validator(Validator::Matches {
                    pattern: NAME_PATTERN.to_string(),
                    message: Some("must be a lowercase RFC 1123 subdomain".to_string()),
                }),
        );
        if self.namespaced {
            fields.push(
                Field::string("namespace")
                    .with_description("Namespace of the object; the cluster default applies when unset.")
                    .with_validator(Validator::NonEmpty)
                    .with_validator(Validator::Matches {
                        pattern: NAMESPACE_PATTERN.to_string(),
                        message: Some("must be a lowercase RFC 1123 label".to_string()),
                    }),
            );
        }
        fields.push(Field::map("labels", Field::string("")).with_description("Labels attached to the object."));
        fields.push(Field::map("annotations", Field::string("")).with_description("Annotations attached to the object."));
        Field::object("metadata", fields).required()
    }
}

/// RFC 1123 subdomain, the shape of `metadata.name`.
pub const NAME_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";
/// RFC 1123 label, the shape of `metadata.namespace`.
pub const NAMESPACE_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// Value of a dynamic field: a scalar whose kind is decided at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DynamicValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl DynamicValue {
    /// Convert a JSON scalar; arrays and objects have no dynamic representation.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match v {
            Value::Null => Some(DynamicValue::Null),
            Value::Bool(b) => Some(DynamicValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(DynamicValue::Integer(i)),
                None => n.as_f64().map(DynamicValue::Float),
            },
            Value::String(s) => Some(DynamicValue::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Value of an int-or-string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    String(String),
}

impl IntOrString {
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Number(n) => n.as_i64().map(IntOrString::Int),
            serde_json::Value::String(s) => Some(IntOrString::String(s.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_flattens_group_kind_version() {
        let gvk = Gvk::new("cert-manager.io", "v1", "Certificate");
        assert_eq!(gvk.type_name(), "cert_manager_io_certificate_v1");
        assert_eq!(gvk.api_version(), "cert-manager.io/v1");

        let gvk = Gvk::new("monitoring.coreos.com", "v1alpha1", "AlertmanagerConfig");
        assert_eq!(gvk.type_name(), "monitoring_coreos_com_alertmanager_config_v1alpha1");
    }

    #[test]
    fn core_group_has_bare_api_version() {
        let gvk = Gvk::new("", "v1", "ConfigMap");
        assert_eq!(gvk.api_version(), "v1");
        assert_eq!(gvk.type_name(), "config_map_v1");
        assert_eq!(gvk.to_string(), "v1/ConfigMap");
    }

    #[test]
    fn field_defaults_to_optional_camel_key() {
        let f = Field::string("secret_name");
        assert_eq!(f.key, "secretName");
        assert_eq!(f.cardinality, Cardinality::Optional);
        assert!(f.required().is_required());
    }

    #[test]
    fn dynamic_value_covers_scalars_only() {
        assert_eq!(DynamicValue::from_json(&serde_json::json!(3)), Some(DynamicValue::Integer(3)));
        assert_eq!(DynamicValue::from_json(&serde_json::json!(1.5)), Some(DynamicValue::Float(1.5)));
        assert_eq!(DynamicValue::from_json(&serde_json::json!(null)), Some(DynamicValue::Null));
        assert_eq!(DynamicValue::from_json(&serde_json::json!([1])), None);
        assert_eq!(IntOrString::from_json(&serde_json::json!("50%")), Some(IntOrString::String("50%".into())));
        assert_eq!(IntOrString::from_json(&serde_json::json!(true)), None);
    }

    #[test]
    fn validators_deserialize_from_tagged_yaml_shape() {
        let v: Validator = serde_json::from_value(serde_json::json!({"kind": "one_of", "values": ["a", "b"]})).unwrap();
        assert_eq!(v, Validator::OneOf { values: vec!["a".into(), "b".into()] });
        let v: Validator = serde_json::from_value(serde_json::json!({"kind": "between", "min": 1})).unwrap();
        assert_eq!(v, Validator::Between { min: Some(1.0), max: None });
    }
}
