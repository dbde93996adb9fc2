//! crdform schema engine: compile descriptor field trees into the attribute schema the
//! hosting framework consumes, load descriptors (definition files and CRD manifests) and
//! validate submitted configurations.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use crdform_core::{Cardinality, Descriptor, Field, FieldType, Validator};
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Serialize, Serializer};

pub mod crd;
pub mod def;
mod registry;
mod validate;

pub use registry::{Registry, Resource};
pub use validate::validate;

/// Load-time failures. Fatal to loading, never seen by lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{path}: computed fields cannot be declared in a resource schema")]
    ComputedInSpec { path: String },
    #[error("{path}: duplicate field name {name:?}")]
    DuplicateField { path: String, name: String },
    #[error("{path}: duplicate YAML key {key:?}")]
    DuplicateKey { path: String, key: String },
    #[error("{path}: invalid pattern {pattern:?}")]
    InvalidPattern {
        path: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{path}: exactly_one_of refers to unknown sibling {sibling:?}")]
    UnknownSibling { path: String, sibling: String },
    #[error("{path}: {message}")]
    Unsupported { path: String, message: String },
    #[error("{origin}: invalid descriptor definition: {message}")]
    Definition { origin: String, message: String },
    #[error("{origin}: parsing YAML")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate resource type {0}")]
    DuplicateType(String),
    #[error("reading {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Compiled schema of one resource type.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSchema {
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl ResourceSchema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// One node of the compiled attribute tree, isomorphic to the field it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub name: String,
    pub cardinality: Cardinality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub ty: AttrType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<CompiledValidator>,
}

impl Attribute {
    /// Child attributes of an object attribute.
    pub fn children(&self) -> &[Attribute] {
        match &self.ty {
            AttrType::Object { attributes } => attributes,
            _ => &[],
        }
    }

    pub fn child(&self, name: &str) -> Option<&Attribute> {
        self.children().iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttrType {
    String,
    Int64,
    Bool,
    Float64,
    IntOrString,
    Dynamic,
    List { element: Box<Attribute> },
    Map { element: Box<Attribute> },
    Object { attributes: Vec<Attribute> },
}

impl AttrType {
    pub fn label(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Int64 => "int64",
            AttrType::Bool => "bool",
            AttrType::Float64 => "float64",
            AttrType::IntOrString => "int_or_string",
            AttrType::Dynamic => "dynamic",
            AttrType::List { .. } => "list",
            AttrType::Map { .. } => "map",
            AttrType::Object { .. } => "object",
        }
    }
}

/// Validator predicate, ready to evaluate.
#[derive(Debug, Clone)]
pub enum CompiledValidator {
    NonEmpty,
    OneOf(Vec<String>),
    Matches { regex: Regex, message: Option<String> },
    Between { min: Option<f64>, max: Option<f64> },
    ExactlyOneOf(Vec<String>),
}

impl CompiledValidator {
    /// Human-readable description, as shown in schema listings.
    pub fn describe(&self) -> String {
        match self {
            CompiledValidator::NonEmpty => "value must not be empty".to_string(),
            CompiledValidator::OneOf(values) => format!("value must be one of: {}", values.join(", ")),
            CompiledValidator::Matches { regex, message } => match message {
                Some(m) => m.clone(),
                None => format!("value must match {}", regex.as_str()),
            },
            CompiledValidator::Between { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => format!("value must be between {} and {}", lo, hi),
                (Some(lo), None) => format!("value must be at least {}", lo),
                (None, Some(hi)) => format!("value must be at most {}", hi),
                (None, None) => "any number".to_string(),
            },
            CompiledValidator::ExactlyOneOf(names) => format!("exactly one of {} must be set", names.join(", ")),
        }
    }
}

impl Serialize for CompiledValidator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.describe())
    }
}

/// Compile a descriptor into its resource schema.
///
/// Adds the system-produced attributes (`id`, `yaml`, `api_version`, `kind`) and the standard
/// `metadata` block ahead of the descriptor's `spec`.
pub fn compile(desc: &Descriptor) -> Result<ResourceSchema, SchemaError> {
    let computed = |name: &str, ty: AttrType, description: &str| Attribute {
        name: name.to_string(),
        cardinality: Cardinality::Computed,
        description: Some(description.to_string()),
        ty,
        validators: Vec::new(),
    };
    let mut attributes = vec![
        computed("id", AttrType::Int64, "Time-based identifier, refreshed on every create and update."),
        computed("yaml", AttrType::String, "The generated YAML manifest."),
        computed("api_version", AttrType::String, "The apiVersion of the manifest."),
        computed("kind", AttrType::String, "The kind of the manifest."),
        compile_field(&desc.metadata(), "metadata")?,
    ];
    if let Some(spec) = &desc.spec {
        attributes.push(compile_field(spec, "spec")?);
    }
    Ok(ResourceSchema { type_name: desc.type_name(), description: desc.description.clone(), attributes })
}

/// Compile one field, children first.
pub fn compile_field(field: &Field, path: &str) -> Result<Attribute, SchemaError> {
    if field.cardinality == Cardinality::Computed {
        return Err(SchemaError::ComputedInSpec { path: path.to_string() });
    }
    let ty = match &field.ty {
        FieldType::String => AttrType::String,
        FieldType::Int64 => AttrType::Int64,
        FieldType::Bool => AttrType::Bool,
        FieldType::Float64 => AttrType::Float64,
        FieldType::IntOrString => AttrType::IntOrString,
        FieldType::Dynamic => AttrType::Dynamic,
        FieldType::List(element) => AttrType::List { element: Box::new(compile_field(element, &format!("{}[*]", path))?) },
        FieldType::Map(element) => AttrType::Map { element: Box::new(compile_field(element, &format!("{}[*]", path))?) },
        FieldType::Object(children) => {
            let mut names = FxHashSet::default();
            let mut keys = FxHashSet::default();
            let mut attributes = Vec::with_capacity(children.len());
            for child in children {
                let child_path = format!("{}.{}", path, child.name);
                if !names.insert(child.name.as_str()) {
                    return Err(SchemaError::DuplicateField { path: path.to_string(), name: child.name.clone() });
                }
                if !keys.insert(child.key.as_str()) {
                    return Err(SchemaError::DuplicateKey { path: path.to_string(), key: child.key.clone() });
                }
                for v in &child.validators {
                    if let Validator::ExactlyOneOf { siblings } = v {
                        if let Some(missing) = siblings.iter().find(|s| !children.iter().any(|c| &c.name == *s)) {
                            return Err(SchemaError::UnknownSibling { path: child_path, sibling: missing.clone() });
                        }
                    }
                }
                attributes.push(compile_field(child, &child_path)?);
            }
            AttrType::Object { attributes }
        }
    };
    let validators = field
        .validators
        .iter()
        .map(|v| compile_validator(v, field, path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Attribute {
        name: field.name.clone(),
        cardinality: field.cardinality,
        description: field.description.clone(),
        ty,
        validators,
    })
}

fn compile_validator(v: &Validator, field: &Field, path: &str) -> Result<CompiledValidator, SchemaError> {
    Ok(match v {
        Validator::NonEmpty => CompiledValidator::NonEmpty,
        Validator::OneOf { values } => CompiledValidator::OneOf(values.clone()),
        Validator::Matches { pattern, message } => {
            let regex = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                path: path.to_string(),
                pattern: pattern.clone(),
                source,
            })?;
            CompiledValidator::Matches { regex, message: message.clone() }
        }
        Validator::Between { min, max } => CompiledValidator::Between { min: *min, max: *max },
        Validator::ExactlyOneOf { siblings } => {
            let mut names = Vec::with_capacity(siblings.len() + 1);
            names.push(field.name.clone());
            names.extend(siblings.iter().cloned());
            CompiledValidator::ExactlyOneOf(names)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdform_core::Gvk;

    fn foo() -> Descriptor {
        Descriptor::new(Gvk::new("x.io", "v1", "Foo")).with_spec(
            vec![
                Field::string("host").required().with_validator(Validator::NonEmpty),
                Field::int64("replicas").with_validator(Validator::Between { min: Some(0.0), max: None }),
                Field::list(
                    "ports",
                    Field::object("", vec![Field::int64("port").required(), Field::string("protocol")]),
                ),
                Field::map("selector", Field::string("")),
            ],
            true,
        )
    }

    #[test]
    fn compiled_schema_mirrors_field_tree() {
        let schema = compile(&foo()).unwrap();
        assert_eq!(schema.type_name, "x_io_foo_v1");
        let names: Vec<_> = schema.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["id", "yaml", "api_version", "kind", "metadata", "spec"]);

        let spec = schema.attribute("spec").unwrap();
        assert_eq!(spec.cardinality, Cardinality::Required);
        let host = spec.child("host").unwrap();
        assert_eq!(host.cardinality, Cardinality::Required);
        assert!(matches!(host.validators.as_slice(), [CompiledValidator::NonEmpty]));

        let ports = spec.child("ports").unwrap();
        match &ports.ty {
            AttrType::List { element } => {
                assert_eq!(element.child("port").unwrap().cardinality, Cardinality::Required);
                assert_eq!(element.child("protocol").unwrap().cardinality, Cardinality::Optional);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(spec.child("selector").unwrap().ty, AttrType::Map { .. }));
    }

    #[test]
    fn system_attributes_are_computed() {
        let schema = compile(&foo()).unwrap();
        for name in ["id", "yaml", "api_version", "kind"] {
            assert_eq!(schema.attribute(name).unwrap().cardinality, Cardinality::Computed, "{}", name);
        }
        let meta = schema.attribute("metadata").unwrap();
        assert_eq!(meta.child("name").unwrap().cardinality, Cardinality::Required);
        assert!(meta.child("namespace").is_some());
    }

    #[test]
    fn cluster_scoped_metadata_has_no_namespace() {
        let schema = compile(&foo().cluster_scoped()).unwrap();
        assert!(schema.attribute("metadata").unwrap().child("namespace").is_none());
    }

    #[test]
    fn computed_field_in_spec_is_rejected() {
        let d = Descriptor::new(Gvk::new("x.io", "v1", "Foo"))
            .with_spec(vec![Field::object("status", vec![Field::string("phase").computed()])], false);
        let err = compile(&d).unwrap_err();
        assert_eq!(err.to_string(), "spec.status.phase: computed fields cannot be declared in a resource schema");
    }

    #[test]
    fn invalid_pattern_fails_at_compile_time() {
        let d = Descriptor::new(Gvk::new("x.io", "v1", "Foo")).with_spec(
            vec![Field::string("host").with_validator(Validator::Matches { pattern: "([a-z".into(), message: None })],
            false,
        );
        assert!(matches!(compile(&d), Err(SchemaError::InvalidPattern { .. })));
    }

    #[test]
    fn duplicate_keys_and_unknown_siblings_are_rejected() {
        let d = Descriptor::new(Gvk::new("x.io", "v1", "Foo"))
            .with_spec(vec![Field::string("a_b"), Field::string("ab").with_key("aB")], false);
        assert!(matches!(compile(&d), Err(SchemaError::DuplicateKey { .. })));

        let d = Descriptor::new(Gvk::new("x.io", "v1", "Foo")).with_spec(
            vec![Field::string("a").with_validator(Validator::ExactlyOneOf { siblings: vec!["b".into()] })],
            false,
        );
        assert!(matches!(compile(&d), Err(SchemaError::UnknownSibling { .. })));
    }

    #[test]
    fn schema_serializes_with_type_tags() {
        let schema = compile(&foo()).unwrap();
        let v = serde_json::to_value(&schema).unwrap();
        assert_eq!(v["attributes"][0]["name"], "id");
        assert_eq!(v["attributes"][0]["type"], "int64");
        assert_eq!(v["attributes"][0]["cardinality"], "computed");
        let spec = &v["attributes"][5];
        assert_eq!(spec["type"], "object");
        assert_eq!(spec["attributes"][0]["validators"][0], "value must not be empty");
    }
}
