//! crdform render: project a submitted configuration onto a descriptor's field tree, stamp
//! the fixed `apiVersion`/`kind` and materialize the document as YAML.

#![forbid(unsafe_code)]

use crdform_core::{Descriptor, Diagnostic, DynamicValue, Error, Field, FieldType, Gvk, IntOrString};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as Json};
use serde_yaml::{Mapping, Value as Yaml};
use tracing::debug;

/// Projection failures. Unreachable for configurations that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("{path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },
    #[error("{path}: missing required value")]
    MissingRequired { path: String },
}

impl RenderError {
    pub fn path(&self) -> &str {
        match self {
            RenderError::TypeMismatch { path, .. } | RenderError::MissingRequired { path } => path,
        }
    }
}

impl From<RenderError> for Error {
    fn from(e: RenderError) -> Self {
        let summary = match &e {
            RenderError::TypeMismatch { .. } => "Incorrect attribute value type",
            RenderError::MissingRequired { .. } => "Missing required attribute",
        };
        Error::ConfigurationValidation(vec![Diagnostic::error(summary).with_detail(e.to_string()).at(e.path())])
    }
}

/// Caller data projected onto the field tree; not yet stamped with apiVersion/kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub metadata: Mapping,
    pub spec: Option<Yaml>,
}

impl Projection {
    /// Inject the descriptor constants. Only a stamped document can be materialized.
    pub fn stamp(self, gvk: &Gvk) -> Document {
        Document { api_version: gvk.api_version(), kind: gvk.kind.clone(), metadata: self.metadata, spec: self.spec }
    }
}

/// Fully projected, constant-injected document. Serializes as
/// `apiVersion`, `kind`, `metadata`, `spec`, in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    api_version: String,
    kind: String,
    metadata: Mapping,
    spec: Option<Yaml>,
}

impl Document {
    pub fn api_version(&self) -> &str { &self.api_version }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn metadata(&self) -> &Mapping { &self.metadata }
    pub fn spec(&self) -> Option<&Yaml> { self.spec.as_ref() }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.spec.is_some() { 4 } else { 3 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("apiVersion", &self.api_version)?;
        map.serialize_entry("kind", &self.kind)?;
        map.serialize_entry("metadata", &self.metadata)?;
        if let Some(spec) = &self.spec {
            map.serialize_entry("spec", spec)?;
        }
        map.end()
    }
}

/// Project `config` (wire keys) onto the descriptor: metadata and spec only.
///
/// Any `api_version`/`kind` in `config` is never read; [`Projection::stamp`] supplies them.
pub fn project(desc: &Descriptor, config: &Json) -> Result<Projection, RenderError> {
    let root = config.as_object().ok_or_else(|| RenderError::TypeMismatch { path: String::new(), expected: "object" })?;
    let metadata_field = desc.metadata();
    let metadata = match root.get("metadata") {
        Some(Json::Object(m)) => project_object(metadata_field.children(), m, "metadata")?,
        Some(Json::Null) | None => return Err(RenderError::MissingRequired { path: "metadata".to_string() }),
        Some(_) => return Err(RenderError::TypeMismatch { path: "metadata".to_string(), expected: "object" }),
    };
    let spec = match &desc.spec {
        Some(field) => project_field(field, root.get(&field.name), "spec")?,
        None => None,
    };
    Ok(Projection { metadata, spec })
}

/// Project one field; `Ok(None)` means the key is omitted from the document.
fn project_field(field: &Field, value: Option<&Json>, path: &str) -> Result<Option<Yaml>, RenderError> {
    let v = match value {
        None | Some(Json::Null) => {
            return if field.is_required() {
                Err(RenderError::MissingRequired { path: path.to_string() })
            } else {
                Ok(None)
            };
        }
        Some(v) => v,
    };
    // omitempty: optional collections without elements are left out
    if !field.is_required() && field.ty.is_collection() {
        let empty = match v {
            Json::Array(a) => a.is_empty(),
            Json::Object(o) => o.is_empty(),
            _ => false,
        };
        if empty {
            return Ok(None);
        }
    }
    project_value(field, v, path).map(Some)
}

fn project_object(fields: &[Field], map: &Map<String, Json>, path: &str) -> Result<Mapping, RenderError> {
    let mut out = Mapping::with_capacity(fields.len());
    for field in fields {
        let child_path = format!("{}.{}", path, field.name);
        if let Some(v) = project_field(field, map.get(&field.name), &child_path)? {
            out.insert(Yaml::String(field.key.clone()), v);
        }
    }
    Ok(out)
}

fn project_value(field: &Field, v: &Json, path: &str) -> Result<Yaml, RenderError> {
    let mismatch = || RenderError::TypeMismatch { path: path.to_string(), expected: field.ty.label() };
    Ok(match (&field.ty, v) {
        (FieldType::String, Json::String(s)) => Yaml::String(s.clone()),
        (FieldType::Bool, Json::Bool(b)) => Yaml::Bool(*b),
        (FieldType::Int64, Json::Number(n)) => Yaml::Number(n.as_i64().ok_or_else(mismatch)?.into()),
        (FieldType::Float64, Json::Number(n)) => number(n).ok_or_else(mismatch)?,
        (FieldType::IntOrString, _) => match IntOrString::from_json(v).ok_or_else(mismatch)? {
            IntOrString::Int(i) => Yaml::Number(i.into()),
            IntOrString::String(s) => Yaml::String(s),
        },
        (FieldType::Dynamic, _) => dynamic(DynamicValue::from_json(v).ok_or_else(mismatch)?),
        (FieldType::List(element), Json::Array(items)) => {
            let mut seq = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                seq.push(project_element(element, item, &format!("{}[{}]", path, i))?);
            }
            Yaml::Sequence(seq)
        }
        (FieldType::Map(element), Json::Object(entries)) => {
            let mut sorted: Vec<(&String, &Json)> = entries.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
            let mut out = Mapping::with_capacity(sorted.len());
            for (k, item) in sorted {
                out.insert(Yaml::String(k.clone()), project_element(element, item, &format!("{}[{:?}]", path, k))?);
            }
            Yaml::Mapping(out)
        }
        (FieldType::Object(children), Json::Object(map)) => Yaml::Mapping(project_object(children, map, path)?),
        _ => return Err(mismatch()),
    })
}

/// Collection elements are always emitted, whatever the element field's cardinality.
/// Only dynamic elements may be null; they are emitted as YAML `null`.
fn project_element(element: &Field, v: &Json, path: &str) -> Result<Yaml, RenderError> {
    if v.is_null() && element.ty != FieldType::Dynamic {
        return Err(RenderError::MissingRequired { path: path.to_string() });
    }
    project_value(element, v, path)
}

fn number(n: &serde_json::Number) -> Option<Yaml> {
    if let Some(i) = n.as_i64() {
        return Some(Yaml::Number(i.into()));
    }
    if let Some(u) = n.as_u64() {
        return Some(Yaml::Number(u.into()));
    }
    n.as_f64().map(|f| Yaml::Number(f.into()))
}

fn dynamic(v: DynamicValue) -> Yaml {
    match v {
        DynamicValue::Null => Yaml::Null,
        DynamicValue::Bool(b) => Yaml::Bool(b),
        DynamicValue::Integer(i) => Yaml::Number(i.into()),
        DynamicValue::Float(f) => Yaml::Number(f.into()),
        DynamicValue::String(s) => Yaml::String(s),
    }
}

/// Encoder from a stamped document to manifest text.
pub trait Materializer: Send + Sync {
    fn materialize(&self, doc: &Document) -> Result<String, Error>;
}

/// The YAML encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlMaterializer;

impl Materializer for YamlMaterializer {
    fn materialize(&self, doc: &Document) -> Result<String, Error> {
        let yaml = to_yaml(doc)?;
        debug!(kind = %doc.kind, bytes = yaml.len(), "manifest materialized");
        Ok(yaml)
    }
}

/// Serialize any value to YAML, mapping failures to [`Error::Serialization`] with the cause verbatim.
pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    serde_yaml::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn foo() -> Descriptor {
        Descriptor::new(Gvk::new("x.io", "v1", "Foo")).with_spec(
            vec![
                Field::string("host").required(),
                Field::float64("weight"),
                Field::new("port", FieldType::IntOrString),
                Field::map("extra", Field::new("", FieldType::Dynamic)),
            ],
            true,
        )
    }

    #[test]
    fn stamp_uses_descriptor_constants() {
        let desc = foo();
        let p = project(&desc, &json!({ "metadata": { "name": "a" }, "spec": { "host": "h" } })).unwrap();
        let doc = p.stamp(&desc.gvk);
        assert_eq!(doc.api_version(), "x.io/v1");
        assert_eq!(doc.kind(), "Foo");
    }

    #[test]
    fn scalars_keep_their_kind() {
        let desc = foo();
        let cfg = json!({
            "metadata": { "name": "a" },
            "spec": { "host": "h", "weight": 3, "port": 8080, "extra": { "n": 1.5, "b": true, "s": "x" } }
        });
        let doc = project(&desc, &cfg).unwrap().stamp(&desc.gvk);
        let spec = doc.spec().unwrap();
        assert_eq!(spec["weight"], Yaml::Number(3.into()));
        assert_eq!(spec["port"], Yaml::Number(8080.into()));
        assert_eq!(spec["extra"]["n"], Yaml::Number(1.5.into()));
        assert_eq!(spec["extra"]["b"], Yaml::Bool(true));
    }

    #[test]
    fn type_mismatch_reports_path() {
        let desc = foo();
        let err = project(&desc, &json!({ "metadata": { "name": "a" }, "spec": { "host": 1 } })).unwrap_err();
        assert_eq!(err, RenderError::TypeMismatch { path: "spec.host".into(), expected: "string" });
        let core: Error = err.into();
        assert!(matches!(core, Error::ConfigurationValidation(ref d) if d[0].attribute.as_deref() == Some("spec.host")));
    }

    #[test]
    fn missing_metadata_is_reported() {
        let err = project(&foo(), &json!({ "spec": { "host": "h" } })).unwrap_err();
        assert_eq!(err, RenderError::MissingRequired { path: "metadata".into() });
    }

    #[test]
    fn document_serializes_in_fixed_order() {
        let desc = foo();
        let doc = project(&desc, &json!({ "spec": { "host": "h" }, "metadata": { "name": "a" } })).unwrap().stamp(&desc.gvk);
        let yaml = YamlMaterializer.materialize(&doc).unwrap();
        assert_eq!(yaml, "apiVersion: x.io/v1\nkind: Foo\nmetadata:\n  name: a\nspec:\n  host: h\n");
    }
}
