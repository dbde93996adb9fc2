//! Descriptor definition files.
//!
//! One YAML document per resource type:
//!
//! ```yaml
//! group: cert-manager.io
//! version: v1
//! kind: Certificate
//! namespaced: true
//! spec:
//!   cardinality: required
//!   fields:
//!     - name: secret_name
//!       type: string
//!       cardinality: required
//!     - name: dns_names
//!       key: dnsNames
//!       type: list
//!       element: { type: string }
//! ```
//!
//! A file may also hold `CustomResourceDefinition` manifests, which are imported through
//! [`crate::crd`]. Multi-document files mix both freely.

use crdform_core::{camel_case, Cardinality, Descriptor, Field, FieldType, Gvk, Validator};
use serde::Deserialize;

use crate::{crd, SchemaError};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorDef {
    #[serde(default)]
    group: String,
    version: String,
    kind: String,
    #[serde(default = "default_namespaced")]
    namespaced: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    spec: Option<SpecDef>,
}

fn default_namespaced() -> bool { true }

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpecDef {
    #[serde(default)]
    cardinality: Cardinality,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    fields: Vec<FieldDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldDef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(rename = "type")]
    ty: TypeTag,
    #[serde(default)]
    element: Option<Box<FieldDef>>,
    #[serde(default)]
    fields: Vec<FieldDef>,
    #[serde(default)]
    cardinality: Cardinality,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    validators: Vec<Validator>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypeTag {
    String,
    Int64,
    Bool,
    Float64,
    List,
    Map,
    Object,
    IntOrString,
    Dynamic,
}

/// Parse every document of a YAML file into descriptors. `origin` names the file in errors.
pub fn parse_documents(text: &str, origin: &str) -> Result<Vec<Descriptor>, SchemaError> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc)
            .map_err(|source| SchemaError::Yaml { origin: origin.to_string(), source })?;
        if value.is_null() {
            continue;
        }
        if crd::is_crd_manifest(&value) {
            let json = serde_json::to_value(&value).map_err(|e| SchemaError::Definition {
                origin: origin.to_string(),
                message: format!("converting CRD manifest to JSON: {}", e),
            })?;
            out.extend(crd::descriptors_from_crd(&json)?);
            continue;
        }
        let def: DescriptorDef = serde_yaml::from_value(value)
            .map_err(|source| SchemaError::Yaml { origin: origin.to_string(), source })?;
        out.push(def.into_descriptor(origin)?);
    }
    Ok(out)
}

impl DescriptorDef {
    fn into_descriptor(self, origin: &str) -> Result<Descriptor, SchemaError> {
        if self.version.is_empty() || self.kind.is_empty() {
            return Err(definition(origin, "version and kind must not be empty"));
        }
        let mut desc = Descriptor::new(Gvk::new(self.group, self.version, self.kind));
        desc.namespaced = self.namespaced;
        desc.description = self.description;
        if let Some(spec) = self.spec {
            if spec.cardinality == Cardinality::Computed {
                return Err(definition(origin, "spec cannot be computed"));
            }
            let fields = spec
                .fields
                .into_iter()
                .map(|f| f.into_field(origin, "spec"))
                .collect::<Result<Vec<_>, _>>()?;
            let mut field = Field::object("spec", fields);
            field.cardinality = spec.cardinality;
            field.description = spec.description;
            desc.spec = Some(field);
        }
        Ok(desc)
    }
}

impl FieldDef {
    fn into_field(self, origin: &str, parent: &str) -> Result<Field, SchemaError> {
        let is_element = parent.ends_with("[*]");
        let path = if is_element { parent.to_string() } else { format!("{}.{}", parent, self.name) };
        if self.name.is_empty() && !is_element {
            return Err(definition(origin, &format!("{}: field name must not be empty", path)));
        }
        let collection = matches!(self.ty, TypeTag::List | TypeTag::Map);
        if collection != self.element.is_some() {
            return Err(definition(origin, &format!("{}: `element` is required for list and map fields only", path)));
        }
        if !matches!(self.ty, TypeTag::Object) && !self.fields.is_empty() {
            return Err(definition(origin, &format!("{}: `fields` is only valid for object fields", path)));
        }
        let ty = match self.ty {
            TypeTag::String => FieldType::String,
            TypeTag::Int64 => FieldType::Int64,
            TypeTag::Bool => FieldType::Bool,
            TypeTag::Float64 => FieldType::Float64,
            TypeTag::IntOrString => FieldType::IntOrString,
            TypeTag::Dynamic => FieldType::Dynamic,
            TypeTag::List | TypeTag::Map => {
                let element = match self.element {
                    Some(e) => e.into_field(origin, &format!("{}[*]", path))?,
                    None => return Err(definition(origin, &format!("{}: missing element", path))),
                };
                if matches!(self.ty, TypeTag::List) {
                    FieldType::List(Box::new(element))
                } else {
                    FieldType::Map(Box::new(element))
                }
            }
            TypeTag::Object => FieldType::Object(
                self.fields
                    .into_iter()
                    .map(|f| f.into_field(origin, &path))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        let key = self.key.unwrap_or_else(|| camel_case(&self.name));
        Ok(Field {
            name: self.name,
            key,
            ty,
            cardinality: self.cardinality,
            description: self.description,
            validators: self.validators.into_iter().collect(),
        })
    }
}

fn definition(origin: &str, message: &str) -> SchemaError {
    SchemaError::Definition { origin: origin.to_string(), message: message.to_string() }
}
