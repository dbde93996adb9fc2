use std::path::{Path, PathBuf};

use crdform_core::{Descriptor, Error};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{compile, def, ResourceSchema, SchemaError};

/// One registered resource type: its descriptor and the schema compiled from it.
#[derive(Debug, Clone)]
pub struct Resource {
    pub descriptor: Descriptor,
    pub schema: ResourceSchema,
}

/// Closed set of resource types, keyed by type name. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: FxHashMap<String, Resource>,
}

impl Registry {
    /// Compile every descriptor; duplicate type names are rejected.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = Descriptor>) -> Result<Self, SchemaError> {
        let mut entries = FxHashMap::default();
        for descriptor in descriptors {
            let schema = compile(&descriptor)?;
            let type_name = schema.type_name.clone();
            if entries.contains_key(&type_name) {
                return Err(SchemaError::DuplicateType(type_name));
            }
            debug!(type_name = %type_name, gvk = %descriptor.gvk, "resource type registered");
            entries.insert(type_name, Resource { descriptor, schema });
        }
        Ok(Self { entries })
    }

    /// Load every `*.yaml` / `*.yml` file below `dir` (recursively, in path order).
    pub fn load_dir(dir: &Path) -> Result<Self, SchemaError> {
        let mut files = Vec::new();
        collect_yaml_files(dir, &mut files)?;
        files.sort();
        let mut descriptors = Vec::new();
        for path in files.iter() {
            let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io { path: path.clone(), source })?;
            descriptors.extend(def::parse_documents(&text, &path.display().to_string())?);
        }
        let registry = Self::from_descriptors(descriptors)?;
        info!(dir = %dir.display(), files = files.len(), types = registry.len(), "descriptors loaded");
        Ok(registry)
    }

    /// Resolve a resource type name.
    pub fn lookup(&self, type_name: &str) -> Result<&Resource, Error> {
        self.entries.get(type_name).ok_or_else(|| Error::UnknownResourceType(type_name.to_string()))
    }

    /// All type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SchemaError> {
    let io = |source| SchemaError::Io { path: dir.to_path_buf(), source };
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) {
            out.push(path);
        }
    }
    Ok(())
}
