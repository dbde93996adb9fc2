//! crdform provider: the resource lifecycle over the descriptor registry.
//!
//! Create and Update validate the submitted configuration, project it onto the descriptor,
//! stamp the fixed apiVersion/kind, materialize YAML and hand the resulting state to the
//! host's store. Read and Delete never touch a cluster: they return immediately and leave
//! persisted state to the host.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use crdform_core::{Address, Error, ResourceState, Result, StateStore};
use crdform_render::{project, Materializer, YamlMaterializer};
use crdform_schema::{validate, Registry, Resource, ResourceSchema};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Source of resource ids.
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall clock, nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        // out of range only after the year 2262
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Update,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Update => "update",
        }
    }
}

/// Lifecycle entry point. Cheap to clone; the registry is shared.
#[derive(Clone)]
pub struct Provider<M = YamlMaterializer, C = SystemClock> {
    registry: Arc<Registry>,
    materializer: M,
    clock: C,
}

impl Provider {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry, materializer: YamlMaterializer, clock: SystemClock }
    }
}

impl<M: Materializer, C: Clock> Provider<M, C> {
    pub fn with_parts(registry: Arc<Registry>, materializer: M, clock: C) -> Self {
        Self { registry, materializer, clock }
    }

    pub fn registry(&self) -> &Registry { &self.registry }

    /// Compiled schema of a resource type.
    pub fn schema(&self, type_name: &str) -> Result<&ResourceSchema> {
        Ok(&self.registry.lookup(type_name)?.schema)
    }

    /// Validate a configuration without rendering it.
    pub fn validate(&self, type_name: &str, config: &Value) -> Result<()> {
        let resource = self.registry.lookup(type_name)?;
        check(resource, config)
    }

    /// Render the manifest a Create would produce, without touching any store.
    pub fn render(&self, type_name: &str, config: &Value) -> Result<String> {
        let resource = self.registry.lookup(type_name)?;
        check(resource, config)?;
        self.materialize(resource, config)
    }

    /// Create the resource at `address`; its type is the address's type component.
    /// The address name only keys the stored state; the manifest's name comes from `metadata.name`.
    pub fn create(&self, address: &Address, config: &Value, store: &dyn StateStore) -> Result<ResourceState> {
        self.write(Op::Create, address, config, store)
    }

    /// Replace the whole document. A fresh id is assigned on every call.
    pub fn update(&self, address: &Address, config: &Value, store: &dyn StateStore) -> Result<ResourceState> {
        self.write(Op::Update, address, config, store)
    }

    /// Returns the state unchanged; nothing is fetched.
    pub fn read(&self, state: ResourceState) -> ResourceState {
        debug!(kind = %state.kind, id = state.id, "read");
        state
    }

    /// Nothing to tear down; the host removes persisted state.
    pub fn delete(&self, state: &ResourceState) {
        debug!(kind = %state.kind, id = state.id, "delete");
    }

    fn write(&self, op: Op, address: &Address, config: &Value, store: &dyn StateStore) -> Result<ResourceState> {
        let t0 = Instant::now();
        info!(op = op.as_str(), address = %address, "lifecycle start");
        let res = self.build_state(address, config).and_then(|state| {
            store.put(address, &state).map_err(Error::Store)?;
            Ok(state)
        });
        match &res {
            Ok(state) => {
                match op {
                    Op::Create => { counter!("resource_create_total", 1u64); }
                    Op::Update => { counter!("resource_update_total", 1u64); }
                }
                info!(op = op.as_str(), address = %address, id = state.id, took_ms = %t0.elapsed().as_millis(), "lifecycle ok");
            }
            Err(e) => {
                counter!("resource_lifecycle_err_total", 1u64, "op" => op.as_str());
                warn!(op = op.as_str(), address = %address, error = %e, "lifecycle failed");
            }
        }
        res
    }

    fn build_state(&self, address: &Address, config: &Value) -> Result<ResourceState> {
        let resource = self.registry.lookup(&address.type_name)?;
        check(resource, config)?;
        let yaml = self.materialize(resource, config)?;
        let metadata = config.get("metadata").cloned().unwrap_or(Value::Null);
        let spec = config.get("spec").filter(|v| !v.is_null()).cloned();
        Ok(ResourceState {
            id: self.clock.now_nanos(),
            api_version: resource.descriptor.api_version(),
            kind: resource.descriptor.kind().to_string(),
            metadata,
            spec,
            yaml,
        })
    }

    fn materialize(&self, resource: &Resource, config: &Value) -> Result<String> {
        let started = Instant::now();
        let doc = project(&resource.descriptor, config)?.stamp(&resource.descriptor.gvk);
        let yaml = self.materializer.materialize(&doc)?;
        histogram!("materialize_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(yaml)
    }
}

fn check(resource: &Resource, config: &Value) -> Result<()> {
    let diags = validate(&resource.schema, config);
    if diags.iter().any(|d| d.is_error()) {
        debug!(type_name = %resource.schema.type_name, problems = diags.len(), "configuration rejected");
        return Err(Error::ConfigurationValidation(diags));
    }
    Ok(())
}
