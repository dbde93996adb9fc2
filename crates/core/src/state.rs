//! Resource state records and the store seam the host supplies.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Persisted record for one resource instance. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Wall-clock nanoseconds at materialization time; a last-modified marker, not an identity.
    pub id: i64,
    pub api_version: String,
    pub kind: String,
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
    pub yaml: String,
}

/// Resource address `<type_name>.<name>`, the key of one instance in a state store.
///
/// `name` is the host's label for the instance and is never compared with `metadata.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub type_name: String,
    pub name: String,
}

impl Address {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), name: name.into() }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // type names never contain dots, instance names may
        match s.split_once('.') {
            Some((t, n)) if !t.is_empty() && !n.is_empty() => Ok(Address::new(t, n)),
            _ => Err(anyhow!("invalid resource address {:?}; expected <type>.<name>", s)),
        }
    }
}

/// Key-value sink for resource state, owned by the host.
pub trait StateStore: Send + Sync {
    fn put(&self, address: &Address, state: &ResourceState) -> Result<()>;
    fn get(&self, address: &Address) -> Result<Option<ResourceState>>;
    /// Returns whether an entry was removed.
    fn remove(&self, address: &Address) -> Result<bool>;
    /// All addresses, sorted.
    fn list(&self) -> Result<Vec<Address>>;
}

/// In-memory store, used by tests and by hosts that keep state elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<FxHashMap<Address, ResourceState>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize {
        self.items.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FxHashMap<Address, ResourceState>>> {
        self.items.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl StateStore for MemoryStore {
    fn put(&self, address: &Address, state: &ResourceState) -> Result<()> {
        self.lock()?.insert(address.clone(), state.clone());
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<Option<ResourceState>> {
        Ok(self.lock()?.get(address).cloned())
    }

    fn remove(&self, address: &Address) -> Result<bool> {
        Ok(self.lock()?.remove(address).is_some())
    }

    fn list(&self) -> Result<Vec<Address>> {
        let mut out: Vec<Address> = self.lock()?.keys().cloned().collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: i64) -> ResourceState {
        ResourceState {
            id,
            api_version: "x.io/v1".into(),
            kind: "Foo".into(),
            metadata: serde_json::json!({"name": "foo"}),
            spec: None,
            yaml: "apiVersion: x.io/v1\n".into(),
        }
    }

    #[test]
    fn address_parses_type_and_name() {
        let a: Address = "x_io_foo_v1.web.internal".parse().unwrap();
        assert_eq!(a.type_name, "x_io_foo_v1");
        assert_eq!(a.name, "web.internal");
        assert_eq!(a.to_string(), "x_io_foo_v1.web.internal");
        assert!("nodot".parse::<Address>().is_err());
        assert!(".name".parse::<Address>().is_err());
    }

    #[test]
    fn memory_store_put_replaces_and_lists_sorted() {
        let s = MemoryStore::new();
        let b = Address::new("t", "b");
        let a = Address::new("t", "a");
        s.put(&b, &state(1)).unwrap();
        s.put(&a, &state(2)).unwrap();
        s.put(&b, &state(3)).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(&b).unwrap().unwrap().id, 3);
        assert_eq!(s.list().unwrap(), vec![a.clone(), b]);
        assert!(s.remove(&a).unwrap());
        assert!(!s.remove(&a).unwrap());
    }

    #[test]
    fn state_omits_absent_spec_in_json() {
        let v = serde_json::to_value(state(7)).unwrap();
        assert!(v.get("spec").is_none());
        assert_eq!(v["api_version"], "x.io/v1");
    }
}
