//! crdform persistence: SQLite-backed resource state, one row per resource address.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use crdform_core::{Address, ResourceState, StateStore};
use metrics::{counter, histogram};
use tracing::debug;

/// SQLite-backed store. Simple, synchronous; a CLI host is not latency sensitive here.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open `CRDFORM_STATE_PATH`, or `~/.crdform/state.db` when unset.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("CRDFORM_STATE_PATH").map(PathBuf::from).unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        let started = std::time::Instant::now();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path.display()))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS resource_state (
                address     TEXT PRIMARY KEY,
                type_name   TEXT NOT NULL,
                name        TEXT NOT NULL,
                id          INTEGER NOT NULL,
                api_version TEXT NOT NULL,
                kind        TEXT NOT NULL,
                metadata    TEXT NOT NULL,
                spec        TEXT,
                yaml        BLOB NOT NULL
            )",
            [],
        )
        .context("creating resource_state table")?;
        let me = Self { db: Mutex::new(db) };
        histogram!("state_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path = %path.display(), "state db opened");
        Ok(me)
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("state db lock poisoned"))
    }
}

impl StateStore for SqliteStore {
    fn put(&self, address: &Address, state: &ResourceState) -> Result<()> {
        let started = std::time::Instant::now();
        let metadata = serde_json::to_string(&state.metadata).context("encoding metadata")?;
        let spec = state.spec.as_ref().map(serde_json::to_string).transpose().context("encoding spec")?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO resource_state(address, type_name, name, id, api_version, kind, metadata, spec, yaml)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(address) DO UPDATE SET
                id = excluded.id, api_version = excluded.api_version, kind = excluded.kind,
                metadata = excluded.metadata, spec = excluded.spec, yaml = excluded.yaml",
            rusqlite::params![
                address.to_string(),
                &address.type_name,
                &address.name,
                state.id,
                &state.api_version,
                &state.kind,
                metadata,
                spec,
                maybe_compress(&state.yaml),
            ],
        )
        .with_context(|| format!("writing state for {}", address))?;
        histogram!("state_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("state_put_total", 1u64);
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<Option<ResourceState>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT id, api_version, kind, metadata, spec, yaml FROM resource_state WHERE address = ?1")?;
        let mut rows = stmt.query([address.to_string()])?;
        let Some(row) = rows.next()? else { return Ok(None) };
        let metadata: String = row.get(3)?;
        let spec: Option<String> = row.get(4)?;
        let yaml: Vec<u8> = row.get(5)?;
        let state = ResourceState {
            id: row.get(0)?,
            api_version: row.get(1)?,
            kind: row.get(2)?,
            metadata: serde_json::from_str(&metadata).with_context(|| format!("decoding metadata of {}", address))?,
            spec: spec
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .with_context(|| format!("decoding spec of {}", address))?,
            yaml: maybe_decompress(&yaml),
        };
        histogram!("state_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Some(state))
    }

    fn remove(&self, address: &Address) -> Result<bool> {
        let db = self.conn()?;
        let n = db
            .execute("DELETE FROM resource_state WHERE address = ?1", [address.to_string()])
            .with_context(|| format!("removing state for {}", address))?;
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<Address>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT type_name, name FROM resource_state ORDER BY type_name, name")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Address::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }
        Ok(out)
    }
}

fn default_db_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".crdform");
        p.push("state.db");
        return p;
    }
    // Fallback to current directory
    PathBuf::from("crdform-state.db")
}

fn maybe_compress(yaml: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("CRDFORM_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(yaml.as_bytes(), lvl).unwrap_or_else(|_| yaml.as_bytes().to_vec());
    }
    yaml.as_bytes().to_vec()
}

fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}
