//! Per-endpoint schema registry with learn-and-compare
//!
//! One shared instance serves the whole process. Schemas are keyed by the
//! normalized path pattern and optionally persisted as a single JSON
//! document so learned contracts survive restarts.

use super::{compare, drift_summary, ContractChange, SchemaNode, Severity};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stores and updates learned schemas per endpoint pattern.
pub struct SchemaIntelligence {
    schemas: Mutex<HashMap<String, SchemaNode>>,
    persist_path: Option<PathBuf>,
}

impl SchemaIntelligence {
    /// Create a registry, loading any previously persisted schemas.
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        let mut schemas = HashMap::new();
        if let Some(path) = &persist_path {
            match load_schemas(path) {
                Ok(Some(loaded)) => {
                    info!(endpoints = loaded.len(), "schema registry loaded from disk");
                    schemas = loaded;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not load schema registry"),
            }
        }
        Self {
            schemas: Mutex::new(schemas),
            persist_path,
        }
    }

    /// In-memory registry with no persistence (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// The current learned schema for a pattern, if any.
    pub fn get(&self, pattern: &str) -> Option<SchemaNode> {
        self.schemas.lock().get(pattern).cloned()
    }

    /// All patterns with a learned schema.
    pub fn patterns(&self) -> Vec<String> {
        self.schemas.lock().keys().cloned().collect()
    }

    /// Replace the schema for a pattern outright (control-plane updates).
    pub fn set(&self, pattern: &str, schema: SchemaNode) {
        self.schemas.lock().insert(pattern.to_string(), schema);
        self.persist();
    }

    /// Learn from an observed response payload and report contract changes.
    ///
    /// The comparison runs between the schema as it stood before this
    /// observation and the schema of the payload alone; the merged result is
    /// stored. The first observation of a pattern reports no changes.
    pub fn learn_and_compare(
        &self,
        pattern: &str,
        payload: &Value,
    ) -> (SchemaNode, Vec<ContractChange>) {
        let fresh = SchemaNode::learn(None, payload);
        let (snapshot, updated) = {
            let mut schemas = self.schemas.lock();
            let snapshot = schemas.get(pattern).cloned();
            let updated = SchemaNode::learn(snapshot.clone(), payload);
            schemas.insert(pattern.to_string(), updated.clone());
            (snapshot, updated)
        };

        let changes = match snapshot {
            Some(previous) => compare(&previous, &fresh),
            None => Vec::new(),
        };

        if !changes.is_empty() {
            let breaking = changes.iter().filter(|c| c.severity == Severity::Breaking).count();
            let warnings = changes.iter().filter(|c| c.severity == Severity::Warning).count();
            let summary = drift_summary(&changes);
            if breaking > 0 {
                warn!(%pattern, breaking, warnings, "contract drift: {summary}");
            } else if warnings > 0 {
                warn!(%pattern, warnings, "contract change: {summary}");
            } else {
                debug!(%pattern, "schema info: {} additive change(s)", changes.len());
            }
        }

        self.persist();
        (updated, changes)
    }

    /// Force an immediate save. Called on shutdown.
    pub fn flush(&self) {
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let snapshot = self.schemas.lock().clone();
        if let Err(e) = save_schemas(path, &snapshot) {
            warn!(error = %e, "could not persist schema registry");
        }
    }
}

fn load_schemas(path: &Path) -> crate::Result<Option<HashMap<String, SchemaNode>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Write-to-temp then rename, so a crash mid-write never truncates the
/// registry document.
fn save_schemas(path: &Path, schemas: &HashMap<String, SchemaNode>) -> crate::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(schemas)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
