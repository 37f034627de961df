//! Versioned JSON persistence.
//!
//! Every file this engine writes is wrapped in a `{version, kind, content}`
//! envelope. Loading runs registered migrations until the current version
//! is reached; an envelope from the future is an error for that file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::Path;

/// The on-disk envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedJson {
    pub kind: String,
    pub version: u32,
    pub content: Json,
}

impl VersionedJson {
    pub fn new(kind: impl Into<String>, version: u32, content: Json) -> Self {
        VersionedJson {
            kind: kind.into(),
            version,
            content,
        }
    }

    pub fn read_file(path: impl AsRef<Path>) -> Result<VersionedJson> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

type Migration = Box<dyn Fn(Json) -> Result<Json> + Send + Sync>;

/// Registry of current versions per kind plus `(kind, from) -> from + 1`
/// migration steps.
#[derive(Default)]
pub struct VersioningDatabase {
    current: HashMap<String, u32>,
    migrations: HashMap<(String, u32), Migration>,
}

impl VersioningDatabase {
    pub fn new() -> Self {
        VersioningDatabase::default()
    }

    pub fn register_kind(&mut self, kind: impl Into<String>, current_version: u32) {
        self.current.insert(kind.into(), current_version);
    }

    pub fn register_migration<F>(&mut self, kind: impl Into<String>, from_version: u32, step: F)
    where
        F: Fn(Json) -> Result<Json> + Send + Sync + 'static,
    {
        self.migrations
            .insert((kind.into(), from_version), Box::new(step));
    }

    pub fn current_version(&self, kind: &str) -> Result<u32> {
        self.current
            .get(kind)
            .copied()
            .ok_or_else(|| Error::Versioning(format!("unknown versioned kind '{kind}'")))
    }

    /// Wraps content at the kind's current version.
    pub fn make(&self, kind: &str, content: Json) -> Result<VersionedJson> {
        Ok(VersionedJson::new(kind, self.current_version(kind)?, content))
    }

    /// Checks the kind, runs migrations up to current, and unwraps.
    pub fn load(&self, kind: &str, stored: VersionedJson) -> Result<Json> {
        if stored.kind != kind {
            return Err(Error::Versioning(format!(
                "expected versioned kind '{kind}', found '{}'",
                stored.kind
            )));
        }

        let target = self.current_version(kind)?;
        if stored.version > target {
            return Err(Error::Versioning(format!(
                "'{kind}' version {} is newer than supported version {target}",
                stored.version
            )));
        }

        let mut version = stored.version;
        let mut content = stored.content;
        while version < target {
            let step = self
                .migrations
                .get(&(kind.to_string(), version))
                .ok_or_else(|| {
                    Error::Versioning(format!(
                        "no migration for '{kind}' from version {version}"
                    ))
                })?;
            content = step(content)?;
            version += 1;
        }
        Ok(content)
    }
}

/// Renames a file that failed to load out of the way, so a default can be
/// substituted without destroying evidence.
pub fn fail_rename(path: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let path = path.as_ref();
    let failed = path.with_extension(format!(
        "{}.{}.fail",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        crate::types::time::milliseconds_since_epoch()
    ));
    std::fs::rename(path, &failed)?;
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn database() -> VersioningDatabase {
        let mut db = VersioningDatabase::new();
        db.register_kind("ClientContext", 2);
        db.register_migration("ClientContext", 0, |mut content| {
            content["admin"] = json!(false);
            Ok(content)
        });
        db.register_migration("ClientContext", 1, |mut content| {
            content["shipLevel"] = content
                .get("shipUpgrades")
                .and_then(|u| u.get("level"))
                .cloned()
                .unwrap_or(json!(0));
            Ok(content)
        });
        db
    }

    #[test]
    fn load_runs_migrations_in_order() {
        let db = database();
        let old = VersionedJson::new("ClientContext", 0, json!({"nickname": "kestrel"}));
        let loaded = db.load("ClientContext", old).unwrap();
        assert_eq!(loaded["admin"], json!(false));
        assert_eq!(loaded["shipLevel"], json!(0));
    }

    #[test]
    fn current_version_loads_untouched() {
        let db = database();
        let stored = db.make("ClientContext", json!({"nickname": "kestrel"})).unwrap();
        assert_eq!(stored.version, 2);
        let loaded = db.load("ClientContext", stored).unwrap();
        assert_eq!(loaded, json!({"nickname": "kestrel"}));
    }

    #[test]
    fn future_versions_are_rejected() {
        let db = database();
        let future = VersionedJson::new("ClientContext", 3, json!({}));
        assert!(matches!(
            db.load("ClientContext", future),
            Err(Error::Versioning(_))
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let db = database();
        let wrong = VersionedJson::new("WorldMetadata", 1, json!({}));
        assert!(db.load("ClientContext", wrong).is_err());
    }
}
