//! Durable universe-wide state: `universe.dat`, the temp world index and
//! the ban tables.

use crate::error::Result;
use crate::warping::InstanceWorldId;
use serde::{Deserialize, Serialize};
use skyward_core::types::time::milliseconds_since_epoch;
use skyward_core::types::versioning::{fail_rename, VersionedJson};
use skyward_core::Uuid;
use log::error;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

pub const UNIVERSE_SETTINGS_KIND: &str = "UniverseSettings";
pub const UNIVERSE_SETTINGS_VERSION: u32 = 1;

pub const TEMP_WORLD_INDEX_KIND: &str = "TempWorldIndex";
pub const TEMP_WORLD_INDEX_VERSION: u32 = 1;

/// A ban with an expiry; either side (ip, uuid) may be absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutBan {
    pub ban_expiry: i64,
    pub reason: String,
    pub ip: Option<IpAddr>,
    pub uuid: Option<Uuid>,
}

/// Universe-wide durable settings, persisted as `universe.dat` together
/// with the universe clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UniverseSettings {
    pub uuid: Uuid,
    pub banned_ips: Vec<String>,
    pub banned_uuids: Vec<String>,
    pub flags: Vec<String>,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        UniverseSettings {
            uuid: Uuid::new(),
            banned_ips: Vec::new(),
            banned_uuids: Vec::new(),
            flags: Vec::new(),
        }
    }
}

impl UniverseSettings {
    /// Loads settings and the stored universe time. Corrupt files are
    /// renamed aside and replaced with defaults.
    pub fn load(path: &Path) -> (UniverseSettings, f64) {
        if !path.exists() {
            return (UniverseSettings::default(), 0.0);
        }
        match Self::try_load(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("could not load {}: {e}; replacing with defaults", path.display());
                if let Err(rename_error) = fail_rename(path) {
                    error!("could not rename failed file: {rename_error}");
                }
                (UniverseSettings::default(), 0.0)
            }
        }
    }

    fn try_load(path: &Path) -> Result<(UniverseSettings, f64)> {
        let stored = VersionedJson::read_file(path)?;
        if stored.kind != UNIVERSE_SETTINGS_KIND {
            return Err(crate::error::ServerError::storage(format!(
                "expected {UNIVERSE_SETTINGS_KIND}, found {}",
                stored.kind
            )));
        }
        let time = stored.content["time"].as_f64().unwrap_or(0.0);
        let settings = serde_json::from_value(stored.content["settings"].clone())?;
        Ok((settings, time))
    }

    pub fn save(&self, path: &Path, universe_time: f64) -> Result<()> {
        VersionedJson::new(
            UNIVERSE_SETTINGS_KIND,
            UNIVERSE_SETTINGS_VERSION,
            serde_json::json!({
                "time": universe_time,
                "settings": self,
            }),
        )
        .write_file(path)?;
        Ok(())
    }
}

/// The temp world index: when each temp world shut down and when its
/// file may be deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempWorldIndex {
    entries: HashMap<InstanceWorldId, (i64, i64)>,
}

impl TempWorldIndex {
    pub fn load(path: &Path) -> TempWorldIndex {
        if !path.exists() {
            return TempWorldIndex::default();
        }
        match Self::try_load(path) {
            Ok(index) => index,
            Err(e) => {
                error!("could not load {}: {e}; starting empty", path.display());
                if let Err(rename_error) = fail_rename(path) {
                    error!("could not rename failed file: {rename_error}");
                }
                TempWorldIndex::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<TempWorldIndex> {
        let stored = VersionedJson::read_file(path)?;
        let entries: Vec<(InstanceWorldId, i64, i64)> =
            serde_json::from_value(stored.content)?;
        Ok(TempWorldIndex {
            entries: entries
                .into_iter()
                .map(|(id, shutdown, delete_after)| (id, (shutdown, delete_after)))
                .collect(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let entries: Vec<(&InstanceWorldId, i64, i64)> = self
            .entries
            .iter()
            .map(|(id, (shutdown, delete_after))| (id, *shutdown, *delete_after))
            .collect();
        VersionedJson::new(
            TEMP_WORLD_INDEX_KIND,
            TEMP_WORLD_INDEX_VERSION,
            serde_json::to_value(entries)?,
        )
        .write_file(path)?;
        Ok(())
    }

    /// Records a temp world shutdown, scheduling its file deletion.
    pub fn record_shutdown(&mut self, world: InstanceWorldId, delete_after_millis: i64) {
        let now = milliseconds_since_epoch();
        self.entries.insert(world, (now, now + delete_after_millis));
    }

    pub fn remove(&mut self, world: &InstanceWorldId) {
        self.entries.remove(world);
    }

    pub fn contains(&self, world: &InstanceWorldId) -> bool {
        self.entries.contains_key(world)
    }

    /// Worlds whose delete deadline passed.
    pub fn expired(&self) -> Vec<InstanceWorldId> {
        let now = milliseconds_since_epoch();
        self.entries
            .iter()
            .filter(|(_, (_, delete_after))| *delete_after <= now)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("skyward-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn settings_round_trip() {
        let path = temp_path("universe.dat");
        let mut settings = UniverseSettings::default();
        settings.banned_ips.push("10.0.0.1".into());
        settings.save(&path, 123.5).unwrap();

        let (loaded, time) = UniverseSettings::load(&path);
        assert_eq!(loaded, settings);
        assert_eq!(time, 123.5);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let path = temp_path("universe-corrupt.dat");
        std::fs::write(&path, "{ not json").unwrap();
        let (loaded, time) = UniverseSettings::load(&path);
        assert_eq!(time, 0.0);
        assert!(loaded.banned_ips.is_empty());
        assert!(!path.exists(), "failed file was renamed aside");
    }

    #[test]
    fn temp_world_index_round_trip() {
        let path = temp_path("tempworlds.index");
        let mut index = TempWorldIndex::default();
        index.record_shutdown(InstanceWorldId::shared("arena"), 60_000);
        index.save(&path).unwrap();

        let loaded = TempWorldIndex::load(&path);
        assert!(loaded.contains(&InstanceWorldId::shared("arena")));
        assert!(loaded.expired().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn expired_worlds_are_reported() {
        let mut index = TempWorldIndex::default();
        index.record_shutdown(InstanceWorldId::shared("old"), -1000);
        index.record_shutdown(InstanceWorldId::shared("new"), 60_000);
        let expired = index.expired();
        assert_eq!(expired, vec![InstanceWorldId::shared("old")]);
    }
}
