// src/knowledge/device_profiles.rs
// module: knowledge | role: device-profile corpus
// summary: keyed by device geometry id; load/create, coordinate CRUD, list all
// (SPEC_FULL.md §4.4 Device profiles). One file per geometry under
// `data/device-profiles/<device_id>.json` (SPEC_FULL.md §6 persisted state layout).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::domain::device_profile::{device_id, CoordinateRecord, DeviceProfile};
use crate::error::AgentResult;

use super::atomic::{read_json, write_json_atomic};

pub struct DeviceProfileStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, DeviceProfile>>,
}

impl DeviceProfileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Loads an existing profile for this geometry, or creates and persists
    /// an empty one.
    pub fn load_or_create(&self, width: u32, height: u32) -> AgentResult<DeviceProfile> {
        let id = device_id(width, height);
        if let Some(cached) = self.cache.read().get(&id) {
            return Ok(cached.clone());
        }

        let path = self.path_for(&id);
        let profile = read_json(&path)?.unwrap_or_else(|| DeviceProfile::new(width, height));
        self.cache.write().insert(id, profile.clone());
        Ok(profile)
    }

    pub fn upsert_coordinate(
        &self,
        width: u32,
        height: u32,
        normalized_name: &str,
        record: CoordinateRecord,
    ) -> AgentResult<()> {
        let mut profile = self.load_or_create(width, height)?;
        profile.upsert(normalized_name, record);
        self.persist(profile)
    }

    pub fn delete_coordinate(&self, width: u32, height: u32, normalized_name: &str) -> AgentResult<bool> {
        let mut profile = self.load_or_create(width, height)?;
        let removed = profile.delete(normalized_name).is_some();
        self.persist(profile)?;
        Ok(removed)
    }

    pub fn list_all(&self) -> Vec<DeviceProfile> {
        self.cache.read().values().cloned().collect()
    }

    fn persist(&self, profile: DeviceProfile) -> AgentResult<()> {
        let path = self.path_for(&profile.device_id);
        write_json_atomic(&path, &profile)?;
        self.cache.write().insert(profile.device_id.clone(), profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::CoordinateSource;

    #[test]
    fn load_or_create_persists_an_empty_profile_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceProfileStore::new(dir.path());
        let profile = store.load_or_create(1920, 1080).unwrap();
        assert_eq!(profile.device_id, "device_1920x1080");
        assert!(profile.coordinates.is_empty());
    }

    #[test]
    fn upsert_then_list_all_reflects_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceProfileStore::new(dir.path());
        store
            .upsert_coordinate(1920, 1080, "settings", CoordinateRecord::new(10, 20, CoordinateSource::Ocr))
            .unwrap();

        let profile = store.load_or_create(1920, 1080).unwrap();
        assert!(profile.get_exact("settings").is_some());
        assert_eq!(store.list_all().len(), 1);
    }

    #[test]
    fn delete_removes_the_coordinate() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceProfileStore::new(dir.path());
        store
            .upsert_coordinate(1920, 1080, "settings", CoordinateRecord::new(10, 20, CoordinateSource::Ocr))
            .unwrap();
        assert!(store.delete_coordinate(1920, 1080, "settings").unwrap());
        let profile = store.load_or_create(1920, 1080).unwrap();
        assert!(profile.get_exact("settings").is_none());
    }
}
