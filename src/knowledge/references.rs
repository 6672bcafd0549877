// src/knowledge/references.rs
// module: knowledge | role: verification-reference corpus
// summary: reads the operator-captured reference PNGs the Verifier's primary
// signal consumes (SPEC_FULL.md §3 VerificationReference, §6 persisted layout
// `data/verification_images/<device_id>/<name>.png`). Capture is out-of-band
// (an operator tool, not part of the core); this store only ever reads.

use std::path::PathBuf;

use crate::domain::device_profile::{device_id, normalize_icon_name};

pub struct ReferenceImageStore {
    base_dir: PathBuf,
}

impl ReferenceImageStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, width: u32, height: u32, name: &str) -> PathBuf {
        self.base_dir.join(device_id(width, height)).join(format!("{name}.png"))
    }

    /// Returns the reference PNG's bytes, or `None` if no reference is stored
    /// for this geometry/name (Verifier falls back to pixel-diff in that case).
    pub fn get(&self, width: u32, height: u32, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(width, height, name)).ok()
    }

    /// Best-effort default name for a step whose `Step::reference_hint` is
    /// absent: the normalized target name suffixed `_opened`, matching the
    /// reference-image name synthesis prompt of SPEC_FULL.md §6.
    pub fn derive_name(target_name: &str) -> String {
        format!("{}_opened", normalize_icon_name(target_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reference_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReferenceImageStore::new(dir.path());
        assert!(store.get(1920, 1080, "settings_opened").is_none());
    }

    #[test]
    fn reads_a_stored_reference() {
        let dir = tempfile::tempdir().unwrap();
        let geometry_dir = dir.path().join("device_1920x1080");
        std::fs::create_dir_all(&geometry_dir).unwrap();
        std::fs::write(geometry_dir.join("settings_opened.png"), b"fake-png").unwrap();

        let store = ReferenceImageStore::new(dir.path());
        assert_eq!(store.get(1920, 1080, "settings_opened"), Some(b"fake-png".to_vec()));
    }

    #[test]
    fn derive_name_normalizes_and_suffixes() {
        assert_eq!(ReferenceImageStore::derive_name("Settings Icon"), "settings_icon_opened");
    }
}
