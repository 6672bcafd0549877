// src/domain/device_profile.rs
// module: domain | layer: domain | role: device-profile entity
// summary: device geometry -> normalized icon name -> coordinate record (SPEC_FULL.md §3, §4.4).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::CoordinateSource;

/// A single stored coordinate for a normalized icon name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinateRecord {
    pub x: i32,
    pub y: i32,
    pub source: CoordinateSource,
    pub last_verified: DateTime<Utc>,
}

impl CoordinateRecord {
    pub fn new(x: i32, y: i32, source: CoordinateSource) -> Self {
        Self {
            x,
            y,
            source,
            last_verified: Utc::now(),
        }
    }
}

/// Device identifier derived as `device_<width>x<height>`.
pub fn device_id(width: u32, height: u32) -> String {
    format!("device_{width}x{height}")
}

/// Lowercase, underscore-joined normalization of a human-readable element label.
pub fn normalize_icon_name(description: &str) -> String {
    description
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// One device geometry's learned icon coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceProfile {
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub coordinates: HashMap<String, CoordinateRecord>,
}

impl DeviceProfile {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            device_id: device_id(width, height),
            width,
            height,
            coordinates: HashMap::new(),
        }
    }

    /// Exact match on the normalized name (C2 step 1, C4 exact lookup).
    pub fn get_exact(&self, normalized_name: &str) -> Option<&CoordinateRecord> {
        self.coordinates.get(normalized_name)
    }

    /// Exact match first, then substring fuzzy match with a >= 0.7
    /// character-set Jaccard fallback (C4 device-profile lookup rule).
    pub fn get_fuzzy(&self, normalized_name: &str) -> Option<(&str, &CoordinateRecord)> {
        if let Some(record) = self.coordinates.get(normalized_name) {
            return Some((normalized_name, record));
        }

        // Substring match: either name contains the other.
        let mut best: Option<(&str, &CoordinateRecord, f64)> = None;
        for (key, record) in &self.coordinates {
            let substring_hit = key.contains(normalized_name) || normalized_name.contains(key.as_str());
            let jaccard = char_set_jaccard(key, normalized_name);
            if substring_hit || jaccard >= 0.7 {
                let score = if substring_hit { 1.0 } else { jaccard };
                if best.as_ref().map(|(_, _, s)| score > *s).unwrap_or(true) {
                    best = Some((key.as_str(), record, score));
                }
            }
        }
        best.map(|(k, r, _)| (k, r))
    }

    pub fn upsert(&mut self, normalized_name: impl Into<String>, record: CoordinateRecord) {
        self.coordinates.insert(normalized_name.into(), record);
    }

    pub fn delete(&mut self, normalized_name: &str) -> Option<CoordinateRecord> {
        self.coordinates.remove(normalized_name)
    }
}

/// Jaccard similarity over the two strings' character sets.
fn char_set_jaccard(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_format() {
        assert_eq!(device_id(1920, 1080), "device_1920x1080");
    }

    #[test]
    fn normalize_lowercases_and_joins() {
        assert_eq!(normalize_icon_name("  Settings  Icon "), "settings_icon");
    }

    #[test]
    fn exact_then_fuzzy_lookup() {
        let mut profile = DeviceProfile::new(1920, 1080);
        profile.upsert(
            "settings_app",
            CoordinateRecord::new(100, 200, CoordinateSource::Ocr),
        );

        assert!(profile.get_exact("settings_app").is_some());
        assert!(profile.get_exact("settings").is_none());

        let (key, _) = profile.get_fuzzy("settings").expect("substring fuzzy hit");
        assert_eq!(key, "settings_app");
    }

    #[test]
    fn fuzzy_lookup_respects_geometry_isolation() {
        let profile_a = DeviceProfile::new(1920, 1080);
        let profile_b = DeviceProfile::new(1280, 720);
        assert_ne!(profile_a.device_id, profile_b.device_id);
    }
}
