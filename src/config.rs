//! Keyed configuration storage attached to model entities
//!
//! Values are kept in their string-serialized form; interpretation is left
//! to the surrounding print pipeline. Only keys present in the print-config
//! registry are accepted, everything else is silently dropped on read.

use std::collections::BTreeMap;

use tracing::debug;

/// Registry of recognized print-config keys, sorted for binary search.
///
/// The full option table lives in the print pipeline; the codecs only need
/// to know which keys are legal to round-trip.
const PRINT_CONFIG_KEYS: &[&str] = &[
    "avoid_crossing_perimeters",
    "bottom_solid_layers",
    "bridge_speed",
    "brim_width",
    "external_perimeter_speed",
    "extruder",
    "extrusion_width",
    "fill_angle",
    "fill_density",
    "fill_pattern",
    "first_layer_height",
    "first_layer_speed",
    "gap_fill_speed",
    "infill_every_layers",
    "infill_extruder",
    "infill_speed",
    "layer_height",
    "perimeter_extruder",
    "perimeter_speed",
    "perimeters",
    "raft_layers",
    "seam_position",
    "skirts",
    "small_perimeter_speed",
    "solid_infill_below_area",
    "solid_infill_extruder",
    "solid_infill_speed",
    "support_material",
    "support_material_angle",
    "support_material_contact_distance",
    "support_material_extruder",
    "support_material_interface_extruder",
    "support_material_spacing",
    "support_material_speed",
    "support_material_threshold",
    "temperature",
    "top_solid_infill_speed",
    "top_solid_layers",
    "travel_speed",
    "xy_size_compensation",
];

/// Whether `key` names a recognized print-config option
pub fn is_print_config_key(key: &str) -> bool {
    PRINT_CONFIG_KEYS.binary_search(&key).is_ok()
}

/// String-serialized configuration overriding the global print settings
///
/// Attached to models, objects, volumes and materials. Keys iterate in a
/// stable sorted order so that serialized output is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently present, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Serialized value of `key`, if set
    pub fn serialize(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store the serialized `value` under `key`
    ///
    /// Keys not present in the print-config registry are ignored, matching
    /// the reader contract for unknown configuration found in files.
    pub fn set_deserialize(&mut self, key: &str, value: &str) {
        if !is_print_config_key(key) {
            debug!(key, "ignoring unknown config key");
            return;
        }
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Copy every entry of `other` into this configuration
    pub fn apply(&mut self, other: &Config) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// True when no keys are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of keys set
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted() {
        let mut sorted = PRINT_CONFIG_KEYS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, PRINT_CONFIG_KEYS);
    }

    #[test]
    fn known_keys_round_trip() {
        let mut config = Config::new();
        config.set_deserialize("layer_height", "0.3");
        config.set_deserialize("fill_density", "20%");
        assert_eq!(config.serialize("layer_height"), Some("0.3"));
        assert_eq!(config.serialize("fill_density"), Some("20%"));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let mut config = Config::new();
        config.set_deserialize("no_such_option", "1");
        assert!(config.is_empty());
        assert_eq!(config.serialize("no_such_option"), None);
    }

    #[test]
    fn keys_iterate_sorted() {
        let mut config = Config::new();
        config.set_deserialize("temperature", "210");
        config.set_deserialize("layer_height", "0.2");
        let keys: Vec<&str> = config.keys().collect();
        assert_eq!(keys, ["layer_height", "temperature"]);
    }

    #[test]
    fn apply_overwrites() {
        let mut base = Config::new();
        base.set_deserialize("layer_height", "0.2");
        let mut other = Config::new();
        other.set_deserialize("layer_height", "0.3");
        other.set_deserialize("perimeters", "3");
        base.apply(&other);
        assert_eq!(base.serialize("layer_height"), Some("0.3"));
        assert_eq!(base.serialize("perimeters"), Some("3"));
    }
}
