use crate::core::constants::{
    DEFAULT_CALIBRATION_ATTEMPTS, DEFAULT_PATH_HISTORY_LIMIT, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_STALE_AFTER_MS,
};
use crate::core::{AnchorRegistry, TagRegistry};
use crate::hardware::SerialConfig;
use crate::processing::kalman::FilterParameters;
use nalgebra::Vector3;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Everything the host reads from its JSON configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub serial: SerialConfig,
    pub protocol: ProtocolConfig,
    pub filter: FilterParameters,
    pub calibration: CalibrationConfig,
    pub tracking: TrackingConfig,
    /// Anchors in display order
    pub anchors: Vec<AnchorConfig>,
    /// Tags in display order
    pub tags: Vec<TagConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// How long one command waits for its response (milliseconds)
    pub response_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Ranging attempts per anchor pair
    pub attempts: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CALIBRATION_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Filtered points kept per tag
    pub path_history_limit: usize,
    /// A tag unseen for longer than this is hidden (milliseconds)
    pub stale_after_ms: u64,
    /// Pause between tracking cycles (milliseconds)
    pub update_interval_ms: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            path_history_limit: DEFAULT_PATH_HISTORY_LIMIT,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            update_interval_ms: 200,
        }
    }
}

/// Persisted anchor entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub id: u16,
    /// Position in meters; short lists are padded with zeros
    #[serde(default, deserialize_with = "deserialize_position")]
    pub pos: [f64; 3],
    #[serde(default = "default_enable")]
    pub enable: bool,
}

/// Persisted tag entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagConfig {
    pub id: u16,
    /// Known tag height (meters)
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_enable")]
    pub enable: bool,
}

fn default_enable() -> bool {
    true
}

/// Accept any JSON list as a position: the first three entries are used,
/// missing or non-numeric ones become zero
fn deserialize_position<'de, D>(deserializer: D) -> Result<[f64; 3], D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    let mut pos = [0.0; 3];
    for (slot, value) in pos.iter_mut().zip(&values) {
        *slot = value.as_f64().unwrap_or(0.0);
    }
    Ok(pos)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("anchor id 0x{id:04X} appears more than once")]
    DuplicateAnchor { id: u16 },
    #[error("tag id 0x{id:04X} appears more than once")]
    DuplicateTag { id: u16 },
    #[error("invalid value '{value}' for {parameter}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Owns the loaded configuration and the file it came from
#[derive(Debug, Clone, Default)]
pub struct ConfigurationManager {
    config: SystemConfig,
    config_file_path: Option<PathBuf>,
    is_modified: bool,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an in-memory configuration after validating it
    pub fn with_config(config: SystemConfig) -> ConfigResult<Self> {
        Self::validate(&config)?;
        Ok(Self {
            config,
            config_file_path: None,
            is_modified: true,
        })
    }

    /// Create a manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Mutable access; marks the configuration as modified
    pub fn config_mut(&mut self) -> &mut SystemConfig {
        self.is_modified = true;
        &mut self.config
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.config_file_path.as_deref()
    }

    /// Load and validate a JSON file; the current config is kept on failure
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: SystemConfig = serde_json::from_str(&content)?;
        Self::validate(&config)?;

        info!(
            path = %path.display(),
            anchors = config.anchors.len(),
            tags = config.tags.len(),
            "configuration loaded"
        );
        self.config = config;
        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    /// Write the configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.config)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        info!(path = %path.display(), "configuration saved");
        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    /// Save to the file the configuration was loaded from
    pub fn save(&mut self) -> ConfigResult<()> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(ConfigError::invalid("config_file_path", "none", "no file to save to")),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    pub fn validate(config: &SystemConfig) -> ConfigResult<()> {
        if config.serial.port.trim().is_empty() {
            return Err(ConfigError::invalid("serial.port", &config.serial.port, "must not be empty"));
        }
        if config.serial.baud_rate == 0 {
            return Err(ConfigError::invalid("serial.baud_rate", 0, "must be positive"));
        }
        if config.serial.read_timeout_ms == 0 {
            return Err(ConfigError::invalid("serial.read_timeout_ms", 0, "must be positive"));
        }

        let filter = &config.filter;
        if !(filter.dt > 0.0) {
            return Err(ConfigError::invalid("filter.dt", filter.dt, "must be positive"));
        }
        if !(filter.process_variance >= 0.0) {
            return Err(ConfigError::invalid(
                "filter.process_variance",
                filter.process_variance,
                "must not be negative",
            ));
        }
        if !(filter.measurement_variance >= 0.0) {
            return Err(ConfigError::invalid(
                "filter.measurement_variance",
                filter.measurement_variance,
                "must not be negative",
            ));
        }
        if config.calibration.attempts == 0 {
            return Err(ConfigError::invalid("calibration.attempts", 0, "must be positive"));
        }
        if config.tracking.path_history_limit == 0 {
            return Err(ConfigError::invalid("tracking.path_history_limit", 0, "must be positive"));
        }

        let mut seen = HashSet::new();
        if let Some(anchor) = config.anchors.iter().find(|a| !seen.insert(a.id)) {
            return Err(ConfigError::DuplicateAnchor { id: anchor.id });
        }
        let mut seen = HashSet::new();
        if let Some(tag) = config.tags.iter().find(|t| !seen.insert(t.id)) {
            return Err(ConfigError::DuplicateTag { id: tag.id });
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.config.protocol.response_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.config.tracking.stale_after_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.config.tracking.update_interval_ms)
    }

    /// Build the anchor registry in file order
    pub fn anchor_registry(&self) -> ConfigResult<AnchorRegistry> {
        let mut registry = AnchorRegistry::new();
        for anchor in &self.config.anchors {
            registry
                .add(Some(anchor.id), Vector3::from(anchor.pos), anchor.enable)
                .map_err(|_| ConfigError::DuplicateAnchor { id: anchor.id })?;
        }
        Ok(registry)
    }

    /// Build the tag registry; every tag gets a fresh filter
    pub fn tag_registry(&self) -> ConfigResult<TagRegistry> {
        let mut registry = TagRegistry::new(self.config.filter, self.config.tracking.path_history_limit);
        for tag in &self.config.tags {
            registry
                .add(Some(tag.id), tag.z, tag.enable)
                .map_err(|_| ConfigError::DuplicateTag { id: tag.id })?;
        }
        Ok(registry)
    }

    /// Replace the persisted anchor and tag lists with the registries' contents
    pub fn store_registries(&mut self, anchors: &AnchorRegistry, tags: &TagRegistry) {
        self.config.anchors = anchors
            .iter()
            .map(|a| AnchorConfig {
                id: a.id,
                pos: a.position.into(),
                enable: a.enabled,
            })
            .collect();
        self.config.tags = tags
            .iter()
            .map(|t| TagConfig {
                id: t.id,
                z: t.height,
                enable: t.enabled,
            })
            .collect();
        self.is_modified = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_FILE: &str = r#"{
        "anchors": [
            {"id": 65280, "pos": [0.0, 0.0, 1.53], "enable": true},
            {"id": 65281, "pos": [-0.35, 1.12], "enable": false},
            {"id": 65282, "pos": [2.57, 1.61, 2.21, 9.0]}
        ],
        "tags": [{"id": 0, "z": 1.0, "enable": true}, {"id": 1}]
    }"#;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("uwb-positioning-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SystemConfig::default();
        assert!(ConfigurationManager::validate(&config).is_ok());
        assert_eq!(config.protocol.response_timeout_ms, 100);
        assert_eq!(config.tracking.path_history_limit, 100);
        assert!(config.anchors.is_empty());
    }

    #[test]
    fn test_legacy_file_loads_with_defaults() {
        let config: SystemConfig = serde_json::from_str(LEGACY_FILE).unwrap();
        assert!(ConfigurationManager::validate(&config).is_ok());
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.filter, FilterParameters::default());

        assert_eq!(config.anchors[0].pos, [0.0, 0.0, 1.53]);
        assert_eq!(config.anchors[1].pos, [-0.35, 1.12, 0.0]);
        assert!(!config.anchors[1].enable);
        assert_eq!(config.anchors[2].pos, [2.57, 1.61, 2.21]);
        assert!(config.anchors[2].enable);

        assert_eq!(config.tags[1].z, 0.0);
        assert!(config.tags[1].enable);
    }

    #[test]
    fn test_non_numeric_position_entries_become_zero() {
        let anchor: AnchorConfig = serde_json::from_str(r#"{"id": 1, "pos": ["a", 2.0]}"#).unwrap();
        assert_eq!(anchor.pos, [0.0, 2.0, 0.0]);
        let anchor: AnchorConfig = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(anchor.pos, [0.0; 3]);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut config: SystemConfig = serde_json::from_str(LEGACY_FILE).unwrap();
        config.anchors[2].id = 65280;
        assert!(matches!(
            ConfigurationManager::validate(&config),
            Err(ConfigError::DuplicateAnchor { id: 65280 })
        ));

        let mut config: SystemConfig = serde_json::from_str(LEGACY_FILE).unwrap();
        config.tags[1].id = 0;
        assert!(matches!(
            ConfigurationManager::with_config(config),
            Err(ConfigError::DuplicateTag { id: 0 })
        ));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut config = SystemConfig::default();
        config.filter.dt = 0.0;
        assert!(matches!(
            ConfigurationManager::validate(&config),
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "filter.dt"
        ));

        let mut config = SystemConfig::default();
        config.filter.measurement_variance = -1.0;
        assert!(ConfigurationManager::validate(&config).is_err());

        let mut config = SystemConfig::default();
        config.serial.baud_rate = 0;
        assert!(ConfigurationManager::validate(&config).is_err());
    }

    #[test]
    fn test_registries_from_config() {
        let config: SystemConfig = serde_json::from_str(LEGACY_FILE).unwrap();
        let manager = ConfigurationManager::with_config(config).unwrap();

        let anchors = manager.anchor_registry().unwrap();
        assert_eq!(anchors.len(), 3);
        assert_eq!(anchors.active_ids(), vec![65280, 65282]);
        assert_eq!(anchors.get(0).unwrap().position, Vector3::new(0.0, 0.0, 1.53));

        let tags = manager.tag_registry().unwrap();
        assert_eq!(tags.ids(), vec![0, 1]);
        assert_eq!(tags.get(0).unwrap().height, 1.0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("round-trip");
        let config: SystemConfig = serde_json::from_str(LEGACY_FILE).unwrap();
        let mut manager = ConfigurationManager::with_config(config).unwrap();
        assert!(manager.is_modified());

        let mut anchors = manager.anchor_registry().unwrap();
        anchors.set_planar_position(1, 3.0, 4.0);
        let tags = manager.tag_registry().unwrap();
        manager.store_registries(&anchors, &tags);
        manager.save_to_file(&path).unwrap();
        assert!(!manager.is_modified());

        let loaded = ConfigurationManager::from_file(&path).unwrap();
        assert_eq!(loaded.file_path(), Some(path.as_path()));
        assert_eq!(loaded.config().anchors[1].pos, [3.0, 4.0, 0.0]);
        assert_eq!(loaded.config().tags, manager.config().tags);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_and_bad_json() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(
            manager.load_from_file(temp_path("does-not-exist")),
            Err(ConfigError::Io { .. })
        ));
        assert!(manager.save().is_err());

        let path = temp_path("bad-json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(manager.load_from_file(&path), Err(ConfigError::Serialization(_))));
        fs::remove_file(&path).unwrap();
    }
}
