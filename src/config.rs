//! Harvester configuration file.
//!
//! The configuration is a JSON document with five sections:
//! - `source`: remote endpoints and the credentials cache
//! - `client`: local repository and HTTP client settings
//! - `timing`: scan interval and politeness waits
//! - `stations` / `station_groups`: known source ids and named groups
//!
//! [`HarvesterConfig::default`] describes the SMN radar network and is what
//! `radar-harvester init` writes to disk.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::harvest::HarvestError;
use crate::timing::parse_duration;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "radar-harvester.json";

/// Group used when no ids are requested.
pub const DEFAULT_GROUP: &str = "radars";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    pub source: SourceSection,
    pub client: ClientSection,
    pub timing: TimingSection,
    pub stations: BTreeMap<String, Station>,
    #[serde(default)]
    pub station_groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Site root, sent as referer
    pub base_url: String,
    /// Page embedding the access token
    pub radar_url: String,
    /// Inventory endpoint, the station id is appended
    pub inventory_url: String,
    /// Image repository, the artifact id is appended
    pub repository_url: String,
    /// Where the last access token is cached
    pub credentials_path: PathBuf,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    pub repository_path: PathBuf,
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSection {
    /// ISO-8601 duration between scan cycles
    pub scan_interval: String,
    pub wait_for_next_request_ms: u64,
    pub wait_for_next_authorization_ms: u64,
    #[serde(default)]
    pub max_consecutive_renewals: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl Station {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lat: None,
            lon: None,
        }
    }
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        let radars = ["RMA3_240", "RMA4_240", "RMA5_240", "RMA8_240"];
        let mosaics = ["COMP_ARG", "COMP_NOR", "COMP_CEN"];

        let stations = [
            ("RMA3_240", "Las Lomitas (Formosa)"),
            ("RMA4_240", "Resistencia (Chaco)"),
            ("RMA5_240", "Bernardo de Irigoyen (Misiones)"),
            ("RMA8_240", "Mercedes (Corrientes)"),
            ("COMP_ARG", "National mosaic"),
            ("COMP_NOR", "Northern mosaic"),
            ("COMP_CEN", "Central mosaic"),
        ]
        .into_iter()
        .map(|(id, name)| (id.to_string(), Station::named(name)))
        .collect();

        let owned = |ids: &[&str]| ids.iter().map(|id| id.to_string()).collect::<Vec<_>>();
        let station_groups = BTreeMap::from([
            ("radars".to_string(), owned(&radars)),
            ("mosaics".to_string(), owned(&mosaics)),
            ("all".to_string(), owned(&[&radars[..], &mosaics[..]].concat())),
        ]);

        Self {
            source: SourceSection {
                base_url: "https://www.smn.gob.ar/".to_string(),
                radar_url: "https://www.smn.gob.ar/radar".to_string(),
                inventory_url: "https://ws1.smn.gob.ar/v1/images/radar/".to_string(),
                repository_url: "https://estaticos.smn.gob.ar/vmsr/radar/".to_string(),
                credentials_path: PathBuf::from("credentials.smn.json"),
                api_key: None,
            },
            client: ClientSection {
                repository_path: PathBuf::from("radar"),
                request_timeout_secs: 30,
                user_agent: None,
            },
            timing: TimingSection {
                scan_interval: "PT2M".to_string(),
                wait_for_next_request_ms: 300,
                wait_for_next_authorization_ms: 1000,
                max_consecutive_renewals: None,
            },
            stations,
            station_groups,
        }
    }
}

impl HarvesterConfig {
    /// Reads and validates the configuration at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HarvestError> {
        let path = path.as_ref();
        info!(config_path = %path.display(), "Loading configuration");

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HarvestError::Config(format!(
                    "{} not found, run `radar-harvester init` to create it",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(HarvestError::Config(format!("{}: {e}", path.display())));
            }
        };

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;

        debug!(stations = config.stations.len(), "Configuration loaded");
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), HarvestError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        let urls = [
            ("source.base_url", &self.source.base_url),
            ("source.radar_url", &self.source.radar_url),
            ("source.inventory_url", &self.source.inventory_url),
            ("source.repository_url", &self.source.repository_url),
        ];
        for (key, value) in urls {
            if value.trim().is_empty() {
                return Err(HarvestError::Config(format!("{key} must not be empty")));
            }
        }

        if self.scan_interval()? <= chrono::Duration::zero() {
            return Err(HarvestError::Config(
                "timing.scan_interval must be longer than zero".to_string(),
            ));
        }

        if self.stations.is_empty() {
            return Err(HarvestError::Config("no stations defined".to_string()));
        }

        for (group, members) in &self.station_groups {
            if let Some(unknown) = members.iter().find(|id| !self.stations.contains_key(*id)) {
                return Err(HarvestError::Config(format!(
                    "group '{group}' refers to unknown station '{unknown}'"
                )));
            }
        }

        Ok(())
    }

    /// Cycle period of the scan loop.
    pub fn scan_interval(&self) -> Result<chrono::Duration, HarvestError> {
        parse_duration(&self.timing.scan_interval)
            .map_err(|e| HarvestError::Config(format!("timing.scan_interval: {e}")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    /// Expands group names into station ids.
    ///
    /// An empty request resolves to the `radars` group.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] for an id that is neither a station
    /// nor a group.
    pub fn resolve_ids(&self, requested: &[String]) -> Result<BTreeSet<String>, HarvestError> {
        let defaults = [DEFAULT_GROUP.to_string()];
        let requested = if requested.is_empty() {
            &defaults[..]
        } else {
            requested
        };

        let mut ids = BTreeSet::new();
        for id in requested {
            if self.stations.contains_key(id) {
                ids.insert(id.clone());
            } else if let Some(members) = self.station_groups.get(id) {
                ids.extend(members.iter().cloned());
            } else {
                return Err(HarvestError::Config(format!(
                    "'{id}' is neither a station nor a station group"
                )));
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HarvesterConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scan_interval().unwrap(), chrono::Duration::minutes(2));
        assert_eq!(config.station_groups["all"].len(), 7);
    }

    #[test]
    fn test_resolve_ids_defaults_to_radars() {
        let config = HarvesterConfig::default();
        let ids = config.resolve_ids(&[]).unwrap();
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            strings(&["RMA3_240", "RMA4_240", "RMA5_240", "RMA8_240"])
        );
    }

    #[test]
    fn test_resolve_ids_mixes_groups_and_stations() {
        let config = HarvesterConfig::default();
        let ids = config
            .resolve_ids(&strings(&["mosaics", "RMA4_240", "COMP_ARG"]))
            .unwrap();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains("RMA4_240"));
        assert!(ids.contains("COMP_CEN"));
    }

    #[test]
    fn test_resolve_ids_rejects_unknown() {
        let config = HarvesterConfig::default();
        let result = config.resolve_ids(&strings(&["RMA99"]));
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_dangling_group_member() {
        let mut config = HarvesterConfig::default();
        config
            .station_groups
            .insert("extra".to_string(), strings(&["NOPE"]));
        assert!(matches!(config.validate(), Err(HarvestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_interval() {
        let mut config = HarvesterConfig::default();
        config.timing.scan_interval = "PT0S".to_string();
        assert!(config.validate().is_err());

        config.timing.scan_interval = "two minutes".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = HarvesterConfig::default();
        config.timing.max_consecutive_renewals = Some(3);
        config.save(&path).await.unwrap();

        let loaded = HarvesterConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_missing_file_suggests_init() {
        let dir = TempDir::new().unwrap();
        let result = HarvesterConfig::load(dir.path().join("absent.json")).await;

        match result {
            Err(HarvestError::Config(message)) => assert!(message.contains("init")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = HarvesterConfig::load(&path).await;
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }
}
