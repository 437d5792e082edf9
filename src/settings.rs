//! Node-level configuration.

use crate::ids::Id;
use crate::params::Parameters;

use config::{Config, ConfigError, File};

use std::fmt;
use std::path::Path;

fn default_chain_data_dir() -> String {
    ".firn".to_string()
}

/// Settings loaded from layered configuration files: `Default.json` plus an
/// optional `{RUN_ENV}.json` overlay in the same directory.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Where the chain store and the bootstrap queue live.
    #[serde(default = "default_chain_data_dir")]
    pub chain_data_dir: String,
    /// Base58check ids of the bootstrap beacons.
    #[serde(default)]
    pub beacons: Vec<String>,
    /// Consensus parameters for this chain.
    #[serde(default)]
    pub consensus: Parameters,
}

#[derive(Clone, Debug, Deserialize)]
pub enum Env {
    Testing,
    Development,
    Production,
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Env::Testing => write!(f, "Testing"),
            Env::Production => write!(f, "Production"),
            Env::Development => write!(f, "Development"),
        }
    }
}

impl From<&str> for Env {
    fn from(env: &str) -> Self {
        match env {
            "Testing" => Env::Testing,
            "Production" => Env::Production,
            _ => Env::Development,
        }
    }
}

impl Settings {
    pub fn new(home_dir: &Path) -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_ENV").unwrap_or_else(|_| "Development".into());
        Config::builder()
            .set_default("env", env.clone())?
            .add_source(File::from(home_dir.join("Default.json")))
            .add_source(File::from(home_dir.join(format!("{}.json", env))).required(false))
            .build()?
            .try_deserialize()
    }

    /// Parses the configured beacon list.
    pub fn beacon_ids(&self) -> crate::Result<Vec<Id>> {
        let mut ids = vec![];
        for beacon in self.beacons.iter() {
            ids.push(beacon.parse()?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Default.json"), contents).unwrap();
        dir
    }

    #[actix_rt::test]
    async fn test_load_with_defaults() {
        let dir = write_config("firn-settings-defaults", r#"{ "beacons": [] }"#);
        let settings = Settings::new(&dir).unwrap();
        assert_eq!(settings.chain_data_dir, ".firn");
        assert!(settings.beacons.is_empty());
        assert_eq!(settings.consensus.k, Parameters::default().k);
        assert_eq!(settings.beacon_ids().unwrap().len(), 0);
    }

    #[actix_rt::test]
    async fn test_load_with_overrides() {
        let dir = write_config(
            "firn-settings-overrides",
            r#"{
                "chain_data_dir": "/var/firn",
                "consensus": {
                    "k": 10,
                    "alpha_preference": 6,
                    "alpha_confidence": 8,
                    "beta": 3,
                    "concurrent_polls": 2,
                    "optimal_processing": 8,
                    "max_outstanding_items": 128,
                    "max_item_processing_time_ms": 10000
                }
            }"#,
        );
        let settings = Settings::new(&dir).unwrap();
        assert_eq!(settings.chain_data_dir, "/var/firn");
        assert_eq!(settings.consensus.k, 10);
        assert_eq!(settings.consensus.beta, 3);
        assert_eq!(settings.consensus.verify(), Ok(()));
    }

    #[actix_rt::test]
    async fn test_bad_beacon_id() {
        let dir = write_config(
            "firn-settings-bad-beacon",
            r#"{ "beacons": ["definitely-not-base58check"] }"#,
        );
        let settings = Settings::new(&dir).unwrap();
        match settings.beacon_ids() {
            Err(crate::Error::TryFromStringError) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn test_missing_config_dir() {
        let dir = std::env::temp_dir().join("firn-settings-missing");
        let _ = std::fs::remove_dir_all(&dir);
        assert!(Settings::new(&dir).is_err());
    }
}
