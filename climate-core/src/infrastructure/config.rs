//! Service configuration: TOML file with environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::foundation::constants::{
    DEFAULT_BLOCK_RANGE, DEFAULT_BLOCK_START, DEFAULT_FEE, DEFAULT_LOOKBACK_DEPTH, DEFAULT_MIN_DEPTH,
};
use crate::foundation::error::{ClimateError, ConfigurationError};

/// Which surface the service exposes. A registry deployment holds the root
/// key; a client deployment only ever produces partial detokenization
/// bundles; an explorer just scans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Dev,
    Registry,
    Client,
    Explorer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub block_start: u64,
    pub block_range: u64,
    pub min_depth: u64,
    pub lookback_depth: u64,
    pub scan_interval_secs: u64,
    pub tip_interval_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            block_start: DEFAULT_BLOCK_START,
            block_range: DEFAULT_BLOCK_RANGE,
            min_depth: DEFAULT_MIN_DEPTH,
            lookback_depth: DEFAULT_LOOKBACK_DEPTH,
            scan_interval_secs: 60,
            tip_interval_secs: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: ExecutionMode,
    pub full_node_endpoint: String,
    pub wallet_endpoint: String,
    pub cadt_api_url: String,
    pub cadt_api_key: Option<String>,
    /// Scan units from every organization, not just the home one.
    pub cadt_scan_all: bool,
    pub default_fee: u64,
    pub scanner: ScannerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Dev,
            full_node_endpoint: "https://localhost:8555".into(),
            wallet_endpoint: "https://localhost:9256".into(),
            cadt_api_url: "http://localhost:31310".into(),
            cadt_api_key: None,
            cadt_scan_all: false,
            default_fee: DEFAULT_FEE,
            scanner: ScannerSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ClimateError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigurationError::Invalid(format!("cannot read {}: {err}", path.display())))?;
        let mut settings: Settings = toml::from_str(&text)
            .map_err(|err| ConfigurationError::Invalid(format!("cannot parse {}: {err}", path.display())))?;
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> Result<Self, ClimateError> {
        let mut settings = Settings::default();
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("CLIMATE_MODE") {
            match value.to_ascii_lowercase().as_str() {
                "dev" => self.mode = ExecutionMode::Dev,
                "registry" => self.mode = ExecutionMode::Registry,
                "client" => self.mode = ExecutionMode::Client,
                "explorer" => self.mode = ExecutionMode::Explorer,
                _ => {}
            }
        }
        if let Ok(value) = std::env::var("CLIMATE_FULL_NODE_ENDPOINT") {
            self.full_node_endpoint = value;
        }
        if let Ok(value) = std::env::var("CLIMATE_WALLET_ENDPOINT") {
            self.wallet_endpoint = value;
        }
        if let Ok(value) = std::env::var("CLIMATE_CADT_API_URL") {
            self.cadt_api_url = value;
        }
        if let Ok(value) = std::env::var("CLIMATE_CADT_API_KEY") {
            self.cadt_api_key = Some(value);
        }
    }

    pub fn validate(&self) -> Result<(), ClimateError> {
        if self.scanner.block_range == 0 {
            return Err(ConfigurationError::Invalid("scanner.block_range must be at least 1".into()).into());
        }
        if self.scanner.min_depth == 0 {
            return Err(ConfigurationError::Invalid("scanner.min_depth must be at least 1".into()).into());
        }
        if self.full_node_endpoint.is_empty() {
            return Err(ConfigurationError::Invalid("full_node_endpoint must not be empty".into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mode = \"registry\"\ncadt_api_url = \"http://cadt:31310\"\n\n[scanner]\nblock_start = 42\n"
        )
        .unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.mode, ExecutionMode::Registry);
        assert_eq!(settings.cadt_api_url, "http://cadt:31310");
        assert_eq!(settings.scanner.block_start, 42);
        // Everything else keeps its default.
        assert_eq!(settings.scanner.block_range, DEFAULT_BLOCK_RANGE);
        assert_eq!(settings.default_fee, DEFAULT_FEE);
    }

    #[test]
    fn zero_block_range_is_rejected() {
        let mut settings = Settings::default();
        settings.scanner.block_range = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Settings::load(Path::new("/nonexistent/climate.toml")).is_err());
    }
}
