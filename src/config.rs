//! Panel configuration using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. The built-in installation table (`config/scrapers.toml`, compiled in)
//! 2. An optional TOML file given on the command line
//! 3. Environment variables prefixed with `SCRAPER_PANEL_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SCRAPER_PANEL_APPLICATION__LOG_LEVEL=debug
//! SCRAPER_PANEL_CONTROLLER__TIMEOUT_MS=3000
//! SCRAPER_PANEL_BACKEND__SPEED_MM_PER_SEC=0.5
//! ```
//!
//! A file that defines `[[installations]]` replaces the built-in table rather
//! than extending it.
//!
//! # Example
//!
//! ```no_run
//! use scraper_panel::config::PanelConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::load(None)?;
//!     let scraper = config.installation("lt02-scrh")?;
//!     println!("{} -> {}", scraper.id, scraper.first_motor);
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::device::{AttributeRef, DeviceName};
use crate::error::{AppResult, PanelError};
use crate::logging;

/// Installation table shipped with the panel.
pub const BUILTIN_CONFIG: &str = include_str!("../config/scrapers.toml");

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SCRAPER_PANEL_";

/// Top-level panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Motor move controller settings
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Simulated middleware settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Scraper installations
    #[serde(default)]
    pub installations: Vec<InstallationConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging filter (trace, debug, info, warn, error or a full directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Motor move controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Per-call timeout in milliseconds; unset means wait indefinitely
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ControllerConfig {
    /// Timeout applied to every remote call, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Simulated middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Jaw motion speed in mm/s
    #[serde(default = "default_speed")]
    pub speed_mm_per_sec: f64,
    /// Position every jaw starts from
    #[serde(default)]
    pub initial_position: f64,
    /// Value served by extra readouts
    #[serde(default)]
    pub extra_value: f64,
    /// Devices whose every call fails
    #[serde(default)]
    pub faulty_devices: Vec<DeviceName>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            speed_mm_per_sec: default_speed(),
            initial_position: 0.0,
            extra_value: 0.0,
            faulty_devices: Vec::new(),
        }
    }
}

/// One scraper installation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationConfig {
    /// Selection key, e.g. `LT02-SCRH`
    pub id: String,
    /// Display name; may span two lines
    pub title: String,
    /// Facility tag shown as tooltip
    #[serde(default)]
    pub tooltip: String,
    /// First jaw motor
    pub first_motor: DeviceName,
    /// Second jaw motor
    pub second_motor: DeviceName,
    /// Gap pseudo-motor
    pub gap: DeviceName,
    /// Offset pseudo-motor
    pub offset: DeviceName,
    /// Display labels of the four axes
    #[serde(default)]
    pub labels: AxisLabels,
    /// Extra read-only attributes shown with the axes
    #[serde(default)]
    pub extra_models: Vec<AttributeRef>,
}

impl InstallationConfig {
    /// The four axis devices in panel order.
    pub fn axis_devices(&self) -> [&DeviceName; 4] {
        [&self.first_motor, &self.second_motor, &self.gap, &self.offset]
    }
}

/// Display labels of a scraper's axes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisLabels {
    /// First jaw
    #[serde(default = "default_first_label")]
    pub first: String,
    /// Second jaw
    #[serde(default = "default_second_label")]
    pub second: String,
    /// Gap
    #[serde(default = "default_gap_label")]
    pub gap: String,
    /// Offset
    #[serde(default = "default_offset_label")]
    pub offset: String,
}

impl Default for AxisLabels {
    fn default() -> Self {
        Self {
            first: default_first_label(),
            second: default_second_label(),
            gap: default_gap_label(),
            offset: default_offset_label(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "Scraper Panel".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_speed() -> f64 {
    1.0
}

fn default_first_label() -> String {
    "First Jaw".to_string()
}

fn default_second_label() -> String {
    "Second Jaw".to_string()
}

fn default_gap_label() -> String {
    "Gap".to_string()
}

fn default_offset_label() -> String {
    "Offset".to_string()
}

// ============================================================================
// Loading and validation
// ============================================================================

impl PanelConfig {
    /// Load the built-in table, an optional file and environment overrides,
    /// then validate.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::new().merge(Toml::string(BUILTIN_CONFIG));
        if let Some(path) = path {
            if !path.exists() {
                return Err(PanelError::Configuration(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in table alone, without file or environment overrides.
    pub fn builtin() -> AppResult<Self> {
        Self::from_toml_str(BUILTIN_CONFIG)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: Self = Figment::from(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints that parsing cannot.
    pub fn validate(&self) -> AppResult<()> {
        logging::filter_for(&self.application.log_level)?;

        if self.controller.timeout_ms == Some(0) {
            return Err(PanelError::Configuration(
                "controller.timeout_ms must be greater than zero".into(),
            ));
        }
        let speed = self.backend.speed_mm_per_sec;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PanelError::Configuration(format!(
                "backend.speed_mm_per_sec must be positive, got {speed}"
            )));
        }

        if self.installations.is_empty() {
            return Err(PanelError::Configuration(
                "no scraper installations configured".into(),
            ));
        }

        let mut ids = HashSet::new();
        for installation in &self.installations {
            let id = installation.id.trim();
            if id.is_empty() {
                return Err(PanelError::Configuration(
                    "installation id must not be empty".into(),
                ));
            }
            if !ids.insert(id.to_ascii_uppercase()) {
                return Err(PanelError::Configuration(format!(
                    "duplicate installation id '{id}'"
                )));
            }

            let mut devices = HashSet::new();
            for device in installation.axis_devices() {
                if !devices.insert(device) {
                    return Err(PanelError::Configuration(format!(
                        "installation '{id}' uses device {device} for two axes"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up an installation by id, ignoring case.
    pub fn installation(&self, id: &str) -> AppResult<&InstallationConfig> {
        let id = id.trim();
        self.installations
            .iter()
            .find(|installation| installation.id.eq_ignore_ascii_case(id))
            .ok_or_else(|| PanelError::UnknownScraper {
                id: id.to_string(),
                valid: self.installation_ids(),
            })
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PanelError::Configuration(format!("cannot render configuration: {e}")))
    }

    /// Ids of every configured installation, in table order.
    pub fn installation_ids(&self) -> Vec<String> {
        self.installations
            .iter()
            .map(|installation| installation.id.clone())
            .collect()
    }
}
