//! Configuration management for lensaf
//!
//! Provides configuration loading, saving and validation for autofocus
//! settings, step profiles, lens timing, report storage and stored lens focus
//! positions.

use crate::errors::LensAfError;
use crate::focus::{
    select_step_size, CustomProfiles, FailurePolicy, MetricKind, SearchConfiguration,
    SearchStrategy,
};
use crate::lens::{DriveTiming, LensCatalog, LensFocusProfile};
use crate::metrics::DEFAULT_SENSITIVITY;
use crate::report::default_report_directory;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `LENSAF__AUTOFOCUS__MAX_ITERATIONS=12`
pub const ENV_PREFIX: &str = "LENSAF";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensAfConfig {
    pub autofocus: AutofocusConfig,
    pub step: StepConfig,
    pub lens: LensConfig,
    pub report: ReportConfig,
    pub lenses: Vec<LensFocusProfile>,
}

/// Search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusConfig {
    /// Exposure time per frame in seconds
    pub exposure_time: f64,
    pub stretch_factor: f64,
    pub black_clipping: f64,
    /// Iteration cap (bracket) or sample count (backtrack)
    pub max_iterations: u32,
    pub metric: MetricKind,
    pub strategy: SearchStrategy,
    /// Steps toward near before the first sample
    pub initial_offset: u32,
    pub probe_direction: bool,
    pub failure_policy: FailurePolicy,
    pub max_sample_retries: u32,
    /// Star detection threshold in noise sigmas
    pub star_sensitivity: f64,
}

/// Step profile selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// 0-7 built-in profiles, 8-9 custom
    pub selected_index: u32,
    pub custom: CustomProfiles,
}

/// Lens timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    /// Wait after each search step in milliseconds
    pub settle_delay_ms: u64,
    pub calibration_moves: u32,
    pub calibration_settle_ms: u64,
    /// Wait after each command of a direct move in milliseconds
    pub command_delay_ms: u64,
    /// Focuser position assigned after calibration
    pub stop_position: i64,
}

/// Report storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    /// Defaults to the system temp dir when unset
    pub directory: Option<PathBuf>,
}

impl Default for AutofocusConfig {
    fn default() -> Self {
        let search = SearchConfiguration::default();
        Self {
            exposure_time: search.exposure_time,
            stretch_factor: search.stretch_factor,
            black_clipping: search.black_clipping,
            max_iterations: search.max_iterations,
            metric: search.metric,
            strategy: search.strategy,
            initial_offset: search.initial_offset,
            probe_direction: search.probe_direction,
            failure_policy: search.failure_policy,
            max_sample_retries: search.max_sample_retries,
            star_sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            selected_index: 0,
            custom: CustomProfiles::default(),
        }
    }
}

impl Default for LensConfig {
    fn default() -> Self {
        let timing = DriveTiming::default();
        Self {
            settle_delay_ms: timing.settle_delay.as_millis() as u64,
            calibration_moves: timing.calibration_moves,
            calibration_settle_ms: timing.calibration_settle.as_millis() as u64,
            command_delay_ms: timing.command_delay.as_millis() as u64,
            stop_position: 0,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl LensAfConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, LensAfError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            LensAfError::ConfigFile(format!("Failed to read config file: {}", e))
        })?;

        let config: LensAfConfig = toml::from_str(&contents).map_err(|e| {
            LensAfError::ConfigFile(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load a TOML file (optional) with `LENSAF__SECTION__KEY` environment
    /// overrides on top
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, LensAfError> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LensAfConfig = settings.try_deserialize()?;
        log::debug!("Loaded layered configuration from {:?}", path.as_ref());
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LensAfError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LensAfError::ConfigFile(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            LensAfError::ConfigFile(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            LensAfError::ConfigFile(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("lensaf.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), LensAfError> {
        self.search_configuration()?.validate()?;

        if !self.autofocus.star_sensitivity.is_finite() || self.autofocus.star_sensitivity <= 0.0 {
            return Err(LensAfError::InvalidConfig(
                "star_sensitivity must be positive".to_string(),
            ));
        }
        if self.lens.calibration_moves == 0 {
            return Err(LensAfError::InvalidConfig(
                "calibration_moves must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Parameters for one search, with the selected step profile resolved
    pub fn search_configuration(&self) -> Result<SearchConfiguration, LensAfError> {
        let af = &self.autofocus;
        Ok(SearchConfiguration {
            exposure_time: af.exposure_time,
            stretch_factor: af.stretch_factor,
            black_clipping: af.black_clipping,
            max_iterations: af.max_iterations,
            metric: af.metric,
            strategy: af.strategy,
            step: select_step_size(self.step.selected_index, &self.step.custom)?,
            initial_offset: af.initial_offset,
            probe_direction: af.probe_direction,
            failure_policy: af.failure_policy,
            max_sample_retries: af.max_sample_retries,
        })
    }

    pub fn drive_timing(&self) -> DriveTiming {
        DriveTiming {
            settle_delay: Duration::from_millis(self.lens.settle_delay_ms),
            calibration_moves: self.lens.calibration_moves,
            calibration_settle: Duration::from_millis(self.lens.calibration_settle_ms),
            command_delay: Duration::from_millis(self.lens.command_delay_ms),
        }
    }

    pub fn report_directory(&self) -> PathBuf {
        self.report
            .directory
            .clone()
            .unwrap_or_else(default_report_directory)
    }

    pub fn lens_catalog(&self) -> LensCatalog {
        LensCatalog::new(self.lenses.clone())
    }
}
