//! Autofocus reports
//!
//! Every finished search is written as one JSON document holding the search
//! settings, the result with its full sample history, and what is known about
//! the camera and lens.

use crate::errors::LensAfError;
use crate::focus::{ResultSink, SearchConfiguration, SearchResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name pattern, one report per second
pub const REPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d--%H-%M-%S";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub lens_name: Option<String>,
    pub camera_name: Option<String>,
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofocusReport {
    pub settings: SearchConfiguration,
    pub result: SearchResult,
    pub camera_info: CameraInfo,
}

impl AutofocusReport {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LensAfError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Default report directory under the system temp dir
pub fn default_report_directory() -> PathBuf {
    std::env::temp_dir().join("AutoFocus").join("Lens AF")
}

/// Writes each result to `<directory>/<timestamp>.json`
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    directory: PathBuf,
    camera_info: CameraInfo,
    last_path: Option<PathBuf>,
}

impl JsonReportSink {
    pub fn new<P: Into<PathBuf>>(directory: P, camera_info: CameraInfo) -> Self {
        Self {
            directory: directory.into(),
            camera_info,
            last_path: None,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the most recent report written by this sink
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format(REPORT_TIMESTAMP_FORMAT).to_string();
        let mut path = self.directory.join(format!("{}.json", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = self.directory.join(format!("{}-{}.json", stamp, suffix));
            suffix += 1;
        }
        path
    }
}

impl ResultSink for JsonReportSink {
    fn write(
        &mut self,
        config: &SearchConfiguration,
        result: &SearchResult,
    ) -> Result<(), LensAfError> {
        fs::create_dir_all(&self.directory).map_err(|e| {
            LensAfError::Report(format!(
                "Failed to create report directory {:?}: {}",
                self.directory, e
            ))
        })?;

        let report = AutofocusReport {
            settings: config.clone(),
            result: result.clone(),
            camera_info: self.camera_info.clone(),
        };
        let json = serde_json::to_string_pretty(&report)?;

        let path = self.next_path();
        fs::write(&path, json).map_err(|e| {
            LensAfError::Report(format!("Failed to write report {:?}: {}", path, e))
        })?;

        log::info!("Wrote autofocus report to {:?}", path);
        self.last_path = Some(path);
        Ok(())
    }
}

/// Sink that only logs, for runs where no report is wanted
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlySink;

impl ResultSink for LogOnlySink {
    fn write(
        &mut self,
        _config: &SearchConfiguration,
        result: &SearchResult,
    ) -> Result<(), LensAfError> {
        log::info!(
            "Autofocus {} with {} samples",
            if result.succeeded { "succeeded" } else { "failed" },
            result.samples.len()
        );
        Ok(())
    }
}
