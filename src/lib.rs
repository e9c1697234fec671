//! lensaf: live-view autofocus for manual-focus lenses
//!
//! This crate focuses a lens that can only be moved by relative EVF drive
//! commands. It steps the lens, measures each live-view frame, and settles on
//! the position with the best focus metric.
//!
//! # Features
//! - Two search strategies: bracket-and-stop, or sweep-then-backtrack
//! - Star half-flux radius and frame contrast metrics
//! - Eight built-in step profiles plus two custom ones
//! - Cooperative cancellation from any thread
//! - JSON reports of every run
//! - Time and exposure-count refocus triggers
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! lensaf = "0.3"
//! ```
//!
//! Then implement [`lens::LensBackend`] and [`focus::FrameSampler`] for your
//! camera and hand them to an [`AutofocusRunner`]:
//! ```rust,ignore
//! use lensaf::lens::EvfStepDriver;
//! use lensaf::{AutofocusRunner, JsonReportSink, LensAfConfig};
//!
//! let config = LensAfConfig::load_or_default();
//! let driver = EvfStepDriver::new(my_backend, config.drive_timing());
//! let sink = JsonReportSink::new(config.report_directory(), camera_info);
//! let result = AutofocusRunner::new()
//!     .run(config.search_configuration()?, driver, my_sampler, sink)
//!     .await?;
//! ```
pub mod config;
pub mod errors;
pub mod focus;
pub mod lens;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod trigger;

// Testing utilities - scripted collaborators and a simulated lens
pub mod testing;

// Re-exports for convenience
pub use config::LensAfConfig;
pub use errors::LensAfError;
pub use focus::{
    run_search, CancellationToken, FocusDirection, FocusSample, MetricKind, SearchConfiguration,
    SearchResult, SearchStrategy, StepSize,
};
pub use report::{AutofocusReport, CameraInfo, JsonReportSink};
pub use runner::{AutofocusRunner, RunState};
pub use trigger::AutofocusTrigger;

/// Initialize logging for the autofocus system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "lensaf=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        strategies: vec![
            SearchStrategy::CalibrateThenBracket,
            SearchStrategy::CalibrateThenSampleAllThenBacktrack,
        ],
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub strategies: Vec<SearchStrategy>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "lensaf");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.strategies.len(), 2);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        assert!(std::env::var("RUST_LOG").is_ok());
    }
}
