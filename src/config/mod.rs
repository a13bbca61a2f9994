//! Run configuration, built once per run and passed by reference to
//! whichever components need it. AWS clients are constructed from this
//! struct instead of from ambient process state.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REPORT_DIR: &str = "test_reports";

/// Maximum iterations of the pre-delete polling loop in cleanup.
pub const DEFAULT_CLEANUP_WAIT_ITERATIONS: u32 = 60;

/// Pause between cleanup polling iterations.
pub const DEFAULT_CLEANUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub aws_profile: Option<String>,
    pub aws_region: Option<String>,

    /// Command used to start the MCP server under test.
    pub server_command: String,
    pub server_args: Vec<String>,

    pub report_dir: PathBuf,

    pub cleanup_wait_iterations: u32,
    pub cleanup_poll_interval: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            aws_profile: None,
            aws_region: None,
            server_command: "python".to_string(),
            server_args: vec!["server.py".to_string()],
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            cleanup_wait_iterations: DEFAULT_CLEANUP_WAIT_ITERATIONS,
            cleanup_poll_interval: DEFAULT_CLEANUP_POLL_INTERVAL,
        }
    }
}

impl HarnessConfig {
    /// Builds a config from environment variables.
    ///
    /// Supported variables:
    /// - `AWS_PROFILE`, `AWS_REGION`
    /// - `HARNESS_SERVER_COMMAND`: executable for the MCP server
    /// - `HARNESS_SERVER_ARGS`: whitespace-separated arguments
    /// - `HARNESS_REPORT_DIR`: where reports are written
    /// - `HARNESS_CLEANUP_WAIT_ITERATIONS`: cleanup polling bound
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.aws_profile = std::env::var("AWS_PROFILE").ok();
        config.aws_region = std::env::var("AWS_REGION").ok();

        if let Ok(val) = std::env::var("HARNESS_SERVER_COMMAND") {
            config.server_command = val;
        }
        if let Ok(val) = std::env::var("HARNESS_SERVER_ARGS") {
            config.server_args = val.split_whitespace().map(String::from).collect();
        }
        if let Ok(val) = std::env::var("HARNESS_REPORT_DIR") {
            config.report_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("HARNESS_CLEANUP_WAIT_ITERATIONS") {
            if let Ok(n) = val.parse() {
                config.cleanup_wait_iterations = n;
            }
        }

        config
    }
}
