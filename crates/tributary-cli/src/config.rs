//! Demo configuration
//!
//! Every field has a default, so an empty or partial TOML file is valid.
//! Command-line flags are applied on top of whatever the file provides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tributary_core::stream::MergePolicy;
use tributary_core::ControlOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub compose: ComposeConfig,
    pub fan_in: FanInConfig,
    pub controllable: ControllableConfig,
    pub timeout: TimeoutConfig,
}

impl DemoConfig {
    /// Load from `path`, or use the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// filter -> map -> take pipeline over a paced array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    pub count: u32,
    pub delay_ms: u64,
    pub take: usize,
    /// Items divisible by this fail in the fallible stage
    pub fail_every: u32,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            count: 20,
            delay_ms: 50,
            take: 5,
            fail_every: 7,
        }
    }
}

/// Several paced sources merged into one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanInConfig {
    pub policy: MergePolicy,
    /// One source per entry, each entry being that source's per-item delay
    pub source_delays_ms: Vec<u64>,
    pub items_per_source: u32,
    pub timeout_ms: u64,
}

impl Default for FanInConfig {
    fn default() -> Self {
        Self {
            policy: MergePolicy::Race,
            source_delays_ms: vec![100, 150, 250],
            items_per_source: 3,
            timeout_ms: 1000,
        }
    }
}

/// A controllable session driven by a scripted controller task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllableConfig {
    pub items: Vec<String>,
    pub chunk_size: usize,
    pub delay_ms: u64,
    /// Whether the controller task runs the pause/resume/stop timings below
    pub scripted: bool,
    pub pause_after_ms: Option<u64>,
    pub resume_after_ms: Option<u64>,
    pub stop_after_ms: Option<u64>,
    pub restart: bool,
}

impl Default for ControllableConfig {
    fn default() -> Self {
        Self {
            items: ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
            chunk_size: 1,
            delay_ms: 100,
            scripted: true,
            pause_after_ms: Some(250),
            resume_after_ms: Some(600),
            stop_after_ms: None,
            restart: false,
        }
    }
}

impl ControllableConfig {
    pub fn options(&self) -> ControlOptions {
        ControlOptions::default()
            .with_chunk_size(self.chunk_size)
            .with_delay(Duration::from_millis(self.delay_ms))
    }
}

/// A source slower than its deadline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout_ms: u64,
    pub delay_ms: u64,
    pub count: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300,
            delay_ms: 100,
            count: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = DemoConfig::load(None).unwrap();
        assert_eq!(config, DemoConfig::default());
        assert_eq!(config.controllable.delay_ms, 100);
        assert_eq!(config.fan_in.policy, MergePolicy::Race);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[fan_in]
policy = "round_robin"
source_delays_ms = [10, 20]

[controllable]
chunk_size = 2
stop_after_ms = 400
"#
        )
        .unwrap();

        let config = DemoConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.fan_in.policy, MergePolicy::RoundRobin);
        assert_eq!(config.fan_in.source_delays_ms, vec![10, 20]);
        assert_eq!(config.fan_in.items_per_source, 3);
        assert_eq!(config.controllable.chunk_size, 2);
        assert_eq!(config.controllable.stop_after_ms, Some(400));
        assert_eq!(config.controllable.items.len(), 5);
        assert_eq!(config.compose, ComposeConfig::default());
    }

    #[test]
    fn test_script_can_be_disabled_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[controllable]\nscripted = false").unwrap();

        let config = DemoConfig::load(Some(file.path())).unwrap();
        assert!(!config.controllable.scripted);
        assert_eq!(config.controllable.pause_after_ms, Some(250));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[compose]\ncount = \"many\"").unwrap();

        let err = DemoConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DemoConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_control_options_from_config() {
        let config = ControllableConfig {
            chunk_size: 3,
            delay_ms: 20,
            ..Default::default()
        };
        let options = config.options();
        assert_eq!(options.chunk_size, 3);
        assert_eq!(options.delay, Duration::from_millis(20));
    }
}
