//! Configuration model and layered loading, mirroring the teacher's
//! `ScannerConfig::load_from_file` / `parse_from_str` fallback chain: try TOML, then JSON, and let
//! later files override earlier ones field by field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SurveilError};

/// One `[[watch]]` group: a root to watch plus the shell body to run on quiescent files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchGroup {
    /// Absolute path of the root to watch.
    pub path: PathBuf,
    /// Shell body appended after the `FILE=`/`REASON=` preamble. Empty means "preamble only".
    #[serde(default)]
    pub exec: String,
    /// Per-root override of the global idle window.
    pub idle_secs: Option<u64>,
    /// Per-root override of the global rescan interval.
    pub rescan_secs: Option<u64>,
    /// Per-root override of the global retry cap.
    pub retry_cap: Option<u32>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Roots to watch.
    pub watch: Vec<WatchGroup>,
    /// Default idle window (seconds) before a quiescent file is actioned.
    pub idle_secs: u64,
    /// Default periodic rescan interval (seconds); clamped to a 1s minimum.
    pub rescan_secs: u64,
    /// Default maximum retry attempts before a node is abandoned.
    pub retry_cap: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch: Vec::new(),
            idle_secs: 5,
            rescan_secs: 300,
            retry_cap: 5,
        }
    }
}

impl Config {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_secs.max(1))
    }

    /// Parse a single file's contents, dispatching on extension the way the teacher's scanner
    /// config does, falling back to "try TOML then JSON" when the extension is ambiguous.
    pub fn parse_from_str(contents: &str, origin: &str, extension: Option<&str>) -> Result<Self> {
        match extension {
            Some("json") => serde_json::from_str(contents)
                .map_err(|e| SurveilError::Config(format!("invalid config {origin}: {e}"))),
            Some("toml") | Some("tml") => toml::from_str(contents)
                .map_err(|e| SurveilError::Config(format!("invalid config {origin}: {e}"))),
            _ => toml::from_str(contents).or_else(|toml_err| {
                serde_json::from_str(contents).map_err(|json_err| {
                    SurveilError::Config(format!(
                        "failed to parse config {origin}: toml error: {toml_err}; json error: {json_err}"
                    ))
                })
            }),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str());
        Self::parse_from_str(&contents, &path.display().to_string(), ext)
    }

    /// Merge `other` into `self`: watch groups are appended, scalar defaults are overridden only
    /// when `other` differs from [`Config::default`]. Matches the "later files override earlier"
    /// contract for multiple `-c` flags and the `/etc` -> `$HOME` -> `-c` load order.
    pub fn merge(mut self, other: Config) -> Self {
        let defaults = Config::default();
        if other.idle_secs != defaults.idle_secs {
            self.idle_secs = other.idle_secs;
        }
        if other.rescan_secs != defaults.rescan_secs {
            self.rescan_secs = other.rescan_secs;
        }
        if other.retry_cap != defaults.retry_cap {
            self.retry_cap = other.retry_cap;
        }
        self.watch.extend(other.watch);
        self
    }

    /// Validate that every watch group names an absolute, existing directory.
    pub fn validate(&self) -> Result<()> {
        for group in &self.watch {
            if group.path.as_os_str().is_empty() {
                return Err(SurveilError::Config("watch group missing `path`".into()));
            }
            if !group.path.is_absolute() {
                return Err(SurveilError::Config(format!(
                    "watch path {} must be absolute",
                    group.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Load and merge the standard configuration chain: `/etc/surveild.conf`,
    /// `$HOME/.config/surveild.conf`, then the given `-c` files in order.
    pub fn load_chain(extra_files: &[PathBuf]) -> Result<Self> {
        let mut config = Config::default();

        let mut candidates = Vec::new();
        candidates.push(PathBuf::from("/etc/surveild.conf"));
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".config/surveild.conf"));
        }
        candidates.extend_from_slice(extra_files);

        for path in candidates {
            if path.exists() {
                let loaded = Config::load_from_file(&path)?;
                config = config.merge(loaded);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml() {
        let toml = r#"
            idle_secs = 10

            [[watch]]
            path = "/w"
            exec = "echo hi"
        "#;
        let config = Config::parse_from_str(toml, "test.toml", Some("toml")).unwrap();
        assert_eq!(config.idle_secs, 10);
        assert_eq!(config.watch.len(), 1);
        assert_eq!(config.watch[0].path, PathBuf::from("/w"));
    }

    #[test]
    fn merge_prefers_later_scalars_and_appends_watches() {
        let base = Config {
            idle_secs: 5,
            watch: vec![WatchGroup {
                path: PathBuf::from("/a"),
                exec: String::new(),
                idle_secs: None,
                rescan_secs: None,
                retry_cap: None,
            }],
            ..Config::default()
        };
        let override_cfg = Config {
            idle_secs: 20,
            watch: vec![WatchGroup {
                path: PathBuf::from("/b"),
                exec: String::new(),
                idle_secs: None,
                rescan_secs: None,
                retry_cap: None,
            }],
            ..Config::default()
        };

        let merged = base.merge(override_cfg);
        assert_eq!(merged.idle_secs, 20);
        assert_eq!(merged.watch.len(), 2);
    }

    #[test]
    fn rejects_relative_watch_path() {
        let config = Config {
            watch: vec![WatchGroup {
                path: PathBuf::from("relative/dir"),
                exec: String::new(),
                idle_secs: None,
                rescan_secs: None,
                retry_cap: None,
            }],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
