use rollcall_core::matcher::{IdentityMatcher, MatcherError};
use rollcall_core::{MarkPolicy, DEFAULT_SIMILARITY_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid similarity_threshold: {0}")]
    Threshold(#[from] MatcherError),
}

/// Daemon configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// SeetaFace frontal cascade model file.
    pub detector_model: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity at or above which a probe is accepted.
    pub similarity_threshold: f32,
    /// How long a live capture may wait for the camera.
    pub capture_timeout_secs: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    pub mark_policy: MarkPolicy,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            camera_device: "/dev/video0".to_string(),
            detector_model: PathBuf::from("/usr/share/rollcall/seeta_fd_frontal_v1.0.bin"),
            db_path: data_dir.join("rollcall.db"),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            capture_timeout_secs: 10,
            warmup_frames: 4,
            mark_policy: MarkPolicy::default(),
            session_bus: false,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or the default path, if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_DETECTOR_MODEL") {
            self.detector_model = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        override_parsed(&lookup, "ROLLCALL_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&lookup, "ROLLCALL_CAPTURE_TIMEOUT_SECS", &mut self.capture_timeout_secs);
        override_parsed(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        override_parsed(&lookup, "ROLLCALL_MARK_POLICY", &mut self.mark_policy);
        if let Some(v) = lookup("ROLLCALL_SESSION_BUS") {
            self.session_bus = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matcher()?;
        Ok(())
    }

    pub fn matcher(&self) -> Result<IdentityMatcher, MatcherError> {
        IdentityMatcher::new(self.similarity_threshold)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.similarity_threshold, 0.75);
        assert_eq!(config.mark_policy, MarkPolicy::Alternate);
        assert!(config.db_path.ends_with("rollcall/rollcall.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config: Config = toml::from_str(
            r#"
            camera_device = "/dev/video2"
            similarity_threshold = 0.8
            mark_policy = "check-in-only"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.mark_policy, MarkPolicy::CheckInOnly);
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("camera = \"/dev/video1\"").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config = toml::from_str("similarity_threshold = 0.8").unwrap();
        config.apply_env(env(&[
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.9"),
            ("ROLLCALL_DB_PATH", "/var/lib/rollcall/test.db"),
            ("ROLLCALL_MARK_POLICY", "check-in-only"),
            ("ROLLCALL_SESSION_BUS", "1"),
        ]));
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/rollcall/test.db"));
        assert_eq!(config.mark_policy, MarkPolicy::CheckInOnly);
        assert!(config.session_bus);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("ROLLCALL_WARMUP_FRAMES", "lots"),
            ("ROLLCALL_MARK_POLICY", "sometimes"),
        ]));
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.mark_policy, MarkPolicy::Alternate);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        for bad in ["1.5", "-1.0", "NaN"] {
            let mut config = Config::default();
            config.apply_env(env(&[("ROLLCALL_SIMILARITY_THRESHOLD", bad)]));
            assert!(
                matches!(config.validate(), Err(ConfigError::Threshold(_))),
                "threshold {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::from_file(Path::new("/nonexistent/rollcall.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
