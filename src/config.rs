use crate::aqi::Standard;
use crate::cache::{CacheSettings, DEFAULT_NAMESPACE, DEFAULT_RESIDENT_PARTITIONS, DEFAULT_TTL};
use crate::clock::offset_from_minutes;
use crate::jitter::DEFAULT_RADIUS_M;
use crate::state::ViewSettings;
use crate::telemetry::http::DEFAULT_TIMEOUT;
use crate::zones::Unit;
use crate::zones::cluster::ClusterSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub provider: Option<ProviderSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub map: Option<MapSection>,
    #[serde(default)]
    pub cluster: Option<ClusterSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Remote,
    Realtime,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the archive API, required for `remote`
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSection {
    /// Lifetime of entries dated today (default: 600)
    pub ttl_secs: Option<u64>,
    /// Directory for persisted partitions; memory-only when absent
    pub dir: Option<PathBuf>,
    pub namespace: Option<String>,
    /// Past-day partitions kept in memory (default: 8)
    pub resident_partitions: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapSection {
    pub unit: Option<Unit>,
    pub standard: Option<Standard>,
    /// Offset of the local calendar from UTC, in minutes
    pub utc_offset_minutes: Option<i32>,
    pub jitter_radius_m: Option<f64>,
    pub refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterSection {
    pub radius_px: Option<u32>,
    pub min_radius_px: Option<u32>,
    pub disable_at_zoom: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.as_ref().map(|p| p.kind).unwrap_or_default()
    }

    /// Returns the archive endpoint, or `None` if unset or blank.
    pub fn provider_endpoint(&self) -> Option<&str> {
        let endpoint = self.provider.as_ref()?.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            None
        } else {
            Some(endpoint)
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider
            .as_ref()
            .and_then(|p| p.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Returns the TTL of today's cache entries (default: 600 seconds)
    pub fn cache_ttl(&self) -> Duration {
        self.cache
            .as_ref()
            .and_then(|c| c.ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL)
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        let dir = self.cache.as_ref()?.dir.as_deref()?;
        if dir.as_os_str().is_empty() {
            None
        } else {
            Some(dir)
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            namespace: self
                .cache
                .as_ref()
                .and_then(|c| c.namespace.clone())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ttl: self.cache_ttl(),
            offset: self.utc_offset(),
            resident_partitions: self
                .cache
                .as_ref()
                .and_then(|c| c.resident_partitions)
                .unwrap_or(DEFAULT_RESIDENT_PARTITIONS),
        }
    }

    pub fn unit(&self) -> Unit {
        self.map.as_ref().and_then(|m| m.unit).unwrap_or_default()
    }

    pub fn standard(&self) -> Standard {
        self.map.as_ref().and_then(|m| m.standard).unwrap_or_default()
    }

    pub fn utc_offset(&self) -> UtcOffset {
        offset_from_minutes(
            self.map
                .as_ref()
                .and_then(|m| m.utc_offset_minutes)
                .unwrap_or(0),
        )
    }

    pub fn jitter_radius_m(&self) -> f64 {
        self.map
            .as_ref()
            .and_then(|m| m.jitter_radius_m)
            .filter(|r| r.is_finite() && *r >= 0.0)
            .unwrap_or(DEFAULT_RADIUS_M)
    }

    /// Returns the marker refresh interval (default: 60 seconds)
    pub fn refresh_interval(&self) -> Duration {
        let secs = self
            .map
            .as_ref()
            .and_then(|m| m.refresh_interval_secs)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);
        Duration::from_secs(secs.max(1))
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        let defaults = ClusterSettings::default();
        let Some(section) = &self.cluster else {
            return defaults;
        };
        ClusterSettings {
            radius_px: section.radius_px.unwrap_or(defaults.radius_px),
            min_radius_px: section.min_radius_px.unwrap_or(defaults.min_radius_px),
            disable_at_zoom: section.disable_at_zoom.unwrap_or(defaults.disable_at_zoom),
        }
    }

    pub fn view_settings(&self) -> ViewSettings {
        ViewSettings {
            unit: self.unit(),
            standard: self.standard(),
            jitter_radius_m: self.jitter_radius_m(),
            cluster: self.cluster_settings(),
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp(label: &str, contents: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("aqi-map-config-{label}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn default_config_selects_remote_provider() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;
        assert_eq!(config.provider_kind(), ProviderKind::Remote);
        assert!(config.provider_endpoint().is_some());
        Ok(())
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp(
            "minimal",
            r#"
[app]
name = "aqi-map"

[logging]
level = "info"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.provider_kind(), ProviderKind::Remote);
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.cache_settings().resident_partitions, DEFAULT_RESIDENT_PARTITIONS);
        assert!(config.cache_dir().is_none());
        assert_eq!(config.unit(), Unit::Pm25);
        assert_eq!(config.standard(), Standard::Epa2024);
        assert_eq!(config.utc_offset(), UtcOffset::UTC);
        assert_eq!(config.cluster_settings(), ClusterSettings::default());
        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        Ok(())
    }

    #[test]
    fn map_and_cluster_sections_override_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp(
            "full",
            r#"
[app]
name = "aqi-map"

[logging]
level = "debug"

[provider]
kind = "realtime"
endpoint = "   "

[cache]
ttl_secs = 120
namespace = "staging"
resident_partitions = 3

[map]
unit = "pm2.5"
standard = "epa2012"
utc_offset_minutes = 180
jitter_radius_m = 40.0

[cluster]
radius_px = 60
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.provider_kind(), ProviderKind::Realtime);
        assert!(config.provider_endpoint().is_none());
        let cache = config.cache_settings();
        assert_eq!(cache.ttl, Duration::from_secs(120));
        assert_eq!(cache.namespace, "staging");
        assert_eq!(cache.resident_partitions, 3);
        assert_eq!(cache.offset.whole_minutes(), 180);
        assert_eq!(config.unit(), Unit::Pm25);
        assert_eq!(config.standard(), Standard::Epa2012);
        assert_eq!(config.jitter_radius_m(), 40.0);
        assert_eq!(config.cluster_settings().radius_px, 60);
        assert_eq!(config.cluster_settings().disable_at_zoom, 16);
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("aqi-map-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }

    #[test]
    fn unknown_unit_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp(
            "bad-unit",
            r#"
[app]
name = "aqi-map"

[logging]
level = "info"

[map]
unit = "ozone"
"#,
        )?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
