//! Component configuration and the spec catalog (§3, §6): user-tunable
//! knobs loaded from YAML, and the machine-class-keyed catalog of
//! [`CheckerSpec`]s a fleet operator ships alongside the daemon.

use std::collections::HashSet;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::CheckerSpec;

/// The knobs an operator may set for a single component, as they appear
/// in the user config YAML. Every field is optional; absent fields fall
/// back to the component's own defaults (§6 "Recognized keys").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserConfig {
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub query_interval: Option<Duration>,
    pub cache_size: Option<i64>,
    pub enable_metrics: Option<bool>,
    #[serde(default)]
    pub ignored_checkers: Vec<String>,
}

/// Defaults a component supplies for knobs its own user-config entry
/// leaves unset.
#[derive(Debug, Clone)]
pub struct ComponentConfigDefaults {
    pub query_interval: Duration,
    pub cache_size: usize,
    pub enable_metrics: bool,
    pub timeout: Duration,
}

/// The fully-resolved configuration a running component actually reads
/// from (§3 "Component configuration", §4.E `update(cfg)`).
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub query_interval: Duration,
    pub cache_size: usize,
    pub ignored_checkers: HashSet<String>,
    pub enable_metrics: bool,
    pub timeout: Duration,
}

impl ComponentConfig {
    /// Merges `raw` over `defaults`. A `cache_size` of zero or negative
    /// is coerced to 1 rather than rejected outright (§3 invariant:
    /// "cache size <= 0 behaves as cache size 1").
    pub fn from_raw(raw: RawUserConfig, defaults: &ComponentConfigDefaults) -> Self {
        let cache_size = match raw.cache_size {
            Some(n) if n > 0 => n as usize,
            Some(_) => 1,
            None => defaults.cache_size,
        };
        Self {
            query_interval: raw.query_interval.unwrap_or(defaults.query_interval),
            cache_size,
            ignored_checkers: raw.ignored_checkers.into_iter().collect(),
            enable_metrics: raw.enable_metrics.unwrap_or(defaults.enable_metrics),
            timeout: defaults.timeout,
        }
    }

    pub fn is_ignored(&self, checker_name: &str) -> bool {
        self.ignored_checkers.contains(checker_name)
    }
}

/// Whole-daemon user config: one entry per named component, plus the
/// location of the spec catalog (§6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub components: HashMap<String, RawUserConfig>,
    pub spec_catalog: Option<String>,
    /// Machine-class identifier used to select a row of the spec
    /// catalog (§6). Typically detected at startup; overridable here
    /// for testing.
    pub machine_class: Option<String>,
}

impl DaemonConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(Error::from)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn component(&self, name: &str) -> RawUserConfig {
        self.components.get(name).cloned().unwrap_or_default()
    }
}

/// Machine-class-keyed catalog of checker specs (§6). An absent entry
/// for a component's detected class is a fatal initialization error for
/// that component, not a silent skip.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpecCatalog {
    #[serde(flatten)]
    classes: HashMap<String, Vec<CheckerSpec>>,
}

impl SpecCatalog {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(Error::from)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Loads a catalog from either a local file path or an `http(s)://`
    /// URL (§6 external interfaces).
    pub async fn load(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let body = reqwest::get(location)
                .await
                .map_err(|e| Error::Spec(format!("fetching spec catalog from {location}: {e}")))?
                .text()
                .await
                .map_err(|e| Error::Spec(format!("reading spec catalog body from {location}: {e}")))?;
            Self::from_yaml_str(&body)
        } else {
            Self::load_from_path(location)
        }
    }

    pub fn specs_for_class(&self, class: &str) -> Result<&[CheckerSpec]> {
        self.classes
            .get(class)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::Spec(format!("no spec catalog entry for machine class '{class}'")))
    }
}

fn deserialize_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Text(String),
    }
    let repr: Option<Repr> = Option::deserialize(deserializer)?;
    match repr {
        None => Ok(None),
        Some(Repr::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(Repr::Text(text)) => parse_duration(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parses a bare integer (seconds) or a suffixed duration like `30s`,
/// `500ms`, `2m`, `1h`.
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_part, suffix) = s.split_at(split_at);
    let value: f64 = num_part
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration: '{s}'")))?;
    let multiplier = match suffix {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3600.0,
        "" => 1.0,
        other => return Err(Error::Config(format!("unknown duration suffix '{other}' in '{s}'"))),
    };
    Ok(Duration::from_secs_f64(value * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ComponentConfigDefaults {
        ComponentConfigDefaults {
            query_interval: Duration::from_secs(30),
            cache_size: 5,
            enable_metrics: true,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn unknown_suffix_rejected() {
        assert!(parse_duration("30x").is_err());
    }

    #[test]
    fn absent_cache_size_falls_back_to_default() {
        let raw = RawUserConfig::default();
        let cfg = ComponentConfig::from_raw(raw, &defaults());
        assert_eq!(cfg.cache_size, 5);
    }

    #[test]
    fn non_positive_cache_size_coerced_to_one() {
        let raw = RawUserConfig {
            cache_size: Some(-3),
            ..Default::default()
        };
        let cfg = ComponentConfig::from_raw(raw, &defaults());
        assert_eq!(cfg.cache_size, 1);

        let raw = RawUserConfig {
            cache_size: Some(0),
            ..Default::default()
        };
        let cfg = ComponentConfig::from_raw(raw, &defaults());
        assert_eq!(cfg.cache_size, 1);
    }

    #[test]
    fn daemon_config_parses_nested_component_entries() {
        let yaml = r#"
spec_catalog: /etc/gpu-sentinel/catalog.yaml
machine_class: h100-8gpu
components:
  Gpu:
    query_interval: 30s
    cache_size: 10
    ignored_checkers: [ECCErrors]
  Network:
    enable_metrics: false
"#;
        let cfg = DaemonConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.machine_class.as_deref(), Some("h100-8gpu"));
        let gpu = cfg.component("Gpu");
        assert_eq!(gpu.query_interval, Some(Duration::from_secs(30)));
        assert_eq!(gpu.ignored_checkers, vec!["ECCErrors".to_string()]);
        let net = cfg.component("Network");
        assert_eq!(net.enable_metrics, Some(false));
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let yaml = "machine_class: h100-8gpu\nunknown_future_field: 42\n";
        assert!(DaemonConfig::from_yaml_str(yaml).is_ok());
    }

    #[test]
    fn missing_catalog_class_is_an_error() {
        let catalog = SpecCatalog::from_yaml_str("h100-8gpu: []\n").unwrap();
        assert!(catalog.specs_for_class("a100-4gpu").is_err());
        assert!(catalog.specs_for_class("h100-8gpu").is_ok());
    }
}
