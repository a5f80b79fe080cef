//! Tunable thresholds for detectors, sessions, scoring and rules.
//!
//! Configuration is stored in TOML at `~/.config/poct-audit/config.toml`
//! (or XDG equivalent). Every field has a default, so a partial file only
//! overrides what it names.
//!
//! # Example Configuration
//!
//! ```toml
//! [detectors]
//! disabled = ["WARD_MISMATCH"]
//!
//! [detectors.rapid]
//! threshold_secs = 45.0
//! key = "barcode"
//!
//! [detectors.sharing]
//! key = "device"
//! window_minutes = 10.0
//! share_threshold = 3
//!
//! [sessions]
//! bucket_minutes = 30
//!
//! [scoring]
//! strategy = "probability"
//!
//! [scoring.weights]
//! rule = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{Flag, GroupKey};
use crate::scoring::{FlagWeights, RiskCutoffs, StrategyKind};

/// Errors that can occur when loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Identifier column a detector or the session clusterer groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyField {
    Operator,
    Device,
    Barcode,
}

impl KeyField {
    pub fn group_key(self) -> GroupKey {
        match self {
            Self::Operator => GroupKey::Operator,
            Self::Device => GroupKey::Device,
            Self::Barcode => GroupKey::Barcode,
        }
    }
}

impl std::fmt::Display for KeyField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Device => write!(f, "device"),
            Self::Barcode => write!(f, "barcode"),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub detectors: DetectorConfig,
    pub sessions: SessionConfig,
    pub scoring: ScoringConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Flags whose detectors are skipped (their columns stay false).
    pub disabled: Vec<Flag>,
    pub rapid: RapidConfig,
    pub location: LocationConfig,
    pub sharing: SharingConfig,
    pub hopping: HoppingConfig,
    pub hourly: HourlyConfig,
    pub shift: ShiftConfig,
    pub load: LoadConfig,
    pub ward: WardConfig,
}

impl DetectorConfig {
    pub fn is_enabled(&self, flag: Flag) -> bool {
        !self.disabled.contains(&flag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RapidConfig {
    /// Gaps strictly below this many seconds are flagged.
    pub threshold_secs: f64,
    pub key: KeyField,
}

impl Default for RapidConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 60.0,
            key: KeyField::Operator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Relocations within this many seconds (inclusive) are implausible.
    pub travel_threshold_secs: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            travel_threshold_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub key: KeyField,
    /// Half-width of the symmetric window.
    pub window_minutes: f64,
    /// Minimum distinct operators in the window that raise the flag.
    pub share_threshold: usize,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            key: KeyField::Barcode,
            window_minutes: 5.0,
            share_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoppingConfig {
    /// Length of the trailing window.
    pub window_minutes: f64,
    /// Distinct devices in the window above this count raise the flag.
    pub hop_threshold: usize,
}

impl Default for HoppingConfig {
    fn default() -> Self {
        Self {
            window_minutes: 5.0,
            hop_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyConfig {
    pub z_cutoff: f64,
}

impl Default for HourlyConfig {
    fn default() -> Self {
        Self { z_cutoff: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// Width of the shift buckets used by the deviation detector.
    pub width_hours: u32,
    /// Absolute difference from the median shift count that raises the flag.
    pub deviation_threshold: f64,
    /// Tests before this hour are off-shift.
    pub start_hour: u32,
    /// Tests after this hour are off-shift.
    pub end_hour: u32,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            width_hours: 8,
            deviation_threshold: 3.0,
            start_hour: 6,
            end_hour: 22,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub multiplier: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { multiplier: 1.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardConfig {
    /// Device/location pairs below this share of the device's tests are rare.
    pub rarity_threshold: f64,
}

impl Default for WardConfig {
    fn default() -> Self {
        Self {
            rarity_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub key: KeyField,
    pub bucket_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: KeyField::Barcode,
            bucket_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub strategy: StrategyKind,
    pub weights: FlagWeights,
    /// Tier cutoffs; each strategy supplies its own when absent.
    pub cutoffs: Option<RiskCutoffs>,
    pub probability: ProbabilityConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Weighted,
            weights: FlagWeights::default(),
            cutoffs: None,
            probability: ProbabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityConfig {
    pub intercept: f64,
    pub slope: f64,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            intercept: -3.0,
            slope: 6.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Register the built-in "Shared barcode" and "Rapid succession" rules.
    pub legacy: bool,
}

fn require(ok: bool, message: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Validation(message()))
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    require(value.is_finite() && value > 0.0, || {
        format!("{name} must be a positive number, got {value}")
    })
}

impl AuditConfig {
    /// Load configuration from the default location.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the default configuration file path.
    ///
    /// Uses XDG conventions:
    /// - Primary: `$XDG_CONFIG_HOME/poct-audit/config.toml`
    /// - Fallback: platform-specific config dir
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config)
                .join("poct-audit")
                .join("config.toml"));
        }

        dirs::config_dir()
            .map(|p| p.join("poct-audit").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Reject thresholds no detector can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detectors;
        require(
            d.rapid.threshold_secs.is_finite() && d.rapid.threshold_secs >= 0.0,
            || "detectors.rapid.threshold_secs must be a non-negative number".into(),
        )?;
        require(
            d.location.travel_threshold_secs.is_finite() && d.location.travel_threshold_secs >= 0.0,
            || "detectors.location.travel_threshold_secs must be a non-negative number".into(),
        )?;
        require_positive("detectors.sharing.window_minutes", d.sharing.window_minutes)?;
        require(d.sharing.key != KeyField::Operator, || {
            "detectors.sharing.key must be 'barcode' or 'device'".into()
        })?;
        require(d.sharing.share_threshold >= 2, || {
            "detectors.sharing.share_threshold must be at least 2".into()
        })?;
        require_positive("detectors.hopping.window_minutes", d.hopping.window_minutes)?;
        require(d.hourly.z_cutoff.is_finite(), || {
            "detectors.hourly.z_cutoff must be finite".into()
        })?;
        require(d.shift.width_hours > 0 && d.shift.width_hours <= 24, || {
            format!(
                "detectors.shift.width_hours must be within 1..=24, got {}",
                d.shift.width_hours
            )
        })?;
        require(d.shift.deviation_threshold.is_finite(), || {
            "detectors.shift.deviation_threshold must be finite".into()
        })?;
        require(
            d.shift.start_hour < 24 && d.shift.end_hour < 24 && d.shift.start_hour <= d.shift.end_hour,
            || {
                format!(
                    "detectors.shift hours must satisfy start <= end < 24, got {}..{}",
                    d.shift.start_hour, d.shift.end_hour
                )
            },
        )?;
        require_positive("detectors.load.multiplier", d.load.multiplier)?;
        require(
            (0.0..=1.0).contains(&d.ward.rarity_threshold),
            || "detectors.ward.rarity_threshold must be within 0..=1".into(),
        )?;
        require(self.sessions.bucket_minutes > 0, || {
            "sessions.bucket_minutes must be positive".into()
        })?;
        require(self.sessions.key != KeyField::Operator, || {
            "sessions.key must be 'barcode' or 'device'".into()
        })?;

        self.scoring
            .weights
            .validate()
            .map_err(ConfigError::Validation)?;
        if let Some(cutoffs) = &self.scoring.cutoffs {
            cutoffs.validate().map_err(ConfigError::Validation)?;
        }
        require(
            self.scoring.probability.intercept.is_finite() && self.scoring.probability.slope.is_finite(),
            || "scoring.probability parameters must be finite".into(),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        AuditConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: AuditConfig = toml::from_str(
            r#"
            [detectors.rapid]
            threshold_secs = 20.0

            [scoring]
            strategy = "coverage"
            "#,
        )
        .unwrap();
        assert_eq!(config.detectors.rapid.threshold_secs, 20.0);
        assert_eq!(config.detectors.rapid.key, KeyField::Operator);
        assert_eq!(config.detectors.sharing, SharingConfig::default());
        assert_eq!(config.scoring.strategy, StrategyKind::Coverage);
        assert_eq!(config.sessions.bucket_minutes, 30);
    }

    #[test]
    fn disabled_flags_parse_by_column_name() {
        let config: AuditConfig = toml::from_str(
            r#"
            [detectors]
            disabled = ["WARD_MISMATCH", "SHIFT_VIOLATION"]
            "#,
        )
        .unwrap();
        assert!(!config.detectors.is_enabled(Flag::WardMismatch));
        assert!(!config.detectors.is_enabled(Flag::ShiftViolation));
        assert!(config.detectors.is_enabled(Flag::Rapid));
    }

    #[test]
    fn validation_rejects_zero_session_bucket() {
        let mut config = AuditConfig::default();
        config.sessions.bucket_minutes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rule_weight_is_configurable_and_validated() {
        let config: AuditConfig = toml::from_str(
            r#"
            [scoring.weights]
            rule = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.weights.rule, 2.5);
        assert_eq!(config.scoring.weights.rapid, FlagWeights::default().rapid);

        let mut config = AuditConfig::default();
        config.scoring.weights.rule = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_rejects_operator_sharing_key() {
        let mut config = AuditConfig::default();
        config.detectors.sharing.key = KeyField::Operator;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_shift_hours() {
        let mut config = AuditConfig::default();
        config.detectors.shift.start_hour = 23;
        config.detectors.shift.end_hour = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AuditConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AuditConfig::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AuditConfig::default();
        config.detectors.sharing.key = KeyField::Device;
        config.rules.legacy = true;
        config.scoring.cutoffs = Some(RiskCutoffs {
            medium: 10.0,
            high: 20.0,
        });
        config.save_to(&path).unwrap();
        assert_eq!(AuditConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[detectors.rapid]\nthreshold_secs = \"soon\"\n").unwrap();
        assert!(matches!(
            AuditConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
