//! Serializable backtest configuration, loaded from TOML.
//!
//! ```toml
//! [data]
//! files = ["data/SPY_2023.csv", "data/SPY_2024.csv"]
//! macro_calendar = "data/macro_dates.csv"
//!
//! [features]
//! price_basis = "typical"
//! session_filter = "regular"
//!
//! [aggregation]
//! cutoff = "11:30"
//! min_bars = 1
//!
//! [backtest]
//! window = 21
//! target = "vwap"
//! features = ["cutoff_vwap", "cutoff_vwap_deviation", "cutoff_price_trend"]
//!
//! [model]
//! type = "stepwise"
//!
//! [report]
//! recent = 10
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vwaplab_core::features::{AggregationConfig, FeatureConfig};

use crate::model::ModelSpec;
use crate::walk_forward::WalkForwardConfig;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

/// Errors from loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[data]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Bar files, concatenated in this order before normalization.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Restrict the run to these symbols; empty means every symbol found.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// CSV with `CPI`, `NFP`, `month_end` date columns.
    #[serde(default)]
    pub macro_calendar: Option<PathBuf>,
}

fn default_recent() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// `[report]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of most recent forecasts kept in the report.
    #[serde(default = "default_recent")]
    pub recent: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Also write enriched bars as Parquet.
    #[serde(default)]
    pub parquet: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            recent: default_recent(),
            output_dir: default_output_dir(),
            parquet: false,
        }
    }
}

/// Complete configuration of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub backtest: WalkForwardConfig,
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default)]
    pub report: ReportConfig,
}

impl BacktestConfig {
    /// Read and validate a TOML file. Relative paths inside it are resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backtest.window == 0 {
            return Err(ConfigError::Invalid("backtest.window must be at least 1".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.backtest.features.iter().find(|f| !seen.insert(**f)) {
            return Err(ConfigError::Invalid(format!(
                "backtest.features lists {dup} more than once"
            )));
        }
        if self.backtest.fit_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "backtest.fit_deadline_ms must be positive".into(),
            ));
        }
        if let ModelSpec::Arx { max_lags: 0 } = self.model {
            return Err(ConfigError::Invalid("model.max_lags must be at least 1".into()));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.data.files = self.data.files.iter().map(resolve).collect();
        self.data.macro_calendar = self.data.macro_calendar.as_ref().map(resolve);
        self.report.output_dir = resolve(&self.report.output_dir);
    }

    /// Aggregator settings with the model inputs added to the required
    /// features, so every kept day can feed the model.
    pub fn effective_aggregation(&self) -> AggregationConfig {
        let mut agg = self.aggregation.clone();
        for f in &self.backtest.features {
            if !agg.required_features.contains(f) {
                agg.required_features.push(*f);
            }
        }
        agg
    }

    /// Deterministic hash of the configuration.
    ///
    /// Two runs with identical configs have the same RunId.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use vwaplab_core::domain::{FeatureName, PriceBasis, SessionFilter, TargetKind};

    const FULL: &str = r#"
[data]
files = ["SPY_2023.csv", "/abs/SPY_2024.csv"]
symbols = ["SPY"]
macro_calendar = "macro.csv"

[features]
price_basis = "close"
session_filter = "extended"

[aggregation]
cutoff = "10:30"
min_bars = 5

[backtest]
window = 10
target = "close"
features = ["cutoff_vwap", "cutoff_return"]
parallel = true
fit_deadline_ms = 250

[model]
type = "arx"
max_lags = 2

[report]
recent = 3
parquet = true
"#;

    #[test]
    fn parses_every_section() {
        let c = BacktestConfig::from_toml(FULL).unwrap();
        assert_eq!(c.data.files.len(), 2);
        assert_eq!(c.features.price_basis, PriceBasis::Close);
        assert_eq!(c.features.session_filter, SessionFilter::Extended);
        assert_eq!(c.aggregation.cutoff, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
        assert_eq!(c.aggregation.min_bars, 5);
        assert_eq!(c.backtest.window, 10);
        assert_eq!(c.backtest.target, TargetKind::Close);
        assert_eq!(
            c.backtest.features,
            vec![FeatureName::CutoffVwap, FeatureName::CutoffReturn]
        );
        assert!(c.backtest.parallel);
        assert_eq!(c.backtest.fit_deadline_ms, Some(250));
        assert_eq!(c.model, ModelSpec::Arx { max_lags: 2 });
        assert_eq!(c.report.recent, 3);
        assert!(c.report.parquet);
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let c = BacktestConfig::from_toml("").unwrap();
        assert_eq!(c.backtest.window, 21);
        assert_eq!(c.backtest.target, TargetKind::Vwap);
        assert_eq!(c.backtest.features, FeatureName::default_set());
        assert_eq!(c.aggregation.cutoff, NaiveTime::from_hms_opt(11, 30, 0).unwrap());
        assert_eq!(c.model, ModelSpec::Linear);
        assert_eq!(c.features.price_basis, PriceBasis::Typical);
        assert_eq!(c.report.recent, 10);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            BacktestConfig::from_toml("[backtest]\nwindow = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml("[backtest]\nfeatures = [\"cutoff_vwap\", \"cutoff_vwap\"]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml("[model]\ntype = \"arx\"\nmax_lags = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml("[aggregation]\ncutoff = \"late\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, FULL).unwrap();
        let c = BacktestConfig::from_file(&path).unwrap();
        assert_eq!(c.data.files[0], dir.path().join("SPY_2023.csv"));
        assert_eq!(c.data.files[1], PathBuf::from("/abs/SPY_2024.csv"));
        assert_eq!(c.data.macro_calendar, Some(dir.path().join("macro.csv")));
    }

    #[test]
    fn effective_aggregation_requires_model_inputs() {
        let c = BacktestConfig::from_toml(FULL).unwrap();
        let agg = c.effective_aggregation();
        assert_eq!(
            agg.required_features,
            vec![FeatureName::CutoffVwap, FeatureName::CutoffReturn]
        );
    }

    #[test]
    fn run_id_is_deterministic_and_sensitive() {
        let a = BacktestConfig::from_toml(FULL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.run_id(), b.run_id());
        b.backtest.window = 11;
        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.run_id().len(), 64);
    }
}
