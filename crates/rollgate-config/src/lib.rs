//! rollgate.toml configuration parser and validation.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Latency percentiles the time-series backends can aggregate on.
pub const SUPPORTED_PERCENTILES: [f64; 3] = [50.0, 95.0, 99.0];

/// Top-level configuration for the release manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub targets: Vec<Target>,
    pub strategies: Vec<Strategy>,
    pub metrics: MetricsConfig,
    pub notification: Option<NotificationConfig>,
}

/// A set of services to manage, selected by label across one or more regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub project: String,
    /// Regions to search. Empty means "ask the platform for all of them".
    #[serde(default)]
    pub regions: Vec<String>,
    pub label_selector: String,
    pub platform: Platform,
    /// Required when `platform = "cluster"`.
    pub cluster: Option<ClusterConfig>,
    /// Platform endpoint override, mainly for tests.
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
}

/// Where the targeted services run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// The fully managed serving platform, addressed per region.
    Hosted,
    /// A serving installation on a user-owned cluster.
    Cluster,
}

/// Coordinates of a cluster-hosted serving installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub location: String,
    pub name: String,
    pub namespace: String,
}

/// Per-service rollout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Traffic percentages the candidate must hold healthily, in ascending
    /// order. 100 is implicit as the final step.
    pub steps: Vec<i64>,
    /// Seconds between ticks in loop mode.
    pub interval: i64,
    /// Metrics lookback window in seconds. Defaults to `interval`.
    pub health_offset: Option<i64>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl Strategy {
    /// The metrics lookback window.
    pub fn health_offset(&self) -> Duration {
        let secs = self.health_offset.unwrap_or(self.interval);
        Duration::from_secs(secs.max(0) as u64)
    }
}

/// A health criterion for the candidate revision.
///
/// Latency and error rate are upper bounds. Request count is a minimum-traffic
/// gate: with fewer observed requests than the threshold, health cannot be
/// determined at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "kebab-case")]
pub enum Criterion {
    RequestLatency { percentile: f64, threshold: f64 },
    ErrorRate { threshold: f64 },
    RequestCount { threshold: f64 },
}

impl Criterion {
    pub fn threshold(&self) -> f64 {
        match self {
            Criterion::RequestLatency { threshold, .. }
            | Criterion::ErrorRate { threshold }
            | Criterion::RequestCount { threshold } => *threshold,
        }
    }

    pub fn is_request_count(&self) -> bool {
        matches!(self, Criterion::RequestCount { .. })
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::RequestLatency { .. } => write!(f, "request-latency"),
            Criterion::ErrorRate { .. } => write!(f, "error-rate"),
            Criterion::RequestCount { .. } => write!(f, "request-count"),
        }
    }
}

/// Which metrics backend supplies the health data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum MetricsConfig {
    TimeSeries {
        /// Base URL override, mainly for tests.
        endpoint: Option<String>,
        auth_token: Option<String>,
    },
    Sheet {
        sheet_id: String,
        sheet_name: Option<String>,
        endpoint: Option<String>,
        auth_token: Option<String>,
    },
}

/// Optional webhook sink for rollout events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: String,
}

/// A configuration rejected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,
    #[error("target {0}: project must not be empty")]
    EmptyProject(usize),
    #[error("target {0}: label selector must not be empty")]
    EmptyLabelSelector(usize),
    #[error("target {0}: regions must not contain empty strings")]
    EmptyRegion(usize),
    #[error("target {0}: duplicate region {1:?}")]
    DuplicateRegion(usize, String),
    #[error("target {0}: cluster platform requires a [targets.cluster] block")]
    MissingCluster(usize),
    #[error("target {0}: cluster location, name and namespace must not be empty")]
    IncompleteCluster(usize),
    #[error("no strategies configured")]
    NoStrategies,
    #[error("strategy {0}: at least one step is required")]
    NoSteps(usize),
    #[error("strategy {0}: step {1} is outside (0, 100]")]
    StepOutOfRange(usize, i64),
    #[error("strategy {0}: steps must be strictly ascending")]
    StepsNotAscending(usize),
    #[error("strategy {0}: interval must be greater than zero")]
    NonPositiveInterval(usize),
    #[error("strategy {0}: health offset must be greater than zero")]
    NonPositiveHealthOffset(usize),
    #[error("strategy {0}: latency percentile {1} is unsupported (use 50, 95 or 99)")]
    InvalidPercentile(usize, f64),
    #[error("strategy {0}: latency threshold must not be negative")]
    NegativeLatencyThreshold(usize),
    #[error("strategy {0}: error rate threshold must be within [0, 100]")]
    ErrorRateOutOfRange(usize),
    #[error("strategy {0}: request count threshold must not be negative")]
    NegativeRequestCount(usize),
    #[error("sheet metrics provider requires a sheet id")]
    MissingSheetId,
    #[error("notification webhook URL must not be empty")]
    EmptyWebhookUrl,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the rollout engine cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        for (i, target) in self.targets.iter().enumerate() {
            target.validate(i)?;
        }

        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        for (i, strategy) in self.strategies.iter().enumerate() {
            strategy.validate(i)?;
        }

        if let MetricsConfig::Sheet { sheet_id, .. } = &self.metrics {
            if sheet_id.is_empty() {
                return Err(ConfigError::MissingSheetId);
            }
        }

        if let Some(notification) = &self.notification {
            if notification.webhook_url.is_empty() {
                return Err(ConfigError::EmptyWebhookUrl);
            }
        }

        Ok(())
    }
}

impl Target {
    fn validate(&self, i: usize) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::EmptyProject(i));
        }
        if self.label_selector.is_empty() {
            return Err(ConfigError::EmptyLabelSelector(i));
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.is_empty() {
                return Err(ConfigError::EmptyRegion(i));
            }
            if !seen.insert(region.as_str()) {
                return Err(ConfigError::DuplicateRegion(i, region.clone()));
            }
        }
        if self.platform == Platform::Cluster {
            match &self.cluster {
                None => return Err(ConfigError::MissingCluster(i)),
                Some(cluster)
                    if cluster.location.is_empty()
                        || cluster.name.is_empty()
                        || cluster.namespace.is_empty() =>
                {
                    return Err(ConfigError::IncompleteCluster(i));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl Strategy {
    fn validate(&self, i: usize) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps(i));
        }
        let mut previous = 0;
        for &step in &self.steps {
            if step <= 0 || step > 100 {
                return Err(ConfigError::StepOutOfRange(i, step));
            }
            if step <= previous {
                return Err(ConfigError::StepsNotAscending(i));
            }
            previous = step;
        }
        if self.interval <= 0 {
            return Err(ConfigError::NonPositiveInterval(i));
        }
        if let Some(offset) = self.health_offset {
            if offset <= 0 {
                return Err(ConfigError::NonPositiveHealthOffset(i));
            }
        }
        for criterion in &self.criteria {
            match criterion {
                Criterion::RequestLatency {
                    percentile,
                    threshold,
                } => {
                    if !SUPPORTED_PERCENTILES.contains(percentile) {
                        return Err(ConfigError::InvalidPercentile(i, *percentile));
                    }
                    if *threshold < 0.0 {
                        return Err(ConfigError::NegativeLatencyThreshold(i));
                    }
                }
                Criterion::ErrorRate { threshold } => {
                    if !(0.0..=100.0).contains(threshold) {
                        return Err(ConfigError::ErrorRateOutOfRange(i));
                    }
                }
                Criterion::RequestCount { threshold } => {
                    if *threshold < 0.0 {
                        return Err(ConfigError::NegativeRequestCount(i));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[[targets]]
project = "my-project"
regions = ["us-east1", "us-west1"]
label_selector = "rollout = gradual"
platform = "hosted"

[[strategies]]
steps = [5, 30, 60]
interval = 60
health_offset = 600

[[strategies.criteria]]
metric = "request-latency"
percentile = 99
threshold = 750.0

[[strategies.criteria]]
metric = "error-rate"
threshold = 5.0

[metrics]
provider = "time-series"
"#;

    fn parse(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn valid_config_passes() {
        let config = Config::from_str(VALID).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.strategies[0].steps, vec![5, 30, 60]);
        assert_eq!(config.strategies[0].criteria.len(), 2);
        assert!(matches!(
            config.metrics,
            MetricsConfig::TimeSeries { .. }
        ));
    }

    #[test]
    fn criteria_decode_as_tagged_variants() {
        let config = parse(VALID);
        assert_eq!(
            config.strategies[0].criteria[0],
            Criterion::RequestLatency {
                percentile: 99.0,
                threshold: 750.0
            }
        );
        assert_eq!(
            config.strategies[0].criteria[1],
            Criterion::ErrorRate { threshold: 5.0 }
        );
    }

    #[test]
    fn health_offset_falls_back_to_interval() {
        let mut config = parse(VALID);
        config.strategies[0].health_offset = None;
        assert_eq!(
            config.strategies[0].health_offset(),
            Duration::from_secs(60)
        );
        config.strategies[0].health_offset = Some(300);
        assert_eq!(
            config.strategies[0].health_offset(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn empty_project_rejected() {
        let mut config = parse(VALID);
        config.targets[0].project = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyProject(0))
        ));
    }

    #[test]
    fn empty_label_selector_rejected() {
        let mut config = parse(VALID);
        config.targets[0].label_selector = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyLabelSelector(0))
        ));
    }

    #[test]
    fn cluster_platform_requires_cluster_block() {
        let mut config = parse(VALID);
        config.targets[0].platform = Platform::Cluster;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCluster(0))
        ));

        config.targets[0].cluster = Some(ClusterConfig {
            location: "us-east1-b".into(),
            name: String::new(),
            namespace: "default".into(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteCluster(0))
        ));

        config.targets[0].cluster = Some(ClusterConfig {
            location: "us-east1-b".into(),
            name: "prod".into(),
            namespace: "default".into(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn steps_must_be_present_and_ascending() {
        let mut config = parse(VALID);
        config.strategies[0].steps = vec![];
        assert!(matches!(config.validate(), Err(ConfigError::NoSteps(0))));

        config.strategies[0].steps = vec![5, 30, 30];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StepsNotAscending(0))
        ));

        config.strategies[0].steps = vec![30, 5];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StepsNotAscending(0))
        ));
    }

    #[test]
    fn steps_must_be_within_range() {
        let mut config = parse(VALID);
        config.strategies[0].steps = vec![0, 50];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StepOutOfRange(0, 0))
        ));

        config.strategies[0].steps = vec![50, 101];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StepOutOfRange(0, 101))
        ));

        // A single step of 100 is legal: first advance serves 100%, the next
        // one promotes.
        config.strategies[0].steps = vec![100];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn interval_must_be_positive() {
        let mut config = parse(VALID);
        config.strategies[0].interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveInterval(0))
        ));
    }

    #[test]
    fn latency_percentile_must_be_supported() {
        let mut config = parse(VALID);
        config.strategies[0].criteria[0] = Criterion::RequestLatency {
            percentile: 75.0,
            threshold: 500.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPercentile(0, p)) if p == 75.0
        ));
    }

    #[test]
    fn error_rate_threshold_must_be_a_percentage() {
        let mut config = parse(VALID);
        config.strategies[0].criteria[1] = Criterion::ErrorRate { threshold: 101.0 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ErrorRateOutOfRange(0))
        ));
    }

    #[test]
    fn sheet_provider_requires_sheet_id() {
        let mut config = parse(VALID);
        config.metrics = MetricsConfig::Sheet {
            sheet_id: String::new(),
            sheet_name: None,
            endpoint: None,
            auth_token: None,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSheetId)
        ));
    }

    #[test]
    fn criterion_display_names() {
        assert_eq!(
            Criterion::RequestLatency {
                percentile: 99.0,
                threshold: 0.0
            }
            .to_string(),
            "request-latency"
        );
        assert_eq!(
            Criterion::ErrorRate { threshold: 0.0 }.to_string(),
            "error-rate"
        );
        assert_eq!(
            Criterion::RequestCount { threshold: 0.0 }.to_string(),
            "request-count"
        );
    }
}
