// src/types.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A metric value (latency in ms, lag in ms, heartbeat count, etc.)
pub type MetricValue = f64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Dimension tags attached to a metric (e.g. "Cluster" -> "sharded-kv", "Shard" -> "shard-1").
/// Ordered so that rule identities and log output are deterministic.
pub type Dimensions = BTreeMap<String, String>;

/// Statistic computed over one metric period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Statistic {
    /// Arithmetic mean of the datapoints
    Average,
    /// Sum of the datapoints
    Sum,
    /// Smallest datapoint
    Minimum,
    /// Largest datapoint
    Maximum,
    /// Nearest-rank percentile, `0 < p <= 100` (e.g. `Percentile(99.0)` for p99)
    Percentile(f64),
}

impl Statistic {
    /// Reduce a set of datapoints to this statistic. `None` for an empty set.
    pub fn apply(&self, values: &[MetricValue]) -> Option<MetricValue> {
        if values.is_empty() {
            return None;
        }

        let value = match self {
            Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
            Statistic::Sum => values.iter().sum(),
            Statistic::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
            Statistic::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Statistic::Percentile(p) => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
                sorted[rank.clamp(1, sorted.len()) - 1]
            }
        };

        Some(value)
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Average => write!(f, "Average"),
            Statistic::Sum => write!(f, "Sum"),
            Statistic::Minimum => write!(f, "Minimum"),
            Statistic::Maximum => write!(f, "Maximum"),
            Statistic::Percentile(p) => write!(f, "p{}", p),
        }
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avg" | "average" => Ok(Statistic::Average),
            "sum" => Ok(Statistic::Sum),
            "min" | "minimum" => Ok(Statistic::Minimum),
            "max" | "maximum" => Ok(Statistic::Maximum),
            other => {
                let p = other
                    .strip_prefix('p')
                    .and_then(|rest| rest.parse::<f64>().ok())
                    .ok_or_else(|| format!("unknown statistic '{}'", s))?;
                if p > 0.0 && p <= 100.0 {
                    Ok(Statistic::Percentile(p))
                } else {
                    Err(format!("percentile out of range in '{}'", s))
                }
            }
        }
    }
}

impl TryFrom<String> for Statistic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Statistic> for String {
    fn from(statistic: Statistic) -> Self {
        statistic.to_string()
    }
}

/// How a period's statistic is compared against a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Breaching when `value > threshold`
    #[serde(alias = ">")]
    GreaterThan,
    /// Breaching when `value < threshold`
    #[serde(alias = "<")]
    LessThan,
}

impl Comparator {
    pub fn holds(&self, value: MetricValue, threshold: MetricValue) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::LessThan => value < threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::GreaterThan => write!(f, ">"),
            Comparator::LessThan => write!(f, "<"),
        }
    }
}

/// What a period without a datapoint means to an alarm rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingDataPolicy {
    /// Missing periods count as breaching (absence is a liveness failure)
    Breaching,
    /// Missing periods count as within threshold
    NotBreaching,
    /// Missing periods are dropped from the window
    Ignore,
    /// Any missing period forces INSUFFICIENT_DATA
    #[default]
    AsMissing,
}

/// Classification of one evaluated period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSample {
    Breaching,
    Ok,
    Missing,
}

/// Three-valued alarm signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::Ok => write!(f, "OK"),
            AlarmState::Alarm => write!(f, "ALARM"),
            AlarmState::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

/// A statistical query over one metric, filtered by dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Metric name (e.g. "RequestLatencyMs")
    pub metric_name: String,
    /// Dimension filter; every entry must match the datapoint's tags
    pub dimensions: Dimensions,
    /// Statistic to compute over one period
    pub statistic: Statistic,
    /// Period length in seconds
    pub period_seconds: u64,
}

impl MetricQuery {
    pub fn new(metric_name: &str, statistic: Statistic, period_seconds: u64) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            dimensions: Dimensions::new(),
            statistic,
            period_seconds,
        }
    }

    pub fn with_dimension(mut self, key: &str, value: &str) -> Self {
        self.dimensions.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether a datapoint carrying `tags` falls under this query's filter
    pub fn matches(&self, metric_name: &str, tags: &Dimensions) -> bool {
        self.metric_name == metric_name
            && self
                .dimensions
                .iter()
                .all(|(key, value)| tags.get(key) == Some(value))
    }
}

/// Direction of a replica-count adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    /// Add replicas
    Up,
    /// Remove replicas
    Down,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDirection::Up => write!(f, "up"),
            ScaleDirection::Down => write!(f, "down"),
        }
    }
}

/// A change of alarm state produced by one evaluator tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmTransition {
    /// Rule that changed state
    pub rule_id: String,
    /// State before the tick
    pub from: AlarmState,
    /// State after the tick
    pub to: AlarmState,
    /// When the transition was recorded
    pub timestamp: Timestamp,
    /// Statistic value of the period that caused it, if any
    pub value: Option<MetricValue>,
}

/// Replica-count bounds for one scaling target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for CapacityBounds {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

/// Orchestrator-reported state of a scaling target. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCapacity {
    /// Current desired replica count
    pub current: u32,
    pub min: u32,
    pub max: u32,
}
