//! Metric data model and JSON wire payload

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, TallyError};

/// The two metric namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value, overwritten on every update
    Gauge,
    /// Accumulating value, every update adds its delta
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(TallyError::UnknownKind(other.to_string())),
        }
    }
}

/// A typed metric value. The variant fixes the kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse the textual form used by `/update/{type}/{name}/{value}`.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self> {
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map(MetricValue::Gauge)
                .map_err(|e| TallyError::InvalidMetric(format!("bad gauge value {raw:?}: {e}"))),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|e| TallyError::InvalidMetric(format!("bad counter value {raw:?}: {e}"))),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{}", v),
            MetricValue::Counter(d) => write!(f, "{}", d),
        }
    }
}

/// A validated metric: non-empty id plus exactly one typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// JSON wire form: `{"id", "type", "delta"?, "value"?}`.
///
/// Missing `id`/`type` decode as empty strings so the caller can tell an
/// absent identity apart from a malformed body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricPayload {
    /// Check `id` and `type` are present and `type` is known.
    pub fn identity(&self) -> Result<MetricKind> {
        if self.id.is_empty() {
            return Err(TallyError::MissingField("id"));
        }
        if self.kind.is_empty() {
            return Err(TallyError::MissingField("type"));
        }
        self.kind.parse()
    }
}

impl TryFrom<MetricPayload> for Metric {
    type Error = TallyError;

    fn try_from(payload: MetricPayload) -> Result<Self> {
        let value = match payload.identity()? {
            MetricKind::Gauge => MetricValue::Gauge(payload.value.ok_or_else(|| {
                TallyError::InvalidMetric(format!("gauge {} has no value", payload.id))
            })?),
            MetricKind::Counter => MetricValue::Counter(payload.delta.ok_or_else(|| {
                TallyError::InvalidMetric(format!("counter {} has no delta", payload.id))
            })?),
        };

        Ok(Metric {
            id: payload.id,
            value,
        })
    }
}

impl From<&Metric> for MetricPayload {
    fn from(metric: &Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        Self {
            id: metric.id.clone(),
            kind: metric.kind().to_string(),
            delta,
            value,
        }
    }
}

impl From<Metric> for MetricPayload {
    fn from(metric: Metric) -> Self {
        MetricPayload::from(&metric)
    }
}

/// Validate a whole batch before anything is applied.
pub fn validate_batch(payloads: Vec<MetricPayload>) -> Result<Vec<Metric>> {
    payloads.into_iter().map(Metric::try_from).collect()
}
