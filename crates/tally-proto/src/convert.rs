//! Conversions between the protobuf messages and the core model

use tally_core::{Metric as CoreMetric, MetricPayload, MetricValue};

use crate::Metric;

impl From<Metric> for MetricPayload {
    fn from(m: Metric) -> Self {
        MetricPayload {
            id: m.id,
            kind: m.r#type,
            delta: m.delta,
            value: m.value,
        }
    }
}

impl From<&CoreMetric> for Metric {
    fn from(m: &CoreMetric) -> Self {
        let (value, delta) = match m.value {
            MetricValue::Gauge(v) => (Some(v), None),
            MetricValue::Counter(d) => (None, Some(d)),
        };
        Metric {
            id: m.id.clone(),
            r#type: m.kind().to_string(),
            value,
            delta,
        }
    }
}

impl From<CoreMetric> for Metric {
    fn from(m: CoreMetric) -> Self {
        Metric::from(&m)
    }
}
