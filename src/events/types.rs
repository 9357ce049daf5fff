use crate::user::User;
use crate::utils;
use crate::value::Value;
use serde::Serialize;

const METRIC_ROUTE: &str = "index/metric";
const METRIC_TYPE: &str = "CustomEvent";
const METRIC_APP_TYPE: &str = "rustserverside";

/// An analytics event enqueued for asynchronous delivery.
#[derive(Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum Event {
    /// Records the variations served by flag evaluations.
    Flag(FlagEvent),
    /// Records custom experiment metrics.
    Metric(MetricEvent),
    /// Registers an end user.
    User(UserEvent),
}

/// Registers an end user with the flag management service.
#[derive(Serialize, Debug, Clone)]
pub struct UserEvent {
    /// The registered user.
    pub user: User,
}

/// Records the variations served to a user by one or more evaluations.
#[derive(Serialize, Debug, Clone)]
pub struct FlagEvent {
    /// The evaluated user.
    pub user: User,
    /// The served variations.
    pub variations: Vec<FlagEventVariation>,
}

/// One served variation inside a [`FlagEvent`].
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FlagEventVariation {
    /// Key of the evaluated flag.
    pub feature_flag_key: String,
    /// Whether the evaluation participates in experiment reporting.
    pub send_to_experiment: bool,
    /// Unix milliseconds timestamp of the evaluation.
    pub timestamp: i64,
    /// The served variation.
    pub variation: VariationRecord,
}

/// The served variation's index, value, and reason.
#[derive(Serialize, Debug, Clone)]
pub struct VariationRecord {
    /// Index of the served variation.
    pub index: usize,
    /// The served value.
    pub value: Value,
    /// The main factor that decided the evaluation result.
    pub reason: String,
}

/// Records custom experiment metrics performed by a user.
#[derive(Serialize, Debug, Clone)]
pub struct MetricEvent {
    /// The user that performed the metric events.
    pub user: User,
    /// The recorded metrics.
    pub metrics: Vec<MetricRecord>,
}

/// A single custom metric inside a [`MetricEvent`].
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    /// Name of the event, which may correspond to an experiment goal.
    pub event_name: String,
    /// The numeric value used by the experiment.
    pub numeric_value: f64,
    /// Ingestion route of the metric.
    pub route: &'static str,
    /// Kind of the metric.
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    /// The reporting SDK family.
    pub app_type: &'static str,
    /// Unix milliseconds timestamp of the metric.
    pub timestamp: i64,
}

impl MetricRecord {
    pub(crate) fn new(event_name: &str, numeric_value: f64) -> Self {
        Self {
            event_name: event_name.to_owned(),
            numeric_value,
            route: METRIC_ROUTE,
            metric_type: METRIC_TYPE,
            app_type: METRIC_APP_TYPE,
            timestamp: utils::unix_timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod event_type_tests {
    use super::{Event, FlagEvent, FlagEventVariation, MetricEvent, MetricRecord, VariationRecord};
    use crate::user::User;
    use crate::value::Value;

    #[test]
    fn flag_event_payload_shape() {
        let event = Event::Flag(FlagEvent {
            user: User::new("u1", "Jane"),
            variations: vec![FlagEventVariation {
                feature_flag_key: "beta-ui".to_owned(),
                send_to_experiment: false,
                timestamp: 1,
                variation: VariationRecord { index: 0, value: Value::String("on".to_owned()), reason: "rule match".to_owned() },
            }],
        });
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["user"]["keyId"], "u1");
        assert_eq!(json["variations"][0]["featureFlagKey"], "beta-ui");
        assert_eq!(json["variations"][0]["variation"]["value"], "on");
    }

    #[test]
    fn metric_event_payload_shape() {
        let event = Event::Metric(MetricEvent {
            user: User::new("u1", "Jane"),
            metrics: vec![MetricRecord::new("purchase", 2.0)],
        });
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["metrics"][0]["eventName"], "purchase");
        assert_eq!(json["metrics"][0]["numericValue"], 2.0);
        assert_eq!(json["metrics"][0]["type"], "CustomEvent");
    }
}
