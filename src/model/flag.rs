use crate::model::enums::{Operator, VariationType};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Describes a feature flag.
///
/// Flag definitions are immutable once published into the data store; updates
/// replace the whole definition so readers never observe partially applied rules.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// The unique key of the flag.
    pub key: String,
    /// Human-readable name of the flag.
    #[serde(default)]
    pub name: String,
    /// Whether the flag is turned on.
    pub is_enabled: bool,
    /// The type of the flag's variations.
    pub variation_type: VariationType,
    /// The ordered list of variations.
    pub variations: Vec<Variation>,
    /// Index of the variation served while the flag is turned off.
    pub disabled_variation: usize,
    /// Explicitly targeted user keys, checked before any rule.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// The ordered list of targeting rules; the first fully matching rule wins.
    #[serde(default)]
    pub rules: Vec<TargetingRule>,
    /// Serving specification applied when no target or rule matches.
    pub fallthrough: Rollout,
    /// Update sequence number, used for change detection and for discarding
    /// out-of-order incremental updates.
    pub version: u64,
    /// When set, every evaluation of this flag is dispatched to the experiment pipeline.
    #[serde(default)]
    pub expt_include_all_targets: bool,
}

/// One possible output value of a flag.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Variation {
    /// The value served to callers.
    pub value: Value,
}

/// Explicit user-key targeting for one variation.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Index of the served variation.
    pub variation: usize,
    /// The user keys receiving the variation.
    pub keys: Vec<String>,
}

/// A conditional clause determining which variation a user receives.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TargetingRule {
    /// The conditions combined with AND semantics; all must match.
    pub conditions: Vec<Condition>,
    /// Serving specification applied when the rule matches.
    pub serve: Rollout,
}

/// A single condition over a user attribute or segment membership.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The user attribute the condition reads; ignored by segment operators.
    #[serde(default)]
    pub attribute: String,
    /// The comparison operator.
    pub op: Operator,
    /// Scalar comparison value for single-valued operators.
    #[serde(default)]
    pub value: Option<String>,
    /// Comparison values for multi-valued operators; segment keys for segment operators.
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.op.is_segment_op() {
            return write!(f, "User {:?} {:?}", self.op, self.values.as_deref().unwrap_or_default());
        }
        if let Some(vec) = self.values.as_ref() {
            return write!(f, "User.{} {:?} {:?}", self.attribute, self.op, vec);
        }
        write!(
            f,
            "User.{} {:?} {}",
            self.attribute,
            self.op,
            self.value.as_deref().unwrap_or("<invalid value>")
        )
    }
}

/// Determines the served variation of a matched rule or the fallthrough.
///
/// A fixed `variation` index takes precedence; otherwise the user is bucketed into
/// the weighted `variations` distribution by a deterministic hash of the flag key,
/// the optional salt, and the bucketing attribute.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    /// Fixed served variation index.
    #[serde(default)]
    pub variation: Option<usize>,
    /// Percentage distribution across variations.
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
    /// The user attribute the rollout buckets by; defaults to the user key.
    #[serde(default)]
    pub bucket_by: Option<String>,
    /// Extra salt mixed into the bucketing hash.
    #[serde(default)]
    pub salt: Option<String>,
    /// Fraction of the matched traffic dispatched to the experiment pipeline.
    #[serde(default)]
    pub expt_rollout: Option<f64>,
    /// Whether evaluations served by this rollout participate in experiments.
    #[serde(default)]
    pub included_in_expt: bool,
}

/// A weighted share of a percentage rollout.
///
/// Weights are relative; distributions not summing to 100 are normalized proportionally.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WeightedVariation {
    /// Index of the served variation.
    pub variation: usize,
    /// The relative weight of the variation.
    pub weight: f64,
}
