use crate::model::flag::Condition;
use serde::{Deserialize, Serialize};

/// A reusable named group of users referenced by targeting rules.
///
/// Targeting rules reference segments by key; the evaluator resolves the key in
/// the data store at evaluation time, so a deleted segment simply stops matching.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// The unique key of the segment.
    pub key: String,
    /// User keys that always belong to the segment.
    #[serde(default)]
    pub included: Vec<String>,
    /// User keys that never belong to the segment; takes precedence over `included`.
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Attribute-condition rules; a user matching any rule belongs to the segment.
    #[serde(default)]
    pub rules: Vec<MatchRule>,
    /// Update sequence number.
    pub version: u64,
}

/// A condition-only rule of a segment.
///
/// Segment rules cannot reference other segments.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MatchRule {
    /// The conditions combined with AND semantics; all must match.
    pub conditions: Vec<Condition>,
}
