use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{Display, Formatter};

/// The type of a feature flag's variations.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize_repr, Serialize_repr)]
#[repr(u8)]
pub enum VariationType {
    /// The on/off type.
    Bool = 0,
    /// The text type.
    String = 1,
    /// The whole number type.
    Int = 2,
    /// The decimal number type.
    Float = 3,
}

impl Display for VariationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VariationType::Bool => f.write_str("Bool"),
            VariationType::String => f.write_str("String"),
            VariationType::Int => f.write_str("Int"),
            VariationType::Float => f.write_str("Float"),
        }
    }
}

/// Comparison operator of a targeting rule condition.
///
/// Text operators coerce the user attribute to its string form. Numeric operators
/// work on decimal values rounded to 5 fraction digits. SemVer operators treat
/// unparsable values as non-matching. Segment operators read segment keys from the
/// condition's value list and resolve them in the data store at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum Operator {
    /// Matches when the attribute's string form equals the comparison value.
    Equal,
    /// Negation of [`Operator::Equal`].
    NotEqual,
    /// Matches when the attribute is numerically less than the comparison value.
    LessThan,
    /// Matches when the attribute is numerically greater than the comparison value.
    BiggerThan,
    /// Matches when the attribute is numerically less than or equal to the comparison value.
    LessEqualThan,
    /// Matches when the attribute is numerically greater than or equal to the comparison value.
    BiggerEqualThan,
    /// Matches when the attribute's string form contains the comparison value.
    Contains,
    /// Negation of [`Operator::Contains`].
    NotContain,
    /// Matches when the attribute's string form equals one of the comparison values.
    IsOneOf,
    /// Negation of [`Operator::IsOneOf`].
    NotOneOf,
    /// Matches when the attribute's string form starts with the comparison value.
    StartsWith,
    /// Matches when the attribute's string form ends with the comparison value.
    EndsWith,
    /// Matches when the attribute's string form is `true` (case-insensitive).
    IsTrue,
    /// Matches when the attribute's string form is `false` (case-insensitive).
    IsFalse,
    /// Matches when the comparison value, interpreted as a regular expression,
    /// finds a match in the attribute's string form.
    MatchRegex,
    /// Negation of [`Operator::MatchRegex`].
    NotMatchRegex,
    /// Matches when the user belongs to one of the referenced segments.
    IsInSegment,
    /// Negation of [`Operator::IsInSegment`].
    NotInSegment,
    /// Matches when the attribute is a semantic version less than the comparison value.
    LessThanSemVer,
    /// Matches when the attribute is a semantic version greater than the comparison value.
    BiggerThanSemVer,
    /// Matches when the attribute is a semantic version less than or equal to the comparison value.
    LessEqualThanSemVer,
    /// Matches when the attribute is a semantic version greater than or equal to the comparison value.
    BiggerEqualThanSemVer,
    /// Matches when the attribute is a semantic version equal to one of the comparison values.
    IsOneOfSemVer,
}

impl Operator {
    pub(crate) fn is_segment_op(&self) -> bool {
        matches!(self, Operator::IsInSegment | Operator::NotInSegment)
    }
}

/// Kind of a single-item patch received from the sync stream.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchKind {
    /// Inserts or updates a feature flag.
    FlagUpsert,
    /// Deletes a feature flag.
    FlagDelete,
    /// Inserts or updates a segment.
    SegmentUpsert,
    /// Deletes a segment.
    SegmentDelete,
}

/// The data collection a stored item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// The feature flag collection.
    Flag,
    /// The segment collection.
    Segment,
}

/// Kind of change applied to a stored item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeKind {
    /// The item was inserted or replaced.
    Upsert,
    /// The item was deleted.
    Delete,
}
