use crate::eval::bucketing::{bucket, ratio, select_weighted};
use crate::eval::details::{
    REASON_FALLTHROUGH, REASON_FLAG_OFF, REASON_RULE_MATCH, REASON_TARGET_MATCH,
};
use crate::model::enums::Operator;
use crate::model::flag::{Condition, FeatureFlag, Rollout};
use crate::model::segment::Segment;
use crate::store::SegmentLookup;
use crate::user::User;
use crate::value::Value;
use regex::Regex;
use semver::Version;
use thiserror::Error;

const EXPT_KEY_PREFIX: &str = "expt";
const DEFAULT_BUCKET_ATTRIBUTE: &str = "keyid";
// both operands of numeric comparisons are rounded to 5 fraction digits
const NUMERIC_SCALE: f64 = 1e5;

pub(crate) struct EvalResult {
    pub value: Value,
    pub variation_index: usize,
    pub reason: &'static str,
    pub send_to_experiment: bool,
}

#[derive(Error, Debug)]
pub(crate) enum EvalError {
    #[error("variation index {0} is out of range")]
    UnreachableVariation(usize),
    #[error("rollout serves no variation")]
    EmptyRollout,
    #[error("invalid regular expression '{0}'")]
    InvalidRegex(String),
}

/// Evaluates a flag for a user. Pure and non-blocking: segment references are the
/// only store reads, resolved through `segments` at this moment.
pub(crate) fn evaluate(
    flag: &FeatureFlag,
    user: &User,
    segments: &dyn SegmentLookup,
) -> Result<EvalResult, EvalError> {
    if !flag.is_enabled {
        return serve_index(flag, flag.disabled_variation, REASON_FLAG_OFF, false);
    }
    for target in &flag.targets {
        if target.keys.iter().any(|key| key == user.key()) {
            return serve_index(flag, target.variation, REASON_TARGET_MATCH, flag.expt_include_all_targets);
        }
    }
    for rule in &flag.rules {
        if eval_conditions(&rule.conditions, user, segments)? {
            return serve_rollout(flag, &rule.serve, user, REASON_RULE_MATCH);
        }
    }
    serve_rollout(flag, &flag.fallthrough, user, REASON_FALLTHROUGH)
}

fn serve_index(
    flag: &FeatureFlag,
    index: usize,
    reason: &'static str,
    send_to_experiment: bool,
) -> Result<EvalResult, EvalError> {
    let variation = flag
        .variations
        .get(index)
        .ok_or(EvalError::UnreachableVariation(index))?;
    Ok(EvalResult {
        value: variation.value.clone(),
        variation_index: index,
        reason,
        send_to_experiment,
    })
}

fn serve_rollout(
    flag: &FeatureFlag,
    rollout: &Rollout,
    user: &User,
    reason: &'static str,
) -> Result<EvalResult, EvalError> {
    let dispatch_key = dispatch_key_value(flag, rollout, user);
    if let Some(index) = rollout.variation {
        let send = send_to_experiment(flag, rollout, &dispatch_key, 1.0);
        return serve_index(flag, index, reason, send);
    }
    let (index, fraction) = select_weighted(&rollout.variations, bucket(&dispatch_key))
        .ok_or(EvalError::EmptyRollout)?;
    let send = send_to_experiment(flag, rollout, &dispatch_key, fraction);
    serve_index(flag, index, reason, send)
}

fn dispatch_key_value(flag: &FeatureFlag, rollout: &Rollout, user: &User) -> String {
    let attribute = rollout.bucket_by.as_deref().unwrap_or(DEFAULT_BUCKET_ATTRIBUTE);
    let attr_value = user.get(attribute).map(|val| val.as_str()).unwrap_or_default();
    let salt = rollout.salt.as_deref().unwrap_or_default();
    format!("{}{}{}", flag.key, salt, attr_value)
}

fn send_to_experiment(
    flag: &FeatureFlag,
    rollout: &Rollout,
    dispatch_key: &str,
    weight_fraction: f64,
) -> bool {
    if flag.expt_include_all_targets {
        return true;
    }
    if !rollout.included_in_expt {
        return false;
    }
    let expt_rollout = rollout.expt_rollout.unwrap_or(1.0);
    if expt_rollout <= 0.0 || weight_fraction <= 0.0 {
        return false;
    }
    let upper_bound = (expt_rollout / weight_fraction).min(1.0);
    ratio(&format!("{EXPT_KEY_PREFIX}{dispatch_key}")) < upper_bound
}

fn eval_conditions(
    conditions: &[Condition],
    user: &User,
    segments: &dyn SegmentLookup,
) -> Result<bool, EvalError> {
    for condition in conditions {
        let matched = match condition.op {
            Operator::IsInSegment => in_segment(condition, user, segments)?,
            Operator::NotInSegment => !in_segment(condition, user, segments)?,
            _ => eval_attribute_condition(condition, user)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_segment(
    condition: &Condition,
    user: &User,
    segments: &dyn SegmentLookup,
) -> Result<bool, EvalError> {
    let Some(keys) = condition.values.as_ref() else {
        return Ok(false);
    };
    for key in keys {
        // an absent segment is treated as non-matching, not an error
        if let Some(segment) = segments.resolve_segment(key) {
            if segment_matches(&segment, user)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn segment_matches(segment: &Segment, user: &User) -> Result<bool, EvalError> {
    let user_key = user.key();
    if segment.excluded.iter().any(|key| key == user_key) {
        return Ok(false);
    }
    if segment.included.iter().any(|key| key == user_key) {
        return Ok(true);
    }
    for rule in &segment.rules {
        let mut all = true;
        for condition in &rule.conditions {
            // segment rules cannot reference other segments
            let matched = !condition.op.is_segment_op() && eval_attribute_condition(condition, user)?;
            if !matched {
                all = false;
                break;
            }
        }
        if all && !rule.conditions.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn eval_attribute_condition(condition: &Condition, user: &User) -> Result<bool, EvalError> {
    // a missing attribute never matches
    let Some(attr_value) = user.get(&condition.attribute) else {
        return Ok(false);
    };
    let result = match condition.op {
        Operator::Equal => scalar(condition).map_or(false, |cv| attr_value.as_str() == cv),
        Operator::NotEqual => scalar(condition).map_or(false, |cv| attr_value.as_str() != cv),
        Operator::LessThan
        | Operator::BiggerThan
        | Operator::LessEqualThan
        | Operator::BiggerEqualThan => compare_numbers(condition, attr_value.as_float()),
        Operator::Contains => scalar(condition).map_or(false, |cv| attr_value.as_str().contains(cv)),
        Operator::NotContain => scalar(condition).map_or(false, |cv| !attr_value.as_str().contains(cv)),
        Operator::IsOneOf => list(condition).iter().any(|cv| *cv == attr_value.as_str()),
        Operator::NotOneOf => !list(condition).iter().any(|cv| *cv == attr_value.as_str()),
        Operator::StartsWith => {
            scalar(condition).map_or(false, |cv| attr_value.as_str().starts_with(cv))
        }
        Operator::EndsWith => scalar(condition).map_or(false, |cv| attr_value.as_str().ends_with(cv)),
        Operator::IsTrue => attr_value.as_str().eq_ignore_ascii_case("true"),
        Operator::IsFalse => attr_value.as_str().eq_ignore_ascii_case("false"),
        Operator::MatchRegex => match_regex(condition, &attr_value.as_str())?,
        Operator::NotMatchRegex => !match_regex(condition, &attr_value.as_str())?,
        Operator::LessThanSemVer
        | Operator::BiggerThanSemVer
        | Operator::LessEqualThanSemVer
        | Operator::BiggerEqualThanSemVer => compare_semver(condition, &attr_value.as_str()),
        Operator::IsOneOfSemVer => match Version::parse(attr_value.as_str().trim()) {
            Ok(user_version) => list(condition)
                .iter()
                .any(|cv| Version::parse(cv.trim()).map_or(false, |v| v == user_version)),
            Err(_) => false,
        },
        Operator::IsInSegment | Operator::NotInSegment => false,
    };
    Ok(result)
}

fn scalar(condition: &Condition) -> Option<&str> {
    condition.value.as_deref()
}

fn list(condition: &Condition) -> &[String] {
    condition.values.as_deref().unwrap_or_default()
}

fn compare_numbers(condition: &Condition, attr_value: Option<f64>) -> bool {
    let Some(user_val) = attr_value else {
        return false;
    };
    let Some(comp_val) = scalar(condition).and_then(|cv| cv.trim().parse::<f64>().ok()) else {
        return false;
    };
    let user_num = (user_val * NUMERIC_SCALE).round() / NUMERIC_SCALE;
    let comp_num = (comp_val * NUMERIC_SCALE).round() / NUMERIC_SCALE;
    match condition.op {
        Operator::LessThan => user_num < comp_num,
        Operator::BiggerThan => user_num > comp_num,
        Operator::LessEqualThan => user_num <= comp_num,
        Operator::BiggerEqualThan => user_num >= comp_num,
        _ => false,
    }
}

fn compare_semver(condition: &Condition, attr_value: &str) -> bool {
    let Ok(user_version) = Version::parse(attr_value.trim()) else {
        return false;
    };
    // an unparsable comparison value makes the condition non-matching
    let Some(comp_version) = scalar(condition).and_then(|cv| Version::parse(cv.trim()).ok()) else {
        return false;
    };
    match condition.op {
        Operator::LessThanSemVer => user_version < comp_version,
        Operator::BiggerThanSemVer => user_version > comp_version,
        Operator::LessEqualThanSemVer => user_version <= comp_version,
        Operator::BiggerEqualThanSemVer => user_version >= comp_version,
        _ => false,
    }
}

fn match_regex(condition: &Condition, attr_value: &str) -> Result<bool, EvalError> {
    let Some(pattern) = scalar(condition) else {
        return Ok(false);
    };
    let regex = Regex::new(pattern).map_err(|_| EvalError::InvalidRegex(pattern.to_owned()))?;
    Ok(regex.is_match(attr_value))
}
