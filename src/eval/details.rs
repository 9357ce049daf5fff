use crate::errors::{ClientError, ErrorKind};

/// Evaluation reason: the flag is turned off.
pub const REASON_FLAG_OFF: &str = "flag off";
/// Evaluation reason: the user is explicitly targeted.
pub const REASON_TARGET_MATCH: &str = "target match";
/// Evaluation reason: a targeting rule matched.
pub const REASON_RULE_MATCH: &str = "rule match";
/// Evaluation reason: no rule matched, the fallthrough applied.
pub const REASON_FALLTHROUGH: &str = "fall through all rules";
/// Evaluation reason: the flag key was not found in the store.
pub const REASON_FLAG_NOT_FOUND: &str = "flag not found";
/// Evaluation reason: the client has not finished its initialization.
pub const REASON_CLIENT_NOT_READY: &str = "client not ready";
/// Evaluation reason: the given user context has no valid key or name.
pub const REASON_USER_NOT_SPECIFIED: &str = "user not specified";
/// Evaluation reason: the flag value's type does not match the requested type.
pub const REASON_WRONG_TYPE: &str = "wrong type";
/// Evaluation reason: an internal error occurred during the evaluation.
pub const REASON_ERROR: &str = "error in evaluation";

/// Details of a flag evaluation's result.
#[derive(Debug)]
pub struct EvaluationDetail<T> {
    /// The evaluated value, or the caller-supplied default on failure.
    pub value: T,
    /// Key of the evaluated feature flag.
    pub key: String,
    /// The main factor that decided the evaluation result.
    pub reason: String,
    /// Index of the served variation, if a variation was served.
    pub variation_index: Option<usize>,
    /// The flag's version at evaluation time.
    pub flag_version: Option<u64>,
    /// Indicates whether the caller-supplied default value was returned.
    pub is_default_value: bool,
    /// Error in case the evaluation failed.
    pub error: Option<ClientError>,
}

impl<T> EvaluationDetail<T> {
    pub(crate) fn from_err(value: T, key: &str, err: ClientError) -> Self {
        Self {
            value,
            key: key.to_owned(),
            reason: reason_of(&err.kind).to_owned(),
            variation_index: None,
            flag_version: None,
            is_default_value: true,
            error: Some(err),
        }
    }
}

pub(crate) fn reason_of(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ClientNotReady => REASON_CLIENT_NOT_READY,
        ErrorKind::FlagNotFound => REASON_FLAG_NOT_FOUND,
        ErrorKind::UserNotSpecified => REASON_USER_NOT_SPECIFIED,
        ErrorKind::FlagValueTypeMismatch => REASON_WRONG_TYPE,
        _ => REASON_ERROR,
    }
}
