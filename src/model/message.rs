use crate::model::enums::PatchKind;
use crate::model::flag::FeatureFlag;
use crate::model::segment::Segment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) const MESSAGE_TYPE_DATA_SYNC: &str = "data-sync";
pub(crate) const MESSAGE_TYPE_PING: &str = "ping";

/// Errors reported while parsing sync or bootstrap payloads.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The payload is not valid JSON or does not have the expected shape.
    #[error("JSON parsing failed. ({0})")]
    Parse(String),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub message_type: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub(crate) enum SyncData {
    Full(FullSync),
    Patch(PatchSet),
}

/// A complete snapshot of all flags and segments.
///
/// This is the shape of a full-sync message's `data` object and of the externally
/// supplied offline bootstrap payload.
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct FullSync {
    /// All flag definitions of the environment.
    #[serde(default)]
    pub flags: Vec<FeatureFlag>,
    /// All segment definitions of the environment.
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// The snapshot's version; snapshots at or below the store's current version are discarded.
    pub version: u64,
}

/// A single-item incremental update (upsert or delete) with a version number.
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PatchItem {
    /// What kind of item the patch touches and whether it is an upsert or a delete.
    pub kind: PatchKind,
    /// Key of the patched item.
    pub key: String,
    /// The new flag definition; present for flag upserts.
    #[serde(default)]
    pub flag: Option<FeatureFlag>,
    /// The new segment definition; present for segment upserts.
    #[serde(default)]
    pub segment: Option<Segment>,
    /// The patch's version; patches at or below the stored item's version are discarded.
    pub version: u64,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PatchSet {
    pub patches: Vec<PatchItem>,
}

pub(crate) fn envelope_from_json(json: &str) -> Result<Envelope, ParseError> {
    serde_json::from_str(json).map_err(|err| ParseError::Parse(err.to_string()))
}

pub(crate) fn sync_data_from_value(data: serde_json::Value) -> Result<SyncData, ParseError> {
    serde_json::from_value(data).map_err(|err| ParseError::Parse(err.to_string()))
}

/// Parses an externally supplied full-sync payload used for offline bootstrap.
///
/// The payload has the same shape as a full-sync message's `data` object.
pub fn bootstrap_from_json(json: &str) -> Result<FullSync, ParseError> {
    serde_json::from_str(json).map_err(|err| ParseError::Parse(err.to_string()))
}

pub(crate) fn sync_request(version: u64) -> String {
    serde_json::json!({"messageType": MESSAGE_TYPE_DATA_SYNC, "data": {"version": version}}).to_string()
}

pub(crate) fn ping_message() -> String {
    serde_json::json!({"messageType": MESSAGE_TYPE_PING, "data": null}).to_string()
}
