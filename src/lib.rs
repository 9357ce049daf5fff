//! FlagStream SDK for Rust.

#![warn(missing_docs)]

#[macro_use]
mod macros;
mod client;
mod constants;
mod errors;
mod eval;
mod events;
mod model;
mod options;
pub mod registry;
mod store;
mod sync;
mod tracker;
mod user;
mod utils;
mod value;

pub use client::Client;
pub use constants::PKG_VERSION;
pub use errors::{ClientError, ErrorKind};

pub use eval::details::{
    EvaluationDetail, REASON_CLIENT_NOT_READY, REASON_ERROR, REASON_FALLTHROUGH,
    REASON_FLAG_NOT_FOUND, REASON_FLAG_OFF, REASON_RULE_MATCH, REASON_TARGET_MATCH,
    REASON_USER_NOT_SPECIFIED, REASON_WRONG_TYPE,
};

pub use events::processor::EventProcessor;
pub use events::types::{
    Event, FlagEvent, FlagEventVariation, MetricEvent, MetricRecord, UserEvent, VariationRecord,
};

pub use model::enums::{ChangeKind, DataKind, Operator, PatchKind, VariationType};
pub use model::flag::{
    Condition, FeatureFlag, Rollout, Target, TargetingRule, Variation, WeightedVariation,
};
pub use model::message::{bootstrap_from_json, FullSync, ParseError, PatchItem};
pub use model::segment::{MatchRule, Segment};

pub use options::{ClientBuilder, Options};
pub use store::{ChangeNotice, DataStore, SegmentLookup};

pub use sync::connector::{ConnectorError, MessageStream, StreamingConnector};
pub use sync::status::{
    ErrorTrack, State, StateType, DATA_INVALID_ERROR, NETWORK_ERROR, REQUEST_INVALID_ERROR,
    UNKNOWN_CLOSE_CODE, WEBSOCKET_ERROR,
};

pub use tracker::{FlagChange, FlagTracker, ListenerHandle};
pub use user::{User, UserValue};
pub use value::{Value, ValuePrimitive};
