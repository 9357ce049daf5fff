/// The version of the SDK package.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const STREAMING_PATH: &str = "/streaming";
pub(crate) const EVENTS_PATH: &str = "/api/public/insight/track";
pub(crate) const SDK_USER_AGENT: &str = "flagstream-rust-server-sdk";
