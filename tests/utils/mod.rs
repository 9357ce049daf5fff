use async_trait::async_trait;
use flagstream::{Client, ConnectorError, MessageStream, StreamingConnector};
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn offline_client() -> Client {
    Client::builder("test-env-secret").offline(true).build().unwrap()
}

pub fn bootstrap(flags: Vec<JsonValue>, segments: Vec<JsonValue>, version: u64) -> String {
    json!({"flags": flags, "segments": segments, "version": version}).to_string()
}

pub fn full_sync_message(flags: Vec<JsonValue>, segments: Vec<JsonValue>, version: u64) -> String {
    json!({
        "messageType": "data-sync",
        "data": {"eventType": "full", "flags": flags, "segments": segments, "version": version}
    })
    .to_string()
}

pub fn patch_message(patches: Vec<JsonValue>) -> String {
    json!({"messageType": "data-sync", "data": {"eventType": "patch", "patches": patches}}).to_string()
}

pub fn flag_upsert(flag: JsonValue) -> JsonValue {
    let key = flag["key"].clone();
    let version = flag["version"].clone();
    json!({"kind": "flag-upsert", "key": key, "flag": flag, "version": version})
}

pub fn segment_upsert(segment: JsonValue) -> JsonValue {
    let key = segment["key"].clone();
    let version = segment["version"].clone();
    json!({"kind": "segment-upsert", "key": key, "segment": segment, "version": version})
}

/// `beta-ui`: one rule `country == "US"` serving `on`, fallthrough `off`.
/// `serve` picks the variation index the rule serves.
pub fn beta_ui_flag(version: u64, serve: usize) -> JsonValue {
    json!({
        "key": "beta-ui",
        "name": "Beta UI",
        "isEnabled": true,
        "variationType": 1,
        "variations": [{"value": "on"}, {"value": "off"}],
        "disabledVariation": 1,
        "rules": [{
            "conditions": [{"attribute": "country", "op": "Equal", "value": "US"}],
            "serve": {"variation": serve}
        }],
        "fallthrough": {"variation": 1},
        "version": version
    })
}

/// `discount`: no rules, 50/50 percentage rollout across `A`/`B`.
pub fn discount_flag(version: u64) -> JsonValue {
    json!({
        "key": "discount",
        "isEnabled": true,
        "variationType": 1,
        "variations": [{"value": "A"}, {"value": "B"}],
        "disabledVariation": 0,
        "fallthrough": {"variations": [
            {"variation": 0, "weight": 50.0},
            {"variation": 1, "weight": 50.0}
        ]},
        "version": version
    })
}

/// `vip-banner`: serves `on` to members of the `vips` segment, `off` otherwise.
pub fn vip_banner_flag(version: u64) -> JsonValue {
    json!({
        "key": "vip-banner",
        "isEnabled": true,
        "variationType": 1,
        "variations": [{"value": "on"}, {"value": "off"}],
        "disabledVariation": 1,
        "rules": [{
            "conditions": [{"op": "IsInSegment", "values": ["vips"]}],
            "serve": {"variation": 0}
        }],
        "fallthrough": {"variation": 1},
        "version": version
    })
}

pub fn vips_segment(version: u64, included: Vec<&str>) -> JsonValue {
    json!({
        "key": "vips",
        "included": included,
        "excluded": [],
        "rules": [],
        "version": version
    })
}

pub async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

/// A scripted transport double: each `connect` call plays the next session from
/// the queue, and an exhausted queue fails with a network error.
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<SessionScript>>,
}

pub enum SessionScript {
    Rejected(String),
    Failed(String),
    Stream {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: mpsc::UnboundedSender<String>,
    },
}

/// The test-side handle of a scripted stream session: push server messages with
/// `server_tx`, observe client messages on `client_rx`.
pub struct SessionHandle {
    pub server_tx: mpsc::UnboundedSender<String>,
    pub client_rx: mpsc::UnboundedReceiver<String>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<SessionScript>) -> Self {
        Self { sessions: Mutex::new(sessions.into_iter().collect()) }
    }

    pub fn stream_session() -> (SessionScript, SessionHandle) {
        let (server_tx, incoming) = mpsc::unbounded_channel();
        let (sent, client_rx) = mpsc::unbounded_channel();
        (SessionScript::Stream { incoming, sent }, SessionHandle { server_tx, client_rx })
    }
}

#[async_trait]
impl StreamingConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, ConnectorError> {
        let next = self.sessions.lock().unwrap().pop_front();
        match next {
            Some(SessionScript::Rejected(message)) => Err(ConnectorError::Rejected(message)),
            Some(SessionScript::Failed(message)) => Err(ConnectorError::Network(message)),
            Some(SessionScript::Stream { incoming, sent }) => {
                Ok(Box::new(ScriptedStream { incoming, sent }))
            }
            None => Err(ConnectorError::Network("no scripted session left".to_owned())),
        }
    }
}

struct ScriptedStream {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn send(&mut self, text: &str) -> Result<(), ConnectorError> {
        let _ = self.sent.send(text.to_owned());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<String>, ConnectorError> {
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) {}
}
