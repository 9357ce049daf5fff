use crate::model::message::{
    envelope_from_json, ping_message, sync_data_from_value, sync_request, ParseError, SyncData,
    MESSAGE_TYPE_DATA_SYNC,
};
use crate::store::DataStore;
use crate::sync::backoff::BackoffStrategy;
use crate::sync::connector::{ConnectorError, MessageStream, StreamingConnector};
use crate::sync::status::{
    State, StatusProvider, DATA_INVALID_ERROR, NETWORK_ERROR, REQUEST_INVALID_ERROR,
    UNKNOWN_CLOSE_CODE, WEBSOCKET_ERROR,
};
use log::{debug, warn};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PING_INTERVAL: Duration = Duration::from_secs(10);

enum StreamOutcome {
    Cancelled,
    Rejected(String),
    InvalidData(String),
    Dropped(State),
}

/// Drives the persistent streaming connection: requests a sync on connect,
/// applies received full-sync and patch messages to the store, reports status
/// transitions, and reconnects with backoff until stopped.
pub(crate) struct Synchronizer {
    cancellation_token: CancellationToken,
    status: Arc<StatusProvider>,
    close: Once,
}

impl Synchronizer {
    pub fn start(
        connector: Arc<dyn StreamingConnector>,
        store: Arc<DataStore>,
        status: Arc<StatusProvider>,
        first_retry_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();
        let task_status = Arc::clone(&status);
        let backoff = BackoffStrategy::new(first_retry_delay, max_retry_delay);
        tokio::spawn(async move {
            run(connector, store, task_status, backoff, token).await;
        });
        Self { cancellation_token, status, close: Once::new() }
    }

    /// Closes the connection, cancels any pending reconnect, and prevents
    /// further state transitions. Idempotent.
    pub fn stop(&self) {
        self.close.call_once(|| {
            self.cancellation_token.cancel();
            self.status.update(State::normal_off());
        });
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    connector: Arc<dyn StreamingConnector>,
    store: Arc<DataStore>,
    status: Arc<StatusProvider>,
    mut backoff: BackoffStrategy,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        match connector.connect().await {
            Ok(mut stream) => {
                debug!("streaming connection established");
                backoff.record_good_run();
                let request = sync_request(store.latest_version());
                match stream.send(&request).await {
                    Ok(()) => match process_stream(stream.as_mut(), &store, &status, &token).await {
                        StreamOutcome::Cancelled => {
                            stream.close().await;
                            break;
                        }
                        StreamOutcome::Rejected(message) => {
                            warn!("streaming connection rejected: {message}");
                            stream.close().await;
                            status.update(State::error_off(REQUEST_INVALID_ERROR, message));
                            return;
                        }
                        StreamOutcome::InvalidData(message) => {
                            warn!("discarding streaming connection, received invalid data: {message}");
                            stream.close().await;
                            status.update(State::error_off(DATA_INVALID_ERROR, message));
                            return;
                        }
                        StreamOutcome::Dropped(state) => {
                            stream.close().await;
                            status.update(state);
                        }
                    },
                    Err(ConnectorError::Rejected(message)) => {
                        status.update(State::error_off(REQUEST_INVALID_ERROR, message));
                        return;
                    }
                    Err(err) => status.update(State::interrupted(NETWORK_ERROR, err.to_string())),
                }
            }
            Err(ConnectorError::Rejected(message)) => {
                warn!("streaming connection rejected: {message}");
                status.update(State::error_off(REQUEST_INVALID_ERROR, message));
                return;
            }
            Err(err) => {
                warn!("streaming connection failed: {err}");
                status.update(State::interrupted(NETWORK_ERROR, err.to_string()));
            }
        }
        let delay = backoff.next_delay();
        debug!("streaming reconnect in {delay:?}");
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    status.update(State::normal_off());
}

async fn process_stream(
    stream: &mut dyn MessageStream,
    store: &DataStore,
    status: &StatusProvider,
    token: &CancellationToken,
) -> StreamOutcome {
    loop {
        let received = tokio::select! {
            _ = token.cancelled() => return StreamOutcome::Cancelled,
            received = tokio::time::timeout(PING_INTERVAL, stream.next_message()) => received,
        };
        match received {
            // idle connection, send a keepalive
            Err(_) => {
                if let Err(err) = stream.send(&ping_message()).await {
                    return StreamOutcome::Dropped(State::interrupted(NETWORK_ERROR, err.to_string()));
                }
            }
            Ok(Ok(Some(text))) => {
                if let Err(err) = handle_message(&text, store, status) {
                    return StreamOutcome::InvalidData(err.to_string());
                }
            }
            Ok(Ok(None)) => {
                return StreamOutcome::Dropped(State::interrupted(
                    UNKNOWN_CLOSE_CODE,
                    "connection closed by the server".to_owned(),
                ))
            }
            Ok(Err(ConnectorError::Rejected(message))) => return StreamOutcome::Rejected(message),
            Ok(Err(err)) => {
                return StreamOutcome::Dropped(State::interrupted(WEBSOCKET_ERROR, err.to_string()))
            }
        }
    }
}

fn handle_message(text: &str, store: &DataStore, status: &StatusProvider) -> Result<(), ParseError> {
    let envelope = envelope_from_json(text)?;
    if envelope.message_type != MESSAGE_TYPE_DATA_SYNC {
        return Ok(());
    }
    let Some(data) = envelope.data else {
        return Ok(());
    };
    match sync_data_from_value(data)? {
        SyncData::Full(full) => {
            let version = full.version;
            let flag_count = full.flags.len();
            if store.apply_full_sync(full) {
                debug!("full sync applied at version {version} ({flag_count} flags)");
            } else {
                debug!("stale full sync at version {version} discarded");
            }
        }
        SyncData::Patch(mut set) => {
            set.patches.sort_by_key(|patch| patch.version);
            for patch in set.patches {
                let key = patch.key.clone();
                if store.apply_patch(patch) {
                    debug!("patch applied for '{key}'");
                } else {
                    debug!("stale patch for '{key}' discarded");
                }
            }
        }
    }
    status.update(State::ok());
    Ok(())
}
