use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Failure label: the connection was lost due to a network error.
pub const NETWORK_ERROR: &str = "Network error";
/// Failure label: the websocket layer reported an error.
pub const WEBSOCKET_ERROR: &str = "WebSocket error";
/// Failure label: the server rejected the connection request.
pub const REQUEST_INVALID_ERROR: &str = "Request invalid";
/// Failure label: a received payload could not be parsed.
pub const DATA_INVALID_ERROR: &str = "Received Data invalid";
/// Failure label: the server closed the connection with an unknown close code.
pub const UNKNOWN_CLOSE_CODE: &str = "Unknown close code";

/// Lifecycle states of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    /// The initial state while the SDK is being initialized. Recoverable errors
    /// before the first successful sync keep the state at `Initializing`.
    Initializing,
    /// The streaming connection is open and at least one sync message has been
    /// applied since the last (re)connect.
    Ok,
    /// The connection failed or was dropped; a reconnect is scheduled after a
    /// backoff delay.
    Interrupted,
    /// The synchronizer shut down permanently, either by an explicit stop or an
    /// unrecoverable error. No reconnection follows.
    Off,
}

/// Details of the failure that caused a state transition.
#[derive(Debug, Clone)]
pub struct ErrorTrack {
    /// Short label classifying the failure.
    pub error_type: String,
    /// Human-readable failure message.
    pub message: String,
}

/// A synchronizer state snapshot.
#[derive(Debug, Clone)]
pub struct State {
    state_type: StateType,
    state_since: DateTime<Utc>,
    error: Option<ErrorTrack>,
}

impl State {
    pub(crate) fn initializing() -> Self {
        Self { state_type: StateType::Initializing, state_since: Utc::now(), error: None }
    }

    pub(crate) fn ok() -> Self {
        Self { state_type: StateType::Ok, state_since: Utc::now(), error: None }
    }

    pub(crate) fn interrupted(error_type: &str, message: String) -> Self {
        Self {
            state_type: StateType::Interrupted,
            state_since: Utc::now(),
            error: Some(ErrorTrack { error_type: error_type.to_owned(), message }),
        }
    }

    pub(crate) fn normal_off() -> Self {
        Self { state_type: StateType::Off, state_since: Utc::now(), error: None }
    }

    pub(crate) fn error_off(error_type: &str, message: String) -> Self {
        Self {
            state_type: StateType::Off,
            state_since: Utc::now(),
            error: Some(ErrorTrack { error_type: error_type.to_owned(), message }),
        }
    }

    /// The state's type.
    pub fn state_type(&self) -> StateType {
        self.state_type
    }

    /// When the synchronizer entered this state.
    pub fn state_since(&self) -> DateTime<Utc> {
        self.state_since
    }

    /// The failure that caused the transition, if any.
    pub fn error(&self) -> Option<&ErrorTrack> {
        self.error.as_ref()
    }
}

pub(crate) struct StatusProvider {
    tx: watch::Sender<State>,
}

impl StatusProvider {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(State::initializing());
        Self { tx }
    }

    pub fn current(&self) -> State {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.tx.subscribe()
    }

    pub fn update(&self, new_state: State) {
        self.tx.send_modify(|current| {
            let mut new_type = new_state.state_type;
            // Interrupted is only meaningful after a successful startup
            if new_type == StateType::Interrupted && current.state_type == StateType::Initializing {
                new_type = StateType::Initializing;
            }
            if new_type != current.state_type || new_state.error.is_some() {
                let state_since = if new_type != current.state_type {
                    Utc::now()
                } else {
                    current.state_since
                };
                *current = State { state_type: new_type, state_since, error: new_state.error };
            }
        });
    }

    /// Resolves with `true` once the synchronizer reaches `Ok`, or with `false`
    /// as soon as it reaches `Off`; never deadlocks on an already closed provider.
    pub async fn wait_for_ok(&self) -> bool {
        let mut rx = self.subscribe();
        loop {
            let state_type = rx.borrow_and_update().state_type;
            match state_type {
                StateType::Ok => return true,
                StateType::Off => return false,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}
