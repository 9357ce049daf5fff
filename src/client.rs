use crate::errors::{ClientError, ErrorKind};
use crate::eval::details::EvaluationDetail;
use crate::eval::evaluator::{evaluate, EvalResult};
use crate::events::processor::{DefaultEventProcessor, EventProcessor, NullEventProcessor};
use crate::events::types::{
    Event, FlagEvent, FlagEventVariation, MetricEvent, MetricRecord, UserEvent, VariationRecord,
};
use crate::model::flag::FeatureFlag;
use crate::model::message::bootstrap_from_json;
use crate::options::{ClientBuilder, Options};
use crate::store::DataStore;
use crate::sync::connector::{StreamingConnector, WsConnector};
use crate::sync::status::{State, StatusProvider};
use crate::sync::streaming::Synchronizer;
use crate::tracker::{EvalFn, FlagTracker};
use crate::user::User;
use crate::utils;
use crate::value::{Value, ValuePrimitive};
use log::{error, info, warn};
use std::any::type_name;
use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// The main component for evaluating feature flags.
///
/// Applications should instantiate a single client per environment for their
/// whole lifetime; see [`crate::registry`] for an opt-in shared registry. Client
/// instances are thread-safe, and evaluation never blocks or performs I/O.
///
/// # Examples
///
/// ```no_run
/// use flagstream::{Client, User};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::builder("env-secret")
///         .streaming_url("wss://stream.flagstream.io")
///         .event_url("https://events.flagstream.io")
///         .build()
///         .unwrap();
///     client.wait_for_ready(Duration::from_secs(15)).await.unwrap();
///
///     let user = User::new("u-123", "Jane").custom("country", "US");
///     let enabled = client.variation("beta-ui", &user, false);
/// }
/// ```
pub struct Client {
    options: Arc<Options>,
    store: Arc<DataStore>,
    status: Arc<StatusProvider>,
    synchronizer: Option<Synchronizer>,
    events: Arc<dyn EventProcessor>,
    tracker: FlagTracker,
    tracker_token: CancellationToken,
    close: Once,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new [`ClientBuilder`] used to build a [`Client`].
    pub fn builder(env_secret: &str) -> ClientBuilder {
        ClientBuilder::new(env_secret)
    }

    /// Creates a new [`Client`] with default options.
    ///
    /// # Errors
    ///
    /// This method fails if the environment secret or one of the URLs is invalid.
    pub fn new(env_secret: &str, streaming_url: &str, event_url: &str) -> Result<Self, ClientError> {
        ClientBuilder::new(env_secret)
            .streaming_url(streaming_url)
            .event_url(event_url)
            .build()
    }

    pub(crate) fn with_options(options: Options) -> Result<Self, ClientError> {
        let options = Arc::new(options);
        let store = Arc::new(DataStore::new());
        let status = Arc::new(StatusProvider::new());

        let events: Arc<dyn EventProcessor> = match options.event_processor() {
            Some(custom) => Arc::clone(custom),
            None if options.offline() => Arc::new(NullEventProcessor),
            None => Arc::new(DefaultEventProcessor::new(
                options.events_uri(),
                options.env_secret().to_owned(),
                options.http_timeout(),
                options.events_max_in_queue(),
                options.events_flush_interval(),
                options.events_retry_interval(),
                options.events_max_retries(),
            )?),
        };

        let eval_store = Arc::clone(&store);
        let eval_fn: EvalFn = Arc::new(move |key, user| {
            let flag = eval_store.flag(key)?;
            evaluate(&flag, user, &*eval_store).ok().map(|result| result.value)
        });
        let tracker = FlagTracker::new(Arc::clone(&store), eval_fn);
        let tracker_token = CancellationToken::new();

        let synchronizer = if options.offline() {
            info!("FlagStream client starts in offline mode");
            None
        } else {
            tracker.start(store.subscribe(), status.subscribe(), tracker_token.clone());
            let connector: Arc<dyn StreamingConnector> = match options.connector() {
                Some(custom) => Arc::clone(custom),
                None => Arc::new(WsConnector::new(
                    options.streaming_uri(),
                    options.env_secret().to_owned(),
                    options.connect_timeout(),
                )),
            };
            Some(Synchronizer::start(
                connector,
                Arc::clone(&store),
                Arc::clone(&status),
                options.first_retry_delay(),
                options.max_retry_delay(),
            ))
        };

        Ok(Self {
            options,
            store,
            status,
            synchronizer,
            events,
            tracker,
            tracker_token,
            close: Once::new(),
        })
    }

    /// Returns true once the client holds a complete flag set, populated by the
    /// first full sync or by an offline bootstrap.
    ///
    /// While this returns false, evaluations resolve to the caller-supplied defaults.
    pub fn is_initialized(&self) -> bool {
        self.store.initialized()
    }

    /// Returns true if the client is in offline mode.
    pub fn is_offline(&self) -> bool {
        self.options.offline()
    }

    /// The synchronizer's current state, for health checks.
    pub fn sync_status(&self) -> State {
        self.status.current()
    }

    /// Asynchronously waits for the client initialization for a maximum duration
    /// specified in `wait_timeout`.
    ///
    /// # Errors
    ///
    /// This method fails if the synchronizer shut down before the first
    /// successful sync, or if the initialization takes more time than the
    /// specified `wait_timeout`.
    pub async fn wait_for_ready(&self, wait_timeout: Duration) -> Result<(), ClientError> {
        match timeout(wait_timeout, self.status.wait_for_ok()).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let err = ClientError::new(
                    ErrorKind::InitializationFailed,
                    "client initialization failed; the synchronizer shut down before the first successful sync".to_owned(),
                );
                warn!(event_id = err.kind.code(); "{}", err);
                Err(err)
            }
            Err(_) => {
                let err = ClientError::new(
                    ErrorKind::ClientInitTimedOut,
                    format!("client initialization timed out after {}s", wait_timeout.as_secs()),
                );
                warn!(event_id = err.kind.code(); "{}", err);
                Err(err)
            }
        }
    }

    /// Returns the variation of a feature flag for the given user.
    ///
    /// Returns `default` (or the flag's configured default value, if one was set
    /// on the builder) if the flag doesn't exist or an error occurs during the
    /// evaluation; no failure ever escapes to the caller.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use flagstream::{Client, User};
    /// # fn demo(client: &Client) {
    /// let user = User::new("u-123", "Jane");
    /// let enabled = client.variation("beta-ui", &user, false);
    /// # }
    /// ```
    pub fn variation<T: ValuePrimitive + Clone>(&self, key: &str, user: &User, default: T) -> T {
        self.variation_detail(key, user, default).value
    }

    /// The same as [`Client::variation`] but returns an [`EvaluationDetail`] that
    /// contains additional information about the result of the evaluation.
    pub fn variation_detail<T: ValuePrimitive + Clone>(
        &self,
        key: &str,
        user: &User,
        default: T,
    ) -> EvaluationDetail<T> {
        match self.evaluate_internal(key, user) {
            Ok((result, flag)) => match T::from_value(&result.value) {
                Some(value) => EvaluationDetail {
                    value,
                    key: key.to_owned(),
                    reason: result.reason.to_owned(),
                    variation_index: Some(result.variation_index),
                    flag_version: Some(flag.version),
                    is_default_value: false,
                    error: None,
                },
                None => {
                    let err = ClientError::new(
                        ErrorKind::FlagValueTypeMismatch,
                        format!(
                            "the type of flag '{key}' is '{}' but the requested type is '{}'",
                            flag.variation_type,
                            type_name::<T>()
                        ),
                    );
                    error!(event_id = err.kind.code(); "{}", err);
                    EvaluationDetail::from_err(self.resolve_default(key, default), key, err)
                }
            },
            Err(err) => {
                warn!(event_id = err.kind.code(); "{}", err);
                EvaluationDetail::from_err(self.resolve_default(key, default), key, err)
            }
        }
    }

    /// Evaluates a feature flag without a caller-supplied default.
    ///
    /// Returns an [`EvaluationDetail`] holding the evaluated value in a [`Value`]
    /// variant, or [`None`] with an error if the evaluation failed.
    pub fn flag_detail(&self, key: &str, user: &User) -> EvaluationDetail<Option<Value>> {
        match self.evaluate_internal(key, user) {
            Ok((result, flag)) => EvaluationDetail {
                value: Some(result.value),
                key: key.to_owned(),
                reason: result.reason.to_owned(),
                variation_index: Some(result.variation_index),
                flag_version: Some(flag.version),
                is_default_value: false,
                error: None,
            },
            Err(err) => {
                warn!(event_id = err.kind.code(); "{}", err);
                EvaluationDetail::from_err(self.options.default_value(key).cloned(), key, err)
            }
        }
    }

    /// Evaluates all feature flags for the given user.
    ///
    /// Returns a mapping of flag key to [`EvaluationDetail`]; an evaluation event
    /// is enqueued for every successfully evaluated flag.
    pub fn get_all_latest_flag_variations(
        &self,
        user: &User,
    ) -> HashMap<String, EvaluationDetail<Option<Value>>> {
        let flags = self.store.all_flags();
        let mut result = HashMap::with_capacity(flags.len());
        for flag in flags {
            let detail = self.flag_detail(&flag.key, user);
            result.insert(flag.key.clone(), detail);
        }
        result
    }

    /// Returns the keys of all stored feature flags.
    pub fn get_all_keys(&self) -> Vec<String> {
        self.store.all_flag_keys()
    }

    /// Checks whether a flag with the given key exists in the environment.
    pub fn is_flag_known(&self, key: &str) -> bool {
        self.is_initialized() && self.store.flag(key).is_some()
    }

    /// The registry used to track changes in feature flag configurations.
    pub fn flag_tracker(&self) -> &FlagTracker {
        &self.tracker
    }

    /// Registers an end user in the flag management service.
    pub fn identify(&self, user: &User) {
        if !user.is_valid() {
            warn!("user is invalid, ignoring identify");
            return;
        }
        self.events.send(Event::User(UserEvent { user: user.clone() }));
    }

    /// Tracks that a user performed a metric event, e.g. a conversion goal of an
    /// experiment. Events with an empty name or a non-positive value are ignored.
    pub fn track_metric(&self, user: &User, event_name: &str, metric_value: f64) {
        if event_name.is_empty() || metric_value <= 0.0 {
            warn!("metric event is invalid, ignoring");
            return;
        }
        if !user.is_valid() {
            warn!("user is invalid, ignoring metric event");
            return;
        }
        self.events.send(Event::Metric(MetricEvent {
            user: user.clone(),
            metrics: vec![MetricRecord::new(event_name, metric_value)],
        }));
    }

    /// Tracks that a user performed a map of metric events; invalid entries are skipped.
    pub fn track_metrics(&self, user: &User, metrics: HashMap<String, f64>) {
        if !user.is_valid() {
            warn!("user is invalid, ignoring metric events");
            return;
        }
        let records: Vec<MetricRecord> = metrics
            .iter()
            .filter(|(name, value)| !name.is_empty() && **value > 0.0)
            .map(|(name, value)| MetricRecord::new(name, *value))
            .collect();
        if records.is_empty() {
            return;
        }
        self.events.send(Event::Metric(MetricEvent { user: user.clone(), metrics: records }));
    }

    /// Flushes all pending analytics events.
    ///
    /// Delivery still happens asynchronously; this method returns immediately.
    pub fn flush(&self) {
        self.events.flush();
    }

    /// Populates the store from an externally supplied full-sync payload,
    /// enabling deterministic evaluation without any network dependency.
    ///
    /// Returns whether the snapshot was applied; snapshots at or below the
    /// store's current version are discarded.
    ///
    /// # Errors
    ///
    /// This method fails if the client is not in offline mode or the payload
    /// cannot be parsed.
    pub fn initialize_from_external_json(&self, json: &str) -> Result<bool, ClientError> {
        if !self.is_offline() {
            let err = ClientError::new(
                ErrorKind::OnlineClient,
                "bootstrap payloads are only accepted in offline mode".to_owned(),
            );
            warn!(event_id = err.kind.code(); "{}", err);
            return Err(err);
        }
        let data = bootstrap_from_json(json).map_err(|parse_err| {
            ClientError::new(ErrorKind::InvalidBootstrapPayload, parse_err.to_string())
        })?;
        let applied = self.store.apply_full_sync(data);
        if applied {
            self.status.update(State::ok());
        }
        Ok(applied)
    }

    /// Releases all tasks and network connections used by the SDK. Idempotent.
    ///
    /// Later evaluation calls keep serving from whatever store state existed at
    /// stop time; no further updates are applied.
    pub fn stop(&self) {
        self.close.call_once(|| {
            info!("FlagStream client is closing");
            if let Some(synchronizer) = &self.synchronizer {
                synchronizer.stop();
            } else {
                self.status.update(State::normal_off());
            }
            self.tracker_token.cancel();
            self.events.stop();
            self.store.stop();
        });
    }

    fn evaluate_internal(
        &self,
        key: &str,
        user: &User,
    ) -> Result<(EvalResult, Arc<FeatureFlag>), ClientError> {
        if !self.is_initialized() {
            return Err(ClientError::new(
                ErrorKind::ClientNotReady,
                format!("evaluation of flag '{key}' was called before the client initialization completed; returning the default value"),
            ));
        }
        if key.is_empty() {
            return Err(ClientError::new(
                ErrorKind::FlagNotFound,
                "empty feature flag key; returning the default value".to_owned(),
            ));
        }
        let flag = self.store.flag(key).ok_or_else(|| {
            ClientError::new(
                ErrorKind::FlagNotFound,
                format!("unknown feature flag '{key}'; returning the default value"),
            )
        })?;
        if !user.is_valid() {
            return Err(ClientError::new(
                ErrorKind::UserNotSpecified,
                format!("the user evaluating flag '{key}' has no valid key or name; returning the default value"),
            ));
        }
        match evaluate(&flag, user, &*self.store) {
            Ok(result) => {
                self.record_evaluation(key, user, &result);
                Ok((result, flag))
            }
            Err(eval_err) => Err(ClientError::new(
                ErrorKind::EvaluationFailure,
                format!("failed to evaluate flag '{key}' ({eval_err}); returning the default value"),
            )),
        }
    }

    fn record_evaluation(&self, key: &str, user: &User, result: &EvalResult) {
        let mut event = FlagEvent { user: user.clone(), variations: Vec::with_capacity(1) };
        event.variations.push(FlagEventVariation {
            feature_flag_key: key.to_owned(),
            send_to_experiment: result.send_to_experiment,
            timestamp: utils::unix_timestamp_millis(),
            variation: VariationRecord {
                index: result.variation_index,
                value: result.value.clone(),
                reason: result.reason.to_owned(),
            },
        });
        self.events.send(Event::Flag(event));
    }

    fn resolve_default<T: ValuePrimitive + Clone>(&self, key: &str, fallback: T) -> T {
        self.options
            .default_value(key)
            .and_then(T::from_value)
            .unwrap_or(fallback)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}
