use crate::constants::{EVENTS_PATH, STREAMING_PATH};
use crate::errors::{ClientError, ErrorKind};
use crate::events::processor::EventProcessor;
use crate::sync::connector::StreamingConnector;
use crate::utils;
use crate::value::Value;
use crate::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_FIRST_RETRY_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_EVENTS_IN_QUEUE: usize = 10_000;
const DEFAULT_EVENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_EVENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_EVENTS_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const MAX_EVENTS_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_EVENTS_MAX_RETRIES: u32 = 1;
const MAX_EVENTS_MAX_RETRIES: u32 = 3;

/// Configuration options for the FlagStream [`Client`].
pub struct Options {
    env_secret: String,
    streaming_url: String,
    event_url: String,
    offline: bool,
    first_retry_delay: Duration,
    max_retry_delay: Duration,
    connect_timeout: Duration,
    http_timeout: Duration,
    events_max_in_queue: usize,
    events_flush_interval: Duration,
    events_retry_interval: Duration,
    events_max_retries: u32,
    defaults: HashMap<String, Value>,
    connector: Option<Arc<dyn StreamingConnector>>,
    event_processor: Option<Arc<dyn EventProcessor>>,
}

impl Options {
    /// Get the environment secret.
    pub fn env_secret(&self) -> &str {
        &self.env_secret
    }

    /// True when the SDK is in offline mode, otherwise false.
    pub fn offline(&self) -> bool {
        self.offline
    }

    /// Get the delay of the first streaming reconnect attempt.
    pub fn first_retry_delay(&self) -> Duration {
        self.first_retry_delay
    }

    /// Get the upper bound of the streaming reconnect delay.
    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Get the streaming connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Get the HTTP request timeout of the event pipeline.
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Get the capacity of the analytics event queue.
    pub fn events_max_in_queue(&self) -> usize {
        self.events_max_in_queue
    }

    /// Get the flush interval of the analytics event pipeline.
    pub fn events_flush_interval(&self) -> Duration {
        self.events_flush_interval
    }

    /// Get the retry interval of failed analytics deliveries.
    pub fn events_retry_interval(&self) -> Duration {
        self.events_retry_interval
    }

    /// Get the retry count of failed analytics deliveries.
    pub fn events_max_retries(&self) -> u32 {
        self.events_max_retries
    }

    /// Get the configured default value of a flag key.
    pub fn default_value(&self, key: &str) -> Option<&Value> {
        self.defaults.get(key)
    }

    pub(crate) fn streaming_uri(&self) -> String {
        format!("{}{STREAMING_PATH}", self.streaming_url.trim_end_matches('/'))
    }

    pub(crate) fn events_uri(&self) -> String {
        format!("{}{EVENTS_PATH}", self.event_url.trim_end_matches('/'))
    }

    pub(crate) fn connector(&self) -> Option<&Arc<dyn StreamingConnector>> {
        self.connector.as_ref()
    }

    pub(crate) fn event_processor(&self) -> Option<&Arc<dyn EventProcessor>> {
        self.event_processor.as_ref()
    }
}

/// Builder to create the [`Client`] with validated [`Options`].
///
/// # Examples
///
/// ```no_run
/// use flagstream::Client;
///
/// #[tokio::main]
/// async fn main() {
///     let client = Client::builder("env-secret")
///         .streaming_url("wss://stream.flagstream.io")
///         .event_url("https://events.flagstream.io")
///         .build()
///         .unwrap();
/// }
/// ```
pub struct ClientBuilder {
    env_secret: String,
    streaming_url: String,
    event_url: String,
    offline: bool,
    first_retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    connect_timeout: Option<Duration>,
    http_timeout: Option<Duration>,
    events_max_in_queue: Option<usize>,
    events_flush_interval: Option<Duration>,
    events_retry_interval: Option<Duration>,
    events_max_retries: Option<u32>,
    defaults: HashMap<String, Value>,
    connector: Option<Arc<dyn StreamingConnector>>,
    event_processor: Option<Arc<dyn EventProcessor>>,
}

impl ClientBuilder {
    pub(crate) fn new(env_secret: &str) -> Self {
        Self {
            env_secret: env_secret.to_owned(),
            streaming_url: String::default(),
            event_url: String::default(),
            offline: false,
            first_retry_delay: None,
            max_retry_delay: None,
            connect_timeout: None,
            http_timeout: None,
            events_max_in_queue: None,
            events_flush_interval: None,
            events_retry_interval: None,
            events_max_retries: None,
            defaults: HashMap::new(),
            connector: None,
            event_processor: None,
        }
    }

    /// Set the websocket URL of the streaming service.
    pub fn streaming_url(mut self, url: &str) -> Self {
        self.streaming_url = url.to_owned();
        self
    }

    /// Set the URL of the analytics event service.
    pub fn event_url(mut self, url: &str) -> Self {
        self.event_url = url.to_owned();
        self
    }

    /// Indicate whether the SDK should be initialized in offline mode or not.
    /// Default value is `false`.
    ///
    /// An offline client opens no network connections; populate it with
    /// [`Client::initialize_from_external_json`].
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Set the delay of the first streaming reconnect attempt.
    /// Default value is `1` second, capped at `60` seconds.
    pub fn first_retry_delay(mut self, delay: Duration) -> Self {
        self.first_retry_delay = Some(delay);
        self
    }

    /// Set the upper bound of the streaming reconnect delay.
    /// Default value is `60` seconds.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Set the streaming connection timeout.
    /// Default value is `5` seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the HTTP request timeout of the event pipeline.
    /// Default value is `10` seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Set the capacity of the analytics event queue.
    /// Default value is `10000`, which is also the lower bound.
    pub fn events_max_in_queue(mut self, capacity: usize) -> Self {
        self.events_max_in_queue = Some(capacity);
        self
    }

    /// Set the flush interval of the analytics event pipeline.
    /// Default value is `1` second, capped at `3` seconds.
    pub fn events_flush_interval(mut self, interval: Duration) -> Self {
        self.events_flush_interval = Some(interval);
        self
    }

    /// Set the retry interval of failed analytics deliveries.
    /// Default value is `100` milliseconds, capped at `1` second.
    pub fn events_retry_interval(mut self, interval: Duration) -> Self {
        self.events_retry_interval = Some(interval);
        self
    }

    /// Set the retry count of failed analytics deliveries.
    /// Default value is `1`, capped at `3`.
    pub fn events_max_retries(mut self, retries: u32) -> Self {
        self.events_max_retries = Some(retries);
        self
    }

    /// Set a default value returned for `key` when its evaluation falls back,
    /// taking precedence over the default passed at the call site.
    pub fn default_value<T: Into<Value>>(mut self, key: &str, value: T) -> Self {
        self.defaults.insert(key.to_owned(), value.into());
        self
    }

    /// Replace the built-in websocket transport of the synchronizer.
    pub fn streaming_connector(mut self, connector: Arc<dyn StreamingConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the built-in analytics event pipeline.
    pub fn event_processor(mut self, event_processor: Arc<dyn EventProcessor>) -> Self {
        self.event_processor = Some(event_processor);
        self
    }

    /// Create the [`Client`] from the configuration made on the builder.
    ///
    /// # Errors
    ///
    /// This method fails if the environment secret is empty or not ASCII, or if
    /// an online client's streaming/event URL is missing or malformed.
    pub fn build(self) -> Result<Client, ClientError> {
        if self.env_secret.trim().is_empty() || !self.env_secret.chars().all(|ch| ch.is_ascii()) {
            return Err(ClientError::new(
                ErrorKind::InvalidEnvSecret,
                "the environment secret must be a non-empty ASCII string".to_owned(),
            ));
        }
        if !self.offline {
            if self.connector.is_none() {
                validate_url(&self.streaming_url, &["ws", "wss"])?;
            }
            if self.event_processor.is_none() {
                validate_url(&self.event_url, &["http", "https"])?;
            }
        }
        Client::with_options(self.build_options())
    }

    pub(crate) fn build_options(self) -> Options {
        Options {
            env_secret: self.env_secret,
            streaming_url: self.streaming_url,
            event_url: self.event_url,
            offline: self.offline,
            first_retry_delay: clamp(
                self.first_retry_delay,
                DEFAULT_FIRST_RETRY_DELAY,
                MAX_FIRST_RETRY_DELAY,
            ),
            max_retry_delay: self.max_retry_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            http_timeout: self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT),
            events_max_in_queue: self
                .events_max_in_queue
                .unwrap_or(MIN_EVENTS_IN_QUEUE)
                .max(MIN_EVENTS_IN_QUEUE),
            events_flush_interval: clamp(
                self.events_flush_interval,
                DEFAULT_EVENTS_FLUSH_INTERVAL,
                MAX_EVENTS_FLUSH_INTERVAL,
            ),
            events_retry_interval: clamp(
                self.events_retry_interval,
                DEFAULT_EVENTS_RETRY_INTERVAL,
                MAX_EVENTS_RETRY_INTERVAL,
            ),
            events_max_retries: self
                .events_max_retries
                .unwrap_or(DEFAULT_EVENTS_MAX_RETRIES)
                .min(MAX_EVENTS_MAX_RETRIES),
            defaults: self.defaults,
            connector: self.connector,
            event_processor: self.event_processor,
        }
    }

    pub(crate) fn identity_key(&self) -> String {
        utils::sha1(
            format!("{}_{}_{}", self.env_secret, self.streaming_url, self.event_url).as_str(),
        )
    }
}

// zero and unset both fall back to the default; everything else is capped
fn clamp(value: Option<Duration>, default: Duration, max: Duration) -> Duration {
    match value {
        None => default,
        Some(value) if value.is_zero() => default,
        Some(value) => value.min(max),
    }
}

fn validate_url(url: &str, schemes: &[&str]) -> Result<(), ClientError> {
    let parsed = reqwest::Url::parse(url).map_err(|err| {
        ClientError::new(ErrorKind::InvalidUrl, format!("URL '{url}' is invalid ({err})"))
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ClientError::new(
            ErrorKind::InvalidUrl,
            format!("URL '{url}' must use one of the schemes {schemes:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod options_tests {
    use super::ClientBuilder;
    use crate::errors::ErrorKind;
    use std::time::Duration;

    #[test]
    fn empty_secret_is_rejected() {
        let err = ClientBuilder::new("").offline(true).build().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidEnvSecret);
    }

    #[test]
    fn non_ascii_secret_is_rejected() {
        let err = ClientBuilder::new("sécret").offline(true).build().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidEnvSecret);
    }

    #[test]
    fn online_client_requires_valid_urls() {
        let err = ClientBuilder::new("secret").build().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidUrl);

        let err = ClientBuilder::new("secret")
            .streaming_url("https://not-a-websocket")
            .event_url("https://events.example.com")
            .build()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidUrl);
    }

    #[test]
    fn tunables_are_clamped() {
        let options = ClientBuilder::new("secret")
            .first_retry_delay(Duration::from_secs(600))
            .events_max_in_queue(10)
            .events_flush_interval(Duration::from_secs(30))
            .events_max_retries(9)
            .build_options();
        assert_eq!(options.first_retry_delay(), Duration::from_secs(60));
        assert_eq!(options.events_max_in_queue(), 10_000);
        assert_eq!(options.events_flush_interval(), Duration::from_secs(3));
        assert_eq!(options.events_max_retries(), 3);
    }

    #[test]
    fn uris_are_derived_from_the_base_urls() {
        let options = ClientBuilder::new("secret")
            .streaming_url("wss://stream.example.com/")
            .event_url("https://events.example.com")
            .build_options();
        assert_eq!(options.streaming_uri(), "wss://stream.example.com/streaming");
        assert_eq!(options.events_uri(), "https://events.example.com/api/public/insight/track");
    }
}
