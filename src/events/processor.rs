use crate::constants::SDK_USER_AGENT;
use crate::errors::{ClientError, ErrorKind};
use crate::events::types::Event;
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MAX_BATCH_SIZE: usize = 50;

/// Sink for analytics events.
///
/// The SDK enqueues an evaluation event on every `variation` call and metric/user
/// events through the tracking methods. The built-in implementation batches and
/// ships them to the insight endpoint in the background; offline clients use a
/// no-op implementation. A custom pipeline can be plugged in through
/// [`crate::ClientBuilder::event_processor`].
pub trait EventProcessor: Send + Sync {
    /// Enqueues an event for asynchronous delivery. Never blocks.
    fn send(&self, event: Event);

    /// Schedules the next delivery to happen as soon as possible.
    fn flush(&self);

    /// Delivers pending events and shuts the pipeline down. Idempotent.
    fn stop(&self);
}

enum EventMessage {
    Record(Event),
    Flush,
}

pub(crate) struct DefaultEventProcessor {
    tx: mpsc::Sender<EventMessage>,
    token: CancellationToken,
    close: Once,
}

impl DefaultEventProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events_uri: String,
        env_secret: String,
        http_timeout: Duration,
        queue_capacity: usize,
        flush_interval: Duration,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|err| {
                ClientError::new(
                    ErrorKind::HttpClientInitFailure,
                    format!("HTTP client initialization failed ({err})"),
                )
            })?;
        let (tx, rx) = mpsc::channel(queue_capacity);
        let token = CancellationToken::new();
        tokio::spawn(dispatch_loop(
            client,
            events_uri,
            env_secret,
            rx,
            flush_interval,
            retry_interval,
            max_retries,
            token.clone(),
        ));
        Ok(Self { tx, token, close: Once::new() })
    }
}

impl EventProcessor for DefaultEventProcessor {
    fn send(&self, event: Event) {
        if self.tx.try_send(EventMessage::Record(event)).is_err() {
            // full or closed queue; dropping beats blocking the evaluation path
            warn!("analytics event dropped");
        }
    }

    fn flush(&self) {
        let _ = self.tx.try_send(EventMessage::Flush);
    }

    fn stop(&self) {
        self.close.call_once(|| self.token.cancel());
    }
}

pub(crate) struct NullEventProcessor;

impl EventProcessor for NullEventProcessor {
    fn send(&self, _: Event) {}
    fn flush(&self) {}
    fn stop(&self) {}
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    client: reqwest::Client,
    events_uri: String,
    env_secret: String,
    mut rx: mpsc::Receiver<EventMessage>,
    flush_interval: Duration,
    retry_interval: Duration,
    max_retries: u32,
    token: CancellationToken,
) {
    let mut batch: Vec<Event> = Vec::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                deliver(&client, &events_uri, &env_secret, &mut batch, retry_interval, max_retries).await;
                break;
            }
            _ = ticker.tick() => {
                deliver(&client, &events_uri, &env_secret, &mut batch, retry_interval, max_retries).await;
            }
            received = rx.recv() => match received {
                Some(EventMessage::Record(event)) => {
                    batch.push(event);
                    if batch.len() >= MAX_BATCH_SIZE {
                        deliver(&client, &events_uri, &env_secret, &mut batch, retry_interval, max_retries).await;
                    }
                }
                Some(EventMessage::Flush) => {
                    deliver(&client, &events_uri, &env_secret, &mut batch, retry_interval, max_retries).await;
                }
                None => {
                    deliver(&client, &events_uri, &env_secret, &mut batch, retry_interval, max_retries).await;
                    break;
                }
            }
        }
    }
}

async fn deliver(
    client: &reqwest::Client,
    events_uri: &str,
    env_secret: &str,
    batch: &mut Vec<Event>,
    retry_interval: Duration,
    max_retries: u32,
) {
    if batch.is_empty() {
        return;
    }
    let payload = std::mem::take(batch);
    for attempt in 0..=max_retries {
        let response = client
            .post(events_uri)
            .header(AUTHORIZATION, env_secret)
            .header(USER_AGENT, SDK_USER_AGENT)
            .json(&payload)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                debug!("delivered {} analytics events", payload.len());
                return;
            }
            Ok(response) => warn!("analytics delivery failed with status {}", response.status()),
            Err(err) => warn!("analytics delivery failed: {err}"),
        }
        if attempt < max_retries {
            tokio::time::sleep(retry_interval).await;
        }
    }
    warn!("{} analytics events discarded after {max_retries} retries", payload.len());
}
