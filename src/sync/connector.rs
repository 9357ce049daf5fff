use crate::constants::SDK_USER_AGENT;
use crate::utils;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

// server-initiated close code signalling an invalid or unauthorized request
const INVALID_REQUEST_CLOSE: u16 = 4003;

/// Errors reported by a [`StreamingConnector`] or [`MessageStream`].
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The connection could not be established or was lost due to a network failure.
    #[error("network failure: {0}")]
    Network(String),
    /// The peer violated the streaming protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The server rejected the connection credentials; the synchronizer does not retry.
    #[error("connection rejected: {0}")]
    Rejected(String),
}

/// Transport seam of the synchronizer.
///
/// The built-in implementation opens a websocket connection authenticated with the
/// environment secret. Embedders and tests can substitute their own transport
/// through [`crate::ClientBuilder::streaming_connector`].
#[async_trait]
pub trait StreamingConnector: Send + Sync {
    /// Opens a new connection and returns its message stream.
    async fn connect(&self) -> Result<Box<dyn MessageStream>, ConnectorError>;
}

/// A live streaming connection exchanging text messages.
#[async_trait]
pub trait MessageStream: Send {
    /// Sends a text message to the server.
    async fn send(&mut self, text: &str) -> Result<(), ConnectorError>;

    /// Receives the next text message; `None` when the server closed the
    /// connection normally.
    async fn next_message(&mut self) -> Result<Option<String>, ConnectorError>;

    /// Closes the connection.
    async fn close(&mut self);
}

pub(crate) struct WsConnector {
    url: String,
    env_secret: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: String, env_secret: String, connect_timeout: Duration) -> Self {
        Self { url, env_secret, connect_timeout }
    }
}

#[async_trait]
impl StreamingConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, ConnectorError> {
        let token = utils::build_auth_token(&self.env_secret);
        let url = format!("{}?token={token}&type=server", self.url);
        let mut request = url
            .into_client_request()
            .map_err(|err| ConnectorError::Protocol(err.to_string()))?;
        let authorization = HeaderValue::from_str(&self.env_secret)
            .map_err(|err| ConnectorError::Rejected(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, authorization);
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(SDK_USER_AGENT));

        match tokio::time::timeout(self.connect_timeout, connect_async(request)).await {
            Err(_) => Err(ConnectorError::Network("connection attempt timed out".to_owned())),
            Ok(Err(err)) => Err(classify_handshake_error(err)),
            Ok(Ok((stream, _))) => Ok(Box::new(WsStream { inner: stream })),
        }
    }
}

fn classify_handshake_error(err: WsError) -> ConnectorError {
    match err {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ConnectorError::Rejected(format!("HTTP {}", response.status()))
        }
        WsError::Io(err) => ConnectorError::Network(err.to_string()),
        other => ConnectorError::Protocol(other.to_string()),
    }
}

struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn send(&mut self, text: &str) -> Result<(), ConnectorError> {
        self.inner
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|err| ConnectorError::Network(err.to_string()))
    }

    async fn next_message(&mut self) -> Result<Option<String>, ConnectorError> {
        loop {
            match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) if u16::from(frame.code) == INVALID_REQUEST_CLOSE => {
                            Err(ConnectorError::Rejected(frame.reason.into_owned()))
                        }
                        _ => Ok(None),
                    }
                }
                // control frames carry no sync payload
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(ConnectorError::Network(err.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
