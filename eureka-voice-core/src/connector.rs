//! Session establishment: credential fetch + realtime socket open.
//!
//! The connector POSTs `{roomName, identity}` to the token endpoint, then
//! opens the realtime websocket against the returned `url` with the returned
//! bearer `token`, bounded by the configured timeout. No retries happen here;
//! a retry is a fresh `toggle()` by the caller.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::{Result, VoiceError};
use crate::identity::SessionIdentity;
use crate::wire::{TokenRequest, TokenResponse};

/// Write half of the open session socket.
pub type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, tungstenite::Message>;

/// Read half of the open session socket.
pub type WsStream = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connector configuration, taken from the session config.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Token service endpoint (POST).
    pub token_endpoint: String,
    /// Bound on the whole handshake: token fetch and socket open each get
    /// this budget.
    pub connect_timeout: Duration,
}

/// An established realtime session, split for concurrent send/receive.
#[derive(Debug)]
pub struct SessionLink {
    pub room: String,
    pub sink: WsSink,
    pub stream: WsStream,
}

/// Exchanges credentials with the token service and opens the session.
pub struct SessionConnector {
    http: reqwest::Client,
    config: ConnectorConfig,
}

impl SessionConnector {
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.connect_timeout)
            .build()
            .map_err(|e| VoiceError::Connection(format!("http client init: {e}")))?;
        Ok(Self { http, config })
    }

    /// Fetch a short-lived credential and open the realtime socket.
    ///
    /// # Errors
    /// `VoiceError::Connection` on a non-2xx token response, a malformed
    /// body, or a socket open failure/timeout.
    pub async fn connect(&self, identity: &SessionIdentity) -> Result<SessionLink> {
        let credential = self.fetch_token(identity).await?;
        debug!(url = credential.url.as_str(), "token acquired, opening session socket");

        let request = build_session_request(&credential)?;
        let open = tokio::time::timeout(self.config.connect_timeout, connect_async(request));
        let (socket, _response) = match open.await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                return Err(VoiceError::Connection(format!("session open failed: {e}")))
            }
            Err(_) => {
                return Err(VoiceError::Connection(format!(
                    "session open timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        info!(room = identity.room.as_str(), "session established");
        let (sink, stream) = socket.split();
        Ok(SessionLink {
            room: identity.room.clone(),
            sink,
            stream,
        })
    }

    async fn fetch_token(&self, identity: &SessionIdentity) -> Result<TokenResponse> {
        let request = TokenRequest {
            room_name: &identity.room,
            identity: &identity.identity,
        };

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::Connection(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Connection(format!(
                "token service returned {status}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| VoiceError::Connection(format!("malformed token response: {e}")))
    }
}

/// Build the websocket upgrade request carrying the bearer credential.
fn build_session_request(
    credential: &TokenResponse,
) -> Result<tungstenite::http::Request<()>> {
    tungstenite::http::Request::builder()
        .uri(&credential.url)
        .header("Host", host_of(&credential.url))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Authorization", format!("Bearer {}", credential.token))
        .body(())
        .map_err(|e| VoiceError::Connection(format!("session request build failed: {e}")))
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
