//! Live-control gateway socket.
//!
//! Keeps a WebSocket open to the gateway a device is attached to
//! (`wss://{gateway}/1/ws/live/{device}`) and reports its lifecycle through
//! an `mpsc` channel of [`LiveEvent`]s. Only keepalive traffic is handled
//! here: gateway pings are answered, and the gateway's "device not
//! connected" notice ends the session for good. Control frames are out of
//! scope for this module.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::client::TOKEN_HEADER;
use crate::error::Error;
use crate::reconnect::{ReconnectConfig, calculate_backoff, session_was_stable};
use crate::transport::user_agent;

/// Socket lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

/// Emitted by [`run_live_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    State(LiveState),
    /// The gateway says the device itself is gone. The session does not
    /// reconnect after this.
    DeviceNotConnected,
    /// Round-trip latency the gateway announced, in milliseconds.
    Latency(u64),
}

/// How a single socket session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    Cancelled,
    DeviceNotConnected,
}

/// Build the live-control URL for a device.
///
/// A bare host (the normal gateway shape) gets `wss://`; a gateway given
/// with an explicit `ws://` or `wss://` scheme is used as-is.
pub fn live_url(gateway: &str, device: &Uuid) -> Result<Url, Error> {
    let base = if gateway.starts_with("ws://") || gateway.starts_with("wss://") {
        gateway.trim_end_matches('/').to_owned()
    } else {
        format!("wss://{}", gateway.trim_end_matches('/'))
    };
    Ok(Url::parse(&format!("{base}/1/ws/live/{device}"))?)
}

/// Drive a live-control socket until cancelled, retry budget exhausted, or
/// the gateway reports the device as not connected.
///
/// Always finishes with `LiveEvent::State(LiveState::Disconnected)`.
pub async fn run_live_session(
    url: Url,
    token: SecretString,
    reconnect: ReconnectConfig,
    events: mpsc::UnboundedSender<LiveEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let state = if attempt == 0 {
            LiveState::Connecting
        } else {
            LiveState::Reconnecting { attempt }
        };
        let _ = events.send(LiveEvent::State(state));

        let mut connected_at = None;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(SessionEnd::Cancelled),
            result = connect_and_read(&url, &token, &events, &cancel, &mut connected_at) => result,
        };

        match result {
            Ok(SessionEnd::Cancelled) => break,
            Ok(SessionEnd::DeviceNotConnected) => {
                tracing::info!(url = %url, "gateway reports device not connected");
                let _ = events.send(LiveEvent::DeviceNotConnected);
                break;
            }
            Ok(SessionEnd::Closed) => tracing::debug!(url = %url, attempt, "live socket closed"),
            Err(e) => tracing::warn!(url = %url, error = %e, attempt, "live socket error"),
        }

        // Clean closes back off too; only a session that held up resets the budget.
        if session_was_stable(connected_at) {
            attempt = 0;
        }
        if reconnect.exhausted(attempt) {
            tracing::warn!(url = %url, "live socket retry budget exhausted");
            break;
        }
        let delay = calculate_backoff(attempt, &reconnect);
        tracing::debug!(url = %url, delay = ?delay, attempt, "waiting before live reconnect");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }

    let _ = events.send(LiveEvent::State(LiveState::Disconnected));
}

async fn connect_and_read(
    url: &Url,
    token: &SecretString,
    events: &mpsc::UnboundedSender<LiveEvent>,
    cancel: &CancellationToken,
    connected_at: &mut Option<Instant>,
) -> Result<SessionEnd, Error> {
    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri)
        .with_header(TOKEN_HEADER, token.expose_secret())
        .with_header("User-Agent", user_agent());

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::debug!(url = %url, "live socket connected");
    *connected_at = Some(Instant::now());
    let _ = events.send(LiveEvent::State(LiveState::Connected));

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match parse_incoming(text.as_str()) {
                        Ok(Incoming::Ping(data)) => {
                            let pong = serde_json::json!({ "requestType": "Pong", "data": data });
                            write
                                .send(Message::text(pong.to_string()))
                                .await
                                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                        }
                        Ok(Incoming::Latency(ms)) => {
                            let _ = events.send(LiveEvent::Latency(ms));
                        }
                        Ok(Incoming::DeviceNotConnected) => return Ok(SessionEnd::DeviceNotConnected),
                        Ok(Incoming::Other(kind)) => tracing::trace!(kind = %kind, "ignoring live message"),
                        Err(e) => tracing::debug!(error = %e, "unparseable live message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::debug!(code = %cf.code, reason = %cf.reason, "live close frame received");
                        }
                        return Ok(SessionEnd::Closed);
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveResponse {
    #[serde(alias = "ResponseType")]
    response_type: String,
    #[serde(alias = "Data", default)]
    data: serde_json::Value,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Ping(serde_json::Value),
    Latency(u64),
    DeviceNotConnected,
    Other(String),
}

fn parse_incoming(text: &str) -> Result<Incoming, Error> {
    let response: LiveResponse =
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })?;

    Ok(match response.response_type.as_str() {
        "Ping" => Incoming::Ping(response.data),
        "LatencyAnnounce" => {
            let latency = response
                .data
                .get("ownLatency")
                .or_else(|| response.data.get("OwnLatency"))
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default();
            Incoming::Latency(latency)
        }
        "DeviceNotConnected" => Incoming::DeviceNotConnected,
        other => Incoming::Other(other.to_owned()),
    })
}

/// How long a caller should wait for a session task to wind down after
/// cancelling it before giving up on a clean close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);
