//! User hub event stream with auto-reconnect.
//!
//! Connects to the backend's SignalR user hub (`/1/hubs/user`) over a raw
//! WebSocket using the JSON hub protocol, and streams device presence
//! notifications through a [`tokio::sync::broadcast`] channel. Handles
//! reconnection with exponential backoff + jitter automatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use shockline_api::hub::{HubHandle, hub_url};
//! use shockline_api::ReconnectConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! let url = hub_url(&"https://api.openshock.app".parse()?)?;
//! let handle = HubHandle::connect(url, token, ReconnectConfig::default(), CancellationToken::new());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::client::TOKEN_HEADER;
use crate::error::Error;
use crate::reconnect::{ReconnectConfig, calculate_backoff, session_was_stable};
use crate::transport::user_agent;

// ── Protocol constants ───────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Every hub protocol record is terminated by ASCII record separator.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";
const PING: &str = "{\"type\":6}\u{1e}";

/// The server drops clients that stay silent for 30s.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ── Events ───────────────────────────────────────────────────────────

/// Online state of a single device, as pushed by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOnlineState {
    pub device: Uuid,
    pub online: bool,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

/// What changed about a device in a `DeviceUpdate` push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceUpdateType {
    Created,
    Updated,
    ShockerUpdated,
    Deleted,
}

impl DeviceUpdateType {
    fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_u64()? {
                0 => Some(Self::Created),
                1 => Some(Self::Updated),
                2 => Some(Self::ShockerUpdated),
                3 => Some(Self::Deleted),
                _ => None,
            },
            serde_json::Value::String(s) => match s.as_str() {
                "Created" => Some(Self::Created),
                "Updated" => Some(Self::Updated),
                "ShockerUpdated" => Some(Self::ShockerUpdated),
                "Deleted" => Some(Self::Deleted),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A parsed notification from the user hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Handshake finished; emitted on every (re)connect. Pushes sent while
    /// we were away are lost, so consumers should resync.
    Connected,
    /// Server greeting carrying our hub connection id.
    Welcome { connection_id: String },
    /// Batch of device online/offline changes.
    DeviceStatus(Vec<DeviceOnlineState>),
    /// A device was created, updated, had its shockers changed, or was deleted.
    DeviceUpdate {
        device: Uuid,
        kind: DeviceUpdateType,
    },
}

// ── HubHandle ────────────────────────────────────────────────────────

/// Handle to a running hub event stream.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)) to tear down the background task.
pub struct HubHandle {
    event_rx: broadcast::Receiver<Arc<HubEvent>>,
    cancel: CancellationToken,
}

impl HubHandle {
    /// Spawn the connect/reconnect loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously -- subscribe to
    /// start consuming events.
    pub fn connect(
        hub_url: Url,
        token: SecretString,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            hub_loop(hub_url, token, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<HubEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Derive the hub WebSocket URL from the REST base URL.
pub fn hub_url(backend: &Url) -> Result<Url, Error> {
    let mut url = backend.clone();
    let scheme = match backend.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(Error::Protocol(format!("unsupported backend scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Protocol(format!("cannot derive {scheme} URL from {backend}")))?;
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }
    Ok(url.join("1/hubs/user")?)
}

// ── Background reconnection loop ─────────────────────────────────────

async fn hub_loop(
    url: Url,
    token: SecretString,
    event_tx: broadcast::Sender<Arc<HubEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut handshake_at = None;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &token, &event_tx, &cancel, &mut handshake_at) => result,
        };
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => tracing::info!(attempt, "hub disconnected cleanly"),
            Err(e) => tracing::warn!(error = %e, attempt, "hub connection error"),
        }

        // A hub that hangs up right after the handshake backs off like one
        // that refuses outright.
        if session_was_stable(handshake_at) {
            attempt = 0;
        }
        if reconnect.exhausted(attempt) {
            tracing::error!(
                max_retries = ?reconnect.max_retries,
                "hub reconnection limit reached, giving up"
            );
            break;
        }

        let delay = calculate_backoff(attempt, &reconnect);
        tracing::info!(delay = ?delay, attempt, "waiting before hub reconnect");

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("hub loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    url: &Url,
    token: &SecretString,
    event_tx: &broadcast::Sender<Arc<HubEvent>>,
    cancel: &CancellationToken,
    handshake_at: &mut Option<Instant>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to hub");

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

    let (mut write, mut read) = ws_stream.split();
    write
        .send(Message::text(HANDSHAKE.to_owned()))
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = keepalive.tick() => {
                write
                    .send(Message::text(PING.to_owned()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        for record in parse_records(text.as_str()) {
                            let record = match record {
                                Ok(record) => record,
                                Err(Error::Deserialization { message, .. }) => {
                                    tracing::debug!(error = %message, "skipping malformed hub record");
                                    continue;
                                }
                                Err(e) => return Err(e),
                            };
                            match record {
                                Record::HandshakeOk => {
                                    tracing::info!("hub handshake complete");
                                    *handshake_at = Some(Instant::now());
                                    let _ = event_tx.send(Arc::new(HubEvent::Connected));
                                }
                                Record::Invocation { target, arguments } => {
                                    if let Some(event) = event_from_invocation(&target, &arguments) {
                                        tracing::debug!(method = %target, "hub event");
                                        // No subscribers right now is fine.
                                        let _ = event_tx.send(Arc::new(event));
                                    } else {
                                        tracing::trace!(method = %target, "ignoring hub invocation");
                                    }
                                }
                                Record::Ping => {
                                    tracing::trace!("hub ping");
                                    write
                                        .send(Message::text(PING.to_owned()))
                                        .await
                                        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                                }
                                Record::Close { error: Some(reason) } => {
                                    return Err(Error::WebSocketClosed { code: 1000, reason });
                                }
                                Record::Close { error: None } => return Ok(()),
                                Record::Other(kind) => tracing::trace!(kind, "ignoring hub record"),
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "hub close frame received");
                        } else {
                            tracing::info!("hub close frame received (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("hub stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame -- tungstenite answers pings itself
                    }
                }
            }
        }
    }
}

// ── Record parsing ───────────────────────────────────────────────────

/// One hub protocol record.
#[derive(Debug, PartialEq)]
enum Record {
    HandshakeOk,
    Invocation {
        target: String,
        arguments: Vec<serde_json::Value>,
    },
    Ping,
    Close {
        error: Option<String>,
    },
    Other(u64),
}

/// Split a text frame on the record separator and parse every record.
///
/// Records without a `type` field are handshake responses.
fn parse_records(text: &str) -> Vec<Result<Record, Error>> {
    text.split(RECORD_SEPARATOR)
        .filter(|r| !r.trim().is_empty())
        .map(parse_record)
        .collect()
}

fn parse_record(raw: &str) -> Result<Record, Error> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: raw.to_owned(),
        })?;

    let Some(kind) = value.get("type").and_then(serde_json::Value::as_u64) else {
        return match value.get("error").and_then(serde_json::Value::as_str) {
            Some(err) => Err(Error::Protocol(format!("hub handshake rejected: {err}"))),
            None => Ok(Record::HandshakeOk),
        };
    };

    Ok(match kind {
        1 => Record::Invocation {
            target: value
                .get("target")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            arguments: value
                .get("arguments")
                .and_then(serde_json::Value::as_array)
                .cloned()
                .unwrap_or_default(),
        },
        6 => Record::Ping,
        7 => Record::Close {
            error: value
                .get("error")
                .and_then(serde_json::Value::as_str)
                .map(String::from),
        },
        other => Record::Other(other),
    })
}

/// Translate a hub invocation into a [`HubEvent`], if we know the target.
fn event_from_invocation(target: &str, arguments: &[serde_json::Value]) -> Option<HubEvent> {
    match target {
        "Welcome" => Some(HubEvent::Welcome {
            connection_id: arguments.first()?.as_str()?.to_owned(),
        }),
        "DeviceStatus" => {
            match serde_json::from_value(arguments.first()?.clone()) {
                Ok(states) => Some(HubEvent::DeviceStatus(states)),
                Err(e) => {
                    tracing::debug!(error = %e, "malformed DeviceStatus payload");
                    None
                }
            }
        }
        "DeviceUpdate" => {
            let device = arguments.first()?.as_str()?.parse().ok()?;
            let kind = DeviceUpdateType::from_value(arguments.get(1)?)?;
            Some(HubEvent::DeviceUpdate { device, kind })
        }
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hub_url_switches_scheme_and_appends_path() {
        let url = hub_url(&"https://api.openshock.app".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://api.openshock.app/1/hubs/user");

        let url = hub_url(&"http://localhost:5000/backend".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/backend/1/hubs/user");
    }

    #[test]
    fn hub_url_rejects_unknown_scheme() {
        assert!(hub_url(&"ftp://example.com".parse().unwrap()).is_err());
    }

    #[test]
    fn handshake_response_is_recognized() {
        let records = parse_records("{}\u{1e}");
        assert_eq!(records.len(), 1);
        assert_eq!(records.into_iter().next().unwrap().unwrap(), Record::HandshakeOk);
    }

    #[test]
    fn handshake_error_is_surfaced() {
        let records = parse_records("{\"error\":\"Unauthorized\"}\u{1e}");
        assert!(matches!(records[0], Err(Error::Protocol(_))));
    }

    #[test]
    fn multiple_records_in_one_frame() {
        let frame = "{\"type\":6}\u{1e}{\"type\":1,\"target\":\"Welcome\",\"arguments\":[\"abc\"]}\u{1e}";
        let records: Vec<Record> = parse_records(frame).into_iter().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], Record::Ping);
        assert!(matches!(&records[1], Record::Invocation { target, .. } if target == "Welcome"));
    }

    #[test]
    fn device_status_invocation() {
        let args = vec![serde_json::json!([
            {"device": "6f0b0f0e-49a5-4ab6-a1b6-6ad0d3c8e3a1", "online": true, "firmwareVersion": "1.4.0"},
            {"device": "0c4e7a58-8ee4-4f38-b2d8-9a1bfe9bd2a2", "online": false}
        ])];

        let Some(HubEvent::DeviceStatus(states)) = event_from_invocation("DeviceStatus", &args)
        else {
            panic!("expected DeviceStatus");
        };
        assert_eq!(states.len(), 2);
        assert!(states[0].online);
        assert_eq!(states[0].firmware_version.as_deref(), Some("1.4.0"));
        assert!(!states[1].online);
    }

    #[test]
    fn device_update_invocation_numeric_and_named() {
        let id = "6f0b0f0e-49a5-4ab6-a1b6-6ad0d3c8e3a1";
        let numeric = event_from_invocation("DeviceUpdate", &[id.into(), 3.into()]);
        assert_eq!(
            numeric,
            Some(HubEvent::DeviceUpdate {
                device: id.parse().unwrap(),
                kind: DeviceUpdateType::Deleted,
            })
        );

        let named = event_from_invocation("DeviceUpdate", &[id.into(), "ShockerUpdated".into()]);
        assert!(matches!(
            named,
            Some(HubEvent::DeviceUpdate {
                kind: DeviceUpdateType::ShockerUpdated,
                ..
            })
        ));
    }

    #[test]
    fn unknown_targets_and_bad_payloads_are_ignored() {
        assert!(event_from_invocation("Log", &[]).is_none());
        assert!(event_from_invocation("DeviceStatus", &["nope".into()]).is_none());
        assert!(event_from_invocation("DeviceUpdate", &["not-a-uuid".into(), 0.into()]).is_none());
    }

    #[test]
    fn close_record_with_error() {
        let records = parse_records("{\"type\":7,\"error\":\"server shutting down\"}\u{1e}");
        assert_eq!(
            records.into_iter().next().unwrap().unwrap(),
            Record::Close {
                error: Some("server shutting down".into())
            }
        );
    }

    #[test]
    fn malformed_record_is_an_error() {
        let records = parse_records("not json\u{1e}");
        assert!(matches!(records[0], Err(Error::Deserialization { .. })));
    }
}
