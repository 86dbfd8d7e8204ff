//! Realtime change feed over a Phoenix-channel websocket.
//!
//! Connects to the backend's realtime endpoint, joins one channel per
//! table subscription, and delivers parsed row changes through per-channel
//! [`tokio::sync::mpsc`] receivers. Handles heartbeats and reconnection
//! with exponential backoff + jitter automatically; every joined channel
//! is re-joined after a reconnect.
//!
//! # Example
//!
//! ```rust,ignore
//! use canopy_api::realtime::{ChannelTopic, RealtimeClient, RealtimeConfig};
//!
//! let client = RealtimeClient::connect(RealtimeConfig::new(base_url, credentials));
//! let mut rx = client.join(ChannelTopic::table("public", "rows").with_filter("farm_id=eq.f1"));
//!
//! while let Some(change) = rx.recv().await {
//!     println!("{:?} on {}", change.change_type, change.table);
//! }
//!
//! client.disconnect();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::ApiCredentials;

const PROTOCOL_VERSION: &str = "1.0.0";
const PHOENIX_TOPIC: &str = "phoenix";

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for websocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── RealtimeConfig ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct RealtimeConfig {
    /// Backend root URL; the websocket path is derived from it.
    pub base_url: Url,
    pub credentials: ApiCredentials,
    pub reconnect: ReconnectConfig,
    /// Interval between Phoenix heartbeats. Default: 30s.
    pub heartbeat_interval: Duration,
}

impl RealtimeConfig {
    pub fn new(base_url: Url, credentials: ApiCredentials) -> Self {
        Self {
            base_url,
            credentials,
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// `wss://{host}/realtime/v1/websocket?apikey=…&vsn=1.0.0`
    pub fn websocket_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            _ => "wss",
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::WebSocketConnect(format!("cannot derive ws scheme from {}", self.base_url)))?;
        let base = url.as_str().trim_end_matches('/').to_owned();
        let mut url = Url::parse(&format!("{base}/realtime/v1/websocket"))?;
        url.query_pairs_mut()
            .append_pair("apikey", self.credentials.anon_key.expose_secret())
            .append_pair("vsn", PROTOCOL_VERSION);
        Ok(url)
    }
}

impl fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("base_url", &self.base_url.as_str())
            .field("reconnect", &self.reconnect)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}

// ── Channel topics ───────────────────────────────────────────────────

/// A table-level change subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTopic {
    pub schema: String,
    pub table: String,
    /// Row filter such as `farm_id=eq.<id>`.
    pub filter: Option<String>,
}

impl ChannelTopic {
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Phoenix topic string, e.g. `realtime:public:rows`.
    pub fn topic(&self) -> String {
        match &self.filter {
            Some(filter) => format!("realtime:{}:{}:{filter}", self.schema, self.table),
            None => format!("realtime:{}:{}", self.schema, self.table),
        }
    }
}

// ── Change payloads ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A single row change delivered on a joined channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

// ── SocketState ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
    Failed,
}

// ── RealtimeClient ───────────────────────────────────────────────────

struct ChannelEntry {
    topic: ChannelTopic,
    tx: mpsc::UnboundedSender<PostgresChange>,
}

struct ClientInner {
    channels: Mutex<HashMap<String, ChannelEntry>>,
    outbound: mpsc::UnboundedSender<String>,
    state: watch::Sender<SocketState>,
    cancel: CancellationToken,
    next_ref: AtomicU64,
    access_token: String,
}

impl ClientInner {
    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }

    fn push(&self, frame: OutboundFrame<'_>) {
        match serde_json::to_string(&frame) {
            Ok(text) => {
                // Closed only after the loop has exited.
                let _ = self.outbound.send(text);
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode realtime frame"),
        }
    }

    fn push_join(&self, topic: &ChannelTopic) {
        let payload = join_payload(topic, &self.access_token);
        let topic_name = topic.topic();
        let reference = self.next_ref();
        self.push(OutboundFrame {
            topic: &topic_name,
            event: "phx_join",
            payload,
            reference: Some(&reference),
        });
    }

    fn set_state(&self, state: SocketState) {
        let _ = self.state.send_replace(state);
    }
}

/// Handle to a running realtime connection.
///
/// Cheaply cloneable. The background task runs until
/// [`disconnect`](Self::disconnect) is called or the retry limit is hit.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Spawn the connection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously; channels
    /// joined before it completes are sent once the socket opens.
    pub fn connect(config: RealtimeConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SocketState::Connecting);
        let inner = Arc::new(ClientInner {
            channels: Mutex::new(HashMap::new()),
            outbound,
            state,
            cancel: CancellationToken::new(),
            next_ref: AtomicU64::new(1),
            access_token: config.credentials.bearer().to_owned(),
        });

        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            ws_loop(config, task_inner, outbound_rx).await;
        });

        Self { inner }
    }

    /// Join a table channel and receive its changes.
    ///
    /// Joining the same topic twice replaces the earlier receiver.
    pub fn join(&self, topic: ChannelTopic) -> mpsc::UnboundedReceiver<PostgresChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = topic.topic();
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Under the lock: either the loop snapshots this entry on its next
        // (re)join, or the socket is already open and the frame goes now.
        if *self.inner.state.borrow() == SocketState::Connected {
            self.inner.push_join(&topic);
        }
        tracing::debug!(topic = %name, "joining realtime channel");
        channels.insert(name, ChannelEntry { topic, tx });
        rx
    }

    /// Leave a channel. Its receiver sees end-of-stream.
    pub fn leave(&self, topic: &ChannelTopic) {
        let name = topic.topic();
        let removed = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&name);
        if removed.is_some() && *self.inner.state.borrow() == SocketState::Connected {
            let reference = self.inner.next_ref();
            self.inner.push(OutboundFrame {
                topic: &name,
                event: "phx_leave",
                payload: serde_json::json!({}),
                reference: Some(&reference),
            });
        }
        tracing::debug!(topic = %name, "left realtime channel");
    }

    /// Watch the socket state.
    pub fn state(&self) -> watch::Receiver<SocketState> {
        self.inner.state.subscribe()
    }

    /// Close the socket. No reconnection is attempted afterwards.
    pub fn disconnect(&self) {
        self.inner.cancel.cancel();
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels.clear();
        self.inner.set_state(SocketState::Disconnected);
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → join → read → on close or error, back off → reconnect.
async fn ws_loop(
    config: RealtimeConfig,
    inner: Arc<ClientInner>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let cancel = inner.cancel.clone();
    let mut attempt: u32 = 0;

    let url = match config.websocket_url() {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(error = %e, "invalid realtime URL");
            set_state_locked(&inner, SocketState::Failed);
            return;
        }
    };

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_run(&url, &config, &inner, &mut outbound_rx) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        match &result {
            Ok(()) => tracing::info!("realtime socket closed by server"),
            Err(e) => tracing::warn!(error = %e, attempt, "realtime socket error"),
        }

        match plan_retry(result.is_ok(), attempt, &config.reconnect) {
            Retry::GiveUp => {
                tracing::error!(
                    max_retries = config.reconnect.max_retries,
                    "realtime reconnection limit reached, giving up"
                );
                set_state_locked(&inner, SocketState::Failed);
                break;
            }
            Retry::After { attempt: next, delay } => {
                attempt = next;
                set_state_locked(&inner, SocketState::Reconnecting { attempt });
                tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "waiting before reconnect");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!("realtime loop exiting");
}

/// Publish a loop-driven state unless the client was disconnected.
fn set_state_locked(inner: &ClientInner, state: SocketState) {
    let _guard = inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
    if !inner.cancel.is_cancelled() {
        inner.set_state(state);
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_run(
    url: &Url,
    config: &RealtimeConfig,
    inner: &ClientInner,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(), Error> {
    tracing::info!(host = url.host_str().unwrap_or_default(), "connecting to realtime");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    // Frames queued while the socket was down reference a dead session.
    while outbound_rx.try_recv().is_ok() {}

    {
        let channels = inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.cancel.is_cancelled() {
            return Ok(());
        }
        for entry in channels.values() {
            inner.push_join(&entry.topic);
        }
        inner.set_state(SocketState::Connected);
    }
    tracing::info!("realtime connected");

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            Some(text) = outbound_rx.recv() => {
                write
                    .send(tungstenite::Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            _ = heartbeat.tick() => {
                let reference = inner.next_ref();
                inner.push(OutboundFrame {
                    topic: PHOENIX_TOPIC,
                    event: "heartbeat",
                    payload: serde_json::json!({}),
                    reference: Some(&reference),
                });
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_frame(&text, inner);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.as_str().to_owned(),
                            }),
                            None => Ok(()),
                        };
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("realtime stream ended");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    topic: &'a str,
    event: &'a str,
    payload: serde_json::Value,
    #[serde(rename = "ref")]
    reference: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn join_payload(topic: &ChannelTopic, access_token: &str) -> serde_json::Value {
    let mut change = serde_json::json!({
        "event": "*",
        "schema": topic.schema,
        "table": topic.table,
    });
    if let Some(filter) = &topic.filter {
        change["filter"] = serde_json::Value::String(filter.clone());
    }
    serde_json::json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        },
        "access_token": access_token,
    })
}

/// What a single inbound frame means for subscribers.
#[derive(Debug)]
enum Inbound {
    Change { topic: String, change: PostgresChange },
    JoinRejected { topic: String, reason: String },
    Ignored,
}

fn parse_frame(text: &str) -> Inbound {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse realtime frame");
            return Inbound::Ignored;
        }
    };

    match frame.event.as_str() {
        "postgres_changes" => {
            match serde_json::from_value::<PostgresChange>(frame.payload["data"].clone()) {
                Ok(change) => Inbound::Change {
                    topic: frame.topic,
                    change,
                },
                Err(e) => {
                    tracing::debug!(error = %e, topic = %frame.topic, "malformed change payload");
                    Inbound::Ignored
                }
            }
        }
        "phx_reply" if frame.payload["status"] == "error" && frame.topic != PHOENIX_TOPIC => {
            Inbound::JoinRejected {
                reason: frame.payload["response"]["reason"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_owned(),
                topic: frame.topic,
            }
        }
        _ => Inbound::Ignored,
    }
}

fn dispatch_frame(text: &str, inner: &ClientInner) {
    match parse_frame(text) {
        Inbound::Change { topic, change } => {
            let channels = inner.channels.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = channels.get(&topic) {
                // Receiver dropped means the subscriber is going away.
                let _ = entry.tx.send(change);
            }
        }
        Inbound::JoinRejected { topic, reason } => {
            let err = Error::ChannelJoin { topic, reason };
            tracing::warn!(error = %err, "realtime join rejected");
        }
        Inbound::Ignored => {}
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// What the loop does once a connection has ended.
#[derive(Debug, PartialEq)]
enum Retry {
    After { attempt: u32, delay: Duration },
    GiveUp,
}

/// A server-side close resets the attempt counter but still waits the
/// initial delay; errors back off and count toward `max_retries`.
fn plan_retry(clean_close: bool, attempt: u32, config: &ReconnectConfig) -> Retry {
    if clean_close {
        return Retry::After {
            attempt: 0,
            delay: calculate_backoff(0, config),
        };
    }
    if config.max_retries.is_some_and(|max| attempt >= max) {
        return Retry::GiveUp;
    }
    Retry::After {
        attempt: attempt + 1,
        delay: calculate_backoff(attempt, config),
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`, jitter is +-25%.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config() -> RealtimeConfig {
        RealtimeConfig::new(
            Url::parse("https://farm.example.co").expect("valid url"),
            ApiCredentials::new(SecretString::from("anon-key")),
        )
    }

    #[test]
    fn websocket_url_switches_scheme_and_appends_key() {
        let url = config().websocket_url().expect("valid url");
        assert_eq!(
            url.as_str(),
            "wss://farm.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn websocket_url_keeps_plain_scheme_for_local_backends() {
        let mut cfg = config();
        cfg.base_url = Url::parse("http://localhost:54321").expect("valid url");
        let url = cfg.websocket_url().expect("valid url");
        assert!(url.as_str().starts_with("ws://localhost:54321/realtime/v1/websocket"));
    }

    #[test]
    fn topic_includes_filter() {
        let topic = ChannelTopic::table("public", "rows").with_filter("farm_id=eq.f1");
        assert_eq!(topic.topic(), "realtime:public:rows:farm_id=eq.f1");
        assert_eq!(ChannelTopic::table("public", "racks").topic(), "realtime:public:racks");
    }

    #[test]
    fn join_payload_carries_postgres_changes_config() {
        let topic = ChannelTopic::table("public", "shelves").with_filter("rack_id=eq.k1");
        let payload = join_payload(&topic, "tok");
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "*");
        assert_eq!(change["table"], "shelves");
        assert_eq!(change["filter"], "rack_id=eq.k1");
        assert_eq!(payload["access_token"], "tok");
    }

    #[test]
    fn parse_postgres_change_frame() {
        let raw = serde_json::json!({
            "topic": "realtime:public:rows",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "schema": "public",
                    "table": "rows",
                    "record": { "id": "r1", "name": "Row A", "position": 2 },
                    "old_record": { "id": "r1" },
                    "commit_timestamp": "2026-05-01T10:00:00Z"
                },
                "ids": [1]
            }
        });

        match parse_frame(&raw.to_string()) {
            Inbound::Change { topic, change } => {
                assert_eq!(topic, "realtime:public:rows");
                assert_eq!(change.change_type, ChangeType::Update);
                assert_eq!(change.record.as_ref().map(|r| r["position"].clone()), Some(2.into()));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parse_join_error_reply() {
        let raw = serde_json::json!({
            "topic": "realtime:public:rows",
            "event": "phx_reply",
            "ref": "1",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } }
        });
        assert!(matches!(
            parse_frame(&raw.to_string()),
            Inbound::JoinRejected { reason, .. } if reason == "unauthorized"
        ));
    }

    #[test]
    fn heartbeat_reply_is_ignored() {
        let raw = serde_json::json!({
            "topic": "phoenix",
            "event": "phx_reply",
            "ref": "3",
            "payload": { "status": "ok", "response": {} }
        });
        assert!(matches!(parse_frame(&raw.to_string()), Inbound::Ignored));
        assert!(matches!(parse_frame("not json"), Inbound::Ignored));
    }

    #[test]
    fn backoff_increases_and_caps() {
        let cfg = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };
        let d0 = calculate_backoff(0, &cfg);
        let d1 = calculate_backoff(1, &cfg);
        let d2 = calculate_backoff(2, &cfg);
        assert!(d1 > d0 && d2 > d1);
        assert!(calculate_backoff(20, &cfg) <= Duration::from_millis(12_500));
    }

    #[test]
    fn clean_close_still_waits_before_reconnecting() {
        let cfg = ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_retries: Some(3),
        };
        assert_eq!(
            plan_retry(true, 3, &cfg),
            Retry::After {
                attempt: 0,
                delay: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn errors_count_toward_the_retry_limit() {
        let cfg = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: Some(2),
        };
        assert!(matches!(plan_retry(false, 0, &cfg), Retry::After { attempt: 1, .. }));
        assert!(matches!(plan_retry(false, 1, &cfg), Retry::After { attempt: 2, .. }));
        assert_eq!(plan_retry(false, 2, &cfg), Retry::GiveUp);
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let mut cfg = config();
        cfg.base_url = Url::parse("http://127.0.0.1:9").expect("valid url");
        let client = RealtimeClient::connect(cfg);
        let _rx = client.join(ChannelTopic::table("public", "rows"));
        client.disconnect();
        assert!(client.is_disconnected());
        assert_eq!(*client.state().borrow(), SocketState::Disconnected);
    }
}
