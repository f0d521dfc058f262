//! Event-bus connection with auto-reconnect.
//!
//! Owns one duplex WebSocket to the NVR's event bus. Outbound frames
//! (subscribe / unsubscribe / publish) flow through an `mpsc` queue into
//! the socket writer; inbound value notifications are decoded and fanned
//! out through a [`tokio::sync::broadcast`] channel. Reconnection uses
//! exponential backoff + jitter and is invisible to stream consumers.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//! use vigil_api::{BusConnection, ReconnectConfig};
//!
//! let url = Url::parse("ws://nvr.local:5000/ws")?;
//! let conn = BusConnection::connect(url, ReconnectConfig::default(), CancellationToken::new(), None)?;
//!
//! let mut detect = Box::pin(conn.subscribe("front_door/detect/state"));
//! while let Some(message) = detect.next().await {
//!     println!("detect is now {}", message.payload);
//! }
//!
//! conn.shutdown();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::protocol::{BusMessage, ClientFrame, decode_message};

// ── Broadcast channel capacity ───────────────────────────────────────

const INBOUND_CHANNEL_CAPACITY: usize = 1024;

// ── LinkState ────────────────────────────────────────────────────────

/// Lifecycle of the shared bus connection.
///
/// `Connecting → Open → Retrying → Open … → Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// First connection attempt in progress.
    Connecting,
    /// Socket is up; frames flow in both directions.
    Open,
    /// Link was lost; waiting out backoff or re-dialing.
    Retrying { attempt: u32 },
    /// Shut down, retry budget exhausted, or credentials rejected. Terminal.
    Closed,
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for bus reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum consecutive failed attempts before giving up.
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

// ── BusConnection ────────────────────────────────────────────────────

/// Handle to the running bus connection.
///
/// Cheaply cloneable. The background task lives until
/// [`shutdown`](Self::shutdown) is called or the retry budget runs out.
#[derive(Clone)]
pub struct BusConnection {
    shared: Arc<Shared>,
}

struct Shared {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: broadcast::Sender<Arc<BusMessage>>,
    state: watch::Sender<LinkState>,
    /// Bumped on every successful handshake.
    generation: AtomicU64,
    /// Why the most recent attempt failed. Cleared once the link opens.
    last_error: watch::Sender<Option<Arc<Error>>>,
    cancel: CancellationToken,
}

/// Why a single connection ended without a transport error.
#[derive(Debug, PartialEq, Eq)]
enum Disconnect {
    Remote,
    Shutdown,
}

impl BusConnection {
    /// Validate the URL and spawn the reconnection loop.
    ///
    /// Returns immediately; the first handshake happens in the background.
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        token: Option<SecretString>,
    ) -> Result<Self, Error> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(Error::UnsupportedScheme(other.to_owned())),
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(LinkState::Connecting);
        let (last_error, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            outbound,
            inbound,
            state,
            generation: AtomicU64::new(0),
            last_error,
            cancel,
        });

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            bus_loop(url, token, reconnect, task_shared, outbound_rx).await;
        });

        Ok(Self { shared })
    }

    // ── State observation ────────────────────────────────────────────

    /// Subscribe to link state transitions.
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        self.shared.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.borrow().is_open()
    }

    /// Handshake counter. Changes every time the link (re)opens.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// The error that ended the most recent connection attempt, if the
    /// link has not opened since.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.shared.last_error.borrow().clone()
    }

    /// Receiver for every decoded inbound message, across all topics.
    ///
    /// Survives reconnects. A consumer that falls behind receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn inbound(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.shared.inbound.subscribe()
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Publish a value. Fails fast with [`Error::NotConnected`] while the
    /// link is down; nothing is queued for later.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::NotConnected);
        }
        self.shared
            .outbound
            .send(ClientFrame::Publish {
                topic: topic.to_owned(),
                payload,
                retain: false,
            })
            .map_err(|_| Error::Closed)
    }

    /// Queue a wire-level subscribe for `topic`.
    ///
    /// Returns the link generation the frame was queued on, or `None` when
    /// the link is not open (callers re-issue after the next `Open`).
    /// Not reference counted.
    pub fn subscribe_topic(&self, topic: &str) -> Option<u64> {
        if !self.is_open() {
            debug!(topic, "link not open, subscribe deferred");
            return None;
        }
        let generation = self.generation();
        self.shared
            .outbound
            .send(ClientFrame::Subscribe {
                topic: topic.to_owned(),
            })
            .ok()?;
        Some(generation)
    }

    /// Queue a wire-level unsubscribe for `topic`. No-op while offline,
    /// since a fresh connection starts with no subscriptions.
    pub fn unsubscribe_topic(&self, topic: &str) {
        if !self.is_open() {
            return;
        }
        let _ = self.shared.outbound.send(ClientFrame::Unsubscribe {
            topic: topic.to_owned(),
        });
    }

    /// Stream every value published on `topic`.
    ///
    /// The stream is lazy and infinite: it re-subscribes after each
    /// reconnect and only ends on shutdown. Dropping it sends an
    /// unsubscribe. Not reference counted; share subscriptions through
    /// `vigil-core`'s topic registry instead of opening this twice.
    pub fn subscribe(&self, topic: &str) -> impl Stream<Item = Arc<BusMessage>> + Send + 'static {
        let conn = self.clone();
        let topic = topic.to_owned();

        async_stream::stream! {
            let _guard = UnsubscribeOnDrop {
                conn: conn.clone(),
                topic: topic.clone(),
            };
            let mut inbound = conn.inbound();
            let mut state = conn.state();
            let mut subscribed_on = conn.subscribe_topic(&topic);

            loop {
                let step = tokio::select! {
                    biased;
                    () = conn.shared.cancel.cancelled() => Step::Stop,
                    changed = state.changed() => {
                        if changed.is_err() {
                            Step::Stop
                        } else {
                            let open = state.borrow_and_update().is_open();
                            if open && subscribed_on != Some(conn.generation()) {
                                subscribed_on = conn.subscribe_topic(&topic);
                            }
                            Step::Skip
                        }
                    }
                    received = inbound.recv() => match received {
                        Ok(message) if message.topic == topic => Step::Deliver(message),
                        Ok(_) => Step::Skip,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "topic stream lagged");
                            Step::Skip
                        }
                        Err(broadcast::error::RecvError::Closed) => Step::Stop,
                    },
                };

                match step {
                    Step::Deliver(message) => yield message,
                    Step::Skip => {}
                    Step::Stop => break,
                }
            }
        }
    }

    /// Signal the background task to close the socket and exit.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

enum Step {
    Deliver(Arc<BusMessage>),
    Skip,
    Stop,
}

struct UnsubscribeOnDrop {
    conn: BusConnection,
    topic: String,
}

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.conn.unsubscribe_topic(&self.topic);
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → pump frames → on drop, backoff → reconnect.
async fn bus_loop(
    url: Url,
    token: Option<SecretString>,
    reconnect: ReconnectConfig,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    let mut attempt: u32 = 0;

    loop {
        discard_stale_frames(&mut outbound_rx);

        let result = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            result = connect_and_pump(&url, token.as_ref(), &shared, &mut outbound_rx) => result,
        };

        // A session that got as far as `Open` resets the failure budget.
        if shared.state.borrow().is_open() {
            attempt = 0;
        }

        match result {
            Ok(Disconnect::Shutdown) => break,
            Ok(Disconnect::Remote) => info!("Event bus disconnected cleanly, reconnecting"),
            Err(e) if e.is_auth() => {
                error!(error = %e, "Event bus rejected our credentials, giving up");
                shared.last_error.send_replace(Some(Arc::new(e)));
                break;
            }
            Err(e) => {
                warn!(error = %e, attempt, "Event bus connection error");
                shared.last_error.send_replace(Some(Arc::new(e)));
            }
        }

        if let Some(max) = reconnect.max_retries {
            if attempt >= max {
                error!(max_retries = max, "Event bus reconnection limit reached, giving up");
                break;
            }
        }

        shared.state.send_replace(LinkState::Retrying {
            attempt: attempt + 1,
        });

        let delay = calculate_backoff(attempt, &reconnect);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }

    shared.state.send_replace(LinkState::Closed);
    debug!("Event bus loop exiting");
}

/// Frames queued just before a link dropped belong to that link; a fresh
/// connection starts clean and the registry replays what it needs.
fn discard_stale_frames(outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>) {
    let mut stale = 0usize;
    while outbound_rx.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!(stale, "Discarded frames queued for a dropped connection");
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and pump frames until it drops.
///
/// If `token` is provided it's sent as a bearer `Authorization` header on
/// the upgrade request.
async fn connect_and_pump(
    url: &Url,
    token: Option<&SecretString>,
    shared: &Shared,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
) -> Result<Disconnect, Error> {
    info!(url = %url, "Connecting to event bus");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(handshake_error)?;

    let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
    shared.last_error.send_replace(None);
    shared.state.send_replace(LinkState::Open);
    info!(generation, "Event bus connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(Disconnect::Shutdown);
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    return Ok(Disconnect::Shutdown);
                };
                match frame.encode() {
                    Ok(text) => {
                        trace!(topic = frame.topic(), "Sending frame");
                        write
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                    }
                    Err(e) => warn!(error = %e, topic = frame.topic(), "Dropping unencodable frame"),
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&text, &shared.inbound);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch_text(text, &shared.inbound),
                        Err(_) => debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong reply itself
                        trace!("Event bus ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(cf) if cf.code != CloseCode::Normal => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            }),
                            _ => {
                                info!("Event bus close frame received");
                                Ok(Disconnect::Remote)
                            }
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        info!("Event bus stream ended");
                        return Ok(Disconnect::Remote);
                    }
                    Some(Ok(_)) => {
                        // Pong, raw Frame -- ignore
                    }
                }
            }
        }
    }
}

/// 401 and 403 mean the credentials are wrong; anything else may clear up.
fn handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::Rejected {
                status: response.status().as_u16(),
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

// ── Message fan-out ──────────────────────────────────────────────────

/// Decode a text frame and broadcast it. Undecodable frames are dropped
/// whole so subscribers never see a partial value.
fn dispatch_text(text: &str, inbound: &broadcast::Sender<Arc<BusMessage>>) {
    match decode_message(text) {
        Ok(message) => {
            trace!(topic = %message.topic, "Inbound message");
            // Ignore send errors -- just means no active subscribers right now
            let _ = inbound.send(Arc::new(message));
        }
        Err(e) => debug!(error = %e, "Dropping undecodable frame"),
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from many clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
