use crate::market::binance::{connect_ticker_stream, internal_symbol};
use crate::market::chart;
use crate::market::store::AssetStore;
use crate::market::types::{
    now_unix_ms, parse_stream_frame, round2, Asset, AssetUpdate, FeedConnectionState,
    FeedStatusSnapshot, LiveFeedConfig, StreamFrame, TickerEvent,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HOUR_MS: i64 = 3_600_000;
const STATUS_REBROADCAST_EVERY: u64 = 10;
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Jitter applied to `change1h` when no usable prior sample exists, and to
/// `change7d` always: the exchange ticker carries neither, so both are
/// approximations, not exchange-sourced values.
const CHANGE1H_JITTER: f64 = 0.15;
const CHANGE7D_JITTER: f64 = 0.1;

/// Connection lifecycle with an explicit transition table. Invalid edges are
/// rejected outright, so a second `connect()` during the connecting window
/// cannot double-open the socket.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: FeedConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: FeedConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> FeedConnectionState {
        self.state
    }

    pub fn try_transition(&mut self, to: FeedConnectionState) -> bool {
        if !Self::permits(self.state, to) {
            debug!(from = ?self.state, ?to, "rejected connection state transition");
            return false;
        }
        self.state = to;
        true
    }

    fn permits(from: FeedConnectionState, to: FeedConnectionState) -> bool {
        use FeedConnectionState::*;
        matches!(
            (from, to),
            (Disconnected, Connecting | Reconnecting | Failed)
                | (Connecting, Connected | Error | Disconnected | Reconnecting)
                | (Connected, Disconnected | Error)
                | (Error, Reconnecting | Failed | Connecting | Disconnected)
                | (Reconnecting, Connecting | Failed | Disconnected)
                | (Failed, Connecting | Disconnected)
        )
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Status fields shared between the feed object and its socket task. The
/// machine inside is the sole coordination point between the callbacks.
#[derive(Debug)]
struct FeedShared {
    machine: ConnectionStateMachine,
    last_error: Option<String>,
    message_count: u64,
    last_message_at_ms: Option<i64>,
    reconnect_attempts: u32,
}

impl FeedShared {
    fn new() -> Self {
        Self {
            machine: ConnectionStateMachine::new(),
            last_error: None,
            message_count: 0,
            last_message_at_ms: None,
            reconnect_attempts: 0,
        }
    }

    fn snapshot(&self) -> FeedStatusSnapshot {
        FeedStatusSnapshot {
            state: self.machine.state(),
            last_error: self.last_error.clone(),
            message_count: self.message_count,
            last_message_at_ms: self.last_message_at_ms,
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectDecision {
    Retry { attempt: u32 },
    GiveUp,
}

/// Consumes one reconnect attempt. The attempt that exhausts the budget
/// transitions to the terminal `Failed` state; afterwards every call is a
/// no-op until an explicit `connect()`.
fn attempt_reconnect(shared: &mut FeedShared, max_attempts: u32) -> ReconnectDecision {
    if shared.machine.state() == FeedConnectionState::Failed {
        return ReconnectDecision::GiveUp;
    }

    shared.reconnect_attempts += 1;
    if shared.reconnect_attempts >= max_attempts {
        shared.machine.try_transition(FeedConnectionState::Failed);
        shared.last_error = Some("max reconnect attempts reached".to_string());
        return ReconnectDecision::GiveUp;
    }

    shared.machine.try_transition(FeedConnectionState::Reconnecting);
    ReconnectDecision::Retry {
        attempt: shared.reconnect_attempts,
    }
}

#[derive(Debug, Clone, Copy)]
struct PriceSample {
    price: f64,
    at_ms: i64,
}

/// Reconciles one exchange ticker frame against the stored asset.
///
/// `price`, `change24h` and the volume notional come straight from the
/// frame. The exchange supplies neither `change1h` nor `change7d`: the 1h
/// change is extrapolated from the prior sample when one landed less than an
/// hour ago, otherwise both are nudged by a small bounded perturbation.
fn reconcile_ticker<R: Rng + ?Sized>(
    asset: &Asset,
    event: &TickerEvent,
    prior: Option<&PriceSample>,
    now_ms: i64,
    rng: &mut R,
) -> AssetUpdate {
    let price = event.last_price;

    let change1h = match prior {
        Some(sample) if now_ms - sample.at_ms < HOUR_MS && sample.price > 0.0 => {
            let elapsed_ms = (now_ms - sample.at_ms).max(1);
            let hour_fraction = elapsed_ms as f64 / HOUR_MS as f64;
            let price_diff_pct = (price - sample.price) / sample.price * 100.0;
            price_diff_pct / hour_fraction
        }
        _ => asset.change1h + rng.gen_range(-CHANGE1H_JITTER..=CHANGE1H_JITTER),
    };
    let change7d = asset.change7d + rng.gen_range(-CHANGE7D_JITTER..=CHANGE7D_JITTER);

    AssetUpdate {
        price: Some(price),
        change1h: Some(round2(change1h)),
        change24h: Some(event.change24h_pct),
        change7d: Some(round2(change7d)),
        volume24h: Some(event.base_volume * price),
        chart_data: Some(chart::apply_price_sample(&asset.chart_data, price)),
        ..Default::default()
    }
}

struct FeedTaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Live exchange feed: one WebSocket over the combined ticker stream,
/// bounded reconnect, keep-alive pings and a status broadcast channel.
pub struct LiveFeed {
    store: Arc<AssetStore>,
    config: LiveFeedConfig,
    shared: Arc<Mutex<FeedShared>>,
    samples: Arc<Mutex<HashMap<String, PriceSample>>>,
    status_tx: broadcast::Sender<FeedStatusSnapshot>,
    task: Mutex<Option<FeedTaskHandle>>,
}

impl LiveFeed {
    pub fn new(store: Arc<AssetStore>, config: LiveFeedConfig) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            store,
            config,
            shared: Arc::new(Mutex::new(FeedShared::new())),
            samples: Arc::new(Mutex::new(HashMap::new())),
            status_tx,
            task: Mutex::new(None),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> FeedStatusSnapshot {
        self.shared.lock().snapshot()
    }

    /// Subscribes to status broadcasts. Fire-and-forget: slow receivers lag,
    /// they are never waited on.
    pub fn subscribe_status(&self) -> broadcast::Receiver<FeedStatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Opens the stream. A no-op while already connecting or connected; the
    /// state machine rejects the transition in those states.
    pub async fn connect(&self) {
        {
            let mut shared = self.shared.lock();
            if !shared.machine.try_transition(FeedConnectionState::Connecting) {
                return;
            }
            if shared.reconnect_attempts >= self.config.max_reconnect_attempts {
                // Explicit connect() after a terminal failure starts with a
                // fresh retry budget.
                shared.reconnect_attempts = 0;
            }
        }
        publish_status(&self.shared, &self.status_tx);

        let stale = self.task.lock().take();
        if let Some(handle) = stale {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }

        let cancel = CancellationToken::new();
        let runtime = FeedRuntime {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            samples: Arc::clone(&self.samples),
            status_tx: self.status_tx.clone(),
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(runtime.run());
        *self.task.lock() = Some(FeedTaskHandle { cancel, join });
    }

    /// Tears the feed down: cancels the socket task (which closes the socket
    /// with a normal-closure frame and drops every pending timer), then
    /// reports a clean disconnected status. Idempotent.
    pub async fn disconnect(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }

        {
            let mut shared = self.shared.lock();
            shared.machine.try_transition(FeedConnectionState::Disconnected);
            shared.last_error = None;
        }
        publish_status(&self.shared, &self.status_tx);
    }
}

fn publish_status(shared: &Arc<Mutex<FeedShared>>, status_tx: &broadcast::Sender<FeedStatusSnapshot>) {
    let snapshot = shared.lock().snapshot();
    let _ = status_tx.send(snapshot);
}

struct FeedRuntime {
    store: Arc<AssetStore>,
    config: LiveFeedConfig,
    shared: Arc<Mutex<FeedShared>>,
    samples: Arc<Mutex<HashMap<String, PriceSample>>>,
    status_tx: broadcast::Sender<FeedStatusSnapshot>,
    cancel: CancellationToken,
}

enum SessionEnd {
    Cancelled,
    Closed(Option<String>),
    TransportError(String),
}

impl FeedRuntime {
    async fn run(self) {
        loop {
            // State on entry: Connecting, set by connect() or by the
            // reconnect arm below.
            let connect_attempt = tokio::time::timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                connect_ticker_stream(&self.config.symbols),
            );

            let failure = tokio::select! {
                _ = self.cancel.cancelled() => return,
                outcome = connect_attempt => match outcome {
                    Err(_) => Some("connection timeout".to_string()),
                    Ok(Err(error)) => Some(format!("websocket connect error: {error}")),
                    Ok(Ok(stream)) => {
                        match self.drive_session(stream).await {
                            SessionEnd::Cancelled => return,
                            SessionEnd::Closed(reason) => {
                                let mut shared = self.shared.lock();
                                shared.last_error = reason;
                                shared.machine.try_transition(FeedConnectionState::Disconnected);
                                None
                            }
                            SessionEnd::TransportError(reason) => Some(reason),
                        }
                    }
                },
            };

            if let Some(reason) = failure {
                warn!(%reason, "live feed session ended");
                let mut shared = self.shared.lock();
                shared.last_error = Some(reason);
                shared.machine.try_transition(FeedConnectionState::Error);
            }
            publish_status(&self.shared, &self.status_tx);

            let decision = {
                let mut shared = self.shared.lock();
                attempt_reconnect(&mut shared, self.config.max_reconnect_attempts)
            };
            publish_status(&self.shared, &self.status_tx);

            match decision {
                ReconnectDecision::GiveUp => return,
                ReconnectDecision::Retry { attempt } => {
                    debug!(attempt, "scheduling live feed reconnect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(self.config.reconnect_delay_ms)) => {}
                    }
                    self.shared
                        .lock()
                        .machine
                        .try_transition(FeedConnectionState::Connecting);
                    publish_status(&self.shared, &self.status_tx);
                }
            }
        }
    }

    async fn drive_session(&self, mut stream: crate::market::binance::BinanceWsStream) -> SessionEnd {
        {
            let mut shared = self.shared.lock();
            shared.machine.try_transition(FeedConnectionState::Connected);
            shared.reconnect_attempts = 0;
            shared.last_error = None;
        }
        publish_status(&self.shared, &self.status_tx);

        let ping_period = Duration::from_millis(self.config.ping_interval_ms);
        let mut ping =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = stream
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        }))
                        .await;
                    return SessionEnd::Cancelled;
                }
                _ = ping.tick() => {
                    let payload = format!("{{\"ping\":{}}}", now_unix_ms());
                    if let Err(error) = stream.send(Message::Text(payload)).await {
                        return SessionEnd::TransportError(format!("keep-alive send failed: {error}"));
                    }
                }
                frame = stream.next() => match frame {
                    None => return SessionEnd::Closed(Some("connection closed by server".to_string())),
                    Some(Err(error)) => {
                        return SessionEnd::TransportError(format!("websocket frame error: {error}"));
                    }
                    Some(Ok(message)) => {
                        if let Some(end) = self.handle_socket_message(message) {
                            return end;
                        }
                    }
                },
            }
        }
    }

    fn handle_socket_message(&self, message: Message) -> Option<SessionEnd> {
        match message {
            Message::Text(text) => {
                let mut payload = text.into_bytes();
                self.ingest_frame(&mut payload);
                None
            }
            Message::Binary(mut payload) => {
                self.ingest_frame(&mut payload);
                None
            }
            Message::Close(frame) => {
                let reason = match frame {
                    Some(frame) if !frame.reason.is_empty() => Some(format!(
                        "connection closed: {} ({})",
                        frame.reason,
                        u16::from(frame.code)
                    )),
                    Some(frame) if frame.code != CloseCode::Normal => {
                        Some(format!("connection closed with code: {}", u16::from(frame.code)))
                    }
                    _ => None,
                };
                Some(SessionEnd::Closed(reason))
            }
            _ => None,
        }
    }

    fn ingest_frame(&self, payload: &mut [u8]) {
        let now_ms = now_unix_ms();
        let should_publish = {
            let mut shared = self.shared.lock();
            shared.message_count += 1;
            shared.last_message_at_ms = Some(now_ms);
            shared.message_count == 1 || shared.message_count % STATUS_REBROADCAST_EVERY == 0
        };

        match parse_stream_frame(payload) {
            Ok(StreamFrame::Ticker(event)) => self.apply_ticker(&event, now_ms),
            Ok(StreamFrame::Pong | StreamFrame::Ignored) => {}
            Err(error) => {
                warn!(%error, "failed to decode stream frame");
                self.shared.lock().last_error = Some(format!("frame decode error: {error}"));
                publish_status(&self.shared, &self.status_tx);
            }
        }

        if should_publish {
            publish_status(&self.shared, &self.status_tx);
        }
    }

    fn apply_ticker(&self, event: &TickerEvent, now_ms: i64) {
        let Some(internal) = internal_symbol(&self.config.symbols, &event.market_symbol) else {
            debug!(symbol = %event.market_symbol, "ticker for unmapped market symbol");
            return;
        };
        let Some(asset) = self.store.find_by_symbol(internal) else {
            return;
        };

        let update = {
            let samples = self.samples.lock();
            let prior = samples.get(internal);
            reconcile_ticker(&asset, event, prior, now_ms, &mut rand::thread_rng())
        };
        self.samples.lock().insert(
            internal.to_string(),
            PriceSample {
                price: event.last_price,
                at_ms: now_ms,
            },
        );
        self.store.update_one(asset.id, update);
    }
}
