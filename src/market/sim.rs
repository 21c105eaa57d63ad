use crate::market::store::AssetStore;
use crate::market::types::{round2, Asset, AssetUpdate, SimulatedFeedConfig};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One tick's worth of random perturbation for a single asset. Price and
/// volume deltas are multiplicative percentages; the change fields move by
/// additive points.
#[derive(Debug, Clone, PartialEq)]
pub struct TickDeltas {
    pub price_pct: f64,
    pub change1h_pts: f64,
    pub change24h_pts: f64,
    pub change7d_pts: f64,
    pub volume_pct: f64,
}

impl TickDeltas {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            price_pct: rng.gen_range(-2.0..=2.0),
            change1h_pts: rng.gen_range(-0.5..=0.5),
            change24h_pts: rng.gen_range(-0.3..=0.3),
            change7d_pts: rng.gen_range(-0.2..=0.2),
            volume_pct: rng.gen_range(-5.0..=5.0),
        }
    }
}

/// Applies one simulated tick to an asset. Price and percentages round to
/// two decimals, volume to the nearest integer.
pub fn simulated_update(asset: &Asset, deltas: &TickDeltas) -> AssetUpdate {
    AssetUpdate {
        price: Some(round2(asset.price * (1.0 + deltas.price_pct / 100.0))),
        change1h: Some(round2(asset.change1h + deltas.change1h_pts)),
        change24h: Some(round2(asset.change24h + deltas.change24h_pts)),
        change7d: Some(round2(asset.change7d + deltas.change7d_pts)),
        volume24h: Some((asset.volume24h * (1.0 + deltas.volume_pct / 100.0)).round()),
        ..Default::default()
    }
}

struct SimTaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Randomized-walk stand-in for the live feed: a repeating timer that
/// perturbs every asset each tick and writes through the store.
pub struct SimulatedFeed {
    store: Arc<AssetStore>,
    config: SimulatedFeedConfig,
    task: Mutex<Option<SimTaskHandle>>,
}

impl SimulatedFeed {
    pub fn new(store: Arc<AssetStore>, config: SimulatedFeedConfig) -> Self {
        Self {
            store,
            config,
            task: Mutex::new(None),
        }
    }

    /// Starts the tick loop. A no-op while already running.
    pub fn start(&self) {
        let mut slot = self.task.lock();
        if slot
            .as_ref()
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
        {
            return;
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = Arc::clone(&self.store);
        let period = Duration::from_millis(self.config.tick_interval_ms);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut rng = rand::thread_rng();
                        for asset in store.assets() {
                            let deltas = TickDeltas::random(&mut rng);
                            store.update_one(asset.id, simulated_update(&asset, &deltas));
                        }
                    }
                }
            }
            debug!("simulated feed stopped");
        });

        *slot = Some(SimTaskHandle { cancel, join });
    }

    /// Stops the tick loop and clears the handle. A no-op while not running.
    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.join.is_finished())
            .unwrap_or(false)
    }
}
