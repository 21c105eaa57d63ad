use crate::error::AppError;
use crate::market::live::LiveFeed;
use crate::market::persistence::{self, StateWriter, DEFAULT_SAVE_THROTTLE_MS};
use crate::market::sim::SimulatedFeed;
use crate::market::store::AssetStore;
use crate::market::types::{seed_assets, DashboardState, LiveFeedArgs, SimulatedFeedArgs};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Wires store, feeds and persistence together. Every service gets its
/// dependencies handed in here; nothing reaches for process-wide globals.
pub struct App {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub store: Arc<AssetStore>,
    pub live_feed: LiveFeed,
    pub simulated_feed: SimulatedFeed,
    state_writer: Mutex<Option<StateWriter>>,
}

impl App {
    /// Restores the persisted dashboard state, or seeds the built-in asset
    /// list when none exists, then constructs both feeds over the shared
    /// store.
    pub async fn bootstrap(
        db_pool: SqlitePool,
        live_args: LiveFeedArgs,
        sim_args: SimulatedFeedArgs,
    ) -> Result<Self, AppError> {
        let live_config = live_args.normalize()?;
        let sim_config = sim_args.normalize()?;

        let state = match persistence::load_state(&db_pool).await? {
            Some(state) => {
                info!(assets = state.assets.len(), "restored persisted dashboard state");
                state
            }
            None => {
                info!("no persisted dashboard state, seeding defaults");
                DashboardState::new(seed_assets(&mut rand::thread_rng()))
            }
        };

        let store = Arc::new(AssetStore::from_snapshot(state));
        let live_feed = LiveFeed::new(Arc::clone(&store), live_config);
        let simulated_feed = SimulatedFeed::new(Arc::clone(&store), sim_config);

        Ok(Self {
            started_at: Instant::now(),
            db_pool,
            store,
            live_feed,
            simulated_feed,
            state_writer: Mutex::new(None),
        })
    }

    /// Starts the throttled persistence task. A no-op while one is running.
    pub fn start_state_writer(&self) {
        let mut slot = self.state_writer.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(persistence::spawn_state_writer(
            self.db_pool.clone(),
            Arc::clone(&self.store),
            DEFAULT_SAVE_THROTTLE_MS,
        ));
    }

    /// Stops both feeds and the persistence task, flushing the latest state.
    pub async fn shutdown(&self) {
        self.simulated_feed.stop().await;
        self.live_feed.disconnect().await;

        let writer = self.state_writer.lock().take();
        if let Some(writer) = writer {
            writer.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::market::persistence::{load_state, save_state};
    use crate::market::types::{AssetUpdate, FeedConnectionState, SortField};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[tokio::test]
    async fn bootstrap_seeds_defaults_on_a_fresh_database() {
        let pool = memory_pool().await.expect("pool should initialize");
        let app = App::bootstrap(pool, LiveFeedArgs::default(), SimulatedFeedArgs::default())
            .await
            .expect("bootstrap should succeed");

        let snapshot = app.store.snapshot();
        assert_eq!(snapshot.assets.len(), 5);
        assert_eq!(snapshot.assets[0].symbol, "BTC");
        assert_eq!(snapshot.sort_by, None);
        assert_eq!(
            app.live_feed.status().state,
            FeedConnectionState::Disconnected
        );
        assert!(!app.simulated_feed.is_running());
    }

    #[tokio::test]
    async fn bootstrap_restores_the_persisted_state() {
        let pool = memory_pool().await.expect("pool should initialize");

        let mut rng = StdRng::seed_from_u64(3);
        let mut state = DashboardState::new(seed_assets(&mut rng));
        state.assets[0].price = 72_000.0;
        state.sort_by = Some(SortField::MarketCap);
        save_state(&pool, &state).await.expect("save should succeed");

        let app = App::bootstrap(pool, LiveFeedArgs::default(), SimulatedFeedArgs::default())
            .await
            .expect("bootstrap should succeed");

        assert_eq!(app.store.snapshot(), state);
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_feed_args() {
        let pool = memory_pool().await.expect("pool should initialize");
        let result = App::bootstrap(
            pool,
            LiveFeedArgs {
                reconnect_delay_ms: Some(1),
                ..Default::default()
            },
            SimulatedFeedArgs::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_flushes_the_latest_state() {
        let pool = memory_pool().await.expect("pool should initialize");
        let app = App::bootstrap(
            pool.clone(),
            LiveFeedArgs::default(),
            SimulatedFeedArgs::default(),
        )
        .await
        .expect("bootstrap should succeed");

        app.start_state_writer();
        app.start_state_writer();
        app.store.update_one(
            1,
            AssetUpdate {
                price: Some(73_000.0),
                ..Default::default()
            },
        );
        app.shutdown().await;

        let loaded = load_state(&pool)
            .await
            .expect("load should succeed")
            .expect("state should have been flushed");
        assert_eq!(loaded.assets[0].price, 73_000.0);
    }
}
