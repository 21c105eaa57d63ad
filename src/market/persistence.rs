use crate::error::AppError;
use crate::market::store::AssetStore;
use crate::market::types::{now_unix_ms, DashboardState};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Row key of the single persisted dashboard blob.
pub const STATE_STORAGE_KEY: &str = "cryptoTrackerState";

/// Minimum gap between two persisted writes while updates keep arriving.
pub const DEFAULT_SAVE_THROTTLE_MS: u64 = 1_000;

/// Upserts the whole dashboard state as one JSON blob.
pub async fn save_state(pool: &SqlitePool, state: &DashboardState) -> Result<(), AppError> {
    let payload = simd_json::serde::to_string(state)?;
    sqlx::query(
        "INSERT INTO dashboard_state (key, payload, updated_at_ms)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             payload = excluded.payload,
             updated_at_ms = excluded.updated_at_ms",
    )
    .bind(STATE_STORAGE_KEY)
    .bind(payload)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;
    Ok(())
}

/// Loads the persisted dashboard state. Missing row and undecodable payload
/// both come back as `Ok(None)`: the caller falls back to the seed list, a
/// corrupt blob must never take the dashboard down.
pub async fn load_state(pool: &SqlitePool) -> Result<Option<DashboardState>, AppError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT payload FROM dashboard_state WHERE key = ?1")
            .bind(STATE_STORAGE_KEY)
            .fetch_optional(pool)
            .await?;

    let Some((payload,)) = row else {
        return Ok(None);
    };

    let mut bytes = payload.into_bytes();
    match simd_json::serde::from_slice::<DashboardState>(&mut bytes) {
        Ok(state) => Ok(Some(state)),
        Err(error) => {
            warn!(%error, "discarding undecodable persisted dashboard state");
            Ok(None)
        }
    }
}

pub struct StateWriter {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl StateWriter {
    /// Cancels the writer and waits for its final flush.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

/// Spawns the throttled persistence task: it wakes on every store revision,
/// writes immediately, then holds off for the throttle window so a burst of
/// feed updates collapses into one write per window. Cancellation flushes
/// once more so the latest state is never lost to the window.
pub fn spawn_state_writer(
    pool: SqlitePool,
    store: Arc<AssetStore>,
    throttle_ms: u64,
) -> StateWriter {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    // Subscribe before spawning so revisions bumped between this call and
    // the task's first poll are not missed.
    let mut revisions = store.subscribe_changes();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Err(error) = save_state(&pool, &store.snapshot()).await {
                        warn!(%error, "failed to persist dashboard state");
                    }
                    tokio::select! {
                        _ = task_cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(throttle_ms)) => {}
                    }
                }
            }
        }

        if let Err(error) = save_state(&pool, &store.snapshot()).await {
            warn!(%error, "failed to flush dashboard state on shutdown");
        }
        debug!("state writer stopped");
    });

    StateWriter { cancel, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::market::types::{seed_assets, AssetFilter, AssetUpdate, SortField};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_state() -> DashboardState {
        let mut rng = StdRng::seed_from_u64(11);
        let mut state = DashboardState::new(seed_assets(&mut rng));
        state.sort_by = Some(SortField::Price);
        state.filter = Some(AssetFilter::Gainers);
        state
    }

    #[tokio::test]
    async fn state_round_trips_through_the_database() {
        let pool = memory_pool().await.expect("pool should initialize");
        let state = sample_state();

        save_state(&pool, &state).await.expect("save should succeed");
        let loaded = load_state(&pool).await.expect("load should succeed");
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn load_returns_none_when_nothing_was_saved() {
        let pool = memory_pool().await.expect("pool should initialize");
        let loaded = load_state(&pool).await.expect("load should succeed");
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn load_discards_an_undecodable_payload() {
        let pool = memory_pool().await.expect("pool should initialize");
        sqlx::query("INSERT INTO dashboard_state (key, payload, updated_at_ms) VALUES (?1, ?2, 0)")
            .bind(STATE_STORAGE_KEY)
            .bind("{not json")
            .execute(&pool)
            .await
            .expect("insert should succeed");

        let loaded = load_state(&pool).await.expect("load should swallow decode errors");
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn save_overwrites_the_single_row() {
        let pool = memory_pool().await.expect("pool should initialize");
        let mut state = sample_state();

        save_state(&pool, &state).await.expect("save should succeed");
        state.assets[0].price = 70_000.0;
        save_state(&pool, &state).await.expect("second save should succeed");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dashboard_state")
            .fetch_one(&pool)
            .await
            .expect("count should succeed");
        assert_eq!(count, 1);

        let loaded = load_state(&pool).await.expect("load should succeed");
        assert_eq!(loaded.expect("row must exist").assets[0].price, 70_000.0);
    }

    #[tokio::test]
    async fn writer_persists_store_updates() {
        let pool = memory_pool().await.expect("pool should initialize");
        let mut rng = StdRng::seed_from_u64(11);
        let store = Arc::new(AssetStore::new(seed_assets(&mut rng)));

        let writer = spawn_state_writer(pool.clone(), Arc::clone(&store), 10);
        store.update_one(
            1,
            AssetUpdate {
                price: Some(70_000.0),
                ..Default::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let loaded = load_state(&pool)
            .await
            .expect("load should succeed")
            .expect("state should have been written");
        assert_eq!(loaded.assets[0].price, 70_000.0);

        writer.stop().await;
    }

    #[tokio::test]
    async fn writer_flushes_on_stop() {
        let pool = memory_pool().await.expect("pool should initialize");
        let mut rng = StdRng::seed_from_u64(11);
        let store = Arc::new(AssetStore::new(seed_assets(&mut rng)));

        // Long throttle: the update lands inside the hold-off window, only
        // the shutdown flush can persist it.
        let writer = spawn_state_writer(pool.clone(), Arc::clone(&store), 60_000);
        store.update_one(
            1,
            AssetUpdate {
                price: Some(71_000.0),
                ..Default::default()
            },
        );
        writer.stop().await;

        let loaded = load_state(&pool)
            .await
            .expect("load should succeed")
            .expect("flush should have written the state");
        assert_eq!(loaded.assets[0].price, 71_000.0);
    }
}
