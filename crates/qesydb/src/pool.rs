//! Connection pool utilities

use crate::config::DbConfig;
use crate::error::{OrmError, OrmResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_postgres::NoTls;

/// Create a connection pool from a [`DbConfig`].
///
/// Connections are opened lazily. Call [`spawn_maintenance`] to keep
/// `min_connections` warm and retire old or idle connections.
///
/// # Example
///
/// ```ignore
/// let config = qesydb::DbConfig::new("localhost", 5432, "postgres", "postgres", "app");
/// let pool = qesydb::create_pool(&config)?;
/// let client = pool.get().await?;
/// ```
pub fn create_pool(config: &DbConfig) -> OrmResult<Pool> {
    config.validate()?;

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(config.pg_config(), NoTls, manager_config);

    let mut builder = Pool::builder(mgr)
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1);
    if let Some(wait) = config.wait_timeout {
        builder = builder.wait_timeout(Some(wait));
    }
    builder.build().map_err(|e| OrmError::Pool(e.to_string()))
}

/// Spawn the pool housekeeping task.
///
/// Every `health_check_interval` it drops connections older than
/// `max_lifetime` or unused for longer than `idle_timeout`, then opens
/// connections until the pool holds at least `min_connections`.
/// Abort the returned handle to stop it.
pub fn spawn_maintenance(pool: Pool, config: &DbConfig) -> JoinHandle<()> {
    let max_lifetime = config.max_lifetime;
    let idle_timeout = config.idle_timeout;
    let min = config.min_connections.min(config.max_connections);
    let period = config.health_check_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let retained = pool.retain(|_, metrics| {
                metrics.age() < max_lifetime && metrics.last_used() < idle_timeout
            });
            if !retained.removed.is_empty() {
                tracing::debug!(
                    target: "qesydb.pool",
                    removed = retained.removed.len(),
                    "retired expired connections"
                );
            }

            warm_up(&pool, min, period).await;
        }
    })
}

/// Open connections until the pool holds at least `min`.
///
/// Idle connections picked up on the way are held only until the target is
/// reached. Each checkout gives up after `checkout_timeout`, so the task never
/// queues behind callers on an exhausted pool.
async fn warm_up(pool: &Pool, min: usize, checkout_timeout: Duration) {
    let mut held = Vec::new();
    while pool.status().size < min {
        match tokio::time::timeout(checkout_timeout, pool.get()).await {
            Ok(Ok(client)) => held.push(client),
            Ok(Err(e)) => {
                tracing::warn!(target: "qesydb.pool", error = %e, "pool warm-up failed");
                break;
            }
            Err(_) => break,
        }
    }
    if !held.is_empty() {
        tracing::debug!(
            target: "qesydb.pool",
            size = pool.status().size,
            "pool warmed up"
        );
    }
}
