//! Whole-run lock shared by concurrent installer and upgrade invocations.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::LockConfig;
use crate::core::traits::BackendAdapter;
use crate::error::{LoaderError, Result};

/// A held run lock. Release it explicitly; dropping it leaves the lock to expire.
pub struct RunLock<'a> {
    adapter: &'a dyn BackendAdapter,
    name: String,
    owner: String,
}

impl<'a> RunLock<'a> {
    /// Poll until the lock is taken or `timeout_secs` has passed.
    pub async fn acquire(adapter: &'a dyn BackendAdapter, config: &LockConfig) -> Result<Self> {
        let owner = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + Duration::from_secs(config.timeout_secs);
        let poll = Duration::from_millis(config.poll_interval_ms);

        info!("Acquiring lock {} as {}", config.name, owner);
        loop {
            if adapter
                .acquire_lock(&config.name, &owner, config.ttl_secs)
                .await?
            {
                info!("Lock {} acquired", config.name);
                return Ok(Self {
                    adapter,
                    name: config.name.clone(),
                    owner,
                });
            }
            if Instant::now() >= deadline {
                return Err(LoaderError::Lock(format!(
                    "{} is held by another run (waited {}s)",
                    config.name, config.timeout_secs
                )));
            }
            debug!("Lock {} is held, retrying in {:?}", config.name, poll);
            tokio::time::sleep(poll).await;
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn release(self) {
        match self.adapter.release_lock(&self.name, &self.owner).await {
            Ok(()) => info!("Lock {} released", self.name),
            Err(e) => warn!("Failed to release lock {}: {}", self.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::layout::{LOCK_EXPIRES_AT, LOCK_OWNER, LOCK_TABLE};
    use crate::core::rules::ServerVersion;
    use crate::core::value::SqlValue;
    use crate::drivers::{MemoryAdapter, PostgresDialect};

    fn lock_config(timeout_secs: u64) -> LockConfig {
        LockConfig {
            timeout_secs,
            poll_interval_ms: 10,
            ..LockConfig::default()
        }
    }

    #[tokio::test]
    async fn test_second_run_times_out_until_release() {
        let adapter = MemoryAdapter::new(Arc::new(PostgresDialect::new()), ServerVersion::latest());
        let first = RunLock::acquire(&adapter, &lock_config(0)).await.unwrap();

        let err = RunLock::acquire(&adapter, &lock_config(0)).await.err().unwrap();
        assert!(matches!(err, LoaderError::Lock(_)));
        assert_eq!(err.exit_code(), 6);

        first.release().await;
        let second = RunLock::acquire(&adapter, &lock_config(0)).await.unwrap();
        assert_ne!(second.owner(), "");
        second.release().await;
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let adapter = MemoryAdapter::new(Arc::new(PostgresDialect::new()), ServerVersion::latest());
        assert!(adapter.acquire_lock("init", "crashed-run", 0).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let config = LockConfig {
            name: "init".into(),
            ..lock_config(0)
        };
        let lock = RunLock::acquire(&adapter, &config).await.unwrap();
        lock.release().await;
    }

    #[tokio::test]
    async fn test_stale_takeover_loses_to_first_contender() {
        let adapter = MemoryAdapter::new(Arc::new(PostgresDialect::new()), ServerVersion::latest());
        assert!(adapter.acquire_lock("init", "crashed-run", 0).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let observed = adapter
            .fetch_row(LOCK_TABLE, "init", &[LOCK_EXPIRES_AT])
            .await
            .unwrap()
            .and_then(|r| r.get(LOCK_EXPIRES_AT).cloned())
            .unwrap();

        assert!(adapter.acquire_lock("init", "run-a", 60).await.unwrap());
        // A contender that read the expired row before run-a replaced it.
        assert!(!adapter
            .delete_row_if(LOCK_TABLE, "init", LOCK_EXPIRES_AT, &observed)
            .await
            .unwrap());
        assert!(!adapter.acquire_lock("init", "run-b", 60).await.unwrap());

        let holder = adapter
            .fetch_row(LOCK_TABLE, "init", &[LOCK_OWNER])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.get(LOCK_OWNER), Some(&SqlValue::from("run-a")));
    }

    #[tokio::test]
    async fn test_concurrent_takeover_has_one_winner() {
        let adapter = MemoryAdapter::new(Arc::new(PostgresDialect::new()), ServerVersion::latest());
        assert!(adapter.acquire_lock("init", "crashed-run", 0).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (a, b) = tokio::join!(
            adapter.acquire_lock("init", "run-a", 60),
            adapter.acquire_lock("init", "run-b", 60)
        );
        assert!(a.unwrap() ^ b.unwrap());
    }
}
