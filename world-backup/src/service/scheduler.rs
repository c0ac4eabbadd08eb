//! Periodic background cleanup.

use super::BackupService;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

impl BackupService {
    /// Run cleanup for `world` every configured period until the service is disposed.
    ///
    /// Each wait gets a random jitter on top so several servers started
    /// together do not clean up in lockstep. Returns `None` when the period is 0.
    /// The task only holds a weak reference; dropping the last service handle
    /// ends it as well.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, world: PathBuf) -> Option<JoinHandle<()>> {
        let period = self.config.cleanup.period();
        if period.is_zero() {
            return None;
        }
        let jitter = self.config.cleanup.jitter();
        let service = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut last_run: Option<Instant> = None;
            let mut delay = random_delay(jitter);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let Some(service) = service.upgrade() else {
                    break;
                };

                if last_run.map_or(true, |at| at.elapsed() >= period) {
                    last_run = Some(Instant::now());
                    match service.start_cleanup(&world, &CancellationToken::new()).await {
                        Ok(deleted) => debug!("Scheduled cleanup removed {} entries", deleted.len()),
                        Err(e) if e.is_canceled() => break,
                        Err(e) => error!("Scheduled cleanup of {} failed: {}", world.display(), e),
                    }
                }

                drop(service);
                delay = period + random_delay(jitter);
            }

            info!("Cleanup scheduler stopped");
        }))
    }
}

fn random_delay(jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..=jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BackupEntry;
    use crate::config::{RuntimeSettings, ServiceConfig};
    use crate::daemon::shutdown::ShutdownCoordinator;
    use crate::repo::{Entry, Repository};
    use crate::strategy::BackupStrategy;
    use crate::sync::RsyncCodec;
    use crate::utils::errors::Result;
    use chrono::NaiveDateTime;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStrategy {
        cleanups: AtomicUsize,
    }

    impl BackupStrategy for CountingStrategy {
        fn select_reference(&self, _: &Repository, _: NaiveDateTime) -> Result<Option<BackupEntry>> {
            Ok(None)
        }

        fn list_expired(&self, _: &Repository, _: NaiveDateTime) -> Result<Vec<Entry>> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn service_with(config: ServiceConfig, strategy: Arc<CountingStrategy>) -> Arc<BackupService> {
        let settings = Arc::new(RuntimeSettings::from_config(&config));
        Arc::new(BackupService::with_parts(
            config,
            strategy,
            Arc::new(RsyncCodec::new()),
            settings,
        ))
    }

    #[test]
    fn test_random_delay_bounds() {
        assert_eq!(random_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_delay(Duration::from_millis(10)) <= Duration::from_millis(10));
        }
    }

    #[tokio::test]
    async fn test_disabled_period_spawns_nothing() {
        let mut config = ServiceConfig::default();
        config.cleanup.period_secs = 0;
        let service = service_with(config, Arc::default());

        assert!(service.spawn_cleanup_loop(PathBuf::from("w.wld")).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_runs_and_stops_on_dispose() {
        let dir = tempfile::TempDir::new().unwrap();
        let world = dir.path().join("w.wld");
        std::fs::write(&world, b"world").unwrap();
        Repository::for_world(&world, true).unwrap();

        let mut config = ServiceConfig::default();
        config.cleanup.period_secs = 3600;
        config.cleanup.jitter_secs = 0;
        let strategy = Arc::new(CountingStrategy::default());
        let service = service_with(config, strategy.clone());

        let handle = service.spawn_cleanup_loop(world).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while strategy.cleanups.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(strategy.cleanups.load(Ordering::SeqCst), 1);

        service.dispose();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown_token() {
        let mut config = ServiceConfig::default();
        config.cleanup.period_secs = 3600;
        config.cleanup.jitter_secs = 3600;
        let strategy = Arc::new(CountingStrategy::default());
        let service = service_with(config, strategy.clone());

        let handle = service.spawn_cleanup_loop(PathBuf::from("w.wld")).unwrap();
        let coordinator = ShutdownCoordinator::with_token(service.shutdown_token());
        service.shutdown_token().cancel();
        coordinator.wait_for_signal().await;

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(strategy.cleanups.load(Ordering::SeqCst), 0);

        let result = service.start_cleanup(Path::new("w.wld"), &CancellationToken::new()).await;
        assert!(result.unwrap_err().is_canceled());
    }
}
