use std::{future::Future, sync::Arc, time::Duration};

use tally_components::{backends::BackendConfiguration, sources::StatsdConfiguration};
use tally_config::GenericConfiguration;
use tally_core::{aggregator::Aggregator, backend::Backend, config::FlushConfiguration, store::MetricStore};
use tally_error::GenericError;
use tokio::{
    pin, select,
    sync::oneshot,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::config::TallydConfiguration;

/// Runs the daemon until Ctrl-C is received.
///
/// Every component is configured before anything starts, so configuration errors surface before the first flush.
pub async fn run(configuration: GenericConfiguration) -> Result<(), GenericError> {
    let daemon_config = TallydConfiguration::from_configuration(&configuration)?;
    let flush_config = FlushConfiguration::from_configuration(&configuration)?;
    let statsd_config = StatsdConfiguration::from_configuration(&configuration)?;
    let backend_config = BackendConfiguration::from_configuration(&configuration)?;

    let store = Arc::new(MetricStore::new());
    let aggregator = Aggregator::new(Arc::clone(&store), flush_config).with_debug(daemon_config.debug());
    let backend = backend_config.build(&configuration, aggregator)?;
    let source = statsd_config.build(Arc::clone(&store)).await?;

    info!(
        backend = backend.name(),
        listen_address = %source.local_addr()?,
        flush_interval_secs = daemon_config.flush_interval().as_secs(),
        "tallyd started."
    );

    let (listener_shutdown_tx, listener_shutdown_rx) = oneshot::channel::<()>();
    let listener = tokio::spawn(source.run(async move {
        let _ = listener_shutdown_rx.await;
    }));

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C. Shutting down.");
        }
    };

    run_flush_loop(
        backend.as_ref(),
        daemon_config.flush_interval(),
        ctrl_c,
        move || async move {
            info!("Received shutdown signal. Stopping listener and flushing remaining metrics.");
            let _ = listener_shutdown_tx.send(());
            if let Err(e) = listener.await {
                warn!(error = %e, "Statsd listener task failed.");
            }
        },
    )
    .await;

    Ok(())
}

/// Flushes `backend` every `flush_interval` until `shutdown` resolves, then runs `before_final_flush` and flushes one
/// last time.
///
/// The first flush happens one full interval after starting. Flushes that fail are logged and do not stop the loop.
async fn run_flush_loop<S, B, BF>(backend: &dyn Backend, flush_interval: Duration, shutdown: S, before_final_flush: B)
where
    S: Future<Output = ()>,
    B: FnOnce() -> BF,
    BF: Future<Output = ()>,
{
    pin!(shutdown);

    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => flush_once(backend, flush_interval).await,
        }
    }

    before_final_flush().await;
    flush_once(backend, flush_interval).await;
}

async fn flush_once(backend: &dyn Backend, flush_interval: Duration) {
    let deadline = Instant::now() + flush_interval;
    match backend.submit(deadline).await {
        Ok(summary) => debug!(
            backend = backend.name(),
            records = summary.records_sent,
            "Flush cycle complete."
        ),
        Err(e) => error!(backend = backend.name(), error = ?e, "Failed to flush metrics."),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use tally_core::backend::SubmitSummary;
    use tally_error::generic_error;
    use tokio::time::sleep;

    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        calls: AtomicUsize,
        deadlines: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn submit(&self, deadline: Instant) -> Result<SubmitSummary, GenericError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.deadlines.lock().unwrap().push(deadline);

            // Every other flush fails; the loop has to keep going regardless.
            if call % 2 == 1 {
                return Err(generic_error!("backend unavailable"));
            }
            Ok(SubmitSummary { records_sent: 1 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_interval_and_once_more_on_shutdown() {
        let backend = RecordingBackend::default();
        let started = Instant::now();
        let stopped_listener = AtomicBool::new(false);
        let stopped = &stopped_listener;

        run_flush_loop(
            &backend,
            Duration::from_secs(10),
            sleep(Duration::from_secs(35)),
            move || async move {
                stopped.store(true, Ordering::SeqCst);
            },
        )
        .await;

        // Ticks at 10s, 20s, and 30s, then the final flush at shutdown.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(stopped_listener.load(Ordering::SeqCst));

        let deadlines = backend.deadlines.lock().unwrap();
        assert_eq!(deadlines[0] - started, Duration::from_secs(20));
        assert_eq!(deadlines[3] - started, Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_shutdown_still_flushes() {
        let backend = RecordingBackend::default();
        run_flush_loop(&backend, Duration::from_secs(10), async {}, || async {}).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
