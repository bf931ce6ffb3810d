use std::sync::Arc;

use tokio::sync::watch;

use crate::queue::QueueService;

/// Start the queue scheduler on a dedicated OS thread with its own
/// single-threaded Tokio runtime. Ticks run strictly one after another until
/// shutdown is signaled.
pub fn run_scheduler(
    queue: Arc<QueueService>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("crm-queue-scheduler".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build scheduler runtime: {e}");
                    return;
                }
            };

            runtime.block_on(run(queue, shutdown));
        })
}

/// Tick, then sleep for whatever the tick asked for, until shutdown.
async fn run(queue: Arc<QueueService>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!(
        interval_secs = queue.queue_config().tick_interval.as_secs(),
        "CRM queue scheduler started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let report = queue.run_batch().await;

        tokio::select! {
            _ = tokio::time::sleep(report.reschedule_after()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("CRM queue scheduler stopped");
}
