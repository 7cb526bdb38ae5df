//! Background scheduled tasks for the application.
//!
//! Call `spawn_all` once during startup to launch them.

use chrono::Utc;

use crate::services::{ActivationService, Activator};

/// Spawn all background tasks.
///
/// Notes
/// - Activation jobs are durable; a restart picks up whatever is due.
/// - This function detaches tasks via `tokio::spawn`; it does not block.
pub fn spawn_all<A: Activator>(activation_service: ActivationService<A>) {
    // 定时执行到期的自动激活任务
    {
        let svc = activation_service.clone();
        let interval = svc.poll_interval();
        tokio::spawn(async move {
            log::info!("Activation poller started, interval {}s", interval.as_secs());
            loop {
                match svc.run_due(Utc::now()).await {
                    Ok(report) if !report.is_empty() => log::info!(
                        "Activation jobs processed: activated={} skipped={} retried={} abandoned={}",
                        report.activated,
                        report.skipped,
                        report.retried,
                        report.abandoned
                    ),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to poll activation jobs: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}
