use anyhow::Result;
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::ensure_data_dir;
use crate::core::bootstrap::Runtime;
use crate::core::lifecycle::LifecycleManager;
use crate::core::scheduler::{Scheduler, SchedulerComponent};
use crate::core::terminal::GuideSection;

/// One scheduler tick: pick up schedules edited from the CLI, then fire what is due.
async fn drive(scheduler: Arc<Scheduler>) {
    if let Err(e) = scheduler.sync_from_database().await {
        warn!("Schedule sync failed: {}", e);
    }
    let fired = scheduler.tick().await;
    if !fired.is_empty() {
        info!(runs = fired.len(), "Scheduler dispatched runs");
    }
}

pub async fn run_daemon() -> Result<i32> {
    let data_dir = ensure_data_dir()?;
    let log_path = data_dir.join("logs").join("daemon.log");
    crate::logging::init(Some(&log_path))?;

    let runtime = Runtime::boot(&data_dir).await?;
    let scheduler = runtime.scheduler.clone();
    let interval = runtime.config.tick_interval();

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(SchedulerComponent::new(scheduler.clone()))));
    lifecycle
        .every(interval, move || drive(scheduler.clone()))
        .await?;
    lifecycle.start().await?;

    GuideSection::new("Daemon Running")
        .status("Data", &data_dir.display().to_string())
        .status("Log", &log_path.display().to_string())
        .status("Tick", &format!("every {}s", interval.as_secs()))
        .status("Schedules", &runtime.scheduler.list().len().to_string())
        .blank()
        .text(&format!("Press {} to stop.", style("Ctrl+C").bold().yellow()))
        .print();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(0)
}
