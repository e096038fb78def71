use anyhow::{Context, Result};
use protime_core::{models::format_hms, ReconciliationScheduler, SchedulerMessage, TickReport};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bootstrap::Engine;

/// Keep the engine reconciled in the foreground, printing a status line per
/// UI tick, until Ctrl-C.
pub async fn run_foreground(engine: Arc<Engine>) -> Result<()> {
    let scheduler = Arc::new(ReconciliationScheduler::new(engine));
    let mut reports = scheduler.subscribe();
    let (control, rx) = mpsc::channel(8);

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    // Record anything left over from a previous run straight away.
    control
        .send(SchedulerMessage::ForceFlush)
        .await
        .context("scheduler stopped before it started")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl-C")?;
                println!();
                break;
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = reports.borrow_and_update().clone();
                println!("{}", status_line(&report));
            }
        }
    }

    // The runner may already be gone if the channel closed.
    let _ = control.send(SchedulerMessage::Stop).await;
    runner.await.context("scheduler task panicked")?;
    Ok(())
}

fn status_line(report: &TickReport) -> String {
    let timer = match (&report.active, &report.progress) {
        (Some(active), Some(view)) => format!(
            "{} / {}  {} of {}{}",
            active.project_name,
            active.task_name,
            format_hms(view.spent_ms),
            format_hms(view.planned_ms),
            if view.overtime_ms > 0 { "  OVERTIME" } else { "" }
        ),
        _ => "idle".to_string(),
    };
    match report.week {
        Some(week) => format!("{timer}  |  week {:.2} h", week.total_hours()),
        None => timer,
    }
}
