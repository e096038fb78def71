use anyhow::Result;
use protime_core::{
    models::{
        format_hms, Decision, PendingSubmission, ProgressView, ProjectId, ReportPrefill,
        SubmissionReceipt, TaskId, TaskRef, WeekSummary,
    },
    TimerService,
};

use crate::{
    bootstrap::Engine,
    cli::{DecideArgs, PrefillArgs, StartArgs, StatusArgs, TaskArgs},
};

pub async fn start(engine: &Engine, args: &StartArgs) -> Result<()> {
    if !args.assigned.is_empty() && engine.release_orphaned_timer(&args.assigned_projects()).await? {
        println!("Dropped a timer on a project that is no longer assigned to you.");
    }

    let task = args.to_task_ref();
    let timer = engine.start(&task).await?;
    let view = engine.progress(&task).await?;
    println!(
        "Started {} / {} at {}",
        timer.project_name,
        timer.task_name,
        timer.start.time()
    );
    print_progress(&view);
    Ok(())
}

pub async fn pause(engine: &Engine) -> Result<()> {
    let receipt = engine.pause().await?;
    println!(
        "Paused {} after {}{}",
        receipt.segment.task_name,
        format_hms(receipt.segment.duration_ms()),
        sync_suffix(receipt.synced)
    );
    Ok(())
}

pub async fn flush(engine: &Engine) -> Result<()> {
    match engine.auto_flush().await? {
        Some(receipt) => println!(
            "Recorded {} of {}{}",
            format_hms(receipt.segment.duration_ms()),
            receipt.segment.task_name,
            sync_suffix(receipt.synced)
        ),
        None => println!("Nothing to record yet."),
    }
    Ok(())
}

pub async fn status(engine: &Engine, args: &StatusArgs) -> Result<()> {
    match engine.running_progress().await {
        Some((timer, view)) => {
            println!(
                "Running: {} / {} (since {}, {} this run)",
                timer.project_name,
                timer.task_name,
                timer.start.time(),
                format_hms(timer.run_ms(engine.now()))
            );
            print_progress(&view);
        }
        None => println!("No timer running."),
    }

    if let Some(project) = &args.project {
        let task = match &args.task {
            Some(task_id) => TaskRef::task(project.as_str(), "", task_id.as_str(), ""),
            None => TaskRef::project_level(project.as_str(), ""),
        };
        let view = engine.progress(&task).await?;
        let column = engine.board_column(&task).await?;
        let key = task.progress_key();
        if key.is_virtual() {
            println!("{} (whole project) [{}]", key, column);
        } else {
            println!("{} [{}]", key, column);
        }
        print_progress(&view);
    }

    print_week(&engine.week_summary().await?);
    Ok(())
}

pub async fn submit(engine: &Engine, args: &TaskArgs) -> Result<()> {
    let receipt = engine.submit_for_approval(&args.to_task_ref()).await?;
    print_receipt("Submitted", &receipt);
    Ok(())
}

pub async fn decide(engine: &Engine, args: &DecideArgs) -> Result<()> {
    let item = PendingSubmission {
        project_id: ProjectId::from(args.project.as_str()),
        project_name: args.project_name.clone(),
        task_id: args.task.as_deref().map(TaskId::from),
        task_name: args.task_name.clone(),
    };
    let decision = if args.approve {
        Decision::Approve
    } else {
        Decision::Reject
    };
    let receipt = engine.record_decision(&item, decision).await?;
    print_receipt(
        match decision {
            Decision::Approve => "Approved",
            Decision::Reject => "Rejected",
        },
        &receipt,
    );
    Ok(())
}

pub async fn plan(engine: &Engine, task: &TaskArgs, minutes: u32) -> Result<()> {
    let key = task.progress_key();
    engine.set_planned_minutes(&key, minutes).await?;
    println!("Planned {} minutes for {}", minutes, key);
    print_progress(&engine.progress(&task.to_task_ref()).await?);
    Ok(())
}

pub async fn reset(engine: &Engine, task: &TaskArgs) -> Result<()> {
    let key = task.progress_key();
    engine.reset_progress(&key).await?;
    println!("Reset recorded time of {}", key);
    Ok(())
}

pub async fn pending(engine: &Engine) -> Result<()> {
    let items = engine.pending_submissions().await?;
    if items.is_empty() {
        println!("Nothing waiting for approval.");
        return Ok(());
    }
    for item in items {
        if item.is_virtual() {
            println!("{}  {} (whole project)", item.project_id, item.project_name);
        } else {
            println!(
                "{}  {} / {}",
                item.project_id, item.project_name, item.task_name
            );
        }
    }
    Ok(())
}

pub async fn prefill(engine: &Engine, args: &PrefillArgs) -> Result<()> {
    let store = engine.store();
    if args.take {
        match store.consume_report_prefill().await? {
            Some(prefill) => println!("{}", serde_json::to_string_pretty(&prefill)?),
            None => println!("No report filters stored."),
        }
        return Ok(());
    }

    let prefill = ReportPrefill {
        project_id: args.project.as_deref().map(ProjectId::from),
        start_date: args.from,
        end_date: args.to,
    };
    store.set_report_prefill(&prefill).await?;
    println!("Stored report filters for the next report run.");
    Ok(())
}

fn print_progress(view: &ProgressView) {
    println!(
        "  spent {}  planned {}  remaining {}{}",
        format_hms(view.spent_ms),
        format_hms(view.planned_ms),
        format_hms(view.remaining_ms),
        if view.overtime_ms > 0 {
            format!("  overtime {}", format_hms(view.overtime_ms))
        } else {
            String::new()
        }
    );
}

fn print_week(week: &WeekSummary) {
    match week.remote_hours {
        Some(_) => println!(
            "Week of {}: {:.2} h",
            week.week_start,
            week.total_hours()
        ),
        None => println!(
            "Week of {}: {:.2} h (server unreachable, local time only)",
            week.week_start,
            week.total_hours()
        ),
    }
}

fn print_receipt(verb: &str, receipt: &SubmissionReceipt) {
    println!(
        "{} {} (now {}){}",
        verb,
        receipt.key,
        receipt.local_status,
        sync_suffix(receipt.remote.is_confirmed())
    );
}

fn sync_suffix(synced: bool) -> &'static str {
    if synced {
        ""
    } else {
        " [saved locally, not synced]"
    }
}
