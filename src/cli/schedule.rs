use anyhow::{Result, bail};
use serde_json::json;

use super::{CommandFlags, build_criteria, ensure_data_dir, parse_flags};
use crate::core::bootstrap::DATABASE_FILE;
use crate::core::config::AppConfig;
use crate::core::persistence::Database;
use crate::core::scheduler::{ScheduleEntry, Scheduler, Trigger};
use crate::core::terminal::{GuideSection, print_error, print_info, print_success};

fn print_schedule_help() {
    GuideSection::new("jobpilot schedule")
        .command("add", "--owner ID (--cron EXPR | --at RFC3339) [--name ID] [criteria flags]")
        .command("list", "[--owner ID]")
        .command("cancel", "<ID>")
        .command("enable", "<ID>")
        .blank()
        .text("Cron expressions start with seconds: \"0 0 9 * * *\" runs daily at 09:00 UTC.")
        .print();
}

/// Scheduler over the persisted table, without a runner.
async fn open_scheduler() -> Result<Scheduler> {
    let data_dir = ensure_data_dir()?;
    let config = AppConfig::load(&data_dir).await?;
    let db = Database::open(data_dir.join(DATABASE_FILE)).await?;
    Ok(Scheduler::new(config.scheduler.max_consecutive_failures).with_database(db))
}

pub(crate) fn trigger_from_flags(flags: &CommandFlags) -> Result<Trigger> {
    match (&flags.cron, &flags.at) {
        (Some(expr), None) => Ok(Trigger::cron(expr)?),
        (None, Some(at)) => Ok(Trigger::parse_once(at)?),
        (Some(_), Some(_)) => bail!("use either --cron or --at, not both"),
        (None, None) => bail!("a schedule needs --cron EXPR or --at RFC3339"),
    }
}

pub async fn run_schedule_command(args: &[String]) -> Result<i32> {
    let sub_cmd = args.get(2).map(String::as_str).unwrap_or("");
    let flags = parse_flags(args, 3)?;
    if flags.help {
        print_schedule_help();
        return Ok(0);
    }

    match sub_cmd {
        "add" => {
            let trigger = trigger_from_flags(&flags)?;
            let criteria = build_criteria(&flags).await?;
            let scheduler = open_scheduler().await?;
            let entry = ScheduleEntry::new(flags.name.clone().unwrap_or_default(), trigger, criteria);
            let id = scheduler.register(entry).await?;
            if let Some(entry) = scheduler.get(&id)
                && let Some(next) = entry.next_run
            {
                print_success(&format!("Schedule {} registered, next run {}", id, next.to_rfc3339()));
            }
            println!("{}", id);
            Ok(0)
        }
        "list" => {
            let scheduler = open_scheduler().await?;
            scheduler.load_persisted().await?;
            let rows: Vec<_> = scheduler
                .list()
                .into_iter()
                .filter(|e| flags.owner.as_ref().is_none_or(|o| &e.owner_id == o))
                .map(|e| {
                    json!({
                        "schedule_id": e.schedule_id,
                        "owner_id": e.owner_id,
                        "trigger": { "kind": e.trigger.kind(), "expression": e.trigger.expression() },
                        "enabled": e.enabled,
                        "state": e.state,
                        "last_run": e.last_run,
                        "next_run": e.next_run,
                        "consecutive_failures": e.consecutive_failures,
                        "runs": e.history.len(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(0)
        }
        "cancel" | "enable" => {
            let Some(id) = flags.positional.first() else {
                print_error(&format!("Usage: jobpilot schedule {} <ID>", sub_cmd));
                return Ok(1);
            };
            let scheduler = open_scheduler().await?;
            let (changed, done) = if sub_cmd == "cancel" {
                (scheduler.cancel(id).await?, "cancelled")
            } else {
                (scheduler.enable(id).await?, "enabled")
            };
            if changed {
                print_success(&format!("Schedule {} {}.", id, done));
                Ok(0)
            } else {
                print_info(&format!("No schedule {} to {}.", id, sub_cmd));
                Ok(1)
            }
        }
        _ => {
            print_schedule_help();
            Ok(1)
        }
    }
}
