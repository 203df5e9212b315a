mod daemon;
mod profile;
mod result;
mod run;
mod schedule;

use anyhow::{Result, anyhow, bail};
use console::style;
use std::path::PathBuf;

use crate::core::generation::parse_candidates;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::core::workflow::types::StageTimeouts;
use crate::core::workflow::{WorkflowCriteria, WorkflowStatus};
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Runs")
        .command("run", "Run the pipeline once and print the result as JSON")
        .command("result <ID>", "Print an archived workflow result")
        .command("results", "List archived results for an owner")
        .print();

    GuideSection::new("Scheduling")
        .command("schedule add", "Register a cron or one-shot schedule")
        .command("schedule list", "List schedules")
        .command("schedule cancel <ID>", "Remove a schedule")
        .command("schedule enable <ID>", "Re-enable a disabled schedule")
        .command("daemon", "Drive schedules until Ctrl+C")
        .print();

    GuideSection::new("Owners")
        .command("profile set", "Store name, contact details and base resume")
        .command("profile show", "Print an owner profile")
        .print();

    GuideSection::new("Criteria flags")
        .text("--owner ID  --title T  --location L  --filter k=v (repeatable)")
        .text("--candidates FILE  --criteria FILE  --dry-run")
        .text("--max-concurrent N  --stage-timeout S  --workflow-timeout S")
        .blank()
        .hint("jobpilot run --owner ada --title \"Rust Engineer\" --dry-run", "")
        .hint("jobpilot schedule add --owner ada --cron \"0 0 9 * * *\" --title Rust", "")
        .print();

    eprintln!(
        "\n {} {} <command> [subcommand] [flags]\n",
        style("Usage:").bold(),
        style("jobpilot").green()
    );
}

/// Flags shared by every subcommand. Each command reads the ones it needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommandFlags {
    pub owner: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub filters: Vec<(String, String)>,
    pub candidates_file: Option<PathBuf>,
    pub criteria_file: Option<PathBuf>,
    pub dry_run: bool,
    pub max_concurrent: Option<usize>,
    pub stage_timeout: Option<u64>,
    pub workflow_timeout: Option<u64>,
    pub cron: Option<String>,
    pub at: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub resume_file: Option<PathBuf>,
    pub limit: Option<usize>,
    pub help: bool,
    pub positional: Vec<String>,
}

fn parse_number<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("{} expects a number, got '{}'", flag, raw))
}

pub(crate) fn parse_flags(args: &[String], start: usize) -> Result<CommandFlags> {
    let mut flags = CommandFlags::default();
    let mut i = start;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--help" | "-h" => {
                flags.help = true;
                i += 1;
                continue;
            }
            "--dry-run" => {
                flags.dry_run = true;
                i += 1;
                continue;
            }
            _ if !flag.starts_with("--") => {
                flags.positional.push(args[i].clone());
                i += 1;
                continue;
            }
            _ => {}
        }

        let Some(value) = args.get(i + 1).cloned() else {
            bail!("{} expects a value", flag);
        };
        match flag {
            "--owner" => flags.owner = Some(value),
            "--title" => flags.title = Some(value),
            "--location" => flags.location = Some(value),
            "--filter" => {
                let Some((key, val)) = value.split_once('=') else {
                    bail!("--filter expects key=value, got '{}'", value);
                };
                flags
                    .filters
                    .push((key.trim().to_string(), val.trim().to_string()));
            }
            "--candidates" => flags.candidates_file = Some(PathBuf::from(value)),
            "--criteria" => flags.criteria_file = Some(PathBuf::from(value)),
            "--max-concurrent" => flags.max_concurrent = Some(parse_number(flag, &value)?),
            "--stage-timeout" => flags.stage_timeout = Some(parse_number(flag, &value)?),
            "--workflow-timeout" => flags.workflow_timeout = Some(parse_number(flag, &value)?),
            "--cron" => flags.cron = Some(value),
            "--at" => flags.at = Some(value),
            "--name" => flags.name = Some(value),
            "--email" => flags.email = Some(value),
            "--phone" => flags.phone = Some(value),
            "--resume" => flags.resume_file = Some(PathBuf::from(value)),
            "--limit" => flags.limit = Some(parse_number(flag, &value)?),
            other => bail!("Unknown flag: {}", other),
        }
        i += 2;
    }
    Ok(flags)
}

/// Build run criteria from `--criteria FILE` (JSON) overlaid with the
/// individual flags.
pub(crate) async fn build_criteria(flags: &CommandFlags) -> Result<WorkflowCriteria> {
    let mut criteria = match &flags.criteria_file {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow!("reading {}: {}", path.display(), e))?;
            serde_json::from_str::<WorkflowCriteria>(&content)
                .map_err(|e| anyhow!("{}: {}", path.display(), e))?
        }
        None => WorkflowCriteria::new(flags.owner.clone().unwrap_or_default()),
    };

    if let Some(owner) = &flags.owner {
        criteria.owner_id = owner.clone();
    }
    if let Some(title) = &flags.title {
        criteria.search.title = Some(title.clone());
    }
    if let Some(location) = &flags.location {
        criteria.search.location = Some(location.clone());
    }
    for (key, value) in &flags.filters {
        criteria.search.filters.insert(key.clone(), value.clone());
    }
    if let Some(path) = &flags.candidates_file {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("reading {}: {}", path.display(), e))?;
        let candidates =
            parse_candidates(&content).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
        criteria.candidates = Some(candidates);
    }
    if flags.dry_run {
        criteria.automation.dry_run = true;
    }
    if let Some(n) = flags.max_concurrent {
        criteria.automation.max_concurrent_candidates = n;
    }
    if let Some(secs) = flags.stage_timeout {
        criteria.automation.stage_timeouts = StageTimeouts::uniform(secs);
    }
    if let Some(secs) = flags.workflow_timeout {
        criteria.automation.workflow_timeout_secs = Some(secs);
    }
    Ok(criteria)
}

pub(crate) fn exit_code(status: WorkflowStatus) -> i32 {
    match status {
        WorkflowStatus::Succeeded | WorkflowStatus::PartialFailure => 0,
        WorkflowStatus::Cancelled => 2,
        WorkflowStatus::Failed | WorkflowStatus::Running => 1,
    }
}

/// Data directory, created owner-only on first use.
pub(crate) fn ensure_data_dir() -> Result<PathBuf> {
    let dir = NativePlatform::data_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        NativePlatform::restrict_dir_permissions(&dir);
    }
    Ok(dir)
}

pub(crate) fn require_owner(flags: &CommandFlags) -> Result<String> {
    flags
        .owner
        .clone()
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| anyhow!("--owner is required"))
}

/// Dispatch the command line; the returned value is the process exit code.
pub async fn run_main() -> Result<i32> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(0);
    };

    match cmd {
        "run" => run::run_once(&args).await,
        "schedule" | "schedules" => schedule::run_schedule_command(&args).await,
        "result" => result::show_result(&args).await,
        "results" => result::list_results(&args).await,
        "profile" => profile::run_profile_command(&args).await,
        "daemon" => daemon::run_daemon().await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(0)
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(1)
        }
    }
}
