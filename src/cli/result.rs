use anyhow::Result;
use serde_json::json;

use super::{ensure_data_dir, parse_flags, require_owner};
use crate::core::bootstrap::DATABASE_FILE;
use crate::core::persistence::Database;
use crate::core::terminal::print_error;

const DEFAULT_LIMIT: usize = 20;

async fn open_database() -> Result<Database> {
    let data_dir = ensure_data_dir()?;
    Database::open(data_dir.join(DATABASE_FILE)).await
}

/// `result ID`: print one archived result; exit 1 when unknown.
pub async fn show_result(args: &[String]) -> Result<i32> {
    let flags = parse_flags(args, 2)?;
    let Some(workflow_id) = flags.positional.first() else {
        print_error("Usage: jobpilot result <WORKFLOW_ID>");
        return Ok(1);
    };

    let db = open_database().await?;
    match db.get_result(workflow_id).await? {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(0)
        }
        None => {
            print_error(&format!("No workflow result with id {}", workflow_id));
            Ok(1)
        }
    }
}

/// `results --owner ID [--limit N]`: newest first.
pub async fn list_results(args: &[String]) -> Result<i32> {
    let flags = parse_flags(args, 2)?;
    let owner = require_owner(&flags)?;
    let db = open_database().await?;
    let results = db
        .list_results_for_owner(&owner, flags.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    let rows: Vec<_> = results
        .iter()
        .map(|r| {
            json!({
                "workflow_id": r.workflow_id,
                "status": r.status,
                "started_at": r.started_at,
                "finished_at": r.finished_at,
                "candidates_found": r.candidates_found,
                "applications_submitted": r.applications_submitted,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(0)
}
