use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{build_criteria, ensure_data_dir, exit_code, parse_flags};
use crate::core::bootstrap::Runtime;
use crate::core::terminal::GuideSection;

pub async fn run_once(args: &[String]) -> Result<i32> {
    let flags = parse_flags(args, 2)?;
    if flags.help {
        GuideSection::new("jobpilot run")
            .text("Discover, tailor and apply once. The result is printed as JSON.")
            .blank()
            .text("Exit code 0 on succeeded/partial_failure, 1 on failed, 2 on cancelled.")
            .blank()
            .hint("jobpilot run --owner ada --title \"Rust Engineer\"", "")
            .hint("jobpilot run --owner ada --candidates jobs.json --dry-run", "")
            .print();
        return Ok(0);
    }
    crate::logging::init(None)?;

    let criteria = build_criteria(&flags).await?;
    let data_dir = ensure_data_dir()?;
    let runtime = Runtime::boot(&data_dir).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the run");
                cancel.cancel();
            }
        })
    };
    let result = runtime.orchestrator.run_with_cancel(criteria, cancel).await;
    interrupt.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(exit_code(result.status))
}
