use tally_core::sync::{RunStatus, SyncResult};

use crate::commands::common::{format_pending_lines, open_service, Target};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    let result = service.force_sync(&target.user_id).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for line in format_sync_lines(&result) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_sync_lines(result: &SyncResult) -> Vec<String> {
    let mut lines = match result.run {
        RunStatus::Completed => vec![format!(
            "Sync completed: {} synced, {} failed",
            result.synced_count, result.failed_count
        )],
        RunStatus::AlreadyRunning => vec!["A sync is already running".to_string()],
        RunStatus::Offline => vec!["Offline; changes stay queued".to_string()],
        RunStatus::Aborted => vec!["Sync aborted; changes stay queued".to_string()],
    };

    if !result.conflicts.is_empty() {
        lines.push(format!(
            "{} conflicts need a decision (tally resolve <op-id> --keep local|remote):",
            result.conflicts.len()
        ));
        lines.extend(format_pending_lines(&result.conflicts));
    }
    lines
}
