use chrono::Utc;
use tally_core::models::SyncStatus;

use crate::commands::common::{format_relative_time, open_service, Target};
use crate::error::CliError;

pub async fn run_status(as_json: bool, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let status = service.sync_status(&target.user_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let last_sync = status.last_sync_time.map_or_else(
        || "never".to_string(),
        |time| format_relative_time(time, Utc::now()),
    );

    let mut lines = vec![
        format!("State:      {}", status.state().label()),
        format!("Pending:    {}", status.pending_count),
        format!("Last sync:  {last_sync}"),
    ];
    if status.has_conflicts {
        lines.push("Conflicts:  run `tally pending` and `tally resolve`".to_string());
    }
    lines
}
