use crate::commands::common::{format_pending_lines, open_service, Target};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let ops = service.pending_operations(&target.user_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }

    if ops.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }

    for line in format_pending_lines(&ops) {
        println!("{line}");
    }
    Ok(())
}
