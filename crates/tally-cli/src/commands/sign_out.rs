use crate::commands::common::{open_service, Target};
use crate::error::CliError;

pub async fn run_sign_out(target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let pending = service.pending_operations(&target.user_id).await?.len();
    if pending > 0 {
        eprintln!("Discarding {pending} changes that were never synced");
    }

    service.sign_out(&target.user_id).await?;
    println!("Signed out {}", target.user_id);
    Ok(())
}
