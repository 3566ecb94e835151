use crate::commands::common::{open_service, resolve_entry, Target};
use crate::error::CliError;

pub async fn run_restore(id: &str, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let trash = service.list_trash(&target.user_id).await?;
    let entry = resolve_entry(id, &trash)?;

    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    let restored = service.restore_entry(&target.user_id, &entry.id).await?;
    println!("{}", restored.id);
    Ok(())
}
