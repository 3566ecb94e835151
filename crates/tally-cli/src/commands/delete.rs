use crate::commands::common::{open_service, resolve_entry, Target};
use crate::error::CliError;

pub async fn run_delete(id: &str, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let entries = service.list_entries(&target.user_id).await?;
    let entry = resolve_entry(id, &entries)?;

    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    service.delete_entry(&target.user_id, &entry.id).await?;
    println!("{}", entry.id);
    Ok(())
}

/// Purge looks in the trash first, then at live entries.
pub async fn run_purge(id: &str, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let mut entries = service.list_trash(&target.user_id).await?;
    entries.extend(service.list_entries(&target.user_id).await?);
    let entry = resolve_entry(id, &entries)?;

    service.purge_entry(&target.user_id, &entry.id).await?;
    println!("{}", entry.id);
    Ok(())
}
