use tally_core::models::EntryPatch;

use crate::cli::CategoryArg;
use crate::commands::common::{open_service, parse_time, resolve_entry, Target};
use crate::error::CliError;

pub struct EditArgs<'a> {
    pub id: &'a str,
    pub name: Option<String>,
    pub category: Option<CategoryArg>,
    pub magnitude: Option<f64>,
    pub at: Option<&'a str>,
}

pub async fn run_edit(args: EditArgs<'_>, target: &Target) -> Result<(), CliError> {
    let patch = EntryPatch {
        name: args.name,
        category: args.category.map(Into::into),
        timestamp: args.at.map(parse_time).transpose()?,
        magnitude: args.magnitude,
        restore: false,
    };
    if patch.is_empty() {
        return Err(CliError::NothingToEdit);
    }

    let service = open_service(target).await?;
    let entries = service.list_entries(&target.user_id).await?;
    let entry = resolve_entry(args.id, &entries)?;

    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    let updated = service
        .update_entry(&target.user_id, &entry.id, patch)
        .await?;
    println!("{}", updated.id);
    Ok(())
}
