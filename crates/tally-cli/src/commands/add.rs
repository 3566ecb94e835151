use chrono::Utc;
use tally_core::models::EntryDraft;

use crate::cli::CategoryArg;
use crate::commands::common::{open_service, parse_time, resolve_name, Target};
use crate::error::CliError;

pub async fn run_add(
    name_parts: &[String],
    category: CategoryArg,
    magnitude: f64,
    at: Option<&str>,
    target: &Target,
) -> Result<(), CliError> {
    let name = resolve_name(name_parts)?;
    let timestamp = at.map(parse_time).transpose()?.unwrap_or_else(Utc::now);
    let draft = EntryDraft::new(name, category.into(), timestamp, magnitude);

    let service = open_service(target).await?;
    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    let entry = service.add_entry(&target.user_id, draft).await?;

    println!("{}", entry.id);
    Ok(())
}
