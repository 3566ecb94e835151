use tally_core::models::Entry;

use crate::commands::common::{format_entry_lines, open_service, parse_date, Target};
use crate::error::CliError;

pub async fn run_list(date: Option<&str>, as_json: bool, target: &Target) -> Result<(), CliError> {
    let date = date.map(parse_date).transpose()?;
    let service = open_service(target).await?;
    let entries = match date {
        Some(date) => service.get_entries_for_date(&target.user_id, date).await?,
        None => service.list_entries(&target.user_id).await?,
    };
    print_entries(&entries, as_json)
}

pub async fn run_trash(as_json: bool, target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let entries = service.list_trash(&target.user_id).await?;
    print_entries(&entries, as_json)
}

fn print_entries(entries: &[Entry], as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        for line in format_entry_lines(entries) {
            println!("{line}");
        }
    }
    Ok(())
}
