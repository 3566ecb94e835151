use tally_core::models::OperationId;

use crate::cli::KeepSide;
use crate::commands::common::{open_service, Target};
use crate::error::CliError;

pub async fn run_resolve(op_id: &str, keep: KeepSide, target: &Target) -> Result<(), CliError> {
    let op_id = op_id
        .parse::<OperationId>()
        .map_err(|_| CliError::OperationNotFound(op_id.to_string()))?;

    let service = open_service(target).await?;
    let resolved = match service
        .resolve_conflict(&target.user_id, &op_id, keep.into())
        .await
    {
        Ok(resolved) => resolved,
        Err(tally_core::Error::NotFound(_)) => {
            return Err(CliError::OperationNotFound(op_id.to_string()));
        }
        Err(error) => return Err(error.into()),
    };

    if resolved {
        println!("Resolved {op_id}");
    } else {
        println!("{op_id} is still pending");
    }
    Ok(())
}
