use tally_core::sync::SyncTrigger;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::commands::common::{open_service, Target};
use crate::error::CliError;

/// Run the sync scheduler until Ctrl-C. Each line on stdin requests a sync.
pub async fn run_watch(target: &Target) -> Result<(), CliError> {
    let service = open_service(target).await?;
    let _notices = service.subscribe_notices(|notice| eprintln!("{notice}"));
    let _status = service.subscribe_status(|status| {
        tracing::info!(
            "Status: {} ({} pending)",
            status.state().label(),
            status.pending_count
        );
    });

    let (triggers, receiver) = mpsc::channel(8);
    tokio::spawn(forward_stdin(triggers));

    service.initialize(&target.user_id).await?;
    println!("Watching for changes to sync; press Enter to sync now, Ctrl-C to stop");

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };
    service
        .scheduler(&target.user_id)
        .run(receiver, shutdown)
        .await;
    Ok(())
}

async fn forward_stdin(triggers: mpsc::Sender<SyncTrigger>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(_)) = lines.next_line().await {
        if triggers.send(SyncTrigger::ManualRefresh).await.is_err() {
            break;
        }
    }
}
