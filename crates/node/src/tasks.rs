use std::sync::Arc;
use std::time::Duration;

use p2p::{NetworkError, NetworkProvider};
use tracing::{debug, info, warn};

use crate::session::Node;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Keep finding peers and run an interaction with each on its own task.
/// Returns once the provider is stopped.
pub async fn run_discovery_loop(node: Node, provider: Arc<dyn NetworkProvider>) {
    loop {
        match provider.find(node.catalogue()).await {
            Ok(pipe) => {
                let node = node.clone();
                tokio::spawn(async move {
                    let peer = pipe.peer().temporary_peer_id();
                    if let Err(err) = node.handle_pipe(pipe).await {
                        debug!(%peer, error = %err, "pipe handled with error");
                    }
                });
            }
            Err(NetworkError::Stopped) => {
                info!("peer discovery stopped");
                break;
            }
            Err(NetworkError::NoCompatiblePeer) => {
                debug!("no compatible peer found before timeout");
            }
            Err(err) => {
                warn!(error = ?err, "peer discovery failed");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

pub async fn run_consensus_flush_task(node: Node, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = node.flush_consensus().await {
            warn!(error = %err, "consensus flush failed");
        }
    }
}
