use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{self, UpstreamLink};
use crate::AppState;

/// One supervised connection task per configured relay.
///
/// The relay set is fixed at startup; each task connects, replays, serves and
/// reconnects on its own until the pool is shut down.
pub struct UpstreamPool {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl UpstreamPool {
    pub fn spawn(state: &AppState) -> Self {
        let shutdown = CancellationToken::new();
        let tasks = state
            .config
            .relays
            .iter()
            .enumerate()
            .map(|(id, url)| {
                let link = UpstreamLink {
                    id,
                    url: url.clone(),
                };
                tokio::spawn(connection::run(link, state.clone(), shutdown.child_token()))
            })
            .collect();

        tracing::info!(relays = state.config.relays.len(), "upstream pool started");
        Self { shutdown, tasks }
    }

    /// Stop every connection task and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(%err, "upstream task ended abnormally");
            }
        }
        tracing::info!("upstream pool stopped");
    }
}
