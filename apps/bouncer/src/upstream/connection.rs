//! Lifecycle of a single upstream relay connection:
//! connect → register and replay → serve → close → fixed delay → connect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::LinkSender;
use crate::gateway::frames::{Outbound, RelayFrame};
use crate::mux::EventOutcome;
use crate::AppState;

/// Sent on every upstream handshake.
pub const USER_AGENT_VALUE: &str = concat!(
    "nostr-bouncer/",
    env!("CARGO_PKG_VERSION"),
    "; multiplexing relay bouncer"
);

/// Give up on a handshake after this long and wait for the next attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A configured relay. `id` is stable across reconnects.
#[derive(Debug, Clone)]
pub struct UpstreamLink {
    pub id: usize,
    pub url: String,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    #[error("handshake timed out")]
    Timeout,
}

/// Relay lifecycle logs go to info/warn only when asked for.
macro_rules! relay_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Supervise one relay until `shutdown` fires.
pub async fn run(link: UpstreamLink, state: AppState, shutdown: CancellationToken) {
    let verbose = state.config.log_about_relays;

    loop {
        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = connect(&link.url) => result,
        };

        match attempt {
            Ok(stream) => serve(&link, &state, stream, &shutdown).await,
            Err(err) => relay_log!(verbose, relay = %link.url, %err, "relay connection failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(state.config.reconnect_delay) => {}
        }
    }
}

async fn connect(url: &str) -> Result<RelayStream, ConnectError> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let connecting = tokio_tungstenite::connect_async(request);
    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
        .await
        .map_err(|_| ConnectError::Timeout)??;
    Ok(stream)
}

/// Run an open connection until it closes or shutdown fires.
async fn serve(
    link: &UpstreamLink,
    state: &AppState,
    stream: RelayStream,
    shutdown: &CancellationToken,
) {
    let verbose = state.config.log_about_relays;
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    match state.mux.attach_upstream(link.id, tx.clone()) {
        Ok(replayed) => relay_log!(
            verbose,
            relay = %link.url,
            live = state.mux.live_upstreams(),
            total = state.mux.configured_upstreams(),
            replayed,
            "relay connected"
        ),
        Err(err) => {
            tracing::error!(relay = %link.url, %err, "failed to read replay state");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }

            Some(frame) = rx.recv() => {
                if let Err(err) = write.send(Message::Text(frame.into())).await {
                    relay_log!(verbose, relay = %link.url, %err, "relay write failed");
                    break;
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(link, state, &tx, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        relay_log!(verbose, relay = %link.url, %err, "relay read failed");
                        break;
                    }
                }
            }
        }
    }

    state.mux.detach_upstream(link.id);
    relay_log!(
        verbose,
        relay = %link.url,
        live = state.mux.live_upstreams(),
        total = state.mux.configured_upstreams(),
        "relay disconnected"
    );
}

fn handle_frame(link: &UpstreamLink, state: &AppState, tx: &LinkSender, text: &str) {
    let frame = match RelayFrame::decode(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(relay = %link.url, %err, "dropping malformed relay frame");
            return;
        }
    };

    match frame {
        RelayFrame::Event {
            subscription_id,
            event_id,
            event,
        } => match state.mux.route_event(&subscription_id, &event_id, &event) {
            Ok(EventOutcome::Stale) => {
                tracing::debug!(
                    relay = %link.url,
                    key = %subscription_id,
                    "closing stale subscription"
                );
                let _ = tx.send(Outbound::close(&subscription_id).to_string());
            }
            Ok(outcome) => {
                tracing::trace!(
                    relay = %link.url,
                    key = %subscription_id,
                    ?outcome,
                    "event routed"
                );
            }
            Err(err) => {
                tracing::error!(relay = %link.url, %err, "failed to route event");
            }
        },
        RelayFrame::Eose { subscription_id } => {
            let outcome = state.mux.route_eose(&subscription_id, link.id);
            tracing::trace!(relay = %link.url, key = %subscription_id, ?outcome, "eose routed");
        }
        RelayFrame::Auth { challenge } => match state.gate.respond_upstream(&link.url, &challenge) {
            Some(Ok(event)) => {
                tracing::info!(
                    relay = %link.url,
                    pubkey = %event.pubkey,
                    "answering relay auth challenge"
                );
                let _ = tx.send(Outbound::auth_response(&event).to_string());
            }
            Some(Err(err)) => {
                tracing::error!(relay = %link.url, %err, "failed to sign relay auth response");
            }
            None => {
                tracing::debug!(
                    relay = %link.url,
                    "relay requested auth; no credentials configured"
                );
            }
        },
        RelayFrame::Ok {
            event_id,
            accepted,
            message,
        } => {
            tracing::debug!(relay = %link.url, %event_id, accepted, %message, "relay OK");
        }
        RelayFrame::Notice { message } => {
            tracing::debug!(relay = %link.url, %message, "relay notice");
        }
        RelayFrame::Closed {
            subscription_id,
            message,
        } => {
            tracing::debug!(
                relay = %link.url,
                key = %subscription_id,
                %message,
                "relay closed subscription"
            );
        }
    }
}
