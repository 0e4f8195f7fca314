//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bouncer_common::id::{prefix, prefixed_ulid};
use bouncer_common::PublicKey;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::AppState;

use super::handler::handle_text;
use super::session::ClientSession;

/// Nostr clients connect at the root path.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let peer = forwarded_for(&headers).unwrap_or_else(|| "unknown".to_string());
    ws.on_upgrade(move |socket| handle_connection(socket, state, peer))
}

/// First entry of `X-Forwarded-For`, if any.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

async fn handle_connection(socket: WebSocket, state: AppState, peer: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let client_id = prefixed_ulid(prefix::CLIENT);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.sessions.register(&client_id, tx.clone());
    let mut session = ClientSession::new(client_id, peer, tx, &state.gate);

    tracing::info!(
        client_id = %session.client_id,
        peer = %session.peer,
        gated = !session.is_authorized(),
        "client connected"
    );

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &mut session, text.as_str());
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(&state, &mut session, text),
                        Err(_) => {
                            session.send(&ProxyError::bad_json().into_frame());
                        }
                    },
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, client_id = %session.client_id, "ws read error");
                        break;
                    }
                }
            }

            // Replies and upstream results queued for this client.
            Some(frame) = rx.recv() => {
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.sessions.remove(&session.client_id);
    match state.mux.disconnect(&session.client_id) {
        Ok(closed) => tracing::info!(
            client_id = %session.client_id,
            pubkey = session.pubkey().map_or("-", PublicKey::as_hex),
            subscriptions = closed,
            "client disconnected"
        ),
        Err(err) => tracing::error!(
            client_id = %session.client_id,
            %err,
            "failed to clean up client state"
        ),
    }
}
