//! Client frame dispatch.
//!
//! Every inbound text message produces at most one direct reply, queued on the
//! session's outbound channel. Results from upstreams arrive on the same
//! channel through the multiplexer.

use bouncer_common::{Event, AUTH_KIND};
use serde_json::Value;

use super::frames::{ClientFrame, Outbound};
use super::session::ClientSession;
use crate::error::ProxyError;
use crate::mux::Subscribed;
use crate::AppState;

pub fn handle_text(state: &AppState, session: &mut ClientSession, text: &str) {
    let reply = match ClientFrame::decode(text) {
        Ok(frame) => dispatch(state, session, frame),
        Err(err) => Err(err),
    };

    let frame = match reply {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(err) => err.into_frame(),
    };
    session.send(&frame);
}

fn dispatch(
    state: &AppState,
    session: &mut ClientSession,
    frame: ClientFrame,
) -> Result<Option<Value>, ProxyError> {
    match frame {
        ClientFrame::Event(event) => handle_publish(state, session, &event).map(Some),
        ClientFrame::Req {
            subscription_id,
            filters,
        } => handle_subscribe(state, session, &subscription_id, &filters),
        ClientFrame::Close { subscription_id } => {
            handle_unsubscribe(state, session, &subscription_id).map(|()| None)
        }
        ClientFrame::Auth(event) => Ok(Some(handle_auth(state, session, &event))),
        ClientFrame::Unknown(tag) => {
            tracing::warn!(client_id = %session.client_id, %tag, "unknown command");
            Err(ProxyError::unrecognized())
        }
    }
}

fn handle_publish(
    state: &AppState,
    session: &ClientSession,
    event: &Event,
) -> Result<Value, ProxyError> {
    if event.kind == AUTH_KIND {
        return Err(ProxyError::rejected(&event.id, "rejected: kind 22242"));
    }
    if !session.is_authorized() {
        return Err(ProxyError::rejected(&event.id, "unauthorized."));
    }

    state.mux.publish(&session.client_id, event)?;
    tracing::debug!(client_id = %session.client_id, event_id = %event.id, "event forwarded");
    Ok(Outbound::ok(&event.id, true, ""))
}

fn handle_subscribe(
    state: &AppState,
    session: &ClientSession,
    subscription_id: &str,
    filters: &[Value],
) -> Result<Option<Value>, ProxyError> {
    if !session.is_authorized() {
        return Err(ProxyError::unauthorized());
    }

    match state
        .mux
        .subscribe(&session.client_id, subscription_id, filters)?
    {
        Subscribed::Forwarded => Ok(None),
        Subscribed::Empty => Ok(Some(Outbound::eose(subscription_id))),
    }
}

fn handle_unsubscribe(
    state: &AppState,
    session: &ClientSession,
    subscription_id: &str,
) -> Result<(), ProxyError> {
    if !session.is_authorized() {
        return Err(ProxyError::unauthorized());
    }
    state.mux.unsubscribe(&session.client_id, subscription_id)?;
    Ok(())
}

fn handle_auth(state: &AppState, session: &mut ClientSession, event: &Event) -> Value {
    if session.is_authorized() {
        return Outbound::ok(&event.id, true, "");
    }

    match state.gate.verify(session.challenge(), event) {
        Ok(pubkey) => {
            tracing::info!(client_id = %session.client_id, %pubkey, "client authenticated");
            session.authenticate(pubkey);
            Outbound::ok(&event.id, true, "")
        }
        Err(reason) => {
            tracing::debug!(client_id = %session.client_id, %reason, "client auth rejected");
            Outbound::ok(&event.id, false, &format!("restricted: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use bouncer_common::{EventTemplate, SecretKey};
    use serde_json::json;
    use tokio::sync::mpsc;

    type Rx = mpsc::UnboundedReceiver<String>;

    fn drain(rx: &mut Rx) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn secret() -> SecretKey {
        SecretKey::from_bytes(&[5u8; 32]).unwrap()
    }

    fn note(kind: u16) -> Event {
        EventTemplate {
            created_at: 1_700_000_000,
            kind,
            tags: vec![],
            content: "hi".into(),
        }
        .sign(&secret())
        .unwrap()
    }

    /// State with one attached fake upstream, plus a connected session.
    fn setup(gated: bool) -> (AppState, ClientSession, Rx, Rx) {
        let mut config = Config::for_relays(vec!["ws://relay.invalid".into()]);
        if gated {
            config.authorized_keys = vec![secret().public_key()];
        }
        let state = AppState::new(config).unwrap();

        let (up_tx, up_rx) = mpsc::unbounded_channel();
        state.mux.attach_upstream(0, up_tx).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.register("cl_t", tx.clone());
        let session = ClientSession::new("cl_t".into(), "test".into(), tx, &state.gate);
        (state, session, rx, up_rx)
    }

    #[test]
    fn publish_is_acknowledged_and_forwarded() {
        let (state, mut session, mut rx, mut up) = setup(false);
        let event = note(1);

        handle_text(&state, &mut session, &json!(["EVENT", event]).to_string());

        assert_eq!(drain(&mut rx), vec![json!(["OK", event.id, true, ""])]);
        assert_eq!(drain(&mut up), vec![json!(["EVENT", event])]);
    }

    #[test]
    fn auth_kind_cannot_be_published() {
        let (state, mut session, mut rx, mut up) = setup(false);
        let event = note(AUTH_KIND);

        handle_text(&state, &mut session, &json!(["EVENT", event]).to_string());

        assert_eq!(
            drain(&mut rx),
            vec![json!(["OK", event.id, false, "rejected: kind 22242"])]
        );
        assert!(drain(&mut up).is_empty());
    }

    #[test]
    fn bad_input_gets_notices() {
        let (state, mut session, mut rx, mut up) = setup(false);

        let inputs = [
            "{oops",
            r#"["REQ","x"]"#,
            r#"["CLOSE",1]"#,
            r#"["HELLO"]"#,
            r#"["EVENT",{}]"#,
        ];
        for text in inputs {
            handle_text(&state, &mut session, text);
        }

        assert_eq!(
            drain(&mut rx),
            vec![
                json!(["NOTICE", "error: bad JSON."]),
                json!(["NOTICE", "error: bad request."]),
                json!(["NOTICE", "error: bad request."]),
                json!(["NOTICE", "error: unrecognized command."]),
                json!(["NOTICE", "error: invalid event"]),
            ]
        );
        assert!(drain(&mut up).is_empty());
    }

    #[test]
    fn zero_limit_answers_eose_locally() {
        let (state, mut session, mut rx, mut up) = setup(false);
        handle_text(&state, &mut session, r#"["REQ","q",{"limit":0}]"#);

        assert_eq!(drain(&mut rx), vec![json!(["EOSE", "q"])]);
        assert!(drain(&mut up).is_empty());
    }

    #[test]
    fn unauthenticated_session_is_refused_everything() {
        let (state, mut session, mut rx, mut up) = setup(true);
        let challenge_frame = drain(&mut rx);
        assert_eq!(challenge_frame[0][0], "AUTH");

        let event = note(1);
        handle_text(&state, &mut session, &json!(["EVENT", event]).to_string());
        handle_text(&state, &mut session, r#"["REQ","q",{}]"#);
        handle_text(&state, &mut session, r#"["CLOSE","q"]"#);

        assert_eq!(
            drain(&mut rx),
            vec![
                json!(["OK", event.id, false, "unauthorized."]),
                json!(["NOTICE", "unauthorized."]),
                json!(["NOTICE", "unauthorized."]),
            ]
        );
        assert!(drain(&mut up).is_empty());
    }

    #[test]
    fn successful_auth_unlocks_session() {
        let (state, mut session, mut rx, mut up) = setup(true);
        drain(&mut rx);

        let wrong = EventTemplate {
            created_at: chrono::Utc::now().timestamp() as u64,
            kind: AUTH_KIND,
            tags: vec![vec!["challenge".into(), "nope".into()]],
            content: String::new(),
        }
        .sign(&secret())
        .unwrap();
        handle_text(&state, &mut session, &json!(["AUTH", wrong]).to_string());
        assert_eq!(
            drain(&mut rx),
            vec![json!(["OK", wrong.id, false, "restricted: challenge mismatch"])]
        );
        assert!(!session.is_authorized());

        let answer = EventTemplate {
            created_at: chrono::Utc::now().timestamp() as u64,
            kind: AUTH_KIND,
            tags: vec![vec![
                "challenge".into(),
                session.challenge().unwrap().to_string(),
            ]],
            content: String::new(),
        }
        .sign(&secret())
        .unwrap();
        handle_text(&state, &mut session, &json!(["AUTH", answer]).to_string());
        assert_eq!(drain(&mut rx), vec![json!(["OK", answer.id, true, ""])]);
        assert!(session.is_authorized());

        handle_text(&state, &mut session, r#"["REQ","q",{}]"#);
        assert_eq!(drain(&mut up), vec![json!(["REQ", "cl_t:q", {}])]);
    }
}
