#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bouncer::config::Config;
use bouncer::upstream::UpstreamPool;
use bouncer::AppState;
use bouncer_common::{Event, EventTemplate, SecretKey};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long to wait for a frame that should arrive.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to watch for a frame that should not arrive.
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// Fake upstream relay
// ---------------------------------------------------------------------------

/// An in-process relay that records what the bouncer sends and lets the test
/// script what it answers.
pub struct FakeRelay {
    pub url: String,
    conns: mpsc::UnboundedReceiver<RelayConn>,
}

/// One accepted bouncer connection on a [`FakeRelay`].
pub struct RelayConn {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl FakeRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (in_tx, incoming) = mpsc::unbounded_channel();
                let (outgoing, mut out_rx) = mpsc::unbounded_channel::<String>();
                if conn_tx.send(RelayConn { incoming, outgoing }).is_err() {
                    return;
                }

                tokio::spawn(async move {
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            out = out_rx.recv() => match out {
                                Some(text) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                // Test dropped the connection handle: hang up.
                                None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str(text.as_str()) {
                                        let _ = in_tx.send(value);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            conns,
        }
    }

    /// Wait for the bouncer to (re)connect.
    pub async fn next_conn(&mut self) -> RelayConn {
        time::timeout(RECV_TIMEOUT, self.conns.recv())
            .await
            .expect("timeout waiting for bouncer to connect")
            .expect("relay listener stopped")
    }
}

impl RelayConn {
    pub fn send(&self, frame: Value) {
        self.outgoing.send(frame.to_string()).expect("relay connection gone");
    }

    pub async fn recv(&mut self) -> Value {
        time::timeout(RECV_TIMEOUT, self.incoming.recv())
            .await
            .expect("timeout waiting for frame from bouncer")
            .expect("bouncer connection closed")
    }

    pub async fn assert_silent(&mut self) {
        if let Ok(Some(frame)) = time::timeout(QUIET_PERIOD, self.incoming.recv()).await {
            panic!("relay received unexpected frame: {frame}");
        }
    }

    /// Read a REQ and return its namespaced subscription key.
    pub async fn recv_req(&mut self) -> String {
        let frame = self.recv().await;
        assert_eq!(frame[0], "REQ", "expected REQ, got {frame}");
        frame[1].as_str().expect("string key").to_string()
    }

    /// Close the socket from the relay side.
    pub fn hang_up(self) {}
}

// ---------------------------------------------------------------------------
// Bouncer under test
// ---------------------------------------------------------------------------

pub fn config_for(relays: &[&FakeRelay]) -> Config {
    let mut config = Config::for_relays(relays.iter().map(|r| r.url.clone()).collect());
    config.reconnect_delay = Duration::from_millis(100);
    config
}

pub struct TestBouncer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub pool: UpstreamPool,
}

pub async fn start_bouncer(config: Config) -> TestBouncer {
    let state = AppState::new(config).expect("session store");
    let pool = UpstreamPool::spawn(&state);
    let app = bouncer::routes::router().with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestBouncer { addr, state, pool }
}

impl TestBouncer {
    /// Block until `n` upstreams are registered with the multiplexer.
    pub async fn wait_for_live(&self, n: usize) {
        time::timeout(RECV_TIMEOUT, async {
            while self.state.mux.live_upstreams() != n {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timeout waiting for upstreams");
    }

    pub async fn connect(&self) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", self.addr))
            .await
            .expect("ws connect");
        Client { ws }
    }
}

// ---------------------------------------------------------------------------
// Downstream client
// ---------------------------------------------------------------------------

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("client send");
    }

    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timeout waiting for frame from bouncer")
                .expect("stream ended")
                .expect("ws read error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).expect("frame is JSON");
            }
        }
    }

    pub async fn assert_silent(&mut self) {
        if let Ok(Some(Ok(msg))) = time::timeout(QUIET_PERIOD, self.ws.next()).await {
            panic!("client received unexpected message: {msg:?}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub fn secret(seed: u8) -> SecretKey {
    SecretKey::from_bytes(&[seed; 32]).expect("valid secret")
}

pub fn signed(secret: &SecretKey, kind: u16, tags: Vec<Vec<String>>, content: &str) -> Event {
    EventTemplate {
        created_at: chrono::Utc::now().timestamp() as u64,
        kind,
        tags,
        content: content.to_string(),
    }
    .sign(secret)
    .expect("sign")
}

/// Minimal event as a relay would send it; only `id` matters to the bouncer.
pub fn relay_event(id: &str, content: &str) -> Value {
    serde_json::json!({ "id": id, "kind": 1, "content": content })
}
