//! Integration tests for the gateway transport.
//!
//! Each test spins up a scripted gateway on a random port with
//! tokio-tungstenite and drives a real `GatewayTransport` against it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use common::{MemoryRules, NullHandler};
use tele_relay::config::{GatewayConfig, SessionConfig};
use tele_relay::error::SessionError;
use tele_relay::session::{
    EventForwarder, EventHandler, GatewayTransport, InboundEvent, SessionConnection,
    SessionContext, SessionManager, SessionTransport,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct FakeGateway {
    url: String,
    /// Every frame the client sent, in order.
    received: mpsc::UnboundedReceiver<Value>,
    /// Messages to push to the client. A `Close` ends the session.
    push: mpsc::UnboundedSender<Message>,
}

impl FakeGateway {
    fn push(&self, frame: Value) {
        self.push
            .send(Message::Text(frame.to_string().into()))
            .unwrap();
    }

    fn hang_up(&self) {
        self.push.send(Message::Close(None)).unwrap();
    }
}

/// Accept one session. Replies `ready` (or `auth_failed` when `accept` is
/// false) and acknowledges every `forward` with `forward_result`.
async fn fake_gateway(accept: bool) -> FakeGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (received_tx, received) = mpsc::unbounded_channel();
    let (push, mut push_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let send = |frame: Value| Message::Text(frame.to_string().into());

        loop {
            tokio::select! {
                Some(msg) = push_rx.recv() => {
                    let closing = matches!(msg, Message::Close(_));
                    if sink.send(msg).await.is_err() || closing {
                        break;
                    }
                }
                msg = stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        Some(Ok(_)) => continue,
                    };
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    let reply = match frame["type"].as_str() {
                        Some("authenticate") if accept => {
                            Some(json!({"type": "ready", "user_id": frame["account_id"]}))
                        }
                        Some("authenticate") => {
                            Some(json!({"type": "auth_failed", "reason": "AUTH_KEY_UNREGISTERED"}))
                        }
                        Some("forward") => Some(json!({
                            "type": "forward_result",
                            "request_id": frame["request_id"],
                            "ok": frame["to"] != json!(-1),
                            "error": "CHAT_WRITE_FORBIDDEN",
                        })),
                        _ => None,
                    };
                    let _ = received_tx.send(frame);
                    if let Some(reply) = reply {
                        if sink.send(send(reply)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    FakeGateway {
        url: format!("http://127.0.0.1:{port}"),
        received,
        push,
    }
}

fn event_frame(message_id: i64, outgoing: bool) -> Value {
    json!({
        "type": "event",
        "event": {
            "message_id": message_id,
            "chat": {"id": 555, "kind": "private"},
            "sender": {"id": 555, "first_name": "Ann"},
            "outgoing": outgoing,
            "payload": {"kind": "photo", "caption": "sunset"},
        }
    })
}

/// Forwards every event to `forward_to` and reports the outcome.
struct ForwardingProbe {
    forward_to: i64,
    seen: mpsc::UnboundedSender<(i64, Result<(), String>)>,
}

#[async_trait]
impl EventHandler for ForwardingProbe {
    async fn on_event(&self, ctx: SessionContext<'_>, event: InboundEvent) {
        let result = ctx
            .forwarder
            .forward_event(&event, self.forward_to)
            .await
            .map_err(|e| e.to_string());
        let _ = self.seen.send((event.message_id, result));
    }
}

fn transport(gateway: &FakeGateway) -> GatewayTransport {
    GatewayTransport::new(
        &GatewayConfig {
            url: gateway.url.clone(),
        },
        Duration::from_secs(1),
    )
}

fn cred() -> SecretString {
    SecretString::from("session-string".to_string())
}

#[tokio::test]
async fn authenticates_and_forwards_events() {
    timeout(TEST_TIMEOUT, async {
        let mut gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();

        let hello = gateway.received.recv().await.unwrap();
        assert_eq!(hello["type"], "authenticate");
        assert_eq!(hello["account_id"], 100);
        assert_eq!(hello["credential"], "session-string");

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        conn.subscribe(Arc::new(ForwardingProbe {
            forward_to: 9000,
            seen: seen_tx,
        }))
        .unwrap();

        gateway.push(event_frame(42, false));
        let (message_id, result) = seen.recv().await.unwrap();
        assert_eq!(message_id, 42);
        assert_eq!(result, Ok(()));

        let forward = gateway.received.recv().await.unwrap();
        assert_eq!(forward["type"], "forward");
        assert_eq!(forward["chat_id"], 555);
        assert_eq!(forward["message_id"], 42);
        assert_eq!(forward["to"], 9000);

        conn.disconnect().await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejected_forward_is_a_transport_error() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        conn.subscribe(Arc::new(ForwardingProbe {
            forward_to: -1,
            seen: seen_tx,
        }))
        .unwrap();

        gateway.push(event_frame(7, false));
        let (_, result) = seen.recv().await.unwrap();
        assert!(result.unwrap_err().contains("CHAT_WRITE_FORBIDDEN"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn outgoing_events_are_filtered() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();

        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        conn.subscribe(Arc::new(ForwardingProbe {
            forward_to: 9000,
            seen: seen_tx,
        }))
        .unwrap();

        gateway.push(event_frame(1, true));
        gateway.push(event_frame(2, false));

        let (message_id, _) = seen.recv().await.unwrap();
        assert_eq!(message_id, 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn auth_failed_frame_is_an_auth_error() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(false).await;

        let err = match transport(&gateway).connect(100, &cred()).await {
            Ok(_) => panic!("expected auth failure"),
            Err(e) => e,
        };

        assert!(err.is_auth());
        assert!(err.to_string().contains("AUTH_KEY_UNREGISTERED"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = GatewayTransport::new(
            &GatewayConfig {
                url: format!("http://127.0.0.1:{port}"),
            },
            Duration::from_secs(1),
        );

        let err = match transport.connect(100, &cred()).await {
            Ok(_) => panic!("expected connect failure"),
            Err(e) => e,
        };
        assert!(matches!(err, SessionError::Transport { account_id: 100, .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn disconnect_sends_close_and_is_idempotent() {
    timeout(TEST_TIMEOUT, async {
        let mut gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();
        let (seen_tx, _seen) = mpsc::unbounded_channel();
        conn.subscribe(Arc::new(ForwardingProbe {
            forward_to: 9000,
            seen: seen_tx,
        }))
        .unwrap();

        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();

        let _hello = gateway.received.recv().await.unwrap();
        let close = gateway.received.recv().await.unwrap();
        assert_eq!(close["type"], "close");

        let event: InboundEvent =
            serde_json::from_value(event_frame(1, false)["event"].clone()).unwrap();
        assert!(matches!(
            conn.forward_event(&event, 9000).await,
            Err(SessionError::Closed(100))
        ));
        assert!(matches!(
            conn.subscribe(Arc::new(ForwardingProbe {
                forward_to: 9000,
                seen: mpsc::unbounded_channel().0,
            })),
            Err(SessionError::Closed(100))
        ));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn remote_close_marks_the_connection_lost() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();
        let mut lost = conn.lost();
        assert!(!*lost.borrow());

        gateway.hang_up();
        lost.wait_for(|lost| *lost).await.unwrap();

        let event: InboundEvent =
            serde_json::from_value(event_frame(1, false)["event"].clone()).unwrap();
        assert!(matches!(
            conn.forward_event(&event, 9000).await,
            Err(SessionError::Closed(100))
        ));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn disconnect_does_not_signal_lost() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(true).await;
        let conn = transport(&gateway).connect(100, &cred()).await.unwrap();
        let lost = conn.lost();

        conn.disconnect().await.unwrap();

        assert!(!*lost.borrow());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn manager_drops_a_session_the_gateway_closed() {
    timeout(TEST_TIMEOUT, async {
        let gateway = fake_gateway(true).await;
        let manager = SessionManager::new(
            Arc::new(transport(&gateway)),
            Arc::new(MemoryRules::default()),
            Arc::new(NullHandler),
            SessionConfig::default(),
        );
        manager.start_session(100, &cred()).await.unwrap();
        assert!(manager.is_running(100).await);

        gateway.hang_up();

        while manager.is_running(100).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.running_ids().await.is_empty());
    })
    .await
    .expect("test timed out");
}
