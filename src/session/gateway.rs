//! Session gateway transport.
//!
//! The messaging protocol itself lives in a gateway sidecar. Each account
//! session is one WebSocket to `{gateway}/session` speaking tagged JSON
//! frames; login for onboarding is plain HTTP on the same gateway.
//!
//! Per connection three tasks run: a reader routing `event` frames into a
//! queue and `forward_result` frames to waiting forwards, a writer draining
//! outbound frames, and (once subscribed) a dispatch task feeding queued
//! events to the handler one at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{OnboardingError, SessionError};
use crate::model::{AccountId, ChatId};
use crate::onboarding::{Authenticator, NewCredential, SignInOutcome};
use crate::session::event::InboundEvent;
use crate::session::transport::{
    EventForwarder, EventHandler, SessionConnection, SessionContext, SessionTransport,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Wire protocol ───────────────────────────────────────────────────

/// Frame sent by this process to the gateway.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        account_id: AccountId,
        credential: String,
    },
    Forward {
        request_id: u64,
        chat_id: ChatId,
        message_id: i64,
        to: ChatId,
    },
    Close,
}

/// Frame sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    Ready {
        user_id: i64,
    },
    AuthFailed {
        reason: String,
    },
    Event {
        event: InboundEvent,
    },
    ForwardResult {
        request_id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

impl GatewayFrame {
    fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::AuthFailed { .. } => "auth_failed",
            Self::Event { .. } => "event",
            Self::ForwardResult { .. } => "forward_result",
        }
    }
}

fn encode(account_id: AccountId, frame: &ClientFrame) -> Result<Message, SessionError> {
    serde_json::to_string(frame)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| SessionError::Transport {
            account_id,
            reason: format!("encode frame: {e}"),
        })
}

/// `http://host` → `ws://host/session`, `https://host` → `wss://host/session`.
fn session_url(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}/session")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}/session")
    } else {
        format!("{base}/session")
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Opens account sessions through the gateway.
pub struct GatewayTransport {
    session_url: String,
    drain_timeout: Duration,
}

impl GatewayTransport {
    /// `drain_timeout` bounds how long `disconnect` waits for an in-flight
    /// event before aborting it.
    pub fn new(config: &GatewayConfig, drain_timeout: Duration) -> Self {
        Self {
            session_url: session_url(&config.url),
            drain_timeout,
        }
    }
}

#[async_trait]
impl SessionTransport for GatewayTransport {
    async fn connect(
        &self,
        account_id: AccountId,
        credential: &SecretString,
    ) -> Result<Box<dyn SessionConnection>, SessionError> {
        let (ws, _) = connect_async(self.session_url.as_str())
            .await
            .map_err(|e| SessionError::Transport {
                account_id,
                reason: format!("connect {}: {e}", self.session_url),
            })?;
        let (mut sink, mut stream) = ws.split();

        let hello = encode(
            account_id,
            &ClientFrame::Authenticate {
                account_id,
                credential: credential.expose_secret().to_string(),
            },
        )?;
        sink.send(hello).await.map_err(|e| SessionError::Transport {
            account_id,
            reason: format!("send authenticate: {e}"),
        })?;

        let user_id = await_ready(account_id, &mut stream).await?;
        if user_id != account_id {
            warn!(account_id, user_id, "Gateway authenticated a different user id");
        }
        debug!(account_id, "Gateway session ready");

        Ok(Box::new(GatewayConnection::start(
            account_id,
            sink,
            stream,
            self.drain_timeout,
        )))
    }
}

async fn await_ready(
    account_id: AccountId,
    stream: &mut SplitStream<WsStream>,
) -> Result<i64, SessionError> {
    let transport = |reason: String| SessionError::Transport { account_id, reason };

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(transport(format!("read: {e}"))),
        };
        return match serde_json::from_str::<GatewayFrame>(text.as_str()) {
            Ok(GatewayFrame::Ready { user_id }) => Ok(user_id),
            Ok(GatewayFrame::AuthFailed { reason }) => Err(SessionError::Auth { account_id, reason }),
            Ok(other) => Err(transport(format!(
                "unexpected {} frame before ready",
                other.name()
            ))),
            Err(e) => Err(transport(format!("invalid frame: {e}"))),
        };
    }
    Err(transport(
        "gateway closed the connection before authenticating".into(),
    ))
}

// ── Connection ──────────────────────────────────────────────────────

type ForwardReply = oneshot::Sender<Result<(), String>>;

/// State shared between the connection and its tasks.
struct Link {
    account_id: AccountId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, ForwardReply>>,
    next_request: AtomicU64,
    /// Cleared when disconnect starts; no new events are queued or dispatched.
    accepting: AtomicBool,
    /// Set once forwards can no longer complete. Written before `pending`
    /// is cleared and read under the `pending` lock.
    closed: AtomicBool,
    stop: watch::Sender<bool>,
    lost: watch::Sender<bool>,
}

#[async_trait]
impl EventForwarder for Link {
    async fn forward_event(&self, event: &InboundEvent, to: ChatId) -> Result<(), SessionError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let frame = encode(
            self.account_id,
            &ClientFrame::Forward {
                request_id,
                chat_id: event.chat.id,
                message_id: event.message_id,
                to,
            },
        )?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(SessionError::Closed(self.account_id));
            }
            pending.insert(request_id, tx);
        }
        if self.outbound.send(frame).is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(SessionError::Closed(self.account_id));
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(SessionError::Transport {
                account_id: self.account_id,
                reason,
            }),
            Err(_) => Err(SessionError::Closed(self.account_id)),
        }
    }
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

/// A live gateway session.
pub struct GatewayConnection {
    link: Arc<Link>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<InboundEvent>>>,
    tasks: std::sync::Mutex<Tasks>,
    drain_timeout: Duration,
}

impl GatewayConnection {
    fn start(
        account_id: AccountId,
        sink: SplitSink<WsStream, Message>,
        stream: SplitStream<WsStream>,
        drain_timeout: Duration,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        let (lost, _) = watch::channel(false);

        let link = Arc::new(Link {
            account_id,
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            stop,
            lost,
        });

        let tasks = Tasks {
            reader: Some(tokio::spawn(read_loop(Arc::clone(&link), stream, events_tx))),
            writer: Some(tokio::spawn(write_loop(account_id, sink, outbound_rx))),
            dispatch: None,
        };

        Self {
            link,
            events: std::sync::Mutex::new(Some(events_rx)),
            tasks: std::sync::Mutex::new(tasks),
            drain_timeout,
        }
    }

    fn take_task(&self, pick: fn(&mut Tasks) -> Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        self.tasks.lock().ok().and_then(|mut tasks| pick(&mut tasks))
    }

    async fn join_bounded(&self, handle: Option<JoinHandle<()>>, what: &'static str) {
        let Some(mut handle) = handle else {
            return;
        };
        if tokio::time::timeout(self.drain_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!(
                account_id = self.link.account_id,
                task = what,
                timeout = ?self.drain_timeout,
                "Session task did not finish in time, aborting"
            );
            handle.abort();
        }
    }
}

#[async_trait]
impl EventForwarder for GatewayConnection {
    async fn forward_event(&self, event: &InboundEvent, to: ChatId) -> Result<(), SessionError> {
        self.link.forward_event(event, to).await
    }
}

#[async_trait]
impl SessionConnection for GatewayConnection {
    fn account_id(&self) -> AccountId {
        self.link.account_id
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), SessionError> {
        let account_id = self.link.account_id;
        if !self.link.accepting.load(Ordering::SeqCst) {
            return Err(SessionError::Closed(account_id));
        }

        let events = self
            .events
            .lock()
            .map_err(|_| SessionError::Closed(account_id))?
            .take()
            .ok_or(SessionError::AlreadySubscribed(account_id))?;

        let task = tokio::spawn(dispatch_loop(
            Arc::clone(&self.link),
            events,
            handler,
            self.link.stop.subscribe(),
        ));
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.dispatch = Some(task),
            Err(_) => {
                task.abort();
                return Err(SessionError::Closed(account_id));
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let account_id = self.link.account_id;
        if !self.link.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Let the in-flight event finish while the reader still routes
        // forward results.
        self.link.stop.send_replace(true);
        self.join_bounded(self.take_task(|t| t.dispatch.take()), "dispatch")
            .await;

        self.link.closed.store(true, Ordering::SeqCst);
        if let Some(reader) = self.take_task(|t| t.reader.take()) {
            reader.abort();
        }
        self.link.pending.lock().await.clear();

        let close = encode(account_id, &ClientFrame::Close)?;
        let _ = self.link.outbound.send(close);
        let _ = self.link.outbound.send(Message::Close(None));
        self.join_bounded(self.take_task(|t| t.writer.take()), "writer")
            .await;

        info!(account_id, "Gateway session closed");
        Ok(())
    }

    fn lost(&self) -> watch::Receiver<bool> {
        self.link.lost.subscribe()
    }
}

impl Drop for GatewayConnection {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for handle in [tasks.reader.take(), tasks.writer.take(), tasks.dispatch.take()]
                .into_iter()
                .flatten()
            {
                handle.abort();
            }
        }
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

async fn read_loop(
    link: Arc<Link>,
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<InboundEvent>,
) {
    let account_id = link.account_id;

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!(account_id, "Gateway closed the session");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(account_id, error = %e, "Gateway session read failed");
                break;
            }
        };

        match serde_json::from_str::<GatewayFrame>(text.as_str()) {
            Ok(GatewayFrame::Event { event }) => {
                if !link.accepting.load(Ordering::SeqCst) {
                    debug!(account_id, "Session closing, dropping event");
                    continue;
                }
                if !event.is_relevant() {
                    continue;
                }
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(GatewayFrame::ForwardResult {
                request_id,
                ok,
                error,
            }) => {
                let waiter = link.pending.lock().await.remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let result = if ok {
                            Ok(())
                        } else {
                            Err(error.unwrap_or_else(|| "forward rejected by gateway".into()))
                        };
                        let _ = tx.send(result);
                    }
                    None => debug!(account_id, request_id, "Forward result for unknown request"),
                }
            }
            Ok(other) => debug!(account_id, frame = other.name(), "Ignoring gateway frame"),
            Err(e) => warn!(account_id, error = %e, "Invalid gateway frame"),
        }
    }

    link.closed.store(true, Ordering::SeqCst);
    link.pending.lock().await.clear();
    if link.accepting.load(Ordering::SeqCst) {
        warn!(account_id, "Gateway session connection lost");
        link.lost.send_replace(true);
    }
}

async fn write_loop(
    account_id: AccountId,
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            warn!(account_id, error = %e, "Gateway session write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn dispatch_loop(
    link: Arc<Link>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    handler: Arc<dyn EventHandler>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if *stop.borrow() {
            break;
        }
        let ctx = SessionContext {
            account_id: link.account_id,
            forwarder: link.as_ref(),
        };
        handler.on_event(ctx, event).await;
    }
    debug!(account_id = link.account_id, "Dispatch loop finished");
}

// ── Login ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendCodeReply {
    login_token: String,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SignInReply {
    Authorized {
        account_id: AccountId,
        #[serde(default)]
        first_name: Option<String>,
        credential: String,
    },
    PasswordRequired,
    InvalidCode,
    InvalidPassword,
}

impl From<SignInReply> for SignInOutcome {
    fn from(reply: SignInReply) -> Self {
        match reply {
            SignInReply::Authorized {
                account_id,
                first_name,
                credential,
            } => SignInOutcome::Authorized(NewCredential {
                account_id,
                first_name,
                credential: SecretString::from(credential),
            }),
            SignInReply::PasswordRequired => SignInOutcome::PasswordRequired,
            SignInReply::InvalidCode => SignInOutcome::InvalidCode,
            SignInReply::InvalidPassword => SignInOutcome::InvalidPassword,
        }
    }
}

/// Drives the gateway's HTTP login endpoints.
pub struct GatewayAuthenticator {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayAuthenticator {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.clone(),
        }
    }

    async fn post(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, OnboardingError> {
        let resp = self
            .client
            .post(format!("{}{endpoint}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| OnboardingError::Gateway {
                endpoint,
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OnboardingError::Gateway {
                endpoint,
                reason: format!("HTTP {status}: {text}"),
            });
        }
        Ok(resp)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> Result<T, OnboardingError> {
        self.post(endpoint, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| OnboardingError::Gateway {
                endpoint,
                reason: format!("invalid response: {e}"),
            })
    }
}

#[async_trait]
impl Authenticator for GatewayAuthenticator {
    async fn send_code(&self, phone: &str) -> Result<String, OnboardingError> {
        let reply: SendCodeReply = self
            .post_json("/auth/send_code", serde_json::json!({ "phone": phone }))
            .await?;
        Ok(reply.login_token)
    }

    async fn sign_in(&self, login_token: &str, code: &str) -> Result<SignInOutcome, OnboardingError> {
        let reply: SignInReply = self
            .post_json(
                "/auth/sign_in",
                serde_json::json!({ "login_token": login_token, "code": code }),
            )
            .await?;
        Ok(reply.into())
    }

    async fn check_password(
        &self,
        login_token: &str,
        password: &SecretString,
    ) -> Result<SignInOutcome, OnboardingError> {
        let reply: SignInReply = self
            .post_json(
                "/auth/check_password",
                serde_json::json!({
                    "login_token": login_token,
                    "password": password.expose_secret(),
                }),
            )
            .await?;
        Ok(reply.into())
    }

    async fn cancel(&self, login_token: &str) -> Result<(), OnboardingError> {
        self.post(
            "/auth/cancel",
            serde_json::json!({ "login_token": login_token }),
        )
        .await?;
        Ok(())
    }
}
