//! In-process fakes for the relay, the session transport, the store, and
//! the login gateway.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::watch;
use uuid::Uuid;

use tele_relay::error::{DatabaseError, OnboardingError, RelayError, SessionError};
use tele_relay::model::{Account, AccountId, ChatId, RuleRecord};
use tele_relay::onboarding::{Authenticator, NewCredential, SignInOutcome};
use tele_relay::relay::{LinkButton, RelaySender};
use tele_relay::session::{
    Chat, ChatKind, EventForwarder, EventHandler, InboundEvent, Payload, Sender,
    SessionConnection, SessionContext, SessionTransport,
};
use tele_relay::store::RuleSource;

pub const RELAY_ID: ChatId = 9000;

// ── Events ──────────────────────────────────────────────────────────

pub fn private_text(from: ChatId, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: 42,
        chat: Chat {
            id: from,
            kind: ChatKind::Private,
            title: None,
        },
        sender: Some(Sender {
            id: from,
            first_name: Some("Ann".into()),
            username: None,
            is_bot: false,
        }),
        outgoing: false,
        mentions_account: false,
        link: None,
        payload: Payload::Text { text: text.into() },
    }
}

pub fn group_mention(group: ChatId, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: 77,
        chat: Chat {
            id: group,
            kind: ChatKind::Supergroup,
            title: Some("Team".into()),
        },
        sender: Some(Sender {
            id: 7,
            first_name: Some("Bob".into()),
            username: None,
            is_bot: false,
        }),
        outgoing: false,
        mentions_account: true,
        link: Some(format!("https://t.me/c/{}/77", -group)),
        payload: Payload::Text { text: text.into() },
    }
}

// ── Shared log ──────────────────────────────────────────────────────

/// One outward action, as seen by the fakes.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Sent { destination: ChatId, text: String },
    Forwarded { message_id: i64, to: ChatId },
}

/// Ordered record of steps shared by a relay and a forwarder.
pub type EventLog = Arc<Mutex<Vec<Step>>>;

/// A relay and a forwarder writing to the same log.
pub fn logged_pair() -> (FakeRelay, FakeForwarder, EventLog) {
    let log = EventLog::default();
    let relay = FakeRelay {
        log: Some(Arc::clone(&log)),
        ..Default::default()
    };
    let forwarder = FakeForwarder {
        log: Some(Arc::clone(&log)),
        ..Default::default()
    };
    (relay, forwarder, log)
}

fn record(log: &Option<EventLog>, step: Step) {
    if let Some(log) = log {
        log.lock().unwrap().push(step);
    }
}

// ── Relay ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub destination: ChatId,
    pub text: String,
    pub button: Option<LinkButton>,
}

/// Records every send; fails sends to destinations in `failing`.
#[derive(Default)]
pub struct FakeRelay {
    pub sent: Mutex<Vec<Sent>>,
    pub failing: Mutex<HashSet<ChatId>>,
    pub log: Option<EventLog>,
}

impl FakeRelay {
    pub fn fail_for(&self, destination: ChatId) {
        self.failing.lock().unwrap().insert(destination);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, destination: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.destination == destination)
            .map(|s| s.text)
            .collect()
    }
}

#[async_trait]
impl RelaySender for FakeRelay {
    fn identity(&self) -> ChatId {
        RELAY_ID
    }

    async fn send_text(
        &self,
        destination: ChatId,
        text: &str,
        button: Option<&LinkButton>,
    ) -> Result<(), RelayError> {
        if self.failing.lock().unwrap().contains(&destination) {
            return Err(RelayError::Rejected {
                method: "sendMessage".into(),
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        self.sent.lock().unwrap().push(Sent {
            destination,
            text: text.to_string(),
            button: button.cloned(),
        });
        record(
            &self.log,
            Step::Sent {
                destination,
                text: text.to_string(),
            },
        );
        Ok(())
    }
}

// ── Forwarder ───────────────────────────────────────────────────────

/// Records `(message_id, to)` for every forward.
#[derive(Default)]
pub struct FakeForwarder {
    pub forwards: Mutex<Vec<(i64, ChatId)>>,
    pub fail: AtomicBool,
    pub log: Option<EventLog>,
}

impl FakeForwarder {
    pub fn forwards(&self) -> Vec<(i64, ChatId)> {
        self.forwards.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventForwarder for FakeForwarder {
    async fn forward_event(&self, event: &InboundEvent, to: ChatId) -> Result<(), SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Transport {
                account_id: 0,
                reason: "forward refused".into(),
            });
        }
        self.forwards.lock().unwrap().push((event.message_id, to));
        record(
            &self.log,
            Step::Forwarded {
                message_id: event.message_id,
                to,
            },
        );
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// In-memory `RuleSource`.
#[derive(Default)]
pub struct MemoryRules {
    pub rules: Mutex<Vec<RuleRecord>>,
    pub accounts: Mutex<Vec<Account>>,
    pub fail: AtomicBool,
}

impl MemoryRules {
    pub fn add(&self, owner: AccountId, sources: &[ChatId], destinations: &[ChatId]) -> Uuid {
        let record = RuleRecord::new(owner, sources, destinations);
        let id = record.id;
        self.rules.lock().unwrap().push(record);
        id
    }

    pub fn add_raw(&self, owner: AccountId, sources: serde_json::Value, destinations: serde_json::Value) {
        self.rules.lock().unwrap().push(RuleRecord {
            id: Uuid::new_v4(),
            owner,
            sources,
            destinations,
            created_at: Utc::now(),
        });
    }

    pub fn add_account(&self, id: AccountId, credential: &str) {
        self.accounts.lock().unwrap().push(Account {
            id,
            credential: SecretString::from(credential.to_string()),
            active: true,
        });
    }
}

#[async_trait]
impl RuleSource for MemoryRules {
    async fn rules_for(&self, owner: AccountId) -> Result<Vec<RuleRecord>, DatabaseError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("rules_for: database is locked".into()));
        }
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }

    async fn active_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Shared state of one fake connection, kept by the transport so tests can
/// push events into it after the manager owns the connection.
pub struct ConnState {
    pub account_id: AccountId,
    pub handler: Mutex<Option<Arc<dyn EventHandler>>>,
    pub closed: AtomicBool,
    pub forwarder: FakeForwarder,
    /// `disconnect` returns an error and leaves the connection open.
    pub fail_close: AtomicBool,
    /// `disconnect` never returns.
    pub hang_close: AtomicBool,
    lost: watch::Sender<bool>,
}

impl ConnState {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            forwarder: FakeForwarder::default(),
            fail_close: AtomicBool::new(false),
            hang_close: AtomicBool::new(false),
            lost: watch::channel(false).0,
        }
    }

    /// Drop the connection from the remote side.
    pub fn lose(&self) {
        self.lost.send_replace(true);
    }
}

pub struct FakeConnection {
    state: Arc<ConnState>,
    open: Arc<AtomicUsize>,
}

#[async_trait]
impl EventForwarder for FakeConnection {
    async fn forward_event(&self, event: &InboundEvent, to: ChatId) -> Result<(), SessionError> {
        self.state.forwarder.forward_event(event, to).await
    }
}

#[async_trait]
impl SessionConnection for FakeConnection {
    fn account_id(&self) -> AccountId {
        self.state.account_id
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) -> Result<(), SessionError> {
        let mut slot = self.state.handler.lock().unwrap();
        if slot.is_some() {
            return Err(SessionError::AlreadySubscribed(self.state.account_id));
        }
        *slot = Some(handler);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        if self.state.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(SessionError::Transport {
                account_id: self.state.account_id,
                reason: "close frame not acknowledged".into(),
            });
        }
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn lost(&self) -> watch::Receiver<bool> {
        self.state.lost.subscribe()
    }
}

/// Credentials in `rejected` fail with `Auth`; accounts in `unreachable`
/// fail with `Transport`.
#[derive(Default)]
pub struct FakeTransport {
    pub rejected: Mutex<HashSet<String>>,
    pub unreachable: Mutex<HashSet<AccountId>>,
    pub connects: AtomicUsize,
    pub open: Arc<AtomicUsize>,
    pub connections: Mutex<HashMap<AccountId, Arc<ConnState>>>,
}

impl FakeTransport {
    pub fn reject(&self, credential: &str) {
        self.rejected.lock().unwrap().insert(credential.to_string());
    }

    pub fn make_unreachable(&self, id: AccountId) {
        self.unreachable.lock().unwrap().insert(id);
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn connection(&self, id: AccountId) -> Option<Arc<ConnState>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    /// Deliver `event` through the latest connection for `id`, as the
    /// session's read loop would.
    pub async fn emit(&self, id: AccountId, event: InboundEvent) {
        let state = self.connection(id).expect("no connection for account");
        let handler = state
            .handler
            .lock()
            .unwrap()
            .clone()
            .expect("connection has no subscriber");
        let ctx = SessionContext {
            account_id: id,
            forwarder: &state.forwarder,
        };
        handler.on_event(ctx, event).await;
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn connect(
        &self,
        account_id: AccountId,
        credential: &SecretString,
    ) -> Result<Box<dyn SessionConnection>, SessionError> {
        use secrecy::ExposeSecret;

        self.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .rejected
            .lock()
            .unwrap()
            .contains(credential.expose_secret())
        {
            return Err(SessionError::Auth {
                account_id,
                reason: "AUTH_KEY_UNREGISTERED".into(),
            });
        }
        if self.unreachable.lock().unwrap().contains(&account_id) {
            return Err(SessionError::Transport {
                account_id,
                reason: "connection refused".into(),
            });
        }

        let state = Arc::new(ConnState::new(account_id));
        self.connections
            .lock()
            .unwrap()
            .insert(account_id, Arc::clone(&state));
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state,
            open: Arc::clone(&self.open),
        }))
    }
}

/// Handler that ignores events.
pub struct NullHandler;

#[async_trait]
impl EventHandler for NullHandler {
    async fn on_event(&self, _ctx: SessionContext<'_>, _event: InboundEvent) {}
}

// ── Login gateway ───────────────────────────────────────────────────

/// Code `11111` authorizes directly, `22222` requires the password
/// `hunter2`, anything else is an invalid code.
#[derive(Default)]
pub struct FakeAuthenticator {
    pub account_id: AccountId,
    pub credential: String,
    pub cancelled: Mutex<Vec<String>>,
    pub fail_send_code: AtomicBool,
}

impl FakeAuthenticator {
    pub fn new(account_id: AccountId, credential: &str) -> Self {
        Self {
            account_id,
            credential: credential.to_string(),
            ..Default::default()
        }
    }

    fn authorized(&self) -> SignInOutcome {
        SignInOutcome::Authorized(NewCredential {
            account_id: self.account_id,
            first_name: Some("Carol".into()),
            credential: SecretString::from(self.credential.clone()),
        })
    }
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    async fn send_code(&self, phone: &str) -> Result<String, OnboardingError> {
        if self.fail_send_code.load(Ordering::SeqCst) {
            return Err(OnboardingError::Gateway {
                endpoint: "/auth/send_code",
                reason: "PHONE_NUMBER_INVALID".into(),
            });
        }
        Ok(format!("token-{phone}"))
    }

    async fn sign_in(&self, _login_token: &str, code: &str) -> Result<SignInOutcome, OnboardingError> {
        Ok(match code {
            "11111" => self.authorized(),
            "22222" => SignInOutcome::PasswordRequired,
            _ => SignInOutcome::InvalidCode,
        })
    }

    async fn check_password(
        &self,
        _login_token: &str,
        password: &SecretString,
    ) -> Result<SignInOutcome, OnboardingError> {
        use secrecy::ExposeSecret;

        Ok(if password.expose_secret() == "hunter2" {
            self.authorized()
        } else {
            SignInOutcome::InvalidPassword
        })
    }

    async fn cancel(&self, login_token: &str) -> Result<(), OnboardingError> {
        self.cancelled.lock().unwrap().push(login_token.to_string());
        Ok(())
    }
}
