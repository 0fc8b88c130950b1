//! Drives per-operator login flows and hands finished
//! credentials to the store and the session manager.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::OnboardingError;
use crate::forwarding::notice::escape_html;
use crate::model::AccountId;
use crate::session::SessionManager;
use crate::store::Database;

use super::login::{Authenticator, NewCredential, SignInOutcome};
use super::state::{LoginFlow, LoginStep};

/// Operator id (the user talking to the control bot).
pub type OperatorId = i64;

/// What to do with a flow after one input.
enum Next {
    Continue(LoginFlow),
    Finished,
}

/// Coordinates login flows: one typed [`LoginFlow`] per operator.
pub struct OnboardingManager {
    auth: Arc<dyn Authenticator>,
    db: Arc<dyn Database>,
    sessions: Arc<SessionManager>,
    flows: Mutex<HashMap<OperatorId, LoginFlow>>,
}

impl OnboardingManager {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        db: Arc<dyn Database>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            auth,
            db,
            sessions,
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `operator` has a login open.
    pub async fn is_active(&self, operator: OperatorId) -> bool {
        self.flows.lock().await.contains_key(&operator)
    }

    pub async fn current_step(&self, operator: OperatorId) -> Option<LoginStep> {
        self.flows.lock().await.get(&operator).map(|f| f.step)
    }

    /// Open a login for `operator`. Returns the first prompt.
    pub async fn begin(&self, operator: OperatorId) -> Result<String, OnboardingError> {
        let mut flows = self.flows.lock().await;
        if flows.contains_key(&operator) {
            return Err(OnboardingError::AlreadyInProgress);
        }
        flows.insert(operator, LoginFlow::new());
        info!(operator, "Login started");
        Ok(format!(
            "Starting the process to add a new managed user...\n\n{}",
            LoginStep::Phone.prompt()
        ))
    }

    /// Drop the operator's login and cancel it on the gateway.
    pub async fn cancel(&self, operator: OperatorId) -> Result<(), OnboardingError> {
        let flow = self
            .flows
            .lock()
            .await
            .remove(&operator)
            .ok_or(OnboardingError::NotInProgress)?;
        self.abandon(operator, &flow).await;
        info!(operator, "Login cancelled");
        Ok(())
    }

    /// Feed one message into the operator's login. Returns the replies to
    /// send back. Gateway errors end the flow.
    pub async fn handle_input(
        &self,
        operator: OperatorId,
        input: &str,
    ) -> Result<Vec<String>, OnboardingError> {
        let flow = self
            .flows
            .lock()
            .await
            .remove(&operator)
            .ok_or(OnboardingError::NotInProgress)?;
        let snapshot = flow.clone();

        let mut replies = Vec::new();
        match self.advance(flow, input.trim(), &mut replies).await {
            Ok(Next::Continue(flow)) => {
                self.flows.lock().await.insert(operator, flow);
                Ok(replies)
            }
            Ok(Next::Finished) => Ok(replies),
            Err(e) => {
                error!(operator, step = %snapshot.step, error = %e, "Login failed");
                self.abandon(operator, &snapshot).await;
                Err(e)
            }
        }
    }

    async fn advance(
        &self,
        mut flow: LoginFlow,
        input: &str,
        replies: &mut Vec<String>,
    ) -> Result<Next, OnboardingError> {
        match flow.step {
            LoginStep::Phone => {
                let token = self.auth.send_code(input).await?;
                flow.phone = Some(input.to_string());
                flow.login_token = Some(token);
                flow.advance_to(LoginStep::Code)?;
                replies.push(LoginStep::Code.prompt().to_string());
                Ok(Next::Continue(flow))
            }
            LoginStep::Code => {
                let token = flow.login_token.clone().ok_or(OnboardingError::NotInProgress)?;
                let outcome = self.auth.sign_in(&token, input).await?;
                self.apply(flow, outcome, replies).await
            }
            LoginStep::Password => {
                let token = flow.login_token.clone().ok_or(OnboardingError::NotInProgress)?;
                let password = SecretString::from(input.to_string());
                let outcome = self.auth.check_password(&token, &password).await?;
                self.apply(flow, outcome, replies).await
            }
            LoginStep::Done => Ok(Next::Finished),
        }
    }

    async fn apply(
        &self,
        mut flow: LoginFlow,
        outcome: SignInOutcome,
        replies: &mut Vec<String>,
    ) -> Result<Next, OnboardingError> {
        match outcome {
            SignInOutcome::Authorized(credential) => {
                flow.advance_to(LoginStep::Done)?;
                self.finalize(credential, replies).await?;
                Ok(Next::Finished)
            }
            SignInOutcome::PasswordRequired if flow.step == LoginStep::Code => {
                flow.advance_to(LoginStep::Password)?;
                replies.push(LoginStep::Password.prompt().to_string());
                Ok(Next::Continue(flow))
            }
            SignInOutcome::PasswordRequired | SignInOutcome::InvalidPassword => {
                replies.push("Invalid password. Please try again or send /cancel.".to_string());
                Ok(Next::Continue(flow))
            }
            SignInOutcome::InvalidCode => {
                replies.push("Invalid or expired code. Please try again or send /cancel.".to_string());
                Ok(Next::Continue(flow))
            }
        }
    }

    /// Save the account and start its session right away.
    async fn finalize(
        &self,
        new: NewCredential,
        replies: &mut Vec<String>,
    ) -> Result<(), OnboardingError> {
        let id: AccountId = new.account_id;
        self.db.upsert_account(id, &new.credential).await?;
        let name = new.first_name.as_deref().unwrap_or("unknown");
        replies.push(format!(
            "✅ User <code>{id}</code> ({}) saved to database.",
            escape_html(name)
        ));
        info!(account_id = id, "Managed account saved");

        match self.sessions.start_session(id, &new.credential).await {
            Ok(()) => replies.push(format!("✅ Session for <code>{id}</code> started successfully!")),
            Err(e) => replies.push(format!(
                "❌ Failed to start session for <code>{id}</code>: {}",
                escape_html(&e.to_string())
            )),
        }
        Ok(())
    }

    async fn abandon(&self, operator: OperatorId, flow: &LoginFlow) {
        if let Some(token) = &flow.login_token {
            if let Err(e) = self.auth.cancel(token).await {
                warn!(operator, error = %e, "Failed to cancel login on gateway");
            }
        }
    }
}
