//! Login backend boundary used by the onboarding flow.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::OnboardingError;
use crate::model::AccountId;

/// A freshly minted session credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub account_id: AccountId,
    pub first_name: Option<String>,
    pub credential: SecretString,
}

/// Result of submitting a code or password.
#[derive(Debug, Clone)]
pub enum SignInOutcome {
    Authorized(NewCredential),
    PasswordRequired,
    InvalidCode,
    InvalidPassword,
}

/// Mints session credentials through an interactive login.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Request a verification code. Returns an opaque login token.
    async fn send_code(&self, phone: &str) -> Result<String, OnboardingError>;

    async fn sign_in(&self, login_token: &str, code: &str) -> Result<SignInOutcome, OnboardingError>;

    async fn check_password(
        &self,
        login_token: &str,
        password: &SecretString,
    ) -> Result<SignInOutcome, OnboardingError>;

    /// Abandon a pending login.
    async fn cancel(&self, login_token: &str) -> Result<(), OnboardingError>;
}
