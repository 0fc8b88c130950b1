//! Login state machine. Tracks which step an operator's login is at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OnboardingError;

/// The steps of adding a managed account.
///
/// Phone → Code → (Password →) Done. The password step only appears when
/// the account has two-step verification enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginStep {
    #[default]
    Phone,
    Code,
    Password,
    Done,
}

impl LoginStep {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: LoginStep) -> bool {
        use LoginStep::*;
        matches!(
            (self, target),
            (Phone, Code) | (Code, Password) | (Code, Done) | (Password, Done)
        )
    }

    /// Whether the login is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// What the operator is asked for at this step.
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Phone => {
                "Step 1: Please provide the phone number for the account (e.g., +1234567890).\n\n\
                 Send /cancel at any time to stop."
            }
            Self::Code => "Step 2: Verification code sent. Please provide the code.",
            Self::Password => {
                "Step 3: Two-step verification is enabled. Please provide your password."
            }
            Self::Done => "Login complete.",
        }
    }
}

impl std::fmt::Display for LoginStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Phone => "phone",
            Self::Code => "code",
            Self::Password => "password",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// One operator's in-progress login.
#[derive(Debug, Clone)]
pub struct LoginFlow {
    pub step: LoginStep,
    pub phone: Option<String>,
    /// Gateway handle for the pending login, set once a code was sent.
    pub login_token: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self {
            step: LoginStep::default(),
            phone: None,
            login_token: None,
            started_at: Utc::now(),
        }
    }
}

impl LoginFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `target`, rejecting illegal transitions.
    pub fn advance_to(&mut self, target: LoginStep) -> Result<(), OnboardingError> {
        if !self.step.can_transition_to(target) {
            return Err(OnboardingError::InvalidTransition {
                from: self.step.to_string(),
                to: target.to_string(),
            });
        }
        self.step = target;
        Ok(())
    }
}
