//! Onboarding: the operator conversation that adds a managed account.
//!
//! The operator supplies a phone number, then the verification code, then
//! (if enabled) the two-step password. The finished credential is stored and
//! the account's session is started immediately.

pub mod login;
pub mod manager;
pub mod state;

pub use login::{Authenticator, NewCredential, SignInOutcome};
pub use manager::{OnboardingManager, OperatorId};
pub use state::{LoginFlow, LoginStep};
