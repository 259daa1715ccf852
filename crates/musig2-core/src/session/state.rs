//! Session lifecycle states and transitions

use serde::{Deserialize, Serialize};

/// Where a [`Session`](super::Session) is in the two-round protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Collecting public nonces from the other signers
    AwaitingNonces,
    /// All nonces received and combined; ready to sign
    NonceComplete,
    /// Local partial signature produced; collecting the others
    AwaitingSignatures,
    /// Final signature produced and verified
    Combined,
    /// A fatal error occurred; the session must be discarded
    Failed,
}

/// Inputs that move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    NoncesComplete,
    Signed,
    SignaturesComplete,
    Fatal,
}

impl SessionState {
    /// Transition table. `None` marks a transition that must not happen.
    pub(crate) fn next(self, event: Event) -> Option<SessionState> {
        use SessionState::*;

        match (self, event) {
            (AwaitingNonces, Event::NoncesComplete) => Some(NonceComplete),
            (NonceComplete, Event::Signed) => Some(AwaitingSignatures),
            (AwaitingSignatures, Event::SignaturesComplete) => Some(Combined),
            (Combined | Failed, Event::Fatal) => None,
            (_, Event::Fatal) => Some(Failed),
            _ => None,
        }
    }

    /// Whether the session accepts no further input.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Combined | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::AwaitingNonces => "awaiting_nonces",
            SessionState::NonceComplete => "nonce_complete",
            SessionState::AwaitingSignatures => "awaiting_signatures",
            SessionState::Combined => "combined",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of registering a public nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceRegistration {
    /// Still waiting on this many nonces
    Pending(usize),
    /// This nonce completed the round
    Complete,
    /// The round was already complete; the nonce was ignored
    AlreadyComplete,
}

impl NonceRegistration {
    /// Whether the nonce round is complete.
    pub fn is_complete(&self) -> bool {
        !matches!(self, NonceRegistration::Pending(_))
    }
}
