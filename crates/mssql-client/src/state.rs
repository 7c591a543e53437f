//! Session lifecycle states.
//!
//! ```text
//! Disconnected -> PreLogin        (connect: pre-login sent)
//! PreLogin -> Authenticating      (server pre-login accepted, Login7 sent)
//! Authenticating -> Ready         (LOGINACK and terminal DONE)
//! Ready -> Executing              (request sent)
//! Executing -> Ready              (terminal DONE, or attention acknowledged)
//! any -> Closed                   (close)
//! any -> Errored                  (framing, protocol or authentication failure)
//! ```
//!
//! `Errored` only leaves to `Closed`.

use std::fmt;

/// Runtime state of a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No transport yet.
    #[default]
    Disconnected,
    /// Pre-login exchange in progress.
    PreLogin,
    /// Login7 sent, waiting for LOGINACK.
    Authenticating,
    /// Idle and usable.
    Ready,
    /// A request is outstanding.
    Executing,
    /// Closed by the caller.
    Closed,
    /// Broken by a fatal error.
    Errored,
}

impl SessionState {
    /// Check if requests can be sent.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if the session has reached a state it cannot leave except by
    /// closing.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// Check whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) | (_, Errored) => true,
            (Errored, _) => false,
            (Disconnected, PreLogin)
            | (PreLogin, Authenticating)
            | (Authenticating, Ready)
            | (Ready, Executing)
            | (Executing, Ready) => true,
            _ => false,
        }
    }

    /// Lowercase name used in logs and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::PreLogin => "pre-login",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            SessionState::Disconnected,
            SessionState::PreLogin,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Executing,
            SessionState::Ready,
            SessionState::Closed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_errored_is_absorbing() {
        assert!(SessionState::Authenticating.can_transition_to(SessionState::Errored));
        assert!(SessionState::Executing.can_transition_to(SessionState::Errored));
        assert!(!SessionState::Errored.can_transition_to(SessionState::Ready));
        assert!(SessionState::Errored.can_transition_to(SessionState::Closed));
        assert!(!SessionState::Closed.can_transition_to(SessionState::Errored));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!SessionState::Disconnected.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Ready.can_transition_to(SessionState::Authenticating));
        assert!(!SessionState::Executing.can_transition_to(SessionState::Executing));
    }

    #[test]
    fn test_usable() {
        assert!(SessionState::Ready.is_usable());
        assert!(!SessionState::Executing.is_usable());
        assert!(SessionState::Errored.is_terminal());
        assert_eq!(SessionState::PreLogin.to_string(), "pre-login");
    }
}
