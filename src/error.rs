//! Unified error handling for nmdcd.
//!
//! Close reasons map one-to-one onto the close path the protocol engine
//! takes when it gives up on a connection; handler errors are what command
//! handlers return to the dispatcher.

use thiserror::Error;

/// Why a connection is being closed.
///
/// Every policy close sends a chat line before the disconnect, so these
/// reasons are for logging, metrics and the temp-ban tables rather than the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Default,
    Kicked,
    HookVeto,
    ForceMove,
    LoginError,
    SyntaxError,
    UserLimit,
    ShareLimit,
    TagInvalid,
    TagNone,
    TagBan,
    Timeout,
    InactivityTimeout,
    BadNick,
    /// Reserved for transfer-to-self closes; the engine currently answers
    /// those with a notice and a discard instead.
    #[allow(dead_code)]
    SelfConnect,
    Clone,
    Password,
    InvalidKey,
    Quit,
    HubLoad,
    /// Kept for operators that disable every redirect target.
    #[allow(dead_code)]
    NoRedirect,
    Reconnect,
}

impl CloseReason {
    /// Static label for metrics and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            CloseReason::Default => "default",
            CloseReason::Kicked => "kicked",
            CloseReason::HookVeto => "hook_veto",
            CloseReason::ForceMove => "force_move",
            CloseReason::LoginError => "login_error",
            CloseReason::SyntaxError => "syntax_error",
            CloseReason::UserLimit => "user_limit",
            CloseReason::ShareLimit => "share_limit",
            CloseReason::TagInvalid => "tag_invalid",
            CloseReason::TagNone => "tag_none",
            CloseReason::TagBan => "tag_ban",
            CloseReason::Timeout => "timeout",
            CloseReason::InactivityTimeout => "inactivity_timeout",
            CloseReason::BadNick => "bad_nick",
            CloseReason::SelfConnect => "self_connect",
            CloseReason::Clone => "clone",
            CloseReason::Password => "password",
            CloseReason::InvalidKey => "invalid_key",
            CloseReason::Quit => "quit",
            CloseReason::HubLoad => "hub_load",
            CloseReason::NoRedirect => "no_redirect",
            CloseReason::Reconnect => "reconnect",
        }
    }

    /// Whether a custom redirect may be offered for this reason.
    ///
    /// Redirecting a clone or a banned password retry just moves the abuse
    /// to the next hub.
    pub fn redirectable(&self) -> bool {
        matches!(
            self,
            CloseReason::UserLimit
                | CloseReason::ShareLimit
                | CloseReason::TagInvalid
                | CloseReason::TagNone
                | CloseReason::HubLoad
                | CloseReason::Kicked
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.error_code())
    }
}

/// Errors that can occur during command handling.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Close the connection; any explanation was already queued.
    #[error("close connection: {0}")]
    Close(CloseReason),

    /// Drop this message without counting it against success stats.
    #[error("message discarded")]
    Discard,

    /// The outbound queue is gone; the connection is already dying.
    #[error("send failed")]
    Send,
}

impl HandlerError {
    /// Static label for metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            HandlerError::Close(reason) => reason.error_code(),
            HandlerError::Discard => "discard",
            HandlerError::Send => "send_error",
        }
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_codes() {
        assert_eq!(CloseReason::Password.error_code(), "password");
        assert_eq!(CloseReason::InvalidKey.error_code(), "invalid_key");
        assert_eq!(HandlerError::Close(CloseReason::Clone).error_code(), "clone");
    }

    #[test]
    fn abuse_reasons_are_not_redirectable() {
        assert!(CloseReason::UserLimit.redirectable());
        assert!(!CloseReason::Clone.redirectable());
        assert!(!CloseReason::Password.redirectable());
    }
}
