//! Shared error kinds (§7).
//!
//! Hand-written `Display`/`Error` impls, matching the rest of the codebase's
//! convention of small closed error enums rather than blanket `thiserror`
//! derives. Transport errors carry a `transient` flag so retry-vs-fatal is a
//! pure function of the error, never a side-effecting decision.

use std::fmt;

/// Error surfaced by the exchange gateway (§4.2, §7).
#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub transient: bool,
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { transient: true, code: None, message: message.into() }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { transient: false, code: Some(code.into()), message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self { transient: true, code: None, message: message.into() }
    }

    /// Known retryable exchange error codes (rate-limit, too-many-orders).
    pub fn is_retryable_code(code: &str) -> bool {
        matches!(code, "RATE_LIMIT" | "TOO_MANY_ORDERS" | "-1003" | "-1015")
    }

    /// Codes that mean "the thing you tried to cancel is already gone" —
    /// coerced to a synthetic successful cancellation by the gateway.
    pub fn is_cancel_ignorable(code: &str) -> bool {
        matches!(code, "UNKNOWN_ORDER" | "ALREADY_CANCELLED" | "-2011" | "-2013")
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "transport error [{code}] (transient={}): {}", self.transient, self.message),
            None => write!(f, "transport error (transient={}): {}", self.transient, self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// A single pre-trade validation failure (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub kind: String,
    pub detail: String,
}

impl ValidationError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { kind: kind.into(), detail: detail.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for ValidationError {}

/// Raised when a caller asks for a transition the order FSM does not allow.
/// Never causes a panic or abort; logged and returned as `false`/`Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransitionRejected {
    pub from: String,
    pub to: String,
}

impl fmt::Display for StateTransitionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid order state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for StateTransitionRejected {}
