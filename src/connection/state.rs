//! Ready-state machine

use crate::{Error, Result};

/// Connection lifecycle phase, mirroring the standard WebSocket API states.
///
/// A connection moves forward through this sequence exactly once:
/// `Connecting -> Open -> Closing -> Closed`, with direct edges to `Closed`
/// from `Connecting` (handshake failure or cancellation) and from `Open`
/// (abrupt disconnect or protocol error, where no close handshake ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Handshake not yet complete
    Connecting,

    /// Upgrade complete, frames flow
    Open,

    /// Close frame sent, awaiting the peer's close frame
    Closing,

    /// Terminal; the connection never leaves this state
    Closed,
}

impl ReadyState {
    /// Check if a transition is valid
    pub fn can_transition_to(&self, next: ReadyState) -> bool {
        use ReadyState::*;

        matches!(
            (self, next),
            (Connecting, Open)
                | (Open, Closing)
                | (Closing, Closed)
                | (Connecting, Closed)
                | (Open, Closed)
        )
    }

    /// Transition to a new state
    pub fn transition(&mut self, next: ReadyState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: format!("{}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// Numeric code used by the standard WebSocket API (0..=3)
    pub fn code(&self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
