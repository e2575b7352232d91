//! Per-call state machine for the refresh protocol.
//!
//! ```text
//! Pending -> Sent -> Fulfilled | Failed | Unauthorized
//! Unauthorized -> Failed                      (already retried)
//! Unauthorized -> Refreshing                  (marks the call as retried)
//! Refreshing -> Failed                        (no refresh credential, or session gone)
//! Refreshing -> Retried -> Fulfilled | Failed | Unauthorized
//! Refreshing -> RefreshFailed -> ForcedLogout
//! ```

use crate::error::{Error, Result};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Sent,
    Fulfilled,
    Unauthorized,
    Failed,
    Refreshing,
    Retried,
    RefreshFailed,
    ForcedLogout,
}

impl CallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Failed | Self::ForcedLogout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Request handed to the transport.
    Dispatched,
    /// Backend answered with anything but 401.
    Responded,
    /// Backend answered 401.
    Rejected,
    /// No response at all.
    TransportFailed,
    /// 401 on a call that was already retried.
    AlreadyRetried,
    RefreshStarted,
    NoRefreshCredential,
    RefreshSucceeded,
    RefreshRejected,
    /// The session was cleared while the exchange was in flight.
    RefreshDiscarded,
    SessionCleared,
}

/// Pure transition table; anything not listed is rejected.
///
/// # Errors
/// Returns [`Error::InvalidTransition`] for an event the state does not accept.
pub fn transition(from: CallState, event: CallEvent) -> Result<CallState> {
    use CallEvent as E;
    use CallState as S;

    let next = match (from, event) {
        (S::Pending, E::Dispatched) => S::Sent,
        (S::Sent | S::Retried, E::Responded) => S::Fulfilled,
        (S::Sent | S::Retried, E::Rejected) => S::Unauthorized,
        (S::Sent | S::Retried, E::TransportFailed) => S::Failed,
        (S::Unauthorized, E::AlreadyRetried) => S::Failed,
        (S::Unauthorized, E::RefreshStarted) => S::Refreshing,
        (S::Refreshing, E::NoRefreshCredential | E::RefreshDiscarded) => S::Failed,
        (S::Refreshing, E::RefreshSucceeded) => S::Retried,
        (S::Refreshing, E::RefreshRejected) => S::RefreshFailed,
        (S::RefreshFailed, E::SessionCleared) => S::ForcedLogout,
        _ => return Err(Error::InvalidTransition { from, event }),
    };

    Ok(next)
}

/// One logical API call as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    id: Ulid,
    retried: bool,
    state: CallState,
}

impl Default for OutboundRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundRequest {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            retried: false,
            state: CallState::Pending,
        }
    }

    #[must_use]
    pub fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub fn retried(&self) -> bool {
        self.retried
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// What to do with a 401: give up if the call was already retried, else refresh.
    #[must_use]
    pub fn unauthorized_event(&self) -> CallEvent {
        if self.retried {
            CallEvent::AlreadyRetried
        } else {
            CallEvent::RefreshStarted
        }
    }

    /// Apply an event. `RefreshStarted` flips the retried marker and is refused once
    /// the marker is set, so a call refreshes at most once.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] for an illegal event.
    pub fn apply(&mut self, event: CallEvent) -> Result<CallState> {
        if event == CallEvent::RefreshStarted && self.retried {
            return Err(Error::InvalidTransition {
                from: self.state,
                event,
            });
        }

        let next = transition(self.state, event)?;
        if event == CallEvent::RefreshStarted {
            self.retried = true;
        }
        self.state = next;

        Ok(next)
    }
}
