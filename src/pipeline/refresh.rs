//! Single-flight guard for refresh exchanges.
//!
//! Callers read [`RefreshGate::epoch`] before sending a request. On a 401 they call
//! [`RefreshGate::run`] with that epoch and the refresh credential the session holds
//! at that moment. If a refresh completed since the epoch was read and it was made
//! for that same credential, they get its outcome instead of starting another
//! exchange. An outcome never outlives its session: after a new sign-in the held
//! credential differs and a fresh exchange runs. The epoch is bumped only after the
//! new credential has been stored, so a caller that observes the new epoch also
//! observes the new credential.

use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) enum RefreshOutcome {
    /// New access credential, already stored.
    Renewed(SecretString),
    /// The exchange failed; the session has been torn down.
    Rejected,
    /// Nothing to exchange.
    Unavailable,
    /// The session was cleared or replaced while the exchange was in flight.
    Discarded,
}

/// A finished exchange and the refresh credentials it speaks for.
#[derive(Debug, Clone)]
pub(crate) struct Settled {
    pub(crate) outcome: RefreshOutcome,
    /// Credential the exchange was made with.
    pub(crate) exchanged: Option<SecretString>,
    /// Credential the session was left with (the rotated one, if any).
    pub(crate) remaining: Option<SecretString>,
}

impl Settled {
    fn covers(&self, held: Option<&SecretString>) -> bool {
        same_credential(self.exchanged.as_ref(), held)
            || same_credential(self.remaining.as_ref(), held)
    }
}

fn same_credential(a: Option<&SecretString>, b: Option<&SecretString>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GateResult {
    pub(crate) outcome: RefreshOutcome,
    /// `true` for the caller that ran the exchange, `false` for callers that joined it.
    pub(crate) led: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RefreshGate {
    epoch: AtomicU64,
    last: Mutex<Option<Settled>>,
}

impl RefreshGate {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) async fn run<F, Fut>(
        &self,
        observed_epoch: u64,
        held: Option<&SecretString>,
        refresh: F,
    ) -> GateResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Settled>,
    {
        let mut last = self.last.lock().await;

        if self.epoch.load(Ordering::SeqCst) != observed_epoch {
            if let Some(settled) = last.as_ref().filter(|settled| settled.covers(held)) {
                return GateResult {
                    outcome: settled.outcome.clone(),
                    led: false,
                };
            }
        }

        let settled = refresh().await;
        let outcome = settled.outcome.clone();
        *last = Some(settled);
        self.epoch.fetch_add(1, Ordering::SeqCst);

        GateResult { outcome, led: true }
    }
}
