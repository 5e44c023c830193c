//! Cooperative cancellation carrying a caller supplied reason.
//!
//! An [`AbortSignal`] is threaded through every fetch. Traversals derive one [`AbortSignal::child`]
//! per in-flight request so that aborting the traversal aborts all of them, while aborting a
//! single request leaves its siblings (and unrelated traversals) untouched.
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::IpldError;

const DEFAULT_REASON: &str = "This operation was aborted";

#[derive(Debug, Default)]
struct Reason {
    reason: OnceLock<String>,
    parent: Option<Arc<Reason>>,
}

impl Reason {
    fn get(&self) -> Option<String> {
        self.reason
            .get()
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.get()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<Reason>,
}

impl From<CancellationToken> for AbortSignal {
    fn from(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Default::default(),
        }
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal that aborts itself once `duration` elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn timeout(duration: Duration) -> Self {
        let signal = Self::new();
        let timer = signal.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    timer.abort(format!("timed out after {duration:?}"));
                },
                _ = timer.aborted() => {},
            }
        });
        signal
    }

    /// Aborts the signal and every child derived from it. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self.reason.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal (or one of its ancestors) is aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Derives a signal that is aborted together with `self` but can be aborted on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: Arc::new(Reason {
                reason: OnceLock::new(),
                parent: Some(self.reason.clone()),
            }),
        }
    }

    /// The error reported to whoever was waiting on this signal.
    pub fn error(&self) -> IpldError {
        IpldError::Aborted(self.reason())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
