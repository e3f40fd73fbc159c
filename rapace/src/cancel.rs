//! Cooperative cancellation (spec §5): a caller cancellation settles the
//! local future immediately; the server receives a token the handler may
//! or may not honor.

use tokio::sync::watch;

/// The caller-side handle used to request cancellation.
#[derive(Clone)]
pub struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        // Only ever transitions false -> true; a dropped receiver means
        // nobody is listening any more, which is not an error here.
        let _ = self.0.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// The handler-side token passed into `Channel::call`. A handler may poll
/// [`CancelToken::is_cancelled`] or await [`CancelToken::cancelled`], but
/// is never forced to stop (spec §5: "the caller therefore MUST NOT rely
/// on the handler observing the cancellation").
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation has been requested. Resolves
    /// immediately if it already has been.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }
}

/// Create a connected (canceller, token) pair.
pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller(tx), CancelToken(rx))
}

/// A token that can never be cancelled, useful for synthetic / internal calls.
pub fn never_cancelled() -> CancelToken {
    let (_tx, rx) = watch::channel(false);
    CancelToken(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed_by_token() {
        let (canceller, mut token) = cancel_pair();
        assert!(!token.is_cancelled());
        canceller.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let (canceller, mut token) = cancel_pair();
        canceller.cancel();
        // Must not hang.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn never_cancelled_token_reports_false() {
        let token = never_cancelled();
        assert!(!token.is_cancelled());
    }
}
