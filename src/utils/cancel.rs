//! Cancellation utilities
//!
//! A [`CancelHandle`] is passed by value into every request and stream task
//! and checked at each suspension point (connect, every read, every flush).

use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::stream::TextStream;

/// A handle that can be used to request cancellation.
///
/// Clones share the same signal. Cancelling is idempotent.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Pending reads observing this handle resolve
    /// with [`LlmError::Aborted`] and the underlying connection is dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fail fast with [`LlmError::Aborted`] if already cancelled.
    pub fn check(&self) -> Result<(), LlmError> {
        if self.is_cancelled() {
            Err(LlmError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless cancellation wins the race.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(LlmError::Aborted),
            out = fut => out,
        }
    }
}

/// Make a text stream stop with [`LlmError::Aborted`] once `handle` is cancelled.
pub fn make_cancellable_stream(stream: TextStream, handle: CancelHandle) -> TextStream {
    let mut inner = stream;
    let s = async_stream::stream! {
        use futures::StreamExt;
        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancelled() => None,
                item = inner.next() => Some(item),
            };
            match next {
                None => {
                    yield Err(LlmError::Aborted);
                    break;
                }
                Some(Some(item)) => yield item,
                Some(None) => break,
            }
        }
    };
    Box::pin(s)
}
