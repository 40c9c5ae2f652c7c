use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::TetrisError;

/// Resolves when the server answers a call.
///
/// - the expected packet → `Ok(packet)`
/// - the protocol's error packet → [`TetrisError::Remote`]
/// - the connection went away first → [`TetrisError::CallAbandoned`]
#[must_use = "a call's reply is lost unless the future is awaited"]
pub struct ReplyFuture<P> {
    state: ReplyState<P>,
}

enum ReplyState<P> {
    Waiting(oneshot::Receiver<Result<P, TetrisError>>),
    Failed(Option<TetrisError>),
}

impl<P> ReplyFuture<P> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<P, TetrisError>>) -> Self {
        Self {
            state: ReplyState::Waiting(rx),
        }
    }

    /// A future that resolves to `error` right away.
    pub(crate) fn failed(error: TetrisError) -> Self {
        Self {
            state: ReplyState::Failed(Some(error)),
        }
    }
}

impl<P> Future for ReplyFuture<P> {
    type Output = Result<P, TetrisError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            ReplyState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|reply| reply.unwrap_or_else(|_| Err(TetrisError::CallAbandoned))),
            ReplyState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(TetrisError::ChannelClosed)))
            }
        }
    }
}

impl<P> std::fmt::Debug for ReplyFuture<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            ReplyState::Waiting(_) => "waiting",
            ReplyState::Failed(_) => "failed",
        };
        f.debug_struct("ReplyFuture").field("state", &state).finish()
    }
}
