//! Caller-side retry policy
//!
//! The fetchers never retry. [`RetryingClient`] wraps any [`Client`] and
//! repeats transient failures. Every repeated attempt takes a fresh token
//! from the limiter of its endpoint class, so retries count against the same
//! budget as first attempts. A rate-limit answer holds back the whole class
//! for the delay the server asked for; network errors and 5xx responses back
//! off exponentially before queueing for a token.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{Client, HistoryParams, Page, RepliesParams, UserProfile};
use crate::error::ClientError;
use crate::limiter::{Limiters, RateLimiter};

pub const DEFAULT_RETRIES: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Backoff before retry number `attempt` (1-based): 1s, 2s, 4s... capped.
pub fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_secs(1u64 << exp).min(MAX_BACKOFF)
}

pub struct RetryingClient<C> {
    inner: C,
    retries: u32,
    limiters: Limiters,
    cancel: CancellationToken,
}

impl<C: Client> RetryingClient<C> {
    /// `retries` is the number of extra attempts after the first one.
    ///
    /// `limiters` must be the same set the fetchers use, otherwise retries
    /// bypass the budget. Once `cancel` fires no further attempt is made.
    pub fn new(inner: C, retries: u32, limiters: Limiters, cancel: CancellationToken) -> Self {
        Self {
            inner,
            retries,
            limiters,
            cancel,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn run<T, F, Fut>(
        &self,
        endpoint: &str,
        limiter: &RateLimiter,
        mut call: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        // The first attempt was admitted by the caller.
        let mut attempt = 0;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.retries || !err.is_transient() {
                return Err(err);
            }
            attempt += 1;

            let delay = match &err {
                ClientError::RateLimited { retry_after } => {
                    limiter.hold_off(*retry_after);
                    *retry_after
                }
                _ => backoff(attempt),
            };
            warn!(
                endpoint,
                attempt,
                retries = self.retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying call"
            );

            if !matches!(err, ClientError::RateLimited { .. }) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if let Err(limit_err) = limiter.acquire(&self.cancel).await {
                warn!(endpoint, attempt, error = %limit_err, "no token for retry, giving up");
                return Err(err);
            }
        }
    }
}

#[async_trait]
impl<C: Client> Client for RetryingClient<C> {
    async fn list_history(&self, params: &HistoryParams) -> Result<Page, ClientError> {
        self.run("conversations.history", &self.limiters.conversations, || {
            self.inner.list_history(params)
        })
        .await
    }

    async fn list_replies(&self, params: &RepliesParams) -> Result<Page, ClientError> {
        self.run("conversations.replies", &self.limiters.replies, || {
            self.inner.list_replies(params)
        })
        .await
    }

    async fn get_user_info(&self, user_id: &str) -> Result<UserProfile, ClientError> {
        self.run("users.info", &self.limiters.users, || {
            self.inner.get_user_info(user_id)
        })
        .await
    }
}
