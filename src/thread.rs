//! Thread fetcher: lead message and replies

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{Client, HistoryParams, RepliesParams};
use crate::error::{Error, Result};
use crate::history::{paginate, HISTORY_OP};
use crate::limiter::RateLimiter;
use crate::message::{Message, RawMessage};

pub(crate) const REPLIES_OP: &str = "conversations.replies";

fn thread_target(channel_id: &str, thread_ts: &str) -> String {
    format!("{channel_id}/{thread_ts}")
}

/// Fetch the message that opened the thread at `thread_ts`.
///
/// Uses a single-item inclusive history query anchored at the thread
/// timestamp. The three failure modes stay distinguishable:
/// [`Error::Transport`] when the call failed, [`Error::ServerRejected`] when
/// the service refused the query and [`Error::NotFound`] when it answered
/// with nothing.
pub async fn fetch_thread_lead(
    client: &dyn Client,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    channel_id: &str,
    thread_ts: &str,
) -> Result<Message> {
    let target = thread_target(channel_id, thread_ts);

    limiter.acquire(cancel).await.map_err(|err| match err {
        Error::Cancelled { .. } => Error::cancelled(HISTORY_OP, target.clone()),
        other => other,
    })?;

    let params = HistoryParams {
        channel_id: channel_id.to_string(),
        latest: Some(thread_ts.to_string()),
        limit: 1,
        inclusive: true,
        ..Default::default()
    };

    let page = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::cancelled(HISTORY_OP, target.clone())),
        result = client.list_history(&params) => result,
    }
    .map_err(|source| Error::transport(HISTORY_OP, target.clone(), source))?;

    if !page.ok {
        return Err(Error::rejected(HISTORY_OP, target, page.error));
    }

    let lead: Option<RawMessage> = page.messages.into_iter().next();
    match lead {
        Some(raw) => {
            debug!(channel = channel_id, thread_ts, "thread lead resolved");
            Ok(Message::from(raw))
        }
        None => Err(Error::NotFound {
            op: HISTORY_OP,
            target,
            what: "lead message",
        }),
    }
}

/// Fetch every message of the thread at `thread_ts`.
///
/// The service includes the lead as the first reply; it is returned as is.
pub async fn fetch_thread_replies(
    client: &dyn Client,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    channel_id: &str,
    thread_ts: &str,
    page_size: u32,
) -> Result<Vec<Message>> {
    let mut out = Vec::new();
    fetch_thread_replies_into(client, limiter, cancel, channel_id, thread_ts, page_size, &mut out)
        .await?;
    Ok(out)
}

/// Same as [`fetch_thread_replies`], appending to `out`.
pub async fn fetch_thread_replies_into(
    client: &dyn Client,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    channel_id: &str,
    thread_ts: &str,
    page_size: u32,
    out: &mut Vec<Message>,
) -> Result<()> {
    let target = thread_target(channel_id, thread_ts);
    let pages = paginate(REPLIES_OP, &target, limiter, cancel, out, |cursor| {
        let params = RepliesParams {
            channel_id: channel_id.to_string(),
            thread_ts: thread_ts.to_string(),
            cursor,
            limit: page_size,
        };
        async move { client.list_replies(&params).await }
    })
    .await?;

    debug!(
        channel = channel_id,
        thread_ts,
        pages,
        messages = out.len(),
        "fetched thread replies"
    );
    Ok(())
}
