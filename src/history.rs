//! Channel history fetcher
//!
//! Pages through `conversations.history` until the service reports no more
//! data. Each request waits for a conversations-tier token first. The page
//! chain is strictly sequential: every request needs the cursor returned by
//! the previous one.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{Client, HistoryParams, Page, Window};
use crate::error::{ClientError, Error, Result};
use crate::limiter::RateLimiter;
use crate::message::{convert_messages, Message};

pub(crate) const HISTORY_OP: &str = "conversations.history";

/// Upper bound on pages per listing, guards against a cursor that never ends.
pub(crate) const MAX_PAGES: usize = 10_000;

/// Fetch the whole history of `channel_id` within `window`.
///
/// Messages are returned in arrival order (newest first, as the service
/// sends them); ordering is left to [`crate::message::sort_messages`].
pub async fn fetch_history(
    client: &dyn Client,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    channel_id: &str,
    window: &Window,
    page_size: u32,
) -> Result<Vec<Message>> {
    let mut out = Vec::new();
    fetch_history_into(client, limiter, cancel, channel_id, window, page_size, &mut out).await?;
    Ok(out)
}

/// Same as [`fetch_history`], appending to `out`.
///
/// On error every page received before the failure is already in `out`, so
/// the caller can decide whether a partial history is worth keeping.
pub async fn fetch_history_into(
    client: &dyn Client,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    channel_id: &str,
    window: &Window,
    page_size: u32,
    out: &mut Vec<Message>,
) -> Result<()> {
    let pages = paginate(HISTORY_OP, channel_id, limiter, cancel, out, |cursor| {
        let params = HistoryParams {
            channel_id: channel_id.to_string(),
            cursor,
            oldest: window.oldest.clone(),
            latest: window.latest.clone(),
            limit: page_size,
            inclusive: false,
        };
        async move { client.list_history(&params).await }
    })
    .await?;

    info!(
        channel = channel_id,
        pages,
        messages = out.len(),
        "fetched channel history"
    );
    Ok(())
}

/// Drive a cursor-paginated listing to the end.
///
/// Returns the number of pages fetched. Messages of every page are appended
/// to `out` as they arrive.
pub(crate) async fn paginate<F, Fut>(
    op: &'static str,
    target: &str,
    limiter: &RateLimiter,
    cancel: &CancellationToken,
    out: &mut Vec<Message>,
    mut fetch_page: F,
) -> Result<usize>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<Page, ClientError>>,
{
    let mut cursor = String::new();

    for page_no in 1..=MAX_PAGES {
        limiter.acquire(cancel).await.map_err(|err| match err {
            Error::Cancelled { .. } => Error::cancelled(op, target),
            other => other,
        })?;

        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(op, target)),
            result = fetch_page(cursor.clone()) => result,
        }
        .map_err(|source| Error::transport(op, target, source))?;

        if !page.ok {
            return Err(Error::rejected(op, target, page.error));
        }

        debug!(op, target, page = page_no, messages = page.messages.len(), "page received");

        let last = page.is_last();
        out.extend(convert_messages(page.messages));
        if last {
            return Ok(page_no);
        }
        cursor = page.next_cursor;
    }

    Err(Error::Internal(format!(
        "{op} {target}: pagination did not finish after {MAX_PAGES} pages"
    )))
}
