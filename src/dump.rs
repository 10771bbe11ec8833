//! Channel and thread dumps
//!
//! [`Dumper`] is the entry point used by the commands: it fetches a
//! channel's history, fans out reply fetches for every thread over a bounded
//! pool, resolves authors into the shared [`UserIndex`] and returns a
//! deduplicated, chronologically sorted result.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{Client, UserProfile, Window};
use crate::error::{Error, Result};
use crate::history::{fetch_history, HISTORY_OP};
use crate::limiter::Limiters;
use crate::message::{dedupe_messages, same_ts, sort_messages, Channel, Message, Thread};
use crate::thread::{fetch_thread_lead, fetch_thread_replies};
use crate::users::UserIndex;

pub const DEFAULT_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpOptions {
    pub history_page_size: u32,
    pub replies_page_size: u32,
    /// Thread fetches in flight per channel, 0 derives it from the replies burst.
    pub concurrency: usize,
    pub resolve_users: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            history_page_size: DEFAULT_PAGE_SIZE,
            replies_page_size: DEFAULT_PAGE_SIZE,
            concurrency: 0,
            resolve_users: true,
        }
    }
}

/// One dump run: shared client, limiters and user index.
pub struct Dumper {
    client: Arc<dyn Client>,
    limiters: Limiters,
    options: DumpOptions,
    users: UserIndex,
}

impl Dumper {
    pub fn new(client: Arc<dyn Client>, limiters: Limiters, options: DumpOptions) -> Self {
        Self {
            client,
            limiters,
            options,
            users: UserIndex::new(),
        }
    }

    pub fn users(&self) -> &UserIndex {
        &self.users
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    fn pool_size(&self, requested: usize) -> usize {
        let configured = if requested > 0 {
            requested
        } else {
            self.options.concurrency
        };
        if configured > 0 {
            configured
        } else {
            self.limiters.replies.limit().burst.max(1) as usize
        }
    }

    /// Dump one channel with all its threads.
    ///
    /// `concurrency` bounds the thread fetches in flight; 0 uses the
    /// configured default. Returns the channel and a snapshot of every user
    /// resolved so far in this run.
    pub async fn dump_channel(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        window: &Window,
        concurrency: usize,
    ) -> Result<(Channel, HashMap<String, UserProfile>)> {
        info!(channel = channel_id, "dumping channel");

        let mut messages = fetch_history(
            self.client.as_ref(),
            &self.limiters.conversations,
            cancel,
            channel_id,
            window,
            self.options.history_page_size,
        )
        .await?;

        let dupes = dedupe_messages(&mut messages);
        if dupes > 0 {
            debug!(channel = channel_id, dupes, "dropped duplicate history messages");
        }

        let leads: Vec<(usize, String)> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.has_replies())
            .map(|(i, m)| (i, m.timestamp().to_string()))
            .collect();
        let pool = self.pool_size(concurrency);
        debug!(channel = channel_id, threads = leads.len(), pool, "fetching threads");

        let threads = stream::iter(leads)
            .map(|(idx, thread_ts)| async move {
                let replies = self.thread_replies(cancel, channel_id, &thread_ts).await?;
                Ok::<_, Error>((idx, replies))
            })
            .buffer_unordered(pool)
            .try_collect::<Vec<_>>();
        let authors = self.annotate(cancel, &mut messages);

        let (threads, ()) = tokio::try_join!(threads, authors)?;

        let thread_count = threads.len();
        for (idx, replies) in threads {
            if let Some(lead) = messages.get_mut(idx) {
                lead.thread_replies = replies;
            }
        }
        sort_messages(&mut messages);

        info!(
            channel = channel_id,
            messages = messages.len(),
            threads = thread_count,
            users = self.users.len(),
            "channel dumped"
        );

        Ok((
            Channel {
                id: channel_id.to_string(),
                messages,
            },
            self.users.snapshot(),
        ))
    }

    /// Dump a single thread: its lead and all replies.
    pub async fn dump_thread(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Thread> {
        info!(channel = channel_id, thread_ts, "dumping thread");

        let lead = fetch_thread_lead(
            self.client.as_ref(),
            &self.limiters.conversations,
            cancel,
            channel_id,
            thread_ts,
        );
        let replies = self.thread_replies(cancel, channel_id, thread_ts);
        let (lead, replies) = tokio::try_join!(lead, replies)?;

        // An inclusive query at a ts nobody posted at returns the message
        // before it, which is not this thread's lead.
        if lead.ts().is_some() && !same_ts(lead.timestamp(), thread_ts) {
            return Err(Error::NotFound {
                op: HISTORY_OP,
                target: format!("{channel_id}/{thread_ts}"),
                what: "lead message",
            });
        }

        let mut lead = [lead];
        self.annotate(cancel, &mut lead).await?;
        let [lead] = lead;

        info!(channel = channel_id, thread_ts, replies = replies.len(), "thread dumped");

        Ok(Thread {
            channel_id: channel_id.to_string(),
            thread_ts: thread_ts.to_string(),
            lead,
            replies,
        })
    }

    /// Replies of one thread without the lead, deduplicated, sorted, authors
    /// resolved.
    async fn thread_replies(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<Message>> {
        let mut replies = fetch_thread_replies(
            self.client.as_ref(),
            &self.limiters.replies,
            cancel,
            channel_id,
            thread_ts,
            self.options.replies_page_size,
        )
        .await?;

        replies.retain(|m| !same_ts(m.timestamp(), thread_ts));
        dedupe_messages(&mut replies);
        sort_messages(&mut replies);
        self.annotate(cancel, &mut replies).await?;
        Ok(replies)
    }

    async fn annotate(&self, cancel: &CancellationToken, msgs: &mut [Message]) -> Result<()> {
        if !self.options.resolve_users {
            return Ok(());
        }
        self.users
            .annotate(self.client.as_ref(), &self.limiters.users, cancel, msgs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::Page;
    use crate::error::ClientError;
    use crate::limiter::{Tier, TierLimit};
    use crate::testing::{lead, raw, reply, FakeClient};

    fn fast_limiters() -> Limiters {
        let limit = TierLimit::new(Tier::Tier4, 4, 6000);
        Limiters::new(limit, limit, limit)
    }

    fn dumper(client: FakeClient) -> Dumper {
        Dumper::new(Arc::new(client), fast_limiters(), DumpOptions::default())
    }

    fn timestamps(msgs: &[Message]) -> Vec<&str> {
        msgs.iter().map(|m| m.timestamp()).collect()
    }

    fn channel_with_threads() -> FakeClient {
        FakeClient::new()
            .with_delay(Duration::from_millis(10))
            .with_history(
                "C1",
                "",
                Ok(Page::ok(vec![raw("40.000000", "U1"), lead("30.000000", "U2", 2)]).with_next("p2")),
            )
            .with_history(
                "C1",
                "p2",
                Ok(Page::ok(vec![lead("20.000000", "U1", 1), raw("10.000000", "U3")])),
            )
            .with_replies(
                "C1",
                "30.000000",
                "",
                Ok(Page::ok(vec![
                    lead("30.000000", "U2", 2),
                    reply("35.000000", "30.000000", "U1"),
                    reply("31.000000", "30.000000", "U4"),
                ])),
            )
            .with_replies(
                "C1",
                "20.000000",
                "",
                Ok(Page::ok(vec![lead("20.000000", "U1", 1), reply("25.000000", "20.000000", "U2")])),
            )
            .with_user("U1", "alice")
            .with_user("U2", "bob")
            .with_user("U3", "carol")
    }

    #[tokio::test(start_paused = true)]
    async fn dump_channel_merges_threads_and_sorts() {
        let dumper = dumper(channel_with_threads());

        let (channel, users) = dumper
            .dump_channel(&CancellationToken::new(), "C1", &Window::default(), 2)
            .await
            .unwrap();

        assert_eq!(channel.id, "C1");
        assert_eq!(
            timestamps(&channel.messages),
            ["10.000000", "20.000000", "30.000000", "40.000000"]
        );
        assert_eq!(timestamps(&channel.messages[1].thread_replies), ["25.000000"]);
        assert_eq!(
            timestamps(&channel.messages[2].thread_replies),
            ["31.000000", "35.000000"]
        );
        assert!(channel.messages[0].thread_replies.is_empty());

        assert_eq!(users.len(), 3);
        assert!(users.contains_key("U1"));
        // U4 has no profile: kept, flagged, reported.
        assert!(channel.messages[2].thread_replies[0].unresolved_user);
        assert_eq!(dumper.users().unresolved(), vec!["U4".to_string()]);
    }

    /// Two channels, each with one thread, every message written by U1.
    fn two_channels() -> FakeClient {
        FakeClient::new()
            .with_delay(Duration::from_millis(10))
            .with_history(
                "C1",
                "",
                Ok(Page::ok(vec![raw("12.000000", "U1"), lead("10.000000", "U1", 1)])),
            )
            .with_replies(
                "C1",
                "10.000000",
                "",
                Ok(Page::ok(vec![lead("10.000000", "U1", 1), reply("11.000000", "10.000000", "U1")])),
            )
            .with_history(
                "C2",
                "",
                Ok(Page::ok(vec![raw("22.000000", "U1"), lead("20.000000", "U1", 1)])),
            )
            .with_replies(
                "C2",
                "20.000000",
                "",
                Ok(Page::ok(vec![lead("20.000000", "U1", 1), reply("21.000000", "20.000000", "U1")])),
            )
            .with_user("U1", "alice")
    }

    fn single_replies_token() -> Limiters {
        let fast = TierLimit::new(Tier::Tier4, 4, 6000);
        Limiters::new(fast, TierLimit::new(Tier::Tier4, 1, 0), fast)
    }

    #[tokio::test(start_paused = true)]
    async fn channels_dumped_together_share_users_and_limiters() {
        let client = Arc::new(two_channels());
        let shared = Dumper::new(client.clone(), single_replies_token(), DumpOptions::default());
        let cancel = CancellationToken::new();
        let window = Window::default();
        let start = tokio::time::Instant::now();

        let (first, second) = tokio::join!(
            shared.dump_channel(&cancel, "C1", &window, 0),
            shared.dump_channel(&cancel, "C2", &window, 0),
        );
        let (first, _) = first.unwrap();
        let (second, users) = second.unwrap();

        assert_eq!(client.user_call_count(), 1);
        assert_eq!(shared.users().len(), 1);
        assert_eq!(users["U1"].name, "alice");
        // Both thread fetches went through the one replies token.
        assert_eq!(client.replies_calls().len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(600));

        for (id, together) in [("C1", &first), ("C2", &second)] {
            let solo = dumper(two_channels());
            let (alone, _) = solo.dump_channel(&cancel, id, &window, 0).await.unwrap();
            assert_eq!(&alone, together);
        }
        assert_eq!(timestamps(&first.messages), ["10.000000", "12.000000"]);
        assert_eq!(timestamps(&second.messages[0].thread_replies), ["21.000000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dump_channel_is_deterministic_across_pool_sizes() {
        let mut results = Vec::new();
        for pool in [1, 2, 8] {
            let dumper = dumper(channel_with_threads());
            let (channel, _) = dumper
                .dump_channel(&CancellationToken::new(), "C1", &Window::default(), pool)
                .await
                .unwrap();
            results.push(channel);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn dump_channel_aborts_on_thread_failure() {
        let client = FakeClient::new()
            .with_history("C1", "", Ok(Page::ok(vec![lead("30.0", "U1", 2)])))
            .with_replies("C1", "30.0", "", Ok(Page::rejected("thread_not_found")))
            .with_user("U1", "alice");

        let err = dumper(client)
            .dump_channel(&CancellationToken::new(), "C1", &Window::default(), 0)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ServerRejected { ref reason, .. } if reason == "thread_not_found"));
    }

    #[tokio::test]
    async fn dump_channel_surfaces_history_rejection() {
        let client = FakeClient::new().with_history("C1", "", Ok(Page::rejected("channel_not_found")));

        let err = dumper(client)
            .dump_channel(&CancellationToken::new(), "C1", &Window::default(), 0)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn dump_channel_dedupes_overlapping_pages() {
        let mut dup = raw("20.0", "U1");
        dup.client_msg_id = "m-20".into();
        let client = FakeClient::new()
            .with_history("C1", "", Ok(Page::ok(vec![raw("30.0", "U1"), dup.clone()]).with_next("p2")))
            .with_history("C1", "p2", Ok(Page::ok(vec![dup, raw("10.0", "U1")])))
            .with_user("U1", "alice");

        let (channel, _) = dumper(client)
            .dump_channel(&CancellationToken::new(), "C1", &Window::default(), 0)
            .await
            .unwrap();

        assert_eq!(timestamps(&channel.messages), ["10.0", "20.0", "30.0"]);
    }

    #[tokio::test]
    async fn dump_channel_without_user_resolution() {
        let client = FakeClient::new().with_history("C1", "", Ok(Page::ok(vec![raw("1.0", "U1")])));
        let client = Arc::new(client);
        let options = DumpOptions {
            resolve_users: false,
            ..Default::default()
        };
        let dumper = Dumper::new(client.clone(), fast_limiters(), options);

        let (channel, users) = dumper
            .dump_channel(&CancellationToken::new(), "C1", &Window::default(), 0)
            .await
            .unwrap();

        assert_eq!(channel.messages.len(), 1);
        assert!(!channel.messages[0].unresolved_user);
        assert!(users.is_empty());
        assert_eq!(client.user_call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dump_channel_cancelled() {
        let client = FakeClient::new()
            .with_delay(Duration::from_secs(10))
            .with_history("C1", "", Ok(Page::ok(vec![raw("1.0", "U1")])));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = dumper(client)
            .dump_channel(&cancel, "C1", &Window::default(), 0)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn dump_thread_returns_lead_and_sorted_replies() {
        let client = FakeClient::new()
            .with_lead("C1", "30.000000", Ok(Page::ok(vec![lead("30.000000", "U1", 2)])))
            .with_replies(
                "C1",
                "30.000000",
                "",
                Ok(Page::ok(vec![
                    lead("30.000000", "U1", 2),
                    reply("32.000000", "30.000000", "U2"),
                    reply("31.000000", "30.000000", "U1"),
                ])),
            )
            .with_user("U1", "alice")
            .with_user("U2", "bob");
        let dumper = dumper(client);

        let thread = dumper
            .dump_thread(&CancellationToken::new(), "C1", "30.000000")
            .await
            .unwrap();

        assert_eq!(thread.channel_id, "C1");
        assert_eq!(thread.lead.timestamp(), "30.000000");
        assert_eq!(timestamps(&thread.replies), ["31.000000", "32.000000"]);
        assert!(thread.replies.iter().all(|m| m.thread_ts() == "30.000000"));
        assert_eq!(dumper.users().len(), 2);
    }

    #[tokio::test]
    async fn dump_thread_lead_mismatch_is_not_found() {
        let client = FakeClient::new()
            .with_lead("C1", "30.000000", Ok(Page::ok(vec![raw("29.000000", "U1")])))
            .with_replies("C1", "30.000000", "", Ok(Page::ok(vec![])));

        let err = dumper(client)
            .dump_thread(&CancellationToken::new(), "C1", "30.000000")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn dump_thread_transport_failure() {
        let client = FakeClient::new()
            .with_lead(
                "C1",
                "30.0",
                Err(ClientError::Http {
                    status: Some(502),
                    message: "bad gateway".into(),
                }),
            )
            .with_replies("C1", "30.0", "", Ok(Page::ok(vec![])));

        let err = dumper(client)
            .dump_thread(&CancellationToken::new(), "C1", "30.0")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
    }

    #[test]
    fn pool_size_defaults_to_replies_burst() {
        let limit = TierLimit::new(Tier::Tier3, 3, 0);
        let dumper = Dumper::new(
            Arc::new(FakeClient::new()),
            Limiters::new(limit, limit, limit),
            DumpOptions::default(),
        );
        assert_eq!(dumper.pool_size(0), 3);
        assert_eq!(dumper.pool_size(5), 5);

        let configured = Dumper::new(
            Arc::new(FakeClient::new()),
            Limiters::new(limit, limit, limit),
            DumpOptions {
                concurrency: 7,
                ..Default::default()
            },
        );
        assert_eq!(configured.pool_size(0), 7);
    }
}
