//! Dump channels command
//!
//! Dumps every requested channel through one [`Dumper`], so all channels
//! share the same limiters and user index, and writes one JSON file per
//! channel plus `users.json`.

use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{parse_date, Client, Window};
use crate::config::Config;
use crate::dump::Dumper;
use crate::error::{Error, Result};
use crate::export;
use crate::limiter::Limiters;
use crate::reference::EntityRef;

#[derive(Debug, Clone, Default)]
pub struct DumpArgs {
    /// Channel IDs, aliases or archive links.
    pub channels: Vec<String>,
    pub oldest: Option<String>,
    pub latest: Option<String>,
    pub output: Option<PathBuf>,
    /// Overrides `limits.concurrency`.
    pub concurrency: Option<usize>,
    pub skip_users: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub files: Vec<PathBuf>,
    pub messages: usize,
    pub users: usize,
    pub unresolved_users: Vec<String>,
}

pub async fn run(config: &Config, args: DumpArgs, cancel: CancellationToken) -> Result<DumpSummary> {
    let limiters = config.limiters();
    let client = super::build_client(config, &limiters, &cancel)?;
    run_with_client(config, args, client, limiters, cancel).await
}

/// Same as [`run`] with an explicit client and the limiters it retries under.
pub async fn run_with_client(
    config: &Config,
    args: DumpArgs,
    client: Arc<dyn Client>,
    limiters: Limiters,
    cancel: CancellationToken,
) -> Result<DumpSummary> {
    if args.channels.is_empty() {
        return Err(Error::InvalidArgument("no channels given".to_string()));
    }

    let mut channel_ids = Vec::with_capacity(args.channels.len());
    for input in &args.channels {
        match EntityRef::resolve(input, &config.channels)? {
            EntityRef::Channel(id) => channel_ids.push(id),
            thread @ EntityRef::Thread { .. } => {
                return Err(Error::InvalidArgument(format!(
                    "{thread} is a thread reference, use the thread command"
                )))
            }
        }
    }

    let window = Window::from_dates(
        args.oldest.as_deref().map(parse_date).transpose()?,
        args.latest.as_deref().map(parse_date).transpose()?,
    );

    let mut options = config.dump_options();
    options.resolve_users = !args.skip_users;
    let dumper = Dumper::new(client, limiters, options);
    let output = args.output.unwrap_or_else(|| config.output_dir.clone());
    let concurrency = args.concurrency.unwrap_or(0);

    info!(
        channels = channel_ids.len(),
        output = %output.display(),
        "starting dump"
    );

    let mut results = stream::iter(channel_ids)
        .map(|id| {
            let dumper = &dumper;
            let window = &window;
            let cancel = &cancel;
            async move { dumper.dump_channel(cancel, &id, window, concurrency).await }
        })
        .buffer_unordered(config.channel_concurrency.max(1));

    let mut summary = DumpSummary::default();
    while let Some(result) = results.next().await {
        let (channel, _) = result?;
        summary.messages += channel.messages.len()
            + channel
                .messages
                .iter()
                .map(|m| m.thread_replies.len())
                .sum::<usize>();
        summary.files.push(export::write_channel(&output, &channel)?);
    }

    let users = dumper.users().snapshot();
    summary.users = users.len();
    if !args.skip_users {
        summary.files.push(export::write_users(&output, &users)?);
    }
    summary.unresolved_users = dumper.users().unresolved();
    if !summary.unresolved_users.is_empty() {
        warn!(
            count = summary.unresolved_users.len(),
            users = ?summary.unresolved_users,
            "some authors could not be resolved"
        );
    }

    summary.files.sort();
    Ok(summary)
}
