//! Dump a single thread command

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::Config;
use crate::dump::Dumper;
use crate::error::{Error, Result};
use crate::export;
use crate::limiter::Limiters;
use crate::message::Ts;
use crate::reference::EntityRef;

#[derive(Debug, Clone, Default)]
pub struct ThreadArgs {
    /// `CHANNEL:TS`, an alias with `:TS`, or an archive link.
    pub reference: String,
    /// Thread timestamp, when `reference` names only the channel.
    pub thread_ts: Option<String>,
    pub output: Option<PathBuf>,
}

/// Dump one thread and return the written file.
pub async fn run(config: &Config, args: ThreadArgs, cancel: CancellationToken) -> Result<PathBuf> {
    let limiters = config.limiters();
    let client = super::build_client(config, &limiters, &cancel)?;
    run_with_client(config, args, client, limiters, cancel).await
}

pub async fn run_with_client(
    config: &Config,
    args: ThreadArgs,
    client: Arc<dyn Client>,
    limiters: Limiters,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    let (channel_id, thread_ts) = match (EntityRef::resolve(&args.reference, &config.channels)?, args.thread_ts) {
        (
            EntityRef::Thread {
                channel_id,
                thread_ts,
            },
            None,
        ) => (channel_id, thread_ts),
        (EntityRef::Channel(channel_id), Some(ts)) => {
            if ts.parse::<Ts>().is_err() {
                return Err(Error::InvalidArgument(format!(
                    "invalid thread timestamp {ts:?}"
                )));
            }
            (channel_id, ts)
        }
        (EntityRef::Channel(channel_id), None) => {
            return Err(Error::InvalidArgument(format!(
                "{channel_id} names a channel, a thread timestamp is required"
            )))
        }
        (EntityRef::Thread { .. }, Some(_)) => {
            return Err(Error::InvalidArgument(
                "thread timestamp given twice".to_string(),
            ))
        }
    };

    let dumper = Dumper::new(client, limiters, config.dump_options());
    let thread = dumper.dump_thread(&cancel, &channel_id, &thread_ts).await?;

    let output = args.output.unwrap_or_else(|| config.output_dir.clone());
    export::write_thread(&output, &thread)
}
