//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod dump;
pub mod thread;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::Config;
use crate::error::Result;
use crate::limiter::Limiters;
use crate::retry::RetryingClient;
use crate::slack::SlackClient;

pub use dump::{run as dump_run, DumpArgs, DumpSummary};
pub use thread::{run as thread_run, ThreadArgs};

/// HTTP client from config, wrapped in the retry policy.
///
/// Retries draw tokens from `limiters`, which must be the set the dump uses.
pub fn build_client(
    config: &Config,
    limiters: &Limiters,
    cancel: &CancellationToken,
) -> Result<Arc<dyn Client>> {
    let slack = SlackClient::with_base_url(config.token.clone(), config.api_url.clone())?;
    Ok(Arc::new(RetryingClient::new(
        slack,
        config.retries,
        limiters.clone(),
        cancel.clone(),
    )))
}
