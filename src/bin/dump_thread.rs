//! Dump thread binary.

use std::env;
use slack_archiver::commands::{thread, ThreadArgs};
use slack_archiver::Config;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = env::args().collect();
    let reference = args
        .get(1)
        .ok_or_else(|| anyhow::anyhow!("Usage: dump_thread <channel:ts|link> [output_dir]"))?;
    let thread_args = ThreadArgs {
        reference: reference.clone(),
        thread_ts: None,
        output: args.get(2).map(Into::into),
    };
    let path = thread::run(&Config::new(), thread_args, CancellationToken::new()).await?;
    println!("{}", path.display());
    Ok(())
}
