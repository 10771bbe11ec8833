//! JSON export of dumped channels, threads and users.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::client::UserProfile;
use crate::error::Result;
use crate::message::{Channel, Thread};

pub const USERS_FILE: &str = "users.json";

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Write `<dir>/<channel>.json`.
pub fn write_channel(dir: &Path, channel: &Channel) -> Result<PathBuf> {
    let path = dir.join(format!("{}.json", channel.id));
    write_json(&path, channel)?;
    info!(path = %path.display(), messages = channel.messages.len(), "channel written");
    Ok(path)
}

/// Write `<dir>/<channel>-<thread_ts>.json`.
pub fn write_thread(dir: &Path, thread: &Thread) -> Result<PathBuf> {
    let path = dir.join(format!("{}-{}.json", thread.channel_id, thread.thread_ts));
    write_json(&path, thread)?;
    info!(path = %path.display(), replies = thread.replies.len(), "thread written");
    Ok(path)
}

/// Write `<dir>/users.json`, keyed by user ID in sorted order.
pub fn write_users(dir: &Path, users: &HashMap<String, UserProfile>) -> Result<PathBuf> {
    let path = dir.join(USERS_FILE);
    let sorted: BTreeMap<&String, &UserProfile> = users.iter().collect();
    write_json(&path, &sorted)?;
    info!(path = %path.display(), users = users.len(), "users written");
    Ok(path)
}
