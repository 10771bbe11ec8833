//! Message model, conversion and chronological merge
//!
//! Provider payloads arrive newest-first and may overlap between pages.
//! This module turns them into [`Message`]s, removes duplicates and puts
//! them into ascending timestamp order.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Message payload exactly as the remote service returns it.
///
/// Fields the archiver does not interpret are kept in `extra` so that
/// conversion and export lose nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_msg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thread_ts: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_user_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reply_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_reply: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Internal message representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub raw: RawMessage,
    /// Replies, populated only on thread leads of a channel dump.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thread_replies: Vec<Message>,
    /// Set when the author's profile could not be looked up.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unresolved_user: bool,
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self {
            raw,
            thread_replies: Vec::new(),
            unresolved_user: false,
        }
    }
}

impl Message {
    pub fn timestamp(&self) -> &str {
        &self.raw.ts
    }

    pub fn client_msg_id(&self) -> &str {
        &self.raw.client_msg_id
    }

    pub fn thread_ts(&self) -> &str {
        &self.raw.thread_ts
    }

    pub fn user(&self) -> &str {
        &self.raw.user
    }

    /// Numeric timestamp, `None` if the provider sent garbage.
    pub fn ts(&self) -> Option<Ts> {
        self.raw.ts.parse().ok()
    }

    /// The message that opened a thread carries its own ts as `thread_ts`.
    pub fn is_thread_lead(&self) -> bool {
        !self.raw.thread_ts.is_empty() && self.raw.thread_ts == self.raw.ts
    }

    pub fn is_thread_reply(&self) -> bool {
        !self.raw.thread_ts.is_empty() && self.raw.thread_ts != self.raw.ts
    }

    /// Lead with at least one reply worth fetching.
    pub fn has_replies(&self) -> bool {
        self.is_thread_lead() && self.raw.reply_count > 0
    }

    fn dedupe_key(&self) -> DedupeKey<'_> {
        if !self.raw.client_msg_id.is_empty() {
            return DedupeKey::ClientMsgId(&self.raw.client_msg_id);
        }
        match self.ts() {
            Some(ts) => DedupeKey::Ts(ts),
            None => DedupeKey::RawTs(&self.raw.ts),
        }
    }
}

/// Identity of a message for deduplication; timestamps compare numerically.
#[derive(Hash, PartialEq, Eq)]
enum DedupeKey<'a> {
    ClientMsgId(&'a str),
    Ts(Ts),
    RawTs(&'a str),
}

/// Fixed-point message timestamp: whole seconds plus microseconds.
///
/// `"1643425514.000200"` parses to `Ts { secs: 1643425514, micros: 200 }`.
/// Ordering is numeric, so `"999.1"` sorts before `"1000.0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ts {
    secs: u64,
    micros: u32,
}

impl Ts {
    pub fn new(secs: u64, micros: u32) -> Self {
        Self {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }
}

impl FromStr for Ts {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument(format!("invalid timestamp: {s:?}"));

        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac_part.len() > 6 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let secs = int_part.parse::<u64>().map_err(|_| invalid())?;
        let micros = if frac_part.is_empty() {
            0
        } else {
            // Right-pad so ".5" means 500000 microseconds.
            let padded = format!("{frac_part:0<6}");
            padded.parse::<u32>().map_err(|_| invalid())?
        };

        Ok(Self { secs, micros })
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

/// A channel's messages as produced by one dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub messages: Vec<Message>,
}

/// One thread: its lead plus replies sharing the lead's `thread_ts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub channel_id: String,
    pub thread_ts: String,
    pub lead: Message,
    pub replies: Vec<Message>,
}

impl Thread {
    /// Lead followed by the replies, the order a reader expects.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.lead).chain(self.replies.iter())
    }
}

/// Convert provider messages one-to-one, keeping their order.
pub fn convert_messages(raw: Vec<RawMessage>) -> Vec<Message> {
    raw.into_iter().map(Message::from).collect()
}

/// Stable ascending sort by numeric timestamp.
///
/// Messages with equal timestamps keep their input order. Timestamps that do
/// not parse sort before everything else, also in input order.
pub fn sort_messages(msgs: &mut [Message]) {
    // `None < Some(_)`, and sort_by_key is stable.
    msgs.sort_by_key(Message::ts);
}

/// Compare two `ts` strings numerically, falling back to plain equality when
/// either does not parse.
pub fn same_ts(a: &str, b: &str) -> bool {
    match (a.parse::<Ts>(), b.parse::<Ts>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// Drop repeated messages, keeping the first occurrence.
///
/// The key is `client_msg_id` when present, otherwise the numeric `ts`
/// (`"1.0"` and `"1.000000"` are the same message). Returns how many
/// messages were removed.
pub fn dedupe_messages(msgs: &mut Vec<Message>) -> usize {
    let before = msgs.len();
    let keep: Vec<bool> = {
        let mut seen: HashSet<DedupeKey<'_>> = HashSet::with_capacity(before);
        msgs.iter().map(|m| seen.insert(m.dedupe_key())).collect()
    };
    let mut flags = keep.into_iter();
    msgs.retain(|_| flags.next().unwrap_or(true));
    before - msgs.len()
}
