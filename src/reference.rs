//! Channel and thread references given on the command line.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::message::Ts;

static PERMALINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://[^/]+/archives/(?P<channel>[A-Z0-9]+)(?:/p(?P<secs>\d{10})(?P<micros>\d{6}))?/?(?:\?(?P<query>.*))?$",
    )
    .unwrap_or_else(|e| panic!("invalid permalink regex: {e}"))
});

static CHANNEL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[CDG][A-Z0-9]{2,}$").unwrap_or_else(|e| panic!("invalid channel regex: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Channel(String),
    Thread { channel_id: String, thread_ts: String },
}

impl EntityRef {
    /// Parse `C123`, `C123:1577694990.000400` or an archive permalink.
    ///
    /// A permalink to a reply (`?thread_ts=...`) refers to the whole thread.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidArgument("empty channel reference".to_string()));
        }

        if let Some(caps) = PERMALINK.captures(input) {
            let channel_id = caps["channel"].to_string();
            let query_ts = caps
                .name("query")
                .and_then(|q| thread_ts_param(q.as_str()));
            let link_ts = match (caps.name("secs"), caps.name("micros")) {
                (Some(s), Some(m)) => Some(format!("{}.{}", s.as_str(), m.as_str())),
                _ => None,
            };
            return Ok(match query_ts.or(link_ts) {
                Some(thread_ts) => {
                    validate_ts(&thread_ts)?;
                    EntityRef::Thread {
                        channel_id,
                        thread_ts,
                    }
                }
                None => EntityRef::Channel(channel_id),
            });
        }

        let (channel_id, thread_ts) = match input.split_once(':') {
            Some((c, t)) => (c, Some(t)),
            None => (input, None),
        };
        if !CHANNEL_ID.is_match(channel_id) {
            return Err(Error::InvalidArgument(format!(
                "not a channel ID or archive link: {input:?}"
            )));
        }

        match thread_ts {
            Some(ts) => {
                validate_ts(ts)?;
                Ok(EntityRef::Thread {
                    channel_id: channel_id.to_string(),
                    thread_ts: ts.to_string(),
                })
            }
            None => Ok(EntityRef::Channel(channel_id.to_string())),
        }
    }

    /// Like [`EntityRef::parse`], trying `aliases` (name → channel ID) first.
    pub fn resolve(input: &str, aliases: &HashMap<String, String>) -> Result<Self> {
        let trimmed = input.trim().trim_start_matches('#');
        if let Some(id) = aliases.get(trimmed) {
            return Self::parse(id);
        }
        if let Some((name, ts)) = trimmed.split_once(':') {
            if let Some(id) = aliases.get(name) {
                return Self::parse(&format!("{id}:{ts}"));
            }
        }
        Self::parse(input)
    }

    pub fn channel_id(&self) -> &str {
        match self {
            EntityRef::Channel(id) => id,
            EntityRef::Thread { channel_id, .. } => channel_id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Channel(id) => write!(f, "{id}"),
            EntityRef::Thread {
                channel_id,
                thread_ts,
            } => write!(f, "{channel_id}:{thread_ts}"),
        }
    }
}

fn thread_ts_param(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "thread_ts")
        .map(|(_, v)| v.to_string())
}

fn validate_ts(ts: &str) -> Result<()> {
    ts.parse::<Ts>()
        .map(|_| ())
        .map_err(|_| Error::InvalidArgument(format!("invalid thread timestamp {ts:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_channel() {
        assert_eq!(
            EntityRef::parse("C0123ABC").unwrap(),
            EntityRef::Channel("C0123ABC".into())
        );
    }

    #[test]
    fn channel_with_thread() {
        let r = EntityRef::parse("C0123ABC:1577694990.000400").unwrap();
        assert_eq!(
            r,
            EntityRef::Thread {
                channel_id: "C0123ABC".into(),
                thread_ts: "1577694990.000400".into()
            }
        );
        assert_eq!(r.to_string(), "C0123ABC:1577694990.000400");
        assert_eq!(r.channel_id(), "C0123ABC");
    }

    #[test]
    fn permalink_to_message() {
        let r = EntityRef::parse("https://acme.slack.com/archives/C0123ABC/p1577694990000400").unwrap();
        assert_eq!(
            r,
            EntityRef::Thread {
                channel_id: "C0123ABC".into(),
                thread_ts: "1577694990.000400".into()
            }
        );
    }

    #[test]
    fn permalink_to_reply_points_at_thread() {
        let r = EntityRef::parse(
            "https://acme.slack.com/archives/C0123ABC/p1577700000000100?thread_ts=1577694990.000400&cid=C0123ABC",
        )
        .unwrap();
        assert_eq!(
            r,
            EntityRef::Thread {
                channel_id: "C0123ABC".into(),
                thread_ts: "1577694990.000400".into()
            }
        );
    }

    #[test]
    fn permalink_to_channel() {
        assert_eq!(
            EntityRef::parse("https://acme.slack.com/archives/C0123ABC").unwrap(),
            EntityRef::Channel("C0123ABC".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "general", "C1", "C0123ABC:yesterday", "https://example.com/foo"] {
            assert!(EntityRef::parse(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn aliases_resolve_first() {
        let aliases = HashMap::from([("general".to_string(), "C0123ABC".to_string())]);

        assert_eq!(
            EntityRef::resolve("#general", &aliases).unwrap(),
            EntityRef::Channel("C0123ABC".into())
        );
        assert_eq!(
            EntityRef::resolve("general:1.000001", &aliases).unwrap(),
            EntityRef::Thread {
                channel_id: "C0123ABC".into(),
                thread_ts: "1.000001".into()
            }
        );
        assert_eq!(
            EntityRef::resolve("G999XYZ", &aliases).unwrap(),
            EntityRef::Channel("G999XYZ".into())
        );
    }
}
