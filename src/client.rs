//! Remote client abstraction
//!
//! The fetchers talk to the service only through [`Client`], so tests can
//! substitute an in-memory fake and callers can stack decorators such as
//! [`crate::retry::RetryingClient`] on top of the HTTP implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Error, Result};
use crate::message::RawMessage;

/// Time range for a history query, both ends as `ts` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub oldest: Option<String>,
    pub latest: Option<String>,
}

impl Window {
    pub fn new(oldest: Option<String>, latest: Option<String>) -> Self {
        Self { oldest, latest }
    }

    pub fn is_unbounded(&self) -> bool {
        self.oldest.is_none() && self.latest.is_none()
    }

    /// Build a window from wall-clock bounds.
    pub fn from_dates(oldest: Option<DateTime<Utc>>, latest: Option<DateTime<Utc>>) -> Self {
        Self {
            oldest: oldest.map(date_to_ts),
            latest: latest.map(date_to_ts),
        }
    }
}

fn date_to_ts(date: DateTime<Utc>) -> String {
    format!("{}.{:06}", date.timestamp(), date.timestamp_subsec_micros())
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::InvalidArgument(format!("invalid date {value:?}: {e}")))
}

/// Parameters of one `conversations.history` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryParams {
    pub channel_id: String,
    pub cursor: String,
    pub oldest: Option<String>,
    pub latest: Option<String>,
    pub limit: u32,
    pub inclusive: bool,
}

/// Parameters of one `conversations.replies` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepliesParams {
    pub channel_id: String,
    pub thread_ts: String,
    pub cursor: String,
    pub limit: u32,
}

/// One page of a paginated listing.
///
/// `ok == false` means the service answered but refused the query; `error`
/// then carries its reason.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ok: bool,
    pub error: Option<String>,
    pub messages: Vec<RawMessage>,
    pub next_cursor: String,
    pub has_more: bool,
}

impl Page {
    pub fn ok(messages: Vec<RawMessage>) -> Self {
        Self {
            ok: true,
            messages,
            ..Default::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_next(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = cursor.into();
        self.has_more = !self.next_cursor.is_empty();
        self
    }

    /// True when another request with `next_cursor` would return more data.
    pub fn is_last(&self) -> bool {
        !self.has_more || self.next_cursor.is_empty()
    }
}

/// User profile as returned by `users.info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: serde_json::Value,
}

impl UserProfile {
    /// Human-readable name, falling back to the handle and then the ID.
    pub fn display_name(&self) -> &str {
        if !self.real_name.is_empty() {
            &self.real_name
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

/// The narrow set of remote operations the archiver needs.
#[async_trait]
pub trait Client: Send + Sync {
    async fn list_history(&self, params: &HistoryParams) -> std::result::Result<Page, ClientError>;

    async fn list_replies(&self, params: &RepliesParams) -> std::result::Result<Page, ClientError>;

    async fn get_user_info(&self, user_id: &str) -> std::result::Result<UserProfile, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_with_next_sets_has_more() {
        let page = Page::ok(Vec::new()).with_next("dXNlcjpVMDYxTkZUVDI=");
        assert!(page.has_more);
        assert!(!page.is_last());

        let last = Page::ok(Vec::new()).with_next("");
        assert!(last.is_last());
    }

    #[test]
    fn page_with_has_more_but_no_cursor_is_last() {
        let page = Page {
            ok: true,
            has_more: true,
            ..Default::default()
        };
        assert!(page.is_last());
    }

    #[test]
    fn rejected_page_carries_reason() {
        let page = Page::rejected("not_in_channel");
        assert!(!page.ok);
        assert_eq!(page.error.as_deref(), Some("not_in_channel"));
    }

    #[test]
    fn display_name_fallbacks() {
        let mut user = UserProfile {
            id: "U1".into(),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "U1");
        user.name = "bob".into();
        assert_eq!(user.display_name(), "bob");
        user.real_name = "Bob Smith".into();
        assert_eq!(user.display_name(), "Bob Smith");
    }

    #[test]
    fn window_from_dates() {
        let oldest = parse_date("2022-01-29").unwrap();
        let latest = parse_date("2022-01-29T03:05:14.5Z").unwrap();
        let window = Window::from_dates(Some(oldest), Some(latest));
        assert_eq!(window.oldest.as_deref(), Some("1643414400.000000"));
        assert_eq!(window.latest.as_deref(), Some("1643425514.500000"));
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("yesterday").is_err());
        assert!(parse_date("2022-13-01").is_err());
    }

    #[test]
    fn window_unbounded() {
        assert!(Window::default().is_unbounded());
        assert!(!Window::new(Some("1.0".into()), None).is_unbounded());
    }
}
