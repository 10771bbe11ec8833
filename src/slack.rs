//! Slack Web API client over HTTP.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::client::{Client, HistoryParams, Page, RepliesParams, UserProfile};
use crate::error::{ClientError, Error, Result};
use crate::message::RawMessage;
use crate::metrics;

pub const SLACK_API_URL: &str = "https://slack.com/api";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new<S: Into<String>>(token: S) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::InvalidArgument("Slack token is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("slack_archiver/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token,
            base_url: std::env::var("SLACK_API_URL").unwrap_or_else(|_| SLACK_API_URL.to_string()),
        })
    }

    /// Create client with custom base url (primarily for tests).
    pub fn with_base_url<S1: Into<String>, S2: Into<String>>(
        token: S1,
        base_url: S2,
    ) -> Result<Self> {
        let mut client = Self::new(token)?;
        client.base_url = base_url.into();
        Ok(client)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    async fn get<D: DeserializeOwned + Envelope>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> std::result::Result<D, ClientError> {
        let started = Instant::now();
        let result = self.send::<D>(endpoint, query).await;
        let status = match &result {
            Ok(body) if body.ok() => "ok",
            Ok(_) => "rejected",
            Err(ClientError::RateLimited { .. }) => "rate_limited",
            Err(_) => "error",
        };
        metrics::record_api_call(endpoint, started.elapsed(), status);
        result
    }

    async fn send<D: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> std::result::Result<D, ClientError> {
        debug!(endpoint, "calling Slack API");

        let response = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| ClientError::Http {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }

        let text = response.text().await.map_err(|e| ClientError::Http {
            status: Some(status.as_u16()),
            message: format!("failed to read response body: {}", e),
        })?;

        if status != StatusCode::OK {
            return Err(ClientError::Http {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ClientError::Decode(format!("{endpoint} returned non-JSON body: {e}")))
    }
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Every Web API body carries an `ok` flag.
trait Envelope {
    fn ok(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

impl From<ListResponse> for Page {
    fn from(resp: ListResponse) -> Self {
        Page {
            ok: resp.ok,
            error: resp.error,
            messages: resp.messages,
            next_cursor: resp.response_metadata.unwrap_or_default().next_cursor,
            has_more: resp.has_more,
        }
    }
}

impl Envelope for ListResponse {
    fn ok(&self) -> bool {
        self.ok
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
}

impl Envelope for UserResponse {
    fn ok(&self) -> bool {
        self.ok
    }
}

fn push_opt(query: &mut Vec<(&'static str, String)>, key: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        query.push((key, v.clone()));
    }
}

#[async_trait]
impl Client for SlackClient {
    async fn list_history(&self, params: &HistoryParams) -> std::result::Result<Page, ClientError> {
        let mut query = vec![
            ("channel", params.channel_id.clone()),
            ("limit", params.limit.to_string()),
        ];
        if !params.cursor.is_empty() {
            query.push(("cursor", params.cursor.clone()));
        }
        push_opt(&mut query, "oldest", &params.oldest);
        push_opt(&mut query, "latest", &params.latest);
        if params.inclusive {
            query.push(("inclusive", "true".to_string()));
        }

        let resp: ListResponse = self.get("conversations.history", &query).await?;
        Ok(resp.into())
    }

    async fn list_replies(&self, params: &RepliesParams) -> std::result::Result<Page, ClientError> {
        let mut query = vec![
            ("channel", params.channel_id.clone()),
            ("ts", params.thread_ts.clone()),
            ("limit", params.limit.to_string()),
        ];
        if !params.cursor.is_empty() {
            query.push(("cursor", params.cursor.clone()));
        }

        let resp: ListResponse = self.get("conversations.replies", &query).await?;
        Ok(resp.into())
    }

    async fn get_user_info(&self, user_id: &str) -> std::result::Result<UserProfile, ClientError> {
        let resp: UserResponse = self
            .get("users.info", &[("user", user_id.to_string())])
            .await?;

        if !resp.ok {
            return Err(ClientError::Api(
                resp.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        resp.user
            .ok_or_else(|| ClientError::Decode("users.info response without user".to_string()))
    }
}
