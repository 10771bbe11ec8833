//! Scripted in-memory [`Client`] for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{Client, HistoryParams, Page, RepliesParams, UserProfile};
use crate::error::ClientError;
use crate::message::RawMessage;

type Scripted<T> = Result<T, ClientError>;

/// Answers come from lookup tables filled in by the test.
///
/// History is keyed by `(channel, latest, cursor)` so that thread lead
/// queries (`latest = thread_ts`) do not collide with the first history page.
#[derive(Default)]
pub struct FakeClient {
    history: Mutex<HashMap<(String, String, String), Scripted<Page>>>,
    replies: Mutex<HashMap<(String, String, String), Scripted<Page>>>,
    users: Mutex<HashMap<String, Scripted<UserProfile>>>,
    pub history_calls: Mutex<Vec<HistoryParams>>,
    pub replies_calls: Mutex<Vec<RepliesParams>>,
    pub user_calls: AtomicUsize,
    call_delay: Option<Duration>,
}

fn missing() -> ClientError {
    ClientError::Http {
        status: Some(404),
        message: "no scripted response".into(),
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long first, to let concurrent tasks overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn with_history(self, channel: &str, cursor: &str, page: Scripted<Page>) -> Self {
        self.history
            .lock()
            .unwrap()
            .insert((channel.into(), String::new(), cursor.into()), page);
        self
    }

    pub fn with_lead(self, channel: &str, thread_ts: &str, page: Scripted<Page>) -> Self {
        self.history
            .lock()
            .unwrap()
            .insert((channel.into(), thread_ts.into(), String::new()), page);
        self
    }

    pub fn with_replies(
        self,
        channel: &str,
        thread_ts: &str,
        cursor: &str,
        page: Scripted<Page>,
    ) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert((channel.into(), thread_ts.into(), cursor.into()), page);
        self
    }

    pub fn with_user(self, id: &str, name: &str) -> Self {
        let profile = UserProfile {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        };
        self.users.lock().unwrap().insert(id.into(), Ok(profile));
        self
    }

    pub fn with_user_error(self, id: &str, err: ClientError) -> Self {
        self.users.lock().unwrap().insert(id.into(), Err(err));
        self
    }

    pub fn history_calls(&self) -> Vec<HistoryParams> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn replies_calls(&self) -> Vec<RepliesParams> {
        self.replies_calls.lock().unwrap().clone()
    }

    pub fn user_call_count(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn list_history(&self, params: &HistoryParams) -> Result<Page, ClientError> {
        self.history_calls.lock().unwrap().push(params.clone());
        self.pause().await;
        let key = (
            params.channel_id.clone(),
            params.latest.clone().unwrap_or_default(),
            params.cursor.clone(),
        );
        self.history.lock().unwrap().get(&key).cloned().unwrap_or_else(|| Err(missing()))
    }

    async fn list_replies(&self, params: &RepliesParams) -> Result<Page, ClientError> {
        self.replies_calls.lock().unwrap().push(params.clone());
        self.pause().await;
        let key = (
            params.channel_id.clone(),
            params.thread_ts.clone(),
            params.cursor.clone(),
        );
        self.replies.lock().unwrap().get(&key).cloned().unwrap_or_else(|| Err(missing()))
    }

    async fn get_user_info(&self, user_id: &str) -> Result<UserProfile, ClientError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::Api("user_not_found".into())))
    }
}

/// Plain message from `user` at `ts`.
pub fn raw(ts: &str, user: &str) -> RawMessage {
    RawMessage {
        kind: "message".into(),
        user: user.into(),
        ts: ts.into(),
        text: format!("message {ts}"),
        ..Default::default()
    }
}

/// Thread lead at `ts` announcing `replies` replies.
pub fn lead(ts: &str, user: &str, replies: u32) -> RawMessage {
    RawMessage {
        thread_ts: ts.into(),
        reply_count: replies,
        ..raw(ts, user)
    }
}

/// Reply at `ts` in the thread opened at `thread_ts`.
pub fn reply(ts: &str, thread_ts: &str, user: &str) -> RawMessage {
    RawMessage {
        thread_ts: thread_ts.into(),
        ..raw(ts, user)
    }
}
