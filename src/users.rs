//! User index: lazily resolved user profiles shared by a dump run
//!
//! Lookups happen from several thread-fetch tasks at once. Each ID owns an
//! async once-cell: the first task to reference an unseen ID performs the
//! remote lookup, every other task referencing it meanwhile waits for that
//! outcome. The map of cells is guarded by a std mutex that is never held
//! across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Client, UserProfile};
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::message::Message;

const USERS_OP: &str = "users.info";

/// Settled lookup: the profile, or why it could not be fetched.
type Outcome = std::result::Result<UserProfile, String>;

#[derive(Debug, Default)]
pub struct UserIndex {
    entries: Mutex<HashMap<String, Arc<OnceCell<Outcome>>>>,
}

impl UserIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<UserProfile> {
        let entries = self.entries.lock().ok()?;
        match entries.get(user_id)?.get()? {
            Ok(profile) => Some(profile.clone()),
            Err(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs whose lookup failed during this run, sorted.
    pub fn unresolved(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, cell)| matches!(cell.get(), Some(Err(_))))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Copy of the resolved profiles, for the export layer.
    pub fn snapshot(&self) -> HashMap<String, UserProfile> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(id, cell)| match cell.get() {
                        Some(Ok(profile)) => Some((id.clone(), profile.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock_entries(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<OnceCell<Outcome>>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("user index lock poisoned".to_string()))
    }

    /// Return the profile for `user_id`, looking it up on first reference.
    ///
    /// At most one remote call is made per ID, however many tasks ask for it
    /// concurrently. A failed lookup is reported once and remembered; later
    /// calls for the same ID fail with [`Error::UnresolvedUser`] without
    /// another remote call. Cancellation is passed through unchanged and
    /// leaves the ID unsettled.
    pub async fn resolve(
        &self,
        client: &dyn Client,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        user_id: &str,
    ) -> Result<UserProfile> {
        let cell = self.lock_entries()?.entry(user_id.to_string()).or_default().clone();

        let outcome = cell
            .get_or_try_init(|| async {
                match self.lookup(client, limiter, cancel, user_id).await {
                    Ok(profile) => {
                        debug!(user_id, name = profile.display_name(), "user resolved");
                        Ok(Ok(profile))
                    }
                    Err(err) if err.is_cancelled() => Err(err),
                    Err(err) => {
                        let reason = err.to_string();
                        warn!(user_id, %reason, "could not resolve user");
                        Ok(Err(reason))
                    }
                }
            })
            .await?;

        outcome.clone().map_err(|reason| Error::UnresolvedUser {
            user_id: user_id.to_string(),
            reason,
        })
    }

    async fn lookup(
        &self,
        client: &dyn Client,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        user_id: &str,
    ) -> Result<UserProfile> {
        limiter.acquire(cancel).await.map_err(|err| match err {
            Error::Cancelled { .. } => Error::cancelled(USERS_OP, user_id),
            other => other,
        })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(USERS_OP, user_id)),
            result = client.get_user_info(user_id) => {
                result.map_err(|source| Error::transport(USERS_OP, user_id, source))
            }
        }
    }

    /// Resolve the authors of `msgs` and their thread replies.
    ///
    /// Messages whose author cannot be resolved are kept and flagged with
    /// `unresolved_user`. Only cancellation aborts.
    pub async fn annotate(
        &self,
        client: &dyn Client,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        msgs: &mut [Message],
    ) -> Result<()> {
        for msg in msgs.iter_mut() {
            self.annotate_one(client, limiter, cancel, msg).await?;
            for reply in msg.thread_replies.iter_mut() {
                self.annotate_one(client, limiter, cancel, reply).await?;
            }
        }
        Ok(())
    }

    async fn annotate_one(
        &self,
        client: &dyn Client,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        msg: &mut Message,
    ) -> Result<()> {
        if msg.user().is_empty() {
            return Ok(());
        }
        match self.resolve(client, limiter, cancel, msg.user()).await {
            Ok(_) => Ok(()),
            Err(Error::UnresolvedUser { .. }) => {
                msg.unresolved_user = true;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
