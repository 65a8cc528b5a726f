//! Refresh Stage
//!
//! Client-side stage keeping registrations alive. After every successful
//! register it schedules a re-register well before the returned expiration
//! time, one schedule per session. Unregister and chain teardown stop the
//! schedule; no register is issued once it has been stopped.

use crate::chain::{Next, Stage};
use crate::domain::{CallContext, RegistryEntry};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Smallest delay between two refreshes
pub const DEFAULT_MIN_REFRESH_DELAY: Duration = Duration::from_millis(10);

/// Configuration for the refresh stage
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Lower bound on the delay before a refresh
    pub min_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_REFRESH_DELAY,
        }
    }
}

// =============================================================================
// Schedule Policy
// =============================================================================

/// Delay before refreshing an entry expiring at `expires`.
///
/// Two thirds of the remaining lifetime, leaving the last third for the
/// refresh to reach the registry.
pub fn refresh_delay(expires: DateTime<Utc>, now: DateTime<Utc>, min_delay: Duration) -> Duration {
    let remaining = (expires - now).to_std().unwrap_or(Duration::ZERO);
    (remaining * 2 / 3).max(min_delay)
}

/// Lifetime the caller asked for, if it asked for a future expiration time
pub fn requested_lifetime(
    expiration_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<chrono::Duration> {
    let lifetime = expiration_time? - now;
    (lifetime > chrono::Duration::zero()).then_some(lifetime)
}

// =============================================================================
// Refresh Stage
// =============================================================================

#[derive(Debug)]
struct RefreshSession {
    cancel: CancellationToken,
    /// Held while a refresh is in flight; shared by every schedule of a key
    lock: Arc<Mutex<()>>,
}

/// Automatic re-registration stage
pub struct RefreshStage<E: RegistryEntry> {
    sessions: DashMap<String, RefreshSession>,
    cancel: CancellationToken,
    config: RefreshConfig,
    _kind: PhantomData<fn() -> E>,
}

impl<E: RegistryEntry> std::fmt::Debug for RefreshStage<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshStage")
            .field("kind", &E::KIND)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl<E: RegistryEntry> RefreshStage<E> {
    /// Create a refresh stage whose schedules stop when `parent` is cancelled
    /// or the stage is dropped
    pub fn new(parent: &CancellationToken) -> Self {
        Self::with_config(parent, RefreshConfig::default())
    }

    pub fn with_config(parent: &CancellationToken, config: RefreshConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            cancel: parent.child_token(),
            config,
            _kind: PhantomData,
        }
    }

    /// Number of scheduled refreshes
    pub fn scheduled(&self) -> usize {
        self.sessions.len()
    }

    fn session_key(ctx: &CallContext, name: &str) -> String {
        ctx.session
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// Replace the schedule of `key` with one for `entry`
    fn schedule(
        &self,
        key: String,
        ctx: &CallContext,
        entry: E,
        requested: Option<chrono::Duration>,
        expires: DateTime<Utc>,
        next: &Next<E>,
    ) {
        let cancel = self.cancel.child_token();
        let lock = match self.sessions.get(&key) {
            Some(previous) => {
                previous.cancel.cancel();
                previous.lock.clone()
            }
            None => Arc::new(Mutex::new(())),
        };
        self.sessions.insert(
            key.clone(),
            RefreshSession {
                cancel: cancel.clone(),
                lock: lock.clone(),
            },
        );

        let task = RefreshTask {
            key,
            ctx: ctx.detached(&cancel),
            entry,
            requested,
            delay: refresh_delay(expires, Utc::now(), self.config.min_delay),
            min_delay: self.config.min_delay,
            next: next.detach(),
            cancel,
            lock,
        };
        tokio::spawn(task.run());
    }
}

impl<E: RegistryEntry> Drop for RefreshStage<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for RefreshStage<E> {
    async fn register(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<E> {
        let requested = requested_lifetime(entry.expiration_time(), Utc::now());
        let registered = next.clone().register(ctx, entry).await?;

        if let Some(expires) = registered.expiration_time() {
            if !self.cancel.is_cancelled() {
                let key = Self::session_key(ctx, registered.name());
                debug!(kind = %E::KIND, name = registered.name(), %expires, "Refresh scheduled");
                self.schedule(key, ctx, registered.clone(), requested, expires, &next);
            }
        }

        Ok(registered)
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<()> {
        let key = Self::session_key(ctx, entry.name());
        let Some((_, session)) = self.sessions.remove(&key) else {
            return next.unregister(ctx, entry).await;
        };

        session.cancel.cancel();
        let _in_flight = session.lock.lock().await;
        debug!(kind = %E::KIND, name = entry.name(), "Refresh stopped");
        next.unregister(ctx, entry).await
    }
}

// =============================================================================
// Refresh Task
// =============================================================================

struct RefreshTask<E: RegistryEntry> {
    key: String,
    ctx: CallContext,
    entry: E,
    requested: Option<chrono::Duration>,
    delay: Duration,
    min_delay: Duration,
    next: Next<E>,
    cancel: CancellationToken,
    lock: Arc<Mutex<()>>,
}

impl<E: RegistryEntry> RefreshTask<E> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.delay) => {}
            }

            let _in_flight = self.lock.lock().await;
            if self.cancel.is_cancelled() {
                break;
            }

            let mut entry = self.entry.clone();
            entry.set_expiration_time(self.requested.map(|lifetime| Utc::now() + lifetime));

            let mut ctx = self.ctx.clone();
            match self.next.clone().register(&mut ctx, entry).await {
                Ok(registered) => {
                    if let Some(expires) = registered.expiration_time() {
                        self.delay = refresh_delay(expires, Utc::now(), self.min_delay);
                    }
                    debug!(kind = %E::KIND, name = registered.name(), "Registration refreshed");
                    self.entry = registered;
                }
                Err(e) => {
                    // Retry while the last granted deadline still holds
                    if let Some(expires) = self.entry.expiration_time() {
                        self.delay = refresh_delay(expires, Utc::now(), self.min_delay);
                    }
                    warn!(
                        kind = %E::KIND,
                        name = self.entry.name(),
                        error = %e,
                        retry_in = ?self.delay,
                        "Refresh failed"
                    );
                }
            }
        }
        debug!(kind = %E::KIND, key = %self.key, "Refresh task stopped");
    }
}
