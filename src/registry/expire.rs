//! Expiration Manager
//!
//! A time-ordered deadline index kept under the store lock, the deadline
//! policy applied on registration, and the background sweeper that evicts
//! entries whose deadline has passed.

use crate::domain::RegistryEntry;
use crate::registry::store::Store;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// =============================================================================
// Deadline Policy
// =============================================================================

/// Convert a std duration to a chrono one, saturating at one year
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Deadline assigned to a registration received at `now`.
///
/// No requested time, or one at or before `now`, means `now + period`.
/// A requested time past `now + period` is clamped to it.
pub fn compute_deadline(
    requested: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    period: Duration,
) -> DateTime<Utc> {
    let max = now + chrono_duration(period);
    match requested {
        Some(at) if at > now => at.min(max),
        _ => max,
    }
}

// =============================================================================
// Expiration Index
// =============================================================================

/// Deadlines ordered by time, at most one per name
#[derive(Debug, Default)]
pub struct ExpirationIndex {
    by_deadline: BTreeSet<(DateTime<Utc>, String)>,
    by_name: HashMap<String, DateTime<Utc>>,
}

impl ExpirationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline of `name`, replacing any previous one.
    ///
    /// Returns true when the new deadline became the earliest in the index.
    pub fn schedule(&mut self, name: &str, deadline: DateTime<Utc>) -> bool {
        self.cancel(name);
        self.by_deadline.insert((deadline, name.to_string()));
        self.by_name.insert(name.to_string(), deadline);
        self.next_deadline() == Some(deadline)
    }

    /// Drop the deadline of `name`
    pub fn cancel(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let deadline = self.by_name.remove(name)?;
        self.by_deadline.remove(&(deadline, name.to_string()));
        Some(deadline)
    }

    pub fn deadline(&self, name: &str) -> Option<DateTime<Utc>> {
        self.by_name.get(name).copied()
    }

    /// Earliest deadline in the index
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.first().map(|(deadline, _)| *deadline)
    }

    /// Remove and return every name whose deadline is at or before `now`
    pub fn pop_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some((deadline, _)) = self.by_deadline.first() {
            if *deadline > now {
                break;
            }
            if let Some((_, name)) = self.by_deadline.pop_first() {
                self.by_name.remove(&name);
                expired.push(name);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// =============================================================================
// Sweeper
// =============================================================================

/// Spawn the background task evicting expired entries from `store`.
///
/// The task sleeps until the earliest deadline, an earlier deadline being
/// scheduled, or `interval`, whichever comes first, and exits on `cancel`.
pub fn spawn_sweeper<E: RegistryEntry>(
    store: Arc<Store<E>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(kind = %E::KIND, ?interval, "Expiration sweeper started");
        loop {
            let wait = store
                .next_deadline()
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .map_or(interval, |until| until.min(interval));

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = store.deadline_changed().notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            let evicted = store.evict_expired(Utc::now());
            if !evicted.is_empty() {
                debug!(kind = %E::KIND, count = evicted.len(), "Evicted expired entries");
            }
        }
        info!(kind = %E::KIND, "Expiration sweeper stopped");
    })
}
