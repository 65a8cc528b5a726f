//! Entry Store
//!
//! Concurrency-safe table of registry entries keyed by name. A single lock
//! guards the table, the deadline index and the revision counter, so every
//! mutation of a name is atomic and all mutations of a store are totally
//! ordered. Events are published to watchers while the lock is held.

use crate::config::RegistryConfig;
use crate::domain::RegistryEntry;
use crate::error::{Error, Result};
use crate::metrics::{Operation, RegistryMetrics};
use crate::registry::events::RegistryEvent;
use crate::registry::expire::{compute_deadline, ExpirationIndex};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error};

// =============================================================================
// Store State
// =============================================================================

#[derive(Debug)]
struct StoreState<E> {
    entries: HashMap<String, E>,
    deadlines: ExpirationIndex,
    revision: u64,
}

/// Consistent point-in-time view of matching entries
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    pub entries: Vec<E>,
    pub revision: u64,
}

// =============================================================================
// Store
// =============================================================================

/// In-memory entry store
pub struct Store<E: RegistryEntry> {
    state: RwLock<StoreState<E>>,
    events: broadcast::Sender<RegistryEvent<E>>,
    expire_period: Duration,
    deadline_changed: Notify,
    closed: AtomicBool,
    metrics: Arc<RegistryMetrics>,
}

impl<E: RegistryEntry> std::fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("kind", &E::KIND)
            .field("len", &self.len())
            .finish()
    }
}

impl<E: RegistryEntry> Store<E> {
    /// Create a new store
    pub fn new(config: &RegistryConfig, metrics: Arc<RegistryMetrics>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.watch_buffer.max(1));

        Arc::new(Self {
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                deadlines: ExpirationIndex::new(),
                revision: 0,
            }),
            events,
            expire_period: config.effective_expire_period(),
            deadline_changed: Notify::new(),
            closed: AtomicBool::new(false),
            metrics,
        })
    }

    /// Register an entry, inserting it or atomically replacing the entry of
    /// the same name. Returns the stored entry with its name and deadline.
    pub fn register(&self, mut entry: E) -> Result<E> {
        self.ensure_open()?;

        let mut state = self.state.write();

        if entry.name().is_empty() {
            entry.set_name(Self::unique_name(&state.entries)?);
        }

        if E::EXPIRES {
            let deadline = compute_deadline(entry.expiration_time(), Utc::now(), self.expire_period);
            entry.set_expiration_time(Some(deadline));
            if state.deadlines.schedule(entry.name(), deadline) {
                self.deadline_changed.notify_one();
            }
        }

        let previous = state.entries.insert(entry.name().to_string(), entry.clone());
        state.revision += 1;

        let (event, op) = match previous {
            Some(_) => (RegistryEvent::updated(entry.clone(), state.revision), Operation::Update),
            None => (RegistryEvent::added(entry.clone(), state.revision), Operation::Register),
        };
        let _ = self.events.send(event);
        let len = state.entries.len();
        drop(state);

        self.metrics.record(E::KIND, op);
        self.metrics.set_entries(E::KIND, len);
        debug!(kind = %E::KIND, name = entry.name(), %op, "Entry registered");

        Ok(entry)
    }

    /// Remove an entry. Removing an absent name is not an error.
    pub fn unregister(&self, name: &str) -> Result<Option<E>> {
        if name.is_empty() {
            return Err(Error::Validation(format!("{} name must not be empty", E::KIND)));
        }
        self.ensure_open()?;

        let mut state = self.state.write();
        let Some(removed) = state.entries.remove(name) else {
            return Ok(None);
        };
        state.deadlines.cancel(name);
        state.revision += 1;
        let _ = self
            .events
            .send(RegistryEvent::deleted(removed.clone(), state.revision));
        let len = state.entries.len();
        drop(state);

        self.metrics.record(E::KIND, Operation::Unregister);
        self.metrics.set_entries(E::KIND, len);
        debug!(kind = %E::KIND, name, "Entry unregistered");

        Ok(Some(removed))
    }

    /// Remove every entry whose deadline is at or before `now`
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<E> {
        let mut state = self.state.write();
        let mut evicted = Vec::new();

        for name in state.deadlines.pop_expired(now) {
            match state.entries.remove(&name) {
                Some(entry) => {
                    state.revision += 1;
                    let _ = self
                        .events
                        .send(RegistryEvent::deleted(entry.clone(), state.revision));
                    evicted.push(entry);
                }
                None => {
                    error!(kind = %E::KIND, name = %name, "Deadline index referenced a missing entry");
                    debug_assert!(false, "deadline index referenced missing entry {name}");
                }
            }
        }
        let len = state.entries.len();
        drop(state);

        if !evicted.is_empty() {
            for entry in &evicted {
                self.metrics.record(E::KIND, Operation::Expire);
                debug!(kind = %E::KIND, name = entry.name(), "Entry expired");
            }
            self.metrics.set_entries(E::KIND, len);
        }

        evicted
    }

    /// Get an entry by name
    pub fn get(&self, name: &str) -> Option<E> {
        self.state.read().entries.get(name).cloned()
    }

    /// Check if an entry exists
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().entries.contains_key(name)
    }

    /// All entries matching `template`, ordered by name
    pub fn list(&self, template: &E) -> Vec<E> {
        self.snapshot(template).entries
    }

    /// Matching entries together with the revision they were read at
    pub fn snapshot(&self, template: &E) -> Snapshot<E> {
        let state = self.state.read();
        Self::collect(&state, template)
    }

    /// Snapshot and event subscription taken atomically with respect to
    /// mutations, so the subscriber sees exactly the changes after the snapshot
    pub fn snapshot_and_subscribe(
        &self,
        template: &E,
    ) -> (Snapshot<E>, broadcast::Receiver<RegistryEvent<E>>) {
        let state = self.state.read();
        let receiver = self.events.subscribe();
        (Self::collect(&state, template), receiver)
    }

    /// Subscribe to every future change
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent<E>> {
        self.events.subscribe()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.state.read().deadlines.next_deadline()
    }

    /// Signalled when a registration schedules a new earliest deadline
    pub fn deadline_changed(&self) -> &Notify {
        &self.deadline_changed
    }

    /// Current revision (number of mutations applied)
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    /// Reject further mutations
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn collect(state: &StoreState<E>, template: &E) -> Snapshot<E> {
        let mut entries: Vec<E> = state
            .entries
            .values()
            .filter(|entry| entry.matches(template))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Snapshot {
            entries,
            revision: state.revision,
        }
    }

    fn unique_name(entries: &HashMap<String, E>) -> Result<String> {
        loop {
            let name = E::generate_name().ok_or_else(|| {
                Error::Validation(format!("{} name must not be empty", E::KIND))
            })?;
            if !entries.contains_key(&name) {
                return Ok(name);
            }
        }
    }
}
