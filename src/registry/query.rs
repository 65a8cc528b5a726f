//! Query Engine
//!
//! Turns a [`Query`] into a stream of [`RegistryEvent`]s. One-shot queries
//! yield the matching snapshot and end. Watch queries yield the snapshot and
//! then every matching change until the caller drops the stream or cancels
//! the call. An update that moves an entry out of the template is reported
//! to the watcher as a deletion, and one moving it back in as an addition.
//! A watcher that falls more than the buffer size behind receives
//! one [`Error::WatchLagged`] and is disconnected.

use crate::domain::{Query, RegistryEntry};
use crate::error::{Error, Result};
use crate::metrics::WatchGuard;
use crate::registry::events::{EventKind, RegistryEvent};
use crate::registry::store::Store;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result stream of a find
pub type FindStream<E> = BoxStream<'static, Result<RegistryEvent<E>>>;

/// Drain a one-shot find into the list of entries it returned
pub async fn collect_entries<E: RegistryEntry>(stream: FindStream<E>) -> Result<Vec<E>> {
    stream.map_ok(|event| event.entry).try_collect().await
}

impl<E: RegistryEntry> Store<E> {
    /// Evaluate a query against this store
    pub fn find(&self, query: Query<E>, cancel: CancellationToken) -> FindStream<E> {
        if !query.watch {
            let snapshot = self.snapshot(&query.entry);
            let revision = snapshot.revision;
            return stream::iter(
                snapshot
                    .entries
                    .into_iter()
                    .map(move |entry| Ok(RegistryEvent::added(entry, revision))),
            )
            .boxed();
        }

        let (snapshot, receiver) = self.snapshot_and_subscribe(&query.entry);
        let revision = snapshot.revision;
        debug!(kind = %E::KIND, revision, initial = snapshot.entries.len(), "Watch opened");

        let visible = snapshot
            .entries
            .iter()
            .map(|entry| entry.name().to_string())
            .collect();
        let initial = stream::iter(
            snapshot
                .entries
                .into_iter()
                .map(move |entry| Ok(RegistryEvent::added(entry, revision))),
        );

        let watch = Watch {
            receiver,
            template: query.entry,
            after: revision,
            visible,
            cancel,
            finished: false,
            _guard: WatchGuard::new(self.metrics().watchers(E::KIND)),
        };
        let updates = stream::unfold(watch, |mut watch| async move {
            let item = watch.next_event().await?;
            Some((item, watch))
        });

        initial.chain(updates).boxed()
    }
}

/// State of an open watch
struct Watch<E: RegistryEntry> {
    receiver: broadcast::Receiver<RegistryEvent<E>>,
    template: E,
    after: u64,
    /// Names this watcher currently holds as matching
    visible: HashSet<String>,
    cancel: CancellationToken,
    finished: bool,
    _guard: WatchGuard,
}

impl<E: RegistryEntry> Watch<E> {
    async fn next_event(&mut self) -> Option<Result<RegistryEvent<E>>> {
        if self.finished {
            return None;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(kind = %E::KIND, "Watch cancelled");
                    return None;
                }
                received = self.receiver.recv() => match received {
                    Ok(event) => {
                        if event.revision <= self.after {
                            continue;
                        }
                        self.after = event.revision;
                        if let Some(event) = self.filter(event) {
                            return Some(Ok(event));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(kind = %E::KIND, skipped, "Watch lagged, disconnecting");
                        self.finished = true;
                        return Some(Err(Error::WatchLagged { skipped }));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Event as this watcher sees it, if it sees it at all
    fn filter(&mut self, event: RegistryEvent<E>) -> Option<RegistryEvent<E>> {
        let name = event.name().to_string();
        if event.entry.matches(&self.template) {
            if event.is_deleted() {
                self.visible.remove(&name);
                return Some(event);
            }
            // Back inside the template after leaving it
            if self.visible.insert(name) && event.kind == EventKind::Updated {
                return Some(RegistryEvent::added(event.entry, event.revision));
            }
            return Some(event);
        }

        // Left the template
        if self.visible.remove(&name) {
            return Some(RegistryEvent::deleted(event.entry, event.revision));
        }
        None
    }
}
