//! Begin Stage
//!
//! Attaches a stable session to every call about an entry so that later
//! stages (refresh in particular) can key their state on it, and serializes
//! caller operations on the same entry.

use crate::chain::{Next, Stage};
use crate::domain::{CallContext, RegistryEntry, SessionId};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct BeginSession {
    id: SessionId,
    lock: Mutex<()>,
}

impl BeginSession {
    fn new(id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            lock: Mutex::new(()),
        })
    }
}

/// Session bootstrap stage.
///
/// Holds at most one session per entry name. A session lives until that
/// name is unregistered through this stage or the stage is dropped with its
/// chain. An entry that simply expires keeps its session, because the refresh
/// schedule after this stage may still be keyed on it.
#[derive(Debug, Default)]
pub struct BeginStage {
    sessions: DashMap<String, Arc<BeginSession>>,
}

impl BeginStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session currently attached to `name`
    pub fn session(&self, name: &str) -> Option<SessionId> {
        self.sessions.get(name).map(|session| session.id.clone())
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_current(&self, name: &str, session: &Arc<BeginSession>) -> bool {
        self.sessions
            .get(name)
            .map_or(false, |current| Arc::ptr_eq(current.value(), session))
    }

    /// Existing session of `name`, or a new one seeded from the caller's
    /// session id when it carries one. The flag is true for a new session.
    fn session_for(&self, name: &str, ctx: &CallContext) -> (Arc<BeginSession>, bool) {
        let mut created = false;
        let session = self
            .sessions
            .entry(name.to_string())
            .or_insert_with(|| {
                created = true;
                BeginSession::new(ctx.session.clone().unwrap_or_else(SessionId::generate))
            })
            .clone();
        (session, created)
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for BeginStage {
    async fn register(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<E> {
        // The store picks the name; the session is filed under it afterwards
        if entry.name().is_empty() {
            let session = BeginSession::new(ctx.session.clone().unwrap_or_else(SessionId::generate));
            ctx.session = Some(session.id.clone());
            let registered = next.register(ctx, entry).await?;
            debug!(name = registered.name(), session = %session.id, "Session started");
            self.sessions.insert(registered.name().to_string(), session);
            return Ok(registered);
        }

        let name = entry.name().to_string();
        loop {
            let (session, created) = self.session_for(&name, ctx);
            let _guard = session.lock.lock().await;
            // An unregister closed the session while this call waited
            if !self.is_current(&name, &session) {
                continue;
            }
            ctx.session = Some(session.id.clone());

            let result = next.register(ctx, entry).await;
            if created {
                match &result {
                    Ok(_) => debug!(name = %name, session = %session.id, "Session started"),
                    Err(_) => {
                        self.sessions
                            .remove_if(&name, |_, current| Arc::ptr_eq(current, &session));
                    }
                }
            }
            return result;
        }
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<()> {
        let name = entry.name().to_string();
        loop {
            let Some(session) = self.sessions.get(&name).map(|s| s.clone()) else {
                return next.unregister(ctx, entry).await;
            };

            let _guard = session.lock.lock().await;
            if !self.is_current(&name, &session) {
                continue;
            }
            ctx.session = Some(session.id.clone());
            next.unregister(ctx, entry).await?;

            self.sessions
                .remove_if(&name, |_, current| Arc::ptr_eq(current, &session));
            debug!(name = %name, session = %session.id, "Session closed");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::domain::NetworkServiceEndpoint;
    use parking_lot::Mutex as SyncMutex;

    type Seen = Arc<SyncMutex<Vec<Option<SessionId>>>>;

    /// Terminal stage recording the session of every call and naming
    /// anonymous entries
    #[derive(Default)]
    struct Sessions {
        seen: Seen,
    }

    #[async_trait]
    impl Stage<NetworkServiceEndpoint> for Sessions {
        async fn register(
            &self,
            ctx: &mut CallContext,
            mut entry: NetworkServiceEndpoint,
            _next: Next<NetworkServiceEndpoint>,
        ) -> Result<NetworkServiceEndpoint> {
            self.seen.lock().push(ctx.session.clone());
            if entry.name.is_empty() {
                entry.name = "generated".to_string();
            }
            Ok(entry)
        }

        async fn unregister(
            &self,
            ctx: &mut CallContext,
            _entry: NetworkServiceEndpoint,
            _next: Next<NetworkServiceEndpoint>,
        ) -> Result<()> {
            self.seen.lock().push(ctx.session.clone());
            Ok(())
        }
    }

    fn chain() -> (Arc<BeginStage>, Chain<NetworkServiceEndpoint>, Seen) {
        let begin = Arc::new(BeginStage::new());
        let terminal = Sessions::default();
        let seen = terminal.seen.clone();
        let chain = Chain::<NetworkServiceEndpoint>::builder()
            .shared(begin.clone())
            .stage(terminal)
            .build();
        (begin, chain, seen)
    }

    #[tokio::test]
    async fn test_session_is_stable_per_entry() {
        let (begin, chain, seen) = chain();

        for _ in 0..3 {
            chain
                .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
                .await
                .unwrap();
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_some());
        assert!(seen.iter().all(|s| *s == seen[0]));
        assert_eq!(begin.session("nse-1"), seen[0]);
    }

    #[tokio::test]
    async fn test_generated_name_gets_session() {
        let (begin, chain, seen) = chain();

        let mut ctx = CallContext::new();
        let entry = chain
            .register(&mut ctx, NetworkServiceEndpoint::default())
            .await
            .unwrap();

        assert_eq!(entry.name, "generated");
        assert_eq!(begin.session("generated"), ctx.session);
        assert_eq!(seen.lock()[0], ctx.session);
    }

    #[tokio::test]
    async fn test_sessions_bounded_by_names() {
        let (begin, chain, _) = chain();
        for i in 0..50 {
            let name = format!("nse-{}", i % 5);
            chain
                .register(&mut CallContext::new(), NetworkServiceEndpoint::new(name))
                .await
                .unwrap();
        }
        assert_eq!(begin.len(), 5);

        for i in 0..5 {
            let entry = NetworkServiceEndpoint::new(format!("nse-{}", i));
            chain.unregister(&mut CallContext::new(), entry).await.unwrap();
        }
        assert!(begin.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_closes_session() {
        let (begin, chain, seen) = chain();
        let entry = chain
            .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        let session = begin.session("nse-1");

        chain.unregister(&mut CallContext::new(), entry).await.unwrap();

        assert_eq!(seen.lock()[1], session);
        assert!(begin.is_empty());
    }

    /// Terminal stage with slow unregisters granting short lifetimes
    #[derive(Default)]
    struct Slow {
        registers: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Stage<NetworkServiceEndpoint> for Slow {
        async fn register(
            &self,
            _ctx: &mut CallContext,
            mut entry: NetworkServiceEndpoint,
            _next: Next<NetworkServiceEndpoint>,
        ) -> Result<NetworkServiceEndpoint> {
            self.registers
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            entry.expiration_time =
                Some(chrono::Utc::now() + chrono::Duration::milliseconds(90));
            Ok(entry)
        }

        async fn unregister(
            &self,
            _ctx: &mut CallContext,
            _entry: NetworkServiceEndpoint,
            _next: Next<NetworkServiceEndpoint>,
        ) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_racing_unregister_leaves_no_refresh() {
        use crate::chain::RefreshStage;
        use std::sync::atomic::Ordering;
        use std::time::Duration;
        use tokio_util::sync::CancellationToken;

        let terminal = Slow::default();
        let registers = terminal.registers.clone();
        let cancel = CancellationToken::new();
        let begin = Arc::new(BeginStage::new());
        let chain = Chain::<NetworkServiceEndpoint>::builder()
            .shared(begin.clone())
            .stage(RefreshStage::<NetworkServiceEndpoint>::new(&cancel))
            .stage(terminal)
            .build();

        chain
            .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();

        // Register queues behind an unregister holding the session
        let unregistering = {
            let chain = chain.clone();
            tokio::spawn(async move {
                chain
                    .unregister(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        chain
            .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        unregistering.await.unwrap().unwrap();
        assert_eq!(begin.len(), 1);

        chain
            .unregister(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        assert!(begin.is_empty());

        let after_unregister = registers.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(registers.load(Ordering::SeqCst), after_unregister);
        cancel.cancel();
    }
}
