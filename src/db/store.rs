//! Claim store client with an explicit connection state machine
//!
//! # Lifecycle
//!
//! ```text
//!            connect() ok
//! Disconnected ───────────────▶ Connected(gen)
//!      ▲                            │
//!      │  close() / query reports   │
//!      └──── a dead connection ─────┘
//! ```
//!
//! - `connect()` is single-flight: concurrent callers queue on one lock and
//!   the first one through makes the attempt. Callers that queued behind it
//!   take its outcome, seeing `Connected` or sharing its failure, instead of
//!   starting attempts of their own.
//! - `fetch_all_claims()` queries through a cloned handle without holding any
//!   lock, so reads run concurrently.
//! - Each connection carries a generation number. A query that fails with a
//!   dead connection only tears down the generation it used, never a newer one
//!   some other caller has already re-established.
//! - State is written only after a connect fully succeeds, so a failed or
//!   cancelled `connect()` leaves the client `Disconnected`.

use async_trait::async_trait;
use bson::Document;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::transport::{ClaimTransport, Namespace, TransportError};
use crate::retry::{RetryError, RetryPolicy};
use crate::secrets::{SecretError, SecretSource};
use crate::shutdown::ShutdownSignal;

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Why a connection could not be established
#[derive(Debug, thiserror::Error)]
pub enum ConnectFailure {
    #[error("connection string lookup failed: {0}")]
    Credentials(#[from] RetryError<SecretError>),

    #[error("{0}")]
    Transport(#[from] RetryError<TransportError>),

    #[error("connection was closed before it could be used")]
    Closed,
}

/// Claim store failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Shared by every caller that waited on the same failed connect attempt
    #[error("claim store connection unavailable: {0}")]
    ConnectionUnavailable(#[source] Arc<ConnectFailure>),

    #[error("claim query failed: {0}")]
    FetchFailed(#[source] RetryError<TransportError>),
}

impl From<ConnectFailure> for StoreError {
    fn from(failure: ConnectFailure) -> Self {
        Self::ConnectionUnavailable(Arc::new(failure))
    }
}

impl StoreError {
    pub fn connect_failure(&self) -> Option<&ConnectFailure> {
        match self {
            Self::ConnectionUnavailable(failure) => Some(failure),
            Self::FetchFailed(_) => None,
        }
    }
}

/// Static configuration for a [`ClaimStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name of the secret holding the connection string
    pub connection_secret: String,
    /// Where claims live
    pub namespace: Namespace,
    /// Applied to secret lookup, connect, query and close individually
    pub retry: RetryPolicy,
}

enum Link<H> {
    Disconnected,
    Connected { handle: H, generation: u64 },
}

/// Guarded by the transition lock
#[derive(Default)]
struct Transitions {
    /// Last issued connection generation
    generation: u64,
    /// Outcome of the most recent connect attempt, if it failed
    last_failure: Option<Arc<ConnectFailure>>,
}

/// Read-side seam the HTTP layer depends on
#[async_trait]
pub trait ClaimSource: Send + Sync {
    /// Every raw claim document in the store
    async fn fetch_all_claims(&self) -> Result<Vec<Document>, StoreError>;

    /// Whether a connection is currently held
    async fn is_connected(&self) -> bool;
}

/// Lazily connected claim store client
pub struct ClaimStore<T: ClaimTransport> {
    transport: T,
    secrets: Arc<dyn SecretSource>,
    config: StoreConfig,
    link: RwLock<Link<T::Handle>>,
    /// Serializes state transitions
    transitions: Mutex<Transitions>,
    /// Connect attempts that have run to completion, written under `transitions`
    settled: AtomicU64,
    shutdown: ShutdownSignal,
}

impl<T: ClaimTransport> ClaimStore<T> {
    pub fn new(transport: T, secrets: Arc<dyn SecretSource>, config: StoreConfig) -> Self {
        Self {
            transport,
            secrets,
            config,
            link: RwLock::new(Link::Disconnected),
            transitions: Mutex::new(Transitions::default()),
            settled: AtomicU64::new(0),
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Abort retry loops once `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.config.namespace
    }

    pub async fn state(&self) -> ConnectionState {
        match *self.link.read().await {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connected { .. } => ConnectionState::Connected,
        }
    }

    async fn current(&self) -> Option<(T::Handle, u64)> {
        match &*self.link.read().await {
            Link::Connected { handle, generation } => Some((handle.clone(), *generation)),
            Link::Disconnected => None,
        }
    }

    /// Establish the connection if there is none. No-op when connected.
    ///
    /// A caller that queued while another caller's attempt was in flight gets
    /// that attempt's outcome rather than making a new one.
    pub async fn connect(&self) -> Result<(), StoreError> {
        if self.current().await.is_some() {
            return Ok(());
        }

        let ticket = self.settled.load(Ordering::Acquire);
        let mut transitions = self.transitions.lock().await;
        if self.current().await.is_some() {
            debug!("Connection established by a concurrent caller");
            return Ok(());
        }
        if self.settled.load(Ordering::Acquire) != ticket {
            if let Some(failure) = &transitions.last_failure {
                debug!(error = %failure, "Concurrent connect attempt failed, sharing its outcome");
                return Err(StoreError::ConnectionUnavailable(Arc::clone(failure)));
            }
        }

        let outcome = self.establish().await;
        self.settled.fetch_add(1, Ordering::AcqRel);

        let handle = match outcome {
            Ok(handle) => handle,
            Err(failure) => {
                let failure = Arc::new(failure);
                transitions.last_failure = Some(Arc::clone(&failure));
                return Err(StoreError::ConnectionUnavailable(failure));
            }
        };

        transitions.last_failure = None;
        transitions.generation += 1;
        let generation = transitions.generation;
        *self.link.write().await = Link::Connected { handle, generation };

        info!(
            namespace = %self.config.namespace,
            generation,
            secrets = self.secrets.name(),
            "Claim store connected"
        );
        Ok(())
    }

    /// One connect attempt: secret lookup, then transport connect, each retried
    async fn establish(&self) -> Result<T::Handle, ConnectFailure> {
        let retry = &self.config.retry;
        let secret_name = self.config.connection_secret.as_str();

        let connection_string = retry
            .run_until("secret lookup", &self.shutdown, || {
                self.secrets.get_secret(secret_name)
            })
            .await
            .map_err(ConnectFailure::from)?;

        let handle = retry
            .run_until("store connect", &self.shutdown, || {
                self.transport.connect(&connection_string)
            })
            .await?;

        Ok(handle)
    }

    /// Fetch every claim document, connecting first if needed.
    ///
    /// A failed query leaves the connection in place unless the transport
    /// reports it dead, in which case the next call reconnects.
    pub async fn fetch_all_claims(&self) -> Result<Vec<Document>, StoreError> {
        self.connect().await?;

        let (handle, generation) = self.current().await.ok_or(ConnectFailure::Closed)?;
        let namespace = &self.config.namespace;

        let result = self
            .config
            .retry
            .run_until("claim query", &self.shutdown, || {
                self.transport.query_all(&handle, namespace)
            })
            .await;

        match result {
            Ok(documents) => {
                debug!(count = documents.len(), generation, "Fetched claim documents");
                Ok(documents)
            }
            Err(err) => {
                if err.last_error().is_some_and(TransportError::is_connection_lost) {
                    warn!(generation, error = %err, "Connection reported dead, resetting");
                    self.reset(generation).await;
                }
                Err(StoreError::FetchFailed(err))
            }
        }
    }

    /// Drop the connection of `generation` if it is still the current one
    async fn reset(&self, generation: u64) {
        let _transition = self.transitions.lock().await;
        let stale = {
            let mut link = self.link.write().await;
            let is_current = matches!(
                &*link,
                Link::Connected { generation: current, .. } if *current == generation
            );
            if !is_current {
                return;
            }
            std::mem::replace(&mut *link, Link::Disconnected)
        };

        if let Link::Connected { handle, .. } = stale {
            if let Err(e) = self.transport.close(handle).await {
                debug!(error = %e, "Closing dead connection failed");
            }
        }
    }

    /// Release the connection. Idempotent; failures are logged, never returned.
    pub async fn close(&self) {
        let _transition = self.transitions.lock().await;
        let previous = std::mem::replace(&mut *self.link.write().await, Link::Disconnected);

        let Link::Connected { handle, generation } = previous else {
            debug!("Claim store already disconnected");
            return;
        };

        // Shutdown has usually fired by now, so this ignores the signal
        match self
            .config
            .retry
            .run("store close", || self.transport.close(handle.clone()))
            .await
        {
            Ok(()) => info!(generation, "Claim store connection released"),
            Err(e) => warn!(generation, error = %e, "Failed to release claim store connection"),
        }
    }
}

#[async_trait]
impl<T: ClaimTransport> ClaimSource for ClaimStore<T> {
    async fn fetch_all_claims(&self) -> Result<Vec<Document>, StoreError> {
        ClaimStore::fetch_all_claims(self).await
    }

    async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use bson::doc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeTransport {
        connects: AtomicU32,
        queries: AtomicU32,
        closes: AtomicU32,
        /// Fail this many connects before succeeding
        connect_failures: AtomicU32,
        connect_delay: Duration,
        query_error: std::sync::Mutex<Option<TransportError>>,
    }

    impl FakeTransport {
        fn fail_queries_with(&self, err: Option<TransportError>) {
            *self.query_error.lock().unwrap() = err;
        }
    }

    #[async_trait]
    impl ClaimTransport for FakeTransport {
        type Handle = u32;

        async fn connect(&self, connection_string: &str) -> Result<u32, TransportError> {
            assert_eq!(connection_string, "mongodb://fake");
            let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.connect_delay).await;

            let remaining = self.connect_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.connect_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("refused".into()));
            }
            Ok(id)
        }

        async fn query_all(
            &self,
            handle: &u32,
            namespace: &Namespace,
        ) -> Result<Vec<Document>, TransportError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.query_error.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(vec![
                doc! { "connection": *handle as i64, "ns": namespace.to_string() },
                doc! { "connection": *handle as i64, "ns": namespace.to_string() },
            ])
        }

        async fn close(&self, _handle: u32) -> Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedSecret(Option<&'static str>);

    #[async_trait]
    impl SecretSource for FixedSecret {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| SecretError::NotFound(name.to_string()))
        }
    }

    fn store_with(transport: FakeTransport, secret: Option<&'static str>) -> ClaimStore<FakeTransport> {
        ClaimStore::new(
            transport,
            Arc::new(FixedSecret(secret)),
            StoreConfig {
                connection_secret: "DB_URI".to_string(),
                namespace: Namespace::new("Foamcaster-V2", "Base Presence Claims"),
                retry: RetryPolicy::immediate(3),
            },
        )
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));
        assert_eq!(store.state().await, ConnectionState::Disconnected);
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let transport = FakeTransport {
            connect_delay: Duration::from_millis(30),
            ..Default::default()
        };
        let store = Arc::new(store_with(transport, Some("mongodb://fake")));

        let callers = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.connect().await })
        });
        for result in futures_util::future::join_all(callers).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(store.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_failure() {
        let transport = FakeTransport {
            connect_delay: Duration::from_millis(30),
            ..Default::default()
        };
        transport.connect_failures.store(u32::MAX, Ordering::SeqCst);
        let store = Arc::new(store_with(transport, Some("mongodb://fake")));

        let callers = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.connect().await })
        });
        let results = futures_util::future::join_all(callers).await;

        // One attempt of three tries; the other seven callers take its error
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 3);
        for result in results {
            let err = result.unwrap().unwrap_err();
            assert!(matches!(
                err.connect_failure(),
                Some(ConnectFailure::Transport(RetryError::Exhausted { attempts: 3, .. }))
            ));
        }
        assert_eq!(store.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_after_shared_failure_tries_again() {
        let transport = FakeTransport::default();
        transport.connect_failures.store(3, Ordering::SeqCst);
        let store = store_with(transport, Some("mongodb://fake"));

        assert!(store.connect().await.is_err());
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 3);

        // A caller arriving after the failure settled makes a fresh attempt
        store.connect().await.unwrap();
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 4);
        assert_eq!(store.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_fetch_connects_lazily_and_reuses_connection() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));

        let first = store.fetch_all_claims().await.unwrap();
        let second = store.fetch_all_claims().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(first[0].get_str("ns").unwrap(), "Foamcaster-V2.Base Presence Claims");
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(store.transport.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_retries_transient_failures() {
        let transport = FakeTransport::default();
        transport.connect_failures.store(2, Ordering::SeqCst);
        let store = store_with(transport, Some("mongodb://fake"));

        store.connect().await.unwrap();
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 3);
        assert_eq!(store.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_exhaustion_stays_disconnected() {
        let transport = FakeTransport::default();
        transport.connect_failures.store(10, Ordering::SeqCst);
        let store = store_with(transport, Some("mongodb://fake"));

        let err = store.connect().await.unwrap_err();
        assert!(matches!(
            err.connect_failure(),
            Some(ConnectFailure::Transport(RetryError::Exhausted { attempts: 3, .. }))
        ));
        assert_eq!(store.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_secret_never_touches_transport() {
        let store = store_with(FakeTransport::default(), None);

        let err = store.fetch_all_claims().await.unwrap_err();
        assert!(matches!(err.connect_failure(), Some(ConnectFailure::Credentials(_))));
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 0);
        assert_eq!(store.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_query_failure_keeps_connection() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));
        store
            .transport
            .fail_queries_with(Some(TransportError::Query("cursor killed".into())));

        let err = store.fetch_all_claims().await.unwrap_err();
        assert!(matches!(err, StoreError::FetchFailed(RetryError::Exhausted { .. })));
        assert_eq!(store.transport.queries.load(Ordering::SeqCst), 3);
        assert_eq!(store.state().await, ConnectionState::Connected);
        assert_eq!(store.transport.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dead_connection_resets_and_reconnects() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));
        store
            .transport
            .fail_queries_with(Some(TransportError::ConnectionLost("socket reset".into())));

        assert!(matches!(
            store.fetch_all_claims().await,
            Err(StoreError::FetchFailed(_))
        ));
        assert_eq!(store.state().await, ConnectionState::Disconnected);
        assert_eq!(store.transport.closes.load(Ordering::SeqCst), 1);

        store.transport.fail_queries_with(None);
        let documents = store.fetch_all_claims().await.unwrap();
        assert_eq!(store.transport.connects.load(Ordering::SeqCst), 2);
        assert_eq!(documents[0].get_i64("connection").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_reset_keeps_newer_connection() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));
        store.connect().await.unwrap();
        store.close().await;
        store.connect().await.unwrap();

        // Generation 1 is long gone; reporting it dead must not drop generation 2
        store.reset(1).await;
        assert_eq!(store.state().await, ConnectionState::Connected);
        assert_eq!(store.transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = store_with(FakeTransport::default(), Some("mongodb://fake"));

        store.close().await;
        assert_eq!(store.transport.closes.load(Ordering::SeqCst), 0);

        store.connect().await.unwrap();
        store.close().await;
        store.close().await;

        assert_eq!(store.transport.closes.load(Ordering::SeqCst), 1);
        assert_eq!(store.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_cancelled_connect_leaves_disconnected() {
        let (trigger, signal) = shutdown::channel();
        let transport = FakeTransport {
            connect_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let store = Arc::new(store_with(transport, Some("mongodb://fake")).with_shutdown(signal));

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let err = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("connect should abort promptly")
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err.connect_failure(),
            Some(ConnectFailure::Transport(RetryError::Cancelled { .. }))
        ));
        assert_eq!(store.state().await, ConnectionState::Disconnected);
    }
}
