use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::{task, time};
use tracing::{debug, info, warn};

use mnemo_backends::{BackendAdapter, BackendError, BackendResult};
use mnemo_crypto::{signed_record, verify_signature};
use mnemo_ledger::{FileBlockLog, IntegrityLedger, VerifyReport};
use mnemo_types::{validate_key, validate_kind, MemoryRecord};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::outcome::{PersistResult, Recalled, StoreStats, WriteOutcome};

/// Ledger verification summary returned by [`MemoryStore::verify_integrity`].
pub type IntegrityReport = VerifyReport;

/// Default per-backend budget for one call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default cap on backend calls one `persist` runs at once, and on calls a
/// single backend may have in flight.
pub const DEFAULT_MAX_PARALLEL_WRITES: usize = 8;

struct Registered {
    adapter: Arc<dyn BackendAdapter>,
    /// Calls this backend may have running, abandoned ones included.
    slots: Arc<Semaphore>,
    acks: AtomicU64,
    failures: AtomicU64,
}

impl Registered {
    fn new(adapter: Arc<dyn BackendAdapter>, slots: usize) -> Self {
        Self {
            adapter,
            slots: Arc::new(Semaphore::new(slots)),
            acks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Run `call` against this backend within `budget`.
    async fn call<T, F>(&self, budget: Duration, call: F) -> Call<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BackendAdapter) -> BackendResult<T> + Send + 'static,
    {
        bounded_call(Arc::clone(&self.slots), budget, Arc::clone(&self.adapter), call).await
    }
}

/// How a single bounded backend call ended.
enum Call<T> {
    Done(T),
    Failed(BackendError),
    TimedOut,
    Panicked,
}

/// Run `call` against `adapter` on the blocking pool.
///
/// The call holds one of the backend's slots for as long as it runs. The
/// budget covers waiting for a slot and the call itself. On timeout the call
/// is abandoned, not cancelled: it keeps its slot until it returns, so a hung
/// backend runs out of slots and times out on its own without holding
/// anything the other backends need.
async fn bounded_call<T, F>(
    slots: Arc<Semaphore>,
    budget: Duration,
    adapter: Arc<dyn BackendAdapter>,
    call: F,
) -> Call<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn BackendAdapter) -> BackendResult<T> + Send + 'static,
{
    let run = async move {
        let slot = match slots.acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => return Call::Failed(BackendError::Unavailable("backend slots closed".into())),
        };
        let joined = task::spawn_blocking(move || {
            let _slot = slot;
            call(adapter.as_ref())
        })
        .await;
        match joined {
            Ok(Ok(value)) => Call::Done(value),
            Ok(Err(e)) => Call::Failed(e),
            Err(e) if e.is_panic() => Call::Panicked,
            Err(e) => Call::Failed(BackendError::Unavailable(e.to_string())),
        }
    };
    time::timeout(budget, run).await.unwrap_or(Call::TimedOut)
}

/// Write `record` to every backend and chain the attempt.
///
/// Runs as its own task so that the ledger append happens even if the
/// caller stops waiting.
async fn dispatch(
    backends: Arc<[Registered]>,
    ledger: Arc<IntegrityLedger>,
    workers: usize,
    budget: Duration,
    record: Arc<MemoryRecord>,
) -> StoreResult<PersistResult> {
    let key = record.key.as_str();
    let pool = Arc::new(Semaphore::new(workers));

    let handles: Vec<_> = (0..backends.len())
        .map(|i| {
            let backends = Arc::clone(&backends);
            let pool = Arc::clone(&pool);
            let record = Arc::clone(&record);
            tokio::spawn(async move {
                let Ok(_worker) = pool.acquire_owned().await else {
                    return Call::Failed(BackendError::Unavailable("worker pool closed".into()));
                };
                backends[i].call(budget, move |adapter| adapter.write(&record)).await
            })
        })
        .collect();

    let mut outcomes = BTreeMap::new();
    let mut acked_backends = BTreeSet::new();
    for (backend, handle) in backends.iter().zip(handles) {
        let name = backend.name();
        let outcome = match handle.await {
            Ok(Call::Done(())) => WriteOutcome::Acked,
            Ok(Call::Failed(e)) => WriteOutcome::Failed(e.to_string()),
            Ok(Call::TimedOut) => WriteOutcome::TimedOut,
            Ok(Call::Panicked) => WriteOutcome::Panicked,
            Err(e) if e.is_panic() => WriteOutcome::Panicked,
            Err(e) => WriteOutcome::Failed(e.to_string()),
        };

        match &outcome {
            WriteOutcome::Acked => {
                debug!(backend = name, key, "write acked");
                backend.acks.fetch_add(1, Ordering::Relaxed);
                acked_backends.insert(name.to_string());
            }
            WriteOutcome::Failed(reason) => {
                warn!(backend = name, key, %reason, "backend write failed");
                backend.failures.fetch_add(1, Ordering::Relaxed);
            }
            WriteOutcome::TimedOut => {
                warn!(backend = name, key, timeout_ms = budget.as_millis() as u64, "backend write timed out");
                backend.failures.fetch_add(1, Ordering::Relaxed);
            }
            WriteOutcome::Panicked => {
                warn!(backend = name, key, "backend panicked during write");
                backend.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcomes.insert(name.to_string(), outcome);
    }

    let ack_count = acked_backends.len() as u32;
    let signature = record.signature;
    let block = task::spawn_blocking(move || ledger.append_block(signature, ack_count >= 1, ack_count))
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
        .map_err(|e| {
            warn!(key, error = %e, "ledger append failed; attempt not recorded");
            StoreError::from(e)
        })?;

    let result = PersistResult {
        key: key.to_string(),
        signature,
        timestamp: record.timestamp,
        acked_backends,
        outcomes,
        ack_count,
        success: block.succeeded,
        block_index: block.index,
        chain_hash: block.hash,
    };

    if !result.success {
        warn!(key, block = block.index, "no backend acknowledged write");
        return Err(StoreError::NoBackendAvailable(Box::new(result)));
    }
    debug!(key, block = block.index, ack_count, "persisted");
    Ok(result)
}

/// Multi-backend memory store.
///
/// `persist` signs a value, writes it to every backend concurrently, and
/// records the attempt as one block in the [`IntegrityLedger`], whatever the
/// backends did. `recall` asks the backends one at a time in recall order
/// and returns the first hit whose signature verifies.
///
/// Backend calls run on tokio's blocking pool, each bounded by the backend
/// timeout. One `persist` runs at most `min(backends, max_parallel_writes)`
/// of them at once, and no backend has more than `max_parallel_writes` in
/// flight. Adapter errors, panics and timeouts never reach the caller; they
/// show up as per-backend [`WriteOutcome`]s or as a recall miss.
pub struct MemoryStore {
    /// In recall order.
    backends: Arc<[Registered]>,
    ledger: Arc<IntegrityLedger>,
    workers: usize,
    backend_timeout: Duration,
}

impl MemoryStore {
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Open the configured media and ledger under `config.data_dir`.
    ///
    /// The ledger tail and record count are recovered from the ledger file.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let mut builder = Self::builder()
            .backend_timeout(config.backend_timeout())
            .max_parallel_writes(config.max_parallel_writes);
        for kind in &config.backends {
            let adapter = kind.open(&config.data_dir).map_err(|source| StoreError::Backend {
                name: kind.name().into(),
                source,
            })?;
            builder = builder.backend_arc(adapter);
        }

        let log = FileBlockLog::open(&config.ledger_path(), config.ledger.sync_mode)?;
        let store = builder.ledger(IntegrityLedger::open(Box::new(log))?).build()?;
        info!(data_dir = %config.data_dir.display(), "memory store opened");
        Ok(store)
    }

    /// Sign `value`, write it to every backend, and chain the attempt.
    ///
    /// Returns `Ok` when at least one backend acknowledged the write and
    /// [`StoreError::NoBackendAvailable`] when none did; the ledger grows by
    /// one block either way. A ledger failure is returned as
    /// [`StoreError::Ledger`]. Invalid keys and types are rejected before
    /// anything is written or chained.
    ///
    /// Once validation passes the attempt runs to completion, ledger append
    /// included, even if the returned future is dropped.
    pub async fn persist(
        &self,
        kind: &str,
        key: &str,
        value: impl Into<Vec<u8>>,
    ) -> StoreResult<PersistResult> {
        validate_kind(kind)?;
        validate_key(key)?;
        let record = Arc::new(signed_record(kind, key, value.into()));

        tokio::spawn(dispatch(
            Arc::clone(&self.backends),
            Arc::clone(&self.ledger),
            self.workers,
            self.backend_timeout,
            record,
        ))
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }

    /// Latest value for `key`, or `None` if no backend has a verifiable copy.
    pub async fn recall(&self, key: &str) -> Option<Vec<u8>> {
        self.recall_record(key).await.map(|hit| hit.record.value)
    }

    /// Latest record for `key` and the backend that served it.
    ///
    /// Backends are tried in recall order. A read error, timeout, panic, or a
    /// record whose signature or key does not match counts as a miss for that
    /// backend and the next one is tried.
    pub async fn recall_record(&self, key: &str) -> Option<Recalled> {
        if validate_key(key).is_err() {
            return None;
        }

        for backend in self.backends.iter() {
            let name = backend.name();
            let wanted = key.to_string();
            let call = backend
                .call(self.backend_timeout, move |adapter| adapter.read(&wanted))
                .await;

            match call {
                Call::Done(Some(record)) if record.key != key => {
                    warn!(backend = name, key, found = %record.key, "backend returned a record for another key");
                }
                Call::Done(Some(record)) if !verify_signature(&record) => {
                    warn!(backend = name, key, "signature mismatch on recall; skipping backend");
                }
                Call::Done(Some(record)) => {
                    debug!(backend = name, key, "recall hit");
                    return Some(Recalled {
                        record,
                        backend: name.to_string(),
                    });
                }
                Call::Done(None) => debug!(backend = name, key, "recall miss"),
                Call::Failed(e) => warn!(backend = name, key, error = %e, "backend read failed"),
                Call::TimedOut => warn!(backend = name, key, "backend read timed out"),
                Call::Panicked => warn!(backend = name, key, "backend panicked during read"),
            }
        }

        debug!(key, "not found in any backend");
        None
    }

    /// Recompute the ledger chain up to its current length.
    pub async fn verify_integrity(&self) -> StoreResult<IntegrityReport> {
        let ledger = Arc::clone(&self.ledger);
        let report = task::spawn_blocking(move || ledger.verify_chain())
            .await
            .map_err(|e| StoreError::Runtime(e.to_string()))??;

        match report.first_divergent_index {
            Some(index) => warn!(index, checked = report.blocks_checked, "ledger diverges"),
            None => info!(checked = report.blocks_checked, "ledger verified"),
        }
        Ok(report)
    }

    /// Like [`verify_integrity`](Self::verify_integrity), but a divergence is
    /// an error. Returns the number of blocks checked.
    pub async fn ensure_integrity(&self) -> StoreResult<u64> {
        let report = self.verify_integrity().await?;
        match report.first_divergent_index {
            Some(index) => Err(StoreError::ChainVerification { index }),
            None => Ok(report.blocks_checked),
        }
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let (chain_length, total_records) = self.ledger.counts()?;
        let mut stats = StoreStats {
            total_records,
            chain_length,
            failed_attempts: chain_length - total_records,
            ..StoreStats::default()
        };
        for backend in self.backends.iter() {
            stats
                .per_backend_acks
                .insert(backend.name().to_string(), backend.acks.load(Ordering::Relaxed));
            stats
                .per_backend_failures
                .insert(backend.name().to_string(), backend.failures.load(Ordering::Relaxed));
        }
        Ok(stats)
    }

    /// Flush every backend and the ledger.
    ///
    /// Every flush is attempted; failures are logged and the first one is
    /// returned.
    pub async fn close(&self) -> StoreResult<()> {
        let mut first_err = None;

        for backend in self.backends.iter() {
            let name = backend.name();
            let call = backend.call(self.backend_timeout, |adapter| adapter.flush()).await;
            let source = match call {
                Call::Done(()) => continue,
                Call::Failed(e) => e,
                Call::TimedOut => BackendError::Unavailable("flush timed out".into()),
                Call::Panicked => BackendError::Unavailable("flush panicked".into()),
            };
            warn!(backend = name, error = %source, "backend flush failed");
            first_err.get_or_insert(StoreError::Backend {
                name: name.to_string(),
                source,
            });
        }

        let ledger = Arc::clone(&self.ledger);
        let flushed = task::spawn_blocking(move || ledger.flush())
            .await
            .map_err(|e| StoreError::Runtime(e.to_string()))?;
        if let Err(e) = flushed {
            warn!(error = %e, "ledger flush failed");
            first_err.get_or_insert(e.into());
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                info!(backends = self.backends.len(), "memory store closed");
                Ok(())
            }
        }
    }

    /// Backend names in recall order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(Registered::name).collect()
    }

    pub fn ledger(&self) -> &IntegrityLedger {
        &self.ledger
    }

    pub fn backend_timeout(&self) -> Duration {
        self.backend_timeout
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("backends", &self.backend_names())
            .field("workers", &self.workers)
            .field("backend_timeout", &self.backend_timeout)
            .field("ledger", &self.ledger)
            .finish()
    }
}

/// Builder for [`MemoryStore`].
///
/// Backends are written in registration order and recalled in registration
/// order unless [`recall_order`](Self::recall_order) names a different one.
/// Without an explicit ledger the store chains into memory.
pub struct MemoryStoreBuilder {
    backends: Vec<Arc<dyn BackendAdapter>>,
    recall_order: Option<Vec<String>>,
    backend_timeout: Duration,
    max_parallel_writes: usize,
    ledger: Option<IntegrityLedger>,
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            recall_order: None,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            max_parallel_writes: DEFAULT_MAX_PARALLEL_WRITES,
            ledger: None,
        }
    }
}

impl MemoryStoreBuilder {
    pub fn backend(self, adapter: impl BackendAdapter + 'static) -> Self {
        self.backend_arc(Arc::new(adapter))
    }

    /// Register a shared adapter. The caller may keep a handle to it.
    pub fn backend_arc(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.backends.push(adapter);
        self
    }

    /// Recall priority by backend name. Unlisted backends follow in
    /// registration order.
    pub fn recall_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recall_order = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn max_parallel_writes(mut self, max: usize) -> Self {
        self.max_parallel_writes = max;
        self
    }

    pub fn ledger(mut self, ledger: IntegrityLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> StoreResult<MemoryStore> {
        if self.backends.is_empty() {
            return Err(StoreError::NoBackends);
        }
        if self.max_parallel_writes == 0 {
            return Err(StoreError::Config("max_parallel_writes must be positive".into()));
        }
        if self.backend_timeout.is_zero() {
            return Err(StoreError::Config("backend timeout must be positive".into()));
        }

        let mut seen = HashSet::new();
        for adapter in &self.backends {
            if !seen.insert(adapter.name().to_string()) {
                return Err(StoreError::DuplicateBackend(adapter.name().to_string()));
            }
        }

        let mut remaining = self.backends;
        let mut ordered = Vec::with_capacity(remaining.len());
        for name in self.recall_order.unwrap_or_default() {
            let Some(pos) = remaining.iter().position(|a| a.name() == name) else {
                return Err(if seen.contains(&name) {
                    StoreError::DuplicateBackend(name)
                } else {
                    StoreError::UnknownBackend(name)
                });
            };
            ordered.push(remaining.remove(pos));
        }
        ordered.extend(remaining);

        let workers = ordered.len().min(self.max_parallel_writes);
        let slots = self.max_parallel_writes;
        let backends: Arc<[Registered]> = ordered
            .into_iter()
            .map(|adapter| Registered::new(adapter, slots))
            .collect();
        let ledger = self.ledger.unwrap_or_else(IntegrityLedger::in_memory);

        info!(
            backends = ?backends.iter().map(Registered::name).collect::<Vec<_>>(),
            workers,
            timeout_ms = self.backend_timeout.as_millis() as u64,
            "memory store ready"
        );
        Ok(MemoryStore {
            backends,
            ledger: Arc::new(ledger),
            workers,
            backend_timeout: self.backend_timeout,
        })
    }
}
