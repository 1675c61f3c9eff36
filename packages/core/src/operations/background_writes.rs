//! Background store writes with retry and drift reporting
//!
//! The sequence engine commits to the membership cache first and persists
//! relationship changes afterwards without making the caller wait. This module
//! owns that second half: every write is spawned on the tokio runtime, retried
//! according to the configured policy, and its outcome observed exactly once.
//!
//! # Failure Handling
//!
//! A write that still fails after its retries leaves the store behind the cache.
//! That drift is never returned to a caller; instead it is
//!
//! - logged with `tracing::warn!`
//! - counted in [`DriftStats::failed`]
//! - emitted as `SequenceEvent::PersistenceFailed`
//!
//! # Retry Behavior
//!
//! - **Retry on**: any error except `StoreError::NodeNotFound`, which will not heal
//! - **Backoff**: exponential from the base delay (10ms, 20ms, 40ms, ... by default)
//! - **Timeout**: optional, applied to each attempt separately
//!
//! # Ordering
//!
//! Writes for the same sequence reach the store in dispatch order: each sequence
//! with pending writes has one worker task draining a FIFO queue. A remove
//! followed by a re-add of the same member therefore cannot be reordered.
//! Different sequences are written concurrently.

use crate::config::SequenceConfig;
use crate::db::{EventSink, GraphStore, SequenceEvent, StoreError};
use crate::models::{MemberIndex, SequenceKey, IL_SEQUENCE_INDEX, SEQUENCE_MEMBERSHIP};
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, Notify};
use tokio::time::Duration;

/// A store mutation queued behind a cache commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    /// Link one member, tagged with its index
    AddRelation {
        key: SequenceKey,
        member_id: String,
        index: MemberIndex,
    },
    /// Unlink one member
    DeleteRelation { key: SequenceKey, member_id: String },
    /// Link the initial members of a new sequence, tagged by position
    CreateCollection {
        key: SequenceKey,
        members: Vec<String>,
    },
    /// Delete the sequence node and its relationships
    DeleteCollection { key: SequenceKey },
}

impl StoreWrite {
    pub fn key(&self) -> &SequenceKey {
        match self {
            StoreWrite::AddRelation { key, .. }
            | StoreWrite::DeleteRelation { key, .. }
            | StoreWrite::CreateCollection { key, .. }
            | StoreWrite::DeleteCollection { key } => key,
        }
    }

    /// Name of the `GraphStore` call this write performs
    pub fn operation(&self) -> &'static str {
        match self {
            StoreWrite::AddRelation { .. } => "add_relation",
            StoreWrite::DeleteRelation { .. } => "delete_relation",
            StoreWrite::CreateCollection { .. } => "create_collection",
            StoreWrite::DeleteCollection { .. } => "delete_collection",
        }
    }

    async fn apply(&self, store: &dyn GraphStore) -> Result<()> {
        match self {
            StoreWrite::AddRelation {
                key,
                member_id,
                index,
            } => {
                let mut metadata = Map::new();
                metadata.insert(IL_SEQUENCE_INDEX.to_string(), Value::from(*index));
                store
                    .add_relation(
                        &key.graph_id,
                        &key.sequence_id,
                        SEQUENCE_MEMBERSHIP,
                        member_id,
                        metadata,
                    )
                    .await
            }
            StoreWrite::DeleteRelation { key, member_id } => {
                store
                    .delete_relation(
                        &key.graph_id,
                        &key.sequence_id,
                        SEQUENCE_MEMBERSHIP,
                        member_id,
                    )
                    .await
            }
            StoreWrite::CreateCollection { key, members } => {
                store
                    .create_collection(
                        &key.graph_id,
                        &key.sequence_id,
                        SEQUENCE_MEMBERSHIP,
                        IL_SEQUENCE_INDEX,
                        members.clone(),
                    )
                    .await
            }
            StoreWrite::DeleteCollection { key } => {
                store
                    .delete_collection(&key.graph_id, &key.sequence_id)
                    .await
            }
        }
    }
}

/// Longest delay between two attempts of one write
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Retry and timeout policy for background writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub retries: usize,
    pub retry_base: Duration,
    pub timeout: Option<Duration>,
}

impl WritePolicy {
    pub fn from_config(config: &SequenceConfig) -> Self {
        Self {
            retries: config.write_retries,
            retry_base: config.write_retry_base(),
            timeout: config.write_timeout(),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        // 2^attempt, capped so neither the shift nor the multiplication can overflow
        self.retry_base
            .checked_mul(1u32 << attempt.min(16) as u32)
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self::from_config(&SequenceConfig::default())
    }
}

/// Counters describing background write outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftStats {
    pub dispatched: u64,
    pub succeeded: u64,
    /// Writes abandoned after all attempts; each one is cache/store drift
    pub failed: u64,
    /// Extra attempts made across all writes
    pub retried: u64,
    /// Writes not yet finished
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct WriterState {
    in_flight: AtomicUsize,
    idle: Notify,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Decrements the in-flight count even if the write task panics
struct InFlightGuard(Arc<WriterState>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs once a write has finished, with `true` if it succeeded
type CompletionHook = Box<dyn FnOnce(bool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct QueuedWrite {
    write: StoreWrite,
    on_complete: Option<CompletionHook>,
    guard: InFlightGuard,
}

type Queues = Mutex<HashMap<SequenceKey, mpsc::UnboundedSender<QueuedWrite>>>;

fn lock_queues(queues: &Queues) -> MutexGuard<'_, HashMap<SequenceKey, mpsc::UnboundedSender<QueuedWrite>>> {
    // The map holds no invariant a panicking holder could break
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies store writes off the caller's path and tracks their outcome
///
/// Writes for one sequence are applied one at a time in dispatch order by a
/// worker task that exists only while that sequence has writes queued. Writes
/// for different sequences run concurrently.
#[derive(Clone)]
pub struct BackgroundWriter {
    store: Arc<dyn GraphStore>,
    events: Arc<dyn EventSink>,
    policy: WritePolicy,
    state: Arc<WriterState>,
    queues: Arc<Queues>,
}

impl BackgroundWriter {
    pub fn new(store: Arc<dyn GraphStore>, events: Arc<dyn EventSink>, policy: WritePolicy) -> Self {
        Self {
            store,
            events,
            policy,
            state: Arc::new(WriterState::default()),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue `write` behind earlier writes for the same sequence and return immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, write: StoreWrite) {
        self.enqueue(write, None);
    }

    /// Like [`dispatch`](Self::dispatch), then run `on_complete` with the outcome
    ///
    /// The hook finishes before the write stops counting as in flight, so
    /// `wait_idle` also waits for it.
    pub fn dispatch_then<F, Fut>(&self, write: StoreWrite, on_complete: F)
    where
        F: FnOnce(bool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: CompletionHook = Box::new(move |succeeded| Box::pin(on_complete(succeeded)));
        self.enqueue(write, Some(hook));
    }

    fn enqueue(&self, write: StoreWrite, on_complete: Option<CompletionHook>) {
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        self.state.dispatched.fetch_add(1, Ordering::AcqRel);

        let key = write.key().clone();
        let mut item = QueuedWrite {
            write,
            on_complete,
            guard: InFlightGuard(Arc::clone(&self.state)),
        };

        let mut queues = lock_queues(&self.queues);
        if let Some(sender) = queues.get(&key) {
            match sender.send(item) {
                Ok(()) => return,
                // The worker died mid-write; start a fresh one
                Err(mpsc::error::SendError(returned)) => item = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        // A fresh receiver cannot be closed yet
        let _ = sender.send(item);
        queues.insert(key.clone(), sender);
        drop(queues);

        tokio::spawn(self.clone().drain(key, receiver));
    }

    /// Apply queued writes for `key` until its queue is empty, then retire
    async fn drain(self, key: SequenceKey, mut receiver: mpsc::UnboundedReceiver<QueuedWrite>) {
        // Held until the queue is checked again, so `wait_idle` cannot return
        // while this worker is still registered
        let mut finished: Option<InFlightGuard> = None;
        loop {
            let next = {
                // Emptiness is decided under the map lock, so `enqueue` either
                // reaches this worker or starts a new one
                let mut queues = lock_queues(&self.queues);
                match receiver.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => {
                        queues.remove(&key);
                        None
                    }
                }
            };

            drop(finished.take());

            match next {
                Some(item) => finished = Some(self.run(item).await),
                None => return,
            }
        }
    }

    async fn run(&self, item: QueuedWrite) -> InFlightGuard {
        let QueuedWrite {
            write,
            on_complete,
            guard,
        } = item;

        let outcome = write_with_retry(self.store.as_ref(), &write, self.policy, &self.state).await;
        let succeeded = match outcome {
            Ok(()) => {
                self.state.succeeded.fetch_add(1, Ordering::AcqRel);
                tracing::debug!(
                    sequence = %write.key(),
                    operation = write.operation(),
                    "Background store write completed"
                );
                true
            }
            Err(e) => {
                self.state.failed.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(
                    sequence = %write.key(),
                    operation = write.operation(),
                    "Background store write failed, cache and store have drifted: {:#}",
                    e
                );
                let key = write.key();
                self.events.emit(SequenceEvent::PersistenceFailed {
                    graph_id: key.graph_id.clone(),
                    sequence_id: key.sequence_id.clone(),
                    operation: write.operation().to_string(),
                    error: format!("{:#}", e),
                });
                false
            }
        };

        if let Some(hook) = on_complete {
            hook(succeeded).await;
        }
        guard
    }

    /// Wait until every dispatched write has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed
            notified.as_mut().enable();
            if self.state.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> DriftStats {
        DriftStats {
            dispatched: self.state.dispatched.load(Ordering::Acquire),
            succeeded: self.state.succeeded.load(Ordering::Acquire),
            failed: self.state.failed.load(Ordering::Acquire),
            retried: self.state.retried.load(Ordering::Acquire),
            in_flight: self.state.in_flight.load(Ordering::Acquire),
        }
    }

    /// Number of sequences with a live write worker
    #[cfg(test)]
    fn active_queues(&self) -> usize {
        lock_queues(&self.queues).len()
    }
}

async fn write_with_retry(
    store: &dyn GraphStore,
    write: &StoreWrite,
    policy: WritePolicy,
    state: &WriterState,
) -> Result<()> {
    let mut attempt = 0;

    loop {
        let result = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, write.apply(store)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::unavailable(format!(
                    "{} timed out after {:?}",
                    write.operation(),
                    limit
                ))
                .into()),
            },
            None => write.apply(store).await,
        };

        match result {
            Ok(()) => {
                if attempt > 0 {
                    tracing::debug!(
                        "{} succeeded after {} retry(ies) for sequence '{}'",
                        write.operation(),
                        attempt,
                        write.key()
                    );
                }
                return Ok(());
            }
            Err(e) if attempt < policy.retries && is_retriable(&e) => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    "{} failed for sequence '{}' (attempt {}), retrying in {:?}: {:#}",
                    write.operation(),
                    write.key(),
                    attempt + 1,
                    delay,
                    e
                );
                state.retried.fetch_add(1, Ordering::AcqRel);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retriable(err: &anyhow::Error) -> bool {
    !matches!(StoreError::find_in(err), Some(StoreError::NodeNotFound { .. }))
}
