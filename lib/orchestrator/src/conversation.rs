//! Per-conversation serialization.
//!
//! Chatflow runs for one conversation must never overlap. Locally that is a
//! refcounted fair mutex per conversation id (tokio's mutex queues waiters
//! FIFO, preserving arrival order); entries are removed once the last
//! waiter drains. Across processes, an optional distributed lease with a
//! refresh task extends the guarantee.

use crate::error::OrchestratorError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard_scheduler::{DistributedLock, LockHandle};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

struct ChainEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Holders plus waiters; mutated only under the map lock.
    pending: AtomicUsize,
}

/// Map of per-conversation FIFO chains.
#[derive(Clone, Default)]
pub(crate) struct ConversationChains {
    entries: Arc<Mutex<HashMap<String, Arc<ChainEntry>>>>,
}

impl ConversationChains {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Joins the chain for a conversation and waits for its turn.
    pub(crate) async fn acquire(&self, conversation_id: &str) -> ChainGuard {
        let entry = {
            let mut entries = self.entries.lock().expect("chain map lock poisoned");
            let entry = entries
                .entry(conversation_id.to_string())
                .or_insert_with(|| {
                    Arc::new(ChainEntry {
                        lock: Arc::new(tokio::sync::Mutex::new(())),
                        pending: AtomicUsize::new(0),
                    })
                });
            entry.pending.fetch_add(1, Ordering::SeqCst);
            Arc::clone(entry)
        };

        let permit = Arc::clone(&entry.lock).lock_owned().await;
        ChainGuard {
            chains: Arc::clone(&self.entries),
            conversation_id: conversation_id.to_string(),
            entry,
            _permit: permit,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("chain map lock poisoned").len()
    }
}

/// Holds one turn on a conversation chain; dropping it passes the turn on
/// and removes the chain entry once no holder or waiter remains.
pub(crate) struct ChainGuard {
    chains: Arc<Mutex<HashMap<String, Arc<ChainEntry>>>>,
    conversation_id: String,
    entry: Arc<ChainEntry>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        let mut entries = self.chains.lock().expect("chain map lock poisoned");
        if self.entry.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            entries.remove(&self.conversation_id);
        }
    }
}

/// A held distributed conversation lease with its refresh task.
pub(crate) struct ConversationLease {
    lock: Arc<dyn DistributedLock>,
    handle: Option<LockHandle>,
    refresh_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConversationLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLease")
            .field("handle", &self.handle)
            .finish()
    }
}

impl ConversationLease {
    /// Acquires the lease, retrying up to `retry_count` total attempts.
    ///
    /// While held, a background task refreshes the lease every
    /// `refresh_interval`. A failed refresh is best-effort: the run
    /// proceeds under its stale lease, bounded by the TTL.
    pub(crate) async fn acquire(
        lock: Arc<dyn DistributedLock>,
        key: String,
        ttl: Duration,
        refresh_interval: Duration,
        retry_count: u32,
        retry_delay: Duration,
    ) -> Result<Self, OrchestratorError> {
        let attempts = retry_count.max(1);
        for attempt in 1..=attempts {
            match lock.acquire(&key, ttl).await {
                Ok(Some(handle)) => {
                    let refresh_task = if lock.supports_refresh()
                        && refresh_interval > Duration::ZERO
                    {
                        let lock = Arc::clone(&lock);
                        let handle = handle.clone();
                        Some(tokio::spawn(async move {
                            loop {
                                tokio::time::sleep(refresh_interval).await;
                                match lock.refresh(&handle, ttl).await {
                                    Ok(true) => {}
                                    Ok(false) | Err(_) => {
                                        tracing::warn!(
                                            key = %handle.key,
                                            "conversation lock refresh failed; continuing on stale lease"
                                        );
                                        return;
                                    }
                                }
                            }
                        }))
                    } else {
                        None
                    };
                    return Ok(Self {
                        lock,
                        handle: Some(handle),
                        refresh_task,
                    });
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key = %key, %error, "conversation lock acquire failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }
        Err(OrchestratorError::ConversationLockUnavailable {
            key,
            attempts,
        })
    }

    /// Stops refreshing and releases the lease.
    pub(crate) async fn release(mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        if let Some(handle) = self.handle.take() {
            let _ = self.lock.release(&handle).await;
        }
    }
}

impl Drop for ConversationLease {
    fn drop(&mut self) {
        // Release is async and must be called explicitly; this only stops
        // the refresh task so an abandoned lease expires by TTL.
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}
