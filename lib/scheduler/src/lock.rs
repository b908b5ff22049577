//! Distributed lock interface.
//!
//! A lock backend grants at most one live handle per key; handles carry an
//! opaque token so release and refresh only succeed for the current owner.
//! The in-memory implementation honors TTL expiry, so lease loss and
//! takeover are exercisable without an external backend.

use crate::error::LockError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use ulid::Ulid;

/// An acquired lease on a named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// The lock key.
    pub key: String,
    /// Opaque fencing token identifying this lease.
    pub token: String,
}

/// Mutual-exclusion interface with TTL leases.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Attempts to acquire the lock. Returns `None` when another owner
    /// holds a live lease.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>, LockError>;

    /// Releases a lease. Returns whether the handle was the current owner.
    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError>;

    /// Extends a lease. Returns `false` when the lease was lost.
    async fn refresh(&self, handle: &LockHandle, ttl: Duration) -> Result<bool, LockError> {
        let _ = (handle, ttl);
        Ok(false)
    }

    /// Whether this backend supports lease refresh.
    fn supports_refresh(&self) -> bool {
        false
    }
}

struct Lease {
    token: String,
    expires_at: Instant,
}

/// In-memory distributed lock with TTL expiry.
#[derive(Default)]
pub struct InMemoryDistributedLock {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryDistributedLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryDistributedLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>, LockError> {
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        if let Some(lease) = leases.get(key)
            && lease.expires_at > Instant::now()
        {
            return Ok(None);
        }
        let token = Ulid::new().to_string();
        leases.insert(
            key.to_string(),
            Lease {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(LockHandle {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        if leases
            .get(&handle.key)
            .is_some_and(|lease| lease.token == handle.token)
        {
            leases.remove(&handle.key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn refresh(&self, handle: &LockHandle, ttl: Duration) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().expect("lease lock poisoned");
        match leases.get_mut(&handle.key) {
            Some(lease) if lease.token == handle.token => {
                lease.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn supports_refresh(&self) -> bool {
        true
    }
}
