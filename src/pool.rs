//! Pooled storage clients, one bounded pool per backend profile.
//!
//! Building a storage client means loading credentials and establishing
//! connections, so clients are built once and reused. The
//! [`ClientPoolRegistry`] is created at worker startup, shared by reference
//! with every job, and shut down when the worker exits.
//!
//! # Behaviour
//! - The first `acquire` for a profile eagerly builds `size` clients. The
//!   build runs at most once per profile even under concurrent first use; if
//!   it fails, nothing is registered and the next `acquire` tries again.
//! - Clients are handed out last-in-first-out. When every client is checked
//!   out, `acquire` waits (optionally bounded by a timeout).
//! - A [`PooledClient`] returns its client to the pool when dropped, so the
//!   client comes back on every exit path, including errors and
//!   cancellation.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::contract::{ClientFactory, StorageClient};
use crate::error::PoolError;

/// Clients built per profile unless configured otherwise.
pub const DEFAULT_POOL_SIZE: usize = 3;

struct ProfilePool {
    profile: String,
    idle: Mutex<Vec<Arc<dyn StorageClient>>>,
    available: Arc<Semaphore>,
}

impl ProfilePool {
    fn push(&self, client: Arc<dyn StorageClient>) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }

    fn pop(&self) -> Option<Arc<dyn StorageClient>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn idle_len(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type PoolCell = Arc<OnceCell<Arc<ProfilePool>>>;

/// Owns the per-profile client pools.
pub struct ClientPoolRegistry {
    factory: Arc<dyn ClientFactory>,
    size: usize,
    acquire_timeout: Option<Duration>,
    pools: Mutex<HashMap<String, PoolCell>>,
    closed: AtomicBool,
}

impl ClientPoolRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
            pools: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of clients built per profile (at least one).
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// Bound on how long `acquire` waits for a free client.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Check out a client for `profile`, building the pool on first use.
    pub async fn acquire(&self, profile: &str) -> Result<PooledClient, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed {
                profile: profile.to_string(),
            });
        }
        let pool = self.pool_for(profile).await?;

        let waiting = pool.available.clone().acquire_owned();
        let permit = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, waiting)
                .await
                .map_err(|_| PoolError::Timeout {
                    profile: profile.to_string(),
                    waited: limit,
                })?,
            None => waiting.await,
        }
        .map_err(|_| PoolError::Closed {
            profile: profile.to_string(),
        })?;

        // Each permit stands for one idle client, so the pop only comes up
        // empty once the pool has been drained by shutdown.
        let client = pool.pop().ok_or_else(|| PoolError::Closed {
            profile: profile.to_string(),
        })?;
        debug!(profile, idle = pool.idle_len(), "[POOL] Client checked out");

        Ok(PooledClient {
            client,
            pool,
            _permit: permit,
        })
    }

    /// Idle clients of an already built pool.
    pub fn idle_count(&self, profile: &str) -> Option<usize> {
        let cell = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(profile)
            .cloned()?;
        cell.get().map(|pool| pool.idle_len())
    }

    /// Close every pool. Waiting and future acquirers get [`PoolError::Closed`].
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let pools: Vec<PoolCell> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, cell)| cell)
            .collect();

        for cell in pools {
            if let Some(pool) = cell.get() {
                pool.available.close();
                pool.idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                info!(profile = %pool.profile, "[POOL] Client pool shut down");
            }
        }
    }

    async fn pool_for(&self, profile: &str) -> Result<Arc<ProfilePool>, PoolError> {
        let cell = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(profile.to_string())
            .or_default()
            .clone();

        let pool = cell.get_or_try_init(|| self.build_pool(profile)).await?;
        Ok(pool.clone())
    }

    async fn build_pool(&self, profile: &str) -> Result<Arc<ProfilePool>, PoolError> {
        let mut clients: Vec<Arc<dyn StorageClient>> = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            let client = self
                .factory
                .create(profile)
                .await
                .map_err(|source| PoolError::Construction {
                    profile: profile.to_string(),
                    source,
                })?;
            clients.push(Arc::from(client));
        }
        info!(profile, size = self.size, "[POOL] Built storage client pool");

        Ok(Arc::new(ProfilePool {
            profile: profile.to_string(),
            idle: Mutex::new(clients),
            available: Arc::new(Semaphore::new(self.size)),
        }))
    }
}

/// Exclusive use of one pooled client. Dropping it releases the client.
pub struct PooledClient {
    client: Arc<dyn StorageClient>,
    pool: Arc<ProfilePool>,
    // Dropped after `Drop::drop` has pushed the client back.
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    pub fn profile(&self) -> &str {
        &self.pool.profile
    }

    /// Return the client to its pool now rather than at end of scope.
    pub fn release(self) {}
}

impl Deref for PooledClient {
    type Target = dyn StorageClient;

    fn deref(&self) -> &Self::Target {
        &*self.client
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if !self.pool.available.is_closed() {
            self.pool.push(self.client.clone());
        }
        debug!(profile = %self.pool.profile, "[POOL] Client released");
    }
}
