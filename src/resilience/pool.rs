//! Bounded concurrency for library invocations.
//!
//! A slot is held for the whole retry loop of one dispatch and released when
//! the [`PoolSlot`] is dropped, whatever the outcome. The number of slots
//! out is an upper bound on library calls running at once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

/// Whether services share one pool or each gets their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    #[default]
    Global,
    PerService,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub size: usize,
    /// Zero means a single non-blocking attempt.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Available parallelism, or 4 when it cannot be determined.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub size: usize,
    pub available: usize,
    pub in_use: usize,
}

/// No slot became free within the acquire timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted {
    pub waited: Duration,
}

pub struct ConcurrencyPool {
    name: String,
    size: usize,
    acquire_timeout: Duration,
    slots: Arc<Semaphore>,
}

impl ConcurrencyPool {
    pub fn new(name: impl Into<String>, cfg: PoolConfig) -> Self {
        let size = cfg.size.max(1);
        Self {
            name: name.into(),
            size,
            acquire_timeout: cfg.acquire_timeout,
            slots: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait up to the acquire timeout for a free slot.
    pub async fn acquire(&self) -> Result<PoolSlot, PoolExhausted> {
        let started = Instant::now();
        let permit = if self.acquire_timeout.is_zero() {
            match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(p) => Some(p),
                Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
            }
        } else {
            tokio::time::timeout(self.acquire_timeout, Arc::clone(&self.slots).acquire_owned())
                .await
                .ok()
                .and_then(|r| r.ok())
        };
        match permit {
            Some(permit) => Ok(PoolSlot { _permit: permit }),
            None => {
                let waited = started.elapsed();
                debug!(
                    pool = self.name.as_str(),
                    size = self.size,
                    waited_ms = waited.as_millis() as u64,
                    "pool slot not available"
                );
                Err(PoolExhausted { waited })
            }
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let available = self.available();
        PoolSnapshot {
            name: self.name.clone(),
            size: self.size,
            available,
            in_use: self.size.saturating_sub(available),
        }
    }
}

/// An occupied slot; released on drop.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}
