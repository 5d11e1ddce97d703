//! Line buffer pool for spool output
//!
//! Workers format every row into a `String` before writing it. Buffers are
//! drawn from a shared pool and returned when the guard drops, so a run with
//! millions of rows reuses a handful of allocations.

use super::ResourceGuard;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Metrics for pool usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Total number of buffers allocated
    pub total_created: usize,
    /// Total number of acquisitions
    pub total_acquisitions: usize,
    /// Number of acquisitions served by a returned buffer
    pub reuse_count: usize,
    /// Buffers currently idle in the pool
    pub available: usize,
}

#[derive(Debug)]
struct PoolInner {
    available: Mutex<Vec<String>>,
    max_idle: usize,
    initial_capacity: usize,
    created: AtomicUsize,
    acquisitions: AtomicUsize,
    reused: AtomicUsize,
}

/// Shared pool of reusable `String` buffers
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

/// A buffer on loan from a [`BufferPool`]; returned on drop
pub type PooledBuffer = ResourceGuard<String>;

impl BufferPool {
    /// Keep at most `max_idle` buffers, each allocated with `initial_capacity`
    pub fn new(max_idle: usize, initial_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                available: Mutex::new(Vec::with_capacity(max_idle)),
                max_idle,
                initial_capacity,
                created: AtomicUsize::new(0),
                acquisitions: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
            }),
        }
    }

    /// Borrow an empty buffer
    pub fn acquire(&self) -> PooledBuffer {
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        let reused = self
            .inner
            .available
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let buffer = match reused {
            Some(buffer) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                trace!("Allocated new line buffer");
                String::with_capacity(self.inner.initial_capacity)
            }
        };

        let pool = Arc::downgrade(&self.inner);
        ResourceGuard::new(buffer, move |mut buffer: String| {
            if let Some(pool) = pool.upgrade() {
                buffer.clear();
                let mut available = pool
                    .available
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if available.len() < pool.max_idle {
                    available.push(buffer);
                }
            }
        })
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            total_created: self.inner.created.load(Ordering::Relaxed),
            total_acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            reuse_count: self.inner.reused.load(Ordering::Relaxed),
            available: self
                .inner
                .available
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64, 512)
    }
}
