//! Reusable resources shared across workers

pub mod pool;

pub use pool::{BufferPool, PoolMetrics, PooledBuffer};

/// Guard that hands its resource to a cleanup function when dropped
pub struct ResourceGuard<T> {
    resource: Option<T>,
    cleanup: Option<Box<dyn FnOnce(T) + Send>>,
}

impl<T> ResourceGuard<T> {
    pub fn new<F>(resource: T, cleanup: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            resource: Some(resource),
            cleanup: Some(Box::new(cleanup)),
        }
    }
}

impl<T> Drop for ResourceGuard<T> {
    fn drop(&mut self) {
        if let (Some(resource), Some(cleanup)) = (self.resource.take(), self.cleanup.take()) {
            cleanup(resource);
        }
    }
}

impl<T> std::ops::Deref for ResourceGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self.resource.as_ref() {
            Some(resource) => resource,
            None => unreachable!("resource is only taken in drop"),
        }
    }
}

impl<T> std::ops::DerefMut for ResourceGuard<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.resource.as_mut() {
            Some(resource) => resource,
            None => unreachable!("resource is only taken in drop"),
        }
    }
}
