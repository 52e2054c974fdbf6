//! Generic connection pool capability.
//!
//! The gateway never constructs backend connections directly; adapters check
//! resources out of an injected pool and return them when the call finishes.
//! The trait is deliberately minimal, the pooling implementation lives
//! outside the core.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Pool<T: Send>: Send + Sync {
    /// Check a resource out. May suspend while the pool is exhausted.
    async fn get(&self) -> Result<T>;
    /// Return a resource to the pool.
    fn put(&self, resource: T);
}

/// Trivial pool over a cloneable resource (reqwest clients, tonic channels
/// and similar handle multiplexing internally, so a shared clone is a
/// legitimate pool).
pub struct SharedPool<T: Clone + Send + Sync> {
    resource: T,
}

impl<T: Clone + Send + Sync> SharedPool<T> {
    pub fn new(resource: T) -> Self {
        Self { resource }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Pool<T> for SharedPool<T> {
    async fn get(&self) -> Result<T> {
        Ok(self.resource.clone())
    }

    fn put(&self, _resource: T) {}
}
