//! Per-application exclusive locks.
//!
//! All load balancer mutations of an application are serialized through its lock. Other
//! applications are never blocked. The backing mechanism is behind [`LockProvider`], so a
//! coordination-store lease can replace the local mutexes.

use async_trait::async_trait;
use dashmap::DashMap;
use lb_core::application::ApplicationId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard of an application lock. The lock is released when the guard is dropped.
pub struct ApplicationLock {
    application: ApplicationId,
    _guard: Box<dyn Send + Sync>,
}

impl ApplicationLock {
    /// Wraps whatever keeps the underlying lock held. Dropping `guard` must release it.
    pub fn new(application: ApplicationId, guard: impl Send + Sync + 'static) -> Self {
        ApplicationLock {
            application,
            _guard: Box::new(guard),
        }
    }

    pub fn application(&self) -> &ApplicationId {
        &self.application
    }
}

impl fmt::Debug for ApplicationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationLock")
            .field("application", &self.application)
            .finish()
    }
}

#[async_trait]
pub trait LockProvider: Send + Sync + 'static {
    /// Blocks until the exclusive lock of `application` is held.
    async fn lock(&self, application: &ApplicationId) -> ApplicationLock;
}

type LockMap = DashMap<ApplicationId, Arc<Mutex<()>>>;

/// LocalLocks holds one mutex per application, in process.
///
/// A mutex lives in the map only while some task holds or waits for it.
#[derive(Debug, Clone, Default)]
pub struct LocalLocks {
    locks: Arc<LockMap>,
}

/// Releases the mutex, then forgets it unless another task still holds a handle to it.
struct LocalGuard {
    locks: Arc<LockMap>,
    application: ApplicationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(&self.application, |_, mutex| {
            Arc::strong_count(mutex) == 1
        });
    }
}

impl LocalLocks {
    pub fn new() -> Self {
        LocalLocks::default()
    }
}

#[async_trait]
impl LockProvider for LocalLocks {
    async fn lock(&self, application: &ApplicationId) -> ApplicationLock {
        // Clone the mutex out of the map so no map shard stays locked while waiting
        let mutex = self
            .locks
            .entry(application.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard: OwnedMutexGuard<()> = mutex.lock_owned().await;
        ApplicationLock::new(
            application.clone(),
            LocalGuard {
                locks: Arc::clone(&self.locks),
                application: application.clone(),
                guard: Some(guard),
            },
        )
    }
}
