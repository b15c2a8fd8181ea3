//! Host boundary
//!
//! Host callbacks are invoked from arbitrary worker threads. The host expects at
//! most one of its callbacks to run at a time, so every call goes through a
//! [`HostBridge`], which holds a reentrant lock for the duration of the call and
//! catches whatever the callback throws.

use crate::error::HostCallbackError;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use radar_core::Hash;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Receives callback failures caught at the boundary
pub type ErrorReporter = Arc<dyn Fn(&HostCallbackError) + Send + Sync>;

pub struct HostBridge {
    lock: ReentrantMutex<()>,
    reporter: ErrorReporter,
    invocations: AtomicU64,
    failures: AtomicU64,
}

/// Proof that the current thread holds the host lock
pub struct HostGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl HostBridge {
    /// Bridge that reports failures at error level
    pub fn new() -> Self {
        Self::with_reporter(|failure| error!("Host callback error: {}", failure))
    }

    pub fn with_reporter<F>(reporter: F) -> Self
    where
        F: Fn(&HostCallbackError) + Send + Sync + 'static,
    {
        Self {
            lock: ReentrantMutex::new(()),
            reporter: Arc::new(reporter),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Acquire the host lock for a scope. Nested acquisition on the same thread
    /// is allowed.
    pub fn enter(&self) -> HostGuard<'_> {
        HostGuard {
            _guard: self.lock.lock(),
        }
    }

    /// Run `f` inside the host boundary.
    ///
    /// Returns true when the callback completed normally. An `Err` or a panic is
    /// reported and swallowed; the lock is released on every path.
    pub fn invoke<F>(&self, callback: &'static str, f: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let _guard = self.enter();
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let failure = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => return true,
            Ok(Err(error)) => HostCallbackError::Failed { callback, error },
            Err(payload) => HostCallbackError::Panicked {
                callback,
                message: panic_message(payload.as_ref()),
            },
        };

        self.failures.fetch_add(1, Ordering::Relaxed);
        let reporter = &self.reporter;
        if panic::catch_unwind(AssertUnwindSafe(|| reporter(&failure))).is_err() {
            error!("Host error reporter panicked while reporting: {}", failure);
        }
        false
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBridge")
            .field("invocations", &self.invocations())
            .field("failures", &self.failures())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A host callback bound to the bridge it must be called through
pub struct HostFunction<A> {
    name: &'static str,
    callback: Arc<dyn Fn(A) -> anyhow::Result<()> + Send + Sync>,
    bridge: Arc<HostBridge>,
}

impl<A> HostFunction<A> {
    pub fn new<F>(name: &'static str, bridge: Arc<HostBridge>, callback: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name,
            callback: Arc::new(callback),
            bridge,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke through the bridge; false if the callback failed
    pub fn call(&self, args: A) -> bool {
        let callback = &self.callback;
        self.bridge.invoke(self.name, || callback(args))
    }
}

impl<A> Clone for HostFunction<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            callback: Arc::clone(&self.callback),
            bridge: Arc::clone(&self.bridge),
        }
    }
}

/// Host callback for newly seen transaction hashes
pub type OnNewTransaction = HostFunction<Hash>;

/// Host callback for the startup outcome; `None` means success
pub type OnStarted = HostFunction<Option<String>>;
