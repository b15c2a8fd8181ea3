//! Worker runtime shared by a monitor's pools

use crate::error::{RelayError, RelayResult};
use crate::logging::Logger;
use std::cell::{Cell, RefCell};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::dispatcher::DefaultGuard;

thread_local! {
    static LOG_GUARD: RefCell<Option<DefaultGuard>> = const { RefCell::new(None) };
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// A multi-threaded tokio runtime whose workers log through a [`Logger`]
pub struct WorkerPool {
    runtime: Runtime,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize, name: &str, logger: &Logger) -> RelayResult<Self> {
        if threads == 0 {
            return Err(RelayError::Config(
                "worker thread count must be greater than 0".to_string(),
            ));
        }

        let dispatch = logger.dispatch().clone();
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(format!("{}-worker", name))
            .enable_all()
            .on_thread_start(move || {
                let guard = tracing::dispatcher::set_default(&dispatch);
                LOG_GUARD.with(|slot| *slot.borrow_mut() = Some(guard));
                ON_WORKER.with(|flag| flag.set(true));
            })
            .on_thread_stop(|| {
                ON_WORKER.with(|flag| flag.set(false));
                LOG_GUARD.with(|slot| slot.borrow_mut().take());
            })
            .build()?;

        Ok(Self { runtime, threads })
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Whether the calling thread belongs to a `WorkerPool`
    pub fn on_worker_thread() -> bool {
        ON_WORKER.with(Cell::get)
    }

    /// Whether the calling thread is inside any tokio runtime context
    pub fn in_async_context() -> bool {
        Handle::try_current().is_ok()
    }

    /// Stop accepting work and join the worker threads, however long the
    /// running tasks take.
    ///
    /// Must not be called from inside a runtime.
    pub fn shutdown(self) {
        drop(self.runtime);
    }

    /// Stop without waiting; safe from any thread, including workers
    pub fn shutdown_background(self) {
        self.runtime.shutdown_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogSinks, Severity};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            WorkerPool::new(0, "test", &Logger::silent()),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn test_workers_log_through_logger() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = Logger::new(
            LogSinks::uniform(Arc::new(move |_: Severity, _: &str, message: &str| {
                sink.lock().push(message.to_string());
            })),
            Severity::Info,
        );

        let pool = WorkerPool::new(2, "test", &logger).unwrap();
        assert_eq!(pool.threads(), 2);
        assert!(!WorkerPool::on_worker_thread());

        let (tx, rx) = std::sync::mpsc::channel();
        pool.handle().spawn(async move {
            tracing::info!("hello from worker");
            let _ = tx.send(WorkerPool::on_worker_thread());
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        pool.shutdown();

        assert_eq!(*lines.lock(), vec!["hello from worker".to_string()]);
    }

    #[test]
    fn test_foreign_runtime_is_not_a_worker() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (worker, in_context) = runtime.block_on(async {
            (WorkerPool::on_worker_thread(), WorkerPool::in_async_context())
        });
        assert!(!worker);
        assert!(in_context);
        assert!(!WorkerPool::in_async_context());
    }

    #[test]
    fn test_shutdown_waits_for_running_task() {
        let pool = WorkerPool::new(1, "test", &Logger::silent()).unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let (entered, wait_entered) = std::sync::mpsc::channel();

        let flag = Arc::clone(&finished);
        pool.handle().spawn(async move {
            let _ = entered.send(());
            std::thread::sleep(Duration::from_millis(1500));
            flag.store(true, Ordering::SeqCst);
        });
        wait_entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let begun = Instant::now();
        pool.shutdown();
        assert!(finished.load(Ordering::SeqCst));
        assert!(begun.elapsed() >= Duration::from_millis(1000));
    }
}
