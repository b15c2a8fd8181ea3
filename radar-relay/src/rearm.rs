//! Turning one-shot subscriptions into streams

use radar_network::{Handler, NetworkResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type SubscribeFn<T> = Box<dyn Fn(Handler<T>) + Send + Sync>;
type EventFn<T> = Box<dyn Fn(NetworkResult<T>) + Send + Sync>;

/// Re-issues a one-shot subscription after every delivery.
///
/// The business handler runs first; the subscription is re-armed only after it
/// returns. A connection-fatal error ends the chain. Nothing else does.
pub struct EventRearmer<T> {
    name: &'static str,
    subscribe: SubscribeFn<T>,
    on_event: EventFn<T>,
    deliveries: AtomicU64,
    arms: AtomicU64,
    finished: AtomicBool,
}

impl<T: Send + 'static> EventRearmer<T> {
    pub fn new<S, H>(name: &'static str, subscribe: S, on_event: H) -> Arc<Self>
    where
        S: Fn(Handler<T>) + Send + Sync + 'static,
        H: Fn(NetworkResult<T>) + Send + Sync + 'static,
    {
        Arc::new(Self {
            name,
            subscribe: Box::new(subscribe),
            on_event: Box::new(on_event),
            deliveries: AtomicU64::new(0),
            arms: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        })
    }

    /// Register the first subscription. The chain keeps itself alive from here.
    pub fn start(self: &Arc<Self>) {
        self.arm();
    }

    fn arm(self: &Arc<Self>) {
        self.arms.fetch_add(1, Ordering::SeqCst);
        let this = Arc::clone(self);
        (self.subscribe)(Box::new(move |result| this.deliver(result)));
    }

    fn deliver(self: &Arc<Self>, result: NetworkResult<T>) {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        let fatal = match &result {
            Err(e) if e.is_connection_fatal() => Some(e.to_string()),
            _ => None,
        };

        (self.on_event)(result);

        match fatal {
            Some(reason) => {
                self.finished.store(true, Ordering::SeqCst);
                debug!(chain = self.name, "Subscription chain ended: {}", reason);
            }
            None => self.arm(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of results handed to the business handler
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Number of subscriptions issued, including the first
    pub fn arms(&self) -> u64 {
        self.arms.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
