//! One-shot subscription mailbox
//!
//! Every event source in this crate (new connections on a pool, inventory on a
//! connection) hands out events through a [`Subscriber`]. A subscription is a
//! single [`Handler`] that fires exactly once; callers re-subscribe to keep
//! listening. Events that arrive with no subscription pending wait in a bounded
//! backlog. Handlers always run as tasks on the runtime, never inline on the
//! caller's stack.

use crate::error::{NetworkError, NetworkResult, StopReason};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::runtime::Handle;
use tracing::warn;

/// One-shot completion callback
pub type Handler<T> = Box<dyn FnOnce(NetworkResult<T>) + Send + 'static>;

struct Mailbox<T> {
    pending: Option<Handler<T>>,
    backlog: VecDeque<T>,
    stopped: Option<StopReason>,
    subscriptions: u64,
}

pub struct Subscriber<T> {
    runtime: Handle,
    capacity: usize,
    mailbox: Mutex<Mailbox<T>>,
}

impl<T: Send + 'static> Subscriber<T> {
    pub fn new(runtime: Handle, capacity: usize) -> Self {
        Self {
            runtime,
            capacity: capacity.max(1),
            mailbox: Mutex::new(Mailbox {
                pending: None,
                backlog: VecDeque::new(),
                stopped: None,
                subscriptions: 0,
            }),
        }
    }

    /// Register a handler for the next event.
    ///
    /// A backlogged event is delivered immediately. Once the backlog is drained
    /// after [`stop`](Self::stop), the handler receives the stop error. A second subscription while one is already
    /// pending is refused with [`NetworkError::AlreadySubscribed`].
    pub fn subscribe(&self, handler: Handler<T>) {
        let result = {
            let mut mailbox = self.mailbox.lock();
            mailbox.subscriptions += 1;

            if mailbox.pending.is_some() {
                Err(NetworkError::AlreadySubscribed)
            } else if let Some(event) = mailbox.backlog.pop_front() {
                Ok(event)
            } else if let Some(reason) = mailbox.stopped {
                Err(NetworkError::from(reason))
            } else {
                mailbox.pending = Some(handler);
                return;
            }
        };

        self.dispatch(handler, result);
    }

    /// Hand an event to the pending subscription, or backlog it.
    ///
    /// Returns false if the source is stopped or the backlog is full.
    pub fn relay(&self, event: T) -> bool {
        let handler = {
            let mut mailbox = self.mailbox.lock();
            if mailbox.stopped.is_some() {
                return false;
            }

            match mailbox.pending.take() {
                Some(handler) => handler,
                None => {
                    if mailbox.backlog.len() >= self.capacity {
                        warn!(capacity = self.capacity, "Event backlog full, dropping event");
                        return false;
                    }
                    mailbox.backlog.push_back(event);
                    return true;
                }
            }
        };

        self.dispatch(handler, Ok(event));
        true
    }

    /// Report a non-fatal failure to the pending subscription, if any.
    ///
    /// Errors are not backlogged; with nobody listening the error is dropped and
    /// false is returned.
    pub fn notify_error(&self, error: NetworkError) -> bool {
        let handler = {
            let mut mailbox = self.mailbox.lock();
            if mailbox.stopped.is_some() {
                return false;
            }
            match mailbox.pending.take() {
                Some(handler) => handler,
                None => return false,
            }
        };

        self.dispatch(handler, Err(error));
        true
    }

    /// Stop the source. Events already backlogged are still handed out; after
    /// that every subscription receives the error for `reason`. Calling stop
    /// twice is a no-op.
    pub fn stop(&self, reason: StopReason) {
        let handler = {
            let mut mailbox = self.mailbox.lock();
            if mailbox.stopped.is_some() {
                return;
            }
            mailbox.stopped = Some(reason);
            mailbox.pending.take()
        };

        if let Some(handler) = handler {
            self.dispatch(handler, Err(NetworkError::from(reason)));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.mailbox.lock().stopped.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.mailbox.lock().pending.is_some()
    }

    /// Total number of subscribe calls seen
    pub fn subscription_count(&self) -> u64 {
        self.mailbox.lock().subscriptions
    }

    pub fn backlog_len(&self) -> usize {
        self.mailbox.lock().backlog.len()
    }

    fn dispatch(&self, handler: Handler<T>, result: NetworkResult<T>) {
        self.runtime.spawn(async move { handler(result) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn capture<T: Send + 'static>() -> (Handler<T>, oneshot::Receiver<NetworkResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let handler: Handler<T> = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_pending_subscription_receives_event() {
        let subscriber = Subscriber::new(Handle::current(), 4);
        let (handler, rx) = capture::<u32>();

        subscriber.subscribe(handler);
        assert!(subscriber.has_pending());
        assert!(subscriber.relay(7));

        assert_eq!(rx.await.unwrap().unwrap(), 7);
        assert!(!subscriber.has_pending());
    }

    #[tokio::test]
    async fn test_backlog_is_delivered_in_order() {
        let subscriber = Subscriber::new(Handle::current(), 4);
        subscriber.relay(1u32);
        subscriber.relay(2u32);
        assert_eq!(subscriber.backlog_len(), 2);

        let (first, rx1) = capture();
        subscriber.subscribe(first);
        let (second, rx2) = capture();
        subscriber.subscribe(second);

        assert_eq!(rx1.await.unwrap().unwrap(), 1);
        assert_eq!(rx2.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_full_backlog_drops_events() {
        let subscriber = Subscriber::new(Handle::current(), 1);
        assert!(subscriber.relay(1u32));
        assert!(!subscriber.relay(2u32));
        assert_eq!(subscriber.backlog_len(), 1);
    }

    #[tokio::test]
    async fn test_second_pending_subscription_is_refused() {
        let subscriber = Subscriber::<u32>::new(Handle::current(), 4);
        let (first, _rx1) = capture();
        let (second, rx2) = capture();

        subscriber.subscribe(first);
        subscriber.subscribe(second);

        let err = rx2.await.unwrap().unwrap_err();
        assert!(matches!(err, NetworkError::AlreadySubscribed));
        assert!(subscriber.has_pending());
    }

    #[tokio::test]
    async fn test_stop_fails_pending_and_later_subscriptions() {
        let subscriber = Subscriber::<u32>::new(Handle::current(), 4);
        let (pending, rx1) = capture();
        subscriber.subscribe(pending);

        subscriber.stop(StopReason::ChannelClosed);
        assert!(matches!(
            rx1.await.unwrap(),
            Err(NetworkError::ChannelStopped)
        ));

        let (late, rx2) = capture();
        subscriber.subscribe(late);
        assert!(matches!(
            rx2.await.unwrap(),
            Err(NetworkError::ChannelStopped)
        ));

        assert!(!subscriber.relay(3));
        assert_eq!(subscriber.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_errors_reach_only_pending_subscription() {
        let subscriber = Subscriber::<u32>::new(Handle::current(), 4);
        assert!(!subscriber.notify_error(NetworkError::Timeout));

        let (handler, rx) = capture();
        subscriber.subscribe(handler);
        assert!(subscriber.notify_error(NetworkError::Timeout));
        assert!(matches!(rx.await.unwrap(), Err(NetworkError::Timeout)));
        assert_eq!(subscriber.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_backlog_drains_before_stop_error() {
        let subscriber = Subscriber::new(Handle::current(), 4);
        subscriber.relay(5u32);
        subscriber.stop(StopReason::ChannelClosed);

        let (first, rx1) = capture();
        subscriber.subscribe(first);
        assert_eq!(rx1.await.unwrap().unwrap(), 5);

        let (second, rx2) = capture();
        subscriber.subscribe(second);
        assert!(matches!(
            rx2.await.unwrap(),
            Err(NetworkError::ChannelStopped)
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let subscriber = Subscriber::<u32>::new(Handle::current(), 4);
        subscriber.stop(StopReason::ServiceStopped);
        subscriber.stop(StopReason::ChannelClosed);

        let (handler, rx) = capture();
        subscriber.subscribe(handler);
        assert!(matches!(
            rx.await.unwrap(),
            Err(NetworkError::ServiceStopped)
        ));
    }
}
