use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::Stream;

use crate::notify::types::SubscriptionId;

type CloseHook = Box<dyn FnOnce() + Send>;

/// Output stream of one subscription.
///
/// The stream ends after its subscription is removed by `unsubscribe`.
/// Dropping or closing it from the consumer side removes the subscription.
pub struct SubscriptionStream<T> {
    id: SubscriptionId,
    rx: UnboundedReceiver<T>,
    on_close: Option<CloseHook>,
}

impl<T> SubscriptionStream<T> {
    pub(crate) fn new(id: SubscriptionId, rx: UnboundedReceiver<T>, on_close: CloseHook) -> Self {
        Self {
            id,
            rx,
            on_close: Some(on_close),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Await the next update; `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next buffered update, if one is ready
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// End the subscription from the consumer side
    pub fn close(&mut self) {
        self.run_close_hook();
        self.rx.close();
    }

    fn run_close_hook(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl<T> Stream for SubscriptionStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for SubscriptionStream<T> {
    fn drop(&mut self) {
        self.run_close_hook();
    }
}

impl<T> fmt::Debug for SubscriptionStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionStream")
            .field("id", &self.id)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}
