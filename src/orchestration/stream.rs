//! Lazy, pull-driven event stream.
//!
//! The conversation runs inside a driver future that is only polled while
//! the consumer is asking for the next event. Events pass through a
//! one-slot channel, so the driver can never get more than one event
//! ahead of the consumer.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::events::{Event, EventSink};
use crate::session::SessionId;

type Driver = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The ordered events of one conversation.
///
/// Dropping the stream abandons the conversation: the driver and every
/// in-flight agent call are dropped and the session's cancellation token
/// fires.
pub struct EventStream {
    session_id: SessionId,
    rx: mpsc::Receiver<Event>,
    driver: Option<Driver>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl EventStream {
    pub(crate) fn new<F, Fut>(session_id: SessionId, cancel: CancellationToken, drive: F) -> Self
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        Self {
            session_id,
            rx,
            driver: Some(Box::pin(drive(EventSink::new(tx)))),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Token that cancels this conversation cooperatively.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the conversation. In-flight turns end as `cancelled` and the
    /// stream finishes with a terminal `error` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Pull the next event, driving the conversation until one is available.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.next().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        loop {
            if let Poll::Ready(event) = this.rx.poll_recv(cx) {
                return Poll::Ready(event);
            }
            let Some(driver) = this.driver.as_mut() else {
                return Poll::Ready(None);
            };
            match driver.as_mut().poll(cx) {
                // Dropping the driver closes the channel; drain what is left.
                Poll::Ready(()) => this.driver = None,
                // The driver may have queued an event before parking.
                Poll::Pending => return this.rx.poll_recv(cx),
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("session_id", &self.session_id)
            .field("running", &self.driver.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
