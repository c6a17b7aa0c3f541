//! Turn event channel and cancellation signal
//!
//! A turn is streamed through a bounded single-consumer channel: the adapter
//! holds the [`TurnEventSender`], the caller consumes the [`TurnEventStream`].
//! Sends wait for capacity, so a slow consumer throttles the producer. Closing
//! or dropping the stream makes further sends fail and wakes
//! [`TurnEventSender::closed`], which is how adapters learn to stop.

use crate::types::TurnEvent;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Default channel capacity for turn events
pub const DEFAULT_TURN_BUFFER: usize = 16;

/// Stop reason of the `done` event emitted when a turn is aborted
pub const CANCELLED_STOP_REASON: &str = "cancelled";

/// The consumer closed or dropped the stream
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("turn event stream closed by consumer")]
pub struct StreamClosed;

/// Create a turn event channel with the given capacity (at least 1).
pub fn turn_channel(buffer: usize) -> (TurnEventSender, TurnEventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        TurnEventSender { tx },
        TurnEventStream {
            rx,
            finished: false,
        },
    )
}

/// Producer side of a turn event channel
#[derive(Debug, Clone)]
pub struct TurnEventSender {
    tx: mpsc::Sender<TurnEvent>,
}

impl TurnEventSender {
    /// Send one event, waiting for capacity.
    pub async fn send(&self, event: TurnEvent) -> Result<(), StreamClosed> {
        self.tx.send(event).await.map_err(|_| StreamClosed)
    }

    /// Resolves once the consumer closed or dropped the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a turn event channel
///
/// Yields at most one terminal event (`done` or `error`); after it the stream
/// is exhausted even if the producer keeps sending.
#[derive(Debug)]
pub struct TurnEventStream {
    rx: mpsc::Receiver<TurnEvent>,
    finished: bool,
}

impl TurnEventStream {
    /// Build an already-complete stream from a fixed event list.
    pub fn from_events(events: Vec<TurnEvent>) -> Self {
        let (tx, stream) = turn_channel(events.len());
        for event in events {
            // Capacity equals the event count, so this never fails.
            let _ = tx.tx.try_send(event);
        }
        stream
    }

    /// Stop consuming and tell the producer to stop.
    pub fn close(&mut self) {
        self.finished = true;
        self.rx.close();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Stream for TurnEventStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TurnEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.close();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Owner side of a turn cancellation signal
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation signal observed by a running turn
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the controller aborts. Never resolves if the controller
    /// is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Resolves once either the adapter's own signal or the caller's fires.
pub(crate) async fn aborted_either(own: &AbortSignal, caller: Option<&AbortSignal>) {
    match caller {
        Some(caller) => {
            tokio::select! {
                _ = own.aborted() => {}
                _ = caller.aborted() => {}
            }
        }
        None => own.aborted().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_stops_after_terminal_event() {
        let (tx, mut stream) = turn_channel(4);
        tx.send(TurnEvent::output("a")).await.unwrap();
        tx.send(TurnEvent::done()).await.unwrap();

        assert_eq!(stream.next().await, Some(TurnEvent::output("a")));
        assert_eq!(stream.next().await, Some(TurnEvent::done()));
        assert!(stream.is_finished());
        assert_eq!(stream.next().await, None);

        // The producer learns the consumer is gone.
        assert_eq!(tx.send(TurnEvent::output("late")).await, Err(StreamClosed));
    }

    #[tokio::test]
    async fn test_close_wakes_producer() {
        let (tx, mut stream) = turn_channel(1);
        let producer = tokio::spawn(async move {
            tx.closed().await;
            "stopped"
        });

        stream.close();
        assert_eq!(producer.await.unwrap(), "stopped");
    }

    #[tokio::test]
    async fn test_send_applies_backpressure() {
        let (tx, mut stream) = turn_channel(1);
        tx.send(TurnEvent::output("first")).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), tx.send(TurnEvent::output("second")))
                .await;
        assert!(blocked.is_err());

        assert_eq!(stream.next().await, Some(TurnEvent::output("first")));
        tx.send(TurnEvent::output("second")).await.unwrap();
        assert_eq!(stream.next().await, Some(TurnEvent::output("second")));
    }

    #[tokio::test]
    async fn test_from_events() {
        let stream = TurnEventStream::from_events(vec![
            TurnEvent::output("x"),
            TurnEvent::done(),
            TurnEvent::output("ignored"),
        ]);
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![TurnEvent::output("x"), TurnEvent::done()]);
    }

    #[tokio::test]
    async fn test_abort_signal() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.aborted().await }
        });
        controller.abort();

        waiter.await.unwrap();
        assert!(signal.is_aborted());
        assert!(controller.is_aborted());
    }
}
