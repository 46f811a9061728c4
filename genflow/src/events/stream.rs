//! Channel-backed progress delivery.
//!
//! The runner writes into a [`ChannelProgressSink`]; a transport drains the
//! paired [`ProgressStream`]. The channel is unbounded so emission never
//! blocks or drops, which keeps stage order intact.

use super::ProgressSink;
use crate::core::ProgressEvent;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Creates a connected sink/stream pair.
#[must_use]
pub fn progress_channel() -> (ChannelProgressSink, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelProgressSink { tx }, ProgressStream { rx, finished: false })
}

/// The producer half of a progress channel.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Returns true once the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::debug!(event_type = err.0.event_type(), "Progress consumer disconnected");
        }
    }
}

/// The consumer half of a progress channel.
///
/// Yields events in emission order and ends after the first terminal event
/// (`pipeline_complete` or `error`) or when the producer is dropped.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    finished: bool,
}

impl ProgressStream {
    /// Receives the next event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Drains the stream until it ends.
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }

    fn observe(&mut self, event: Option<&ProgressEvent>) {
        match event {
            Some(e) if e.is_terminal() => self.finished = true,
            None => self.finished = true,
            Some(_) => {}
        }
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(event) = &polled {
            self.observe(event.as_ref());
        }
        polled
    }
}
