//! Run event streams.
//!
//! Controllers publish every state change as an event. Observers call
//! `subscribe()` on a controller and receive an [`EventStream`], which
//! implements [`tokio_stream::Stream`] so it can be driven with
//! [`StreamExt`](tokio_stream::StreamExt) combinators.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use tokio_stream::StreamExt;
//!
//! use framecast::{ExtractionEvent, FfmpegOpener, FrameExtractor};
//!
//! # async fn example() -> Result<(), framecast::FramecastError> {
//! let extractor = FrameExtractor::new(FfmpegOpener::new());
//! let mut events = extractor.subscribe();
//!
//! let (outcome, ()) = tokio::join!(
//!     extractor.start(Some(Path::new("input.mp4")), 5.0),
//!     async {
//!         while let Some(event) = events.next().await {
//!             if let ExtractionEvent::Frame { index, .. } = event {
//!                 println!("captured frame {index}");
//!             }
//!             if matches!(event, ExtractionEvent::Finished { .. }) {
//!                 break;
//!             }
//!         }
//!     },
//! );
//! outcome?;
//! # Ok(())
//! # }
//! ```

use std::{
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{Context, Poll},
};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::Stream;

/// A stream of events from one controller.
///
/// Events are buffered without bound, so a slow observer never stalls the
/// run. The stream ends when the controller and all its clones are dropped.
#[derive(Debug)]
pub struct EventStream<E> {
    receiver: UnboundedReceiver<E>,
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<E> EventStream<E> {
    /// Take the next event if one is already buffered.
    pub fn try_next(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out of events to every live [`EventStream`].
pub(crate) struct Subscribers<E> {
    senders: Mutex<Vec<UnboundedSender<E>>>,
}

impl<E: Clone> Subscribers<E> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> EventStream<E> {
        let (sender, receiver) = unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        EventStream { receiver }
    }

    /// Deliver `event` to every subscriber, forgetting closed ones.
    pub(crate) fn emit(&self, event: E) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}
