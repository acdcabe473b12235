use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::WatchEvent;

/// Events are handed over one at a time; a producer blocks until the consumer
/// has taken the previous event.
const WATCH_CHANNEL_CAPACITY: usize = 1;

/// Cancellation for a watch and everything it was built on.
///
/// `stop()` fires once: the first caller stops every upstream handle and then
/// cancels the token; later or concurrent callers return immediately.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    token: CancellationToken,
    fired: AtomicBool,
    upstream: Vec<StopHandle>,
}

impl StopHandle {
    pub fn new() -> Self { Self::default() }

    /// Handle that also stops `upstream` when fired.
    pub fn with_upstream(upstream: Vec<StopHandle>) -> Self {
        Self { inner: Arc::new(StopInner { upstream, ..Default::default() }) }
    }

    pub fn stop(&self) {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        for up in &self.inner.upstream {
            up.stop();
        }
        self.inner.token.cancel();
    }

    pub fn is_stopped(&self) -> bool { self.inner.token.is_cancelled() }

    /// Resolves once `stop()` has been called.
    pub async fn stopped(&self) { self.inner.token.cancelled().await }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .field("upstream", &self.inner.upstream.len())
            .finish()
    }
}

/// Receiving end of a watch. Dropping it stops the watch.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
    stop: StopHandle,
}

/// Create the producer/consumer pair for a new watch.
pub fn watch_channel(stop: StopHandle) -> (mpsc::Sender<WatchEvent>, WatchStream) {
    let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    (tx, WatchStream { rx, stop })
}

impl WatchStream {
    /// Next event; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<WatchEvent> { self.rx.recv().await }

    pub fn stop(&self) { self.stop.stop() }

    pub fn stop_handle(&self) -> StopHandle { self.stop.clone() }
}

impl Drop for WatchStream {
    fn drop(&mut self) { self.stop.stop() }
}

impl futures::Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<WatchEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
