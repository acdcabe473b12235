//! kstate list+watch decorators.
//!
//! Each wrapper takes a [`SharedListWatch`] and is one itself, so a deployment
//! stacks them in whatever order it needs:
//! multi-namespace (with denylist) → instrumented → sharded.

#![forbid(unsafe_code)]

use kstate_core::{StopHandle, WatchEvent, WatchStream};
use tokio::sync::mpsc;

pub mod denylist;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod instrumented;
pub mod multi;
pub mod sharded;

pub use denylist::DenylistListWatch;
pub use instrumented::InstrumentedListWatch;
pub use multi::{is_all_namespaces, multi_namespace_list_watch, MultiListWatch};
pub use sharded::{record_sharding_metrics, ShardedListWatch};

/// Why a forwarding loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardEnd {
    /// Upstream closed its stream.
    Exhausted,
    /// Stop was requested.
    Stopped,
    /// Nobody is reading the output anymore.
    ConsumerGone,
}

/// Drain `upstream` into `tx`, skipping events `keep` rejects.
///
/// Both the receive and the send race against `stop`, so the loop never
/// outlives a stop request.
pub(crate) async fn forward<F>(
    mut upstream: WatchStream,
    tx: mpsc::Sender<WatchEvent>,
    stop: StopHandle,
    mut keep: F,
) -> ForwardEnd
where
    F: FnMut(&WatchEvent) -> bool,
{
    loop {
        let ev = tokio::select! {
            biased;
            _ = stop.stopped() => return ForwardEnd::Stopped,
            ev = upstream.recv() => match ev {
                Some(ev) => ev,
                None => return ForwardEnd::Exhausted,
            },
        };
        if !keep(&ev) {
            continue;
        }
        tokio::select! {
            biased;
            _ = stop.stopped() => return ForwardEnd::Stopped,
            sent = tx.send(ev) => {
                if sent.is_err() {
                    return ForwardEnd::ConsumerGone;
                }
            }
        }
    }
}

/// Wrap `upstream` in one coordinating task that forwards the events `keep`
/// accepts. Stopping the returned stream stops `upstream` too.
pub(crate) fn spawn_filter<F>(upstream: WatchStream, filter: &'static str, keep: F) -> WatchStream
where
    F: FnMut(&WatchEvent) -> bool + Send + 'static,
{
    let stop = StopHandle::with_upstream(vec![upstream.stop_handle()]);
    let (tx, out) = kstate_core::watch_channel(stop.clone());
    tokio::spawn(async move {
        let end = forward(upstream, tx, stop, keep).await;
        tracing::trace!(filter, ?end, "filter watch finished");
    });
    out
}
