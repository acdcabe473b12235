use anyhow::{anyhow, Context, Result};
use kstate_core::{EventKind, ListOptions, ListWatch, ObjectStore, StopHandle};
use tracing::{debug, info, trace, warn};

/// Drive `store` from `source`: one list into `replace`, then one watch into
/// `add`/`update`/`delete` until the stream ends or `stop` fires.
///
/// No relist and no backoff. A watch `Error` event ends the run with an error
/// so the caller can decide whether to start over.
pub async fn reflect(source: &dyn ListWatch, store: &dyn ObjectStore, stop: StopHandle) -> Result<()> {
    let list = source.list(&ListOptions { allow_bookmarks: true, ..Default::default() }).await.context("initial list")?;
    store.replace(&list.items, &list.resource_version).context("replacing store contents")?;
    info!(items = list.items.len(), rv = %list.resource_version, "store synced");

    let opts = ListOptions { resource_version: list.resource_version, allow_bookmarks: true, ..Default::default() };
    let mut watch = source.watch(&opts).await.context("opening watch")?;
    loop {
        let ev = tokio::select! {
            biased;
            _ = stop.stopped() => {
                watch.stop();
                debug!("reflector stopped");
                return Ok(());
            }
            ev = watch.recv() => ev,
        };
        let Some(ev) = ev else {
            debug!("watch closed");
            return Ok(());
        };
        let applied = match ev.kind {
            EventKind::Added => store.add(&ev.object),
            EventKind::Modified => store.update(&ev.object),
            EventKind::Deleted => store.delete(&ev.object),
            EventKind::Bookmark => {
                trace!(rv = ?ev.object.as_value().pointer("/metadata/resourceVersion"), "bookmark");
                Ok(())
            }
            EventKind::Error => return Err(anyhow!("watch error event: {}", ev.object.as_value())),
        };
        if let Err(e) = applied {
            warn!(kind = ?ev.kind, error = %e, "unable to apply watch event");
        }
    }
}
