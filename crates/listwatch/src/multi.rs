//! One logical source over several per-namespace sources.
//!
//! `list` concatenates items in namespace order and joins the per-namespace
//! resource versions with `/`. `watch` splits such a composite version back
//! into per-namespace cursors and fans every namespace's stream into a single
//! output, one forwarding task per namespace.

use std::sync::Arc;

use async_trait::async_trait;
use kstate_core::{
    Error, ListOptions, ListWatch, ObjectList, Result, SharedListWatch, StopHandle, WatchStream, NAMESPACE_ALL,
    RESOURCE_VERSION_DELIMITER,
};
use tracing::{debug, trace, warn};

use crate::DenylistListWatch;

/// `namespaces` selects every namespace (the single "all" entry, or nothing).
pub fn is_all_namespaces(namespaces: &[String]) -> bool {
    match namespaces {
        [] => true,
        [only] => only == NAMESPACE_ALL,
        _ => false,
    }
}

/// Source for `allowed` namespaces built from a per-namespace `factory`.
///
/// `denied` only applies in all-namespaces mode; an explicit allow list
/// already names everything that is watched.
pub fn multi_namespace_list_watch<F>(allowed: &[String], denied: &[String], factory: F) -> SharedListWatch
where
    F: Fn(&str) -> SharedListWatch,
{
    if is_all_namespaces(allowed) {
        return DenylistListWatch::wrap(denied.iter().cloned(), factory(NAMESPACE_ALL));
    }
    if let [only] = allowed {
        return factory(only.as_str());
    }
    let sources = allowed.iter().map(|ns| (ns.clone(), factory(ns.as_str()))).collect();
    Arc::new(MultiListWatch::new(sources))
}

pub struct MultiListWatch {
    sources: Vec<(String, SharedListWatch)>,
}

impl MultiListWatch {
    /// `sources` pairs each namespace with its source, in the order composite
    /// resource versions use.
    pub fn new(sources: Vec<(String, SharedListWatch)>) -> Self { Self { sources } }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> { self.sources.iter().map(|(ns, _)| ns.as_str()) }
}

/// Per-source resume cursors for `resource_version`.
///
/// Empty means "from now" everywhere; a composite version must have exactly
/// one segment per source; a plain version (as carried by events after a
/// reconnect) applies to every source.
pub fn split_resource_version(resource_version: &str, sources: usize) -> Result<Vec<String>> {
    if resource_version.is_empty() {
        return Ok(vec![String::new(); sources]);
    }
    if resource_version.contains(RESOURCE_VERSION_DELIMITER) {
        let parts: Vec<String> = resource_version.split(RESOURCE_VERSION_DELIMITER).map(str::to_string).collect();
        if parts.len() != sources {
            return Err(Error::ResourceVersionMismatch { expected: sources, actual: parts.len() });
        }
        return Ok(parts);
    }
    Ok(vec![resource_version.to_string(); sources])
}

#[async_trait]
impl ListWatch for MultiListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let mut items = Vec::new();
        let mut versions = Vec::with_capacity(self.sources.len());
        for (ns, lw) in &self.sources {
            let list = lw.list(opts).await?;
            trace!(ns = %ns, count = list.items.len(), rv = %list.resource_version, "namespace listed");
            items.extend(list.items);
            versions.push(list.resource_version);
        }
        let resource_version = versions.join(RESOURCE_VERSION_DELIMITER);
        Ok(ObjectList { items, resource_version })
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        let versions = split_resource_version(&opts.resource_version, self.sources.len())?;

        let mut upstreams = Vec::with_capacity(self.sources.len());
        for ((ns, lw), rv) in self.sources.iter().zip(versions) {
            let o = ListOptions { resource_version: rv, ..opts.clone() };
            match lw.watch(&o).await {
                Ok(w) => upstreams.push((ns.clone(), w)),
                Err(e) => {
                    warn!(ns = %ns, error = %e, opened = upstreams.len(), "namespace watch failed");
                    for (_, w) in &upstreams {
                        w.stop();
                    }
                    return Err(e);
                }
            }
        }

        let stop = StopHandle::with_upstream(upstreams.iter().map(|(_, w)| w.stop_handle()).collect());
        let (tx, out) = kstate_core::watch_channel(stop.clone());
        for (ns, upstream) in upstreams {
            let tx = tx.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let end = crate::forward(upstream, tx, stop, |_| true).await;
                debug!(ns = %ns, ?end, "namespace forwarder finished");
            });
        }
        // Each forwarder holds a sender; the output closes when the last one exits.
        drop(tx);
        Ok(out)
    }
}
