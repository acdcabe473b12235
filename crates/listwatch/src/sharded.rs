//! Keep only the objects this replica owns.

use std::sync::Arc;

use async_trait::async_trait;
use kstate_core::{ListOptions, ListWatch, ObjectList, Result, SharedListWatch, Sharding, WatchStream};
use tracing::debug;

pub struct ShardedListWatch {
    sharding: Sharding,
    next: SharedListWatch,
}

impl ShardedListWatch {
    /// Wrap `next`; a single-shard configuration returns `next` unchanged.
    pub fn wrap(sharding: Sharding, next: SharedListWatch) -> SharedListWatch {
        if sharding.is_noop() {
            return next;
        }
        Arc::new(Self { sharding, next })
    }
}

#[async_trait]
impl ListWatch for ShardedListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let list = self.next.list(opts).await?;
        let mut items = Vec::new();
        for obj in list.items {
            if self.sharding.keep(&obj.identity()?.uid) {
                items.push(obj);
            }
        }
        Ok(ObjectList { items, resource_version: list.resource_version })
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        let upstream = self.next.watch(opts).await?;
        let sharding = self.sharding;
        Ok(crate::spawn_filter(upstream, "sharded", move |ev| match ev.object.identity() {
            Ok(id) => sharding.keep(&id.uid),
            // Unlike the denylist, pass through rather than lose the event.
            Err(e) => {
                debug!(error = %e, kind = ?ev.kind, "event without object identity forwarded unfiltered");
                true
            }
        }))
    }
}

/// Publish this replica's shard configuration as gauges.
pub fn record_sharding_metrics(sharding: &Sharding) {
    metrics::gauge!(
        "kstate_shard_ordinal",
        sharding.ordinal() as f64,
        "shard_ordinal" => sharding.ordinal().to_string()
    );
    metrics::gauge!("kstate_total_shards", sharding.total() as f64);
}
