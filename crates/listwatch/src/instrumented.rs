//! Count list/watch outcomes and apply list limits / apiserver cache hints.

use async_trait::async_trait;
use kstate_core::{ListOptions, ListWatch, ObjectList, Result, SharedListWatch, WatchStream};

pub struct InstrumentedListWatch {
    next: SharedListWatch,
    resource: String,
    use_api_server_cache: bool,
    limit: Option<i64>,
}

impl InstrumentedListWatch {
    /// `limit <= 0` means unlimited.
    pub fn new(next: SharedListWatch, resource: impl Into<String>, use_api_server_cache: bool, limit: i64) -> Self {
        Self { next, resource: resource.into(), use_api_server_cache, limit: (limit > 0).then_some(limit) }
    }
}

#[async_trait]
impl ListWatch for InstrumentedListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let mut opts = opts.clone();
        // "0" lets the apiserver answer from its watch cache.
        if self.use_api_server_cache {
            opts.resource_version = "0".to_string();
        }
        if let Some(limit) = self.limit {
            opts.limit = Some(limit);
            metrics::gauge!("kstate_list_objects_limit", limit as f64, "resource" => self.resource.clone());
        }

        let mut list = match self.next.list(&opts).await {
            Ok(list) => list,
            Err(e) => {
                metrics::counter!("kstate_list_total", 1u64, "result" => "error", "resource" => self.resource.clone());
                return Err(e);
            }
        };
        metrics::counter!("kstate_list_total", 1u64, "result" => "success", "resource" => self.resource.clone());

        if let Some(limit) = self.limit {
            list.items.truncate(limit as usize);
            metrics::gauge!("kstate_list_objects", list.items.len() as f64, "resource" => self.resource.clone());
        }
        Ok(list)
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        match self.next.watch(opts).await {
            Ok(w) => {
                metrics::counter!("kstate_watch_total", 1u64, "result" => "success", "resource" => self.resource.clone());
                Ok(w)
            }
            Err(e) => {
                metrics::counter!("kstate_watch_total", 1u64, "result" => "error", "resource" => self.resource.clone());
                Err(e)
            }
        }
    }
}
