//! List+watch source backed by `Api<DynamicObject>`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use kstate_core::{
    watch_channel, EventKind, ListOptions, ListWatch, ObjectList, RawObject, Result, SharedListWatch, StopHandle,
    WatchEvent, WatchStream,
};
use kube::{
    api::{Api, ListParams, WatchEvent as KubeEvent, WatchParams},
    core::{ApiResource, DynamicObject, TypeMeta},
    Client,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct KubeListWatch {
    api: Api<DynamicObject>,
    types: TypeMeta,
}

impl KubeListWatch {
    /// `resource` supplies the `apiVersion`/`kind` that list items arrive without.
    pub fn new(api: Api<DynamicObject>, resource: &ApiResource) -> Self {
        Self { api, types: TypeMeta { api_version: resource.api_version.clone(), kind: resource.kind.clone() } }
    }
}

/// Per-namespace source factory; the all-namespaces value yields a cluster-wide source.
pub fn namespaced_factory(client: Client, resource: ApiResource) -> impl Fn(&str) -> SharedListWatch {
    move |ns: &str| {
        let api = if ns.is_empty() {
            Api::all_with(client.clone(), &resource)
        } else {
            Api::namespaced_with(client.clone(), ns, &resource)
        };
        Arc::new(KubeListWatch::new(api, &resource)) as SharedListWatch
    }
}

fn list_params(opts: &ListOptions) -> ListParams {
    let mut lp = ListParams::default();
    lp.label_selector = opts.label_selector.clone();
    lp.field_selector = opts.field_selector.clone();
    lp.limit = opts.limit.and_then(|l| u32::try_from(l).ok());
    if !opts.resource_version.is_empty() {
        lp.resource_version = Some(opts.resource_version.clone());
    }
    lp
}

fn watch_params(opts: &ListOptions) -> WatchParams {
    let mut wp = WatchParams::default();
    wp.label_selector = opts.label_selector.clone();
    wp.field_selector = opts.field_selector.clone();
    wp.bookmarks = opts.allow_bookmarks;
    wp
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_raw(mut obj: DynamicObject, types: &TypeMeta) -> anyhow::Result<RawObject> {
    if obj.types.is_none() {
        obj.types = Some(types.clone());
    }
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(RawObject::new(raw))
}

fn convert(ev: KubeEvent<DynamicObject>, types: &TypeMeta) -> anyhow::Result<WatchEvent> {
    Ok(match ev {
        KubeEvent::Added(o) => WatchEvent::new(EventKind::Added, to_raw(o, types)?),
        KubeEvent::Modified(o) => WatchEvent::new(EventKind::Modified, to_raw(o, types)?),
        KubeEvent::Deleted(o) => WatchEvent::new(EventKind::Deleted, to_raw(o, types)?),
        KubeEvent::Bookmark(b) => WatchEvent::new(
            EventKind::Bookmark,
            json!({
                "apiVersion": b.types.api_version,
                "kind": b.types.kind,
                "metadata": { "resourceVersion": b.metadata.resource_version },
            }),
        ),
        KubeEvent::Error(e) => WatchEvent::new(
            EventKind::Error,
            json!({
                "apiVersion": "v1",
                "kind": "Status",
                "metadata": {},
                "status": e.status,
                "message": e.message,
                "reason": e.reason,
                "code": e.code,
            }),
        ),
    })
}

#[async_trait]
impl ListWatch for KubeListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let list = self.api.list(&list_params(opts)).await.with_context(|| format!("listing {}", self.types.kind))?;
        let resource_version = list.metadata.resource_version.unwrap_or_default();
        let items = list
            .items
            .into_iter()
            .map(|o| to_raw(o, &self.types))
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!(kind = %self.types.kind, items = items.len(), rv = %resource_version, "listed");
        Ok(ObjectList { items, resource_version })
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        let stream = self
            .api
            .watch(&watch_params(opts), &opts.resource_version)
            .await
            .with_context(|| format!("watching {}", self.types.kind))?
            .boxed();
        let stop = StopHandle::new();
        let (tx, out) = watch_channel(stop.clone());
        info!(kind = %self.types.kind, rv = %opts.resource_version, "watch started");
        tokio::spawn(pump(stream, tx, stop, self.types.clone()));
        Ok(out)
    }
}

async fn pump(
    mut stream: BoxStream<'static, kube::Result<KubeEvent<DynamicObject>>>,
    tx: mpsc::Sender<WatchEvent>,
    stop: StopHandle,
    types: TypeMeta,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            item = stream.next() => item,
        };
        let ev = match item {
            Some(Ok(ev)) => ev,
            Some(Err(e)) => {
                warn!(kind = %types.kind, error = %e, "watch stream failed");
                break;
            }
            None => break,
        };
        let ev = match convert(ev, &types) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(kind = %types.kind, error = %e, "dropping unconvertible watch event");
                continue;
            }
        };
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            sent = tx.send(ev) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(kind = %types.kind, stopped = stop.is_stopped(), "watch ended");
}
