//! Drop objects and events that live in denied namespaces.

use std::sync::Arc;

use async_trait::async_trait;
use kstate_core::{ListOptions, ListWatch, ObjectIdentity, ObjectList, Result, SharedListWatch, WatchStream};
use rustc_hash::FxHashSet;
use tracing::{debug, error, trace};

pub struct DenylistListWatch {
    denylist: Arc<FxHashSet<String>>,
    next: SharedListWatch,
}

impl DenylistListWatch {
    /// Wrap `next`, filtering by `namespaces`. With nothing denied, `next` is
    /// returned as is.
    pub fn wrap<I, S>(namespaces: I, next: SharedListWatch) -> SharedListWatch
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let denylist: FxHashSet<String> = namespaces.into_iter().map(Into::into).collect();
        if denylist.is_empty() {
            return next;
        }
        Arc::new(Self { denylist: Arc::new(denylist), next })
    }
}

fn denied(denylist: &FxHashSet<String>, id: &ObjectIdentity) -> bool {
    denylist.contains(id.filter_namespace())
}

#[async_trait]
impl ListWatch for DenylistListWatch {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectList> {
        let list = self.next.list(opts).await.map_err(|e| {
            error!(error = %e, "error listing");
            e
        })?;

        let mut items = Vec::with_capacity(list.items.len());
        for obj in list.items {
            let id = obj.identity().map_err(|e| {
                error!(error = %e, "error reading object metadata");
                e
            })?;
            if denied(&self.denylist, &id) {
                trace!(ns = %id.filter_namespace(), name = %id.name, "denied");
                continue;
            }
            trace!(ns = %id.filter_namespace(), name = %id.name, "allowed");
            items.push(obj);
        }

        Ok(ObjectList { items, resource_version: list.resource_version })
    }

    async fn watch(&self, opts: &ListOptions) -> Result<WatchStream> {
        let upstream = self.next.watch(opts).await?;
        let denylist = Arc::clone(&self.denylist);
        Ok(crate::spawn_filter(upstream, "denylist", move |ev| match ev.object.identity() {
            Ok(id) => {
                let deny = denied(&denylist, &id);
                trace!(ns = %id.filter_namespace(), name = %id.name, deny, "denylist watch event");
                !deny
            }
            // Without metadata the namespace is unknown; never forward it.
            Err(e) => {
                debug!(error = %e, kind = ?ev.kind, "unexpected object in watch event; dropped");
                false
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeListWatch;
    use kstate_core::RawObject;
    use serde_json::json;

    fn obj(kind: &str, ns: Option<&str>, name: &str) -> RawObject {
        let mut meta = json!({ "uid": format!("{kind}-{name}"), "name": name });
        if let Some(ns) = ns {
            meta["namespace"] = json!(ns);
        }
        RawObject::new(json!({ "kind": kind, "metadata": meta }))
    }

    #[tokio::test]
    async fn list_drops_denied_and_namespace_named_after_it() {
        let fake = FakeListWatch::new(
            vec![
                obj("Pod", Some("kube-system"), "dns"),
                obj("Pod", Some("default"), "web"),
                obj("Namespace", None, "kube-system"),
                obj("Namespace", None, "default"),
                obj("Node", None, "n1"),
            ],
            "42",
        );
        let lw = DenylistListWatch::wrap(["kube-system"], fake);
        let list = lw.list(&ListOptions::default()).await.unwrap();
        let names: Vec<_> = list.items.iter().map(|o| o.identity().unwrap().name).collect();
        assert_eq!(names, vec!["web", "default", "n1"]);
        assert_eq!(list.resource_version, "42");
    }

    #[tokio::test]
    async fn list_fails_on_unreadable_object() {
        let fake = FakeListWatch::new(vec![RawObject::new(json!({ "kind": "Pod" }))], "1");
        let lw = DenylistListWatch::wrap(["x"], fake);
        assert!(lw.list(&ListOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn empty_denylist_is_passthrough() {
        let fake = FakeListWatch::new(vec![obj("Pod", Some("a"), "p")], "7");
        let shared: SharedListWatch = fake.clone();
        let lw = DenylistListWatch::wrap(Vec::<String>::new(), shared.clone());
        assert!(Arc::ptr_eq(&lw, &shared));
    }
}
