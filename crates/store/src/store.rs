//! Write-only object store that keeps each object as pre-serialized metric families.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use kstate_core::{Error, ObjectIdentity, ObjectStore, RawObject, Result};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::family::GenerateFn;

/// Per-UID family buffers, positionally aligned with the store's headers.
pub(crate) type Entries = DashMap<String, Box<[Vec<u8>]>>;

/// Rejects an object before it reaches the generator.
pub type Predicate = Arc<dyn Fn(&RawObject, &ObjectIdentity) -> bool + Send + Sync>;

pub struct MetricsStore {
    headers: ArcSwap<Vec<String>>,
    metrics: ArcSwap<Entries>,
    generate: GenerateFn,
    predicates: Vec<Predicate>,
}

impl MetricsStore {
    pub fn new(headers: Vec<String>, generate: GenerateFn) -> Self {
        Self {
            headers: ArcSwap::from_pointee(headers),
            metrics: ArcSwap::from_pointee(Entries::default()),
            generate,
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&RawObject, &ObjectIdentity) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Keep namespaced objects only when their namespace is listed.
    /// Cluster-scoped objects always pass. An empty list, or one naming the
    /// all-namespaces value, installs nothing.
    pub fn allow_namespaces<I, S>(self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: FxHashSet<String> = namespaces.into_iter().map(Into::into).collect();
        if allowed.is_empty() || allowed.contains(kstate_core::NAMESPACE_ALL) {
            return self;
        }
        self.with_predicate(move |_, id| id.is_cluster_scoped() || allowed.contains(&id.namespace))
    }

    pub fn headers(&self) -> Arc<Vec<String>> { self.headers.load_full() }

    pub(crate) fn set_headers(&self, headers: Vec<String>) { self.headers.store(Arc::new(headers)); }

    pub(crate) fn entries(&self) -> Arc<Entries> { self.metrics.load_full() }

    /// Number of cached objects.
    pub fn len(&self) -> usize { self.metrics.load().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn insert(&self, obj: &RawObject) -> Result<()> {
        let id = obj.identity()?;
        if let Some(pos) = self.predicates.iter().position(|p| !p(obj, &id)) {
            trace!(uid = %id.uid, ns = %id.namespace, predicate = pos, "object rejected");
            return Ok(());
        }
        let families = (self.generate)(obj);
        let expected = self.headers.load().len();
        if families.len() != expected {
            return Err(Error::FamilyCount { expected, actual: families.len() });
        }
        let buffers: Box<[Vec<u8>]> = families.iter().map(|f| f.to_bytes()).collect();
        self.metrics.load().insert(id.uid, buffers);
        Ok(())
    }
}

impl ObjectStore for MetricsStore {
    fn add(&self, obj: &RawObject) -> Result<()> { self.insert(obj) }

    fn update(&self, obj: &RawObject) -> Result<()> { self.insert(obj) }

    fn delete(&self, obj: &RawObject) -> Result<()> {
        let id = obj.identity()?;
        self.metrics.load().remove(&id.uid);
        Ok(())
    }

    fn replace(&self, items: &[RawObject], resource_version: &str) -> Result<()> {
        self.metrics.store(Arc::new(Entries::default()));
        for obj in items {
            self.insert(obj)?;
        }
        debug!(items = items.len(), cached = self.len(), rv = %resource_version, "store replaced");
        Ok(())
    }

    fn get(&self, _obj: &RawObject) -> Option<RawObject> { None }

    fn get_by_key(&self, _key: &str) -> Option<RawObject> { None }

    fn list(&self) -> Vec<RawObject> { Vec::new() }

    fn list_keys(&self) -> Vec<String> { Vec::new() }

    fn resync(&self) -> Result<()> { Ok(()) }
}
