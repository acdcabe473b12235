//! Assemble decorated sources and their metrics stores for one resource.

use std::sync::Arc;

use kstate_core::{SharedListWatch, Sharding, NAMESPACE_ALL};
use kstate_listwatch::{
    is_all_namespaces, multi_namespace_list_watch, record_sharding_metrics, InstrumentedListWatch, ShardedListWatch,
};
use kstate_store::{compose, extract_headers, filter_generators, FamilyGenerator, MetricsStore, MetricsWriter};
use tracing::info;

/// A decorated source and the store a reflector should fill from it.
pub type StorePair = (SharedListWatch, Arc<MetricsStore>);

#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Empty, or the single all-namespaces value, means every namespace.
    pub namespaces: Vec<String>,
    /// Only consulted in all-namespaces mode.
    pub denylist: Vec<String>,
    pub sharding: Sharding,
    pub use_api_server_cache: bool,
    /// `<= 0` disables the limit.
    pub object_limit: i64,
    /// Resource label on list/watch metrics, e.g. `v1/Pod`.
    pub resource: String,
    /// Feed every listed namespace through one multi-namespace source and one
    /// store instead of a store per namespace.
    pub combine_namespaces: bool,
}

pub struct StoreBuilder {
    config: BuildConfig,
    generators: Vec<FamilyGenerator>,
}

impl StoreBuilder {
    pub fn new(config: BuildConfig, generators: Vec<FamilyGenerator>) -> Self { Self { config, generators } }

    /// Keep only families whose name passes `allow`.
    pub fn filter_families(mut self, allow: impl Fn(&str) -> bool) -> Self {
        self.generators = filter_generators(std::mem::take(&mut self.generators), allow);
        self
    }

    /// Stack order per source: sharded ∘ instrumented ∘ namespace selection ∘ `factory`.
    pub fn build<F>(&self, factory: F) -> (MetricsWriter, Vec<StorePair>)
    where
        F: Fn(&str) -> SharedListWatch,
    {
        let cfg = &self.config;
        record_sharding_metrics(&cfg.sharding);
        let headers = extract_headers(&self.generators);
        let generate = compose(self.generators.clone());
        let decorate = |lw: SharedListWatch| -> SharedListWatch {
            let instrumented =
                InstrumentedListWatch::new(lw, cfg.resource.clone(), cfg.use_api_server_cache, cfg.object_limit);
            ShardedListWatch::wrap(cfg.sharding, Arc::new(instrumented))
        };

        let pairs: Vec<StorePair> = if is_all_namespaces(&cfg.namespaces) {
            let source = multi_namespace_list_watch(&[NAMESPACE_ALL.to_string()], &cfg.denylist, &factory);
            vec![(decorate(source), Arc::new(MetricsStore::new(headers, generate)))]
        } else if cfg.combine_namespaces {
            let source = multi_namespace_list_watch(&cfg.namespaces, &cfg.denylist, &factory);
            let store = MetricsStore::new(headers, generate).allow_namespaces(cfg.namespaces.iter().cloned());
            vec![(decorate(source), Arc::new(store))]
        } else {
            cfg.namespaces
                .iter()
                .map(|ns| {
                    let store = MetricsStore::new(headers.clone(), generate.clone()).allow_namespaces([ns.clone()]);
                    (decorate(factory(ns.as_str())), Arc::new(store))
                })
                .collect()
        };

        info!(
            resource = %cfg.resource,
            stores = pairs.len(),
            families = self.generators.len(),
            shard = cfg.sharding.ordinal(),
            total_shards = cfg.sharding.total(),
            "stores built"
        );
        let writer = MetricsWriter::new(pairs.iter().map(|(_, s)| s.clone()).collect());
        (writer, pairs)
    }
}
