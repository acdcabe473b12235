#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kstate_core::{ListOptions, ListWatch, RawObject, SharedListWatch, Sharding, StopHandle};
use kstate_kubehub::{reflect, BuildConfig, StoreBuilder};
use kstate_listwatch::fake::FakeListWatch;
use kstate_store::{Family, FamilyGenerator, Metric, MetricType};
use serde_json::json;

fn cm(uid: &str, ns: &str) -> RawObject {
    RawObject::new(json!({ "kind": "ConfigMap", "metadata": { "uid": uid, "namespace": ns, "name": uid } }))
}

fn generators() -> Vec<FamilyGenerator> {
    let by_name = |o: &RawObject| {
        let id = o.identity().unwrap_or_default();
        Family::new(vec![Metric::new([("namespace", id.namespace), ("configmap", id.name)], 1.0)])
    };
    vec![
        FamilyGenerator::new("kube_configmap_info", "Information about configmap.", MetricType::Gauge, by_name),
        FamilyGenerator::new("kube_configmap_created", "Unix creation timestamp.", MetricType::Gauge, |_: &RawObject| {
            Family::new(vec![Metric::new([("k", "v")], 1.5)])
        }),
    ]
}

struct Recorder {
    calls: Mutex<Vec<String>>,
    source: Arc<FakeListWatch>,
}

impl Recorder {
    fn new(source: Arc<FakeListWatch>) -> Self { Self { calls: Mutex::new(Vec::new()), source } }

    fn factory(&self) -> impl Fn(&str) -> SharedListWatch + '_ {
        move |ns: &str| {
            self.calls.lock().unwrap().push(ns.to_string());
            self.source.clone() as SharedListWatch
        }
    }

    fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }
}

#[tokio::test]
async fn all_namespaces_builds_one_store_behind_the_denylist() {
    let rec = Recorder::new(FakeListWatch::new(vec![cm("a", "kube-system"), cm("b", "default")], "3"));
    let cfg = BuildConfig { denylist: vec!["kube-system".into()], resource: "v1/ConfigMap".into(), ..Default::default() };
    let (writer, pairs) = StoreBuilder::new(cfg, generators()).build(rec.factory());

    assert_eq!(rec.calls(), vec![""]);
    assert_eq!(pairs.len(), 1);
    assert_eq!(writer.stores().len(), 1);
    let list = pairs[0].0.list(&ListOptions::default()).await.unwrap();
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].identity().unwrap().namespace, "default");
}

#[tokio::test]
async fn explicit_namespaces_get_a_store_each() {
    let rec = Recorder::new(FakeListWatch::new(vec![], "3"));
    let cfg = BuildConfig {
        namespaces: vec!["a".into(), "b".into()],
        denylist: vec!["a".into()],
        ..Default::default()
    };
    let (writer, pairs) = StoreBuilder::new(cfg, generators()).build(rec.factory());
    assert_eq!(rec.calls(), vec!["a", "b"]);
    assert_eq!(pairs.len(), 2);
    assert_eq!(writer.stores().len(), 2);
    assert!(Arc::ptr_eq(&writer.stores()[1], &pairs[1].1));
}

#[tokio::test]
async fn combined_namespaces_share_one_source() {
    let rec = Recorder::new(FakeListWatch::new(vec![cm("x", "a")], "3"));
    let cfg = BuildConfig { namespaces: vec!["a".into(), "b".into()], combine_namespaces: true, ..Default::default() };
    let (_writer, pairs) = StoreBuilder::new(cfg, generators()).build(rec.factory());
    assert_eq!(pairs.len(), 1);
    let list = pairs[0].0.list(&ListOptions::default()).await.unwrap();
    assert_eq!(list.resource_version, "3/3");
    assert_eq!(list.items.len(), 2);
}

#[tokio::test]
async fn sources_are_sharded_and_limited() {
    let items: Vec<_> = (0..40).map(|i| cm(&format!("uid-{i:04}"), "default")).collect();
    let fake = FakeListWatch::new(items, "8");
    let rec = Recorder::new(fake.clone());
    let sharding = Sharding::new(1, 2).unwrap();
    let cfg = BuildConfig { sharding, use_api_server_cache: true, object_limit: 30, ..Default::default() };
    let (_writer, pairs) = StoreBuilder::new(cfg, generators()).build(rec.factory());

    let list = pairs[0].0.list(&ListOptions::default()).await.unwrap();
    let expected = (0..30).filter(|i| sharding.keep(&format!("uid-{i:04}"))).count();
    assert_eq!(list.items.len(), expected);
    assert_eq!(fake.list_calls()[0].resource_version, "0");
    assert_eq!(fake.list_calls()[0].limit, Some(30));
}

#[tokio::test]
async fn family_filter_drops_headers() {
    let rec = Recorder::new(FakeListWatch::new(vec![], "1"));
    let builder = StoreBuilder::new(BuildConfig::default(), generators()).filter_families(|n| n.ends_with("_info"));
    let (_writer, pairs) = builder.build(rec.factory());
    let headers = pairs[0].1.headers();
    assert_eq!(headers.len(), 1);
    assert!(headers[0].starts_with("# HELP kube_configmap_info "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reflected_objects_show_up_in_the_exposition() {
    let fake = FakeListWatch::new(vec![cm("u1", "default"), cm("u2", "team-a")], "5");
    let rec = Recorder::new(fake.clone());
    let (writer, pairs) = StoreBuilder::new(BuildConfig::default(), generators()).build(rec.factory());
    let (source, store) = pairs[0].clone();

    let task = tokio::spawn(async move { reflect(&*source, &*store, StopHandle::new()).await });
    for _ in 0..500 {
        if !fake.watch_calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    fake.close_watches();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();

    let mut out = Vec::new();
    writer.write_all(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("# HELP kube_configmap_info Information about configmap.\n# TYPE kube_configmap_info gauge\n"));
    assert!(text.contains("kube_configmap_info{namespace=\"team-a\",configmap=\"u2\"} 1\n"));
    assert_eq!(text.matches("kube_configmap_created{k=\"v\"} 1.5\n").count(), 2);
}
