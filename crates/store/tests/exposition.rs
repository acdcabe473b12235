#![forbid(unsafe_code)]

use std::sync::Arc;

use kstate_core::{ObjectStore, RawObject};
use kstate_store::{
    compose, extract_headers, ExpositionFormat, Family, FamilyGenerator, GenerateFn, Metric, MetricType, MetricsStore,
    MetricsWriter, MetricsWriterList,
};
use serde_json::json;

fn cm(uid: &str, ns: &str) -> RawObject {
    RawObject::new(json!({ "kind": "ConfigMap", "metadata": { "uid": uid, "namespace": ns, "name": uid } }))
}

fn uid_of(o: &RawObject) -> String { o.identity().map(|id| id.uid).unwrap_or_default() }

fn generators() -> Vec<FamilyGenerator> {
    vec![
        FamilyGenerator::new("a", "A help.", MetricType::Gauge, |o: &RawObject| {
            Family::new(vec![Metric::new([("uid", uid_of(o))], 1.0)])
        }),
        FamilyGenerator::new("b", "B help.", MetricType::Info, |o: &RawObject| {
            Family::new(vec![Metric::new([("uid", uid_of(o))], 2.0)])
        }),
    ]
}

fn store() -> Arc<MetricsStore> {
    let gens = generators();
    Arc::new(MetricsStore::new(extract_headers(&gens), compose(gens)))
}

fn render(writer: &MetricsWriter) -> String {
    let mut out = Vec::new();
    writer.write_all(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn families_from_every_store_are_grouped_under_one_header() {
    let (s1, s2) = (store(), store());
    s1.add(&cm("u1", "ns1")).unwrap();
    s2.add(&cm("u2", "ns2")).unwrap();

    let text = render(&MetricsWriter::new(vec![s1, s2]));
    assert_eq!(
        text,
        "# HELP a A help.\n# TYPE a gauge\n\
         a{uid=\"u1\"} 1\na{uid=\"u2\"} 1\n\
         # HELP b B help.\n# TYPE b info\n\
         b{uid=\"u1\"} 2\nb{uid=\"u2\"} 2\n"
    );
}

#[test]
fn empty_families_emit_no_header() {
    let gens = vec![
        FamilyGenerator::new("present", "P.", MetricType::Gauge, |_: &RawObject| {
            Family::new(vec![Metric::new([("k", "v")], 1.0)])
        }),
        FamilyGenerator::new("absent", "A.", MetricType::Gauge, |_: &RawObject| Family::default()),
    ];
    let s = Arc::new(MetricsStore::new(extract_headers(&gens), compose(gens)));
    s.add(&cm("u1", "ns")).unwrap();
    let text = render(&MetricsWriter::new(vec![s]));
    assert_eq!(text, "# HELP present P.\n# TYPE present gauge\npresent{k=\"v\"} 1\n");
}

#[test]
fn empty_store_writes_nothing() {
    assert_eq!(render(&MetricsWriter::new(vec![store()])), "");
}

#[test]
fn add_delete_replace_round_trip() {
    let s = store();
    let w = MetricsWriter::new(vec![s.clone()]);
    s.add(&cm("u1", "ns")).unwrap();
    assert!(render(&w).contains("a{uid=\"u1\"} 1\n"));

    s.delete(&cm("u1", "ns")).unwrap();
    assert_eq!(render(&w), "");

    s.replace(&[cm("u2", "ns"), cm("u3", "ns")], "4").unwrap();
    let text = render(&w);
    assert!(text.contains("a{uid=\"u2\"} 1\n") && text.contains("a{uid=\"u3\"} 1\n"));

    s.replace(&[], "5").unwrap();
    assert_eq!(render(&w), "");
}

#[test]
fn sanitize_blanks_duplicates_across_writers() {
    let custom = |headers: &[&str]| {
        let generate: GenerateFn = compose(Vec::new());
        Arc::new(MetricsStore::new(headers.iter().map(|h| h.to_string()).collect(), generate))
    };
    let w1 = MetricsWriter::new(vec![custom(&["# HELP H x\n# TYPE H gauge", "# HELP H x\n# TYPE H gauge"])]);
    let w2 = MetricsWriter::new(vec![custom(&["# HELP H x\n# TYPE H gauge", "# HELP H2 y\n# TYPE H2 gauge"])]);
    let list = MetricsWriterList::new(vec![w1.clone(), w2.clone()]);
    list.sanitize_headers(ExpositionFormat::PlainText);

    assert_eq!(*w1.stores()[0].headers(), vec!["# HELP H x\n# TYPE H gauge".to_string(), String::new()]);
    assert_eq!(*w2.stores()[0].headers(), vec![String::new(), "# HELP H2 y\n# TYPE H2 gauge".to_string()]);
}

#[test]
fn info_becomes_gauge_only_for_plain_text() {
    let (plain, open) = (store(), store());
    MetricsWriterList::new(vec![MetricsWriter::new(vec![plain.clone()])]).sanitize_headers(ExpositionFormat::PlainText);
    MetricsWriterList::new(vec![MetricsWriter::new(vec![open.clone()])]).sanitize_headers(ExpositionFormat::OpenMetrics);
    assert_eq!(plain.headers()[1], "# HELP b B help.\n# TYPE b gauge");
    assert_eq!(open.headers()[1], "# HELP b B help.\n# TYPE b info");
}

fn gauges(names: &[&'static str]) -> Arc<MetricsStore> {
    let gens: Vec<_> = names
        .iter()
        .map(|&n| {
            FamilyGenerator::new(n, format!("{n} help."), MetricType::Gauge, |o: &RawObject| {
                Family::new(vec![Metric::new([("uid", uid_of(o))], 1.0)])
            })
        })
        .collect();
    Arc::new(MetricsStore::new(extract_headers(&gens), compose(gens)))
}

#[test]
fn blank_header_still_writes_series() {
    let (s1, s2) = (gauges(&["a", "b"]), gauges(&["b", "c"]));
    s1.add(&cm("u1", "ns")).unwrap();
    s2.add(&cm("u2", "ns")).unwrap();
    let list = MetricsWriterList::new(vec![MetricsWriter::new(vec![s1]), MetricsWriter::new(vec![s2.clone()])]);
    list.sanitize_headers(ExpositionFormat::PlainText);
    assert_eq!(*s2.headers(), vec![String::new(), "# HELP c c help.\n# TYPE c gauge".to_string()]);

    let mut out = Vec::new();
    list.write_all(ExpositionFormat::PlainText, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
        text,
        "# HELP a a help.\n# TYPE a gauge\na{uid=\"u1\"} 1\n\
         # HELP b b help.\n# TYPE b gauge\nb{uid=\"u1\"} 1\n\
         b{uid=\"u2\"} 1\n\
         # HELP c c help.\n# TYPE c gauge\nc{uid=\"u2\"} 1\n"
    );
    assert_eq!(text.matches("# HELP b").count(), 1);
}

#[test]
fn non_adjacent_repeat_keeps_its_header() {
    let (s1, s2) = (store(), store());
    s1.add(&cm("u1", "ns")).unwrap();
    s2.add(&cm("u2", "ns")).unwrap();
    let list = MetricsWriterList::new(vec![MetricsWriter::new(vec![s1]), MetricsWriter::new(vec![s2])]);
    list.sanitize_headers(ExpositionFormat::PlainText);

    let mut out = Vec::new();
    list.write_all(ExpositionFormat::PlainText, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("# HELP a").count(), 2);
    assert_eq!(text.matches("# HELP b").count(), 2);
    assert!(!text.ends_with("# EOF\n"));
}

#[test]
fn openmetrics_output_ends_with_eof() {
    let s = store();
    s.add(&cm("u1", "ns")).unwrap();
    let list = MetricsWriterList::new(vec![MetricsWriter::new(vec![s])]);
    let mut out = Vec::new();
    list.write_all(ExpositionFormat::OpenMetrics, &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().ends_with("b{uid=\"u1\"} 2\n# EOF\n"));

    let mut empty = Vec::new();
    MetricsWriterList::default().write_all(ExpositionFormat::OpenMetrics, &mut empty).unwrap();
    assert_eq!(empty, b"# EOF\n");
}

#[test]
fn concurrent_mutation_and_exposition() {
    let s = store();
    let w = MetricsWriter::new(vec![s.clone()]);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..500 {
                let o = cm(&format!("u{i}"), "ns");
                s.add(&o).unwrap();
                if i % 3 == 0 {
                    s.delete(&o).unwrap();
                }
            }
        });
        scope.spawn(|| {
            for _ in 0..50 {
                let text = render(&w);
                assert!(text.lines().all(|l| l.starts_with('#') || l.starts_with("a{") || l.starts_with("b{")));
            }
        });
    });
    assert_eq!(s.len(), 500 - 167);
}
