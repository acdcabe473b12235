//! Built-in families for any resource: `kube_<kind>_info` and `kube_<kind>_created`.

use kstate_core::RawObject;
use kstate_store::{Family, FamilyGenerator, Metric, MetricType};

pub fn for_kind(kind: &str) -> Vec<FamilyGenerator> {
    let kind = kind.to_ascii_lowercase();
    let info_label = kind.clone();
    let created_label = kind.clone();
    vec![
        FamilyGenerator::new(
            format!("kube_{kind}_info"),
            format!("Information about {kind}."),
            MetricType::Info,
            move |o: &RawObject| {
                let Ok(id) = o.identity() else { return Family::default() };
                Family::new(vec![Metric::new(
                    [("namespace", id.namespace), (info_label.as_str(), id.name), ("uid", id.uid)],
                    1.0,
                )])
            },
        ),
        FamilyGenerator::new(
            format!("kube_{kind}_created"),
            format!("Unix creation timestamp of {kind}."),
            MetricType::Gauge,
            move |o: &RawObject| {
                let (Ok(id), Some(ts)) = (o.identity(), creation_ts(o)) else { return Family::default() };
                Family::new(vec![Metric::new([("namespace", id.namespace), (created_label.as_str(), id.name)], ts as f64)])
            },
        ),
    ]
}

fn creation_ts(o: &RawObject) -> Option<i64> {
    o.as_value()
        .pointer("/metadata/creationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}
