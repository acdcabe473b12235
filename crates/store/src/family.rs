//! Metric families: the per-object unit a generator produces and the store caches.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use kstate_core::RawObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Gauge,
    Counter,
    Info,
    StateSet,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Info => "info",
            MetricType::StateSet => "stateset",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One series: parallel label key/value lists plus a sample value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub label_keys: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Metric {
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>, value: f64) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (label_keys, label_values) = labels.into_iter().map(|(k, v)| (k.into(), v.into())).unzip();
        Self { label_keys, label_values, value }
    }

    fn write_to(&self, name: &str, out: &mut String) {
        out.push_str(name);
        if !self.label_keys.is_empty() {
            out.push('{');
            for (i, (k, v)) in self.label_keys.iter().zip(&self.label_values).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(k);
                out.push_str("=\"");
                escape_label_value(v, out);
                out.push('"');
            }
            out.push('}');
        }
        out.push(' ');
        write_value(self.value, out);
        out.push('\n');
    }
}

fn escape_label_value(v: &str, out: &mut String) {
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
}

fn write_value(v: f64, out: &mut String) {
    if v.is_nan() {
        out.push_str("NaN");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "+Inf" } else { "-Inf" });
    } else {
        let _ = write!(out, "{v}");
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Family {
    pub name: String,
    pub metrics: Vec<Metric>,
}

impl Family {
    pub fn new(metrics: Vec<Metric>) -> Self { Self { name: String::new(), metrics } }
}

/// Anything the store can turn into exposition bytes.
pub trait SerializeFamily: Send {
    fn to_bytes(&self) -> Vec<u8>;
}

impl SerializeFamily for Family {
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for m in &self.metrics {
            m.write_to(&self.name, &mut out);
        }
        out.into_bytes()
    }
}

/// Object → ordered families, one per header of the store it feeds.
pub type GenerateFn = Arc<dyn Fn(&RawObject) -> Vec<Box<dyn SerializeFamily>> + Send + Sync>;

/// Metrics for one family; the family name is stamped on by [`compose`].
pub type FamilyFn = Arc<dyn Fn(&RawObject) -> Family + Send + Sync>;

#[derive(Clone)]
pub struct FamilyGenerator {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub generate: FamilyFn,
}

impl FamilyGenerator {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        metric_type: MetricType,
        generate: impl Fn(&RawObject) -> Family + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), help: help.into(), metric_type, generate: Arc::new(generate) }
    }

    /// `# HELP` and `# TYPE` lines, without trailing newline.
    pub fn header(&self) -> String {
        format!("# HELP {name} {help}\n# TYPE {name} {ty}", name = self.name, help = self.help, ty = self.metric_type)
    }
}

impl fmt::Debug for FamilyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyGenerator")
            .field("name", &self.name)
            .field("metric_type", &self.metric_type)
            .finish_non_exhaustive()
    }
}

pub fn extract_headers(gens: &[FamilyGenerator]) -> Vec<String> { gens.iter().map(FamilyGenerator::header).collect() }

pub fn compose(gens: Vec<FamilyGenerator>) -> GenerateFn {
    Arc::new(move |obj: &RawObject| {
        gens.iter()
            .map(|g| {
                let mut family = (g.generate)(obj);
                family.name.clone_from(&g.name);
                Box::new(family) as Box<dyn SerializeFamily>
            })
            .collect()
    })
}

pub fn filter_generators(gens: Vec<FamilyGenerator>, allow: impl Fn(&str) -> bool) -> Vec<FamilyGenerator> {
    gens.into_iter().filter(|g| allow(&g.name)).collect()
}
