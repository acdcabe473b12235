//! kstate store: metrics cache fed by a reflector and the writers that expose it

#![forbid(unsafe_code)]

mod allowdeny;
pub mod family;
mod store;
mod writer;

pub use allowdeny::AllowDenyList;
pub use family::{
    compose, extract_headers, filter_generators, Family, FamilyGenerator, GenerateFn, Metric, MetricType,
    SerializeFamily,
};
pub use store::{MetricsStore, Predicate};
pub use writer::{sanitize_headers, ExpositionFormat, MetricsWriter, MetricsWriterList, OPENMETRICS_CONTENT_TYPE};
