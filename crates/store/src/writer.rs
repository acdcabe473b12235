//! Exposition of one or more metrics stores that share a header list.

use std::io::Write;
use std::sync::Arc;

use kstate_core::Result;
use tracing::trace;

use crate::store::MetricsStore;

pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpositionFormat {
    #[default]
    PlainText,
    OpenMetrics,
}

impl ExpositionFormat {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.trim_start().starts_with(OPENMETRICS_CONTENT_TYPE) {
            ExpositionFormat::OpenMetrics
        } else {
            ExpositionFormat::PlainText
        }
    }
}

/// Writes stores whose headers are identical so that same-named families from
/// every store end up under a single header block.
#[derive(Clone, Default)]
pub struct MetricsWriter {
    stores: Vec<Arc<MetricsStore>>,
}

impl MetricsWriter {
    pub fn new(stores: Vec<Arc<MetricsStore>>) -> Self { Self { stores } }

    pub fn stores(&self) -> &[Arc<MetricsStore>] { &self.stores }

    /// Output is untrustworthy after an error; callers discard it.
    pub fn write_all<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        let Some(first) = self.stores.first() else { return Ok(()) };
        let headers = first.headers();
        let entries: Vec<_> = self.stores.iter().map(|s| s.entries()).collect();

        for (i, header) in headers.iter().enumerate() {
            let populated = entries.iter().any(|m| m.iter().any(|e| e.value().get(i).is_some_and(|b| !b.is_empty())));
            if !populated {
                trace!(family = i, "empty family skipped");
                continue;
            }
            if !header.is_empty() {
                out.write_all(header.as_bytes())?;
                out.write_all(b"\n")?;
            }
            for m in &entries {
                for e in m.iter() {
                    if let Some(buf) = e.value().get(i) {
                        out.write_all(buf)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Every writer behind one scrape, in exposition order.
#[derive(Clone, Default)]
pub struct MetricsWriterList(pub Vec<MetricsWriter>);

impl MetricsWriterList {
    pub fn new(writers: Vec<MetricsWriter>) -> Self { Self(writers) }

    /// OpenMetrics output is terminated by `# EOF`.
    pub fn write_all<W: Write + ?Sized>(&self, format: ExpositionFormat, out: &mut W) -> Result<()> {
        for w in &self.0 {
            w.write_all(out)?;
        }
        if format == ExpositionFormat::OpenMetrics {
            out.write_all(b"# EOF\n")?;
        }
        Ok(())
    }

    pub fn sanitize_headers(&self, format: ExpositionFormat) { sanitize_headers(format, &self.0) }
}

impl From<Vec<MetricsWriter>> for MetricsWriterList {
    fn from(writers: Vec<MetricsWriter>) -> Self { Self(writers) }
}

/// Rewrite headers for the target format and blank consecutive duplicates.
///
/// Plain-text parsers understand neither `info` nor `stateset`, so those types
/// become `gauge`. A header equal to the last non-blank one seen, across
/// writer boundaries, is replaced by an empty string so the positions of the
/// family buffers still line up.
pub fn sanitize_headers(format: ExpositionFormat, writers: &[MetricsWriter]) {
    let mut last = String::new();
    for w in writers {
        let Some(first) = w.stores.first() else { continue };
        let mut headers: Vec<String> = first.headers().as_ref().clone();
        for h in headers.iter_mut() {
            if format == ExpositionFormat::PlainText && h.starts_with("# HELP") {
                *h = plain_text_header(h);
            }
            if h.is_empty() {
                continue;
            }
            if *h == last {
                trace!(header = %h, "duplicate header blanked");
                h.clear();
            } else {
                last.clone_from(h);
            }
        }
        for s in &w.stores {
            s.set_headers(headers.clone());
        }
    }
}

fn plain_text_header(h: &str) -> String {
    for ty in ["info", "stateset"] {
        if let Some(prefix) = h.strip_suffix(ty) {
            if prefix.ends_with(' ') {
                return format!("{prefix}gauge");
            }
        }
    }
    h.to_string()
}
