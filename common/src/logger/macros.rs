use tracing::{Span, field};

use super::TraceId;

/// Root span for one submission / operator command.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        vendor = field::Empty,
        waybill = field::Empty
    )
}

/// Child span; inherits trace_id from the enclosing root span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        vendor = field::Empty,
        waybill = field::Empty
    )
}

/// Records the vendor and (once known) the held waybill on the current span.
pub fn annotate_span(vendor: &str, waybill: Option<&str>) {
    let span = Span::current();
    span.record("vendor", field::display(vendor));
    if let Some(code) = waybill {
        span.record("waybill", field::display(code));
    }
}
