//! Spans created under the installed subscriber carry a W3C trace context.

use catalog_core::trace_context::{extract_trace_context, inject_trace_headers};
use catalog_runtime::telemetry::init_tracing;

#[test]
fn spans_get_propagatable_trace_context() {
    init_tracing("telemetry-test").ok();

    let span = tracing::error_span!("publish");
    let headers = inject_trace_headers(&span);

    assert!(headers.contains_key("traceparent"));
    assert!(extract_trace_context(&headers).is_some());
}
