//! W3C trace-context propagation through message headers.
//!
//! The publisher injects the active span's context as `traceparent` /
//! `tracestate` headers; the consumer extracts them and parents its handling
//! span on the producer's trace.

use crate::event_bus::Headers;
use opentelemetry::{Context as OtelContext, propagation::TextMapPropagator, trace::TraceContextExt};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Inject the context of `span` into a fresh header map.
///
/// Returns an empty map when no OpenTelemetry layer is installed or the span
/// is disabled.
#[must_use]
pub fn inject_trace_headers(span: &Span) -> Headers {
    let mut carrier: HashMap<String, String> = HashMap::new();
    TraceContextPropagator::new().inject_context(&span.context(), &mut carrier);
    carrier
        .into_iter()
        .map(|(key, value)| (key, value.into_bytes()))
        .collect()
}

/// Extract a remote trace context from message headers.
///
/// Header values that are not UTF-8 are ignored. Returns `None` if no valid
/// context is present.
#[must_use]
pub fn extract_trace_context(headers: &Headers) -> Option<OtelContext> {
    let carrier: HashMap<String, String> = headers
        .iter()
        .filter_map(|(key, value)| {
            std::str::from_utf8(value)
                .ok()
                .map(|v| (key.to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let context = TraceContextPropagator::new().extract(&carrier);
    if context.span().span_context().is_valid() {
        Some(context)
    } else {
        None
    }
}

/// Parent `span` on the context carried by `headers`, if there is one.
pub fn attach_remote_parent(span: &Span, headers: &Headers) {
    if let Some(context) = extract_trace_context(headers) {
        span.set_parent(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_traceparent_is_extracted() {
        let mut headers = Headers::new();
        headers.insert(
            "traceparent".to_string(),
            b"00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_vec(),
        );
        let context = extract_trace_context(&headers);
        assert!(context.is_some());
    }

    #[test]
    fn missing_or_garbage_headers_yield_nothing() {
        assert!(extract_trace_context(&Headers::new()).is_none());

        let mut headers = Headers::new();
        headers.insert("traceparent".to_string(), vec![0xff, 0xfe]);
        assert!(extract_trace_context(&headers).is_none());
    }

    #[test]
    fn disabled_span_injects_nothing() {
        let headers = inject_trace_headers(&Span::none());
        assert!(!headers.contains_key("traceparent"));
    }
}
