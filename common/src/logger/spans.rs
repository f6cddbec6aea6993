use tracing::{Span, field};

use super::TraceId;

/// Root span for one inbound request (HTTP call or gateway notification).
///
/// `learner_id` and `payment_id` start empty and are recorded by handlers
/// once the request body has been parsed.
pub fn request_span(route: &str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "request",
        route = %route,
        trace_id = %trace_id,
        learner_id = field::Empty,
        payment_id = field::Empty
    )
}

/// Child span; inherits the trace id from the current root.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("step", name = %name)
}
