use std::time::Duration;

use tracing::{Span, field};
use uuid::Uuid;

/// Records the ids a handler learns after the root span was opened.
pub fn annotate_span(learner_id: Option<&Uuid>, payment_id: Option<&Uuid>) {
    let span = Span::current();
    if let Some(id) = learner_id {
        span.record("learner_id", field::display(id));
    }
    if let Some(id) = payment_id {
        span.record("payment_id", field::display(id));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
