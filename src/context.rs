use tracing::Span;

/// Caller-supplied tracing context threaded through every store and cache
/// call, in place of a process-wide tracer.
#[derive(Clone, Debug)]
pub struct TraceContext {
    span: Span,
}

impl TraceContext {
    /// Opens a new root span for the named caller.
    pub fn new(caller: &'static str) -> Self {
        Self {
            span: tracing::info_span!("session", caller),
        }
    }

    /// Wraps an existing span, e.g. the span of the request being served.
    pub fn from_span(span: Span) -> Self {
        Self { span }
    }

    /// Uses whatever span is current on this task.
    pub fn current() -> Self {
        Self::from_span(Span::current())
    }

    /// The span this context was created with.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// A child span for one store or cache round trip.
    pub fn child(&self, operation: &'static str) -> Span {
        tracing::debug_span!(parent: &self.span, "store_call", operation)
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::current()
    }
}
