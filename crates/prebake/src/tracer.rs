//! Interpretation tracing infrastructure.
//!
//! Trait-based hooks at key interpretation events with zero-cost abstraction:
//! the realm is generic over its tracer, so [`NoopTracer`] compiles away
//! entirely, the same way [`NoLimitTracker`](crate::resource::NoLimitTracker)
//! eliminates resource checking overhead.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable interpretation log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |

use crate::ast::CodeRange;

/// Trace event emitted during interpretation.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// A statement was dispatched.
    Statement {
        /// Node-kind string of the statement.
        kind: &'static str,
        range: CodeRange,
    },
    /// A function call pushed an execution context.
    Call {
        /// Function name, if known.
        name: Option<String>,
        /// Context stack depth after the push.
        depth: usize,
    },
    /// A function return popped an execution context.
    Return { depth: usize },
    /// A residual effect entry was recorded.
    Effect { kind: &'static str },
    /// A control-flow join over an abstract condition.
    Join { range: CodeRange },
    /// A speculative effect-capture frame was opened (`true`) or closed.
    Speculation { entered: bool },
}

/// Hook points invoked by the abstract interpreter.
///
/// All methods have empty default bodies so implementations only override what
/// they need.
pub trait EvalTracer {
    fn on_statement(&mut self, kind: &'static str, range: CodeRange) {
        let _ = (kind, range);
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        let _ = (name, depth);
    }

    fn on_return(&mut self, depth: usize) {
        let _ = depth;
    }

    fn on_effect(&mut self, kind: &'static str) {
        let _ = kind;
    }

    fn on_join(&mut self, range: CodeRange) {
        let _ = range;
    }

    fn on_speculation(&mut self, entered: bool) {
        let _ = entered;
    }
}

/// Zero-cost tracer: every hook is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Logs every event to stderr, one line per event.
#[derive(Debug, Default)]
pub struct StderrTracer {
    depth: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }
}

impl EvalTracer for StderrTracer {
    fn on_statement(&mut self, kind: &'static str, range: CodeRange) {
        eprintln!("{}stmt {kind} @{}:{}", self.indent(), range.start.line, range.start.column);
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        eprintln!("{}call {} (depth {depth})", self.indent(), name.unwrap_or("<anonymous>"));
        self.depth = depth;
    }

    fn on_return(&mut self, depth: usize) {
        self.depth = depth;
        eprintln!("{}return (depth {depth})", self.indent());
    }

    fn on_effect(&mut self, kind: &'static str) {
        eprintln!("{}effect {kind}", self.indent());
    }

    fn on_join(&mut self, range: CodeRange) {
        eprintln!("{}join @{}:{}", self.indent(), range.start.line, range.start.column);
    }

    fn on_speculation(&mut self, entered: bool) {
        eprintln!("{}speculation {}", self.indent(), if entered { "enter" } else { "leave" });
    }
}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl EvalTracer for RecordingTracer {
    fn on_statement(&mut self, kind: &'static str, range: CodeRange) {
        self.events.push(TraceEvent::Statement { kind, range });
    }

    fn on_call(&mut self, name: Option<&str>, depth: usize) {
        self.events.push(TraceEvent::Call {
            name: name.map(str::to_owned),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_effect(&mut self, kind: &'static str) {
        self.events.push(TraceEvent::Effect { kind });
    }

    fn on_join(&mut self, range: CodeRange) {
        self.events.push(TraceEvent::Join { range });
    }

    fn on_speculation(&mut self, entered: bool) {
        self.events.push(TraceEvent::Speculation { entered });
    }
}
