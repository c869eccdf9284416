//! Deadline, recursion, and allocation limits.

use std::time::Duration;

use prebake::{
    ErrorCode, PrebakeError, PrebakeOptions, RecordingTracer, ResourceLimits, LimitedTracker, SourceFile, TraceEvent,
    prebake_sources, prebake_sources_with,
};

#[test]
fn deadline_exceedance_is_a_timeout_diagnostic() {
    let options = PrebakeOptions {
        limits: ResourceLimits::new().max_duration(Duration::ZERO),
        ..PrebakeOptions::default()
    };
    let sources = [SourceFile::script(
        "var i = 0; while (i < 1000000) { i = i + 1; }",
        "busy.js",
    )];
    let error = prebake_sources(&sources, &options).expect_err("expected timeout");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(
        diagnostics.iter().any(|d| d.code == ErrorCode::Timeout),
        "diagnostics were: {diagnostics:?}"
    );
}

#[test]
fn runaway_recursion_becomes_a_range_error() {
    let sources = [SourceFile::script("function f() { return f(); } f();", "deep.js")];
    let output = prebake_sources(&sources, &PrebakeOptions::default()).expect("recursion is a model error");
    assert!(
        output.code.contains("new RangeError"),
        "output was:\n{}",
        output.code
    );
}

#[test]
fn allocation_limits_are_enforced() {
    // Generous enough for realm setup, far too small for the loop below.
    let options = PrebakeOptions {
        limits: ResourceLimits::new().max_allocations(60),
        ..PrebakeOptions::default()
    };
    let sources = [SourceFile::script(
        "var xs = []; for (var i = 0; i < 1000; i = i + 1) { xs[i] = {}; }",
        "alloc.js",
    )];
    let error = prebake_sources(&sources, &options).expect_err("expected allocation failure");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(diagnostics.iter().any(|d| d.code == ErrorCode::ResourceLimit));
}

#[test]
fn tracer_observes_interpretation() {
    let sources = [SourceFile::script("function f() { return 1; } var x = f(); console.log(x);", "traced.js")];
    let options = PrebakeOptions::default();
    let tracker = LimitedTracker::new(options.limits.clone());
    let (_, tracer) =
        prebake_sources_with(&sources, &options, tracker, RecordingTracer::new()).expect("prebake failed");
    let events = tracer.into_events();
    assert!(events.iter().any(|e| matches!(e, TraceEvent::Call { .. })));
    assert!(events.iter().any(|e| matches!(e, TraceEvent::Effect { .. })));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TraceEvent::Statement { kind: "VarDeclaration", .. }))
    );
}
