#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "the environment and generator contracts carry operations not every build reaches")]

mod abstract_value;
mod ast;
mod coerce;
mod completion;
mod diagnostics;
mod effects;
mod environment;
mod eval;
mod generator;
mod heap;
mod intern;
mod intrinsics;
mod names;
mod parse;
mod printer;
mod properties;
mod realm;
mod reference;
mod residualize;
mod resource;
mod run;
mod tracer;
mod value;

pub use crate::{
    ast::{CodeRange, Pos, SourceId},
    diagnostics::{CollectDiagnostics, Diagnostic, DiagnosticHandler, ErrorCode, FatalError, Severity},
    heap::{HeapDiff, HeapStats},
    parse::{ParseError, SourceKind},
    printer::SourceMap,
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    run::{PrebakeError, PrebakeOptions, PrebakeOutput, SourceFile, prebake_sources, prebake_sources_with},
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
