//! Public interface for running the partial evaluator.

use std::fmt;

use crate::{
    ast::SourceId,
    completion::{AbruptCompletion, EvalError},
    diagnostics::{CollectDiagnostics, Diagnostic, ErrorCode, Severity},
    generator::Generator,
    heap::HeapStats,
    parse::{SourceKind, parse},
    printer::{SourceMap, print_program},
    realm::{Realm, RealmFlags},
    residualize::{Residualizer, SourceInfo},
    resource::{LimitedTracker, ResourceLimits, ResourceTracker},
    tracer::{EvalTracer, NoopTracer},
    value::Value,
};

/// One input source file, per the parser contract.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub code: String,
    pub name: String,
    pub kind: SourceKind,
    /// First line number of `code`, for diagnostics pointing at embedded
    /// sources.
    pub start_line: u32,
}

impl SourceFile {
    pub fn script(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            kind: SourceKind::Script,
            start_line: 1,
        }
    }

    pub fn module(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            kind: SourceKind::Module,
            start_line: 1,
        }
    }
}

/// Build configuration.
#[derive(Debug, Clone)]
pub struct PrebakeOptions {
    /// Resource limits; `max_duration` is the interpretation deadline.
    pub limits: ResourceLimits,
    /// Treat the global object as partial (host-provided globals are read and
    /// written residually instead of failing resolution).
    pub partial_global: bool,
    /// Allow the `__abstract` helper family.
    pub allow_abstract_helpers: bool,
    /// Emit runtime `typeof` guards for derived values.
    pub emit_invariants: bool,
    /// Append provenance fragments to generated identifiers.
    pub debug_names: bool,
    /// Per-build unique suffix for generated identifiers; two runs with the
    /// same suffix produce byte-identical output.
    pub unique_suffix: Option<String>,
    /// Emit a source map alongside the code.
    pub source_maps: bool,
}

impl Default for PrebakeOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::new(),
            partial_global: false,
            allow_abstract_helpers: true,
            emit_invariants: true,
            debug_names: false,
            unique_suffix: None,
            source_maps: false,
        }
    }
}

/// A successful build.
#[derive(Debug)]
pub struct PrebakeOutput {
    /// The residual program.
    pub code: String,
    /// Source map, when requested.
    pub map: Option<SourceMap>,
    /// Non-fatal diagnostics reported along the way.
    pub diagnostics: Vec<Diagnostic>,
    /// Final heap statistics, for monitoring.
    pub statistics: HeapStats,
}

/// A failed build.
#[derive(Debug)]
pub enum PrebakeError {
    /// A source file failed to parse.
    Parse(Diagnostic),
    /// Interpretation or residualization hit a fatal diagnostic.
    Fatal(Vec<Diagnostic>),
}

impl fmt::Display for PrebakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(diagnostic) => write!(f, "parse error: {diagnostic}"),
            Self::Fatal(diagnostics) => match diagnostics.iter().find(|d| d.severity == Severity::FatalError) {
                Some(diagnostic) => write!(f, "fatal: {diagnostic}"),
                None => write!(f, "fatal error during partial evaluation"),
            },
        }
    }
}

impl std::error::Error for PrebakeError {}

/// Partially evaluates the given sources and returns the residual program.
///
/// # Example
/// ```
/// use prebake::{PrebakeOptions, SourceFile, prebake_sources};
///
/// let sources = [SourceFile::script("var x = 1 + 2; x;", "startup.js")];
/// let output = prebake_sources(&sources, &PrebakeOptions::default()).unwrap();
/// assert!(output.code.contains("var x = 3;"));
/// ```
pub fn prebake_sources(sources: &[SourceFile], options: &PrebakeOptions) -> Result<PrebakeOutput, PrebakeError> {
    let tracker = LimitedTracker::new(options.limits.clone());
    prebake_sources_with(sources, options, tracker, NoopTracer).map(|(output, NoopTracer)| output)
}

/// Like [`prebake_sources`], with a custom resource tracker and tracer. The
/// tracer is handed back so recorded events can be inspected.
pub fn prebake_sources_with<T: ResourceTracker, Tr: EvalTracer>(
    sources: &[SourceFile],
    options: &PrebakeOptions,
    tracker: T,
    tracer: Tr,
) -> Result<(PrebakeOutput, Tr), PrebakeError> {
    let flags = RealmFlags {
        partial_global: options.partial_global,
        allow_abstract_helpers: options.allow_abstract_helpers,
        emit_invariants: options.emit_invariants,
        debug_names: options.debug_names,
        unique_suffix: options.unique_suffix.clone(),
    };
    let mut realm = match Realm::new(flags, Box::new(CollectDiagnostics::new()), tracker, tracer) {
        Ok(realm) => realm,
        Err(error) => {
            return Err(PrebakeError::Fatal(vec![Diagnostic::new(
                ErrorCode::ResourceLimit,
                Severity::FatalError,
                error.to_string(),
                None,
            )]));
        }
    };

    let mut infos = Vec::with_capacity(sources.len());
    let mut programs = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        infos.push(SourceInfo::new(&source.name, &source.code, source.start_line));
        let source_id = SourceId(u16::try_from(index).expect("too many source files"));
        match parse(&source.code, source_id, source.kind, source.start_line, &mut realm.interns) {
            Ok(program) => programs.push(program),
            Err(error) => {
                let kind = error.error_kind();
                return Err(PrebakeError::Parse(Diagnostic::new(
                    ErrorCode::UnsupportedSyntax,
                    Severity::FatalError,
                    format!("{kind}: {}", error.message),
                    Some(error.range),
                )));
            }
        }
    }

    let mut completion: Option<Value> = None;
    for program in &programs {
        match realm.eval_program(program) {
            Ok(value) => completion = value.or(completion),
            Err(EvalError::Abrupt(abrupt)) => match abrupt {
                AbruptCompletion::Throw { .. } | AbruptCompletion::Joined(_) => {
                    realm.residualize_abrupt_throw(&abrupt);
                    completion = None;
                    break;
                }
                other => {
                    realm.report(
                        ErrorCode::UnsupportedSyntax,
                        Severity::FatalError,
                        &format!("illegal top-level {} completion", other.shape()),
                    );
                    return Err(PrebakeError::Fatal(realm.handler.drain()));
                }
            },
            Err(EvalError::Fatal(_)) => return Err(PrebakeError::Fatal(realm.handler.drain())),
        }
    }

    // A pending conditional throw from a join re-materializes guarded by its
    // condition.
    if let Some(pending) = realm.saved_completion.take() {
        realm.generators.push(Generator::new());
        realm.residualize_abrupt_throw(&pending.abrupt);
        let throw_fragment = realm.generators.pop().expect("generator stack underflow");
        let (consequent, alternate) = if pending.normal_is_consequent {
            (Generator::new(), throw_fragment)
        } else {
            (throw_fragment, Generator::new())
        };
        realm.emit_conditional(pending.condition, consequent, alternate);
    }

    let out_program = match Residualizer::new(&mut realm, &infos, completion).run() {
        Ok(program) => program,
        Err(_) => return Err(PrebakeError::Fatal(realm.handler.drain())),
    };

    let source_names: Option<Vec<String>> = options
        .source_maps
        .then(|| infos.iter().map(|info| info.name.clone()).collect());
    let printed = print_program(&out_program, source_names.as_deref());

    let statistics = realm.heap.stats(&realm.interns);
    let diagnostics = realm.handler.drain();
    Ok((
        PrebakeOutput {
            code: printed.code,
            map: printed.map,
            diagnostics,
            statistics,
        },
        realm.into_tracer(),
    ))
}

impl<T: ResourceTracker, Tr: EvalTracer> Realm<T, Tr> {
    /// Re-materializes a top-level throw (possibly a joined one) on the
    /// active generator.
    pub(crate) fn residualize_abrupt_throw(&mut self, abrupt: &AbruptCompletion) {
        match abrupt {
            AbruptCompletion::Throw { value, loc } => {
                self.current_loc = *loc;
                self.emit_throw(*value);
            }
            AbruptCompletion::Joined(joined) => {
                self.generators.push(Generator::new());
                self.residualize_abrupt_throw(&joined.consequent);
                let consequent = self.generators.pop().expect("generator stack underflow");
                self.generators.push(Generator::new());
                self.residualize_abrupt_throw(&joined.alternate);
                let alternate = self.generators.pop().expect("generator stack underflow");
                self.emit_conditional(joined.condition, consequent, alternate);
            }
            _ => {}
        }
    }
}
