//! Diagnostics: stable error codes, severities, and the handler contract.
//!
//! Every condition the engine cannot (or will not) model is reported through
//! the realm's [`DiagnosticHandler`] with a stable `PPxxxx` code so hosts can
//! match on it. Fatal diagnostics are followed by a [`FatalError`] sentinel on
//! the exceptional channel, which unwinds interpretation.

use std::fmt;

use crate::ast::CodeRange;

/// Stable diagnostic codes.
///
/// The numeric part never changes meaning once published; codes are
/// user-actionable and matched by tooling, so removed conditions retire their
/// code rather than recycling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr, serde::Serialize)]
pub enum ErrorCode {
    /// Syntax the evaluator has no model for.
    #[strum(serialize = "PP0001")]
    #[serde(rename = "PP0001")]
    UnsupportedSyntax,
    /// `__abstract` called with an unknown type name.
    #[strum(serialize = "PP0002")]
    #[serde(rename = "PP0002")]
    UnknownAbstractType,
    /// An abstract-value helper was called with bad arguments.
    #[strum(serialize = "PP0003")]
    #[serde(rename = "PP0003")]
    InvalidHelperArguments,
    /// `for-in` over a value the engine cannot soundly enumerate.
    #[strum(serialize = "PP0013")]
    #[serde(rename = "PP0013")]
    UnsupportedForIn,
    /// A control-flow join combined two differently abrupt completions under
    /// an abstract condition.
    #[strum(serialize = "PP0019")]
    #[serde(rename = "PP0019")]
    UnsupportedCompletionJoin,
    /// A loop guard was abstract and the loop has no residual form.
    #[strum(serialize = "PP0020")]
    #[serde(rename = "PP0020")]
    UnsupportedAbstractLoopGuard,
    /// A join would have to merge a data descriptor with an accessor
    /// descriptor.
    #[strum(serialize = "PP0021")]
    #[serde(rename = "PP0021")]
    UnsupportedDescriptorJoin,
    /// A function reachable from the final heap captures bindings the
    /// residualizer cannot re-create.
    #[strum(serialize = "PP0022")]
    #[serde(rename = "PP0022")]
    UnsupportedClosureResidualization,
    /// The wall-clock deadline was exceeded.
    #[strum(serialize = "PP0023")]
    #[serde(rename = "PP0023")]
    Timeout,
    /// Property access on a base the engine cannot model soundly.
    #[strum(serialize = "PP0025")]
    #[serde(rename = "PP0025")]
    UnsupportedAbstractAccess,
    /// A resource limit (memory, allocation, recursion) was exceeded.
    #[strum(serialize = "PP0026")]
    #[serde(rename = "PP0026")]
    ResourceLimit,
}

/// How serious a diagnostic is.
///
/// `FatalError` diagnostics unwind interpretation; `RecoverableError` leaves
/// the engine in a consistent state but marks the build failed unless the host
/// chooses otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr, serde::Serialize)]
pub enum Severity {
    FatalError,
    RecoverableError,
    Warning,
    Information,
}

/// A single diagnostic report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Option<CodeRange>,
    pub code: ErrorCode,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, severity: Severity, message: impl Into<String>, location: Option<CodeRange>) -> Self {
        Self {
            message: message.into(),
            location,
            code,
            severity,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.severity, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " ({}:{})", loc.start.line, loc.start.column)?;
        }
        Ok(())
    }
}

/// Sentinel thrown after a fatal diagnostic has been reported.
///
/// Carries no payload: the diagnostic already went to the handler. The
/// top-level driver intercepts this and turns it into a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalError;

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a fatal diagnostic was reported")
    }
}

impl std::error::Error for FatalError {}

/// Receiver for diagnostics produced during interpretation and
/// residualization.
pub trait DiagnosticHandler: fmt::Debug {
    fn handle(&mut self, diagnostic: Diagnostic);

    /// Hands collected diagnostics back to the driver. Handlers that forward
    /// elsewhere may leave this empty.
    fn drain(&mut self) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// Default handler: collects diagnostics for the driver to return.
#[derive(Debug, Default)]
pub struct CollectDiagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl CollectDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl DiagnosticHandler for CollectDiagnostics {
    fn handle(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_stably() {
        assert_eq!(ErrorCode::UnsupportedForIn.to_string(), "PP0013");
        assert_eq!(ErrorCode::Timeout.to_string(), "PP0023");
        let code: &'static str = ErrorCode::UnsupportedSyntax.into();
        assert_eq!(code, "PP0001");
    }

    #[test]
    fn collect_handler_accumulates() {
        let mut handler = CollectDiagnostics::new();
        handler.handle(Diagnostic::new(
            ErrorCode::UnsupportedForIn,
            Severity::FatalError,
            "for-in over a non-simple object",
            None,
        ));
        assert_eq!(handler.as_slice().len(), 1);
        assert_eq!(handler.as_slice()[0].code, ErrorCode::UnsupportedForIn);
    }
}
