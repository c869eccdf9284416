//! The parser contract: failures surface as error-kind-tagged diagnostics.

use prebake::{PrebakeError, PrebakeOptions, SourceFile, SourceKind, prebake_sources};

fn bake_err(source: SourceFile) -> PrebakeError {
    prebake_sources(&[source], &PrebakeOptions::default()).expect_err("expected failure")
}

#[test]
fn syntax_errors_are_reported_with_location() {
    let error = bake_err(SourceFile::script("var = 1;", "bad.js"));
    let PrebakeError::Parse(diagnostic) = error else {
        panic!("expected a parse error");
    };
    assert!(diagnostic.message.starts_with("SyntaxError:"), "message was: {}", diagnostic.message);
    assert!(diagnostic.location.is_some());
}

#[test]
fn invalid_assignment_targets_are_reference_errors() {
    let error = bake_err(SourceFile::script("1 = 2;", "bad.js"));
    let PrebakeError::Parse(diagnostic) = error else {
        panic!("expected a parse error");
    };
    assert!(
        diagnostic.message.starts_with("ReferenceError:"),
        "message was: {}",
        diagnostic.message
    );
}

#[test]
fn unsupported_statements_are_syntax_errors() {
    for source in ["with (o) { }", "class C { }", "const x = 1;"] {
        let error = bake_err(SourceFile::script(source, "bad.js"));
        assert!(matches!(error, PrebakeError::Parse(_)), "source was: {source}");
    }
}

#[test]
fn start_line_offsets_locations() {
    let source = SourceFile {
        code: "var =".to_owned(),
        name: "embedded.js".to_owned(),
        kind: SourceKind::Script,
        start_line: 10,
    };
    let error = bake_err(source);
    let PrebakeError::Parse(diagnostic) = error else {
        panic!("expected a parse error");
    };
    let location = diagnostic.location.expect("location");
    assert_eq!(location.start.line, 10);
}

#[test]
fn modules_are_strict_by_default() {
    // Sloppy-mode implicit globals throw under module strictness.
    let source = SourceFile::module("implicitGlobal = 1;", "mod.js");
    let result = prebake_sources(&[source], &PrebakeOptions::default()).expect("prebake succeeds");
    assert!(
        result.code.contains("throw new ReferenceError"),
        "output was:\n{}",
        result.code
    );
}
