//! Abstract-value injection, residual effects, and control-flow joins.

use prebake::{ErrorCode, PrebakeError, PrebakeOptions, SourceFile, prebake_sources};

fn bake(code: &str) -> String {
    let sources = [SourceFile::script(code, "test.js")];
    prebake_sources(&sources, &PrebakeOptions::default())
        .expect("prebake failed")
        .code
}

fn bake_err(code: &str) -> PrebakeError {
    let sources = [SourceFile::script(code, "test.js")];
    prebake_sources(&sources, &PrebakeOptions::default()).expect_err("expected prebake to fail")
}

/// for-in over a non-simple abstract object is an introspection error with
/// the stable PP0013 code.
#[test]
fn for_in_over_abstract_object_is_rejected() {
    let error = bake_err("var o = __abstract(\"object\", \"obj\"); for (var k in o) {} ;");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(
        diagnostics.iter().any(|d| d.code == ErrorCode::UnsupportedForIn),
        "diagnostics were: {diagnostics:?}"
    );
}

/// The copy-loop shape over a simple partial object residualizes as a
/// `for-in` loop (plus build-time copies of any known keys).
#[test]
fn simple_partial_for_in_residualizes() {
    let code = bake("var o = __abstract_simple_partial(\"src\"); var t = {}; for (var k in o) { t[k] = o[k]; }");
    assert!(code.contains("for (var k in src) {"), "output was:\n{code}");
    assert!(code.contains("t[k] = src[k];"), "output was:\n{code}");
    assert!(code.contains("var t = {};"), "output was:\n{code}");
}

/// Known keys of the iterated partial object are also copied at build time.
#[test]
fn simple_partial_for_in_copies_known_keys() {
    let code = bake(
        "var o = __abstract_simple_partial(\"src\"); o.known = 5; var t = {}; for (var k in o) { t[k] = o[k]; }",
    );
    assert!(code.contains("t.known = 5;"), "output was:\n{code}");
    assert!(code.contains("for (var k in src)"), "output was:\n{code}");
}

/// Any other for-in body shape over a partial object is rejected.
#[test]
fn partial_for_in_with_other_body_is_rejected() {
    let error = bake_err("var o = __abstract_simple_partial(\"src\"); var n = 0; for (var k in o) { n = n + 1; }");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(diagnostics.iter().any(|d| d.code == ErrorCode::UnsupportedForIn));
}

/// Reads of unknown keys on a partial object become residual declarations.
#[test]
fn partial_reads_residualize() {
    let code = bake("var o = __abstract_simple_partial(\"cfg\"); var mode = o.mode; mode;");
    assert!(code.contains("cfg.mode"), "output was:\n{code}");
}

/// A pure derived value that nothing needs is dropped entirely.
#[test]
fn unused_pure_reads_are_dropped() {
    let code = bake("var o = __abstract_simple_partial(\"cfg\"); o.unused; 1;");
    assert!(!code.contains("unused"), "output was:\n{code}");
}

/// Writes to a partial object survive as residual assignments.
#[test]
fn partial_writes_residualize() {
    let code = bake("var o = __abstract_simple_partial(\"cfg\"); o.ready = true;");
    assert!(code.contains("cfg.ready = true;"), "output was:\n{code}");
}

/// Branching on an abstract condition joins both sides into a conditional
/// value.
#[test]
fn abstract_branch_joins_values() {
    let code = bake("var c = __abstract(\"boolean\", \"flag\"); var x; if (c) { x = 1; } else { x = 2; }");
    assert!(code.contains("var x = flag ? 1 : 2;"), "output was:\n{code}");
}

/// A switch over an abstract discriminant joins the selected clauses against
/// the rest of the case block under the comparison condition.
#[test]
fn abstract_switch_joins() {
    let code = bake(
        "var d = __abstract(\"number\", \"n\"); var x;\
         switch (d) {\
           case 1: x = \"one\"; break;\
           default: x = \"other\";\
         }",
    );
    assert!(code.contains("var x = n === 1 ? \"one\" : \"other\";"), "output was:\n{code}");
}

/// Effects inside abstract switch clauses re-emit under the comparison
/// condition.
#[test]
fn abstract_switch_effects_are_guarded() {
    let code = bake(
        "var d = __abstract(\"number\", \"n\");\
         switch (d) {\
           case 1: console.log(\"one\"); break;\
           default: console.log(\"other\");\
         }",
    );
    assert!(code.contains("if (n === 1) {"), "output was:\n{code}");
    assert!(code.contains("console.log(\"one\");"), "output was:\n{code}");
    assert!(code.contains("console.log(\"other\");"), "output was:\n{code}");
}

/// Effects inside abstract branches re-emit under the branch condition.
#[test]
fn abstract_branch_effects_are_guarded() {
    let code = bake("var c = __abstract(\"boolean\", \"flag\"); if (c) { console.log(\"taken\"); }");
    assert!(code.contains("if (flag) {"), "output was:\n{code}");
    assert!(code.contains("console.log(\"taken\");"), "output was:\n{code}");
}

/// A branch that throws under an abstract condition re-materializes the
/// throw guarded by that condition; state written after the join stays
/// conditional on not having thrown.
#[test]
fn conditional_throw_is_residualized() {
    let code = bake("var c = __abstract(\"boolean\", \"flag\"); if (c) { throw new Error(\"bad\"); } var x = 1;");
    assert!(code.contains("if (flag) {"), "output was:\n{code}");
    assert!(code.contains("throw new Error(\"bad\");"), "output was:\n{code}");
    assert!(code.contains("var x = flag ? void 0 : 1;"), "output was:\n{code}");
}

/// Both branches throwing different error kinds cannot be joined.
#[test]
fn mixed_error_kind_join_is_rejected() {
    let error = bake_err(
        "var c = __abstract(\"boolean\", \"flag\");\
         if (c) { throw new TypeError(\"a\"); } else { throw new RangeError(\"b\"); }",
    );
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(diagnostics.iter().any(|d| d.code == ErrorCode::UnsupportedCompletionJoin));
}

/// Both branches throwing the same kind join; a catch then sees the
/// conditional error value.
#[test]
fn same_kind_throws_join() {
    let code = bake(
        "var c = __abstract(\"boolean\", \"flag\"); var x;\
         try { if (c) { throw new Error(\"a\"); } else { throw new Error(\"b\"); } } catch (e) { x = 1; }",
    );
    assert!(code.contains("var x = 1;"), "output was:\n{code}");
}

/// Calls through an abstract callee residualize with a declared result.
#[test]
fn abstract_calls_residualize() {
    let code = bake("var f = __abstract(\"function\", \"hook\"); var r = f(1, 2); 0;");
    assert!(code.contains("hook(1, 2)"), "output was:\n{code}");
}

/// typeof over an abstract value refines through the types domain without
/// residual code.
#[test]
fn typeof_refines_through_domains() {
    let code = bake("var n = __abstract(\"number\", \"count\"); var isNumber = typeof n === \"number\"; isNumber;");
    assert!(code.contains("var isNumber = true;"), "output was:\n{code}");
}

/// Arithmetic over abstract operands re-materializes as the operation
/// expression.
#[test]
fn abstract_arithmetic_residualizes() {
    let code = bake("var n = __abstract(\"number\", \"count\"); var m = n + 1; m;");
    assert!(code.contains("count + 1"), "output was:\n{code}");
}

/// Derived number declarations carry a runtime typeof invariant so a
/// mis-modeled intrinsic fails loudly in the produced program.
#[test]
fn math_on_abstract_emits_invariant() {
    let code = bake("var n = __abstract(\"number\", \"count\"); var f = Math.floor(n); f;");
    assert!(code.contains("Math.floor"), "output was:\n{code}");
    assert!(code.contains("typeof"), "output was:\n{code}");
    assert!(code.contains("!== \"number\""), "output was:\n{code}");
}

/// Loop guards that depend on abstract data abort with a diagnostic.
#[test]
fn abstract_loop_guard_is_rejected() {
    let error = bake_err("var c = __abstract(\"boolean\", \"flag\"); while (c) { }");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(diagnostics.iter().any(|d| d.code == ErrorCode::UnsupportedAbstractLoopGuard));
}

/// An unknown type name for `__abstract` is a distinct diagnostic.
#[test]
fn unknown_abstract_type_is_rejected() {
    let error = bake_err("var o = __abstract(\"wibble\", \"x\");");
    let PrebakeError::Fatal(diagnostics) = error else {
        panic!("expected a fatal error");
    };
    assert!(diagnostics.iter().any(|d| d.code == ErrorCode::UnknownAbstractType));
}

/// Strict mode: assignment to an undeclared name throws a reference error
/// instead of silently creating a global.
#[test]
fn strict_undeclared_assignment_throws() {
    let code = bake("\"use strict\"; try { undeclared = 1; } catch (e) { var caught = true; } caught;");
    assert!(code.contains("var caught = true;"), "output was:\n{code}");
}

/// Under a partial global, unknown global reads and writes become residual.
#[test]
fn partial_global_reads_and_writes() {
    let sources = [SourceFile::script("someHostGlobal = someOtherHostGlobal;", "test.js")];
    let options = PrebakeOptions {
        partial_global: true,
        ..PrebakeOptions::default()
    };
    let output = prebake_sources(&sources, &options).expect("prebake failed");
    assert!(output.code.contains("someOtherHostGlobal"), "output was:\n{}", output.code);
    assert!(output.code.contains("someHostGlobal"), "output was:\n{}", output.code);
}
