//! End-to-end residualization of fully concrete programs.
//!
//! For these inputs no abstract data is involved, so everything folds into
//! the final heap and the output is pure re-materialized state.

use prebake::{PrebakeOptions, SourceFile, prebake_sources};
use pretty_assertions::assert_eq;

fn bake(code: &str) -> String {
    let sources = [SourceFile::script(code, "test.js")];
    prebake_sources(&sources, &PrebakeOptions::default())
        .expect("prebake failed")
        .code
}

/// Constant arithmetic folds away; the completion value survives as a
/// literal.
#[test]
fn constant_folding_bakes_in() {
    let code = bake("var x = 1 + 2; x;");
    assert_eq!(code, "var x = 3;\n3;\n");
}

/// Redundant writes collapse through heap folding: only the final value of
/// `a.x` appears, as a single assignment.
#[test]
fn redundant_writes_are_eliminated() {
    let code = bake("var a = {}; a.x = 1; a.x = 2;");
    assert_eq!(code, "var a = {};\na.x = 2;\n2;\n");
}

/// A top-level throw re-materializes verbatim.
#[test]
fn top_level_throw_is_residualized() {
    let code = bake("throw new Error(\"boom\");");
    assert_eq!(code, "throw new Error(\"boom\");\n");
}

/// `console.log` is an observable effect: exactly one call survives.
#[test]
fn console_log_is_preserved() {
    let code = bake("console.log(\"hi\");");
    assert_eq!(code.matches("console.log(\"hi\")").count(), 1);
}

/// Work before an observable effect still folds.
#[test]
fn computation_feeding_console_log_folds() {
    let code = bake("var n = 20 + 1; console.log(n * 2);");
    assert!(code.contains("console.log(42)"), "output was:\n{code}");
    assert!(!code.contains("21 * 2"), "output was:\n{code}");
}

/// String concatenation and built-in math fold at build time.
#[test]
fn string_and_math_folding() {
    let code = bake("var greeting = \"hello \" + \"world\"; var n = Math.floor(3.7); greeting;");
    assert!(code.contains("var greeting = \"hello world\";"), "output was:\n{code}");
    assert!(code.contains("var n = 3;"), "output was:\n{code}");
}

/// Function calls execute at build time; the function itself survives only
/// because it stays reachable from the global scope.
#[test]
fn function_calls_fold() {
    let code = bake("function inc(x) { return x + 1; } var y = inc(41);");
    assert!(code.contains("var y = 42;"), "output was:\n{code}");
    assert!(code.contains("function inc(x)"), "output was:\n{code}");
}

/// Conditionals with concrete guards execute only the chosen branch.
#[test]
fn concrete_branches_fold() {
    let code = bake("var x; if (1 < 2) { x = \"yes\"; } else { x = \"no\"; }");
    assert!(code.contains("var x = \"yes\";"), "output was:\n{code}");
    assert!(!code.contains("no"), "output was:\n{code}");
}

/// Loops with concrete guards run to completion at build time.
#[test]
fn concrete_loops_fold() {
    let code = bake("var total = 0; for (var i = 0; i < 5; i = i + 1) { total = total + i; }");
    assert!(code.contains("var total = 10;"), "output was:\n{code}");
    assert!(!code.contains("for ("), "output was:\n{code}");
}

/// Object graphs materialize as shells plus property assignments; cycles are
/// expressed by post-hoc assignment, never forward references.
#[test]
fn cyclic_objects_use_post_hoc_assignment() {
    let code = bake("var a = {}; var b = { other: a }; a.back = b;");
    let a_decl = code.find("var a = {};").expect("a declared");
    let b_decl = code.find("var b = {};").expect("b declared as a shell");
    let back = code.find("a.back = b;").expect("cycle closed by assignment");
    let other = code.find("b.other = a;").expect("b.other assigned");
    assert!(a_decl < back && b_decl < back, "output was:\n{code}");
    assert!(a_decl < other && b_decl < other, "output was:\n{code}");
}

/// Arrays re-materialize as `[]` shells with indexed assignments.
#[test]
fn arrays_rebuild_from_shells() {
    let code = bake("var xs = [1, 2, 3];");
    assert!(code.contains("var xs = [];"), "output was:\n{code}");
    assert!(code.contains("xs[0] = 1;"), "output was:\n{code}");
    assert!(code.contains("xs[2] = 3;"), "output was:\n{code}");
}

/// A switch over a concrete discriminant executes only the selected clauses.
#[test]
fn concrete_switch_folds() {
    let code = bake(
        "var x;\
         switch (1 + 1) {\
           case 1: x = \"one\"; break;\
           case 2: x = \"two\"; break;\
           default: x = \"many\";\
         }",
    );
    assert!(code.contains("var x = \"two\";"), "output was:\n{code}");
    assert!(!code.contains("one"), "output was:\n{code}");
    assert!(!code.contains("many"), "output was:\n{code}");
    assert!(!code.contains("switch"), "output was:\n{code}");
}

/// Clauses without a break fall through to the next clause's body.
#[test]
fn switch_fall_through_folds() {
    let code = bake(
        "var x;\
         switch (1) {\
           case 1: x = \"a\";\
           case 2: x = \"b\"; break;\
           default: x = \"c\";\
         }",
    );
    assert!(code.contains("var x = \"b\";"), "output was:\n{code}");
    assert!(!code.contains("\"c\""), "output was:\n{code}");
}

/// With no matching clause, execution enters the default clause and falls
/// through the clauses after it.
#[test]
fn switch_default_folds() {
    let code = bake(
        "var x;\
         switch (9) {\
           case 1: x = \"one\"; break;\
           default: x = \"other\";\
           case 2: x = \"two\";\
         }",
    );
    assert!(code.contains("var x = \"two\";"), "output was:\n{code}");
}

/// try/catch that handles a concrete throw leaves no residue.
#[test]
fn handled_throw_folds_away() {
    let code = bake("var x; try { throw new Error(\"gone\"); } catch (e) { x = 1; }");
    assert!(code.contains("var x = 1;"), "output was:\n{code}");
    assert!(!code.contains("gone"), "output was:\n{code}");
}

/// finally overrides: the abrupt completion of the finalizer wins.
#[test]
fn finally_override_semantics() {
    let code = bake("function f() { try { return 1; } finally { return 2; } } var r = f();");
    assert!(code.contains("var r = 2;"), "output was:\n{code}");
}

/// The empty program produces empty output.
#[test]
fn empty_program() {
    assert_eq!(bake(""), "");
}

/// An undefined completion value is not emitted.
#[test]
fn undefined_completion_is_dropped() {
    let code = bake("var x = 1;");
    assert!(!code.contains("void 0"), "output was:\n{code}");
}

/// Multiple source files evaluate in order against one shared global.
#[test]
fn multiple_sources_share_the_global() {
    let sources = [
        SourceFile::script("var shared = 2;", "a.js"),
        SourceFile::script("var doubled = shared * 21;", "b.js"),
    ];
    let output = prebake_sources(&sources, &PrebakeOptions::default()).expect("prebake failed");
    assert!(output.code.contains("var doubled = 42;"), "output was:\n{}", output.code);
}

/// Heap statistics are reported alongside the output.
#[test]
fn statistics_are_populated() {
    let sources = [SourceFile::script("var a = {};", "test.js")];
    let output = prebake_sources(&sources, &PrebakeOptions::default()).expect("prebake failed");
    assert!(output.statistics.live_objects > 0);
    assert!(output.statistics.interned_strings > 0);
}
