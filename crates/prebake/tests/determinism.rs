//! Determinism, idempotence, and identifier-allocation properties.

use prebake::{PrebakeOptions, SourceFile, prebake_sources};
use pretty_assertions::assert_eq;

fn bake_with(code: &str, options: &PrebakeOptions) -> String {
    let sources = [SourceFile::script(code, "test.js")];
    prebake_sources(&sources, options).expect("prebake failed").code
}

const INPUT: &str = "var o = __abstract_simple_partial(\"cfg\");\
                     var mode = o.mode;\
                     var box = { value: mode };\
                     console.log(\"ready\");";

/// Two invocations on the same input produce byte-identical output.
#[test]
fn output_is_deterministic() {
    let options = PrebakeOptions::default();
    let first = bake_with(INPUT, &options);
    let second = bake_with(INPUT, &options);
    assert_eq!(first, second);
}

/// The unique suffix tags every generated identifier.
#[test]
fn unique_suffix_tags_generated_names() {
    let options = PrebakeOptions {
        unique_suffix: Some("$9".to_owned()),
        ..PrebakeOptions::default()
    };
    let code = bake_with(INPUT, &options);
    assert!(code.contains("_0$9"), "output was:\n{code}");
}

/// Debug names carry a provenance fragment.
#[test]
fn debug_names_carry_provenance() {
    let options = PrebakeOptions {
        debug_names: true,
        ..PrebakeOptions::default()
    };
    let code = bake_with(INPUT, &options);
    // The partial read is tagged with its abstract kind.
    assert!(code.contains('$'), "output was:\n{code}");
}

/// Re-residualizing the output of a fully concrete program is a fixed point.
#[test]
fn idempotent_on_concrete_programs() {
    let options = PrebakeOptions::default();
    for input in [
        "var x = 1 + 2; x;",
        "var a = {}; a.x = 1; a.x = 2;",
        "var xs = [1, 2, 3];",
        "function inc(x) { return x + 1; } var y = inc(41);",
    ] {
        let once = bake_with(input, &options);
        let twice = bake_with(&once, &options);
        assert_eq!(bake_with(&twice, &options), twice, "not a fixed point for: {input}");
    }
}

/// Generated identifiers never collide with names the program already uses.
#[test]
fn generated_names_avoid_program_names() {
    let code = bake_with(
        "var _0 = 7; var o = __abstract_simple_partial(\"cfg\"); var r = o.field; r;",
        &PrebakeOptions::default(),
    );
    assert!(code.contains("var _0 = 7;"), "output was:\n{code}");
    // The derived declaration picked a different identifier.
    assert!(code.contains("var _1 = cfg.field;"), "output was:\n{code}");
}

/// Source maps are emitted on request and reference the input file.
#[test]
fn source_maps_reference_inputs() {
    let options = PrebakeOptions {
        source_maps: true,
        ..PrebakeOptions::default()
    };
    let sources = [SourceFile::script("console.log(\"hi\");", "startup.js")];
    let output = prebake_sources(&sources, &options).expect("prebake failed");
    let map = output.map.expect("source map requested");
    assert_eq!(map.version, 3);
    assert_eq!(map.sources, vec!["startup.js".to_owned()]);
    assert!(!map.mappings.is_empty());
}
