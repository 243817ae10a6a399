mod common;

use bundler_core::{
    bundle, ErrorCode, OutputFormat, OutputOptions, PreserveSignature,
};
use common::memory_options;
use pretty_assertions::assert_eq;

fn es_output() -> OutputOptions {
    OutputOptions {
        format: OutputFormat::Es,
        ..Default::default()
    }
}

#[test]
fn minimal_chain_shakes_unused_exports() {
    let options = memory_options(
        &[
            ("/a.js", "import { x } from './b.js';\nconsole.log(x);"),
            ("/b.js", "export const x = 1;\nexport const y = 2;"),
        ],
        &["/a.js"],
    );
    let built = bundle(options).unwrap();
    let output = built.generate(&es_output()).unwrap();

    let chunks: Vec<_> = output.chunks().collect();
    assert_eq!(chunks.len(), 1);
    let chunk = chunks[0];
    assert!(chunk.code.contains("const x = 1"));
    assert!(chunk.code.contains("console.log(x)"));
    assert!(!chunk.code.contains("y = 2"));
    assert!(chunk.imports.is_empty());
    assert!(!chunk.code.contains("import"));
}

#[test]
fn dynamic_import_splits_and_references_final_file_name() {
    let options = memory_options(
        &[
            ("/a.js", "import('./b.js').then(m => m.x());"),
            ("/b.js", "export function x() { return 1; }"),
        ],
        &["/a.js"],
    );
    let built = bundle(options).unwrap();
    let output = built.generate(&es_output()).unwrap();

    let chunks: Vec<_> = output.chunks().collect();
    assert_eq!(chunks.len(), 2);

    let entry = chunks.iter().find(|c| c.is_entry).expect("entry chunk");
    let dynamic = chunks
        .iter()
        .find(|c| c.is_dynamic_entry)
        .expect("dynamic chunk");

    // the rewritten import specifier must equal the dynamic chunk's
    // final file name
    assert!(
        entry.code.contains(&format!("import('./{}')", dynamic.file_name)),
        "entry code should import {}, got:\n{}",
        dynamic.file_name,
        entry.code
    );
    assert!(dynamic.exports.contains(&"x".to_string()));
    assert!(dynamic.code.contains("function x()"));
}

#[test]
fn constant_folded_branch_removes_call_and_import() {
    let options = memory_options(
        &[
            (
                "/a.js",
                "import { sideEffect } from './fx.js';\nconst F = false;\nif (F) sideEffect();\nexport const v = 1;",
            ),
            (
                "/fx.js",
                "export function sideEffect() { globalThis.touched = true; }",
            ),
        ],
        &["/a.js"],
    );
    let built = bundle(options).unwrap();
    let output = built.generate(&es_output()).unwrap();

    let chunks: Vec<_> = output.chunks().collect();
    assert_eq!(chunks.len(), 1);
    let chunk = chunks[0];
    assert!(!chunk.code.contains("sideEffect"));
    assert!(chunk.code.contains("v = 1"));
    assert!(chunk.exports.contains(&"v".to_string()));
    assert!(chunk.imports.is_empty());
}

#[test]
fn strict_entry_signatures_get_exact_facades_over_a_shared_chunk() {
    let mut options = memory_options(
        &[
            ("/a.js", "export { x } from './shared.js';"),
            ("/b.js", "export { y } from './shared.js';"),
            (
                "/shared.js",
                "export const x = 1;\nexport const y = 2;",
            ),
        ],
        &["/a.js", "/b.js"],
    );
    options.preserve_entry_signatures = PreserveSignature::Strict;
    let built = bundle(options).unwrap();
    let output = built.generate(&es_output()).unwrap();

    let entry_a = output
        .chunks()
        .find(|c| c.facade_module_id.as_deref() == Some("/a.js"))
        .expect("facade for /a.js");
    let entry_b = output
        .chunks()
        .find(|c| c.facade_module_id.as_deref() == Some("/b.js"))
        .expect("facade for /b.js");

    assert_eq!(entry_a.exports, vec!["x".to_string()]);
    assert_eq!(entry_b.exports, vec!["y".to_string()]);

    // one common chunk holds the shared module
    let shared = output
        .chunks()
        .find(|c| c.modules.contains(&"/shared.js".to_string()))
        .expect("shared chunk");
    assert!(shared.code.contains("const x = 1"));
    assert!(shared.code.contains("const y = 2"));
}

#[test]
fn import_cycles_build_with_one_canonical_warning() {
    let options = memory_options(
        &[
            (
                "/a.js",
                "import { b } from './b.js';\nexport const a = 1;\nconsole.log(b);",
            ),
            (
                "/b.js",
                "import { a } from './a.js';\nexport const b = a + 1;",
            ),
        ],
        &["/a.js"],
    );
    let built = bundle(options).unwrap();
    let warnings = built.warnings();
    let cycles: Vec<_> = warnings
        .iter()
        .filter(|w| w.code == ErrorCode::CircularDependency)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].message, "/a.js -> /b.js -> /a.js");

    // the build still renders
    let output = built.generate(&es_output()).unwrap();
    assert_eq!(output.chunks().count(), 1);
}

#[test]
fn unresolved_bare_imports_become_external_with_a_warning() {
    let options = memory_options(
        &[(
            "/a.js",
            "import 'missing-pkg';\nexport const k = 1;",
        )],
        &["/a.js"],
    );
    let built = bundle(options).unwrap();
    assert!(built
        .warnings()
        .iter()
        .any(|w| w.code == ErrorCode::UnresolvedImport));

    let output = built.generate(&es_output()).unwrap();
    let chunk = output.chunks().next().unwrap();
    assert!(chunk.code.contains("import 'missing-pkg';"));
    assert!(chunk.imports.contains(&"missing-pkg".to_string()));
}

#[test]
fn unresolved_relative_imports_are_fatal() {
    let options = memory_options(
        &[("/a.js", "import { x } from './missing.js';\nconsole.log(x);")],
        &["/a.js"],
    );
    let error = bundle(options).unwrap_err();
    assert_eq!(error.code, ErrorCode::UnresolvedImport);
}

#[test]
fn unresolved_entries_are_fatal() {
    let options = memory_options(&[], &["/nowhere.js"]);
    let error = bundle(options).unwrap_err();
    assert_eq!(error.code, ErrorCode::UnresolvedEntry);
}
