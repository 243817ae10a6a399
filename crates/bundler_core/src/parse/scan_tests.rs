use pretty_assertions::assert_eq;
use swc_common::{sync::Lrc, Globals, SourceMap};

use crate::module::{ImportedName, LocalExportKind};
use crate::parse::{parse_module, ParsedModule};

fn scan(src: &str) -> ParsedModule {
    let cm = Lrc::<SourceMap>::default();
    let globals = Globals::new();
    parse_module(&cm, &globals, "/test.js", src.to_string(), true).expect("test source parses")
}

#[test]
fn collects_static_import_specifiers_in_order() {
    let parsed = scan("import { a } from './a';\nimport b from './b';\nimport * as c from './c';");
    assert_eq!(parsed.scan.sources, vec!["./a", "./b", "./c"]);

    let imports: Vec<ImportedName> = parsed
        .scan
        .import_descriptions
        .values()
        .map(|d| d.imported.clone())
        .collect();
    assert!(imports.contains(&ImportedName::Name("a".into())));
    assert!(imports.contains(&ImportedName::Default));
    assert!(imports.contains(&ImportedName::Namespace));
}

#[test]
fn records_local_exports() {
    let parsed = scan("export const x = 1;\nconst y = 2;\nexport { y as z };\nexport default y;");
    assert!(parsed.scan.local_exports.contains_key("x"));
    assert!(parsed.scan.local_exports.contains_key("z"));
    match &parsed.scan.local_exports["default"].kind {
        LocalExportKind::Default { local } => assert!(local.is_none()),
        other => panic!("expected default export, got {:?}", other),
    }
}

#[test]
fn records_reexports_and_star_exports() {
    let parsed = scan("export { a as b } from './dep';\nexport * from './star';");
    assert_eq!(parsed.scan.sources, vec!["./dep", "./star"]);
    let reexport = &parsed.scan.reexports["b"];
    assert_eq!(reexport.imported, ImportedName::Name("a".into()));
    assert_eq!(parsed.scan.star_export_sources, vec![1]);
}

#[test]
fn pure_declarations_have_no_effects() {
    let parsed = scan("const a = 1;\nfunction f() { sideEffect(); }\nclass C {}");
    for record in &parsed.scan.statements {
        assert!(!record.has_effects, "statement should be pure: {:?}", record);
    }
}

#[test]
fn calls_and_assignments_are_effects() {
    let parsed = scan("doThing();\nglobalVar = 1;\nconst x = compute();");
    for record in &parsed.scan.statements {
        assert!(record.has_effects);
    }
}

#[test]
fn pure_annotated_calls_are_not_effects() {
    let parsed = scan("const x = /*#__PURE__*/ compute();");
    assert!(!parsed.scan.statements[0].has_effects);
}

#[test]
fn falsy_literal_branch_contributes_nothing() {
    let parsed = scan("import { sideEffect } from './fx';\nif (false) sideEffect();");
    let if_record = &parsed.scan.statements[1];
    assert!(!if_record.has_effects);
    assert!(if_record.references.is_empty());
}

#[test]
fn const_bindings_fold_branch_tests() {
    let parsed = scan(
        "import { sideEffect } from './fx.js';\nconst F = false;\nif (F) sideEffect();\nexport const v = 1;",
    );
    let if_record = &parsed.scan.statements[2];
    assert!(!if_record.has_effects);
    assert!(!if_record
        .references
        .iter()
        .any(|id| id.0.to_string() == "sideEffect"));
}

#[test]
fn truthy_literal_branch_counts() {
    let parsed = scan("if (true) doThing();");
    assert!(parsed.scan.statements[0].has_effects);
}

#[test]
fn references_reach_through_closures() {
    let parsed = scan("const shared = 1;\nexport function use() { return shared; }");
    let fn_record = &parsed.scan.statements[1];
    assert!(fn_record.references.iter().any(|id| id.0.to_string() == "shared"));
}

#[test]
fn detects_top_level_await() {
    let parsed = scan("const data = await fetchData();");
    assert!(parsed.scan.uses_top_level_await);
    // awaits inside functions do not count
    let parsed = scan("async function f() { await x(); }");
    assert!(!parsed.scan.uses_top_level_await);
}

#[test]
fn collects_dynamic_imports() {
    let parsed = scan("import('./lazy').then(m => m.x());\nfunction f() { return import(cond); }");
    assert_eq!(parsed.scan.dynamic_imports.len(), 2);
    assert_eq!(
        parsed.scan.dynamic_imports[0].specifier.as_deref(),
        Some("./lazy")
    );
    assert_eq!(parsed.scan.dynamic_imports[1].specifier, None);
}

#[test]
fn accessed_globals_are_tracked() {
    let parsed = scan("console.log(document.title);");
    let globals = &parsed.scan.statements[0].accessed_globals;
    assert!(globals.contains("console"));
    assert!(globals.contains("document"));
}

#[test]
fn use_strict_directive_is_flagged_not_warned() {
    let parsed = scan("'use strict';\nconst a = 1;");
    assert!(parsed.scan.statements[0].is_directive);
    assert!(parsed.scan.foreign_directives.is_empty());
}

#[test]
fn foreign_directives_are_reported() {
    let parsed = scan("'use asm';\nconst a = 1;");
    assert_eq!(parsed.scan.foreign_directives.len(), 1);
}

#[test]
fn import_meta_file_urls_are_detected() {
    let parsed = scan("const url = import.meta.ROLLUP_FILE_URL_abc123;\nconst m = import.meta.url;");
    assert_eq!(parsed.scan.import_metas.len(), 2);
    assert_eq!(
        parsed.scan.import_metas[0].file_reference.as_deref(),
        Some("abc123")
    );
    assert_eq!(parsed.scan.import_metas[1].file_reference, None);
}

#[test]
fn reassignments_are_recorded() {
    let parsed = scan("export let counter = 0;\nexport function inc() { counter += 1; }");
    assert!(parsed.scan.reassigned.iter().any(|id| id.0.to_string() == "counter"));
}
