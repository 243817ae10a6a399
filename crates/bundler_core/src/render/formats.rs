use crate::options::{ExportsMode, InteropKind, OutputFormat};
use crate::render::deconflict::{INTEROP_DEFAULT, INTEROP_NAMESPACE, MERGE_NAMESPACES};
use crate::render::interop;

/// One dependency line of a chunk: a sibling chunk or an external.
#[derive(Debug, Clone, Default)]
pub struct ImportSpec {
    /// Path as it appears in the emitted import/require.
    pub path: String,
    pub is_external: bool,
    /// Base object binding (`var dep = require('./dep.js')`); also the
    /// es namespace import name when `namespace_local` is unset.
    pub base_var: Option<String>,
    /// Interop'd default object variable (cjs-like formats).
    pub default_var: Option<String>,
    /// Interop'd namespace variable (cjs-like formats).
    pub namespace_var: Option<String>,
    /// es-like named bindings: (imported name, local alias).
    pub named: Vec<(String, String)>,
    /// es-like default import local.
    pub default_local: Option<String>,
    /// es-like `import * as ns` local.
    pub namespace_local: Option<String>,
    /// Import exists purely for execution order / side effects.
    pub side_effect_only: bool,
    /// iife/umd global the external resolves to.
    pub global_name: Option<String>,
    pub interop: InteropKind,
    /// `export * from` this external: members are merged onto exports.
    pub reexport_star: bool,
}

#[derive(Debug, Clone)]
pub struct ExportSpec {
    pub exported: String,
    /// Expression the export reads from.
    pub local: String,
    /// When re-exporting an external binding under live-binding rules,
    /// the getter body expression.
    pub live_getter: Option<String>,
}

/// Everything a finaliser needs to wrap one rendered chunk body.
pub struct FinalizeInput<'a> {
    pub format: OutputFormat,
    pub body: &'a str,
    pub banner: &'a str,
    pub footer: &'a str,
    pub intro: &'a str,
    pub outro: &'a str,
    pub imports: &'a [ImportSpec],
    pub exports: &'a [ExportSpec],
    pub export_mode: ExportsMode,
    pub name: Option<&'a str>,
    pub extend: bool,
    pub amd_id: Option<&'a str>,
    pub amd_define: &'a str,
    pub uses_top_level_await: bool,
    pub needs_interop_default: bool,
    pub needs_interop_namespace: bool,
    pub needs_merge_namespaces: bool,
    pub es_module_marker: bool,
    pub external_live_bindings: bool,
    /// system format: pre-rendered setter bodies aligned with `imports`.
    pub system_setters: &'a [String],
    /// system/amd: the chunk contains dynamic imports and needs the
    /// module/require parameter.
    pub has_dynamic_imports: bool,
    /// amd/umd/iife/cjs: the chunk accesses import.meta and needs module.
    pub accesses_import_meta: bool,
}

pub fn finalize(input: &FinalizeInput<'_>) -> String {
    match input.format {
        OutputFormat::Es => finalize_es(input),
        OutputFormat::Cjs => finalize_cjs(input),
        OutputFormat::Amd => finalize_amd(input),
        OutputFormat::Umd => finalize_umd(input),
        OutputFormat::Iife => finalize_iife(input),
        OutputFormat::System => finalize_system(input),
    }
}

fn push_addon(out: &mut String, addon: &str) {
    if !addon.is_empty() {
        out.push_str(addon);
        if !addon.ends_with('\n') {
            out.push('\n');
        }
    }
}

fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn helpers_block(input: &FinalizeInput<'_>) -> String {
    let mut out = String::new();
    if input.needs_interop_default {
        out.push_str(&interop::interop_default_helper());
    }
    if input.needs_interop_namespace {
        out.push_str(&interop::interop_namespace_helper());
    }
    if input.needs_merge_namespaces {
        out.push_str(&interop::merge_namespaces_helper());
    }
    out
}

// ---------------------------------------------------------------- es ----

fn finalize_es(input: &FinalizeInput<'_>) -> String {
    let mut out = String::new();
    push_addon(&mut out, input.banner);
    push_addon(&mut out, input.intro);

    for import in input.imports {
        let mut clauses: Vec<String> = Vec::new();
        if let Some(default_local) = &import.default_local {
            clauses.push(default_local.clone());
        }
        if let Some(namespace_local) = &import.namespace_local {
            clauses.push(format!("* as {}", namespace_local));
        }
        if !import.named.is_empty() {
            let named: Vec<String> = import
                .named
                .iter()
                .map(|(imported, local)| {
                    if imported == local {
                        imported.clone()
                    } else {
                        format!("{} as {}", imported, local)
                    }
                })
                .collect();
            clauses.push(format!("{{ {} }}", named.join(", ")));
        }
        if clauses.is_empty() {
            if import.reexport_star {
                out.push_str(&format!("export * from {};\n", quote(&import.path)));
            } else {
                out.push_str(&format!("import {};\n", quote(&import.path)));
            }
        } else {
            out.push_str(&format!(
                "import {} from {};\n",
                clauses.join(", "),
                quote(&import.path)
            ));
            if import.reexport_star {
                out.push_str(&format!("export * from {};\n", quote(&import.path)));
            }
        }
    }
    if !input.imports.is_empty() {
        out.push('\n');
    }

    out.push_str(input.body);

    if !input.exports.is_empty() {
        let entries: Vec<String> = input
            .exports
            .iter()
            .map(|export| {
                if export.local == export.exported {
                    export.exported.clone()
                } else {
                    format!("{} as {}", export.local, export.exported)
                }
            })
            .collect();
        out.push_str(&format!("\nexport {{ {} }};\n", entries.join(", ")));
    }

    push_addon(&mut out, input.outro);
    push_addon(&mut out, input.footer);
    out
}

// --------------------------------------------------------------- cjs ----

fn import_lines_cjs(input: &FinalizeInput<'_>) -> String {
    let mut out = String::new();
    for import in input.imports {
        match &import.base_var {
            Some(base) => {
                out.push_str(&format!("var {} = require({});\n", base, quote(&import.path)))
            }
            None => out.push_str(&format!("require({});\n", quote(&import.path))),
        }
    }
    for import in input.imports {
        if let Some(default_var) = &import.default_var {
            let base = import.base_var.as_deref().unwrap_or_default();
            out.push_str(&format!(
                "var {} = /*#__PURE__*/{}({});\n",
                default_var, INTEROP_DEFAULT, base
            ));
        }
        if let Some(namespace_var) = &import.namespace_var {
            let base = import.base_var.as_deref().unwrap_or_default();
            out.push_str(&format!(
                "var {} = /*#__PURE__*/{}({});\n",
                namespace_var, INTEROP_NAMESPACE, base
            ));
        }
    }
    out
}

fn export_block_object_style(input: &FinalizeInput<'_>, target: &str) -> String {
    let mut out = String::new();
    match input.export_mode {
        ExportsMode::Default => {
            if let Some(export) = input.exports.iter().find(|e| e.exported == "default") {
                out.push_str(&format!("module.exports = {};\n", export.local));
            }
        }
        _ => {
            for export in input.exports {
                match (&export.live_getter, input.external_live_bindings) {
                    (Some(getter), true) => {
                        out.push_str(&format!(
                            "Object.defineProperty({}, {}, {{\n  enumerable: true,\n  get: function () {{ return {}; }}\n}});\n",
                            target,
                            quote(&export.exported),
                            getter
                        ));
                    }
                    _ => out.push_str(&format!(
                        "{}.{} = {};\n",
                        target, export.exported, export.local
                    )),
                }
            }
        }
    }
    for import in input.imports.iter().filter(|i| i.reexport_star) {
        let source = import
            .namespace_var
            .clone()
            .or_else(|| import.base_var.clone())
            .unwrap_or_default();
        out.push_str(&format!(
            "{}([{}, {}]);\n",
            MERGE_NAMESPACES, target, source
        ));
    }
    out
}

fn finalize_cjs(input: &FinalizeInput<'_>) -> String {
    let mut out = String::new();
    push_addon(&mut out, input.banner);
    out.push_str("'use strict';\n\n");
    if input.export_mode == ExportsMode::Named && input.es_module_marker && !input.exports.is_empty()
    {
        out.push_str("Object.defineProperty(exports, '__esModule', { value: true });\n\n");
    }
    push_addon(&mut out, input.intro);
    out.push_str(&helpers_block(input));
    out.push_str(&import_lines_cjs(input));
    if !input.imports.is_empty() {
        out.push('\n');
    }
    out.push_str(input.body);
    let exports_block = export_block_object_style(input, "exports");
    if !exports_block.is_empty() {
        out.push('\n');
        out.push_str(&exports_block);
    }
    push_addon(&mut out, input.outro);
    push_addon(&mut out, input.footer);
    out
}

// --------------------------------------------------------------- amd ----

fn finalize_amd(input: &FinalizeInput<'_>) -> String {
    let mut deps: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if input.has_dynamic_imports {
        deps.push(quote("require"));
        params.push("require".to_string());
    }
    if !input.exports.is_empty() || input.imports.iter().any(|i| i.reexport_star) {
        deps.push(quote("exports"));
        params.push("exports".to_string());
    }
    if input.accesses_import_meta {
        deps.push(quote("module"));
        params.push("module".to_string());
    }
    for import in input.imports {
        deps.push(quote(&import.path));
        params.push(import.base_var.clone().unwrap_or_else(|| "_unused".to_string()));
    }

    let id = input
        .amd_id
        .map(|id| format!("{}, ", quote(id)))
        .unwrap_or_default();

    let mut inner = String::new();
    inner.push_str("'use strict';\n\n");
    push_addon(&mut inner, input.intro);
    inner.push_str(&helpers_block(input));
    for import in input.imports {
        if let Some(default_var) = &import.default_var {
            let base = import.base_var.as_deref().unwrap_or_default();
            inner.push_str(&format!(
                "var {} = /*#__PURE__*/{}({});\n",
                default_var, INTEROP_DEFAULT, base
            ));
        }
        if let Some(namespace_var) = &import.namespace_var {
            let base = import.base_var.as_deref().unwrap_or_default();
            inner.push_str(&format!(
                "var {} = /*#__PURE__*/{}({});\n",
                namespace_var, INTEROP_NAMESPACE, base
            ));
        }
    }
    inner.push_str(input.body);
    let exports_block = export_block_object_style(input, "exports");
    if !exports_block.is_empty() {
        inner.push('\n');
        inner.push_str(&exports_block);
    }
    push_addon(&mut inner, input.outro);

    let mut out = String::new();
    push_addon(&mut out, input.banner);
    out.push_str(&format!(
        "{}({}[{}], (function ({}) {{\n{}\n}}));\n",
        input.amd_define,
        id,
        deps.join(", "),
        params.join(", "),
        inner.trim_end()
    ));
    push_addon(&mut out, input.footer);
    out
}

// -------------------------------------------------------------- iife ----

fn finalize_iife(input: &FinalizeInput<'_>) -> String {
    let has_exports = !input.exports.is_empty();
    let mut params: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    if has_exports && input.export_mode == ExportsMode::Named {
        params.push("exports".to_string());
        args.push(if input.extend {
            let name = input.name.unwrap_or("bundle");
            format!("this.{} = this.{} || {{}}", name, name)
        } else {
            "{}".to_string()
        });
    }
    for import in input.imports {
        params.push(import.base_var.clone().unwrap_or_else(|| "_unused".to_string()));
        args.push(import.global_name.clone().unwrap_or_else(|| "undefined".to_string()));
    }

    let mut inner = String::new();
    inner.push_str("'use strict';\n\n");
    push_addon(&mut inner, input.intro);
    inner.push_str(&helpers_block(input));
    inner.push_str(input.body);
    match input.export_mode {
        ExportsMode::Default => {
            if let Some(export) = input.exports.iter().find(|e| e.exported == "default") {
                inner.push_str(&format!("\nreturn {};\n", export.local));
            }
        }
        ExportsMode::Named => {
            let exports_block = export_block_object_style(input, "exports");
            if !exports_block.is_empty() {
                inner.push('\n');
                inner.push_str(&exports_block);
            }
            if has_exports {
                inner.push_str("\nreturn exports;\n");
            }
        }
        _ => {}
    }
    push_addon(&mut inner, input.outro);

    let mut out = String::new();
    push_addon(&mut out, input.banner);
    let assignment = match (has_exports, input.name, input.extend) {
        (true, Some(name), false) => format!("var {} = ", name),
        _ => String::new(),
    };
    out.push_str(&format!(
        "{}(function ({}) {{\n{}\n}})({});\n",
        assignment,
        params.join(", "),
        inner.trim_end(),
        args.join(", ")
    ));
    push_addon(&mut out, input.footer);
    out
}

// --------------------------------------------------------------- umd ----

fn finalize_umd(input: &FinalizeInput<'_>) -> String {
    let has_exports = !input.exports.is_empty();
    let named = has_exports && input.export_mode == ExportsMode::Named;

    let mut factory_params: Vec<String> = Vec::new();
    let mut cjs_args: Vec<String> = Vec::new();
    let mut amd_deps: Vec<String> = Vec::new();
    let mut global_args: Vec<String> = Vec::new();
    if named {
        factory_params.push("exports".to_string());
        cjs_args.push("exports".to_string());
        amd_deps.push(quote("exports"));
        let name = input.name.unwrap_or("bundle");
        global_args.push(if input.extend {
            format!("global.{} = global.{} || {{}}", name, name)
        } else {
            format!("global.{} = {{}}", name)
        });
    }
    for import in input.imports {
        factory_params.push(import.base_var.clone().unwrap_or_else(|| "_unused".to_string()));
        cjs_args.push(format!("require({})", quote(&import.path)));
        amd_deps.push(quote(&import.path));
        global_args.push(format!(
            "global.{}",
            import.global_name.clone().unwrap_or_else(|| "undefined".to_string())
        ));
    }

    let mut inner = String::new();
    inner.push_str("'use strict';\n\n");
    push_addon(&mut inner, input.intro);
    inner.push_str(&helpers_block(input));
    inner.push_str(input.body);
    match input.export_mode {
        ExportsMode::Default => {
            if let Some(export) = input.exports.iter().find(|e| e.exported == "default") {
                inner.push_str(&format!("\nreturn {};\n", export.local));
            }
        }
        ExportsMode::Named => {
            let exports_block = export_block_object_style(input, "exports");
            if !exports_block.is_empty() {
                inner.push('\n');
                inner.push_str(&exports_block);
            }
        }
        _ => {}
    }
    push_addon(&mut inner, input.outro);

    let default_assignment = if has_exports && !named {
        let name = input.name.unwrap_or("bundle");
        (
            format!("module.exports = factory({})", cjs_args.join(", ")),
            format!(
                "(global = typeof globalThis !== 'undefined' ? globalThis : global || self, global.{} = factory({}))",
                name,
                global_args.join(", ")
            ),
        )
    } else {
        (
            format!("factory({})", cjs_args.join(", ")),
            format!(
                "(global = typeof globalThis !== 'undefined' ? globalThis : global || self, factory({}))",
                global_args.join(", ")
            ),
        )
    };

    let mut out = String::new();
    push_addon(&mut out, input.banner);
    out.push_str(&format!(
        concat!(
            "(function (global, factory) {{\n",
            "  typeof exports === 'object' && typeof module !== 'undefined' ? {cjs} :\n",
            "  typeof define === 'function' && define.amd ? define([{amd}], factory) :\n",
            "  {glob};\n",
            "}})(this, (function ({params}) {{\n{body}\n}}));\n"
        ),
        cjs = default_assignment.0,
        amd = amd_deps.join(", "),
        glob = default_assignment.1,
        params = factory_params.join(", "),
        body = inner.trim_end()
    ));
    push_addon(&mut out, input.footer);
    out
}

// ------------------------------------------------------------ system ----

fn finalize_system(input: &FinalizeInput<'_>) -> String {
    let deps: Vec<String> = input.imports.iter().map(|i| quote(&i.path)).collect();

    // imported bindings become module-scope vars assigned in setters
    let mut declared: Vec<String> = Vec::new();
    for import in input.imports {
        for (_, local) in &import.named {
            declared.push(local.clone());
        }
        if let Some(local) = &import.default_local {
            declared.push(local.clone());
        }
        if let Some(local) = &import.namespace_local {
            declared.push(local.clone());
        }
    }

    let mut inner = String::new();
    inner.push_str("'use strict';\n");
    if !declared.is_empty() {
        inner.push_str(&format!("var {};\n", declared.join(", ")));
    }
    inner.push_str("return {\n");
    if !input.imports.is_empty() {
        inner.push_str("  setters: [");
        let setters: Vec<String> = input
            .system_setters
            .iter()
            .map(|setter| format!("function (module) {{ {} }}", setter))
            .collect();
        inner.push_str(&setters.join(", "));
        inner.push_str("],\n");
    }
    let execute_keyword = if input.uses_top_level_await {
        "async function"
    } else {
        "function"
    };
    inner.push_str(&format!("  execute: ({} () {{\n", execute_keyword));
    push_addon(&mut inner, input.intro);
    inner.push_str(input.body);
    if !input.body.ends_with('\n') {
        inner.push('\n');
    }
    for export in input.exports {
        inner.push_str(&format!(
            "    exports({}, {});\n",
            quote(&export.exported),
            export.local
        ));
    }
    push_addon(&mut inner, input.outro);
    inner.push_str("  })\n};\n");

    let mut out = String::new();
    push_addon(&mut out, input.banner);
    out.push_str(&format!(
        "System.register([{}], (function (exports, module) {{\n{}\n}}));\n",
        deps.join(", "),
        inner.trim_end()
    ));
    push_addon(&mut out, input.footer);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn base_input<'a>(body: &'a str, exports: &'a [ExportSpec], imports: &'a [ImportSpec]) -> FinalizeInput<'a> {
        FinalizeInput {
            format: OutputFormat::Es,
            body,
            banner: "",
            footer: "",
            intro: "",
            outro: "",
            imports,
            exports,
            export_mode: ExportsMode::Named,
            name: None,
            extend: false,
            amd_id: None,
            amd_define: "define",
            uses_top_level_await: false,
            needs_interop_default: false,
            needs_interop_namespace: false,
            needs_merge_namespaces: false,
            es_module_marker: true,
            external_live_bindings: true,
            system_setters: &[],
            has_dynamic_imports: false,
            accesses_import_meta: false,
        }
    }

    #[test]
    fn es_emits_import_and_export_statements() {
        let imports = vec![ImportSpec {
            path: "./dep-abc.js".to_string(),
            named: vec![("x".to_string(), "x".to_string())],
            ..Default::default()
        }];
        let exports = vec![ExportSpec {
            exported: "main".to_string(),
            local: "main$1".to_string(),
            live_getter: None,
        }];
        let input = base_input("const main$1 = x;\n", &exports, &imports);
        let out = finalize(&input);
        assert!(out.contains("import { x } from './dep-abc.js';"));
        assert!(out.contains("export { main$1 as main };"));
    }

    #[test]
    fn cjs_emits_requires_and_marker() {
        let imports = vec![ImportSpec {
            path: "dep".to_string(),
            is_external: true,
            base_var: Some("dep".to_string()),
            ..Default::default()
        }];
        let exports = vec![ExportSpec {
            exported: "a".to_string(),
            local: "a".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var a = dep.thing;\n", &exports, &imports);
        input.format = OutputFormat::Cjs;
        let out = finalize(&input);
        assert!(out.starts_with("'use strict';"));
        assert!(out.contains("Object.defineProperty(exports, '__esModule', { value: true });"));
        assert!(out.contains("var dep = require('dep');"));
        assert!(out.contains("exports.a = a;"));
    }

    #[test]
    fn cjs_default_mode_assigns_module_exports() {
        let exports = vec![ExportSpec {
            exported: "default".to_string(),
            local: "main".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var main = 1;\n", &exports, &[]);
        input.format = OutputFormat::Cjs;
        input.export_mode = ExportsMode::Default;
        let out = finalize(&input);
        assert!(out.contains("module.exports = main;"));
        assert!(!out.contains("__esModule"));
    }

    #[test]
    fn iife_names_the_global_and_returns_exports() {
        let exports = vec![ExportSpec {
            exported: "a".to_string(),
            local: "a".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var a = 1;\n", &exports, &[]);
        input.format = OutputFormat::Iife;
        input.name = Some("MyLib");
        let out = finalize(&input);
        assert!(out.starts_with("var MyLib = (function (exports) {"));
        assert!(out.contains("return exports;"));
        assert!(out.trim_end().ends_with("})({});"));
    }

    #[test]
    fn umd_wrapper_covers_three_loaders() {
        let exports = vec![ExportSpec {
            exported: "a".to_string(),
            local: "a".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var a = 1;\n", &exports, &[]);
        input.format = OutputFormat::Umd;
        input.name = Some("MyLib");
        let out = finalize(&input);
        assert!(out.contains("typeof exports === 'object' && typeof module !== 'undefined'"));
        assert!(out.contains("typeof define === 'function' && define.amd"));
        assert!(out.contains("global.MyLib = {}"));
    }

    #[test]
    fn system_declares_setters_and_exports() {
        let imports = vec![ImportSpec {
            path: "./dep.js".to_string(),
            named: vec![("x".to_string(), "x".to_string())],
            ..Default::default()
        }];
        let setters = vec!["x = module.x;".to_string()];
        let exports = vec![ExportSpec {
            exported: "a".to_string(),
            local: "a".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var a = x;\n", &exports, &imports);
        input.format = OutputFormat::System;
        input.system_setters = &setters;
        let out = finalize(&input);
        assert!(out.starts_with("System.register(['./dep.js'],"));
        assert!(out.contains("setters: [function (module) { x = module.x; }]"));
        assert!(out.contains("exports('a', a);"));
    }

    #[test]
    fn amd_lists_dependencies() {
        let imports = vec![ImportSpec {
            path: "dep".to_string(),
            is_external: true,
            base_var: Some("dep".to_string()),
            ..Default::default()
        }];
        let exports = vec![ExportSpec {
            exported: "a".to_string(),
            local: "a".to_string(),
            live_getter: None,
        }];
        let mut input = base_input("var a = dep.x;\n", &exports, &imports);
        input.format = OutputFormat::Amd;
        let out = finalize(&input);
        assert!(out.starts_with("define(['exports', 'dep'], (function (exports, dep) {"));
        assert_eq!(out.matches("'use strict';").count(), 1);
    }
}
