use ahashmap::{AHashMap, AHashSet};
use bundle_err::{BundleResult, ErrorCode};
use indexmap::IndexMap;

use crate::chunking::{Chunk, VarRef};
use crate::graph::Graph;
use crate::module::LocalExportKind;
use crate::options::{InteropKind, OutputFormat, OutputOptions};
use crate::utils::names::{get_safe_name, make_legal_identifier};
use crate::utils::paths;

pub const INTEROP_DEFAULT: &str = "_interopDefault";
pub const INTEROP_NAMESPACE: &str = "_interopNamespace";
pub const MERGE_NAMESPACES: &str = "_mergeNamespaces";

/// The render-name assignments of one chunk: every variable the emitted
/// code mentions maps to an expression (usually a bare identifier).
#[derive(Debug, Default)]
pub struct ChunkNames {
    /// Variable -> emitted expression.
    pub render: AHashMap<VarRef, String>,
    /// Final export name -> variable, entry signatures first.
    pub exports: IndexMap<String, VarRef>,
    /// Base binding for each external dependency (`var fs = require('fs')`
    /// in cjs-like formats, the namespace import name in es).
    pub external_base: IndexMap<crate::module::ExternalIdx, String>,
    pub external_default_var: AHashMap<crate::module::ExternalIdx, String>,
    pub external_namespace_var: AHashMap<crate::module::ExternalIdx, String>,
    /// cjs/amd-like formats: local binding per imported chunk.
    pub chunk_import_var: AHashMap<usize, String>,
    /// es/system: local alias per imported (chunk, variable).
    pub import_aliases: AHashMap<VarRef, String>,
    pub needs_interop_default: bool,
    pub needs_interop_namespace: bool,
    pub needs_merge_namespaces: bool,
    pub used_names: AHashSet<String>,
}

/// Assigns deconflicted names across all chunks. Two passes: each chunk
/// names its own variables and externals, then importers alias what their
/// exporters finally called things.
pub fn deconflict_chunks(
    graph: &Graph,
    chunks: &[Chunk],
    output_options: &OutputOptions,
) -> BundleResult<Vec<ChunkNames>> {
    let mut all_names: Vec<ChunkNames> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        all_names.push(assign_own_names(graph, chunk, output_options)?);
    }
    for chunk in chunks {
        assign_import_names(chunks, &mut all_names, chunk.idx, output_options);
    }
    Ok(all_names)
}

fn assign_own_names(
    graph: &Graph,
    chunk: &Chunk,
    output_options: &OutputOptions,
) -> BundleResult<ChunkNames> {
    let mut names = ChunkNames::default();
    let mut used = AHashSet::default();

    // the format wrapper's own identifiers are never available
    for reserved in crate::utils::names::format_reserved(output_options.format) {
        used.insert(reserved.to_string());
    }
    // globals referenced by included statements stay untouched
    for &module_idx in &chunk.modules {
        let module = &graph.modules[module_idx];
        for record in module.statements.iter().filter(|s| s.included) {
            for global in &record.accessed_globals {
                used.insert(global.clone());
            }
        }
    }

    let es_like = matches!(
        output_options.format,
        OutputFormat::Es | OutputFormat::System
    );

    // helper names are claimed up front when any external needs interop
    let needs_default_helper = !es_like
        && chunk.external_imports.values().any(|imports| imports.default)
        && chunk.external_imports.keys().any(|&e| {
            !matches!(
                output_options.interop_for(&graph.externals[e].id),
                InteropKind::EsModule
            )
        });
    let needs_namespace_helper = !es_like
        && chunk
            .external_imports
            .values()
            .any(|imports| imports.namespace);
    if needs_default_helper {
        used.insert(INTEROP_DEFAULT.to_string());
        names.needs_interop_default = true;
    }
    if needs_namespace_helper {
        used.insert(INTEROP_NAMESPACE.to_string());
        names.needs_interop_namespace = true;
    }
    if chunk.external_imports.values().any(|i| i.reexported_star) {
        used.insert(MERGE_NAMESPACES.to_string());
        names.needs_merge_namespaces = true;
    }

    // externals, in dependency order
    for (&external_idx, imports) in &chunk.external_imports {
        let external = &graph.externals[external_idx];
        let interop = output_options.interop_for(&external.id);
        if interop == InteropKind::DefaultOnly && !imports.names.is_empty() {
            let names_list: Vec<&str> = imports.names.iter().map(String::as_str).collect();
            return Err(bundle_err::BundleError::new(
                ErrorCode::ValidationError,
                format!(
                    "\"defaultOnly\" interop was used for external module \"{}\" but it is imported with the named bindings {}.",
                    external.id,
                    names_list.join(", ")
                ),
            ));
        }
        let stem = make_legal_identifier(&paths::get_alias_name(&external.id));
        let base = get_safe_name(&stem, &mut used);
        names.external_base.insert(external_idx, base.clone());

        if es_like {
            // named bindings import directly under (possibly aliased) names
            for name in &imports.names {
                let alias = get_safe_name(&make_legal_identifier(name), &mut used);
                names.render.insert(
                    VarRef::External(external_idx, crate::module::ImportedName::Name(name.clone())),
                    alias,
                );
            }
            if imports.default {
                names.render.insert(
                    VarRef::External(external_idx, crate::module::ImportedName::Default),
                    base.clone(),
                );
            }
            if imports.namespace {
                let ns_name = if imports.default {
                    get_safe_name(&format!("{}__namespace", stem), &mut used)
                } else {
                    base.clone()
                };
                names.render.insert(
                    VarRef::External(external_idx, crate::module::ImportedName::Namespace),
                    ns_name,
                );
            }
        } else {
            // one required object per external; bindings are member reads
            for name in &imports.names {
                names.render.insert(
                    VarRef::External(external_idx, crate::module::ImportedName::Name(name.clone())),
                    format!("{}.{}", base, name),
                );
            }
            if imports.default {
                let expr = match interop {
                    InteropKind::EsModule => format!("{}.default", base),
                    InteropKind::DefaultOnly => base.clone(),
                    _ => {
                        let default_var =
                            get_safe_name(&format!("{}__default", stem), &mut used);
                        names
                            .external_default_var
                            .insert(external_idx, default_var.clone());
                        format!("{}.default", default_var)
                    }
                };
                names
                    .render
                    .insert(VarRef::External(external_idx, crate::module::ImportedName::Default), expr);
            }
            if imports.namespace {
                let namespace_var = get_safe_name(&format!("{}__namespace", stem), &mut used);
                names
                    .external_namespace_var
                    .insert(external_idx, namespace_var.clone());
                names.render.insert(
                    VarRef::External(external_idx, crate::module::ImportedName::Namespace),
                    namespace_var,
                );
            }
        }
    }

    // module-owned variables, in execution order, statement order
    for &module_idx in &chunk.modules {
        let module = &graph.modules[module_idx];

        for record in &module.statements {
            if !record.included || record.import_source.is_some() {
                continue;
            }
            for id in &record.declares {
                let var = VarRef::Local(module_idx, id.clone());
                if names.render.contains_key(&var) {
                    continue;
                }
                let name = get_safe_name(id.0.as_str(), &mut used);
                names.render.insert(var, name);
            }
        }

        // the default-export slot aliases its named declaration when one
        // exists, otherwise it gets a variable named after the module
        if let Some(default_export) = module.local_exports.get("default") {
            if module.statements[default_export.stmt_index].included
                || chunk_exports_var(chunk, &VarRef::Default(module_idx))
            {
                let name = match &default_export.kind {
                    LocalExportKind::Default { local: Some(id) } => names
                        .render
                        .get(&VarRef::Local(module_idx, id.clone()))
                        .cloned()
                        .unwrap_or_else(|| {
                            let name = get_safe_name(id.0.as_str(), &mut used);
                            names
                                .render
                                .insert(VarRef::Local(module_idx, id.clone()), name.clone());
                            name
                        }),
                    _ => get_safe_name(
                        &make_legal_identifier(&module.alias_name()),
                        &mut used,
                    ),
                };
                names.render.insert(VarRef::Default(module_idx), name);
            }
        }

        if module.namespace_included {
            let ns_name = get_safe_name(
                &make_legal_identifier(&module.alias_name()),
                &mut used,
            );
            names.render.insert(VarRef::Namespace(module_idx), ns_name);
        }
    }

    // synthetic named exports read off their fallback variable
    for &module_idx in &chunk.modules {
        let module = &graph.modules[module_idx];
        if module.synthetic_named_exports == crate::options::SyntheticNamedExports::No {
            continue;
        }
        let fallback = module
            .synthetic_named_exports
            .fallback_export_name()
            .unwrap_or("default")
            .to_string();
        if let Ok(target) = graph.resolve_export(module_idx, &fallback) {
            if let Some(fallback_var) = VarRef::from_target(&target) {
                if let Some(fallback_name) = names.render.get(&fallback_var).cloned() {
                    let synthetic: Vec<VarRef> = chunk
                        .internal_exports
                        .iter()
                        .chain(chunk.fixed_exports.values())
                        .filter(|v| matches!(v, VarRef::Synthetic(m, _) if *m == module_idx))
                        .cloned()
                        .collect();
                    for var in synthetic {
                        if let VarRef::Synthetic(_, prop) = &var {
                            names
                                .render
                                .insert(var.clone(), format!("{}.{}", fallback_name, prop));
                        }
                    }
                }
            }
        }
    }

    // final export table: fixed names first, then internals under their
    // render names
    names.exports = chunk.fixed_exports.clone();
    let mut export_names_taken: AHashSet<String> =
        names.exports.keys().cloned().collect();
    for var in &chunk.internal_exports {
        if names.exports.values().any(|v| v == var) {
            continue;
        }
        let base = names
            .render
            .get(var)
            .cloned()
            .unwrap_or_else(|| "exported".to_string());
        let base = make_legal_identifier(&base.replace('.', "_"));
        let mut final_name = base.clone();
        let mut counter = 0;
        while !export_names_taken.insert(final_name.clone()) {
            counter += 1;
            final_name = format!("{}${}", base, counter);
        }
        names.exports.insert(final_name, var.clone());
    }

    names.used_names = used;
    Ok(names)
}

fn chunk_exports_var(chunk: &Chunk, var: &VarRef) -> bool {
    chunk.fixed_exports.values().any(|v| v == var) || chunk.internal_exports.contains(var)
}

/// Second pass: every cross-chunk import gets a local spelling based on
/// what the exporter called it.
fn assign_import_names(
    chunks: &[Chunk],
    all_names: &mut [ChunkNames],
    chunk_idx: usize,
    output_options: &OutputOptions,
) {
    let es_like = matches!(
        output_options.format,
        OutputFormat::Es | OutputFormat::System
    );
    let imports: Vec<(usize, Vec<VarRef>)> = chunks[chunk_idx]
        .cross_imports
        .iter()
        .map(|(&dep, vars)| (dep, vars.iter().cloned().collect()))
        .collect();

    for (dep_chunk, vars) in imports {
        if !es_like {
            let stem = make_legal_identifier(&paths::get_alias_name(&chunks[dep_chunk].file_name));
            let (base, render_entries) = {
                let names = &mut all_names[chunk_idx];
                let mut used = std::mem::take(&mut names.used_names);
                let base = get_safe_name(&stem, &mut used);
                names.used_names = used;
                names.chunk_import_var.insert(dep_chunk, base.clone());
                (base, vars)
            };
            for var in render_entries {
                let export_name = export_name_of(&all_names[dep_chunk], &var)
                    .unwrap_or_else(|| "default".to_string());
                all_names[chunk_idx]
                    .render
                    .insert(var, format!("{}.{}", base, export_name));
            }
        } else {
            for var in vars {
                let export_name = export_name_of(&all_names[dep_chunk], &var)
                    .unwrap_or_else(|| "default".to_string());
                let names = &mut all_names[chunk_idx];
                let mut used = std::mem::take(&mut names.used_names);
                let alias = get_safe_name(&make_legal_identifier(&export_name), &mut used);
                names.used_names = used;
                names.import_aliases.insert(var.clone(), alias.clone());
                names.render.insert(var, alias);
            }
        }
    }
}

/// The name under which `var` leaves its owning chunk.
pub fn export_name_of(names: &ChunkNames, var: &VarRef) -> Option<String> {
    names
        .exports
        .iter()
        .find(|(_, v)| *v == var)
        .map(|(name, _)| name.clone())
}
