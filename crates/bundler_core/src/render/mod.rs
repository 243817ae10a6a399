pub mod deconflict;
pub mod formats;
pub mod interop;
pub mod namespace;
pub mod statements;

use ahashmap::{AHashMap, AHashSet};
use bundle_err::{BundleError, BundleResult, ErrorCode};
use indexmap::IndexMap;
use swc_common::BytePos;

use crate::chunking::{build_chunks, Chunk, ChunkDep, VarRef};
use crate::graph::Graph;
use crate::module::{ImportedName, ModuleIdx};
use crate::options::{ExportsMode, OutputFormat, OutputOptions};
use crate::output::{OutputBundle, OutputChunk, OutputFile};
use crate::plugin::RenderedChunkInfo;
use crate::render::deconflict::{deconflict_chunks, export_name_of, ChunkNames};
use crate::render::formats::{finalize, ExportSpec, FinalizeInput, ImportSpec};
use crate::render::statements::{
    render_module_statements, ImportMetaConfig, ModuleRewrite, RenderedPiece,
};
use crate::sourcemaps;
use crate::utils::hashing::{hash_parts, hex_hash};
use crate::utils::names::make_legal_identifier;
use crate::utils::paths;

/// Addon text around each chunk, combined from output options and the
/// reduce-style addon hooks.
struct Addons {
    banner: String,
    footer: String,
    intro: String,
    outro: String,
}

fn collect_addons(graph: &Graph, output_options: &OutputOptions) -> BundleResult<Addons> {
    let combine = |hook: &str, base: Option<&String>| -> BundleResult<String> {
        let initial = base.cloned().unwrap_or_default();
        graph.driver.hook_reduce(hook, initial, |plugin, ctx, acc| {
            let piece = match hook {
                "banner" => plugin.banner(ctx)?,
                "footer" => plugin.footer(ctx)?,
                "intro" => plugin.intro(ctx)?,
                _ => plugin.outro(ctx)?,
            };
            Ok(match piece {
                Some(piece) if acc.is_empty() => piece,
                Some(piece) => format!("{}\n{}", acc, piece),
                None => acc,
            })
        })
    };
    Ok(Addons {
        banner: combine("banner", output_options.banner.as_ref())?,
        footer: combine("footer", output_options.footer.as_ref())?,
        intro: combine("intro", output_options.intro.as_ref())?,
        outro: combine("outro", output_options.outro.as_ref())?,
    })
}

/// The GENERATE phase for one output: chunk the graph, render each chunk
/// in its format, compose maps, hash, and assemble the bundle.
pub fn generate_output(graph: &Graph, output_options: &OutputOptions) -> BundleResult<OutputBundle> {
    validate_top_level_await(graph, output_options)?;

    let chunks = build_chunks(graph, output_options)?;
    validate_code_splitting(&chunks, output_options)?;
    if chunks.is_empty() {
        graph.diagnostics.warn(BundleError::new(
            ErrorCode::EmptyBundle,
            "Generated an empty bundle.",
        ));
    }

    let names = deconflict_chunks(graph, &chunks, output_options)?;
    let addons = collect_addons(graph, output_options)?;

    // assets first: chunk bodies may reference their final urls
    let mut reserved_file_names: AHashSet<String> =
        chunks.iter().map(|c| c.file_name.clone()).collect();
    let mut asset_files: Vec<OutputFile> = Vec::new();
    graph.emitter.finalize_assets(
        output_options,
        &mut reserved_file_names,
        &mut asset_files,
    )?;

    let mut rendered: Vec<RenderedChunkState> = Vec::new();
    for chunk in &chunks {
        rendered.push(render_chunk(
            graph,
            &chunks,
            &names,
            chunk.idx,
            output_options,
            &addons,
        )?);
    }

    substitute_hashes(&chunks, &mut rendered)?;
    report_emitted_chunk_names(graph, &chunks, &rendered);

    // assemble: entry chunks first in entry order, then the rest by
    // execution order, then assets
    let mut order: Vec<usize> = (0..chunks.len()).collect();
    order.sort_by_key(|&i| {
        let chunk = &chunks[i];
        let entry_rank = chunk
            .facade_module
            .and_then(|m| graph.modules[m].entry_index)
            .unwrap_or(usize::MAX);
        (!chunk.is_entry_chunk as usize, entry_rank, chunk.exec_order)
    });

    let mut bundle = OutputBundle::default();
    for idx in order {
        let state = &rendered[idx];
        let chunk = &chunks[idx];
        bundle.output.push(OutputFile::Chunk(OutputChunk {
            code: state.code.clone(),
            map: state.map_json.clone(),
            file_name: state.file_name.clone(),
            name: chunk.name.clone(),
            exports: state.exports.clone(),
            imports: state.imports.clone(),
            dynamic_imports: state.dynamic_imports.clone(),
            modules: chunk
                .modules
                .iter()
                .map(|&m| graph.modules[m].id.clone())
                .collect(),
            facade_module_id: chunk.facade_module.map(|m| graph.modules[m].id.clone()),
            is_entry: chunk.is_entry_chunk,
            is_dynamic_entry: chunk.is_dynamic_entry,
            is_implicit_entry: chunk.is_implicit_entry,
            implicitly_loaded_before: chunk
                .implicitly_loaded_before
                .iter()
                .map(|&c| rendered[c].file_name.clone())
                .collect(),
            imported_bindings: state.imported_bindings.clone(),
            referenced_files: state.referenced_files.clone(),
        }));
    }
    bundle.output.extend(asset_files);

    Ok(bundle)
}

struct RenderedChunkState {
    code: String,
    map_json: Option<String>,
    own_hash: u64,
    file_name: String,
    exports: Vec<String>,
    imports: Vec<String>,
    imported_bindings: IndexMap<String, Vec<String>>,
    dynamic_imports: Vec<String>,
    referenced_files: Vec<String>,
}

fn validate_top_level_await(graph: &Graph, output_options: &OutputOptions) -> BundleResult<()> {
    if output_options.format.supports_top_level_await() {
        return Ok(());
    }
    for module in &graph.modules {
        if module.included && module.uses_top_level_await {
            return Err(bundle_err::invalid_tla_format(
                &module.id,
                output_options.format.as_str(),
            ));
        }
    }
    Ok(())
}

fn validate_code_splitting(chunks: &[Chunk], output_options: &OutputOptions) -> BundleResult<()> {
    if matches!(
        output_options.format,
        OutputFormat::Iife | OutputFormat::Umd
    ) && chunks.len() > 1
    {
        return Err(BundleError::new(
            ErrorCode::ChunkInvalid,
            format!(
                "UMD and IIFE output formats are not supported for code-splitting builds ({} chunks were generated).",
                chunks.len()
            ),
        ));
    }
    Ok(())
}

/// Export mode selection with the auto rules and their validations.
fn export_mode_for(
    graph: &Graph,
    chunk: &Chunk,
    export_names: &[String],
    output_options: &OutputOptions,
) -> BundleResult<ExportsMode> {
    let facade_id = chunk
        .facade_module
        .map(|m| graph.modules[m].id.clone())
        .unwrap_or_else(|| chunk.name.clone());
    if output_options.preserve_modules && !export_names.is_empty() {
        return Ok(ExportsMode::Named);
    }
    match output_options.exports {
        ExportsMode::Named => Ok(ExportsMode::Named),
        ExportsMode::None => {
            if export_names.is_empty() {
                Ok(ExportsMode::None)
            } else {
                Err(bundle_err::invalid_export_option(
                    "none",
                    &facade_id,
                    export_names,
                ))
            }
        }
        ExportsMode::Default => {
            if export_names == ["default"] {
                Ok(ExportsMode::Default)
            } else {
                Err(bundle_err::invalid_export_option(
                    "default",
                    &facade_id,
                    export_names,
                ))
            }
        }
        ExportsMode::Auto => {
            if export_names.is_empty() {
                Ok(ExportsMode::None)
            } else if export_names == ["default"] {
                Ok(ExportsMode::Default)
            } else {
                if export_names.iter().any(|n| n == "default")
                    && !output_options.format.has_native_live_bindings()
                {
                    graph.diagnostics.warn(bundle_err::mixed_exports(&facade_id));
                }
                Ok(ExportsMode::Named)
            }
        }
    }
}

fn render_path_for_external(
    graph: &Graph,
    chunk_file: &str,
    external_idx: crate::module::ExternalIdx,
) -> String {
    let external = &graph.externals[external_idx];
    if external.renormalize_render_path {
        paths::relative_import_path(chunk_file, &external.render_path)
    } else {
        external.render_path.clone()
    }
}

fn import_meta_config(
    graph: &Graph,
    chunk: &Chunk,
    output_options: &OutputOptions,
) -> BundleResult<ImportMetaConfig> {
    let format = output_options.format;
    let (keep, meta_expr, url_expr) = match format {
        OutputFormat::Es => (true, String::new(), String::new()),
        OutputFormat::System => (
            false,
            "module.meta".to_string(),
            "module.meta.url".to_string(),
        ),
        OutputFormat::Cjs => (
            false,
            "({ url: require('url').pathToFileURL(__filename).href })".to_string(),
            "require('url').pathToFileURL(__filename).href".to_string(),
        ),
        _ => (
            false,
            "({ url: document.currentScript && document.currentScript.src || document.baseURI })"
                .to_string(),
            "(document.currentScript && document.currentScript.src || document.baseURI)"
                .to_string(),
        ),
    };

    // resolveImportMeta may override even the es passthrough
    let hook_meta = graph
        .driver
        .hook_first("resolveImportMeta", &[], |plugin, ctx| {
            plugin.resolve_import_meta(ctx, None, &chunk.file_name)
        })?;

    let mut config = ImportMetaConfig {
        keep: keep && hook_meta.is_none(),
        meta_expr: hook_meta.clone().unwrap_or(meta_expr),
        url_expr: hook_meta.unwrap_or(url_expr),
        file_url_exprs: AHashMap::default(),
    };

    // pre-resolve emitted-file url references
    let mut referenced: Vec<String> = Vec::new();
    for &module_idx in &chunk.modules {
        for meta in &graph.modules[module_idx].import_metas {
            if let Some(reference) = &meta.file_reference {
                referenced.push(reference.clone());
            }
        }
    }
    for reference in referenced {
        let file_name = graph.emitter.get_file_name(&reference)?;
        let relative = paths::relative_import_path(&chunk.file_name, &file_name);
        let hook_url = graph
            .driver
            .hook_first("resolveFileUrl", &[], |plugin, ctx| {
                plugin.resolve_file_url(ctx, &reference, &file_name, &chunk.file_name)
            })?;
        let expr = hook_url.unwrap_or_else(|| match format {
            OutputFormat::Es => format!("new URL('{}', import.meta.url).href", relative),
            OutputFormat::System => format!("new URL('{}', module.meta.url).href", relative),
            OutputFormat::Cjs => format!(
                "require('url').pathToFileURL(__dirname + '/{}').href",
                relative
            ),
            _ => format!(
                "new URL('{}', document.currentScript && document.currentScript.src || document.baseURI).href",
                relative
            ),
        });
        for prefix in crate::parse::scan::FILE_URL_PREFIXES {
            config
                .file_url_exprs
                .insert(format!("{}{}", prefix, reference), expr.clone());
        }
    }
    Ok(config)
}

/// The expression a rewritten dynamic import evaluates to.
fn dynamic_import_expression(
    graph: &Graph,
    chunks: &[Chunk],
    names: &ChunkNames,
    chunk: &Chunk,
    target: crate::module::ModuleRef,
    chunk_of: &AHashMap<ModuleIdx, usize>,
    importer_id: &str,
    output_options: &OutputOptions,
) -> BundleResult<Option<String>> {
    let target_id = graph.ref_id(target).to_string();
    let hook = graph
        .driver
        .hook_first("renderDynamicImport", &[], |plugin, ctx| {
            plugin.render_dynamic_import(ctx, &target_id, importer_id)
        })?;
    if let Some(expression) = hook {
        return Ok(Some(expression));
    }

    let path = match target {
        crate::module::ModuleRef::External(external_idx) => {
            render_path_for_external(graph, &chunk.file_name, external_idx)
        }
        crate::module::ModuleRef::Module(module_idx) => {
            let Some(&target_chunk) = chunk_of.get(&module_idx) else {
                return Ok(None);
            };
            if target_chunk == chunk.idx {
                // same chunk: an immediately-resolved promise of the
                // namespace object
                let ns = names
                    .render
                    .get(&VarRef::Namespace(module_idx))
                    .cloned()
                    .unwrap_or_else(|| "undefined".to_string());
                return Ok(Some(format!(
                    "Promise.resolve().then(function () {{ return {}; }})",
                    ns
                )));
            }
            paths::relative_import_path(&chunk.file_name, &chunks[target_chunk].file_name)
        }
    };

    Ok(Some(match output_options.format {
        OutputFormat::Es | OutputFormat::Iife | OutputFormat::Umd => {
            format!("import('{}')", path)
        }
        OutputFormat::Cjs => format!(
            "Promise.resolve().then(function () {{ return {}(require('{}')); }})",
            deconflict::INTEROP_NAMESPACE,
            path
        ),
        OutputFormat::Amd => format!(
            "new Promise(function (resolve, reject) {{ require(['{}'], function (m) {{ resolve({}(m)); }}, reject); }})",
            path,
            deconflict::INTEROP_NAMESPACE
        ),
        OutputFormat::System => format!("module.import('{}')", path),
    }))
}

fn render_chunk(
    graph: &Graph,
    chunks: &[Chunk],
    all_names: &[ChunkNames],
    chunk_idx: usize,
    output_options: &OutputOptions,
    addons: &Addons,
) -> BundleResult<RenderedChunkState> {
    let chunk = &chunks[chunk_idx];
    let names = &all_names[chunk_idx];

    let chunk_of: AHashMap<ModuleIdx, usize> = chunks
        .iter()
        .flat_map(|c| c.modules.iter().map(move |&m| (m, c.idx)))
        .collect();

    let import_meta = import_meta_config(graph, chunk, output_options)?;

    // ---- body -----------------------------------------------------------
    let mut body = String::new();
    let mut body_line = 0u32;
    let mut mappings: Vec<(sourcemaps::ChunkMapping, &[sourcemap::SourceMap])> = Vec::new();
    let mut uses_dynamic_namespace_interop = false;

    for &module_idx in &chunk.modules {
        let module = &graph.modules[module_idx];

        let renames = module_renames(graph, names, module_idx)?;
        let mut dynamic_rewrites: AHashMap<BytePos, String> = AHashMap::default();
        for dynamic in &module.dynamic_imports {
            if !module.statements[dynamic.stmt_index].included {
                continue;
            }
            if let Some(target) = dynamic.resolution {
                if let Some(expression) = dynamic_import_expression(
                    graph,
                    chunks,
                    names,
                    chunk,
                    target,
                    &chunk_of,
                    &module.id,
                    output_options,
                )? {
                    if expression.contains(deconflict::INTEROP_NAMESPACE) {
                        uses_dynamic_namespace_interop = true;
                    }
                    dynamic_rewrites.insert(dynamic.span.lo, expression);
                }
            }
        }

        let default_name = names.render.get(&VarRef::Default(module_idx)).cloned();
        let rewrite = ModuleRewrite {
            renames: &renames,
            dynamic_rewrites: &dynamic_rewrites,
            import_meta: &import_meta,
        };
        let pieces: Vec<RenderedPiece> =
            render_module_statements(&graph.cm, module, &rewrite, default_name.as_deref())?;

        for piece in pieces {
            if output_options.sourcemap.is_enabled() {
                for (byte_pos, line_col) in &piece.mappings {
                    let loc = graph.cm.lookup_char_pos(*byte_pos);
                    mappings.push((
                        sourcemaps::ChunkMapping {
                            gen_line: body_line + line_col.line,
                            gen_col: line_col.col,
                            source: module.id.clone(),
                            src_line: loc.line.saturating_sub(1) as u32,
                            src_col: loc.col_display as u32,
                            source_content: Some(module.fm.src.to_string()),
                        },
                        module.transform_maps.as_slice(),
                    ));
                }
            }
            body.push_str(&piece.text);
            if !piece.text.ends_with('\n') {
                body.push('\n');
            }
            body_line = body.matches('\n').count() as u32;
        }

        if module.namespace_included && names.render.contains_key(&VarRef::Namespace(module_idx)) {
            let ns_name = &names.render[&VarRef::Namespace(module_idx)];
            let mut entries: Vec<(String, String)> = Vec::new();
            for name in graph.export_names(module_idx) {
                let target = graph.resolve_export(module_idx, &name)?;
                if let Some(var) = VarRef::from_target(&target) {
                    if let Some(expr) = names.render.get(&var) {
                        entries.push((name, expr.clone()));
                    }
                }
            }
            entries.sort();
            body.push_str(&namespace::namespace_object_text(ns_name, &entries));
            body_line = body.matches('\n').count() as u32;
        }
    }

    // ---- imports / exports ---------------------------------------------
    let es_like = matches!(
        output_options.format,
        OutputFormat::Es | OutputFormat::System
    );
    let mut imports: Vec<ImportSpec> = Vec::new();
    let mut system_setters: Vec<String> = Vec::new();
    let mut imported_bindings: IndexMap<String, Vec<String>> = IndexMap::new();

    for dep in &chunk.dependencies {
        match *dep {
            ChunkDep::Chunk(dep_chunk) => {
                let path =
                    paths::relative_import_path(&chunk.file_name, &chunks[dep_chunk].file_name);
                let mut spec = ImportSpec {
                    path: path.clone(),
                    ..Default::default()
                };
                let mut setter = String::new();
                if let Some(vars) = chunk.cross_imports.get(&dep_chunk) {
                    for var in vars {
                        let export_name = export_name_of(&all_names[dep_chunk], var)
                            .unwrap_or_else(|| "default".to_string());
                        if es_like {
                            let local = names
                                .import_aliases
                                .get(var)
                                .cloned()
                                .unwrap_or_else(|| export_name.clone());
                            setter.push_str(&format!("{} = module.{}; ", local, export_name));
                            spec.named.push((export_name.clone(), local));
                        }
                        imported_bindings
                            .entry(path.clone())
                            .or_default()
                            .push(export_name);
                    }
                }
                if !es_like {
                    spec.base_var = names.chunk_import_var.get(&dep_chunk).cloned();
                    spec.side_effect_only = spec.base_var.is_none();
                }
                if es_like && spec.named.is_empty() {
                    spec.side_effect_only = true;
                }
                system_setters.push(setter.trim_end().to_string());
                imports.push(spec);
            }
            ChunkDep::External(external_idx) => {
                let external = &graph.externals[external_idx];
                let external_imports = chunk.external_imports.get(&external_idx);
                let path = render_path_for_external(graph, &chunk.file_name, external_idx);
                let mut spec = ImportSpec {
                    path: path.clone(),
                    is_external: true,
                    interop: output_options.interop_for(&external.id),
                    ..Default::default()
                };
                let mut setter = String::new();
                if let Some(ext) = external_imports {
                    spec.reexport_star = ext.reexported_star;
                    if es_like {
                        for name in &ext.names {
                            let var = VarRef::External(
                                external_idx,
                                ImportedName::Name(name.clone()),
                            );
                            let local = names
                                .render
                                .get(&var)
                                .cloned()
                                .unwrap_or_else(|| name.clone());
                            setter.push_str(&format!("{} = module.{}; ", local, name));
                            spec.named.push((name.clone(), local));
                            imported_bindings
                                .entry(path.clone())
                                .or_default()
                                .push(name.clone());
                        }
                        if ext.default {
                            let local = names
                                .render
                                .get(&VarRef::External(external_idx, ImportedName::Default))
                                .cloned()
                                .unwrap_or_else(|| "default".to_string());
                            setter.push_str(&format!("{} = module.default; ", local));
                            spec.default_local = Some(local);
                            imported_bindings
                                .entry(path.clone())
                                .or_default()
                                .push("default".to_string());
                        }
                        if ext.namespace {
                            let local = names
                                .render
                                .get(&VarRef::External(external_idx, ImportedName::Namespace))
                                .cloned()
                                .unwrap_or_else(|| "namespace".to_string());
                            setter.push_str(&format!("{} = module; ", local));
                            spec.namespace_local = Some(local);
                        }
                        spec.side_effect_only =
                            spec.named.is_empty() && spec.default_local.is_none()
                                && spec.namespace_local.is_none();
                    } else {
                        let needs_base = !ext.names.is_empty() || ext.default || ext.namespace;
                        if needs_base {
                            spec.base_var = names.external_base.get(&external_idx).cloned();
                        }
                        spec.default_var =
                            names.external_default_var.get(&external_idx).cloned();
                        spec.namespace_var =
                            names.external_namespace_var.get(&external_idx).cloned();
                        spec.side_effect_only = !needs_base;
                        for name in &ext.names {
                            imported_bindings
                                .entry(path.clone())
                                .or_default()
                                .push(name.clone());
                        }
                    }
                }
                if matches!(
                    output_options.format,
                    OutputFormat::Iife | OutputFormat::Umd
                ) {
                    spec.global_name = Some(match output_options.globals.get(&external.id) {
                        Some(global) => global.clone(),
                        None => {
                            let guessed = make_legal_identifier(&external.id);
                            graph.diagnostics.warn(
                                BundleError::new(
                                    ErrorCode::MissingGlobalName,
                                    format!(
                                        "No name was provided for external module \"{}\" in \"output.globals\" - guessing \"{}\".",
                                        external.id, guessed
                                    ),
                                )
                                .with_id(external.id.clone()),
                            );
                            guessed
                        }
                    });
                }
                system_setters.push(setter.trim_end().to_string());
                imports.push(spec);
            }
        }
    }

    let export_names: Vec<String> = names.exports.keys().cloned().collect();
    let export_mode = export_mode_for(graph, chunk, &export_names, output_options)?;
    validate_name_for_exports(&export_names, output_options)?;

    let exports: Vec<ExportSpec> = names
        .exports
        .iter()
        .map(|(exported, var)| {
            let local = names
                .render
                .get(var)
                .cloned()
                .unwrap_or_else(|| "undefined".to_string());
            let live_getter = match var {
                VarRef::External(..) => Some(local.clone()),
                _ => None,
            };
            ExportSpec {
                exported: exported.clone(),
                local,
                live_getter,
            }
        })
        .collect();

    let uses_tla = chunk
        .modules
        .iter()
        .any(|&m| graph.modules[m].uses_top_level_await);
    let has_dynamic_imports = chunk.modules.iter().any(|&m| {
        graph.modules[m]
            .dynamic_imports
            .iter()
            .any(|d| graph.modules[m].statements[d.stmt_index].included)
    });
    let accesses_import_meta = chunk
        .modules
        .iter()
        .any(|&m| !graph.modules[m].import_metas.is_empty());

    let finalize_input = FinalizeInput {
        format: output_options.format,
        body: &body,
        banner: &addons.banner,
        footer: &addons.footer,
        intro: &addons.intro,
        outro: &addons.outro,
        imports: &imports,
        exports: &exports,
        export_mode,
        name: output_options.name.as_deref(),
        extend: output_options.extend,
        amd_id: output_options.amd_id.as_deref(),
        amd_define: &output_options.amd_define,
        uses_top_level_await: uses_tla,
        needs_interop_default: names.needs_interop_default,
        needs_interop_namespace: names.needs_interop_namespace
            || uses_dynamic_namespace_interop,
        needs_merge_namespaces: names.needs_merge_namespaces,
        es_module_marker: output_options.es_module_marker,
        external_live_bindings: output_options.external_live_bindings,
        system_setters: &system_setters,
        has_dynamic_imports,
        accesses_import_meta,
    };
    let mut code = finalize(&finalize_input);

    // ---- source map -----------------------------------------------------
    let mut chunk_map = if output_options.sourcemap.is_enabled() && !body.is_empty() {
        let body_offset = code
            .find(body.as_str())
            .map(|at| code[..at].matches('\n').count() as u32)
            .unwrap_or(0);
        let shifted = mappings
            .into_iter()
            .map(|(mut mapping, chain)| {
                mapping.gen_line += body_offset;
                (mapping, chain)
            })
            .collect();
        let transform: Option<&dyn Fn(&str, &str) -> String> = output_options
            .sourcemap_path_transform
            .as_ref()
            .map(|f| f.as_ref() as &dyn Fn(&str, &str) -> String);
        Some(sourcemaps::build_chunk_map(
            &chunk.file_name,
            shifted,
            transform,
        ))
    } else {
        None
    };

    // ---- renderChunk hook chain ----------------------------------------
    let info = RenderedChunkInfo {
        file_name: chunk.file_name.clone(),
        name: chunk.name.clone(),
        is_entry: chunk.is_entry_chunk,
        is_dynamic_entry: chunk.is_dynamic_entry,
        facade_module_id: chunk.facade_module.map(|m| graph.modules[m].id.clone()),
        exports: export_names.clone(),
        imports: imports.iter().map(|i| i.path.clone()).collect(),
        module_ids: chunk
            .modules
            .iter()
            .map(|&m| graph.modules[m].id.clone())
            .collect(),
    };
    code = graph.driver.hook_reduce("renderChunk", code, |plugin, ctx, acc| {
        match plugin.render_chunk(ctx, &acc, &info, output_options)? {
            Some(output) => {
                if let Some(raw_map) = &output.map {
                    if let (Some(current), Ok(plugin_map)) = (
                        chunk_map.take(),
                        sourcemap::SourceMap::from_slice(raw_map.as_bytes()),
                    ) {
                        chunk_map = Some(sourcemaps::compose_maps(&plugin_map, &current));
                    }
                }
                Ok(output.code)
            }
            None => Ok(acc),
        }
    })?;

    // referenced emitted files
    let mut referenced_files: Vec<String> = Vec::new();
    for &module_idx in &chunk.modules {
        for meta in &graph.modules[module_idx].import_metas {
            if let Some(reference) = &meta.file_reference {
                if let Ok(file_name) = graph.emitter.get_file_name(reference) {
                    referenced_files.push(file_name);
                }
            }
        }
    }

    let own_hash = compute_own_hash(graph, &code, &addons, &names, output_options, &info)?;

    let dynamic_imports: Vec<String> = chunk
        .dynamic_dependencies
        .iter()
        .map(|dep| match *dep {
            ChunkDep::Chunk(c) => chunks[c].file_name.clone(),
            ChunkDep::External(e) => graph.externals[e].id.clone(),
        })
        .collect();

    let map_json = chunk_map.as_ref().map(sourcemaps::map_to_json);
    Ok(RenderedChunkState {
        code,
        map_json,
        own_hash,
        file_name: chunk.file_name.clone(),
        exports: export_names,
        imports: imports.iter().map(|i| i.path.clone()).collect(),
        imported_bindings,
        dynamic_imports,
        referenced_files,
    })
}

fn validate_name_for_exports(
    export_names: &[String],
    output_options: &OutputOptions,
) -> BundleResult<()> {
    if matches!(
        output_options.format,
        OutputFormat::Iife | OutputFormat::Umd
    ) && !export_names.is_empty()
        && output_options.name.is_none()
        && !output_options.extend
    {
        return Err(BundleError::new(
            ErrorCode::MissingNameOptionForIifeExport,
            "You must supply \"output.name\" for iife/umd bundles that have exports.",
        ));
    }
    Ok(())
}

fn module_renames(
    graph: &Graph,
    names: &ChunkNames,
    module_idx: ModuleIdx,
) -> BundleResult<AHashMap<swc_ecma_ast::Id, String>> {
    let mut renames: AHashMap<swc_ecma_ast::Id, String> = AHashMap::default();
    for (var, name) in &names.render {
        if let VarRef::Local(m, id) = var {
            if *m == module_idx && name != id.0.as_str() {
                renames.insert(id.clone(), name.clone());
            }
        }
    }
    let module = &graph.modules[module_idx];
    for id in module.import_descriptions.keys() {
        let expr = match graph.resolve_import_reference(module_idx, id)? {
            Some(target) => match VarRef::from_target(&target) {
                Some(var) => names
                    .render
                    .get(&var)
                    .cloned()
                    .unwrap_or_else(|| "undefined".to_string()),
                None => "undefined".to_string(),
            },
            None => continue,
        };
        renames.insert(id.clone(), expr);
    }
    Ok(renames)
}

/// The chunk's own content hash: format, addons, rendered source, export
/// identity, and plugin contributions.
fn compute_own_hash(
    graph: &Graph,
    code: &str,
    addons: &Addons,
    names: &ChunkNames,
    output_options: &OutputOptions,
    info: &RenderedChunkInfo,
) -> BundleResult<u64> {
    let mut export_identity: Vec<String> = names
        .exports
        .iter()
        .map(|(exported, var)| {
            let origin = match var {
                VarRef::Local(m, id) => format!("{}:{}", graph.modules[*m].id, id.0),
                VarRef::Default(m) => format!("{}:default", graph.modules[*m].id),
                VarRef::Namespace(m) => format!("{}:*", graph.modules[*m].id),
                VarRef::Synthetic(m, n) => format!("{}:synthetic:{}", graph.modules[*m].id, n),
                VarRef::External(e, n) => {
                    format!("{}:{}", graph.externals[*e].id, n.as_export_name())
                }
            };
            format!("{}:{}", origin, exported)
        })
        .collect();
    export_identity.sort();

    let augment = graph.driver.hook_reduce(
        "augmentChunkHash",
        String::new(),
        |plugin, ctx, acc| match plugin.augment_chunk_hash(ctx, info)? {
            Some(piece) => Ok(format!("{}{}", acc, piece)),
            None => Ok(acc),
        },
    )?;

    let mut parts: Vec<&[u8]> = vec![
        output_options.format.as_str().as_bytes(),
        addons.banner.as_bytes(),
        addons.footer.as_bytes(),
        addons.intro.as_bytes(),
        addons.outro.as_bytes(),
        code.as_bytes(),
        augment.as_bytes(),
    ];
    let export_blob = export_identity.join("\n");
    parts.push(export_blob.as_bytes());
    Ok(hash_parts(parts))
}

/// Two-pass `[hash]` substitution: hashes are computed over placeholder
/// content bottom-up through the chunk dependency graph, then every
/// placeholder occurrence (file names and import specifiers alike) is
/// replaced with the final hash.
fn substitute_hashes(
    chunks: &[Chunk],
    rendered: &mut [RenderedChunkState],
) -> BundleResult<()> {
    fn transitive_hash(
        idx: usize,
        chunks: &[Chunk],
        rendered: &[RenderedChunkState],
        visited: &mut AHashSet<usize>,
    ) -> u64 {
        if !visited.insert(idx) {
            return rendered[idx].own_hash;
        }
        let mut dep_parts: Vec<u64> = Vec::new();
        for dep in &chunks[idx].dependencies {
            if let ChunkDep::Chunk(dep_idx) = *dep {
                dep_parts.push(transitive_hash(dep_idx, chunks, rendered, visited));
                dep_parts.push(crate::utils::hashing::hash_str(&chunks[dep_idx].file_name));
            }
        }
        let mut blob: Vec<u8> = rendered[idx].own_hash.to_le_bytes().to_vec();
        for part in dep_parts {
            blob.extend_from_slice(&part.to_le_bytes());
        }
        hash_parts([blob.as_slice()])
    }

    let mut replacements: Vec<(String, String)> = Vec::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        if let Some(placeholder) = &chunk.hash_placeholder {
            let mut visited = AHashSet::default();
            let final_hash = transitive_hash(idx, chunks, rendered, &mut visited);
            replacements.push((placeholder.clone(), hex_hash(final_hash, 8)));
        }
    }

    if replacements.is_empty() {
        return Ok(());
    }
    for state in rendered.iter_mut() {
        state.code = crate::utils::hashing::replace_placeholders(&state.code, &replacements);
        state.file_name =
            crate::utils::hashing::replace_placeholders(&state.file_name, &replacements);
        for import in &mut state.imports {
            *import = crate::utils::hashing::replace_placeholders(import, &replacements);
        }
        for dynamic in &mut state.dynamic_imports {
            *dynamic = crate::utils::hashing::replace_placeholders(dynamic, &replacements);
        }
        let rekeyed: IndexMap<String, Vec<String>> = state
            .imported_bindings
            .drain(..)
            .map(|(k, v)| {
                (
                    crate::utils::hashing::replace_placeholders(&k, &replacements),
                    v,
                )
            })
            .collect();
        state.imported_bindings = rekeyed;
        if let Some(map_json) = &mut state.map_json {
            *map_json = crate::utils::hashing::replace_placeholders(map_json, &replacements);
        }
    }
    Ok(())
}

/// After hashing, emitted-chunk references learn their final file names.
fn report_emitted_chunk_names(
    graph: &Graph,
    chunks: &[Chunk],
    rendered: &[RenderedChunkState],
) {
    for (reference, module_id) in graph.emitter.chunk_module_refs() {
        let found = chunks.iter().enumerate().find(|(_, chunk)| {
            chunk
                .facade_module
                .or_else(|| chunk.modules.first().copied())
                .map(|m| graph.modules[m].id == module_id)
                .unwrap_or(false)
        });
        if let Some((idx, _)) = found {
            graph
                .emitter
                .record_chunk_file_name(&reference, &rendered[idx].file_name);
        }
    }
}
