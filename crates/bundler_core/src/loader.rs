use ahashmap::AHashMap;
use bundle_err::{BundleError, BundleResult, ErrorCode};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde_json::Value as JsonValue;

use crate::graph::Graph;
use crate::module::{ExternalIdx, Module, ModuleIdx, ModuleRef};
use crate::options::{PreserveSignature, SideEffects, SyntheticNamedExports};
use crate::parse::{parse_module, ParsedModule};
use crate::plugin::{LoadOutput, ResolvedId, TransformOutput};
use crate::resolve::{resolve_dynamic_import, resolve_id};
use crate::utils::paths;

/// Flags attached to an entry request.
#[derive(Debug, Clone)]
pub(crate) struct EntrySpec {
    pub name: Option<String>,
    pub user_defined: bool,
    /// Present for emitted chunks that are implicit dependants: the module
    /// is not an entry but must load after one of these.
    pub implicit_after: Option<Vec<String>>,
    pub preserve_signature: Option<PreserveSignature>,
    /// Emitter reference id, so the final chunk file name can be reported
    /// back through `get_file_name`.
    pub emitted_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum RequestKind {
    Entry(EntrySpec),
    /// Loaded into the graph without entry semantics.
    Additional,
    Static {
        importer: ModuleIdx,
        source_index: usize,
    },
    Dynamic {
        importer: ModuleIdx,
        dynamic_index: usize,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub specifier: Option<String>,
    pub kind: RequestKind,
}

/// A module resolved in this wave but not yet loaded.
struct PendingLoad {
    resolved: ResolvedId,
    requests: Vec<Request>,
}

/// The source of a module after the load + transform pipeline.
struct LoadedSource {
    code: String,
    transform_maps: Vec<sourcemap::SourceMap>,
    module_side_effects: Option<SideEffects>,
    synthetic_named_exports: Option<SyntheticNamedExports>,
    meta: Option<JsonValue>,
}

impl Graph {
    /// The LOAD&PARSE phase. Work proceeds in waves: resolve the current
    /// requests, load and parse the new module set in parallel, wire the
    /// edges serially, then collect the next wave (including chunks that
    /// plugins emitted meanwhile). The phase is complete when a wave ends
    /// with no new work scheduled.
    pub(crate) fn run_load_phase(&mut self) -> BundleResult<()> {
        if self.options.input.is_empty() {
            return Err(bundle_err::validation(
                "You must supply at least one entry module through \"input\".",
            ));
        }

        let mut wave: Vec<Request> = self
            .options
            .input
            .clone()
            .into_iter()
            .map(|item| Request {
                specifier: Some(item.id),
                kind: RequestKind::Entry(EntrySpec {
                    name: item.name,
                    user_defined: true,
                    implicit_after: None,
                    preserve_signature: None,
                    emitted_ref: None,
                }),
            })
            .collect();
        wave.extend(self.options.additional_modules.clone().into_iter().map(|id| {
            Request {
                specifier: Some(id),
                kind: RequestKind::Additional,
            }
        }));

        // modules whose dependency ids resolve in the current wave; their
        // moduleParsed hook fires at the end of it
        let mut awaiting_parsed_hook: Vec<ModuleIdx> = Vec::new();
        // implicit dependants wired after everything is loaded
        let mut implicit_links: Vec<(ModuleIdx, Vec<String>)> = Vec::new();

        loop {
            if wave.is_empty() {
                let emitted = self.drain_emitted_chunks();
                if emitted.is_empty() {
                    break;
                }
                wave = emitted;
            }

            let requests = std::mem::take(&mut wave);

            // fan-out: resolution may call plugin hooks concurrently
            let resolutions: Vec<BundleResult<Option<ResolvedId>>> = requests
                .par_iter()
                .map(|request| self.resolve_request(request))
                .collect();

            // serial: classify into existing modules, externals, new loads
            let mut pending: IndexMap<String, PendingLoad> = IndexMap::new();
            for (request, resolution) in requests.into_iter().zip(resolutions) {
                match resolution? {
                    None => self.handle_unresolved(request)?,
                    Some(resolved) if resolved.is_external() => {
                        self.handle_external(&request, resolved)?;
                    }
                    Some(resolved) => {
                        if let Some(&module_ref) = self.by_id.get(&resolved.id) {
                            self.wire_request(&request, module_ref)?;
                        } else if let Some(pending_load) = pending.get_mut(&resolved.id) {
                            pending_load.requests.push(request);
                        } else {
                            pending.insert(
                                resolved.id.clone(),
                                PendingLoad {
                                    resolved,
                                    requests: vec![request],
                                },
                            );
                        }
                    }
                }
            }

            // fan-out: load, transform and parse the new module set
            let load_order: Vec<&PendingLoad> = pending.values().collect();
            let parsed: Vec<BundleResult<(LoadedSource, ParsedModule)>> = load_order
                .par_iter()
                .map(|pending_load| {
                    let id = &pending_load.resolved.id;
                    let source = self.load_module_source(id)?;
                    let parsed = parse_module(
                        &self.cm,
                        &self.globals,
                        id,
                        source.code.clone(),
                        self.options.treeshake.annotations,
                    )?;
                    Ok((source, parsed))
                })
                .collect();

            // serial: insert modules, wire edges, queue dependencies
            let mut new_modules: Vec<ModuleIdx> = Vec::new();
            for (pending_load, outcome) in pending.into_values().zip(parsed) {
                let (source, parsed) = outcome?;
                let idx = self.insert_module(&pending_load.resolved, source, parsed);
                new_modules.push(idx);
                for request in &pending_load.requests {
                    self.wire_request(request, ModuleRef::Module(idx))?;
                    if let RequestKind::Entry(spec) = &request.kind {
                        if let Some(after) = &spec.implicit_after {
                            implicit_links.push((idx, after.clone()));
                        }
                    }
                }
            }

            // the previous wave's modules now have every dependency id
            // resolved (their requests were processed above)
            for idx in awaiting_parsed_hook.drain(..) {
                let info = self.module_info(idx);
                self.driver
                    .hook_parallel("moduleParsed", |plugin, ctx| plugin.module_parsed(ctx, &info))?;
            }
            awaiting_parsed_hook = new_modules.clone();

            for idx in new_modules {
                wave.extend(self.dependency_requests(idx));
            }
            wave.extend(self.drain_emitted_chunks());
        }

        for idx in awaiting_parsed_hook.drain(..) {
            let info = self.module_info(idx);
            self.driver
                .hook_parallel("moduleParsed", |plugin, ctx| plugin.module_parsed(ctx, &info))?;
        }

        self.wire_implicit_links(implicit_links)?;
        self.order_entry_modules();
        Ok(())
    }

    fn resolve_request(&self, request: &Request) -> BundleResult<Option<ResolvedId>> {
        match &request.kind {
            RequestKind::Entry(_) => {
                let specifier = request.specifier.as_deref().unwrap_or_default();
                resolve_id(&self.driver, &self.resolve_cfg, specifier, None, true, &[])
            }
            RequestKind::Additional => {
                let specifier = request.specifier.as_deref().unwrap_or_default();
                resolve_id(&self.driver, &self.resolve_cfg, specifier, None, false, &[])
            }
            RequestKind::Static { importer, .. } => {
                let importer_module = &self.modules[*importer];
                let specifier = request.specifier.as_deref().unwrap_or_default();
                // per-source resolution cache: a specifier repeated within
                // one importer resolves identically without new hook calls
                if let Some(&cached) = importer_module.resolved_ids.get(specifier) {
                    return Ok(Some(ResolvedId {
                        id: self.ref_id(cached).to_string(),
                        external: match cached {
                            ModuleRef::External(_) => crate::plugin::ExternalKind::External,
                            ModuleRef::Module(_) => crate::plugin::ExternalKind::NotExternal,
                        },
                        module_side_effects: SideEffects::True,
                        synthetic_named_exports: SyntheticNamedExports::No,
                        meta: JsonValue::Null,
                        renormalize_render_path: false,
                    }));
                }
                resolve_id(
                    &self.driver,
                    &self.resolve_cfg,
                    specifier,
                    Some(&importer_module.id),
                    false,
                    &[],
                )
            }
            RequestKind::Dynamic { importer, .. } => resolve_dynamic_import(
                &self.driver,
                &self.resolve_cfg,
                request.specifier.as_deref(),
                &self.modules[*importer].id,
            ),
        }
    }

    fn handle_unresolved(&mut self, request: Request) -> BundleResult<()> {
        let specifier = request.specifier.clone().unwrap_or_default();
        match &request.kind {
            RequestKind::Entry(_) | RequestKind::Additional => {
                Err(bundle_err::unresolved_entry(&specifier))
            }
            RequestKind::Static { importer, .. } | RequestKind::Dynamic { importer, .. } => {
                let importer_id = self.modules[*importer].id.clone();
                if request.specifier.is_none() {
                    // non-literal dynamic import expression: left in place
                    return Ok(());
                }
                if paths::is_relative(&specifier) {
                    return Err(bundle_err::unresolved_import(&specifier, &importer_id));
                }
                // bare specifier: warn and fall back to treating it as an
                // external dependency
                self.diagnostics
                    .warn(bundle_err::unresolved_import_treated_external(
                        &specifier,
                        &importer_id,
                    ));
                let external_ref = self.ensure_external(&specifier, false);
                self.wire_request(&request, external_ref)
            }
        }
    }

    fn handle_external(&mut self, request: &Request, resolved: ResolvedId) -> BundleResult<()> {
        if matches!(request.kind, RequestKind::Entry(_) | RequestKind::Additional) {
            return Err(bundle_err::entry_cannot_be_external(
                request.specifier.as_deref().unwrap_or(&resolved.id),
            ));
        }
        if resolved.synthetic_named_exports != SyntheticNamedExports::No {
            self.diagnostics.warn(
                BundleError::new(
                    ErrorCode::ValidationError,
                    format!(
                        "External module \"{}\" cannot have \"syntheticNamedExports\" enabled.",
                        resolved.id
                    ),
                )
                .with_id(resolved.id.clone()),
            );
        }
        let external_ref = self.ensure_external(&resolved.id, resolved.renormalize_render_path);
        self.wire_request(request, external_ref)
    }

    fn ensure_external(&mut self, id: &str, renormalize: bool) -> ModuleRef {
        if let Some(&existing) = self.by_id.get(id) {
            return existing;
        }
        let idx: ExternalIdx = self.externals.len();
        self.externals
            .push(crate::module::ExternalModule::new(idx, id.to_string(), renormalize));
        let module_ref = ModuleRef::External(idx);
        self.by_id.insert(id.to_string(), module_ref);
        module_ref
    }

    fn wire_request(&mut self, request: &Request, target: ModuleRef) -> BundleResult<()> {
        match &request.kind {
            RequestKind::Additional => {}
            RequestKind::Entry(spec) => {
                let ModuleRef::Module(idx) = target else {
                    return Err(bundle_err::entry_cannot_be_external(
                        request.specifier.as_deref().unwrap_or_default(),
                    ));
                };
                self.register_entry(idx, spec);
            }
            RequestKind::Static {
                importer,
                source_index,
            } => {
                let specifier = request.specifier.clone().unwrap_or_default();
                let module = &mut self.modules[*importer];
                module.resolutions[*source_index] = Some(target);
                module.resolved_ids.insert(specifier, target);
                match target {
                    ModuleRef::Module(idx) => {
                        if !self.modules[idx].importers.contains(importer) {
                            self.modules[idx].importers.push(*importer);
                        }
                    }
                    ModuleRef::External(idx) => {
                        if !self.externals[idx].importers.contains(importer) {
                            self.externals[idx].importers.push(*importer);
                        }
                    }
                }
            }
            RequestKind::Dynamic {
                importer,
                dynamic_index,
            } => {
                self.modules[*importer].dynamic_imports[*dynamic_index].resolution = Some(target);
                match target {
                    ModuleRef::Module(idx) => {
                        if !self.modules[idx].dynamic_importers.contains(importer) {
                            self.modules[idx].dynamic_importers.push(*importer);
                        }
                    }
                    ModuleRef::External(idx) => {
                        if !self.externals[idx].dynamic_importers.contains(importer) {
                            self.externals[idx].dynamic_importers.push(*importer);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn register_entry(&mut self, idx: ModuleIdx, spec: &EntrySpec) {
        let entry_index = self.next_entry_index;
        self.next_entry_index += 1;

        let is_implicit = spec.implicit_after.is_some();
        let module = &mut self.modules[idx];
        if !is_implicit {
            module.is_entry = true;
        }
        module.is_user_defined_entry_point |= spec.user_defined;
        // repeated entries merge onto the smallest index
        module.entry_index = Some(match module.entry_index {
            Some(existing) => existing.min(entry_index),
            None => entry_index,
        });
        if module.chunk_name.is_none() {
            if let Some(name) = &spec.name {
                module.chunk_name = Some(name.clone());
                module.chunk_name_priority = entry_index;
            }
        }
        if let Some(preserve) = spec.preserve_signature {
            module.preserve_signature = preserve;
        }
        if is_implicit {
            if !self.implicit_entries.contains(&idx) {
                self.implicit_entries.push(idx);
            }
        } else if !self.entry_modules.contains(&idx) {
            self.entry_modules.push(idx);
        }
        if let Some(reference) = &spec.emitted_ref {
            let module_id = self.modules[idx].id.clone();
            self.emitter.record_chunk_module(reference, &module_id);
        }
    }

    fn dependency_requests(&self, idx: ModuleIdx) -> Vec<Request> {
        let module = &self.modules[idx];
        let mut requests = Vec::new();
        for (source_index, specifier) in module.sources.iter().enumerate() {
            requests.push(Request {
                specifier: Some(specifier.clone()),
                kind: RequestKind::Static {
                    importer: idx,
                    source_index,
                },
            });
        }
        for (dynamic_index, dynamic) in module.dynamic_imports.iter().enumerate() {
            requests.push(Request {
                specifier: dynamic.specifier.clone(),
                kind: RequestKind::Dynamic {
                    importer: idx,
                    dynamic_index,
                },
            });
        }
        requests
    }

    fn drain_emitted_chunks(&mut self) -> Vec<Request> {
        self.emitter
            .take_pending_chunks()
            .into_iter()
            .map(|record| Request {
                specifier: Some(record.id.clone()),
                kind: RequestKind::Entry(EntrySpec {
                    name: record.name.clone(),
                    user_defined: false,
                    implicit_after: record.implicitly_loaded_after_one_of.clone(),
                    preserve_signature: record.preserve_signature,
                    emitted_ref: Some(record.reference_id.clone()),
                }),
            })
            .collect()
    }

    /// Loads a module's code through the gated `load` chain, then threads
    /// it through the `transform` reduce chain, accumulating source maps.
    fn load_module_source(&self, id: &str) -> BundleResult<LoadedSource> {
        let load_output: Option<LoadOutput> = self.driver.file_gate.run(|| {
            self.driver
                .hook_first("load", &[], |plugin, ctx| plugin.load(ctx, id))
        })?;

        let (code, mut maps, side_effects, synthetic, meta) = match load_output {
            Some(output) => {
                let mut maps = Vec::new();
                if let Some(raw_map) = &output.map {
                    maps.push(parse_raw_map(id, raw_map)?);
                }
                (
                    output.code,
                    maps,
                    output.module_side_effects,
                    output.synthetic_named_exports,
                    output.meta,
                )
            }
            None => {
                let code = self.driver.file_gate.run(|| std::fs::read_to_string(id));
                let code = code.map_err(|io_error| {
                    BundleError::new(
                        ErrorCode::ValidationError,
                        format!("Could not load {}: {}", id, io_error),
                    )
                    .with_id(id)
                })?;
                (code, Vec::new(), None, None, None)
            }
        };

        let transformed = self.driver.hook_reduce(
            "transform",
            TransformOutput { code, map: None },
            |plugin, ctx, acc| {
                match plugin.transform(ctx, &acc.code, id)? {
                    Some(next) => Ok(next),
                    None => Ok(acc),
                }
            },
        )?;
        if let Some(raw_map) = &transformed.map {
            maps.push(parse_raw_map(id, raw_map)?);
        }

        Ok(LoadedSource {
            code: transformed.code,
            transform_maps: maps,
            module_side_effects: side_effects,
            synthetic_named_exports: synthetic,
            meta,
        })
    }

    fn insert_module(
        &mut self,
        resolved: &ResolvedId,
        source: LoadedSource,
        parsed: ParsedModule,
    ) -> ModuleIdx {
        let idx = self.modules.len();
        let scan = parsed.scan;
        let source_count = scan.sources.len();
        let module = Module {
            idx,
            id: resolved.id.clone(),
            fm: parsed.fm,
            program: parsed.program,
            top_level_ctxt: parsed.top_level_ctxt,
            unresolved_ctxt: parsed.unresolved_ctxt,
            sources: scan.sources,
            resolutions: vec![None; source_count],
            resolved_ids: AHashMap::default(),
            dynamic_imports: scan.dynamic_imports,
            import_metas: scan.import_metas,
            import_descriptions: scan.import_descriptions,
            local_exports: scan.local_exports,
            reexports: scan.reexports,
            star_export_sources: scan.star_export_sources,
            statements: scan.statements,
            foreign_directives: scan.foreign_directives,
            declared_by: scan.declared_by,
            reassigned: scan.reassigned,
            const_env: scan.const_env,
            is_entry: false,
            is_user_defined_entry_point: false,
            entry_index: None,
            chunk_name: None,
            chunk_name_priority: usize::MAX,
            preserve_signature: self.options.preserve_entry_signatures,
            module_side_effects: source
                .module_side_effects
                .unwrap_or(resolved.module_side_effects),
            synthetic_named_exports: source
                .synthetic_named_exports
                .unwrap_or_else(|| resolved.synthetic_named_exports.clone()),
            meta: source.meta.unwrap_or_else(|| resolved.meta.clone()),
            exec_index: usize::MAX,
            importers: Vec::new(),
            dynamic_importers: Vec::new(),
            implicitly_loaded_before: Vec::new(),
            implicitly_loaded_after: Vec::new(),
            included: false,
            executed: false,
            namespace_included: false,
            uses_top_level_await: scan.uses_top_level_await,
            transform_maps: source.transform_maps,
        };
        self.by_id.insert(module.id.clone(), ModuleRef::Module(idx));
        self.modules.push(module);
        idx
    }

    fn wire_implicit_links(
        &mut self,
        links: Vec<(ModuleIdx, Vec<String>)>,
    ) -> BundleResult<()> {
        for (module_idx, after_specs) in links {
            for specifier in after_specs {
                let resolved =
                    resolve_id(&self.driver, &self.resolve_cfg, &specifier, None, false, &[])?;
                let target = resolved
                    .as_ref()
                    .filter(|r| !r.is_external())
                    .and_then(|r| self.by_id.get(&r.id))
                    .copied();
                match target {
                    Some(ModuleRef::Module(after_idx)) => {
                        self.modules[module_idx]
                            .implicitly_loaded_after
                            .push(after_idx);
                        self.modules[after_idx]
                            .implicitly_loaded_before
                            .push(module_idx);
                    }
                    _ => {
                        return Err(BundleError::new(
                            ErrorCode::ChunkInvalid,
                            format!(
                                "Module \"{}\" that should be implicitly loaded before \"{}\" could not be resolved to a module in the graph.",
                                specifier, self.modules[module_idx].id
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn order_entry_modules(&mut self) {
        let modules = &self.modules;
        self.entry_modules.sort_by_key(|&idx| {
            (
                modules[idx].entry_index.unwrap_or(usize::MAX),
                modules[idx].chunk_name_priority,
            )
        });
    }
}

fn parse_raw_map(id: &str, raw: &str) -> BundleResult<sourcemap::SourceMap> {
    sourcemap::SourceMap::from_slice(raw.as_bytes()).map_err(|parse_error| {
        let mut error = bundle_err::bad_loader(id);
        error.message = format!(
            "Error when using sourcemap for reporting an error: {}. The map for \"{}\" could not be parsed.",
            parse_error, id
        );
        error
    })
}
