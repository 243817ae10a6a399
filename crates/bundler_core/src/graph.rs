use std::sync::Arc;

use ahashmap::AHashSet;
use bundle_err::{BundleError, BundleResult, Locate};
use indexmap::IndexMap;
use swc_common::{sync::Lrc, Globals, SourceMap, Span};

use crate::diagnostics::Diagnostics;
use crate::emit::{EmitterPhase, FileEmitter};
use crate::module::{
    ExternalIdx, ExternalModule, ImportedName, LocalExportKind, Module, ModuleIdx, ModuleRef,
    StmtIdx,
};
use crate::options::{InputOptions, SyntheticNamedExports};
use crate::plugin::ModuleInfo;
use crate::plugin_driver::PluginDriver;
use crate::resolve::ResolveConfig;

/// Where an export name of a module ultimately binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// A top-level binding of an owned module.
    Local {
        module: ModuleIdx,
        id: swc_ecma_ast::Id,
        stmt: StmtIdx,
    },
    /// The default export slot of an owned module.
    Default { module: ModuleIdx },
    /// The namespace object of an owned module (`export * as ns`).
    Namespace { module: ModuleIdx },
    /// A binding of an external module.
    External {
        external: ExternalIdx,
        name: ImportedName,
    },
    /// A synthetic named export falling back onto a designated export.
    Synthetic { module: ModuleIdx, name: String },
    Missing,
}

/// Process-wide build state: the module stores, shared services and the
/// ANALYSE results. Mutable during LOAD&PARSE, conceptually frozen once
/// generation starts.
pub struct Graph {
    pub options: InputOptions,
    pub cm: Lrc<SourceMap>,
    pub globals: Globals,
    pub driver: Arc<PluginDriver>,
    pub diagnostics: Arc<Diagnostics>,
    pub emitter: Arc<FileEmitter>,
    pub resolve_cfg: ResolveConfig,

    pub modules: Vec<Module>,
    pub externals: Vec<ExternalModule>,
    /// Insertion-ordered id index over both stores.
    pub by_id: IndexMap<String, ModuleRef>,

    /// Entry modules ordered by (entry_index, chunk name priority).
    pub entry_modules: Vec<ModuleIdx>,
    pub implicit_entries: Vec<ModuleIdx>,
    pub(crate) next_entry_index: usize,

    /// Canonicalised static-import cycles found during execution-order
    /// analysis.
    pub cycle_paths: Vec<Vec<String>>,
}

impl Graph {
    pub fn new(options: InputOptions) -> Self {
        let diagnostics = Arc::new(Diagnostics::new(&options));
        let emitter = Arc::new(FileEmitter::default());
        emitter.set_phase(EmitterPhase::Build);
        let driver = Arc::new(PluginDriver::new(
            options.plugins.clone(),
            diagnostics.clone(),
            emitter.clone(),
            options.max_parallel_file_ops,
        ));
        let resolve_cfg = ResolveConfig {
            external: options.external.clone(),
            make_absolute_externals_relative: options.make_absolute_externals_relative,
            default_module_side_effects: options.treeshake.module_side_effects,
        };
        Self {
            options,
            cm: Lrc::<SourceMap>::default(),
            globals: Globals::new(),
            driver,
            diagnostics,
            emitter,
            resolve_cfg,
            modules: Vec::new(),
            externals: Vec::new(),
            by_id: IndexMap::new(),
            entry_modules: Vec::new(),
            implicit_entries: Vec::new(),
            next_entry_index: 0,
            cycle_paths: Vec::new(),
        }
    }

    /// Runs LOAD&PARSE and ANALYSE. After this returns the module stores
    /// are frozen and every included statement is flagged.
    pub fn build(&mut self) -> BundleResult<()> {
        self.driver.hook_parallel("buildStart", |plugin, ctx| {
            plugin.build_start(ctx, &self.options)
        })?;

        self.run_load_phase()?;
        self.warn_foreign_directives();

        // ANALYSE barrier: binding resolution, execution order, inclusion
        self.bind_references()?;
        crate::execution::analyse_execution_order(self);
        crate::treeshake::run_inclusion_pass(self)?;
        Ok(())
    }

    pub fn module(&self, idx: ModuleIdx) -> &Module {
        &self.modules[idx]
    }

    pub fn module_mut(&mut self, idx: ModuleIdx) -> &mut Module {
        &mut self.modules[idx]
    }

    pub fn external(&self, idx: ExternalIdx) -> &ExternalModule {
        &self.externals[idx]
    }

    pub fn ref_id(&self, module_ref: ModuleRef) -> &str {
        match module_ref {
            ModuleRef::Module(idx) => &self.modules[idx].id,
            ModuleRef::External(idx) => &self.externals[idx].id,
        }
    }

    pub(crate) fn locate(&self, module: &Module, span: Span) -> Locate {
        let loc = self.cm.lookup_char_pos(span.lo);
        Locate {
            file: module.id.clone(),
            line: loc.line,
            column: loc.col_display + 1,
        }
    }

    fn warn_foreign_directives(&self) {
        for module in &self.modules {
            for span in &module.foreign_directives {
                self.diagnostics.warn(
                    BundleError::new(
                        bundle_err::ErrorCode::ValidationError,
                        format!(
                            "Module {} contains a directive that is neither 'use strict' nor understood by the bundler; it was ignored.",
                            module.id
                        ),
                    )
                    .with_id(module.id.clone())
                    .with_loc(self.locate(module, *span)),
                );
            }
        }
    }

    /// All export names of a module, star re-exports of owned modules
    /// expanded. `default` never propagates through a star.
    pub fn export_names(&self, idx: ModuleIdx) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen_modules = AHashSet::default();
        self.collect_export_names(idx, true, &mut names, &mut seen_modules);
        names.sort();
        names.dedup();
        names
    }

    fn collect_export_names(
        &self,
        idx: ModuleIdx,
        is_root: bool,
        names: &mut Vec<String>,
        seen: &mut AHashSet<ModuleIdx>,
    ) {
        if !seen.insert(idx) {
            return;
        }
        let module = &self.modules[idx];
        for name in module.local_exports.keys().chain(module.reexports.keys()) {
            if is_root || name != "default" {
                names.push(name.clone());
            }
        }
        for &source_index in &module.star_export_sources {
            if let Some(ModuleRef::Module(target)) = module.resolutions[source_index] {
                self.collect_export_names(target, false, names, seen);
            }
        }
    }

    /// Resolves what `name` exported from module `idx` binds to, following
    /// re-export chains with a visited set. A chain that revisits an
    /// (exporter, name) pair is a fatal circular re-export.
    pub fn resolve_export(
        &self,
        idx: ModuleIdx,
        name: &str,
    ) -> BundleResult<ExportTarget> {
        let mut visited = AHashSet::default();
        self.resolve_export_inner(idx, name, &mut visited)
    }

    fn resolve_export_inner(
        &self,
        idx: ModuleIdx,
        name: &str,
        visited: &mut AHashSet<(ModuleIdx, String)>,
    ) -> BundleResult<ExportTarget> {
        if !visited.insert((idx, name.to_string())) {
            return Err(bundle_err::circular_reexport(name, &self.modules[idx].id));
        }
        let module = &self.modules[idx];

        if let Some(local) = module.local_exports.get(name) {
            return Ok(match &local.kind {
                LocalExportKind::Local(id) => ExportTarget::Local {
                    module: idx,
                    id: id.clone(),
                    stmt: local.stmt_index,
                },
                LocalExportKind::Default { .. } => ExportTarget::Default { module: idx },
            });
        }

        if let Some(reexport) = module.reexports.get(name) {
            match module.resolutions[reexport.source_index] {
                Some(ModuleRef::External(external)) => {
                    return Ok(ExportTarget::External {
                        external,
                        name: reexport.imported.clone(),
                    });
                }
                Some(ModuleRef::Module(target)) => {
                    return match &reexport.imported {
                        ImportedName::Namespace => Ok(ExportTarget::Namespace { module: target }),
                        ImportedName::Default => {
                            self.resolve_export_inner(target, "default", visited)
                        }
                        ImportedName::Name(imported) => {
                            self.resolve_export_inner(target, imported, visited)
                        }
                    };
                }
                None => return Ok(ExportTarget::Missing),
            }
        }

        if name != "default" {
            for &source_index in &module.star_export_sources {
                if let Some(ModuleRef::Module(target)) = module.resolutions[source_index] {
                    let found = self.resolve_export_inner(target, name, visited)?;
                    if found != ExportTarget::Missing {
                        return Ok(found);
                    }
                }
            }
        }

        if module.synthetic_named_exports != SyntheticNamedExports::No {
            let fallback = module
                .synthetic_named_exports
                .fallback_export_name()
                .unwrap_or("default")
                .to_string();
            if name != fallback {
                let fallback_target = self.resolve_export_inner(idx, &fallback, visited)?;
                if fallback_target == ExportTarget::Missing {
                    return Err(BundleError::new(
                        bundle_err::ErrorCode::SyntheticNamedExportsNeedFallback,
                        format!(
                            "Module \"{}\" that is marked with `syntheticNamedExports` needs an export named \"{}\" that does not exist.",
                            module.id, fallback
                        ),
                    )
                    .with_id(module.id.clone()));
                }
                return Ok(ExportTarget::Synthetic {
                    module: idx,
                    name: name.to_string(),
                });
            }
        }

        Ok(ExportTarget::Missing)
    }

    /// Resolves a top-level reference of `module` to its cross-module
    /// target when it is an import binding; `None` for plain locals.
    pub fn resolve_import_reference(
        &self,
        idx: ModuleIdx,
        id: &swc_ecma_ast::Id,
    ) -> BundleResult<Option<ExportTarget>> {
        let module = &self.modules[idx];
        let Some(description) = module.import_descriptions.get(id) else {
            return Ok(None);
        };
        let target = match module.resolutions[description.source_index] {
            None => ExportTarget::Missing,
            Some(ModuleRef::External(external)) => ExportTarget::External {
                external,
                name: description.imported.clone(),
            },
            Some(ModuleRef::Module(target)) => match &description.imported {
                ImportedName::Namespace => ExportTarget::Namespace { module: target },
                ImportedName::Default => self.resolve_export(target, "default")?,
                ImportedName::Name(name) => self.resolve_export(target, name)?,
            },
        };
        Ok(Some(target))
    }

    /// The binding-resolution pass: every named import and re-export is
    /// resolved once so missing exports warn with their source location.
    pub fn bind_references(&mut self) -> BundleResult<()> {
        for idx in 0..self.modules.len() {
            let descriptions: Vec<(swc_ecma_ast::Id, usize, Span)> = self.modules[idx]
                .import_descriptions
                .iter()
                .map(|(id, d)| (id.clone(), d.source_index, d.span))
                .collect();
            for (id, source_index, span) in descriptions {
                let module = &self.modules[idx];
                let imported = module.import_descriptions[&id].imported.clone();
                if let Some(ModuleRef::Module(target)) = module.resolutions[source_index] {
                    if let ImportedName::Name(name) = &imported {
                        if self.resolve_export(target, name)? == ExportTarget::Missing {
                            let module = &self.modules[idx];
                            let loc = self.locate(module, span);
                            self.diagnostics.warn(
                                bundle_err::missing_export(
                                    name,
                                    &module.id,
                                    &self.modules[target].id,
                                )
                                .with_loc(loc),
                            );
                        }
                    }
                }
            }

            let reexports: Vec<(String, usize, ImportedName, Span)> = self.modules[idx]
                .reexports
                .iter()
                .map(|(n, r)| (n.clone(), r.source_index, r.imported.clone(), r.span))
                .collect();
            for (_name, source_index, imported, span) in reexports {
                let module = &self.modules[idx];
                if let Some(ModuleRef::Module(target)) = module.resolutions[source_index] {
                    if let ImportedName::Name(name) = &imported {
                        if self.resolve_export(target, name)? == ExportTarget::Missing {
                            let module = &self.modules[idx];
                            let loc = self.locate(module, span);
                            self.diagnostics.warn(
                                bundle_err::missing_export(
                                    name,
                                    &module.id,
                                    &self.modules[target].id,
                                )
                                .with_loc(loc),
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn module_info(&self, idx: ModuleIdx) -> ModuleInfo {
        let module = &self.modules[idx];
        ModuleInfo {
            id: module.id.clone(),
            is_entry: module.is_entry,
            is_external: false,
            importers: module
                .importers
                .iter()
                .map(|&i| self.modules[i].id.clone())
                .collect(),
            dynamic_importers: module
                .dynamic_importers
                .iter()
                .map(|&i| self.modules[i].id.clone())
                .collect(),
            imported_ids: module
                .resolutions
                .iter()
                .flatten()
                .map(|&r| self.ref_id(r).to_string())
                .collect(),
            dynamically_imported_ids: module
                .dynamic_imports
                .iter()
                .filter_map(|d| d.resolution)
                .map(|r| self.ref_id(r).to_string())
                .collect(),
            meta: module.meta.clone(),
        }
    }
}
