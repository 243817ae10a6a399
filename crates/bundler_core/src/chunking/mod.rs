pub mod assign;

use ahashmap::{AHashMap, AHashSet};
use bundle_err::BundleResult;
use indexmap::{IndexMap, IndexSet};
use swc_ecma_ast::Id;

use crate::graph::{ExportTarget, Graph};
use crate::module::{ExternalIdx, ImportedName, ModuleIdx, ModuleRef};
use crate::options::{OutputOptions, PreserveSignature};
use crate::utils::hashing::hash_placeholder;
use crate::utils::paths;

/// A variable handle as the renderer sees it: everything that can carry a
/// render name or be wired across chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarRef {
    /// A top-level binding of an owned module.
    Local(ModuleIdx, Id),
    /// The default-export slot of a module.
    Default(ModuleIdx),
    /// The synthesised namespace object of a module.
    Namespace(ModuleIdx),
    /// A synthetic named export, read off the fallback export at runtime.
    Synthetic(ModuleIdx, String),
    /// A binding imported from an external module.
    External(ExternalIdx, ImportedName),
}

impl VarRef {
    pub fn from_target(target: &ExportTarget) -> Option<VarRef> {
        match target {
            ExportTarget::Local { module, id, .. } => Some(VarRef::Local(*module, id.clone())),
            ExportTarget::Default { module } => Some(VarRef::Default(*module)),
            ExportTarget::Namespace { module } => Some(VarRef::Namespace(*module)),
            ExportTarget::Synthetic { module, name } => {
                Some(VarRef::Synthetic(*module, name.clone()))
            }
            ExportTarget::External { external, name } => {
                Some(VarRef::External(*external, name.clone()))
            }
            ExportTarget::Missing => None,
        }
    }

    /// The module whose chunk owns this variable; externals have none.
    pub fn owner_module(&self) -> Option<ModuleIdx> {
        match self {
            VarRef::Local(m, _)
            | VarRef::Default(m)
            | VarRef::Namespace(m)
            | VarRef::Synthetic(m, _) => Some(*m),
            VarRef::External(..) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkDep {
    Chunk(usize),
    External(ExternalIdx),
}

/// Per-external import requirements of one chunk.
#[derive(Debug, Clone, Default)]
pub struct ExternalImports {
    pub names: IndexSet<String>,
    pub default: bool,
    pub namespace: bool,
    pub side_effect: bool,
    pub reexported_star: bool,
}

/// One output chunk under construction: module set, entry bookkeeping,
/// export signature and cross-chunk wiring.
#[derive(Debug)]
pub struct Chunk {
    pub idx: usize,
    /// Modules rendered into this chunk in execution order; empty for
    /// generated facades.
    pub modules: Vec<ModuleIdx>,
    pub entry_modules: Vec<ModuleIdx>,
    pub dynamic_entry_modules: Vec<ModuleIdx>,
    pub facade_module: Option<ModuleIdx>,
    pub strict_facade: bool,
    pub is_entry_chunk: bool,
    pub is_dynamic_entry: bool,
    pub is_implicit_entry: bool,
    pub manual_alias: Option<String>,
    pub name: String,
    /// Pattern-rendered file name; `[hash]` holds a placeholder until the
    /// final substitution pass.
    pub file_name: String,
    pub hash_placeholder: Option<String>,

    /// Exports with externally-fixed names (entry signatures, dynamic
    /// entry namespaces).
    pub fixed_exports: IndexMap<String, VarRef>,
    /// Internal variables other chunks import; export names fall out of
    /// deconfliction.
    pub internal_exports: IndexSet<VarRef>,
    /// Variables this chunk needs from other chunks.
    pub cross_imports: IndexMap<usize, IndexSet<VarRef>>,
    pub external_imports: IndexMap<ExternalIdx, ExternalImports>,

    pub dependencies: IndexSet<ChunkDep>,
    pub dynamic_dependencies: IndexSet<ChunkDep>,
    pub implicitly_loaded_before: IndexSet<usize>,
    pub exec_order: usize,
}

impl Chunk {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            modules: Vec::new(),
            entry_modules: Vec::new(),
            dynamic_entry_modules: Vec::new(),
            facade_module: None,
            strict_facade: false,
            is_entry_chunk: false,
            is_dynamic_entry: false,
            is_implicit_entry: false,
            manual_alias: None,
            name: String::new(),
            file_name: String::new(),
            hash_placeholder: None,
            fixed_exports: IndexMap::new(),
            internal_exports: IndexSet::new(),
            cross_imports: IndexMap::new(),
            external_imports: IndexMap::new(),
            dependencies: IndexSet::new(),
            dynamic_dependencies: IndexSet::new(),
            implicitly_loaded_before: IndexSet::new(),
            exec_order: usize::MAX,
        }
    }

    pub fn export_names(&self) -> Vec<String> {
        self.fixed_exports.keys().cloned().collect()
    }

    fn import_var(&mut self, owner_chunk: usize, var: VarRef) {
        self.cross_imports
            .entry(owner_chunk)
            .or_default()
            .insert(var);
        self.dependencies.insert(ChunkDep::Chunk(owner_chunk));
    }

    fn import_external(&mut self, external: ExternalIdx) -> &mut ExternalImports {
        self.dependencies.insert(ChunkDep::External(external));
        self.external_imports.entry(external).or_default()
    }
}

/// Builds the chunk graph for one output: partitions modules, synthesises
/// facades, wires dependencies, computes export signatures and assigns
/// (placeholder-hashed) file names.
pub fn build_chunks(
    graph: &Graph,
    output_options: &OutputOptions,
) -> BundleResult<Vec<Chunk>> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut chunk_of: AHashMap<ModuleIdx, usize> = AHashMap::default();
    let dynamic_entry_set: AHashSet<ModuleIdx>;

    if output_options.preserve_modules {
        let mut included: Vec<ModuleIdx> = (0..graph.modules.len())
            .filter(|&i| is_chunkable(graph, i))
            .collect();
        included.sort_by_key(|&i| graph.modules[i].exec_index);
        dynamic_entry_set = collect_included_dynamic_entries(graph);
        for module_idx in included {
            let idx = chunks.len();
            let mut chunk = Chunk::new(idx);
            chunk.modules.push(module_idx);
            chunk_of.insert(module_idx, idx);
            chunks.push(chunk);
        }
    } else {
        let assignment = assign::assign_chunks(graph, output_options);
        dynamic_entry_set = assignment.dynamic_entries.iter().copied().collect();
        for group in assignment.groups {
            let idx = chunks.len();
            let mut chunk = Chunk::new(idx);
            chunk.manual_alias = group.manual_alias;
            for module_idx in &group.modules {
                chunk_of.insert(*module_idx, idx);
            }
            chunk.modules = group.modules;
            chunks.push(chunk);
        }
    }

    // entry bookkeeping per chunk
    for chunk in &mut chunks {
        for &module_idx in &chunk.modules {
            let module = &graph.modules[module_idx];
            if module.is_entry || output_options.preserve_modules {
                chunk.entry_modules.push(module_idx);
            }
            if graph.implicit_entries.contains(&module_idx) {
                chunk.is_implicit_entry = true;
            }
            if dynamic_entry_set.contains(&module_idx) {
                chunk.dynamic_entry_modules.push(module_idx);
                chunk.is_dynamic_entry = true;
            }
        }
        chunk.exec_order = chunk
            .modules
            .iter()
            .map(|&m| graph.modules[m].exec_index)
            .min()
            .unwrap_or(usize::MAX);
    }

    synthesize_facades(graph, &mut chunks)?;
    compute_exports(graph, &mut chunks, &chunk_of)?;
    wire_cross_chunk(graph, &mut chunks, &chunk_of)?;
    finalize_strict_facades(graph, &mut chunks, &chunk_of)?;
    link_dependencies(graph, &mut chunks, &chunk_of);
    assign_names(graph, &mut chunks, output_options);

    Ok(chunks)
}

pub fn is_chunkable(graph: &Graph, idx: ModuleIdx) -> bool {
    let module = &graph.modules[idx];
    module.included || module.namespace_included || module.entry_index.is_some()
}

fn collect_included_dynamic_entries(graph: &Graph) -> AHashSet<ModuleIdx> {
    let mut set = AHashSet::default();
    for module in &graph.modules {
        for dynamic in &module.dynamic_imports {
            if !module.statements[dynamic.stmt_index].included {
                continue;
            }
            if let Some(ModuleRef::Module(target)) = dynamic.resolution {
                set.insert(target);
            }
        }
    }
    set
}

/// Every entry module needs exactly one facade. The chunk itself serves
/// when it can; otherwise an empty re-export chunk is generated.
fn synthesize_facades(graph: &Graph, chunks: &mut Vec<Chunk>) -> BundleResult<()> {
    let chunk_count = chunks.len();
    for chunk_idx in 0..chunk_count {
        let entry_modules = chunks[chunk_idx].entry_modules.clone();
        for entry in entry_modules {
            let preserve = graph.modules[entry].preserve_signature;
            let can_be_natural = chunks[chunk_idx].facade_module.is_none()
                && (preserve != PreserveSignature::Strict
                    || chunks[chunk_idx].entry_modules.len() == 1);
            if can_be_natural {
                let chunk = &mut chunks[chunk_idx];
                chunk.facade_module = Some(entry);
                chunk.strict_facade = matches!(
                    preserve,
                    PreserveSignature::Strict | PreserveSignature::ExportsOnly
                );
                chunk.is_entry_chunk = graph.modules[entry].is_entry;
            } else {
                let facade_idx = chunks.len();
                let mut facade = Chunk::new(facade_idx);
                facade.facade_module = Some(entry);
                facade.strict_facade = preserve != PreserveSignature::AllowExtension;
                facade.is_entry_chunk = graph.modules[entry].is_entry;
                facade.exec_order = graph.modules[entry].exec_index;
                facade
                    .dependencies
                    .insert(ChunkDep::Chunk(chunk_idx));
                chunks.push(facade);
            }
        }
    }
    Ok(())
}

/// Entry signatures and dynamic-entry namespaces become fixed-name
/// exports of their chunk (or facade chunk).
fn compute_exports(
    graph: &Graph,
    chunks: &mut [Chunk],
    _chunk_of: &AHashMap<ModuleIdx, usize>,
) -> BundleResult<()> {
    for chunk in chunks.iter_mut() {
        if let Some(entry) = chunk.facade_module {
            if graph.modules[entry].preserve_signature != PreserveSignature::False {
                for name in graph.export_names(entry) {
                    let target = graph.resolve_export(entry, &name)?;
                    if let Some(var) = VarRef::from_target(&target) {
                        chunk.fixed_exports.insert(name, var);
                    }
                }
            }
        }
        let dynamic_entries = chunk.dynamic_entry_modules.clone();
        for dynamic_entry in dynamic_entries {
            for name in graph.export_names(dynamic_entry) {
                let target = graph.resolve_export(dynamic_entry, &name)?;
                if let Some(var) = VarRef::from_target(&target) {
                    chunk.fixed_exports.entry(name).or_insert(var);
                }
            }
        }
    }
    Ok(())
}

/// Resolves every included statement's references and the chunks' own
/// export targets, wiring imports to owner chunks and externals.
fn wire_cross_chunk(
    graph: &Graph,
    chunks: &mut [Chunk],
    chunk_of: &AHashMap<ModuleIdx, usize>,
) -> BundleResult<()> {
    for chunk_idx in 0..chunks.len() {
        // references out of the chunk's own statements
        let modules = chunks[chunk_idx].modules.clone();
        for module_idx in modules {
            let reference_ids: Vec<Id> = {
                let module = &graph.modules[module_idx];
                let mut ids: Vec<Id> = module
                    .statements
                    .iter()
                    .filter(|s| s.included)
                    .flat_map(|s| s.references.iter().cloned())
                    .collect();
                ids.sort();
                ids.dedup();
                ids
            };
            for id in reference_ids {
                if let Some(target) = graph.resolve_import_reference(module_idx, &id)? {
                    wire_target(graph, chunks, chunk_idx, chunk_of, &target);
                }
            }
            // side-effect imports of externals keep a bare import in the
            // preamble even without named bindings
            let module = &graph.modules[module_idx];
            for resolution in module.resolutions.iter().flatten() {
                if let ModuleRef::External(external_idx) = resolution {
                    if graph.externals[*external_idx].used {
                        chunks[chunk_idx].import_external(*external_idx).side_effect = true;
                    }
                }
            }
            // star re-exports of externals surface as a runtime copy loop
            for &source_index in &module.star_export_sources {
                if let Some(ModuleRef::External(external_idx)) = module.resolutions[source_index] {
                    let imports = chunks[chunk_idx].import_external(external_idx);
                    imports.reexported_star = true;
                    imports.namespace = true;
                }
            }
            // namespace objects reference every export target, wherever
            // it lives
            if graph.modules[module_idx].namespace_included {
                for name in graph.export_names(module_idx) {
                    let target = graph.resolve_export(module_idx, &name)?;
                    wire_target(graph, chunks, chunk_idx, chunk_of, &target);
                }
            }
        }

        // export targets may live in other chunks (facades, re-exports)
        let export_vars: Vec<VarRef> = chunks[chunk_idx]
            .fixed_exports
            .values()
            .cloned()
            .collect();
        for var in export_vars {
            wire_var(graph, chunks, chunk_idx, chunk_of, &var);
        }
    }
    Ok(())
}

fn wire_target(
    graph: &Graph,
    chunks: &mut [Chunk],
    chunk_idx: usize,
    chunk_of: &AHashMap<ModuleIdx, usize>,
    target: &ExportTarget,
) {
    if let Some(var) = VarRef::from_target(target) {
        wire_var(graph, chunks, chunk_idx, chunk_of, &var);
    }
}

fn wire_var(
    graph: &Graph,
    chunks: &mut [Chunk],
    chunk_idx: usize,
    chunk_of: &AHashMap<ModuleIdx, usize>,
    var: &VarRef,
) {
    match var {
        VarRef::External(external_idx, name) => {
            let imports = chunks[chunk_idx].import_external(*external_idx);
            match name {
                ImportedName::Default => imports.default = true,
                ImportedName::Namespace => imports.namespace = true,
                ImportedName::Name(n) => {
                    imports.names.insert(n.clone());
                }
            }
        }
        _ => {
            let owner_module = var.owner_module().expect("owned variable has a module");
            let Some(&owner_chunk) = chunk_of.get(&owner_module) else {
                return;
            };
            if owner_chunk != chunk_idx {
                chunks[chunk_idx].import_var(owner_chunk, var.clone());
                chunks[owner_chunk].internal_exports.insert(var.clone());
            }
        }
    }
}

/// A strict facade whose chunk grew extra exports must hand its facade
/// role to a generated chunk so the emitted signature stays exact.
fn finalize_strict_facades(
    graph: &Graph,
    chunks: &mut Vec<Chunk>,
    _chunk_of: &AHashMap<ModuleIdx, usize>,
) -> BundleResult<()> {
    let chunk_count = chunks.len();
    for chunk_idx in 0..chunk_count {
        let Some(entry) = chunks[chunk_idx].facade_module else {
            continue;
        };
        if graph.modules[entry].preserve_signature != PreserveSignature::Strict {
            continue;
        }
        if chunks[chunk_idx].internal_exports.is_empty() {
            continue;
        }
        // demote: the chunk keeps its modules, a fresh facade keeps the
        // entry signature
        let fixed = std::mem::take(&mut chunks[chunk_idx].fixed_exports);
        chunks[chunk_idx].facade_module = None;
        chunks[chunk_idx].strict_facade = false;
        let was_entry = std::mem::take(&mut chunks[chunk_idx].is_entry_chunk);

        let facade_idx = chunks.len();
        let mut facade = Chunk::new(facade_idx);
        facade.facade_module = Some(entry);
        facade.strict_facade = true;
        facade.is_entry_chunk = was_entry;
        facade.exec_order = graph.modules[entry].exec_index;
        facade.fixed_exports = fixed;
        facade.dependencies.insert(ChunkDep::Chunk(chunk_idx));
        for var in facade.fixed_exports.values().cloned().collect::<Vec<_>>() {
            if var.owner_module().is_some() {
                facade.import_var(chunk_idx, var.clone());
                chunks[chunk_idx].internal_exports.insert(var);
            }
        }
        chunks.push(facade);
    }
    Ok(())
}

/// Chunk-level static and dynamic dependencies out of the module edges.
fn link_dependencies(
    graph: &Graph,
    chunks: &mut [Chunk],
    chunk_of: &AHashMap<ModuleIdx, usize>,
) {
    for chunk_idx in 0..chunks.len() {
        let modules = chunks[chunk_idx].modules.clone();
        for module_idx in modules {
            let module = &graph.modules[module_idx];
            for resolution in module.resolutions.iter().flatten() {
                match resolution {
                    ModuleRef::Module(dep_idx) => {
                        if let Some(&dep_chunk) = chunk_of.get(dep_idx) {
                            if dep_chunk != chunk_idx {
                                chunks[chunk_idx].dependencies.insert(ChunkDep::Chunk(dep_chunk));
                            }
                        }
                    }
                    ModuleRef::External(external_idx) => {
                        if graph.externals[*external_idx].used {
                            chunks[chunk_idx]
                                .dependencies
                                .insert(ChunkDep::External(*external_idx));
                        }
                    }
                }
            }
            for dynamic in &module.dynamic_imports {
                if !module.statements[dynamic.stmt_index].included {
                    continue;
                }
                match dynamic.resolution {
                    Some(ModuleRef::Module(dep_idx)) => {
                        if let Some(&dep_chunk) = chunk_of.get(&dep_idx) {
                            if dep_chunk != chunk_idx {
                                chunks[chunk_idx]
                                    .dynamic_dependencies
                                    .insert(ChunkDep::Chunk(dep_chunk));
                            }
                        }
                    }
                    Some(ModuleRef::External(external_idx)) => {
                        chunks[chunk_idx]
                            .dynamic_dependencies
                            .insert(ChunkDep::External(external_idx));
                    }
                    None => {}
                }
            }
            for &before in &module.implicitly_loaded_before {
                if let Some(&before_chunk) = chunk_of.get(&before) {
                    if before_chunk != chunk_idx {
                        chunks[chunk_idx].implicitly_loaded_before.insert(before_chunk);
                    }
                }
            }
        }
    }
}

/// Chunk display names and pattern-rendered file names. `[hash]` becomes
/// a per-chunk placeholder replaced after content hashing.
fn assign_names(graph: &Graph, chunks: &mut [Chunk], output_options: &OutputOptions) {
    let mut used_file_names: AHashSet<String> = AHashSet::default();
    let mut placeholder_counter = 0usize;

    for chunk in chunks.iter_mut() {
        chunk.name = if let Some(alias) = &chunk.manual_alias {
            alias.clone()
        } else if let Some(facade) = chunk.facade_module {
            graph.modules[facade].alias_name()
        } else if let Some(&first) = chunk.modules.first() {
            graph.modules[first].alias_name()
        } else {
            "chunk".to_string()
        };

        if output_options.preserve_modules {
            let module_id = chunk
                .facade_module
                .or_else(|| chunk.modules.first().copied())
                .map(|m| graph.modules[m].id.clone())
                .unwrap_or_default();
            let rebased = output_options
                .preserve_modules_root
                .as_deref()
                .and_then(|root| paths::rebase_against_root(&module_id, root))
                .unwrap_or_else(|| module_id.trim_start_matches('/').to_string());
            let stem = match rebased.rfind('.') {
                Some(dot) if dot > 0 => rebased[..dot].to_string(),
                _ => rebased,
            };
            chunk.file_name =
                crate::emit::deconflict_file_name(format!("{}.js", stem), &mut used_file_names);
            continue;
        }

        // emitted chunks may pin their file name outright
        if let Some(fixed) = chunk
            .facade_module
            .or_else(|| chunk.modules.first().copied())
            .and_then(|m| graph.emitter.fixed_chunk_file_name(&graph.modules[m].id))
        {
            chunk.file_name = crate::emit::deconflict_file_name(fixed, &mut used_file_names);
            continue;
        }

        let pattern = if chunk.is_entry_chunk {
            &output_options.entry_file_names
        } else {
            &output_options.chunk_file_names
        };

        let mut rendered = pattern
            .replace("[name]", &chunk.name)
            .replace("[format]", output_options.format.as_str())
            .replace("[extname]", ".js")
            .replace("[ext]", "js");
        if rendered.contains("[hash]") {
            placeholder_counter += 1;
            let placeholder = hash_placeholder(placeholder_counter, 8);
            rendered = rendered.replace("[hash]", &placeholder);
            chunk.hash_placeholder = Some(placeholder);
        }
        chunk.file_name = crate::emit::deconflict_file_name(rendered, &mut used_file_names);
    }
}

