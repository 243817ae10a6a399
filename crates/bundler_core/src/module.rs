use ahashmap::{AHashMap, AHashSet};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value as JsonValue;
use swc_common::{sync::Lrc, SourceFile, Span, SyntaxContext};
use swc_ecma_ast::{Id, Program};

use crate::options::{PreserveSignature, SideEffects, SyntheticNamedExports};

pub type ModuleIdx = usize;
pub type ExternalIdx = usize;
pub type StmtIdx = usize;

/// A resolved dependency edge target: an owned module or an external.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleRef {
    Module(ModuleIdx),
    External(ExternalIdx),
}

/// What an import specifier binds to on the far side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportedName {
    Name(String),
    Default,
    Namespace,
}

impl ImportedName {
    pub fn as_export_name(&self) -> &str {
        match self {
            ImportedName::Name(name) => name,
            ImportedName::Default => "default",
            ImportedName::Namespace => "*",
        }
    }
}

/// `import { a as b } from './x'` records `b -> { source_index, Name(a) }`.
#[derive(Debug, Clone)]
pub struct ImportDescription {
    pub source_index: usize,
    pub imported: ImportedName,
    pub span: Span,
}

/// `export { a as b } from './x'` records `b -> { source_index, Name(a) }`.
#[derive(Debug, Clone)]
pub struct ReexportDescription {
    pub source_index: usize,
    pub imported: ImportedName,
    pub span: Span,
}

/// An export declared by the module's own body.
#[derive(Debug, Clone)]
pub enum LocalExportKind {
    /// Bound to a top-level binding of this module.
    Local(Id),
    /// The default export; `local` is present when the exported
    /// function/class declaration carries a name.
    Default { local: Option<Id> },
}

#[derive(Debug, Clone)]
pub struct LocalExport {
    pub kind: LocalExportKind,
    pub stmt_index: StmtIdx,
}

/// A dynamic `import()` call discovered during the scan.
#[derive(Debug, Clone)]
pub struct DynamicImportRecord {
    pub specifier: Option<String>,
    pub stmt_index: StmtIdx,
    pub span: Span,
    pub resolution: Option<ModuleRef>,
}

/// `import.meta.ROLLUP_FILE_URL_<ref>` style references discovered during
/// the scan; resolved to emitted file urls at render time.
#[derive(Debug, Clone)]
pub struct ImportMetaRef {
    pub stmt_index: StmtIdx,
    /// None for plain `import.meta` / `import.meta.url` accesses.
    pub file_reference: Option<String>,
}

/// Per-top-level-statement semantic record driving tree shaking and
/// rendering.
#[derive(Debug, Clone, Default)]
pub struct StatementRecord {
    /// Top-level bindings this statement declares.
    pub declares: Vec<Id>,
    /// Top-level bindings and import locals this statement references,
    /// excluding references inside constant-folded dead branches.
    pub references: AHashSet<Id>,
    /// Unresolved (global) names referenced by this statement.
    pub accessed_globals: AHashSet<String>,
    pub has_effects: bool,
    pub included: bool,
    /// Index into `sources` when this statement is an import declaration.
    pub import_source: Option<usize>,
    /// True for `export ... from` statements, which render nothing.
    pub is_reexport_decl: bool,
    /// True for `export { a as b }` without a source; renders nothing.
    pub is_export_shorthand: bool,
    /// Directive-prologue statement (`'use strict'` and friends); never
    /// rendered, the format wrapper owns strict mode.
    pub is_directive: bool,
    pub uses_top_level_await: bool,
    pub has_dynamic_import: bool,
    pub span: Span,
}

/// An owned, parsed module of the build graph.
pub struct Module {
    pub idx: ModuleIdx,
    pub id: String,
    pub fm: Lrc<SourceFile>,
    pub program: Program,
    pub top_level_ctxt: SyntaxContext,
    pub unresolved_ctxt: SyntaxContext,

    /// Static import specifiers in source order.
    pub sources: Vec<String>,
    /// Resolution for each entry of `sources`, filled during load.
    pub resolutions: Vec<Option<ModuleRef>>,
    /// Cached resolution keyed by raw specifier.
    pub resolved_ids: AHashMap<String, ModuleRef>,
    pub dynamic_imports: Vec<DynamicImportRecord>,
    pub import_metas: Vec<ImportMetaRef>,

    pub import_descriptions: AHashMap<Id, ImportDescription>,
    pub local_exports: IndexMap<String, LocalExport>,
    pub reexports: IndexMap<String, ReexportDescription>,
    pub star_export_sources: Vec<usize>,

    pub statements: Vec<StatementRecord>,
    /// Spans of directive-prologue statements other than `'use strict'`.
    pub foreign_directives: Vec<Span>,
    /// Top-level binding -> statements that declare it.
    pub declared_by: AHashMap<Id, Vec<StmtIdx>>,
    /// Top-level bindings reassigned after declaration; relevant for
    /// live-binding emulation.
    pub reassigned: AHashSet<Id>,
    /// Literal-valued top-level consts, reused for render-time branch
    /// simplification.
    pub const_env: crate::parse::fold::ConstEnv,

    pub is_entry: bool,
    pub is_user_defined_entry_point: bool,
    pub entry_index: Option<usize>,
    /// Name used for `[name]` in entry file patterns, lowest priority wins.
    pub chunk_name: Option<String>,
    pub chunk_name_priority: usize,

    pub preserve_signature: PreserveSignature,
    pub module_side_effects: SideEffects,
    pub synthetic_named_exports: SyntheticNamedExports,
    pub meta: JsonValue,

    pub exec_index: usize,
    pub importers: Vec<ModuleIdx>,
    pub dynamic_importers: Vec<ModuleIdx>,
    pub implicitly_loaded_before: Vec<ModuleIdx>,
    pub implicitly_loaded_after: Vec<ModuleIdx>,

    /// Set once any statement of the module is included.
    pub included: bool,
    /// Set when the module's body will run in some included execution path.
    pub executed: bool,
    pub namespace_included: bool,
    pub uses_top_level_await: bool,

    /// Decoded source maps of the transform chain, oldest first.
    pub transform_maps: Vec<sourcemap::SourceMap>,
}

impl Module {
    pub fn alias_name(&self) -> String {
        self.chunk_name
            .clone()
            .unwrap_or_else(|| crate::utils::paths::get_alias_name(&self.id))
    }

    /// All export names of this module, star re-exports expanded by the
    /// caller (needs graph access).
    pub fn own_export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .local_exports
            .keys()
            .chain(self.reexports.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn has_default_export(&self) -> bool {
        self.local_exports.contains_key("default") || self.reexports.contains_key("default")
    }

    /// Statements declaring the given top-level binding.
    pub fn declaring_statements(&self, id: &Id) -> &[StmtIdx] {
        self.declared_by.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("idx", &self.idx)
            .field("id", &self.id)
            .field("is_entry", &self.is_entry)
            .field("sources", &self.sources)
            .field("exec_index", &self.exec_index)
            .field("included", &self.included)
            .finish_non_exhaustive()
    }
}

/// A module whose body is not owned by this build. Only its id, render
/// path and the names imported from it matter.
#[derive(Debug)]
pub struct ExternalModule {
    pub idx: ExternalIdx,
    pub id: String,
    /// Id as it should appear in emitted import statements.
    pub render_path: String,
    pub renormalize_render_path: bool,
    pub imported_names: IndexSet<String>,
    pub default_imported: bool,
    pub namespace_imported: bool,
    /// True when some included module imports it for side effects only.
    pub side_effect_imported: bool,
    pub exec_index: usize,
    pub importers: Vec<ModuleIdx>,
    pub dynamic_importers: Vec<ModuleIdx>,
    pub used: bool,
}

impl ExternalModule {
    pub fn new(idx: ExternalIdx, id: String, renormalize_render_path: bool) -> Self {
        Self {
            idx,
            render_path: id.clone(),
            id,
            renormalize_render_path,
            imported_names: IndexSet::new(),
            default_imported: false,
            namespace_imported: false,
            side_effect_imported: false,
            exec_index: usize::MAX,
            importers: Vec::new(),
            dynamic_importers: Vec::new(),
            used: false,
        }
    }

    pub fn needs_interop_default(&self) -> bool {
        self.default_imported
    }
}
