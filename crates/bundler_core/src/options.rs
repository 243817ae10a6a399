use std::fmt;
use std::sync::Arc;

use ahashmap::AHashMap;
use bundle_err::BundleError;
use serde::Deserialize;

use crate::plugin::Plugin;

/// One requested build entry. `name` drives `[name]` substitution for the
/// entry's chunk; unnamed entries fall back to the id's file stem.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InputItem {
    pub name: Option<String>,
    pub id: String,
}

impl InputItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            name: None,
            id: id.into(),
        }
    }

    pub fn named(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: id.into(),
        }
    }
}

/// How much of an entry module's export signature must survive chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PreserveSignature {
    False,
    Strict,
    #[default]
    ExportsOnly,
    AllowExtension,
}

/// Per-module side-effect declaration, settable by resolution results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideEffects {
    #[default]
    True,
    False,
    /// The module is excluded from tree shaking entirely; every statement
    /// is kept once the module executes.
    NoTreeshake,
}

impl SideEffects {
    pub fn executes_dependencies(&self) -> bool {
        !matches!(self, SideEffects::False)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyntheticNamedExports {
    #[default]
    No,
    /// Missing named exports fall back to properties of the default export.
    FromDefault,
    /// Missing named exports fall back to properties of the named export.
    FromNamed(String),
}

impl SyntheticNamedExports {
    pub fn fallback_export_name(&self) -> Option<&str> {
        match self {
            SyntheticNamedExports::No => None,
            SyntheticNamedExports::FromDefault => Some("default"),
            SyntheticNamedExports::FromNamed(name) => Some(name),
        }
    }
}

pub type ExternalFn = dyn Fn(&str, Option<&str>, bool) -> bool + Send + Sync;

/// The user's `external` option: a fixed id list, or a predicate over
/// `(source, importer, is_resolved)`.
#[derive(Clone, Default)]
pub enum ExternalOption {
    #[default]
    None,
    Ids(Vec<String>),
    Fn(Arc<ExternalFn>),
}

impl ExternalOption {
    pub fn is_external(&self, source: &str, importer: Option<&str>, is_resolved: bool) -> bool {
        match self {
            ExternalOption::None => false,
            ExternalOption::Ids(ids) => ids.iter().any(|id| id == source),
            ExternalOption::Fn(f) => f(source, importer, is_resolved),
        }
    }
}

impl fmt::Debug for ExternalOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalOption::None => f.write_str("ExternalOption::None"),
            ExternalOption::Ids(ids) => f.debug_tuple("ExternalOption::Ids").field(ids).finish(),
            ExternalOption::Fn(_) => f.write_str("ExternalOption::Fn(..)"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeshakeOptions {
    pub enabled: bool,
    /// Honour `#__PURE__` call annotations.
    pub annotations: bool,
    /// Baseline assumption for modules that do not declare side effects
    /// through resolution.
    pub module_side_effects: bool,
}

impl Default for TreeshakeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            annotations: true,
            module_side_effects: true,
        }
    }
}

pub type WarnHandler = dyn Fn(&BundleError) + Send + Sync;

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputOptions {
    pub input: Vec<InputItem>,
    /// Modules loaded into the graph without becoming entry points.
    pub additional_modules: Vec<String>,
    #[serde(skip)]
    pub external: ExternalOption,
    #[serde(skip)]
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub treeshake: TreeshakeOptions,
    pub preserve_entry_signatures: PreserveSignature,
    pub strict_deprecations: bool,
    /// Upper bound on concurrent file reads through the load pipeline.
    pub max_parallel_file_ops: usize,
    /// Rewrite absolute external ids to paths relative to the importer in
    /// the emitted code.
    pub make_absolute_externals_relative: bool,
    #[serde(skip)]
    pub on_warn: Option<Arc<WarnHandler>>,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            additional_modules: Vec::new(),
            external: ExternalOption::default(),
            plugins: Vec::new(),
            treeshake: TreeshakeOptions::default(),
            preserve_entry_signatures: PreserveSignature::default(),
            strict_deprecations: false,
            max_parallel_file_ops: 20,
            make_absolute_externals_relative: true,
            on_warn: None,
        }
    }
}

impl fmt::Debug for InputOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputOptions")
            .field("input", &self.input)
            .field("external", &self.external)
            .field("plugins", &self.plugins.len())
            .field("treeshake", &self.treeshake)
            .field("preserve_entry_signatures", &self.preserve_entry_signatures)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Es,
    Cjs,
    Amd,
    Umd,
    Iife,
    System,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Es => "es",
            OutputFormat::Cjs => "cjs",
            OutputFormat::Amd => "amd",
            OutputFormat::Umd => "umd",
            OutputFormat::Iife => "iife",
            OutputFormat::System => "system",
        }
    }

    pub fn supports_top_level_await(&self) -> bool {
        matches!(self, OutputFormat::Es | OutputFormat::System)
    }

    /// Live bindings are native here; other formats need getter emulation.
    pub fn has_native_live_bindings(&self) -> bool {
        matches!(self, OutputFormat::Es | OutputFormat::System)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportsMode {
    #[default]
    Auto,
    Named,
    Default,
    None,
}

/// The interop helper family injected for a given external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum InteropKind {
    #[default]
    Auto,
    EsModule,
    Default,
    DefaultOnly,
    Compat,
}

pub type InteropFn = dyn Fn(&str) -> InteropKind + Send + Sync;
pub type ManualChunksFn = dyn Fn(&str) -> Option<String> + Send + Sync;
pub type SourcemapPathTransformFn = dyn Fn(&str, &str) -> String + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourcemapOption {
    #[default]
    None,
    File,
    Inline,
    /// Emit the map file but omit the sourceMappingURL comment.
    Hidden,
}

impl SourcemapOption {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, SourcemapOption::None)
    }
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// Exposed global name for iife/umd bundles with exports.
    pub name: Option<String>,
    /// External id -> global variable name, for iife/umd.
    pub globals: AHashMap<String, String>,
    pub entry_file_names: String,
    pub chunk_file_names: String,
    pub asset_file_names: String,
    pub banner: Option<String>,
    pub footer: Option<String>,
    pub intro: Option<String>,
    pub outro: Option<String>,
    pub exports: ExportsMode,
    /// Extend an existing global of the same name instead of replacing it
    /// (iife/umd).
    pub extend: bool,
    pub external_live_bindings: bool,
    pub interop: InteropKind,
    #[serde(skip)]
    pub interop_fn: Option<Arc<InteropFn>>,
    pub sourcemap: SourcemapOption,
    #[serde(skip)]
    pub sourcemap_path_transform: Option<Arc<SourcemapPathTransformFn>>,
    pub preserve_modules: bool,
    pub preserve_modules_root: Option<String>,
    #[serde(skip)]
    pub manual_chunks: Option<Arc<ManualChunksFn>>,
    pub amd_id: Option<String>,
    pub amd_define: String,
    /// Output directory used by `write`.
    pub dir: Option<String>,
    /// Single output file used by `write` when there is exactly one chunk.
    pub file: Option<String>,
    /// Emit `Object.defineProperty(exports, '__esModule', ...)` in cjs/amd
    /// output with named exports.
    pub es_module_marker: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            name: None,
            globals: ahashmap::new_map(),
            entry_file_names: "[name].js".to_string(),
            chunk_file_names: "[name]-[hash].js".to_string(),
            asset_file_names: "assets/[name]-[hash][extname]".to_string(),
            banner: None,
            footer: None,
            intro: None,
            outro: None,
            exports: ExportsMode::default(),
            extend: false,
            external_live_bindings: true,
            interop: InteropKind::default(),
            interop_fn: None,
            sourcemap: SourcemapOption::default(),
            sourcemap_path_transform: None,
            preserve_modules: false,
            preserve_modules_root: None,
            manual_chunks: None,
            amd_id: None,
            amd_define: "define".to_string(),
            dir: None,
            file: None,
            es_module_marker: true,
        }
    }
}

impl OutputOptions {
    pub fn interop_for(&self, external_id: &str) -> InteropKind {
        match &self.interop_fn {
            Some(f) => f(external_id),
            None => self.interop,
        }
    }
}

impl fmt::Debug for OutputOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputOptions")
            .field("format", &self.format)
            .field("name", &self.name)
            .field("entry_file_names", &self.entry_file_names)
            .field("chunk_file_names", &self.chunk_file_names)
            .field("exports", &self.exports)
            .field("preserve_modules", &self.preserve_modules)
            .field("sourcemap", &self.sourcemap)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn input_options_deserialize_from_json() {
        let opts: InputOptions = serde_json::from_str(
            r#"{
                "input": [{"name": "main", "id": "/src/main.js"}],
                "preserveEntrySignatures": "strict",
                "maxParallelFileOps": 4
            }"#,
        )
        .unwrap();
        assert_eq!(opts.input[0].name.as_deref(), Some("main"));
        assert_eq!(opts.preserve_entry_signatures, PreserveSignature::Strict);
        assert_eq!(opts.max_parallel_file_ops, 4);
    }

    #[test]
    fn output_options_default_patterns() {
        let opts = OutputOptions::default();
        assert_eq!(opts.entry_file_names, "[name].js");
        assert_eq!(opts.chunk_file_names, "[name]-[hash].js");
        assert!(opts.external_live_bindings);
    }

    #[test]
    fn format_flags() {
        assert!(OutputFormat::Es.supports_top_level_await());
        assert!(OutputFormat::System.supports_top_level_await());
        assert!(!OutputFormat::Cjs.supports_top_level_await());
        assert!(!OutputFormat::Iife.has_native_live_bindings());
    }
}
