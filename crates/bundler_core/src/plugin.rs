use bundle_err::{BundleError, BundleResult};
use serde_json::Value as JsonValue;

use crate::options::{
    InputOptions, OutputOptions, PreserveSignature, SideEffects, SyntheticNamedExports,
};
use crate::plugin_driver::PluginContext;

/// How a resolution hook classified a specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExternalKind {
    #[default]
    NotExternal,
    External,
    /// External, and the id must be kept absolute in the emitted code.
    Absolute,
    /// External, and an absolute id should be rendered importer-relative.
    Relative,
}

/// A `resolve_id` hook result before defaults are filled in.
#[derive(Debug, Clone, Default)]
pub struct PartialResolvedId {
    pub id: String,
    pub external: ExternalKind,
    pub module_side_effects: Option<SideEffects>,
    pub synthetic_named_exports: Option<SyntheticNamedExports>,
    pub meta: Option<JsonValue>,
}

impl PartialResolvedId {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// A fully-resolved import target.
#[derive(Debug, Clone)]
pub struct ResolvedId {
    pub id: String,
    pub external: ExternalKind,
    pub module_side_effects: SideEffects,
    pub synthetic_named_exports: SyntheticNamedExports,
    pub meta: JsonValue,
    /// True when the id should be re-rendered relative to its importer.
    pub renormalize_render_path: bool,
}

impl ResolvedId {
    pub fn is_external(&self) -> bool {
        !matches!(self.external, ExternalKind::NotExternal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOutput {
    pub code: String,
    /// A raw JSON source map produced alongside the code.
    pub map: Option<String>,
    pub module_side_effects: Option<SideEffects>,
    pub synthetic_named_exports: Option<SyntheticNamedExports>,
    pub meta: Option<JsonValue>,
}

impl LoadOutput {
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub code: String,
    pub map: Option<String>,
}

/// Files a plugin can emit during the build or render phases.
#[derive(Debug, Clone)]
pub enum EmittedFile {
    Asset {
        name: Option<String>,
        file_name: Option<String>,
        source: Option<Vec<u8>>,
    },
    Chunk {
        id: String,
        name: Option<String>,
        file_name: Option<String>,
        implicitly_loaded_after_one_of: Option<Vec<String>>,
        preserve_signature: Option<PreserveSignature>,
    },
}

/// Snapshot of a module handed to observation hooks.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: String,
    pub is_entry: bool,
    pub is_external: bool,
    pub importers: Vec<String>,
    pub dynamic_importers: Vec<String>,
    pub imported_ids: Vec<String>,
    pub dynamically_imported_ids: Vec<String>,
    pub meta: JsonValue,
}

/// Chunk metadata passed to render-phase hooks.
#[derive(Debug, Clone)]
pub struct RenderedChunkInfo {
    pub file_name: String,
    pub name: String,
    pub is_entry: bool,
    pub is_dynamic_entry: bool,
    pub facade_module_id: Option<String>,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub module_ids: Vec<String>,
}

/// Stable ordering classes for hook handlers; all `Pre` handlers run
/// before unordered handlers, which run before `Post`, each group in
/// plugin registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HookOrder {
    Pre,
    #[default]
    Normal,
    Post,
}

/// A bundler plugin. Every hook has a default no-op implementation; a
/// plugin overrides the ones it participates in. Hooks must be callable
/// from worker threads.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Per-hook ordering class, `{handler, order}` in the reference API.
    fn hook_order(&self, hook: &str) -> HookOrder {
        HookOrder::Normal
    }

    // build phase

    fn options(&self, options: &mut InputOptions) -> BundleResult<()> {
        Ok(())
    }

    fn build_start(&self, ctx: &PluginContext, options: &InputOptions) -> BundleResult<()> {
        Ok(())
    }

    fn resolve_id(
        &self,
        ctx: &PluginContext,
        source: &str,
        importer: Option<&str>,
        is_entry: bool,
    ) -> BundleResult<Option<PartialResolvedId>> {
        Ok(None)
    }

    fn load(&self, ctx: &PluginContext, id: &str) -> BundleResult<Option<LoadOutput>> {
        Ok(None)
    }

    fn should_transform_cached_module(
        &self,
        ctx: &PluginContext,
        id: &str,
        code: &str,
    ) -> BundleResult<Option<bool>> {
        Ok(None)
    }

    fn transform(
        &self,
        ctx: &PluginContext,
        code: &str,
        id: &str,
    ) -> BundleResult<Option<TransformOutput>> {
        Ok(None)
    }

    fn module_parsed(&self, ctx: &PluginContext, info: &ModuleInfo) -> BundleResult<()> {
        Ok(())
    }

    fn resolve_dynamic_import(
        &self,
        ctx: &PluginContext,
        specifier: &str,
        importer: &str,
    ) -> BundleResult<Option<PartialResolvedId>> {
        Ok(None)
    }

    fn build_end(&self, ctx: &PluginContext, error: Option<&BundleError>) -> BundleResult<()> {
        Ok(())
    }

    // generate phase

    fn output_options(&self, options: &mut OutputOptions) -> BundleResult<()> {
        Ok(())
    }

    fn render_start(
        &self,
        ctx: &PluginContext,
        output_options: &OutputOptions,
        input_options: &InputOptions,
    ) -> BundleResult<()> {
        Ok(())
    }

    fn banner(&self, ctx: &PluginContext) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn footer(&self, ctx: &PluginContext) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn intro(&self, ctx: &PluginContext) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn outro(&self, ctx: &PluginContext) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn render_dynamic_import(
        &self,
        ctx: &PluginContext,
        target_module_id: &str,
        importer: &str,
    ) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn resolve_file_url(
        &self,
        ctx: &PluginContext,
        reference_id: &str,
        file_name: &str,
        chunk_id: &str,
    ) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn resolve_import_meta(
        &self,
        ctx: &PluginContext,
        property: Option<&str>,
        chunk_id: &str,
    ) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn render_chunk(
        &self,
        ctx: &PluginContext,
        code: &str,
        chunk: &RenderedChunkInfo,
        options: &OutputOptions,
    ) -> BundleResult<Option<TransformOutput>> {
        Ok(None)
    }

    fn augment_chunk_hash(
        &self,
        ctx: &PluginContext,
        chunk: &RenderedChunkInfo,
    ) -> BundleResult<Option<String>> {
        Ok(None)
    }

    fn render_error(&self, ctx: &PluginContext, error: &BundleError) -> BundleResult<()> {
        Ok(())
    }

    fn generate_bundle(
        &self,
        ctx: &PluginContext,
        options: &OutputOptions,
        bundle: &mut crate::output::OutputBundle,
    ) -> BundleResult<()> {
        Ok(())
    }

    fn write_bundle(
        &self,
        ctx: &PluginContext,
        options: &OutputOptions,
        bundle: &crate::output::OutputBundle,
    ) -> BundleResult<()> {
        Ok(())
    }

    fn close_bundle(&self, ctx: &PluginContext) -> BundleResult<()> {
        Ok(())
    }

    // watch surface; driven by the external watcher collaborator

    fn watch_change(&self, ctx: &PluginContext, id: &str) -> BundleResult<()> {
        Ok(())
    }

    fn close_watcher(&self, ctx: &PluginContext) -> BundleResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Plugin({})", self.name())
    }
}
