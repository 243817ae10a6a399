//! Core engine of an ECMAScript module bundler.
//!
//! The pipeline runs in phases with a barrier between each: LOAD&PARSE
//! (concurrent resolution, loading and parsing of the module graph),
//! ANALYSE (binding resolution, execution order, tree shaking) and
//! GENERATE (chunk assignment and per-format rendering). `bundle` runs
//! the first two and returns a [`Bundle`] that can generate any number
//! of outputs.

pub mod chunking;
pub mod diagnostics;
pub mod emit;
pub mod execution;
pub mod graph;
pub mod loader;
pub mod module;
pub mod options;
pub mod output;
pub mod parse;
pub mod plugin;
pub mod plugin_driver;
pub mod render;
pub mod resolve;
pub mod sourcemaps;
pub mod treeshake;
pub mod utils;

use bundle_err::{BundleError, BundleResult};
use rayon::prelude::*;

pub use bundle_err::ErrorCode;
pub use graph::Graph;
pub use options::{
    ExportsMode, ExternalOption, InputItem, InputOptions, InteropKind, OutputFormat,
    OutputOptions, PreserveSignature, SideEffects, SourcemapOption, SyntheticNamedExports,
    TreeshakeOptions,
};
pub use output::{OutputAsset, OutputBundle, OutputChunk, OutputFile};
pub use plugin::{
    EmittedFile, ExternalKind, HookOrder, LoadOutput, ModuleInfo, PartialResolvedId, Plugin,
    RenderedChunkInfo, ResolvedId, TransformOutput,
};
pub use plugin_driver::PluginContext;

/// Runs LOAD&PARSE and ANALYSE for the given input, producing a bundle
/// that can generate outputs. Fatal build errors are returned after the
/// `buildEnd` hooks have observed them.
pub fn bundle(mut options: InputOptions) -> BundleResult<Bundle> {
    let plugins = options.plugins.clone();
    for plugin in &plugins {
        plugin
            .options(&mut options)
            .map_err(|error| BundleError::from_plugin(plugin.name(), "options", error))?;
    }

    let mut graph = Graph::new(options);
    let build_error = graph.build().err();

    let hook_error = graph
        .driver
        .hook_parallel("buildEnd", |plugin, ctx| {
            plugin.build_end(ctx, build_error.as_ref())
        })
        .err();

    if let Some(error) = build_error.or(hook_error) {
        return Err(error);
    }
    Ok(Bundle {
        graph,
        closed: false,
    })
}

/// A completed build. Each call to [`Bundle::generate`] or
/// [`Bundle::write`] renders one output configuration; `close` releases
/// the bundle and notifies plugins.
pub struct Bundle {
    graph: Graph,
    closed: bool,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("closed", &self.closed)
            .finish()
    }
}

impl Bundle {
    pub fn generate(&self, output_options: &OutputOptions) -> BundleResult<OutputBundle> {
        self.generate_inner(output_options, false)
    }

    /// Renders like `generate` and additionally writes every output file
    /// below `output.dir` (or to `output.file`).
    pub fn write(&self, output_options: &OutputOptions) -> BundleResult<OutputBundle> {
        let bundle = self.generate_inner(output_options, true)?;
        self.write_files(output_options, &bundle)?;
        self.graph
            .driver
            .hook_parallel("writeBundle", |plugin, ctx| {
                plugin.write_bundle(ctx, output_options, &bundle)
            })?;
        Ok(bundle)
    }

    fn generate_inner(
        &self,
        output_options: &OutputOptions,
        _is_write: bool,
    ) -> BundleResult<OutputBundle> {
        if self.closed {
            return Err(bundle_err::already_closed());
        }

        let mut opts = output_options.clone();
        self.graph.driver.hook_seq("outputOptions", |plugin, _ctx| {
            plugin.output_options(&mut opts)
        })?;

        self.graph.emitter.set_phase(emit::EmitterPhase::Generate);
        self.graph.emitter.begin_output();

        self.graph
            .driver
            .hook_parallel("renderStart", |plugin, ctx| {
                plugin.render_start(ctx, &opts, &self.graph.options)
            })?;

        let result = render::generate_output(&self.graph, &opts);
        let mut bundle = match result {
            Ok(bundle) => bundle,
            Err(error) => {
                self.graph
                    .driver
                    .hook_parallel("renderError", |plugin, ctx| {
                        plugin.render_error(ctx, &error)
                    })
                    .ok();
                return Err(error);
            }
        };

        self.graph
            .driver
            .hook_seq("generateBundle", |plugin, ctx| {
                plugin.generate_bundle(ctx, &opts, &mut bundle)
            })?;

        Ok(bundle)
    }

    fn write_files(
        &self,
        output_options: &OutputOptions,
        bundle: &OutputBundle,
    ) -> BundleResult<()> {
        let single_file = output_options.file.as_deref();
        let dir = output_options.dir.as_deref().unwrap_or(".");
        if single_file.is_some() && bundle.chunks().count() > 1 {
            return Err(bundle_err::validation(
                "When building multiple chunks, \"output.dir\" must be used instead of \"output.file\".",
            ));
        }

        let targets: Vec<(std::path::PathBuf, Vec<u8>)> = bundle
            .output
            .iter()
            .flat_map(|file| {
                let path = match (file, single_file) {
                    (OutputFile::Chunk(_), Some(single)) => std::path::PathBuf::from(single),
                    _ => std::path::Path::new(dir).join(file.file_name()),
                };
                let mut writes = Vec::new();
                match file {
                    OutputFile::Chunk(chunk) => {
                        let mut code = chunk.code.clone();
                        if let Some(map) = &chunk.map {
                            match output_options.sourcemap {
                                SourcemapOption::Inline => {
                                    if let Ok(parsed) =
                                        sourcemap::SourceMap::from_slice(map.as_bytes())
                                    {
                                        code.push_str(&format!(
                                            "//# sourceMappingURL={}\n",
                                            sourcemaps::map_to_data_url(&parsed)
                                        ));
                                    }
                                }
                                SourcemapOption::File => {
                                    code.push_str(&format!(
                                        "//# sourceMappingURL={}.map\n",
                                        chunk.file_name.rsplit('/').next().unwrap_or_default()
                                    ));
                                    writes.push((
                                        path.with_extension("js.map"),
                                        map.clone().into_bytes(),
                                    ));
                                }
                                SourcemapOption::Hidden => {
                                    writes.push((
                                        path.with_extension("js.map"),
                                        map.clone().into_bytes(),
                                    ));
                                }
                                SourcemapOption::None => {}
                            }
                        }
                        writes.push((path, code.into_bytes()));
                    }
                    OutputFile::Asset(asset) => writes.push((path, asset.source.clone())),
                }
                writes
            })
            .collect();

        let failures: Vec<String> = targets
            .par_iter()
            .filter_map(|(path, contents)| {
                if let Some(parent) = path.parent() {
                    if let Err(io_error) = std::fs::create_dir_all(parent) {
                        return Some(format!("{}: {}", parent.display(), io_error));
                    }
                }
                std::fs::write(path, contents)
                    .err()
                    .map(|io_error| format!("{}: {}", path.display(), io_error))
            })
            .collect();
        if let Some(first) = failures.into_iter().next() {
            return Err(bundle_err::validation(format!(
                "Could not write output file - {}",
                first
            )));
        }
        Ok(())
    }

    /// Warnings collected so far, including those from the build phase.
    pub fn warnings(&self) -> Vec<BundleError> {
        self.graph.diagnostics.warnings()
    }

    /// Ids of every module in the graph, in insertion order.
    pub fn module_ids(&self) -> Vec<String> {
        self.graph.by_id.keys().cloned().collect()
    }

    /// Idempotent: the first call notifies plugins, later calls return
    /// without effect.
    pub fn close(&mut self) -> BundleResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.graph.emitter.set_phase(emit::EmitterPhase::Closed);
        self.graph
            .driver
            .hook_parallel("closeBundle", |plugin, ctx| plugin.close_bundle(ctx))
    }
}
