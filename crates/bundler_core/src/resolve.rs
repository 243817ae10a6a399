use bundle_err::BundleResult;
use serde_json::Value as JsonValue;

use crate::options::{ExternalOption, SideEffects, SyntheticNamedExports};
use crate::plugin::{ExternalKind, PartialResolvedId, ResolvedId};
use crate::plugin_driver::PluginDriver;
use crate::utils::paths;

/// The slice of input options resolution needs, detached from the full
/// option set so the loader can share it across threads.
#[derive(Clone)]
pub struct ResolveConfig {
    pub external: ExternalOption,
    pub make_absolute_externals_relative: bool,
    pub default_module_side_effects: bool,
}

impl ResolveConfig {
    fn default_side_effects(&self, _id: &str, _external: bool) -> SideEffects {
        if self.default_module_side_effects {
            SideEffects::True
        } else {
            SideEffects::False
        }
    }
}

/// Fills defaults and normalises the external flavour of a plugin (or
/// builtin) resolution result.
pub fn finalize_resolution(cfg: &ResolveConfig, partial: PartialResolvedId) -> ResolvedId {
    let id_is_absolute = paths::is_absolute(&partial.id);
    let (external, renormalize) = match partial.external {
        ExternalKind::NotExternal => (ExternalKind::NotExternal, false),
        // relative-external requests for an absolute id render as a path
        // relative to each importer
        ExternalKind::Relative => (ExternalKind::External, id_is_absolute),
        ExternalKind::Absolute => (ExternalKind::Absolute, false),
        ExternalKind::External => (
            ExternalKind::External,
            id_is_absolute && cfg.make_absolute_externals_relative,
        ),
    };
    let is_external = !matches!(external, ExternalKind::NotExternal);
    ResolvedId {
        module_side_effects: partial
            .module_side_effects
            .unwrap_or_else(|| cfg.default_side_effects(&partial.id, is_external)),
        synthetic_named_exports: partial
            .synthetic_named_exports
            .unwrap_or(SyntheticNamedExports::No),
        meta: partial.meta.unwrap_or(JsonValue::Null),
        id: partial.id,
        external,
        renormalize_render_path: renormalize,
    }
}

/// The full resolution pipeline for one specifier:
/// user external predicate, then the `resolve_id` plugin chain in first
/// mode, then the builtin resolver. `None` means unresolved; the caller
/// owns the warn-vs-fatal decision.
pub fn resolve_id(
    driver: &PluginDriver,
    cfg: &ResolveConfig,
    source: &str,
    importer: Option<&str>,
    is_entry: bool,
    skip: &[&str],
) -> BundleResult<Option<ResolvedId>> {
    if cfg.external.is_external(source, importer, false) {
        return Ok(Some(finalize_resolution(
            cfg,
            PartialResolvedId {
                id: source.to_string(),
                external: ExternalKind::External,
                ..Default::default()
            },
        )));
    }

    let plugin_result = driver.hook_first("resolveId", skip, |plugin, ctx| {
        plugin.resolve_id(ctx, source, importer, is_entry)
    })?;
    if let Some(partial) = plugin_result {
        // a plugin may hand back an id the user's predicate declares
        // external once resolved
        let mut partial = partial;
        if partial.external == ExternalKind::NotExternal
            && cfg.external.is_external(&partial.id, importer, true)
        {
            partial.external = ExternalKind::External;
        }
        return Ok(Some(finalize_resolution(cfg, partial)));
    }

    Ok(builtin_resolve(source, importer).map(|partial| finalize_resolution(cfg, partial)))
}

/// The builtin resolver: relative specifiers resolve against the
/// importer's directory (entries against the working directory),
/// absolute specifiers pass through, bare specifiers stay unresolved.
/// Resolution consults the host filesystem and tries a `.js` extension,
/// so a missing relative file is reported as unresolved rather than as a
/// load failure.
fn builtin_resolve(source: &str, importer: Option<&str>) -> Option<PartialResolvedId> {
    if paths::is_absolute(source) {
        return existing_file(paths::normalize_id(source));
    }
    if paths::is_relative(source) {
        let id = match importer {
            Some(importer) => paths::resolve_against(importer, source),
            None => {
                let cwd = std::env::current_dir().unwrap_or_default();
                paths::normalize_id(cwd.join(source))
            }
        };
        return existing_file(id);
    }
    None
}

fn existing_file(id: String) -> Option<PartialResolvedId> {
    if std::path::Path::new(&id).is_file() {
        return Some(PartialResolvedId::from_id(id));
    }
    let with_extension = format!("{}.js", id);
    if std::path::Path::new(&with_extension).is_file() {
        return Some(PartialResolvedId::from_id(with_extension));
    }
    None
}

/// Resolution for dynamic imports: the dedicated hook first, then the
/// static pipeline for string specifiers.
pub fn resolve_dynamic_import(
    driver: &PluginDriver,
    cfg: &ResolveConfig,
    specifier: Option<&str>,
    importer: &str,
) -> BundleResult<Option<ResolvedId>> {
    let hook_result = driver.hook_first("resolveDynamicImport", &[], |plugin, ctx| {
        plugin.resolve_dynamic_import(ctx, specifier.unwrap_or(""), importer)
    })?;
    if let Some(partial) = hook_result {
        return Ok(Some(finalize_resolution(cfg, partial)));
    }
    match specifier {
        Some(specifier) => resolve_id(driver, cfg, specifier, Some(importer), false, &[]),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::emit::FileEmitter;
    use crate::options::InputOptions;

    fn test_driver() -> PluginDriver {
        let options = InputOptions::default();
        PluginDriver::new(
            vec![],
            Arc::new(Diagnostics::new(&options)),
            Arc::new(FileEmitter::default()),
            4,
        )
    }

    fn test_cfg() -> ResolveConfig {
        ResolveConfig {
            external: ExternalOption::None,
            make_absolute_externals_relative: true,
            default_module_side_effects: true,
        }
    }

    #[test]
    fn relative_specifiers_resolve_against_importer() {
        let dir = std::env::temp_dir().join("bundler-resolve-test");
        std::fs::create_dir_all(&dir).unwrap();
        let dep = dir.join("dep.js");
        std::fs::write(&dep, "export {};").unwrap();
        let importer = dir.join("main.js");

        let driver = test_driver();
        let resolved = resolve_id(
            &driver,
            &test_cfg(),
            "./dep.js",
            Some(&importer.to_string_lossy()),
            false,
            &[],
        )
        .unwrap()
        .unwrap();
        assert!(resolved.id.ends_with("dep.js"));
        assert!(!resolved.is_external());
    }

    #[test]
    fn missing_relative_files_stay_unresolved() {
        let driver = test_driver();
        let resolved = resolve_id(
            &driver,
            &test_cfg(),
            "./definitely-not-a-file.js",
            Some("/nonexistent-dir/main.js"),
            false,
            &[],
        )
        .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn bare_specifiers_stay_unresolved() {
        let driver = test_driver();
        let resolved =
            resolve_id(&driver, &test_cfg(), "lodash", Some("/src/main.js"), false, &[]).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn external_option_short_circuits() {
        let driver = test_driver();
        let cfg = ResolveConfig {
            external: ExternalOption::Ids(vec!["lodash".to_string()]),
            ..test_cfg()
        };
        let resolved = resolve_id(&driver, &cfg, "lodash", Some("/src/main.js"), false, &[])
            .unwrap()
            .unwrap();
        assert!(resolved.is_external());
        assert_eq!(resolved.id, "lodash");
        assert!(!resolved.renormalize_render_path);
    }

    #[test]
    fn absolute_external_ids_renormalize_by_default() {
        let cfg = test_cfg();
        let resolved = finalize_resolution(
            &cfg,
            PartialResolvedId {
                id: "/abs/dep.js".to_string(),
                external: ExternalKind::External,
                ..Default::default()
            },
        );
        assert!(resolved.renormalize_render_path);

        let absolute = finalize_resolution(
            &cfg,
            PartialResolvedId {
                id: "/abs/dep.js".to_string(),
                external: ExternalKind::Absolute,
                ..Default::default()
            },
        );
        assert!(!absolute.renormalize_render_path);
    }
}
