use std::sync::Arc;

use ahashmap::AHashMap;
use bundler_core::utils::paths;
use bundler_core::{
    InputItem, InputOptions, LoadOutput, PartialResolvedId, Plugin, PluginContext,
};

/// Serves a fixed set of virtual modules: resolves relative specifiers
/// against their importer and loads sources from memory.
pub struct MemoryFiles {
    files: AHashMap<String, String>,
}

impl MemoryFiles {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        let mut files = ahashmap::new_map();
        for (id, code) in entries {
            files.insert(id.to_string(), code.to_string());
        }
        Self { files }
    }
}

impl Plugin for MemoryFiles {
    fn name(&self) -> &str {
        "memory-files"
    }

    fn resolve_id(
        &self,
        _ctx: &PluginContext,
        source: &str,
        importer: Option<&str>,
        _is_entry: bool,
    ) -> bundle_err::BundleResult<Option<PartialResolvedId>> {
        let id = match importer {
            Some(importer) if paths::is_relative(source) => {
                paths::resolve_against(importer, source)
            }
            _ => source.to_string(),
        };
        if self.files.contains_key(&id) {
            Ok(Some(PartialResolvedId::from_id(id)))
        } else {
            Ok(None)
        }
    }

    fn load(
        &self,
        _ctx: &PluginContext,
        id: &str,
    ) -> bundle_err::BundleResult<Option<LoadOutput>> {
        Ok(self.files.get(id).map(LoadOutput::from_code))
    }
}

/// Input options over a virtual module set with the given entry ids.
pub fn memory_options(files: &[(&str, &str)], entries: &[&str]) -> InputOptions {
    InputOptions {
        input: entries.iter().map(|id| InputItem::new(*id)).collect(),
        plugins: vec![Arc::new(MemoryFiles::new(files)) as Arc<dyn Plugin>],
        ..Default::default()
    }
}
