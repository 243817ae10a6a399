use ahashmap::AHashMap;
use bundle_err::{BundleError, BundleResult, ErrorCode};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::options::OutputOptions;
use crate::output::{OutputAsset, OutputFile};
use crate::plugin::EmittedFile;
use crate::utils::hashing::{hash_parts, hex_hash};
use crate::utils::paths::extname;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterPhase {
    Build,
    Generate,
    Closed,
}

#[derive(Debug, Clone)]
pub struct EmittedChunkRecord {
    pub reference_id: String,
    pub id: String,
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub implicitly_loaded_after_one_of: Option<Vec<String>>,
    pub preserve_signature: Option<crate::options::PreserveSignature>,
}

#[derive(Debug, Clone)]
struct EmittedAssetRecord {
    name: Option<String>,
    source: Option<Vec<u8>>,
    /// Explicit fixed name given at emit time; skips the name pattern.
    fixed_file_name: Option<String>,
    final_file_name: Option<String>,
}

#[derive(Default)]
struct EmitterInner {
    assets: IndexMap<String, EmittedAssetRecord>,
    chunks: IndexMap<String, EmittedChunkRecord>,
    /// Chunks emitted during the build phase, waiting for the loader to
    /// pick them up as additional entries.
    pending_chunks: Vec<EmittedChunkRecord>,
    /// Final file name of every chunk by reference id, per output.
    chunk_file_names: AHashMap<String, String>,
    /// Module id backing each emitted chunk reference.
    chunk_modules: AHashMap<String, String>,
    reference_counter: usize,
    phase: Option<EmitterPhase>,
}

/// Owns plugin-emitted files: hands out reference ids during the build,
/// resolves them to file names during generate, and detects name
/// collisions across the whole bundle.
#[derive(Default)]
pub struct FileEmitter {
    inner: Mutex<EmitterInner>,
}

impl FileEmitter {
    pub fn set_phase(&self, phase: EmitterPhase) {
        self.inner.lock().phase = Some(phase);
    }

    fn next_reference_id(inner: &mut EmitterInner, name: &str) -> String {
        inner.reference_counter += 1;
        let hash = hash_parts([name.as_bytes(), inner.reference_counter.to_string().as_bytes()]);
        hex_hash(hash, 8)
    }

    pub fn emit_file(&self, file: EmittedFile) -> BundleResult<String> {
        let mut inner = self.inner.lock();
        match file {
            EmittedFile::Asset {
                name,
                file_name,
                source,
            } => {
                let reference_id =
                    Self::next_reference_id(&mut inner, name.as_deref().unwrap_or("asset"));
                inner.assets.insert(
                    reference_id.clone(),
                    EmittedAssetRecord {
                        name,
                        source,
                        fixed_file_name: file_name,
                        final_file_name: None,
                    },
                );
                Ok(reference_id)
            }
            EmittedFile::Chunk {
                id,
                name,
                file_name,
                implicitly_loaded_after_one_of,
                preserve_signature,
            } => {
                if inner.phase != Some(EmitterPhase::Build) {
                    return Err(bundle_err::invalid_phase(
                        "emitFile with type \"chunk\"",
                        "generate",
                    ));
                }
                let reference_id = Self::next_reference_id(&mut inner, &id);
                let record = EmittedChunkRecord {
                    reference_id: reference_id.clone(),
                    id,
                    name,
                    file_name,
                    implicitly_loaded_after_one_of,
                    preserve_signature,
                };
                inner.chunks.insert(reference_id.clone(), record.clone());
                inner.pending_chunks.push(record);
                Ok(reference_id)
            }
        }
    }

    /// Attach a source to an asset emitted without one.
    pub fn set_asset_source(&self, reference_id: &str, source: Vec<u8>) -> BundleResult<()> {
        let mut inner = self.inner.lock();
        let asset = inner.assets.get_mut(reference_id).ok_or_else(|| {
            BundleError::new(
                ErrorCode::AssetSourceMissing,
                format!("No asset with reference id \"{}\".", reference_id),
            )
        })?;
        if asset.source.is_some() {
            return Err(bundle_err::validation(format!(
                "Unable to set the source for asset \"{}\", source already set.",
                asset.name.as_deref().unwrap_or(reference_id)
            )));
        }
        asset.source = Some(source);
        Ok(())
    }

    pub fn get_file_name(&self, reference_id: &str) -> BundleResult<String> {
        let inner = self.inner.lock();
        if let Some(asset) = inner.assets.get(reference_id) {
            if let Some(name) = asset.final_file_name.clone().or(asset.fixed_file_name.clone()) {
                return Ok(name);
            }
            return Err(bundle_err::asset_not_finalised(
                asset.name.as_deref().unwrap_or(reference_id),
            ));
        }
        if let Some(chunk) = inner.chunks.get(reference_id) {
            if let Some(file_name) = inner.chunk_file_names.get(reference_id) {
                return Ok(file_name.clone());
            }
            if let Some(file_name) = &chunk.file_name {
                return Ok(file_name.clone());
            }
            return Err(BundleError::new(
                ErrorCode::ChunkInvalid,
                format!(
                    "Unable to get file name for chunk \"{}\": it has not been rendered yet.",
                    chunk.id
                ),
            ));
        }
        Err(bundle_err::validation(format!(
            "Unable to get file name for unknown file reference \"{}\".",
            reference_id
        )))
    }

    pub fn take_pending_chunks(&self) -> Vec<EmittedChunkRecord> {
        std::mem::take(&mut self.inner.lock().pending_chunks)
    }

    pub fn record_chunk_file_name(&self, reference_id: &str, file_name: &str) {
        self.inner
            .lock()
            .chunk_file_names
            .insert(reference_id.to_string(), file_name.to_string());
    }

    /// Remembers which graph module backs an emitted-chunk reference, so
    /// the renderer can report the final file name for it.
    pub fn record_chunk_module(&self, reference_id: &str, module_id: &str) {
        self.inner
            .lock()
            .chunk_modules
            .insert(reference_id.to_string(), module_id.to_string());
    }

    pub fn chunk_module_refs(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .chunk_modules
            .iter()
            .map(|(reference, module_id)| (reference.clone(), module_id.clone()))
            .collect()
    }

    /// An explicit `fileName` given to `emitFile({type:'chunk'})` pins the
    /// chunk's output name, bypassing the name pattern.
    pub fn fixed_chunk_file_name(&self, module_id: &str) -> Option<String> {
        let inner = self.inner.lock();
        for (reference, chunk) in &inner.chunks {
            if let Some(file_name) = &chunk.file_name {
                if inner.chunk_modules.get(reference).map(String::as_str) == Some(module_id) {
                    return Some(file_name.clone());
                }
            }
        }
        None
    }

    /// Called at the start of every generate: per-output state is reset so
    /// name patterns of this output apply afresh.
    pub fn begin_output(&self) {
        let mut inner = self.inner.lock();
        inner.chunk_file_names.clear();
        for asset in inner.assets.values_mut() {
            asset.final_file_name = None;
        }
    }

    /// Resolves every emitted asset to its final file name and appends the
    /// asset files to the bundle. Assets with identical content share one
    /// file through a content-hash index.
    pub fn finalize_assets(
        &self,
        options: &OutputOptions,
        reserved_names: &mut ahashmap::AHashSet<String>,
        output: &mut Vec<OutputFile>,
    ) -> BundleResult<()> {
        let mut inner = self.inner.lock();
        let mut by_content_hash: AHashMap<u64, String> = ahashmap::new_map();

        let reference_ids: Vec<String> = inner.assets.keys().cloned().collect();
        for reference_id in reference_ids {
            let (name, source, fixed) = {
                let asset = &inner.assets[&reference_id];
                (
                    asset.name.clone(),
                    asset.source.clone(),
                    asset.fixed_file_name.clone(),
                )
            };
            let source = source.ok_or_else(|| {
                bundle_err::asset_source_missing(name.as_deref().unwrap_or(&reference_id))
            })?;

            let content_hash = hash_parts([source.as_slice()]);
            if fixed.is_none() {
                if let Some(existing) = by_content_hash.get(&content_hash) {
                    // identical content deduplicates onto the first file
                    inner.assets[&reference_id].final_file_name = Some(existing.clone());
                    continue;
                }
            }

            let file_name = match fixed {
                Some(fixed) => {
                    if !reserved_names.insert(fixed.clone()) {
                        return Err(bundle_err::file_name_conflict(&fixed));
                    }
                    fixed
                }
                None => {
                    let base = name.as_deref().unwrap_or("asset");
                    let pattern = &options.asset_file_names;
                    let rendered = render_asset_pattern(pattern, base, content_hash);
                    deconflict_file_name(rendered, reserved_names)
                }
            };

            by_content_hash.insert(content_hash, file_name.clone());
            inner.assets[&reference_id].final_file_name = Some(file_name.clone());
            output.push(OutputFile::Asset(OutputAsset {
                source,
                file_name,
                name,
            }));
        }
        Ok(())
    }
}

fn render_asset_pattern(pattern: &str, name: &str, content_hash: u64) -> String {
    let ext = extname(name);
    let stem = match name.strip_suffix(ext) {
        Some(stripped) if !ext.is_empty() => stripped,
        _ => name,
    };
    pattern
        .replace("[name]", stem)
        .replace("[extname]", ext)
        .replace("[ext]", ext.trim_start_matches('.'))
        .replace("[hash]", &hex_hash(content_hash, 8))
}

/// Appends a numeric suffix until the name is free within this bundle.
pub fn deconflict_file_name(
    candidate: String,
    reserved: &mut ahashmap::AHashSet<String>,
) -> String {
    if reserved.insert(candidate.clone()) {
        return candidate;
    }
    let ext = extname(&candidate).to_string();
    let stem = candidate[..candidate.len() - ext.len()].to_string();
    let mut counter = 1;
    loop {
        let next = format!("{}{}{}", stem, counter, ext);
        if reserved.insert(next.clone()) {
            return next;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn asset_reference_ids_are_unique() {
        let emitter = FileEmitter::default();
        emitter.set_phase(EmitterPhase::Build);
        let a = emitter
            .emit_file(EmittedFile::Asset {
                name: Some("logo.svg".into()),
                file_name: None,
                source: Some(b"<svg/>".to_vec()),
            })
            .unwrap();
        let b = emitter
            .emit_file(EmittedFile::Asset {
                name: Some("logo.svg".into()),
                file_name: None,
                source: Some(b"<svg)".to_vec()),
            })
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn get_file_name_before_finalise_fails() {
        let emitter = FileEmitter::default();
        emitter.set_phase(EmitterPhase::Build);
        let id = emitter
            .emit_file(EmittedFile::Asset {
                name: Some("style.css".into()),
                file_name: None,
                source: Some(b"body{}".to_vec()),
            })
            .unwrap();
        let err = emitter.get_file_name(&id).unwrap_err();
        assert_eq!(err.code, ErrorCode::AssetNotFinalised);
    }

    #[test]
    fn identical_asset_content_shares_one_file() {
        let emitter = FileEmitter::default();
        emitter.set_phase(EmitterPhase::Build);
        let first = emitter
            .emit_file(EmittedFile::Asset {
                name: Some("data.txt".into()),
                file_name: None,
                source: Some(b"same".to_vec()),
            })
            .unwrap();
        let second = emitter
            .emit_file(EmittedFile::Asset {
                name: Some("other.txt".into()),
                file_name: None,
                source: Some(b"same".to_vec()),
            })
            .unwrap();

        let mut reserved = ahashmap::new_set();
        let mut output = Vec::new();
        emitter
            .finalize_assets(&OutputOptions::default(), &mut reserved, &mut output)
            .unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(
            emitter.get_file_name(&first).unwrap(),
            emitter.get_file_name(&second).unwrap()
        );
    }

    #[test]
    fn fixed_file_name_conflicts_are_fatal() {
        let emitter = FileEmitter::default();
        emitter.set_phase(EmitterPhase::Build);
        for _ in 0..2 {
            emitter
                .emit_file(EmittedFile::Asset {
                    name: None,
                    file_name: Some("pinned.txt".into()),
                    source: Some(b"x".to_vec()),
                })
                .unwrap();
        }
        let mut reserved = ahashmap::new_set();
        let mut output = Vec::new();
        let err = emitter
            .finalize_assets(&OutputOptions::default(), &mut reserved, &mut output)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FileNameConflict);
    }

    #[test]
    fn emitting_chunks_outside_build_phase_is_fatal() {
        let emitter = FileEmitter::default();
        emitter.set_phase(EmitterPhase::Generate);
        let err = emitter
            .emit_file(EmittedFile::Chunk {
                id: "late.js".into(),
                name: None,
                file_name: None,
                implicitly_loaded_after_one_of: None,
                preserve_signature: None,
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPhase);
    }
}
