use indexmap::IndexMap;

/// A rendered chunk as surfaced through `generate`/`write`.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub code: String,
    /// Raw JSON of the composed source map, when enabled.
    pub map: Option<String>,
    pub file_name: String,
    pub name: String,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub dynamic_imports: Vec<String>,
    /// Ids of the modules rendered into this chunk, in execution order.
    pub modules: Vec<String>,
    pub facade_module_id: Option<String>,
    pub is_entry: bool,
    pub is_dynamic_entry: bool,
    pub is_implicit_entry: bool,
    pub implicitly_loaded_before: Vec<String>,
    /// Importee file -> names imported from it.
    pub imported_bindings: IndexMap<String, Vec<String>>,
    pub referenced_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutputAsset {
    pub source: Vec<u8>,
    pub file_name: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OutputFile {
    Chunk(OutputChunk),
    Asset(OutputAsset),
}

impl OutputFile {
    pub fn file_name(&self) -> &str {
        match self {
            OutputFile::Chunk(chunk) => &chunk.file_name,
            OutputFile::Asset(asset) => &asset.file_name,
        }
    }

    pub fn as_chunk(&self) -> Option<&OutputChunk> {
        match self {
            OutputFile::Chunk(chunk) => Some(chunk),
            OutputFile::Asset(_) => None,
        }
    }

    pub fn as_asset(&self) -> Option<&OutputAsset> {
        match self {
            OutputFile::Asset(asset) => Some(asset),
            OutputFile::Chunk(_) => None,
        }
    }
}

/// The result of one `generate` or `write` call: entry chunks first, then
/// secondary chunks, then assets.
#[derive(Debug, Clone, Default)]
pub struct OutputBundle {
    pub output: Vec<OutputFile>,
}

impl OutputBundle {
    pub fn chunks(&self) -> impl Iterator<Item = &OutputChunk> {
        self.output.iter().filter_map(OutputFile::as_chunk)
    }

    pub fn assets(&self) -> impl Iterator<Item = &OutputAsset> {
        self.output.iter().filter_map(OutputFile::as_asset)
    }

    pub fn find(&self, file_name: &str) -> Option<&OutputFile> {
        self.output.iter().find(|f| f.file_name() == file_name)
    }
}
