use std::fmt::Display;

/// Stable machine-readable codes for build failures and warnings.
///
/// The string form is part of the public contract; renderers and plugin
/// authors match on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnresolvedEntry,
    UnresolvedImport,
    MissingExport,
    CircularReexport,
    CircularDependency,
    MixedExports,
    InvalidExportOption,
    InvalidTlaFormat,
    ChunkInvalid,
    PluginError,
    ValidationError,
    FileNameConflict,
    BadLoader,
    AssetNotFinalised,
    AssetSourceMissing,
    InvalidPhase,
    AlreadyClosed,
    DeprecatedFeature,
    ParseError,
    MissingGlobalName,
    MissingNameOptionForIifeExport,
    SyntheticNamedExportsNeedFallback,
    EmptyBundle,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnresolvedEntry => "UNRESOLVED_ENTRY",
            ErrorCode::UnresolvedImport => "UNRESOLVED_IMPORT",
            ErrorCode::MissingExport => "MISSING_EXPORT",
            ErrorCode::CircularReexport => "CIRCULAR_REEXPORT",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::MixedExports => "MIXED_EXPORTS",
            ErrorCode::InvalidExportOption => "INVALID_EXPORT_OPTION",
            ErrorCode::InvalidTlaFormat => "INVALID_TLA_FORMAT",
            ErrorCode::ChunkInvalid => "CHUNK_INVALID",
            ErrorCode::PluginError => "PLUGIN_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::FileNameConflict => "FILE_NAME_CONFLICT",
            ErrorCode::BadLoader => "BAD_LOADER",
            ErrorCode::AssetNotFinalised => "ASSET_NOT_FINALISED",
            ErrorCode::AssetSourceMissing => "ASSET_SOURCE_MISSING",
            ErrorCode::InvalidPhase => "INVALID_ROLLUP_PHASE",
            ErrorCode::AlreadyClosed => "ALREADY_CLOSED",
            ErrorCode::DeprecatedFeature => "DEPRECATED_FEATURE",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::MissingGlobalName => "MISSING_GLOBAL_NAME",
            ErrorCode::MissingNameOptionForIifeExport => "MISSING_NAME_OPTION_FOR_IIFE_EXPORT",
            ErrorCode::SyntheticNamedExportsNeedFallback => "SYNTHETIC_NAMED_EXPORTS_NEED_FALLBACK",
            ErrorCode::EmptyBundle => "EMPTY_BUNDLE",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file/line/column location, 1-based, as surfaced in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locate {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Display for Locate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A build error or warning with its stable code and optional location
/// enrichment. Fatal errors are rethrown from the entrypoint API; warnings
/// flow to the configured handler carrying the same shape.
#[derive(Debug)]
pub struct BundleError {
    pub code: ErrorCode,
    pub message: String,
    /// Module id the diagnostic is about, when known.
    pub id: Option<String>,
    pub loc: Option<Locate>,
    /// A few source lines around `loc`, pre-rendered.
    pub frame: Option<String>,
    pub plugin: Option<String>,
    pub hook: Option<String>,
    pub cause: Option<anyhow::Error>,
}

impl std::error::Error for BundleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(plugin) = &self.plugin {
            write!(f, " (plugin: {})", plugin)?;
        }
        if let Some(loc) = &self.loc {
            write!(f, " at {}", loc)?;
        }
        Ok(())
    }
}

impl BundleError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            id: None,
            loc: None,
            frame: None,
            plugin: None,
            hook: None,
            cause: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_loc(mut self, loc: Locate) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Wraps a plugin failure, preserving the original as the source and
    /// annotating which plugin/hook produced it.
    pub fn from_plugin(plugin: &str, hook: &str, inner: BundleError) -> Self {
        let mut wrapped = if inner.code == ErrorCode::PluginError {
            inner
        } else {
            BundleError {
                code: ErrorCode::PluginError,
                message: inner.message.clone(),
                id: inner.id.clone(),
                loc: inner.loc.clone(),
                frame: inner.frame.clone(),
                plugin: None,
                hook: None,
                cause: Some(anyhow::Error::new(inner)),
            }
        };
        wrapped.plugin.get_or_insert_with(|| plugin.to_string());
        wrapped.hook.get_or_insert_with(|| hook.to_string());
        wrapped
    }
}

pub type BundleResult<T> = Result<T, BundleError>;

// constructor helpers for the common diagnostics, so call sites
// produce uniform messages

pub fn unresolved_entry(specifier: &str) -> BundleError {
    BundleError::new(
        ErrorCode::UnresolvedEntry,
        format!("Could not resolve entry module \"{}\".", specifier),
    )
}

pub fn entry_cannot_be_external(specifier: &str) -> BundleError {
    BundleError::new(
        ErrorCode::UnresolvedEntry,
        format!("Entry module \"{}\" cannot be external.", specifier),
    )
}

pub fn unresolved_import(specifier: &str, importer: &str) -> BundleError {
    BundleError::new(
        ErrorCode::UnresolvedImport,
        format!("Could not resolve \"{}\" from {}.", specifier, importer),
    )
    .with_id(importer)
}

pub fn unresolved_import_treated_external(specifier: &str, importer: &str) -> BundleError {
    BundleError::new(
        ErrorCode::UnresolvedImport,
        format!(
            "\"{}\" is imported by {}, but could not be resolved - treating it as an external dependency.",
            specifier, importer
        ),
    )
    .with_id(importer)
}

pub fn missing_export(binding: &str, importer: &str, exporter: &str) -> BundleError {
    BundleError::new(
        ErrorCode::MissingExport,
        format!(
            "\"{}\" is not exported by {}, imported by {}.",
            binding, exporter, importer
        ),
    )
    .with_id(importer)
}

pub fn circular_reexport(export_name: &str, exporter: &str) -> BundleError {
    BundleError::new(
        ErrorCode::CircularReexport,
        format!(
            "\"{}\" cannot be exported from {} as it is a reexport that references itself.",
            export_name, exporter
        ),
    )
    .with_id(exporter)
}

pub fn circular_dependency(cycle_path: &[String]) -> BundleError {
    BundleError::new(ErrorCode::CircularDependency, cycle_path.join(" -> "))
}

pub fn invalid_tla_format(module_id: &str, format: &str) -> BundleError {
    BundleError::new(
        ErrorCode::InvalidTlaFormat,
        format!(
            "Module {} uses top-level await, which is only supported by the \"es\" and \"system\" output formats.",
            module_id
        ),
    )
    .with_id(format!("format: {}", format))
}

pub fn bad_loader(id: &str) -> BundleError {
    BundleError::new(
        ErrorCode::BadLoader,
        format!(
            "Error loading \"{}\": plugin load hook should return a string, or an object with a \"code\" property.",
            id
        ),
    )
    .with_id(id)
}

pub fn already_closed() -> BundleError {
    BundleError::new(
        ErrorCode::AlreadyClosed,
        "Bundle is already closed, no more calls to \"generate\" or \"write\" are allowed.",
    )
}

pub fn invalid_phase(operation: &str, phase: &str) -> BundleError {
    BundleError::new(
        ErrorCode::InvalidPhase,
        format!("Cannot use {} while the build phase is {}.", operation, phase),
    )
}

pub fn asset_not_finalised(name: &str) -> BundleError {
    BundleError::new(
        ErrorCode::AssetNotFinalised,
        format!(
            "Plugin error - Unable to get file name for asset \"{}\". Ensure that the source is set and that generate is called first.",
            name
        ),
    )
}

pub fn asset_source_missing(name: &str) -> BundleError {
    BundleError::new(
        ErrorCode::AssetSourceMissing,
        format!("Plugin error creating asset \"{}\" - no asset source set.", name),
    )
}

pub fn file_name_conflict(file_name: &str) -> BundleError {
    BundleError::new(
        ErrorCode::FileNameConflict,
        format!(
            "The emitted file \"{}\" overwrites a previously emitted file of the same name.",
            file_name
        ),
    )
}

pub fn mixed_exports(facade_module_id: &str) -> BundleError {
    BundleError::new(
        ErrorCode::MixedExports,
        format!(
            "Entry module {} is using named and default exports together. Consumers of your bundle will have to use `chunk.default` to access the default export, which may not be what you want. Use `output.exports: \"named\"` to disable this warning.",
            facade_module_id
        ),
    )
    .with_id(facade_module_id)
}

pub fn invalid_export_option(requested: &str, facade_module_id: &str, names: &[String]) -> BundleError {
    BundleError::new(
        ErrorCode::InvalidExportOption,
        format!(
            "\"{}\" was specified for \"output.exports\", but entry module \"{}\" has the following exports: {}",
            requested,
            facade_module_id,
            names.join(", ")
        ),
    )
}

pub fn deprecation(message: &str) -> BundleError {
    BundleError::new(ErrorCode::DeprecatedFeature, message.to_string())
}

pub fn validation(message: impl Into<String>) -> BundleError {
    BundleError::new(ErrorCode::ValidationError, message)
}

/// Renders a small code frame around a 1-based line/column, gutter included.
pub fn code_frame(source: &str, line: usize, column: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return String::new();
    }
    let first = line.saturating_sub(2).max(1);
    let last = (line + 1).min(lines.len());
    let gutter_width = last.to_string().len();

    let mut out = String::new();
    for n in first..=last {
        out.push_str(&format!("{:>width$}: {}\n", n, lines[n - 1], width = gutter_width));
        if n == line {
            let pad = gutter_width + 2 + column.saturating_sub(1);
            out.push_str(&format!("{}^\n", " ".repeat(pad)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn codes_render_in_screaming_snake() {
        assert_eq!(ErrorCode::UnresolvedImport.as_str(), "UNRESOLVED_IMPORT");
        assert_eq!(ErrorCode::InvalidPhase.as_str(), "INVALID_ROLLUP_PHASE");
    }

    #[test]
    fn plugin_wrapping_preserves_inner_code_as_cause() {
        let inner = missing_export("x", "a.js", "b.js");
        let wrapped = BundleError::from_plugin("my-plugin", "renderChunk", inner);
        assert_eq!(wrapped.code, ErrorCode::PluginError);
        assert_eq!(wrapped.plugin.as_deref(), Some("my-plugin"));
        assert_eq!(wrapped.hook.as_deref(), Some("renderChunk"));
        assert!(wrapped.cause.is_some());
    }

    #[test]
    fn code_frame_points_at_column() {
        let frame = code_frame("const a = 1;\nconst b = oops;\nconst c = 3;", 2, 11);
        assert!(frame.contains("2: const b = oops;"));
        let caret_line = frame.lines().nth(2).unwrap();
        assert_eq!(caret_line.find('^').unwrap(), 3 + 10);
    }
}
