use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;
use path_slash::PathBufExt;

/// True for specifiers that must resolve against their importer (`./x`,
/// `../x`). Bare specifiers (`lodash`) are neither relative nor absolute.
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

pub fn is_absolute(specifier: &str) -> bool {
    Path::new(specifier).is_absolute()
}

/// Joins a relative specifier onto the importer's directory and normalises
/// away `.`/`..` segments. Ids always use forward slashes, whatever the
/// host platform.
pub fn resolve_against(importer: &str, specifier: &str) -> String {
    let importer_dir = Path::new(importer).parent().unwrap_or_else(|| Path::new(""));
    normalize_id(importer_dir.join(specifier))
}

pub fn normalize_id(path: impl Into<PathBuf>) -> String {
    path.into().clean().to_slash_lossy().into_owned()
}

/// The default extension-less alias for a module id: its file stem.
pub fn get_alias_name(id: &str) -> String {
    let base = id.rsplit('/').next().unwrap_or(id);
    match base.rfind('.') {
        Some(0) | None => base.to_string(),
        Some(dot) => base[..dot].to_string(),
    }
}

pub fn extname(file_name: &str) -> &str {
    let base = file_name.rsplit('/').next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => &base[dot..],
        _ => "",
    }
}

/// Relative import path from one output file to another, always prefixed
/// with `./` or `../` so module systems treat it as a path.
pub fn relative_import_path(from_file: &str, to_file: &str) -> String {
    let from_dir = Path::new(from_file).parent().unwrap_or_else(|| Path::new(""));
    let relative = relative_to(Path::new(to_file), from_dir);
    if relative.starts_with("../") {
        relative
    } else {
        format!("./{}", relative)
    }
}

fn relative_to(target: &Path, base: &Path) -> String {
    let target_parts: Vec<Component> = target.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let mut shared = 0;
    while shared < target_parts.len()
        && shared < base_parts.len()
        && target_parts[shared] == base_parts[shared]
    {
        shared += 1;
    }

    let mut out: Vec<String> = Vec::new();
    for _ in shared..base_parts.len() {
        out.push("..".to_string());
    }
    for part in &target_parts[shared..] {
        out.push(part.as_os_str().to_string_lossy().into_owned());
    }
    out.join("/")
}

/// Strips a leading root from an id, used to rebase preserved-modules
/// output paths.
pub fn rebase_against_root(id: &str, root: &str) -> Option<String> {
    let stripped = id.strip_prefix(root)?;
    Some(stripped.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn resolves_relative_specifiers() {
        assert_eq!(resolve_against("/src/main.js", "./dep.js"), "/src/dep.js");
        assert_eq!(resolve_against("/src/nested/a.js", "../b.js"), "/src/b.js");
        assert_eq!(resolve_against("main.js", "./x/y.js"), "x/y.js");
    }

    #[test]
    fn classifies_specifiers() {
        assert!(is_relative("./a"));
        assert!(is_relative("../a"));
        assert!(!is_relative("lodash"));
        assert!(!is_relative("/abs/path.js"));
    }

    #[test]
    fn alias_names_drop_one_extension() {
        assert_eq!(get_alias_name("/src/main.js"), "main");
        assert_eq!(get_alias_name("/src/main.test.js"), "main.test");
        assert_eq!(get_alias_name("/src/.hidden"), ".hidden");
    }

    #[test]
    fn relative_import_paths_are_prefixed() {
        assert_eq!(relative_import_path("main.js", "chunk-a.js"), "./chunk-a.js");
        assert_eq!(
            relative_import_path("nested/main.js", "chunk-a.js"),
            "../chunk-a.js"
        );
    }
}
