use ahashmap::AHashSet;
use once_cell::sync::Lazy;

/// Names that can never be used as emitted top-level identifiers, whatever
/// the format.
static BASE_RESERVED: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
        "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
        "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
        "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
        "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "with", "yield",
        "NaN", "Infinity", "arguments", "eval",
    ]
    .into_iter()
    .collect()
});

/// Extra names the wrapper of each format claims for itself.
pub fn format_reserved(format: crate::options::OutputFormat) -> &'static [&'static str] {
    use crate::options::OutputFormat::*;
    match format {
        Es => &[],
        Cjs => &["exports", "require", "module", "__filename", "__dirname"],
        Amd => &["exports", "require", "module", "define"],
        Umd => &["exports", "require", "module", "define", "global", "factory", "self", "this"],
        Iife => &["exports", "self", "this", "global"],
        System => &["exports", "module", "System"],
    }
}

pub fn is_reserved(name: &str) -> bool {
    BASE_RESERVED.contains(name)
}

/// Turns an arbitrary string (file stem, chunk alias) into a legal JS
/// identifier by replacing illegal characters with `_`.
pub fn make_legal_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, ch) in name.chars().enumerate() {
        let legal = if i == 0 {
            ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
        };
        out.push(if legal { ch } else { '_' });
    }
    if out.is_empty() || is_reserved(&out) {
        format!("_{}", out)
    } else {
        out
    }
}

/// Picks a name not present in `used`, suffixing `$1`, `$2`, … until free,
/// and commits the result to `used`.
pub fn get_safe_name(base: &str, used: &mut AHashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut counter = 0usize;
    while is_reserved(&candidate) || used.contains(&candidate) {
        counter += 1;
        candidate = format!("{}${}", base, counter);
    }
    used.insert(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn legal_identifiers() {
        assert_eq!(make_legal_identifier("my-module"), "my_module");
        assert_eq!(make_legal_identifier("123abc"), "_23abc");
        assert_eq!(make_legal_identifier("default"), "_default");
    }

    #[test]
    fn safe_names_count_up() {
        let mut used = ahashmap::new_set();
        assert_eq!(get_safe_name("x", &mut used), "x");
        assert_eq!(get_safe_name("x", &mut used), "x$1");
        assert_eq!(get_safe_name("x", &mut used), "x$2");
        assert_eq!(get_safe_name("new", &mut used), "new$1");
    }
}
