/// Synthesised namespace objects: the module's whole export surface as a
/// frozen, null-prototyped object literal.
pub fn namespace_object_text(ns_name: &str, entries: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "var {} = /*#__PURE__*/Object.freeze({{\n  __proto__: null",
        ns_name
    ));
    for (key, value_expr) in entries {
        out.push_str(",\n  ");
        if is_identifier_like(key) {
            out.push_str(key);
        } else {
            out.push('\'');
            out.push_str(&key.replace('\\', "\\\\").replace('\'', "\\'"));
            out.push('\'');
        }
        out.push_str(": ");
        out.push_str(value_expr);
    }
    out.push_str("\n});\n");
    out
}

fn is_identifier_like(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn freezes_and_null_prototypes() {
        let text = namespace_object_text(
            "ns",
            &[
                ("default".to_string(), "main".to_string()),
                ("x".to_string(), "x$1".to_string()),
            ],
        );
        assert_eq!(
            text,
            "var ns = /*#__PURE__*/Object.freeze({\n  __proto__: null,\n  default: main,\n  x: x$1\n});\n"
        );
    }

    #[test]
    fn quotes_non_identifier_keys() {
        let text = namespace_object_text("ns", &[("weird-key".to_string(), "v".to_string())]);
        assert!(text.contains("'weird-key': v"));
    }
}
