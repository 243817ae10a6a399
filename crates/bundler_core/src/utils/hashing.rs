use std::hash::Hasher;

use twox_hash::XxHash64;

const HASH_SEED: u64 = 0;

/// Content hash over an ordered list of byte slices. The order of parts is
/// part of the hash identity.
pub fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    let mut hasher = XxHash64::with_seed(HASH_SEED);
    for part in parts {
        hasher.write(part);
        // length-prefix free separator so ("ab","c") != ("a","bc")
        hasher.write_u8(0xff);
    }
    hasher.finish()
}

pub fn hash_str(content: &str) -> u64 {
    hash_parts([content.as_bytes()])
}

/// Fixed-width lowercase hex, truncated to `len` characters (max 16).
pub fn hex_hash(value: u64, len: usize) -> String {
    let full = format!("{:016x}", value);
    full[..len.min(16)].to_string()
}

/// Placeholders substituted for `[hash]` during the first render pass.
/// They are unique per file and replaced bottom-up once dependency hashes
/// are known.
pub fn hash_placeholder(index: usize, len: usize) -> String {
    // the delimiters cannot occur in generated identifiers or paths
    let body = format!("~{:03}~", index);
    let mut out = String::from("!");
    out.push_str(&body);
    while out.len() < len.max(body.len() + 1) {
        out.push('~');
    }
    out
}

pub fn replace_placeholders(code: &str, replacements: &[(String, String)]) -> String {
    let mut out = code.to_string();
    for (placeholder, value) in replacements {
        if out.contains(placeholder.as_str()) {
            out = out.replace(placeholder.as_str(), value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hashes_are_stable_and_order_sensitive() {
        assert_eq!(hash_str("abc"), hash_str("abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
        assert_ne!(
            hash_parts([b"ab".as_slice(), b"c".as_slice()]),
            hash_parts([b"a".as_slice(), b"bc".as_slice()])
        );
    }

    #[test]
    fn hex_is_fixed_width() {
        assert_eq!(hex_hash(0xabc, 8).len(), 8);
        assert_eq!(hex_hash(0xabc, 8), "00000000");
        assert_eq!(hex_hash(0xabc0_0000_0000_0000, 4), "abc0");
    }

    #[test]
    fn placeholders_are_distinct_and_padded() {
        let a = hash_placeholder(1, 8);
        let b = hash_placeholder(2, 8);
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }
}
