use sourcemap::{SourceMap, SourceMapBuilder};

/// A generated-position token destined for the chunk map, in module-local
/// original coordinates (post-transform source).
pub struct ChunkMapping {
    pub gen_line: u32,
    pub gen_col: u32,
    pub source: String,
    pub src_line: u32,
    pub src_col: u32,
    /// Content of the post-transform source, embedded once per source.
    pub source_content: Option<String>,
}

/// Traces a position through a module's transform-map chain, newest map
/// last. Returns the original position the chain bottoms out at.
pub fn trace_through_chain(
    maps: &[SourceMap],
    line: u32,
    col: u32,
) -> Option<(String, u32, u32)> {
    let mut source: Option<String> = None;
    let mut line = line;
    let mut col = col;
    for map in maps.iter().rev() {
        let token = map.lookup_token(line, col)?;
        line = token.get_src_line();
        col = token.get_src_col();
        source = token.get_source().map(str::to_string);
    }
    source.map(|s| (s, line, col))
}

/// Builds the chunk's map from rendered-position mappings, tracing each
/// through the owning module's transform chain when one exists.
pub fn build_chunk_map(
    file_name: &str,
    mappings: Vec<(ChunkMapping, &[SourceMap])>,
    path_transform: Option<&dyn Fn(&str, &str) -> String>,
) -> SourceMap {
    let mut builder = SourceMapBuilder::new(Some(file_name));
    for (mapping, chain) in mappings {
        let (source, src_line, src_col, content) = match trace_through_chain(
            chain,
            mapping.src_line,
            mapping.src_col,
        ) {
            Some((source, line, col)) if !chain.is_empty() => (source, line, col, None),
            _ => (
                mapping.source.clone(),
                mapping.src_line,
                mapping.src_col,
                mapping.source_content.clone(),
            ),
        };
        let source = match path_transform {
            Some(transform) => transform(&source, file_name),
            None => source,
        };
        let token = builder.add(
            mapping.gen_line,
            mapping.gen_col,
            src_line,
            src_col,
            Some(&source),
            None,
            false,
        );
        if let Some(content) = content {
            builder.set_source_contents(token.src_id, Some(&content));
        }
    }
    builder.into_sourcemap()
}

/// The standard collapse of two maps: `outer` maps final->intermediate,
/// `inner` maps intermediate->original; the result maps final->original.
pub fn compose_maps(outer: &SourceMap, inner: &SourceMap) -> SourceMap {
    let mut builder = SourceMapBuilder::new(outer.get_file());
    for token in outer.tokens() {
        let Some(inner_token) = inner.lookup_token(token.get_src_line(), token.get_src_col())
        else {
            continue;
        };
        let source = inner_token.get_source().map(str::to_string);
        let raw = builder.add(
            token.get_dst_line(),
            token.get_dst_col(),
            inner_token.get_src_line(),
            inner_token.get_src_col(),
            source.as_deref(),
            inner_token.get_name(),
            false,
        );
        if let Some(source) = &source {
            if let Some(view) = inner.get_source_contents(inner_token.get_src_id()) {
                builder.set_source_contents(raw.src_id, Some(view));
            }
        }
    }
    builder.into_sourcemap()
}

pub fn map_to_json(map: &SourceMap) -> String {
    let mut out: Vec<u8> = Vec::new();
    map.to_writer(&mut out).ok();
    String::from_utf8(out).unwrap_or_default()
}

/// data-uri form for inline source maps.
pub fn map_to_data_url(map: &SourceMap) -> String {
    let json = map_to_json(map);
    format!(
        "data:application/json;charset=utf-8;base64,{}",
        base64_encode(json.as_bytes())
    )
}

// minimal base64, enough for the inline-map data url
fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for block in bytes.chunks(3) {
        let b = [
            block[0],
            block.get(1).copied().unwrap_or(0),
            block.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if block.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if block.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn base64_round_trips_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn chunk_map_keeps_module_positions() {
        let mappings = vec![(
            ChunkMapping {
                gen_line: 3,
                gen_col: 0,
                source: "/src/a.js".to_string(),
                src_line: 1,
                src_col: 4,
                source_content: Some("let x;\nlet y = 1;".to_string()),
            },
            &[][..],
        )];
        let map = build_chunk_map("out.js", mappings, None);
        let token = map.lookup_token(3, 0).expect("token at 3:0");
        assert_eq!(token.get_source(), Some("/src/a.js"));
        assert_eq!(token.get_src_line(), 1);
        assert_eq!(token.get_src_col(), 4);
    }

    #[test]
    fn compose_collapses_through_intermediate() {
        let mut outer_builder = SourceMapBuilder::new(Some("out.js"));
        outer_builder.add(0, 0, 5, 2, Some("mid.js"), None, false);
        let outer = outer_builder.into_sourcemap();

        let mut inner_builder = SourceMapBuilder::new(Some("mid.js"));
        inner_builder.add(5, 2, 9, 7, Some("orig.js"), None, false);
        let inner = inner_builder.into_sourcemap();

        let composed = compose_maps(&outer, &inner);
        let token = composed.lookup_token(0, 0).expect("token at 0:0");
        assert_eq!(token.get_source(), Some("orig.js"));
        assert_eq!(token.get_src_line(), 9);
        assert_eq!(token.get_src_col(), 7);
    }
}
