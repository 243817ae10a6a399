pub mod fold;
pub mod scan;

#[cfg(test)]
mod scan_tests;

use bundle_err::{BundleError, ErrorCode, Locate};
use swc_common::comments::SingleThreadedComments;
use swc_common::{sync::Lrc, FileName, Globals, Mark, SourceFile, SourceMap, SyntaxContext, GLOBALS};
use swc_ecma_ast::Program;
use swc_ecma_transforms::resolver;
use swc_ecma_visit::FoldWith;

use crate::parse::scan::{scan_program, ScanOutput};

/// A parsed module body plus everything the scanner derived from it.
pub struct ParsedModule {
    pub fm: Lrc<SourceFile>,
    pub program: Program,
    pub top_level_ctxt: SyntaxContext,
    pub unresolved_ctxt: SyntaxContext,
    pub scan: ScanOutput,
}

/// Parses and scans one module. Binding identity comes from the resolver
/// pass: all modules of a build share one `Globals` so their syntax
/// contexts never collide.
pub fn parse_module(
    cm: &Lrc<SourceMap>,
    globals: &Globals,
    id: &str,
    code: String,
    annotations: bool,
) -> Result<ParsedModule, BundleError> {
    let fm = cm.new_source_file(Lrc::new(FileName::Custom(id.to_string())), code);
    let comments = SingleThreadedComments::default();

    let program = ecma_parse::parse_program(&fm, Some(&comments)).map_err(|parse_error| {
        let loc = cm.lookup_char_pos(parse_error.lo);
        BundleError::new(
            ErrorCode::ParseError,
            format!("Error parsing {}: {}", id, parse_error.message),
        )
        .with_id(id)
        .with_loc(Locate {
            file: id.to_string(),
            line: loc.line,
            column: loc.col_display + 1,
        })
        .with_frame(bundle_err::code_frame(
            &fm.src,
            loc.line,
            loc.col_display + 1,
        ))
    })?;

    let (program, top_level_ctxt, unresolved_ctxt) = GLOBALS.set(globals, || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        let program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, false));
        (
            program,
            SyntaxContext::empty().apply_mark(top_level_mark),
            SyntaxContext::empty().apply_mark(unresolved_mark),
        )
    });

    let scan = scan_program(
        &program,
        Some(&comments),
        top_level_ctxt,
        unresolved_ctxt,
        annotations,
    );

    Ok(ParsedModule {
        fm,
        program,
        top_level_ctxt,
        unresolved_ctxt,
        scan,
    })
}
