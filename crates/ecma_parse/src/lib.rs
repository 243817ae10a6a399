use swc_common::comments::Comments;
use swc_common::input::StringInput;
use swc_common::sync::Lrc;
use swc_common::{FileName, SourceFile, SourceMap, Spanned};
use swc_ecma_ast::{EsVersion, Program};
use swc_ecma_parser::{lexer::Lexer, Capturing, EsSyntax, Parser, Syntax};

/// A parse failure, flattened to a plain message plus the byte offset the
/// parser reported. Callers map this onto their own diagnostic types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EcmaParseError {
    pub message: String,
    pub lo: swc_common::BytePos,
}

pub fn create_lexer<'a>(fm: &'a SourceFile, comments: Option<&'a dyn Comments>) -> Lexer<'a> {
    Lexer::new(
        Syntax::Es(EsSyntax {
            jsx: false,
            allow_return_outside_function: false,
            ..Default::default()
        }),
        EsVersion::EsNext,
        StringInput::from(fm),
        comments,
    )
}

/// Parses a source file as an ECMAScript module program. Everything is
/// parsed in module goal so top-level await stays legal syntax.
///
/// Recoverable lexer errors are treated as fatal here: the bundler consumes
/// its own output syntax and never re-emits code it could not fully parse.
pub fn parse_program(
    fm: &SourceFile,
    comments: Option<&dyn Comments>,
) -> Result<Program, EcmaParseError> {
    let lexer = create_lexer(fm, comments);
    let capturing = Capturing::new(lexer);
    let mut parser = Parser::new_from(capturing);

    let program = parser
        .parse_module()
        .map(Program::Module)
        .map_err(|error| EcmaParseError {
            message: error.kind().msg().to_string(),
            lo: error.span().lo,
        })?;

    if let Some(error) = parser.take_errors().into_iter().next() {
        return Err(EcmaParseError {
            message: error.kind().msg().to_string(),
            lo: error.span().lo,
        });
    }

    Ok(program)
}

/// Test helper: parse an inline source snippet under a fresh source map.
pub fn parse_ecma_src<TName, TBody>(name_str: TName, body: TBody) -> (Lrc<SourceMap>, Program)
where
    TName: Into<String>,
    TBody: ToString,
{
    let cm = Lrc::<SourceMap>::default();
    let fname: Lrc<FileName> = Lrc::new(FileName::Custom(name_str.into()));
    let fm = cm.new_source_file(fname, body.to_string());
    let program = parse_program(&fm, None).expect("inline test source should parse");
    (cm, program)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_module_syntax() {
        let (_cm, program) = parse_ecma_src("a.js", "import { x } from './b';\nconsole.log(x);");
        let module = program.expect_module();
        assert_eq!(module.body.len(), 2);
    }

    #[test]
    fn reports_syntax_errors() {
        let cm = Lrc::<SourceMap>::default();
        let fm = cm.new_source_file(
            Lrc::new(FileName::Custom("bad.js".into())),
            "const = 1;".to_string(),
        );
        assert!(parse_program(&fm, None).is_err());
    }
}
