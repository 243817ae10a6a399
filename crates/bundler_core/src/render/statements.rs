use ahashmap::AHashMap;
use bundle_err::{BundleError, BundleResult, ErrorCode};
use swc_common::source_map::LineCol;
use swc_common::{sync::Lrc, BytePos, SourceMap, SyntaxContext, DUMMY_SP};
use swc_ecma_ast::{
    BindingIdent, Callee, ClassDecl, Decl, DefaultDecl, Expr, FnDecl, Id, Ident, IdentName,
    MemberProp, ModuleDecl, ModuleItem, ObjectPatProp, Pat, Prop, PropName, Stmt, VarDecl,
    VarDeclKind, VarDeclarator,
};
use swc_ecma_codegen::{text_writer::JsWriter, Config, Emitter, Node};
use swc_ecma_visit::{VisitMut, VisitMutWith};

use crate::module::Module;
use crate::parse::fold::BranchSimplifier;

/// One emitted top-level statement plus its generated-position mappings
/// back into the module's (post-transform) source.
pub struct RenderedPiece {
    pub text: String,
    pub mappings: Vec<(BytePos, LineCol)>,
}

/// Format-specific `import.meta` handling for one chunk.
pub struct ImportMetaConfig {
    /// Leave `import.meta` untouched (es).
    pub keep: bool,
    /// Replacement expression for bare `import.meta`.
    pub meta_expr: String,
    /// Replacement expression for `import.meta.url`.
    pub url_expr: String,
    /// Pre-resolved replacements for `import.meta.ROLLUP_FILE_URL_<ref>`
    /// style accesses, keyed by the full property name.
    pub file_url_exprs: AHashMap<String, String>,
}

/// Everything needed to rewrite one module's statements for its chunk.
pub struct ModuleRewrite<'a> {
    /// Binding -> emitted expression (identifier or member path).
    pub renames: &'a AHashMap<Id, String>,
    /// Dynamic import call (by span start) -> full replacement expression.
    pub dynamic_rewrites: &'a AHashMap<BytePos, String>,
    pub import_meta: &'a ImportMetaConfig,
}

fn raw_expr(text: &str) -> Expr {
    // the writer prints identifier syms verbatim, which lets synthesised
    // member paths and call expressions ride through codegen
    Expr::Ident(Ident {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        sym: text.into(),
        optional: false,
    })
}

fn plain_ident(name: &str) -> Ident {
    Ident {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        sym: name.into(),
        optional: false,
    }
}

struct StatementRewriter<'a> {
    rewrite: &'a ModuleRewrite<'a>,
}

impl StatementRewriter<'_> {
    fn rename_of(&self, id: &Id) -> Option<&String> {
        self.rewrite.renames.get(id)
    }
}

impl VisitMut for StatementRewriter<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if let Expr::Call(call) = expr {
            if matches!(call.callee, Callee::Import(_)) {
                if let Some(replacement) = self.rewrite.dynamic_rewrites.get(&call.span.lo) {
                    *expr = raw_expr(replacement);
                    return;
                }
            }
        }
        if let Expr::Member(member) = expr {
            if matches!(&*member.obj, Expr::MetaProp(_)) {
                if let MemberProp::Ident(prop) = &member.prop {
                    let prop_name = prop.sym.to_string();
                    if let Some(replacement) =
                        self.rewrite.import_meta.file_url_exprs.get(&prop_name)
                    {
                        *expr = raw_expr(replacement);
                        return;
                    }
                    if !self.rewrite.import_meta.keep {
                        let replacement = if prop_name == "url" {
                            self.rewrite.import_meta.url_expr.clone()
                        } else {
                            format!("{}.{}", self.rewrite.import_meta.meta_expr, prop_name)
                        };
                        *expr = raw_expr(&replacement);
                        return;
                    }
                }
            }
        }
        if let Expr::MetaProp(_) = expr {
            if !self.rewrite.import_meta.keep {
                *expr = raw_expr(&self.rewrite.import_meta.meta_expr);
                return;
            }
        }
        expr.visit_mut_children_with(self);
    }

    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if let Some(replacement) = self.rename_of(&ident.to_id()) {
            if replacement.as_str() != ident.sym.as_str() {
                ident.sym = replacement.as_str().into();
                ident.ctxt = SyntaxContext::empty();
            }
        }
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        // a renamed shorthand property must expand to key: value form
        if let Prop::Shorthand(ident) = prop {
            if let Some(replacement) = self.rename_of(&ident.to_id()).cloned() {
                if replacement.as_str() != ident.sym.as_str() {
                    *prop = Prop::KeyValue(swc_ecma_ast::KeyValueProp {
                        key: PropName::Ident(IdentName {
                            span: ident.span,
                            sym: ident.sym.clone(),
                        }),
                        value: Box::new(raw_expr(&replacement)),
                    });
                    return;
                }
            }
        }
        prop.visit_mut_children_with(self);
    }

    fn visit_mut_object_pat_prop(&mut self, prop: &mut ObjectPatProp) {
        // `{ x = 1 }` destructuring keeps its key when the binding renames
        if let ObjectPatProp::Assign(assign) = prop {
            if let Some(replacement) = self.rename_of(&assign.key.id.to_id()).cloned() {
                if replacement.as_str() != assign.key.id.sym.as_str() {
                    let new_binding = Pat::Ident(BindingIdent {
                        id: plain_ident(&replacement),
                        type_ann: None,
                    });
                    let value: Pat = match assign.value.take() {
                        Some(default_value) => Pat::Assign(swc_ecma_ast::AssignPat {
                            span: assign.span,
                            left: Box::new(new_binding),
                            right: default_value,
                        }),
                        None => new_binding,
                    };
                    *prop = ObjectPatProp::KeyValue(swc_ecma_ast::KeyValuePatProp {
                        key: PropName::Ident(IdentName {
                            span: assign.key.id.span,
                            sym: assign.key.id.sym.clone(),
                        }),
                        value: Box::new(value),
                    });
                    return;
                }
            }
        }
        prop.visit_mut_children_with(self);
    }
}

/// Strips the module wrapper off one top-level item, leaving the
/// statement that renders into the chunk body. `None` means the item
/// renders nothing (imports, re-exports, directives).
fn unwrap_item(
    item: &ModuleItem,
    default_export_name: Option<&str>,
) -> BundleResult<Option<Stmt>> {
    let stmt = match item {
        ModuleItem::Stmt(stmt) => Some(stmt.clone()),
        ModuleItem::ModuleDecl(decl) => match decl {
            ModuleDecl::Import(_) | ModuleDecl::ExportAll(_) => None,
            ModuleDecl::ExportNamed(_) => None,
            ModuleDecl::ExportDecl(export) => Some(Stmt::Decl(export.decl.clone())),
            ModuleDecl::ExportDefaultDecl(default_decl) => match &default_decl.decl {
                DefaultDecl::Fn(fn_expr) if fn_expr.ident.is_some() => {
                    Some(Stmt::Decl(Decl::Fn(FnDecl {
                        ident: fn_expr.ident.clone().unwrap(),
                        declare: false,
                        function: fn_expr.function.clone(),
                    })))
                }
                DefaultDecl::Class(class_expr) if class_expr.ident.is_some() => {
                    Some(Stmt::Decl(Decl::Class(ClassDecl {
                        ident: class_expr.ident.clone().unwrap(),
                        declare: false,
                        class: class_expr.class.clone(),
                    })))
                }
                DefaultDecl::Fn(fn_expr) => Some(default_var_stmt(
                    default_export_name,
                    Expr::Fn(fn_expr.clone()),
                )?),
                DefaultDecl::Class(class_expr) => Some(default_var_stmt(
                    default_export_name,
                    Expr::Class(class_expr.clone()),
                )?),
                DefaultDecl::TsInterfaceDecl(_) => None,
            },
            ModuleDecl::ExportDefaultExpr(default_expr) => Some(default_var_stmt(
                default_export_name,
                (*default_expr.expr).clone(),
            )?),
            _ => None,
        },
    };
    Ok(stmt)
}

fn default_var_stmt(name: Option<&str>, init: Expr) -> BundleResult<Stmt> {
    let name = name.ok_or_else(|| {
        BundleError::new(
            ErrorCode::ChunkInvalid,
            "Internal error: a default export was rendered without an assigned name.",
        )
    })?;
    Ok(Stmt::Decl(Decl::Var(Box::new(VarDecl {
        span: DUMMY_SP,
        ctxt: SyntaxContext::empty(),
        kind: VarDeclKind::Var,
        declare: false,
        decls: vec![VarDeclarator {
            span: DUMMY_SP,
            name: Pat::Ident(BindingIdent {
                id: plain_ident(name),
                type_ann: None,
            }),
            init: Some(Box::new(init)),
            definite: false,
        }],
    }))))
}

fn emit_stmt(cm: &Lrc<SourceMap>, stmt: &Stmt) -> BundleResult<RenderedPiece> {
    let mut buf: Vec<u8> = Vec::new();
    let mut mappings: Vec<(BytePos, LineCol)> = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, Some(&mut mappings));
        let mut emitter = Emitter {
            cfg: Config::default(),
            cm: cm.clone(),
            comments: None,
            wr: writer,
        };
        stmt.emit_with(&mut emitter).map_err(|io_error| {
            BundleError::new(
                ErrorCode::ChunkInvalid,
                format!("Failed to print a statement: {}", io_error),
            )
        })?;
    }
    let text = String::from_utf8(buf).map_err(|utf8_error| {
        BundleError::new(
            ErrorCode::ChunkInvalid,
            format!("Printer produced invalid utf-8: {}", utf8_error),
        )
    })?;
    Ok(RenderedPiece { text, mappings })
}

/// Renders the included statements of one module: unwrap the module
/// syntax, drop constant-folded branches, apply renames and rewrites,
/// print.
pub fn render_module_statements(
    cm: &Lrc<SourceMap>,
    module: &Module,
    rewrite: &ModuleRewrite<'_>,
    default_export_name: Option<&str>,
) -> BundleResult<Vec<RenderedPiece>> {
    let items: Vec<&ModuleItem> = match &module.program {
        swc_ecma_ast::Program::Module(m) => m.body.iter().collect(),
        swc_ecma_ast::Program::Script(_) => Vec::new(),
    };

    let mut pieces = Vec::new();
    for (stmt_index, item) in items.iter().enumerate() {
        let record = &module.statements[stmt_index];
        if !record.included || record.is_directive {
            continue;
        }
        let Some(mut stmt) = unwrap_item(item, default_export_name)? else {
            continue;
        };
        BranchSimplifier {
            env: &module.const_env,
        }
        .visit_mut_stmt(&mut stmt);
        if matches!(stmt, Stmt::Empty(_)) {
            continue;
        }
        let mut rewriter = StatementRewriter { rewrite };
        stmt.visit_mut_with(&mut rewriter);
        pieces.push(emit_stmt(cm, &stmt)?);
    }
    Ok(pieces)
}
