use ahashmap::{AHashMap, AHashSet};
use indexmap::IndexMap;
use swc_common::comments::Comments;
use swc_common::{Span, Spanned, SyntaxContext};
use swc_ecma_ast::{
    Callee, ClassMember, Decl, DefaultDecl, ExportSpecifier, Expr, Id, ImportSpecifier, Lit,
    MemberProp, MetaPropKind, ModuleDecl, ModuleExportName, ModuleItem, Pat, Program, Stmt,
};
use swc_ecma_visit::{Visit, VisitWith};

use crate::module::{
    DynamicImportRecord, ImportDescription, ImportMetaRef, ImportedName, LocalExport,
    LocalExportKind, ReexportDescription, StatementRecord, StmtIdx,
};
use crate::parse::fold::{eval_with_env, ConstEnv};

pub const FILE_URL_PREFIXES: [&str; 3] =
    ["ROLLUP_FILE_URL_", "ROLLUP_ASSET_URL_", "ROLLUP_CHUNK_URL_"];

/// Everything the scanner learns about one module's body.
#[derive(Default)]
pub struct ScanOutput {
    pub sources: Vec<String>,
    pub statements: Vec<StatementRecord>,
    pub import_descriptions: AHashMap<Id, ImportDescription>,
    pub local_exports: IndexMap<String, LocalExport>,
    pub reexports: IndexMap<String, ReexportDescription>,
    pub star_export_sources: Vec<usize>,
    pub dynamic_imports: Vec<DynamicImportRecord>,
    pub import_metas: Vec<ImportMetaRef>,
    pub declared_by: AHashMap<Id, Vec<StmtIdx>>,
    pub reassigned: AHashSet<Id>,
    pub uses_top_level_await: bool,
    /// Spans of non-`'use strict'` directive-prologue statements.
    pub foreign_directives: Vec<Span>,
    /// Top-level const bindings with literal values, used for branch
    /// folding here and again at render time.
    pub const_env: ConstEnv,
}

impl ScanOutput {
    fn push_source(&mut self, specifier: &str) -> usize {
        self.sources.push(specifier.to_string());
        self.sources.len() - 1
    }

    fn record_declares(&mut self, stmt_index: StmtIdx, declares: &[Id]) {
        for id in declares {
            self.declared_by
                .entry(id.clone())
                .or_default()
                .push(stmt_index);
        }
    }
}

/// Walks one top-level statement, computing its effect/reference record.
/// References inside constant-folded dead branches are skipped, matching
/// what the render-time simplifier will drop.
struct StatementAnalyzer<'a> {
    comments: Option<&'a dyn Comments>,
    top_level_ctxt: SyntaxContext,
    unresolved_ctxt: SyntaxContext,
    annotations: bool,
    env: &'a ConstEnv,
    fn_depth: usize,
    effects: bool,
    references: AHashSet<Id>,
    globals: AHashSet<String>,
    reassigned: Vec<Id>,
    top_level_await: bool,
    dynamic_imports: Vec<(Option<String>, Span)>,
    import_metas: Vec<Option<String>>,
}

impl<'a> StatementAnalyzer<'a> {
    fn new(
        comments: Option<&'a dyn Comments>,
        top_level_ctxt: SyntaxContext,
        unresolved_ctxt: SyntaxContext,
        annotations: bool,
        env: &'a ConstEnv,
    ) -> Self {
        Self {
            comments,
            top_level_ctxt,
            unresolved_ctxt,
            annotations,
            env,
            fn_depth: 0,
            effects: false,
            references: AHashSet::default(),
            globals: AHashSet::default(),
            reassigned: Vec::new(),
            top_level_await: false,
            dynamic_imports: Vec::new(),
            import_metas: Vec::new(),
        }
    }

    fn at_top_level(&self) -> bool {
        self.fn_depth == 0
    }

    fn mark_effect(&mut self) {
        if self.at_top_level() {
            self.effects = true;
        }
    }

    fn has_pure_annotation(&self, lo: swc_common::BytePos) -> bool {
        if !self.annotations {
            return false;
        }
        let Some(comments) = self.comments else {
            return false;
        };
        comments
            .get_leading(lo)
            .map(|list| {
                list.iter()
                    .any(|c| c.text.contains("#__PURE__") || c.text.contains("@__PURE__"))
            })
            .unwrap_or(false)
    }

    /// Member reads on a known binding are treated as getter-free; reads
    /// on anything else may trigger arbitrary getters and count as
    /// effects.
    fn member_read_is_pure(&self, obj: &Expr) -> bool {
        match obj {
            Expr::Ident(ident) => ident.ctxt != self.unresolved_ctxt,
            Expr::Member(member) => self.member_read_is_pure(&member.obj),
            Expr::MetaProp(_) => true,
            _ => false,
        }
    }
}

impl Visit for StatementAnalyzer<'_> {
    fn visit_ident(&mut self, ident: &swc_ecma_ast::Ident) {
        if ident.ctxt == self.top_level_ctxt {
            self.references.insert(ident.to_id());
        } else if ident.ctxt == self.unresolved_ctxt && ident.sym != *"undefined" {
            self.globals.insert(ident.sym.to_string());
        }
    }

    fn visit_function(&mut self, function: &swc_ecma_ast::Function) {
        self.fn_depth += 1;
        function.visit_children_with(self);
        self.fn_depth -= 1;
    }

    fn visit_arrow_expr(&mut self, arrow: &swc_ecma_ast::ArrowExpr) {
        self.fn_depth += 1;
        arrow.visit_children_with(self);
        self.fn_depth -= 1;
    }

    fn visit_getter_prop(&mut self, prop: &swc_ecma_ast::GetterProp) {
        self.fn_depth += 1;
        prop.visit_children_with(self);
        self.fn_depth -= 1;
    }

    fn visit_setter_prop(&mut self, prop: &swc_ecma_ast::SetterProp) {
        self.fn_depth += 1;
        prop.visit_children_with(self);
        self.fn_depth -= 1;
    }

    fn visit_class_member(&mut self, member: &ClassMember) {
        match member {
            // static blocks and static field initialisers run at class
            // definition time
            ClassMember::StaticBlock(block) => block.visit_children_with(self),
            ClassMember::ClassProp(prop) if prop.is_static => {
                member.visit_children_with(self);
            }
            ClassMember::ClassProp(_) | ClassMember::PrivateProp(_) => {
                self.fn_depth += 1;
                member.visit_children_with(self);
                self.fn_depth -= 1;
            }
            _ => member.visit_children_with(self),
        }
    }

    fn visit_call_expr(&mut self, call: &swc_ecma_ast::CallExpr) {
        if let Callee::Import(_) = call.callee {
            let specifier = call.args.first().and_then(|arg| match &*arg.expr {
                Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
                _ => None,
            });
            self.dynamic_imports.push((specifier, call.span));
            self.mark_effect();
            call.visit_children_with(self);
            return;
        }
        if !self.has_pure_annotation(call.span.lo) {
            self.mark_effect();
        }
        call.visit_children_with(self);
    }

    fn visit_new_expr(&mut self, new_expr: &swc_ecma_ast::NewExpr) {
        if !self.has_pure_annotation(new_expr.span.lo) {
            self.mark_effect();
        }
        new_expr.visit_children_with(self);
    }

    fn visit_tagged_tpl(&mut self, tpl: &swc_ecma_ast::TaggedTpl) {
        self.mark_effect();
        tpl.visit_children_with(self);
    }

    fn visit_assign_expr(&mut self, assign: &swc_ecma_ast::AssignExpr) {
        self.mark_effect();
        if let Some(simple) = assign.left.as_simple() {
            if let swc_ecma_ast::SimpleAssignTarget::Ident(binding) = simple {
                if binding.id.ctxt == self.top_level_ctxt {
                    self.reassigned.push(binding.id.to_id());
                }
            }
        }
        assign.visit_children_with(self);
    }

    fn visit_update_expr(&mut self, update: &swc_ecma_ast::UpdateExpr) {
        self.mark_effect();
        if let Expr::Ident(ident) = &*update.arg {
            if ident.ctxt == self.top_level_ctxt {
                self.reassigned.push(ident.to_id());
            }
        }
        update.visit_children_with(self);
    }

    fn visit_await_expr(&mut self, await_expr: &swc_ecma_ast::AwaitExpr) {
        if self.at_top_level() {
            self.effects = true;
            self.top_level_await = true;
        }
        await_expr.visit_children_with(self);
    }

    fn visit_throw_stmt(&mut self, throw: &swc_ecma_ast::ThrowStmt) {
        self.mark_effect();
        throw.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, member: &swc_ecma_ast::MemberExpr) {
        if let Expr::MetaProp(_) = &*member.obj {
            // import.meta.<prop>: file-url references resolve at render
            let file_ref = match &member.prop {
                MemberProp::Ident(name) => FILE_URL_PREFIXES
                    .iter()
                    .find_map(|prefix| name.sym.strip_prefix(prefix))
                    .map(str::to_string),
                _ => None,
            };
            self.import_metas.push(file_ref);
            return;
        }
        if !self.member_read_is_pure(&member.obj) {
            self.mark_effect();
        }
        member.visit_children_with(self);
    }

    fn visit_meta_prop_expr(&mut self, meta: &swc_ecma_ast::MetaPropExpr) {
        if meta.kind == MetaPropKind::ImportMeta {
            self.import_metas.push(None);
        }
    }

    // the iterator protocol makes every loop observable

    fn visit_for_stmt(&mut self, stmt: &swc_ecma_ast::ForStmt) {
        self.mark_effect();
        stmt.visit_children_with(self);
    }

    fn visit_for_in_stmt(&mut self, stmt: &swc_ecma_ast::ForInStmt) {
        self.mark_effect();
        stmt.visit_children_with(self);
    }

    fn visit_for_of_stmt(&mut self, stmt: &swc_ecma_ast::ForOfStmt) {
        self.mark_effect();
        if stmt.is_await && self.at_top_level() {
            self.top_level_await = true;
        }
        stmt.visit_children_with(self);
    }

    fn visit_while_stmt(&mut self, stmt: &swc_ecma_ast::WhileStmt) {
        self.mark_effect();
        stmt.visit_children_with(self);
    }

    fn visit_do_while_stmt(&mut self, stmt: &swc_ecma_ast::DoWhileStmt) {
        self.mark_effect();
        stmt.visit_children_with(self);
    }

    fn visit_debugger_stmt(&mut self, _stmt: &swc_ecma_ast::DebuggerStmt) {
        self.mark_effect();
    }

    // constant-folded branches: the discarded arm contributes neither
    // effects nor references

    fn visit_if_stmt(&mut self, stmt: &swc_ecma_ast::IfStmt) {
        match eval_with_env(&stmt.test, self.env) {
            Some(test) => {
                if test.truthy() {
                    stmt.cons.visit_with(self);
                } else if let Some(alt) = &stmt.alt {
                    alt.visit_with(self);
                }
            }
            None => stmt.visit_children_with(self),
        }
    }

    fn visit_cond_expr(&mut self, cond: &swc_ecma_ast::CondExpr) {
        match eval_with_env(&cond.test, self.env) {
            Some(test) => {
                if test.truthy() {
                    cond.cons.visit_with(self);
                } else {
                    cond.alt.visit_with(self);
                }
            }
            None => cond.visit_children_with(self),
        }
    }

    fn visit_bin_expr(&mut self, bin: &swc_ecma_ast::BinExpr) {
        use swc_ecma_ast::BinaryOp::*;
        let taken_right = match bin.op {
            LogicalAnd => eval_with_env(&bin.left, self.env).map(|l| l.truthy()),
            LogicalOr => eval_with_env(&bin.left, self.env).map(|l| !l.truthy()),
            NullishCoalescing => eval_with_env(&bin.left, self.env).map(|l| l.nullish()),
            _ => None,
        };
        match taken_right {
            Some(true) => bin.right.visit_with(self),
            Some(false) => {}
            None => bin.visit_children_with(self),
        }
    }
}

fn collect_pat_ids(pat: &Pat, top_level_ctxt: SyntaxContext, out: &mut Vec<Id>) {
    match pat {
        Pat::Ident(binding) => {
            if binding.id.ctxt == top_level_ctxt {
                out.push(binding.id.to_id());
            }
        }
        Pat::Array(array) => {
            for element in array.elems.iter().flatten() {
                collect_pat_ids(element, top_level_ctxt, out);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    swc_ecma_ast::ObjectPatProp::KeyValue(kv) => {
                        collect_pat_ids(&kv.value, top_level_ctxt, out)
                    }
                    swc_ecma_ast::ObjectPatProp::Assign(assign) => {
                        if assign.key.id.ctxt == top_level_ctxt {
                            out.push(assign.key.id.to_id());
                        }
                    }
                    swc_ecma_ast::ObjectPatProp::Rest(rest) => {
                        collect_pat_ids(&rest.arg, top_level_ctxt, out)
                    }
                }
            }
        }
        Pat::Rest(rest) => collect_pat_ids(&rest.arg, top_level_ctxt, out),
        Pat::Assign(assign) => collect_pat_ids(&assign.left, top_level_ctxt, out),
        Pat::Expr(_) | Pat::Invalid(_) => {}
    }
}

fn collect_decl_ids(decl: &Decl, top_level_ctxt: SyntaxContext) -> Vec<Id> {
    let mut out = Vec::new();
    match decl {
        Decl::Var(var) => {
            for declarator in &var.decls {
                collect_pat_ids(&declarator.name, top_level_ctxt, &mut out);
            }
        }
        Decl::Fn(f) => out.push(f.ident.to_id()),
        Decl::Class(c) => out.push(c.ident.to_id()),
        _ => {}
    }
    out
}

fn export_name_string(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

fn imported_name_for(name: &str) -> ImportedName {
    if name == "default" {
        ImportedName::Default
    } else {
        ImportedName::Name(name.to_string())
    }
}

/// Scans a parsed, resolver-annotated program into its per-statement
/// semantic records and import/export tables.
pub fn scan_program(
    program: &Program,
    comments: Option<&dyn Comments>,
    top_level_ctxt: SyntaxContext,
    unresolved_ctxt: SyntaxContext,
    annotations: bool,
) -> ScanOutput {
    let mut out = ScanOutput::default();

    enum ItemRef<'a> {
        Module(&'a ModuleItem),
        Script(&'a Stmt),
    }

    let items: Vec<ItemRef> = match program {
        Program::Module(module) => module.body.iter().map(ItemRef::Module).collect(),
        Program::Script(script) => script.body.iter().map(ItemRef::Script).collect(),
    };

    // prepass: literal-valued top-level consts fold branches below
    let mut env = ConstEnv::default();
    for item in &items {
        let decl = match item {
            ItemRef::Module(ModuleItem::Stmt(Stmt::Decl(Decl::Var(var)))) => Some(var),
            ItemRef::Module(ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export))) => {
                match &export.decl {
                    Decl::Var(var) => Some(var),
                    _ => None,
                }
            }
            ItemRef::Script(Stmt::Decl(Decl::Var(var))) => Some(var),
            _ => None,
        };
        let Some(var) = decl else { continue };
        if var.kind != swc_ecma_ast::VarDeclKind::Const {
            continue;
        }
        for declarator in &var.decls {
            if let (Pat::Ident(binding), Some(init)) = (&declarator.name, &declarator.init) {
                if binding.id.ctxt == top_level_ctxt {
                    if let Some(value) = eval_with_env(init, &env) {
                        env.insert(binding.id.to_id(), value);
                    }
                }
            }
        }
    }

    let mut in_directive_prologue = true;

    for (stmt_index, item) in items.iter().enumerate() {
        let mut record = StatementRecord::default();
        let mut analyzer =
            StatementAnalyzer::new(comments, top_level_ctxt, unresolved_ctxt, annotations, &env);

        let stmt: Option<&Stmt> = match item {
            ItemRef::Module(ModuleItem::Stmt(stmt)) => Some(stmt),
            ItemRef::Script(stmt) => Some(stmt),
            ItemRef::Module(ModuleItem::ModuleDecl(decl)) => {
                in_directive_prologue = false;
                record.span = decl.span();
                match decl {
                    ModuleDecl::Import(import) => {
                        let source_index = out.push_source(import.src.value.as_str());
                        record.import_source = Some(source_index);
                        for specifier in &import.specifiers {
                            let (local, imported) = match specifier {
                                ImportSpecifier::Default(s) => {
                                    (s.local.to_id(), ImportedName::Default)
                                }
                                ImportSpecifier::Namespace(s) => {
                                    (s.local.to_id(), ImportedName::Namespace)
                                }
                                ImportSpecifier::Named(s) => {
                                    let imported = match &s.imported {
                                        Some(name) => imported_name_for(&export_name_string(name)),
                                        None => imported_name_for(s.local.sym.as_str()),
                                    };
                                    (s.local.to_id(), imported)
                                }
                            };
                            record.declares.push(local.clone());
                            out.import_descriptions.insert(
                                local,
                                ImportDescription {
                                    source_index,
                                    imported,
                                    span: import.span,
                                },
                            );
                        }
                    }
                    ModuleDecl::ExportDecl(export) => {
                        let declared = collect_decl_ids(&export.decl, top_level_ctxt);
                        for id in &declared {
                            out.local_exports.insert(
                                id.0.to_string(),
                                LocalExport {
                                    kind: LocalExportKind::Local(id.clone()),
                                    stmt_index,
                                },
                            );
                        }
                        record.declares = declared;
                        export.decl.visit_with(&mut analyzer);
                    }
                    ModuleDecl::ExportNamed(named) => match &named.src {
                        Some(src) => {
                            let source_index = out.push_source(src.value.as_str());
                            record.is_reexport_decl = true;
                            for specifier in &named.specifiers {
                                match specifier {
                                    ExportSpecifier::Named(spec) => {
                                        let orig = export_name_string(&spec.orig);
                                        let exported = spec
                                            .exported
                                            .as_ref()
                                            .map(export_name_string)
                                            .unwrap_or_else(|| orig.clone());
                                        out.reexports.insert(
                                            exported,
                                            ReexportDescription {
                                                source_index,
                                                imported: imported_name_for(&orig),
                                                span: named.span,
                                            },
                                        );
                                    }
                                    ExportSpecifier::Namespace(spec) => {
                                        out.reexports.insert(
                                            export_name_string(&spec.name),
                                            ReexportDescription {
                                                source_index,
                                                imported: ImportedName::Namespace,
                                                span: named.span,
                                            },
                                        );
                                    }
                                    ExportSpecifier::Default(spec) => {
                                        out.reexports.insert(
                                            spec.exported.sym.to_string(),
                                            ReexportDescription {
                                                source_index,
                                                imported: ImportedName::Default,
                                                span: named.span,
                                            },
                                        );
                                    }
                                }
                            }
                        }
                        None => {
                            record.is_export_shorthand = true;
                            for specifier in &named.specifiers {
                                if let ExportSpecifier::Named(spec) = specifier {
                                    if let ModuleExportName::Ident(orig) = &spec.orig {
                                        let exported = spec
                                            .exported
                                            .as_ref()
                                            .map(export_name_string)
                                            .unwrap_or_else(|| orig.sym.to_string());
                                        out.local_exports.insert(
                                            exported,
                                            LocalExport {
                                                kind: LocalExportKind::Local(orig.to_id()),
                                                stmt_index,
                                            },
                                        );
                                    }
                                }
                            }
                        }
                    },
                    ModuleDecl::ExportDefaultDecl(default_decl) => {
                        let local = match &default_decl.decl {
                            DefaultDecl::Fn(f) => f.ident.as_ref().map(|i| i.to_id()),
                            DefaultDecl::Class(c) => c.ident.as_ref().map(|i| i.to_id()),
                            DefaultDecl::TsInterfaceDecl(_) => None,
                        };
                        if let Some(local) = &local {
                            record.declares.push(local.clone());
                        }
                        out.local_exports.insert(
                            "default".to_string(),
                            LocalExport {
                                kind: LocalExportKind::Default { local },
                                stmt_index,
                            },
                        );
                        default_decl.decl.visit_with(&mut analyzer);
                    }
                    ModuleDecl::ExportDefaultExpr(default_expr) => {
                        out.local_exports.insert(
                            "default".to_string(),
                            LocalExport {
                                kind: LocalExportKind::Default { local: None },
                                stmt_index,
                            },
                        );
                        default_expr.expr.visit_with(&mut analyzer);
                    }
                    ModuleDecl::ExportAll(export_all) => {
                        let source_index = out.push_source(export_all.src.value.as_str());
                        record.is_reexport_decl = true;
                        out.star_export_sources.push(source_index);
                    }
                    _ => {}
                }
                None
            }
        };

        if let Some(stmt) = stmt {
            record.span = stmt.span();
            if in_directive_prologue {
                if let Stmt::Expr(expr_stmt) = stmt {
                    if let Expr::Lit(Lit::Str(directive)) = &*expr_stmt.expr {
                        record.is_directive = true;
                        if directive.value != *"use strict" {
                            out.foreign_directives.push(expr_stmt.span);
                        }
                    }
                }
            }
            if !record.is_directive {
                in_directive_prologue = false;
                if let Stmt::Decl(decl) = stmt {
                    record.declares = collect_decl_ids(decl, top_level_ctxt);
                }
                stmt.visit_with(&mut analyzer);
            }
        }

        record.has_effects |= analyzer.effects;
        record.references = analyzer.references;
        record.accessed_globals = analyzer.globals;
        record.uses_top_level_await = analyzer.top_level_await;
        record.has_dynamic_import = !analyzer.dynamic_imports.is_empty();
        out.uses_top_level_await |= analyzer.top_level_await;
        for id in analyzer.reassigned {
            out.reassigned.insert(id);
        }
        for (specifier, span) in analyzer.dynamic_imports {
            out.dynamic_imports.push(DynamicImportRecord {
                specifier,
                stmt_index,
                span,
                resolution: None,
            });
        }
        for file_reference in analyzer.import_metas {
            out.import_metas.push(ImportMetaRef {
                stmt_index,
                file_reference,
            });
        }

        out.record_declares(stmt_index, &record.declares);
        out.statements.push(record);
    }

    out.const_env = env;
    out
}
