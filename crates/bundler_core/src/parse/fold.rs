use ahashmap::AHashMap;
use swc_ecma_ast::{BinaryOp, Expr, Id, Lit, Stmt, UnaryOp};
use swc_ecma_visit::{VisitMut, VisitMutWith};

/// Top-level `const` bindings with statically-known literal values.
pub type ConstEnv = AHashMap<Id, Known>;

/// A statically-known primitive value, as far as branch analysis cares.
#[derive(Debug, Clone, PartialEq)]
pub enum Known {
    Bool(bool),
    Num(f64),
    Str(String),
    Null,
    Undefined,
}

impl Known {
    pub fn truthy(&self) -> bool {
        match self {
            Known::Bool(b) => *b,
            Known::Num(n) => *n != 0.0 && !n.is_nan(),
            Known::Str(s) => !s.is_empty(),
            Known::Null | Known::Undefined => false,
        }
    }

    pub fn nullish(&self) -> bool {
        matches!(self, Known::Null | Known::Undefined)
    }

    fn as_num(&self) -> Option<f64> {
        match self {
            Known::Num(n) => Some(*n),
            Known::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Evaluates literal expressions without binding knowledge.
pub fn eval_expr(expr: &Expr) -> Option<Known> {
    eval_with_env(expr, &ConstEnv::default())
}

/// Evaluates an expression over literals plus known module-level const
/// bindings. Anything else returns `None` and stays un-folded.
pub fn eval_with_env(expr: &Expr, env: &ConstEnv) -> Option<Known> {
    match expr {
        Expr::Lit(lit) => match lit {
            Lit::Bool(b) => Some(Known::Bool(b.value)),
            Lit::Num(n) => Some(Known::Num(n.value)),
            Lit::Str(s) => Some(Known::Str(s.value.to_string())),
            Lit::Null(_) => Some(Known::Null),
            _ => None,
        },
        Expr::Paren(paren) => eval_with_env(&paren.expr, env),
        Expr::Ident(ident) if ident.sym == *"undefined" => Some(Known::Undefined),
        Expr::Ident(ident) => env.get(&ident.to_id()).cloned(),
        Expr::Unary(unary) => {
            let arg = eval_with_env(&unary.arg, env)?;
            match unary.op {
                UnaryOp::Bang => Some(Known::Bool(!arg.truthy())),
                UnaryOp::Minus => arg.as_num().map(|n| Known::Num(-n)),
                UnaryOp::Plus => arg.as_num().map(Known::Num),
                UnaryOp::Void => Some(Known::Undefined),
                UnaryOp::TypeOf => Some(Known::Str(
                    match arg {
                        Known::Bool(_) => "boolean",
                        Known::Num(_) => "number",
                        Known::Str(_) => "string",
                        Known::Undefined => "undefined",
                        Known::Null => "object",
                    }
                    .to_string(),
                )),
                _ => None,
            }
        }
        Expr::Bin(bin) => {
            let left = eval_with_env(&bin.left, env);
            match bin.op {
                // short-circuit forms can fold on the left side alone
                BinaryOp::LogicalAnd => match left? {
                    l if !l.truthy() => Some(l),
                    _ => eval_with_env(&bin.right, env),
                },
                BinaryOp::LogicalOr => match left? {
                    l if l.truthy() => Some(l),
                    _ => eval_with_env(&bin.right, env),
                },
                BinaryOp::NullishCoalescing => match left? {
                    l if !l.nullish() => Some(l),
                    _ => eval_with_env(&bin.right, env),
                },
                op => {
                    let left = left?;
                    let right = eval_with_env(&bin.right, env)?;
                    eval_binary(op, &left, &right)
                }
            }
        }
        Expr::Cond(cond) => {
            let test = eval_with_env(&cond.test, env)?;
            if test.truthy() {
                eval_with_env(&cond.cons, env)
            } else {
                eval_with_env(&cond.alt, env)
            }
        }
        _ => None,
    }
}

fn eval_binary(op: BinaryOp, left: &Known, right: &Known) -> Option<Known> {
    use BinaryOp::*;
    match op {
        EqEqEq => Some(Known::Bool(strict_eq(left, right))),
        NotEqEq => Some(Known::Bool(!strict_eq(left, right))),
        EqEq => loose_eq(left, right).map(Known::Bool),
        NotEq => loose_eq(left, right).map(|v| Known::Bool(!v)),
        Lt | Gt | LtEq | GtEq => {
            let (l, r) = (left.as_num()?, right.as_num()?);
            Some(Known::Bool(match op {
                Lt => l < r,
                Gt => l > r,
                LtEq => l <= r,
                _ => l >= r,
            }))
        }
        Add => match (left, right) {
            (Known::Str(l), Known::Str(r)) => Some(Known::Str(format!("{}{}", l, r))),
            _ => Some(Known::Num(left.as_num()? + right.as_num()?)),
        },
        Sub => Some(Known::Num(left.as_num()? - right.as_num()?)),
        Mul => Some(Known::Num(left.as_num()? * right.as_num()?)),
        Div => Some(Known::Num(left.as_num()? / right.as_num()?)),
        Mod => Some(Known::Num(left.as_num()? % right.as_num()?)),
        _ => None,
    }
}

fn strict_eq(left: &Known, right: &Known) -> bool {
    match (left, right) {
        (Known::Bool(l), Known::Bool(r)) => l == r,
        (Known::Num(l), Known::Num(r)) => l == r,
        (Known::Str(l), Known::Str(r)) => l == r,
        (Known::Null, Known::Null) | (Known::Undefined, Known::Undefined) => true,
        _ => false,
    }
}

fn loose_eq(left: &Known, right: &Known) -> Option<bool> {
    match (left, right) {
        (Known::Null | Known::Undefined, Known::Null | Known::Undefined) => Some(true),
        (Known::Null | Known::Undefined, _) | (_, Known::Null | Known::Undefined) => Some(false),
        (Known::Str(l), Known::Str(r)) => Some(l == r),
        _ => Some(left.as_num()? == right.as_num()?),
    }
}

/// Removes branches whose test folded to a constant, so discarded arms
/// never reach the emitted output. Applied to statements cloned for
/// rendering; the scanner applies the same folding rules when collecting
/// references, keeping analysis and output in agreement.
pub struct BranchSimplifier<'a> {
    pub env: &'a ConstEnv,
}

impl VisitMut for BranchSimplifier<'_> {
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        if let Stmt::If(if_stmt) = stmt {
            if let Some(test) = eval_with_env(&if_stmt.test, self.env) {
                *stmt = if test.truthy() {
                    (*if_stmt.cons).clone()
                } else {
                    match &if_stmt.alt {
                        Some(alt) => (**alt).clone(),
                        None => Stmt::Empty(swc_ecma_ast::EmptyStmt {
                            span: swc_common::DUMMY_SP,
                        }),
                    }
                };
            }
        }
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        let replacement = match expr {
            Expr::Cond(cond) => eval_with_env(&cond.test, self.env).map(|test| {
                if test.truthy() {
                    (*cond.cons).clone()
                } else {
                    (*cond.alt).clone()
                }
            }),
            Expr::Bin(bin) => match bin.op {
                BinaryOp::LogicalAnd => eval_with_env(&bin.left, self.env).map(|left| {
                    if left.truthy() {
                        (*bin.right).clone()
                    } else {
                        (*bin.left).clone()
                    }
                }),
                BinaryOp::LogicalOr => eval_with_env(&bin.left, self.env).map(|left| {
                    if left.truthy() {
                        (*bin.left).clone()
                    } else {
                        (*bin.right).clone()
                    }
                }),
                BinaryOp::NullishCoalescing => eval_with_env(&bin.left, self.env).map(|left| {
                    if left.nullish() {
                        (*bin.right).clone()
                    } else {
                        (*bin.left).clone()
                    }
                }),
                _ => None,
            },
            _ => None,
        };
        if let Some(replacement) = replacement {
            *expr = replacement;
        }
    }
}

#[cfg(test)]
mod tests {
    use ecma_parse::parse_ecma_src;
    use pretty_assertions::assert_eq;
    use swc_ecma_ast::{ModuleItem, Program};

    use super::*;

    fn first_stmt(program: &Program) -> Stmt {
        match &program.as_module().unwrap().body[0] {
            ModuleItem::Stmt(stmt) => stmt.clone(),
            _ => panic!("expected a statement"),
        }
    }

    fn eval_src(src: &str) -> Option<Known> {
        let (_cm, program) = parse_ecma_src("t.js", src);
        match first_stmt(&program) {
            Stmt::Expr(expr_stmt) => eval_expr(&expr_stmt.expr),
            _ => None,
        }
    }

    #[test]
    fn folds_literals_and_operators() {
        assert_eq!(eval_src("false"), Some(Known::Bool(false)));
        assert_eq!(eval_src("!0"), Some(Known::Bool(true)));
        assert_eq!(eval_src("1 + 2"), Some(Known::Num(3.0)));
        assert_eq!(eval_src("'a' + 'b'"), Some(Known::Str("ab".into())));
        assert_eq!(eval_src("1 === 2"), Some(Known::Bool(false)));
        assert_eq!(eval_src("null ?? 'x'"), Some(Known::Str("x".into())));
        assert_eq!(eval_src("typeof 1"), Some(Known::Str("number".into())));
    }

    #[test]
    fn unknown_bindings_stay_unfolded() {
        assert_eq!(eval_src("someVar"), None);
        assert_eq!(eval_src("1 + someVar"), None);
        // short-circuit still folds when the left side decides
        assert_eq!(eval_src("false && someVar"), Some(Known::Bool(false)));
        assert_eq!(eval_src("true || someVar"), Some(Known::Bool(true)));
    }

    #[test]
    fn simplifier_drops_dead_branches() {
        let (_cm, program) = parse_ecma_src("t.js", "if (false) sideEffect(); else keep();");
        let mut stmt = first_stmt(&program);
        BranchSimplifier { env: &ConstEnv::default() }.visit_mut_stmt(&mut stmt);
        match &stmt {
            Stmt::Expr(e) => assert!(matches!(&*e.expr, Expr::Call(_))),
            other => panic!("expected the else call to survive, got {:?}", other),
        }
    }

    #[test]
    fn simplifier_removes_untaken_if_without_else() {
        let (_cm, program) = parse_ecma_src("t.js", "if (false) sideEffect();");
        let mut stmt = first_stmt(&program);
        BranchSimplifier { env: &ConstEnv::default() }.visit_mut_stmt(&mut stmt);
        assert!(matches!(stmt, Stmt::Empty(_)));
    }
}
