//! The L0 language: embedded grammar and AST-building actions.
//!
//! The grammar lives in `grammars/l0.ll1` and is compiled into parser
//! tables once per process. Rule actions are evaluated by [`AstBuilder`],
//! which assigns expression and declaration ids as it constructs nodes.
//!
//! Binary operators parse through nullable `*_tail` rules. Instead of the
//! classic closure-returning parse functions, a tail is an algebraic
//! [`TailOp`] chain that `apply` folds onto the left-hand side, which
//! keeps `a - b - c` left-associative.

use crate::ast::{
    BinopKind, CodeBlock, DeclId, Expr, ExprId, ExprKind, FuncDecl, Stmt, TranslationUnitDecl,
    TypeExpr, UnopKind, VarDecl,
};
use crate::error::CompileError;
use crate::parser::{ActionBuilder, ParseTree, TableParser};
use crate::scanner::Token;
use std::sync::LazyLock;

static L0_GRAMMAR_TEXT: &str = include_str!("../grammars/l0.ll1");

static L0_PARSER: LazyLock<TableParser> = LazyLock::new(|| {
    let grammar = crate::grammar::Grammar::from_file_text(L0_GRAMMAR_TEXT)
        .expect("embedded L0 grammar is well-formed");
    TableParser::new(grammar).expect("embedded L0 grammar is LL(1)")
});

/// The process-wide L0 parser tables.
pub fn l0_parser() -> &'static TableParser {
    &L0_PARSER
}

/// Parse an L0 source text into an AST.
pub fn parse(source: &str) -> Result<TranslationUnitDecl, CompileError> {
    let mut builder = AstBuilder::default();
    match l0_parser().parse_with(source, &mut builder)? {
        SemValue::Unit(unit) => Ok(unit),
        other => Err(CompileError::Grammar(format!(
            "L0 start rule produced {} instead of a translation unit",
            other.kind()
        ))),
    }
}

/// Parse an L0 source text into the raw derivation tree.
pub fn parse_tree(source: &str) -> Result<ParseTree, CompileError> {
    l0_parser().parse_tree(source)
}

/// One pending binary-operator application, to be folded onto a
/// left-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum TailOp {
    /// `op rhs` in source order (covers `+ - * / <= :=`).
    Binop(BinopKind, Expr),
    /// `>= rhs`: desugars to `LessEqual(rhs, lhs)`.
    CmpGe(Expr),
    /// `== rhs`: desugars to the product of both `LessEqual`s.
    CmpEq(Expr),
    /// `(args)`: a call of the left-hand side.
    Call(Vec<Expr>),
}

/// Semantic value passed between rule actions.
#[derive(Debug, Clone, PartialEq)]
pub enum SemValue {
    Token(Token),
    Name(String),
    Type(TypeExpr),
    Expr(Expr),
    Stmt(Stmt),
    Param(VarDecl),
    Func(FuncDecl),
    Block(CodeBlock),
    ElseBlock(Option<CodeBlock>),
    Tail(Vec<TailOp>),
    List(Vec<SemValue>),
    Unit(TranslationUnitDecl),
}

impl SemValue {
    fn kind(&self) -> &'static str {
        match self {
            SemValue::Token(_) => "token",
            SemValue::Name(_) => "name",
            SemValue::Type(_) => "type",
            SemValue::Expr(_) => "expression",
            SemValue::Stmt(_) => "statement",
            SemValue::Param(_) => "parameter",
            SemValue::Func(_) => "function",
            SemValue::Block(_) => "block",
            SemValue::ElseBlock(_) => "else-block",
            SemValue::Tail(_) => "operator tail",
            SemValue::List(_) => "list",
            SemValue::Unit(_) => "translation unit",
        }
    }
}

/// Builds the L0 AST from rule actions, handing out node ids on the way.
#[derive(Debug, Default)]
pub struct AstBuilder {
    next_expr: ExprId,
    next_decl: DeclId,
}

impl AstBuilder {
    fn expr(&mut self, kind: ExprKind) -> Expr {
        let id = self.next_expr;
        self.next_expr += 1;
        Expr { id, kind }
    }

    fn decl_id(&mut self) -> DeclId {
        let id = self.next_decl;
        self.next_decl += 1;
        id
    }

    fn apply(&mut self, mut lhs: Expr, tail: Vec<TailOp>) -> Expr {
        for op in tail {
            lhs = match op {
                TailOp::Binop(op, rhs) => self.expr(ExprKind::Binop {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }),
                TailOp::CmpGe(rhs) => self.expr(ExprKind::Binop {
                    op: BinopKind::LessEqual,
                    lhs: Box::new(rhs),
                    rhs: Box::new(lhs),
                }),
                TailOp::CmpEq(rhs) => {
                    let le = self.expr(ExprKind::Binop {
                        op: BinopKind::LessEqual,
                        lhs: Box::new(lhs.clone()),
                        rhs: Box::new(rhs.clone()),
                    });
                    let ge = self.expr(ExprKind::Binop {
                        op: BinopKind::LessEqual,
                        lhs: Box::new(rhs),
                        rhs: Box::new(lhs),
                    });
                    self.expr(ExprKind::Binop {
                        op: BinopKind::Mul,
                        lhs: Box::new(le),
                        rhs: Box::new(ge),
                    })
                }
                TailOp::Call(arguments) => self.expr(ExprKind::Call {
                    callee: Box::new(lhs),
                    arguments,
                }),
            };
        }
        lhs
    }

    fn unop(&mut self, op: UnopKind, expr: Expr) -> SemValue {
        SemValue::Expr(self.expr(ExprKind::Unop {
            op,
            expr: Box::new(expr),
        }))
    }
}

fn expect_expr(value: SemValue) -> Result<Expr, String> {
    match value {
        SemValue::Expr(e) => Ok(e),
        other => Err(format!("expected an expression, got {}", other.kind())),
    }
}

fn expect_type(value: SemValue) -> Result<TypeExpr, String> {
    match value {
        SemValue::Type(t) => Ok(t),
        other => Err(format!("expected a type, got {}", other.kind())),
    }
}

fn expect_token(value: SemValue) -> Result<Token, String> {
    match value {
        SemValue::Token(t) => Ok(t),
        other => Err(format!("expected a token, got {}", other.kind())),
    }
}

fn expect_block(value: SemValue) -> Result<CodeBlock, String> {
    match value {
        SemValue::Block(b) => Ok(b),
        other => Err(format!("expected a block, got {}", other.kind())),
    }
}

fn expect_tail(value: SemValue) -> Result<Vec<TailOp>, String> {
    match value {
        SemValue::Tail(t) => Ok(t),
        other => Err(format!("expected an operator tail, got {}", other.kind())),
    }
}

fn expect_list(value: SemValue) -> Result<Vec<SemValue>, String> {
    match value {
        SemValue::List(items) => Ok(items),
        other => Err(format!("expected a list, got {}", other.kind())),
    }
}

fn expect_identifier(value: SemValue) -> Result<String, String> {
    match value {
        SemValue::Expr(Expr {
            kind: ExprKind::Identifier(name),
            ..
        }) => Ok(name),
        other => Err(format!("expected an identifier, got {}", other.kind())),
    }
}

fn arity<const N: usize>(
    name: &str,
    args: Vec<SemValue>,
) -> Result<[SemValue; N], String> {
    let got = args.len();
    args.try_into()
        .map_err(|_| format!("constructor {} expects {} arguments, got {}", name, N, got))
}

impl ActionBuilder for AstBuilder {
    type Value = SemValue;

    fn token(&mut self, token: Token) -> SemValue {
        SemValue::Token(token)
    }

    fn rule_name(&mut self, name: &str) -> SemValue {
        SemValue::Name(name.to_string())
    }

    fn construct(&mut self, name: &str, args: Vec<SemValue>) -> Result<SemValue, String> {
        match name {
            "unit" => {
                let [decls] = arity::<1>(name, args)?;
                let mut funcs = Vec::new();
                for item in expect_list(decls)? {
                    match item {
                        SemValue::Func(f) => funcs.push(f),
                        other => {
                            return Err(format!(
                                "translation unit contains {}, expected a function",
                                other.kind()
                            ));
                        }
                    }
                }
                Ok(SemValue::Unit(TranslationUnitDecl { decls: funcs }))
            }
            "cons" => {
                let [head, tail] = arity::<2>(name, args)?;
                let mut items = expect_list(tail)?;
                items.insert(0, head);
                Ok(SemValue::List(items))
            }
            "nil" => {
                arity::<0>(name, args)?;
                Ok(SemValue::List(Vec::new()))
            }
            "int_type" => {
                arity::<0>(name, args)?;
                Ok(SemValue::Type(TypeExpr::Int))
            }
            "pointer_type" => {
                let [pointee] = arity::<1>(name, args)?;
                Ok(SemValue::Type(TypeExpr::Pointer(Box::new(expect_type(
                    pointee,
                )?))))
            }
            "ident" => {
                let [token] = arity::<1>(name, args)?;
                let token = expect_token(token)?;
                Ok(SemValue::Expr(
                    self.expr(ExprKind::Identifier(token.lexeme)),
                ))
            }
            "literal" => {
                let [token] = arity::<1>(name, args)?;
                let token = expect_token(token)?;
                let value: i64 = token
                    .lexeme
                    .parse()
                    .map_err(|_| format!("integer literal out of range: {}", token.lexeme))?;
                Ok(SemValue::Expr(self.expr(ExprKind::Literal(value))))
            }
            "func" => {
                let [ident, params, return_type, body] = arity::<4>(name, args)?;
                let func_name = expect_identifier(ident)?;
                let mut param_decls = Vec::new();
                for item in expect_list(params)? {
                    match item {
                        SemValue::Param(p) => param_decls.push(p),
                        other => {
                            return Err(format!(
                                "parameter list contains {}, expected a parameter",
                                other.kind()
                            ));
                        }
                    }
                }
                Ok(SemValue::Func(FuncDecl {
                    id: self.decl_id(),
                    name: func_name,
                    return_type: expect_type(return_type)?,
                    params: param_decls,
                    statements: expect_block(body)?.statements,
                }))
            }
            "param" => {
                let [ident, ty] = arity::<2>(name, args)?;
                Ok(SemValue::Param(VarDecl {
                    id: self.decl_id(),
                    name: expect_identifier(ident)?,
                    ty: expect_type(ty)?,
                }))
            }
            "var_decl" => {
                let [ident, ty] = arity::<2>(name, args)?;
                Ok(SemValue::Stmt(Stmt::VarDecl(VarDecl {
                    id: self.decl_id(),
                    name: expect_identifier(ident)?,
                    ty: expect_type(ty)?,
                })))
            }
            "block" => {
                let [stmts] = arity::<1>(name, args)?;
                let mut statements = Vec::new();
                for item in expect_list(stmts)? {
                    match item {
                        SemValue::Stmt(s) => statements.push(s),
                        other => {
                            return Err(format!(
                                "block contains {}, expected a statement",
                                other.kind()
                            ));
                        }
                    }
                }
                Ok(SemValue::Block(CodeBlock { statements }))
            }
            "expr_stmt" => {
                let [expr] = arity::<1>(name, args)?;
                Ok(SemValue::Stmt(Stmt::Expr(expect_expr(expr)?)))
            }
            "return_stmt" => {
                let [expr] = arity::<1>(name, args)?;
                Ok(SemValue::Stmt(Stmt::Return(expect_expr(expr)?)))
            }
            "if_stmt" => {
                let [cond, then_block, else_block] = arity::<3>(name, args)?;
                let else_block = match else_block {
                    SemValue::ElseBlock(b) => b,
                    other => {
                        return Err(format!(
                            "expected an else-block, got {}",
                            other.kind()
                        ));
                    }
                };
                Ok(SemValue::Stmt(Stmt::If {
                    cond: expect_expr(cond)?,
                    then_block: expect_block(then_block)?,
                    else_block,
                }))
            }
            "while_stmt" => {
                let [cond, body] = arity::<2>(name, args)?;
                Ok(SemValue::Stmt(Stmt::While {
                    cond: expect_expr(cond)?,
                    body: expect_block(body)?,
                }))
            }
            "for_stmt" => {
                let [init, cond, next, body] = arity::<4>(name, args)?;
                Ok(SemValue::Stmt(Stmt::For {
                    init: expect_expr(init)?,
                    cond: expect_expr(cond)?,
                    next: expect_expr(next)?,
                    body: expect_block(body)?,
                }))
            }
            "break_stmt" => {
                arity::<0>(name, args)?;
                Ok(SemValue::Stmt(Stmt::Break))
            }
            "continue_stmt" => {
                arity::<0>(name, args)?;
                Ok(SemValue::Stmt(Stmt::Continue))
            }
            "some_block" => {
                let [block] = arity::<1>(name, args)?;
                Ok(SemValue::ElseBlock(Some(expect_block(block)?)))
            }
            "no_block" => {
                arity::<0>(name, args)?;
                Ok(SemValue::ElseBlock(None))
            }
            "not" | "neg" | "deref" | "ref" => {
                let [expr] = arity::<1>(name, args)?;
                let expr = expect_expr(expr)?;
                let op = match name {
                    "not" => UnopKind::Not,
                    "neg" => UnopKind::Neg,
                    "deref" => UnopKind::Deref,
                    _ => UnopKind::Ref,
                };
                Ok(self.unop(op, expr))
            }
            "apply" => {
                let [lhs, tail] = arity::<2>(name, args)?;
                let lhs = expect_expr(lhs)?;
                let tail = expect_tail(tail)?;
                Ok(SemValue::Expr(self.apply(lhs, tail)))
            }
            "empty_tail" => {
                arity::<0>(name, args)?;
                Ok(SemValue::Tail(Vec::new()))
            }
            "add_tail" | "sub_tail" | "mul_tail" | "div_tail" => {
                let [rhs, rest] = arity::<2>(name, args)?;
                let rhs = expect_expr(rhs)?;
                let mut tail = expect_tail(rest)?;
                let op = match name {
                    "add_tail" => BinopKind::Add,
                    "sub_tail" => BinopKind::Sub,
                    "mul_tail" => BinopKind::Mul,
                    _ => BinopKind::Div,
                };
                tail.insert(0, TailOp::Binop(op, rhs));
                Ok(SemValue::Tail(tail))
            }
            "le_tail" => {
                let [rhs] = arity::<1>(name, args)?;
                Ok(SemValue::Tail(vec![TailOp::Binop(
                    BinopKind::LessEqual,
                    expect_expr(rhs)?,
                )]))
            }
            "ge_tail" => {
                let [rhs] = arity::<1>(name, args)?;
                Ok(SemValue::Tail(vec![TailOp::CmpGe(expect_expr(rhs)?)]))
            }
            "eq_tail" => {
                let [rhs] = arity::<1>(name, args)?;
                Ok(SemValue::Tail(vec![TailOp::CmpEq(expect_expr(rhs)?)]))
            }
            "assign_tail" => {
                let [rhs] = arity::<1>(name, args)?;
                Ok(SemValue::Tail(vec![TailOp::Binop(
                    BinopKind::Assign,
                    expect_expr(rhs)?,
                )]))
            }
            "call_tail" => {
                let [args] = arity::<1>(name, args)?;
                let arguments = expect_list(args)?
                    .into_iter()
                    .map(expect_expr)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SemValue::Tail(vec![TailOp::Call(arguments)]))
            }
            other => Err(format!("unknown constructor {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_program() {
        let unit = parse("func main() : int { return 0; }").unwrap();
        assert_eq!(unit.decls.len(), 1);
        let main = &unit.decls[0];
        assert_eq!(main.name, "main");
        assert_eq!(main.return_type, TypeExpr::Int);
        assert!(main.params.is_empty());
        assert_eq!(main.statements.len(), 1);
        assert!(matches!(main.statements[0], Stmt::Return(_)));
    }

    #[test]
    fn test_parameters_and_pointer_types() {
        let unit = parse("func f(x : int, p : &&int) : &int { return x; }").unwrap();
        let f = &unit.decls[0];
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[0].ty, TypeExpr::Int);
        assert_eq!(
            f.params[1].ty,
            TypeExpr::Pointer(Box::new(TypeExpr::Pointer(Box::new(TypeExpr::Int))))
        );
        assert_eq!(f.return_type, TypeExpr::Pointer(Box::new(TypeExpr::Int)));
    }

    #[test]
    fn test_binary_operators_fold_left() {
        let unit = parse("func f() : int { return 10 - 3 - 2; }").unwrap();
        let Stmt::Return(expr) = &unit.decls[0].statements[0] else {
            panic!("expected a return");
        };
        // (10 - 3) - 2
        let ExprKind::Binop { op, lhs, rhs } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::Sub);
        assert_eq!(rhs.kind, ExprKind::Literal(2));
        let ExprKind::Binop { op, lhs, rhs } = &lhs.kind else {
            panic!("expected a nested binop");
        };
        assert_eq!(*op, BinopKind::Sub);
        assert_eq!(lhs.kind, ExprKind::Literal(10));
        assert_eq!(rhs.kind, ExprKind::Literal(3));
    }

    #[test]
    fn test_mul_binds_tighter_than_add() {
        let unit = parse("func f() : int { return 1 + 2 * 3; }").unwrap();
        let Stmt::Return(expr) = &unit.decls[0].statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Binop { op, rhs, .. } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binop {
                op: BinopKind::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_ge_swaps_less_equal_operands() {
        let unit = parse("func f(a : int, b : int) : int { return a >= b; }").unwrap();
        let Stmt::Return(expr) = &unit.decls[0].statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Binop { op, lhs, rhs } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::LessEqual);
        assert_eq!(lhs.identifier(), Some("b"));
        assert_eq!(rhs.identifier(), Some("a"));
    }

    #[test]
    fn test_eq_desugars_to_product_of_less_equals() {
        let unit = parse("func f(a : int, b : int) : int { return a == b; }").unwrap();
        let Stmt::Return(expr) = &unit.decls[0].statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Binop { op, lhs, rhs } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::Mul);
        assert!(matches!(
            lhs.kind,
            ExprKind::Binop {
                op: BinopKind::LessEqual,
                ..
            }
        ));
        assert!(matches!(
            rhs.kind,
            ExprKind::Binop {
                op: BinopKind::LessEqual,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_chains_through_expr() {
        let unit = parse("func f(a : int, b : int) : int { a := b := 1; return a; }").unwrap();
        let Stmt::Expr(expr) = &unit.decls[0].statements[0] else {
            panic!("expected an expression statement");
        };
        let ExprKind::Binop { op, rhs, .. } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::Assign);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binop {
                op: BinopKind::Assign,
                ..
            }
        ));
    }

    #[test]
    fn test_calls_and_unaries() {
        let unit = parse("func f(p : &int) : int { return !-*p + f(&*p); }").unwrap();
        let f = &unit.decls[0];
        let Stmt::Return(expr) = &f.statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Binop { op, lhs, rhs } = &expr.kind else {
            panic!("expected a binop");
        };
        assert_eq!(*op, BinopKind::Add);
        assert!(matches!(
            lhs.kind,
            ExprKind::Unop {
                op: UnopKind::Not,
                ..
            }
        ));
        let ExprKind::Call { callee, arguments } = &rhs.kind else {
            panic!("expected a call");
        };
        assert_eq!(callee.identifier(), Some("f"));
        assert_eq!(arguments.len(), 1);
    }

    #[test]
    fn test_control_flow_statements() {
        let unit = parse(
            "func main() : int {
                var i : int;
                for (i := 0; i <= 10; i := i + 1) {
                    if (i == 3) { continue; } else { }
                    while (0) { break; }
                }
                return i;
            }",
        )
        .unwrap();
        let main = &unit.decls[0];
        assert_eq!(main.statements.len(), 3);
        assert!(matches!(main.statements[0], Stmt::VarDecl(_)));
        assert!(matches!(main.statements[1], Stmt::For { .. }));
    }

    #[test]
    fn test_keyword_terminals_round_trip() {
        // Scanning a keyword's own lexeme yields exactly one token of
        // that keyword's type.
        let grammar = l0_parser().grammar();
        let rules = crate::scanner::scan_rules(grammar).unwrap();
        let mut keywords = 0;
        for terminal in grammar.terminals() {
            if terminal.eof
                || terminal.skip
                || !terminal.regex.chars().all(|c| c.is_ascii_alphabetic())
            {
                continue;
            }
            let scanner = crate::scanner::Scanner::new(&rules, &terminal.regex).unwrap();
            assert_eq!(scanner.tokens().len(), 2, "keyword {}", terminal.name);
            assert_eq!(scanner.tokens()[0].kind, terminal.name);
            assert_eq!(scanner.tokens()[0].lexeme, terminal.regex);
            keywords += 1;
        }
        assert!(keywords >= 10, "expected the L0 keyword set, got {}", keywords);
    }

    #[test]
    fn test_parse_tree_mode() {
        let tree = parse_tree("func main() : int { return 0; }").unwrap();
        let ParseTree::Node { name, children } = tree else {
            panic!("expected a node");
        };
        assert_eq!(name, "program");
        // decl_list and the EOF token.
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[1], ParseTree::Token(t) if t.kind == "EOF"));
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse("func main() : int { return 0 }").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unexpected token: RBRACE"), "{}", msg);
    }

    #[test]
    fn test_expression_ids_are_unique() {
        let unit = parse("func f(a : int) : int { return a + a * a; }").unwrap();
        let mut ids = Vec::new();
        fn collect(e: &Expr, ids: &mut Vec<ExprId>) {
            ids.push(e.id);
            match &e.kind {
                ExprKind::Unop { expr, .. } => collect(expr, ids),
                ExprKind::Binop { lhs, rhs, .. } => {
                    collect(lhs, ids);
                    collect(rhs, ids);
                }
                ExprKind::Call { callee, arguments } => {
                    collect(callee, ids);
                    for a in arguments {
                        collect(a, ids);
                    }
                }
                _ => {}
            }
        }
        let Stmt::Return(expr) = &unit.decls[0].statements[0] else {
            panic!("expected a return");
        };
        collect(expr, &mut ids);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
