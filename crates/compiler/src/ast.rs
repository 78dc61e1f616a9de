//! Abstract syntax tree for L0.
//!
//! Nodes are plain enums and structs; every pass dispatches by matching on
//! the variant. Expressions and declarations carry ids assigned at
//! construction time, so later passes can attach information (types,
//! resolved declarations, IR objects) in side tables without back
//! references inside the tree.

use std::fmt::Write;

/// Identity of an expression node, assigned by the AST builder.
pub type ExprId = usize;
/// Identity of a variable or function declaration.
pub type DeclId = usize;

/// A type expression. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Int,
    Pointer(Box<TypeExpr>),
    Function {
        return_type: Box<TypeExpr>,
        param_types: Vec<TypeExpr>,
    },
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeExpr::Int => write!(f, "int"),
            TypeExpr::Pointer(pointee) => write!(f, "pointer({})", pointee),
            TypeExpr::Function {
                return_type,
                param_types,
            } => {
                let params: Vec<String> = param_types.iter().map(|t| t.to_string()).collect();
                write!(f, "func({}, [{}])", return_type, params.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnopKind {
    Not,
    Neg,
    Ref,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinopKind {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    LessEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Identifier(String),
    Literal(i64),
    Unop {
        op: UnopKind,
        expr: Box<Expr>,
    },
    Binop {
        op: BinopKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// The callee is grammatically restricted to an identifier.
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
}

impl Expr {
    /// The identifier name, if this expression is one.
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

/// `var x : int;` or a function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub id: DeclId,
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub id: DeclId,
    pub name: String,
    pub return_type: TypeExpr,
    pub params: Vec<VarDecl>,
    pub statements: Vec<Stmt>,
}

impl FuncDecl {
    /// The function type derived from signature and parameters.
    pub fn ty(&self) -> TypeExpr {
        TypeExpr::Function {
            return_type: Box::new(self.return_type.clone()),
            param_types: self.params.iter().map(|p| p.ty.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnitDecl {
    pub decls: Vec<FuncDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl(VarDecl),
    Expr(Expr),
    Return(Expr),
    If {
        cond: Expr,
        then_block: CodeBlock,
        else_block: Option<CodeBlock>,
    },
    While {
        cond: Expr,
        body: CodeBlock,
    },
    For {
        init: Expr,
        cond: Expr,
        next: Expr,
        body: CodeBlock,
    },
    Break,
    Continue,
}

/// Render the AST as an indented tree, one node per line.
pub fn dump(unit: &TranslationUnitDecl) -> String {
    let mut out = String::new();
    out.push_str("TranslationUnitDecl\n");
    for func in &unit.decls {
        let _ = writeln!(out, "  FuncDecl(name={}, type={})", func.name, func.ty());
        for param in &func.params {
            let _ = writeln!(out, "    Param(name={}, type={})", param.name, param.ty);
        }
        for stmt in &func.statements {
            dump_stmt(&mut out, stmt, 2);
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn dump_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::VarDecl(decl) => {
            let _ = writeln!(out, "VarDecl(name={}, type={})", decl.name, decl.ty);
        }
        Stmt::Expr(expr) => {
            out.push_str("ExprStmt\n");
            dump_expr(out, expr, depth + 1);
        }
        Stmt::Return(expr) => {
            out.push_str("ReturnStmt\n");
            dump_expr(out, expr, depth + 1);
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            out.push_str("IfStmt\n");
            dump_expr(out, cond, depth + 1);
            dump_block(out, then_block, depth + 1);
            if let Some(else_block) = else_block {
                dump_block(out, else_block, depth + 1);
            }
        }
        Stmt::While { cond, body } => {
            out.push_str("WhileStmt\n");
            dump_expr(out, cond, depth + 1);
            dump_block(out, body, depth + 1);
        }
        Stmt::For {
            init,
            cond,
            next,
            body,
        } => {
            out.push_str("ForStmt\n");
            dump_expr(out, init, depth + 1);
            dump_expr(out, cond, depth + 1);
            dump_expr(out, next, depth + 1);
            dump_block(out, body, depth + 1);
        }
        Stmt::Break => out.push_str("BreakStmt\n"),
        Stmt::Continue => out.push_str("ContinueStmt\n"),
    }
}

fn dump_block(out: &mut String, block: &CodeBlock, depth: usize) {
    indent(out, depth);
    out.push_str("CodeBlock\n");
    for stmt in &block.statements {
        dump_stmt(out, stmt, depth + 1);
    }
}

fn dump_expr(out: &mut String, expr: &Expr, depth: usize) {
    indent(out, depth);
    match &expr.kind {
        ExprKind::Identifier(name) => {
            let _ = writeln!(out, "Identifier({})", name);
        }
        ExprKind::Literal(value) => {
            let _ = writeln!(out, "Literal({})", value);
        }
        ExprKind::Unop { op, expr: inner } => {
            let _ = writeln!(out, "{:?}", op);
            dump_expr(out, inner, depth + 1);
        }
        ExprKind::Binop { op, lhs, rhs } => {
            let _ = writeln!(out, "{:?}", op);
            dump_expr(out, lhs, depth + 1);
            dump_expr(out, rhs, depth + 1);
        }
        ExprKind::Call { callee, arguments } => {
            out.push_str("CallExpr\n");
            dump_expr(out, callee, depth + 1);
            for arg in arguments {
                dump_expr(out, arg, depth + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_equality_is_structural() {
        let a = TypeExpr::Pointer(Box::new(TypeExpr::Int));
        let b = TypeExpr::Pointer(Box::new(TypeExpr::Int));
        assert_eq!(a, b);
        assert_ne!(a, TypeExpr::Int);
        assert_ne!(a, TypeExpr::Pointer(Box::new(a.clone())));
    }

    #[test]
    fn test_function_type_display() {
        let ty = TypeExpr::Function {
            return_type: Box::new(TypeExpr::Int),
            param_types: vec![TypeExpr::Int, TypeExpr::Pointer(Box::new(TypeExpr::Int))],
        };
        assert_eq!(ty.to_string(), "func(int, [int, pointer(int)])");
    }

    #[test]
    fn test_dump_indents_nested_statements() {
        let func = FuncDecl {
            id: 0,
            name: "f".to_string(),
            return_type: TypeExpr::Int,
            params: vec![],
            statements: vec![Stmt::While {
                cond: Expr {
                    id: 0,
                    kind: ExprKind::Literal(1),
                },
                body: CodeBlock {
                    statements: vec![Stmt::Break],
                },
            }],
        };
        let unit = TranslationUnitDecl { decls: vec![func] };
        let text = dump(&unit);
        assert!(text.contains("FuncDecl(name=f, type=func(int, []))"), "{}", text);
        assert!(text.contains("  WhileStmt\n"), "{}", text);
        assert!(text.contains("      BreakStmt\n"), "{}", text);
    }

    #[test]
    fn test_func_decl_type_collects_params() {
        let func = FuncDecl {
            id: 0,
            name: "f".to_string(),
            return_type: TypeExpr::Int,
            params: vec![VarDecl {
                id: 1,
                name: "x".to_string(),
                ty: TypeExpr::Int,
            }],
            statements: vec![],
        };
        assert_eq!(
            func.ty(),
            TypeExpr::Function {
                return_type: Box::new(TypeExpr::Int),
                param_types: vec![TypeExpr::Int],
            }
        );
    }
}
