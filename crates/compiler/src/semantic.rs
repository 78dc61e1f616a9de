//! Semantic analysis: name resolution, type checking, and control-flow
//! context tracking.
//!
//! The analysis walks the AST with a namespace stack (closest-nested-scope
//! lookup) and records its results in a [`Resolution`] side table keyed by
//! node ids. Diagnostics are collected rather than thrown so one run can
//! surface as many errors as possible; unknown names continue with an
//! `int` sentinel type. After the translation unit closes, any collected
//! diagnostic fails the analysis as a whole.

use crate::ast::{
    BinopKind, CodeBlock, DeclId, Expr, ExprId, ExprKind, FuncDecl, Stmt, TranslationUnitDecl,
    TypeExpr, UnopKind,
};
use crate::error::CompileError;
use std::collections::HashMap;

/// Results of a successful semantic analysis.
#[derive(Debug, Default, Clone)]
pub struct Resolution {
    /// The type of every expression node.
    pub expr_types: HashMap<ExprId, TypeExpr>,
    /// Resolved declaration of every identifier (including call callees).
    pub bindings: HashMap<ExprId, DeclId>,
}

/// What a name in a namespace refers to. Functions are kept as a list to
/// reserve room for overloading, although only one candidate ever
/// resolves.
#[derive(Debug, Clone)]
enum NameEntry {
    Var(DeclId, TypeExpr),
    Funcs(Vec<DeclId>),
}

#[derive(Debug, Default)]
struct Namespace {
    names: HashMap<String, NameEntry>,
}

/// A LIFO stack of namespaces, innermost last.
#[derive(Debug, Default)]
pub struct SymbolTable {
    namespaces: Vec<Namespace>,
}

impl SymbolTable {
    fn open_namespace(&mut self) {
        self.namespaces.push(Namespace::default());
    }

    fn close_namespace(&mut self) {
        self.namespaces.pop().expect("no namespace to close");
    }

    fn declare_var(&mut self, name: &str, decl: DeclId, ty: TypeExpr) -> Result<(), String> {
        let ns = self.namespaces.last_mut().expect("no open namespace");
        if ns.names.contains_key(name) {
            return Err(format!("duplicate definition of name: {}", name));
        }
        ns.names.insert(name.to_string(), NameEntry::Var(decl, ty));
        Ok(())
    }

    fn declare_func(&mut self, name: &str, decl: DeclId) -> Result<(), String> {
        let ns = self.namespaces.last_mut().expect("no open namespace");
        match ns.names.get_mut(name) {
            None => {
                ns.names
                    .insert(name.to_string(), NameEntry::Funcs(vec![decl]));
                Ok(())
            }
            Some(NameEntry::Funcs(decls)) => {
                decls.push(decl);
                Ok(())
            }
            Some(NameEntry::Var(..)) => Err(format!("duplicate definition of name: {}", name)),
        }
    }

    /// Closest-nested-scope lookup: innermost namespace outward.
    fn find_name(&self, name: &str) -> Option<&NameEntry> {
        self.namespaces
            .iter()
            .rev()
            .find_map(|ns| ns.names.get(name))
    }
}

pub struct SemanticAnalysis {
    table: SymbolTable,
    loop_depth: usize,
    errors: Vec<String>,
    /// Function signatures by declaration id, for call checking.
    func_sigs: HashMap<DeclId, TypeExpr>,
    current_return: Option<TypeExpr>,
    res: Resolution,
}

/// Analyze a translation unit, producing the resolution side table.
pub fn analyze(unit: &TranslationUnitDecl) -> Result<Resolution, CompileError> {
    SemanticAnalysis::new().run(unit)
}

impl SemanticAnalysis {
    pub fn new() -> Self {
        SemanticAnalysis {
            table: SymbolTable::default(),
            loop_depth: 0,
            errors: Vec::new(),
            func_sigs: HashMap::new(),
            current_return: None,
            res: Resolution::default(),
        }
    }

    fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn run(mut self, unit: &TranslationUnitDecl) -> Result<Resolution, CompileError> {
        self.table.open_namespace();
        for func in &unit.decls {
            self.check_func(func);
        }
        self.table.close_namespace();

        if self.errors.is_empty() {
            Ok(self.res)
        } else {
            Err(CompileError::Semantic(self.errors))
        }
    }

    fn check_func(&mut self, func: &FuncDecl) {
        if let Err(msg) = self.table.declare_func(&func.name, func.id) {
            self.error(msg);
        }
        self.func_sigs.insert(func.id, func.ty());

        self.table.open_namespace();
        self.current_return = Some(func.return_type.clone());
        // Parameters live in the function's own namespace.
        for param in &func.params {
            if let Err(msg) = self.table.declare_var(&param.name, param.id, param.ty.clone()) {
                self.error(msg);
            }
        }
        for stmt in &func.statements {
            self.check_stmt(stmt);
        }
        self.current_return = None;
        self.table.close_namespace();
    }

    fn check_block(&mut self, block: &CodeBlock) {
        self.table.open_namespace();
        for stmt in &block.statements {
            self.check_stmt(stmt);
        }
        self.table.close_namespace();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => {
                if let Err(msg) = self.table.declare_var(&decl.name, decl.id, decl.ty.clone()) {
                    self.error(msg);
                }
            }
            Stmt::Expr(expr) => {
                self.check_expr(expr);
            }
            Stmt::Return(expr) => {
                let ty = self.check_expr(expr);
                let expected = self
                    .current_return
                    .clone()
                    .expect("return statement outside of a function");
                if ty != expected {
                    self.error(format!(
                        "invalid return type ({}), expected: {}",
                        ty, expected
                    ));
                }
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let ty = self.check_expr(cond);
                if ty != TypeExpr::Int {
                    self.error(format!("invalid if-condition {}, expected int", ty));
                }
                self.check_block(then_block);
                if let Some(else_block) = else_block {
                    self.check_block(else_block);
                }
            }
            Stmt::While { cond, body } => {
                let ty = self.check_expr(cond);
                if ty != TypeExpr::Int {
                    self.error(format!("invalid while-condition: {}, expected int", ty));
                }
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::For {
                init,
                cond,
                next,
                body,
            } => {
                self.check_expr(init);
                let ty = self.check_expr(cond);
                if ty != TypeExpr::Int {
                    self.error(format!("invalid for-condition: {}, expected int", ty));
                }
                self.check_expr(next);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::Break => {
                if self.loop_depth == 0 {
                    self.error("break statement outside of loop".to_string());
                }
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    self.error("continue statement outside of loop".to_string());
                }
            }
        }
    }

    /// Type an expression, recording the result in the side table. On an
    /// error the analysis continues with an `int` sentinel to surface
    /// further diagnostics.
    fn check_expr(&mut self, expr: &Expr) -> TypeExpr {
        let ty = self.expr_type(expr);
        self.res.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn expr_type(&mut self, expr: &Expr) -> TypeExpr {
        match &expr.kind {
            ExprKind::Literal(_) => TypeExpr::Int,
            ExprKind::Identifier(name) => match self.table.find_name(name).cloned() {
                None => {
                    self.error(format!("name not found: {}", name));
                    TypeExpr::Int
                }
                Some(NameEntry::Var(decl, ty)) => {
                    self.res.bindings.insert(expr.id, decl);
                    ty
                }
                Some(NameEntry::Funcs(_)) => {
                    self.error(format!("cannot use function {} as a value", name));
                    TypeExpr::Int
                }
            },
            ExprKind::Unop { op, expr: inner } => {
                let inner_ty = self.check_expr(inner);
                match op {
                    UnopKind::Not | UnopKind::Neg => {
                        if inner_ty != TypeExpr::Int {
                            self.error("invalid type, expected int".to_string());
                        }
                        inner_ty
                    }
                    UnopKind::Ref => TypeExpr::Pointer(Box::new(inner_ty)),
                    UnopKind::Deref => match inner_ty {
                        TypeExpr::Pointer(pointee) => *pointee,
                        other => {
                            self.error(format!("cannot dereference non-pointer type {}", other));
                            TypeExpr::Int
                        }
                    },
                }
            }
            ExprKind::Binop { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs);
                let rhs_ty = self.check_expr(rhs);
                if lhs_ty != rhs_ty {
                    self.error(format!(
                        "operand-type mismatch: {} <-> {}",
                        lhs_ty, rhs_ty
                    ));
                }
                if *op != BinopKind::Assign && lhs_ty != TypeExpr::Int {
                    self.error("invalid type, expected int".to_string());
                }
                lhs_ty
            }
            ExprKind::Call { callee, arguments } => self.check_call(callee, arguments),
        }
    }

    fn check_call(&mut self, callee: &Expr, arguments: &[Expr]) -> TypeExpr {
        let arg_types: Vec<TypeExpr> = arguments.iter().map(|a| self.check_expr(a)).collect();

        let Some(name) = callee.identifier() else {
            self.error("called expression is not a function name".to_string());
            return TypeExpr::Int;
        };
        let decl = match self.table.find_name(name).cloned() {
            None => {
                self.error(format!("name not found: {}", name));
                return TypeExpr::Int;
            }
            Some(NameEntry::Var(..)) => {
                self.error(format!("{} is not a function", name));
                return TypeExpr::Int;
            }
            Some(NameEntry::Funcs(decls)) => {
                // Overloaded names would be resolved here against the
                // argument types.
                assert!(decls.len() == 1, "overloading is not yet implemented");
                decls[0]
            }
        };

        let sig = self.func_sigs[&decl].clone();
        self.res.bindings.insert(callee.id, decl);
        self.res.expr_types.insert(callee.id, sig.clone());

        let TypeExpr::Function {
            return_type,
            param_types,
        } = sig
        else {
            unreachable!("function declarations always carry function types");
        };

        if arg_types.len() != param_types.len() {
            self.error("number of arguments do not match parameter list".to_string());
            return *return_type;
        }
        for (param, arg) in param_types.iter().zip(&arg_types) {
            if param != arg {
                self.error(format!(
                    "argument<->parameter type mismatch: {} <-> {}",
                    arg, param
                ));
                return *return_type;
            }
        }

        *return_type
    }
}

impl Default for SemanticAnalysis {
    fn default() -> Self {
        SemanticAnalysis::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l0::parse;

    fn analyze_source(source: &str) -> Result<Resolution, CompileError> {
        analyze(&parse(source).unwrap())
    }

    fn semantic_messages(source: &str) -> Vec<String> {
        match analyze_source(source) {
            Err(CompileError::Semantic(msgs)) => msgs,
            other => panic!("expected semantic failure, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_program_passes() {
        let res = analyze_source(
            "func add(a : int, b : int) : int { return a + b; }
             func main() : int { return add(1, 2); }",
        )
        .unwrap();
        assert!(!res.expr_types.is_empty());
    }

    #[test]
    fn test_every_expression_is_typed_and_bound() {
        let source = "func f(a : int) : int {
            var p : &int;
            p := &a;
            return *p + f(a);
        }";
        let unit = parse(source).unwrap();
        let res = analyze(&unit).unwrap();

        fn walk(e: &Expr, res: &Resolution) {
            assert!(res.expr_types.contains_key(&e.id), "untyped: {:?}", e);
            if let ExprKind::Identifier(_) = e.kind {
                assert!(res.bindings.contains_key(&e.id), "unresolved: {:?}", e);
            }
            match &e.kind {
                ExprKind::Unop { expr, .. } => walk(expr, res),
                ExprKind::Binop { lhs, rhs, .. } => {
                    walk(lhs, res);
                    walk(rhs, res);
                }
                ExprKind::Call { callee, arguments } => {
                    walk(callee, res);
                    for a in arguments {
                        walk(a, res);
                    }
                }
                _ => {}
            }
        }
        for func in &unit.decls {
            for stmt in &func.statements {
                if let Stmt::Expr(e) | Stmt::Return(e) = stmt {
                    walk(e, &res);
                }
            }
        }
    }

    #[test]
    fn test_duplicate_names_in_one_scope() {
        let msgs =
            semantic_messages("func f() : int { var x : int; var x : int; return 0; }");
        assert!(msgs.iter().any(|m| m.contains("duplicate definition")));
    }

    #[test]
    fn test_shadowing_in_nested_block_is_allowed() {
        analyze_source(
            "func f() : int {
                var x : int;
                x := 1;
                if (x) { var x : int; x := 2; } else { }
                return x;
            }",
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_name_continues_with_int() {
        let msgs = semantic_messages("func f() : int { return y + z; }");
        // Both unknown names are reported thanks to the int sentinel.
        assert_eq!(
            msgs.iter().filter(|m| m.contains("name not found")).count(),
            2
        );
    }

    #[test]
    fn test_type_mismatch_in_binop() {
        let msgs = semantic_messages(
            "func f() : int { var p : &int; var x : int; x := x + p; return x; }",
        );
        assert!(msgs.iter().any(|m| m.contains("operand-type mismatch")));
    }

    #[test]
    fn test_assign_requires_matching_types() {
        let msgs =
            semantic_messages("func f() : int { var p : &int; p := 1; return 0; }");
        assert!(msgs.iter().any(|m| m.contains("operand-type mismatch")));
    }

    #[test]
    fn test_deref_of_non_pointer() {
        let msgs = semantic_messages("func f(x : int) : int { return *x; }");
        assert!(
            msgs.iter()
                .any(|m| m.contains("cannot dereference non-pointer type int"))
        );
    }

    #[test]
    fn test_condition_must_be_int() {
        let msgs = semantic_messages(
            "func f(p : &int) : int { if (p) { } else { } return 0; }",
        );
        assert!(msgs.iter().any(|m| m.contains("invalid if-condition")));

        let msgs =
            semantic_messages("func f(p : &int) : int { while (p) { } return 0; }");
        assert!(msgs.iter().any(|m| m.contains("invalid while-condition")));
    }

    #[test]
    fn test_return_type_must_match() {
        let msgs = semantic_messages("func f(p : &int) : int { return p; }");
        assert!(msgs.iter().any(|m| m.contains("invalid return type")));
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        let msgs = semantic_messages("func f() : int { break; return 0; }");
        assert!(msgs.iter().any(|m| m.contains("break statement outside")));

        let msgs = semantic_messages(
            "func f() : int { while (0) { } continue; return 0; }",
        );
        assert!(msgs.iter().any(|m| m.contains("continue statement outside")));
    }

    #[test]
    fn test_break_inside_loop_is_fine() {
        analyze_source("func f() : int { while (1) { break; } return 0; }").unwrap();
    }

    #[test]
    fn test_call_arity_mismatch() {
        let msgs = semantic_messages(
            "func g(a : int) : int { return a; }
             func main() : int { return g(1, 2); }",
        );
        assert!(
            msgs.iter()
                .any(|m| m.contains("number of arguments do not match"))
        );
    }

    #[test]
    fn test_call_argument_type_mismatch() {
        let msgs = semantic_messages(
            "func g(a : int) : int { return a; }
             func main() : int { var p : &int; return g(p); }",
        );
        assert!(
            msgs.iter()
                .any(|m| m.contains("argument<->parameter type mismatch"))
        );
    }

    #[test]
    fn test_calling_a_variable_fails() {
        let msgs = semantic_messages("func f() : int { var x : int; return x(); }");
        assert!(msgs.iter().any(|m| m.contains("is not a function")));
    }

    #[test]
    fn test_functions_resolve_in_definition_order() {
        // Calls may only reference functions that are already defined.
        let msgs = semantic_messages("func main() : int { return later(); }");
        assert!(msgs.iter().any(|m| m.contains("name not found: later")));
    }

    #[test]
    fn test_all_errors_collected_in_one_run() {
        let msgs = semantic_messages(
            "func f(p : &int) : int {
                var x : int;
                x := unknown;
                return p;
            }",
        );
        assert!(msgs.len() >= 2, "expected several diagnostics: {:?}", msgs);
    }
}
