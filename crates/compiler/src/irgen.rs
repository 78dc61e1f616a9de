//! IR code generation from a semantically analyzed AST.
//!
//! Expressions compile in one of two modes: `rvalue` produces an operand
//! holding the expression's value, `lvalue` produces a variable holding a
//! pointer to it. Control flow lowers to explicit basic blocks; a stack
//! of loop contexts gives `break` and `continue` their targets. Codegen
//! assumes the analysis succeeded; unexpected shapes are compiler bugs
//! and panic.

use crate::ast::{
    BinopKind, CodeBlock, DeclId, Expr, ExprKind, FuncDecl, Stmt, TranslationUnitDecl, UnopKind,
};
use crate::ir::{BinOp, BlockId, FuncId, Instruction, Operand, TranslationUnit, VarId};
use crate::semantic::Resolution;
use std::collections::HashMap;
use tracing::debug;

struct LoopContext {
    header: BlockId,
    after: BlockId,
}

pub struct CodeGeneration<'a> {
    res: &'a Resolution,
    unit: TranslationUnit,
    /// FuncDecl id -> IR function, filled in declaration order.
    funcs: HashMap<DeclId, FuncId>,
    /// VarDecl id -> IR variable of the current function.
    vars: HashMap<DeclId, VarId>,
    current_func: FuncId,
    current_block: BlockId,
    loop_stack: Vec<LoopContext>,
}

/// Compile a translation unit into IR.
pub fn generate_ir(unit: &TranslationUnitDecl, res: &Resolution) -> TranslationUnit {
    CodeGeneration::new(res).compile(unit)
}

impl<'a> CodeGeneration<'a> {
    pub fn new(res: &'a Resolution) -> Self {
        CodeGeneration {
            res,
            unit: TranslationUnit::default(),
            funcs: HashMap::new(),
            vars: HashMap::new(),
            current_func: 0,
            current_block: 0,
            loop_stack: Vec::new(),
        }
    }

    pub fn compile(mut self, unit: &TranslationUnitDecl) -> TranslationUnit {
        for decl in &unit.decls {
            self.compile_func(decl);
        }
        self.unit
    }

    fn func(&mut self) -> &mut crate::ir::Function {
        &mut self.unit.functions[self.current_func]
    }

    fn emit(&mut self, instr: Instruction) {
        let block = self.current_block;
        self.func().block_mut(block).push(instr);
    }

    fn temp(&mut self) -> VarId {
        self.func().create_variable(None)
    }

    /// Open a fresh block and continue emitting there.
    fn switch_to(&mut self, block: BlockId) {
        self.current_block = block;
    }

    fn compile_func(&mut self, decl: &FuncDecl) {
        let func_id = self.unit.functions.len();
        self.unit
            .functions
            .push(crate::ir::Function::new(&decl.name));
        self.funcs.insert(decl.id, func_id);
        self.current_func = func_id;
        self.vars.clear();

        for param in &decl.params {
            let var = self.func().create_parameter(&param.name);
            self.vars.insert(param.id, var);
        }

        let entry = self.func().create_block();
        self.switch_to(entry);

        for stmt in &decl.statements {
            self.compile_stmt(stmt);
        }

        // Defensive return so every path is terminated.
        self.emit(Instruction::Return {
            value: Operand::Const(0),
        });

        self.func().sort_blocks();
        debug!(
            "compiled {} into {} blocks",
            decl.name,
            self.func().block_order.len()
        );
    }

    fn compile_block(&mut self, block: &CodeBlock) {
        for stmt in &block.statements {
            self.compile_stmt(stmt);
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => {
                let var = self.func().create_variable(Some(decl.name.as_str()));
                self.vars.insert(decl.id, var);
            }
            Stmt::Expr(expr) => {
                self.rvalue(expr);
            }
            Stmt::Return(expr) => {
                let value = self.rvalue(expr);
                self.emit(Instruction::Return { value });
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let then_bb = self.func().create_block();
                let else_bb = self.func().create_block();
                let after_bb = self.func().create_block();

                let cond = self.rvalue(cond);
                self.emit(Instruction::IfGoto {
                    cond,
                    then_label: then_bb,
                    else_label: else_bb,
                });

                self.switch_to(then_bb);
                self.compile_block(then_block);
                self.emit(Instruction::Goto { label: after_bb });

                self.switch_to(else_bb);
                if let Some(else_block) = else_block {
                    self.compile_block(else_block);
                }
                self.emit(Instruction::Goto { label: after_bb });

                self.switch_to(after_bb);
            }
            Stmt::While { cond, body } => {
                let header = self.func().create_block();
                let body_bb = self.func().create_block();
                let after = self.func().create_block();

                self.emit(Instruction::Goto { label: header });
                self.switch_to(header);
                let cond = self.rvalue(cond);
                self.emit(Instruction::IfGoto {
                    cond,
                    then_label: body_bb,
                    else_label: after,
                });

                self.switch_to(body_bb);
                self.loop_stack.push(LoopContext { header, after });
                self.compile_block(body);
                self.loop_stack.pop();
                self.emit(Instruction::Goto { label: header });

                self.switch_to(after);
            }
            Stmt::For {
                init,
                cond,
                next,
                body,
            } => {
                self.rvalue(init);

                let header = self.func().create_block();
                let body_bb = self.func().create_block();
                let after = self.func().create_block();

                self.emit(Instruction::Goto { label: header });
                self.switch_to(header);
                let cond = self.rvalue(cond);
                self.emit(Instruction::IfGoto {
                    cond,
                    then_label: body_bb,
                    else_label: after,
                });

                self.switch_to(body_bb);
                self.loop_stack.push(LoopContext { header, after });
                self.compile_block(body);
                self.loop_stack.pop();
                self.rvalue(next);
                self.emit(Instruction::Goto { label: header });

                self.switch_to(after);
            }
            Stmt::Break => {
                let after = self
                    .loop_stack
                    .last()
                    .expect("break outside of a loop survived semantic analysis")
                    .after;
                self.emit(Instruction::Goto { label: after });
                // Anything following is unreachable; give it its own
                // block so the emitting invariant holds.
                let rest = self.func().create_block();
                self.switch_to(rest);
            }
            Stmt::Continue => {
                let header = self
                    .loop_stack
                    .last()
                    .expect("continue outside of a loop survived semantic analysis")
                    .header;
                self.emit(Instruction::Goto { label: header });
                let rest = self.func().create_block();
                self.switch_to(rest);
            }
        }
    }

    /// Compile an expression for its value.
    fn rvalue(&mut self, expr: &Expr) -> Operand {
        match &expr.kind {
            ExprKind::Literal(value) => Operand::Const(*value),
            ExprKind::Identifier(_) => Operand::Var(self.bound_var(expr)),
            ExprKind::Binop {
                op: BinopKind::Assign,
                lhs,
                rhs,
            } => self.compile_assign(lhs, rhs),
            ExprKind::Binop { op, lhs, rhs } => {
                let lhs = self.rvalue(lhs);
                let rhs = self.rvalue(rhs);
                let dst = self.temp();
                self.emit(Instruction::Binop {
                    op: binop(*op),
                    dst,
                    lhs,
                    rhs,
                });
                Operand::Var(dst)
            }
            ExprKind::Unop {
                op: UnopKind::Neg,
                expr: inner,
            } => {
                let value = self.rvalue(inner);
                let dst = self.temp();
                self.emit(Instruction::Binop {
                    op: BinOp::Sub,
                    dst,
                    lhs: Operand::Const(0),
                    rhs: value,
                });
                Operand::Var(dst)
            }
            ExprKind::Unop {
                op: UnopKind::Not,
                expr: inner,
            } => {
                // !e is e == 0, lowered like the == desugaring.
                let value = self.rvalue(inner);
                let le = self.temp();
                self.emit(Instruction::Binop {
                    op: BinOp::LessEqual,
                    dst: le,
                    lhs: value,
                    rhs: Operand::Const(0),
                });
                let ge = self.temp();
                self.emit(Instruction::Binop {
                    op: BinOp::LessEqual,
                    dst: ge,
                    lhs: Operand::Const(0),
                    rhs: value,
                });
                let dst = self.temp();
                self.emit(Instruction::Binop {
                    op: BinOp::Mul,
                    dst,
                    lhs: Operand::Var(le),
                    rhs: Operand::Var(ge),
                });
                Operand::Var(dst)
            }
            ExprKind::Unop {
                op: UnopKind::Ref,
                expr: inner,
            } => Operand::Var(self.lvalue(inner)),
            ExprKind::Unop {
                op: UnopKind::Deref,
                expr: inner,
            } => {
                let ptr = self.rvalue_var(inner);
                let dst = self.temp();
                self.emit(Instruction::Load { dst, ptr });
                Operand::Var(dst)
            }
            ExprKind::Call { callee, arguments } => {
                let args: Vec<Operand> = arguments.iter().map(|a| self.rvalue(a)).collect();
                let decl = self.res.bindings[&callee.id];
                let callee = self.funcs[&decl];
                let dst = self.temp();
                self.emit(Instruction::Call {
                    dst,
                    callee,
                    arguments: args,
                });
                Operand::Var(dst)
            }
        }
    }

    /// `lhs := rhs`. Assigning to a plain identifier writes the variable
    /// directly; any other left-hand side goes through a pointer store.
    /// The value of the whole assignment is the right-hand side.
    fn compile_assign(&mut self, lhs: &Expr, rhs: &Expr) -> Operand {
        let value = self.rvalue(rhs);
        if let ExprKind::Identifier(_) = lhs.kind {
            let dst = self.bound_var(lhs);
            self.emit(Instruction::Assign { dst, value });
        } else {
            let ptr = self.lvalue(lhs);
            self.emit(Instruction::Store { ptr, value });
        }
        value
    }

    /// Compile an expression for a pointer to its storage.
    fn lvalue(&mut self, expr: &Expr) -> VarId {
        match &expr.kind {
            ExprKind::Identifier(_) => {
                let obj = self.bound_var(expr);
                let dst = self.temp();
                self.emit(Instruction::Reference { dst, obj });
                dst
            }
            ExprKind::Unop {
                op: UnopKind::Deref,
                expr: inner,
            } => self.rvalue_var(inner),
            ExprKind::Unop {
                op: UnopKind::Ref,
                expr: inner,
            } => {
                let obj = self.lvalue(inner);
                let dst = self.temp();
                self.emit(Instruction::Reference { dst, obj });
                dst
            }
            other => panic!("expression has no lvalue: {:?}", other),
        }
    }

    /// An rvalue that must be a variable (pointer-typed positions).
    fn rvalue_var(&mut self, expr: &Expr) -> VarId {
        match self.rvalue(expr) {
            Operand::Var(v) => v,
            Operand::Const(c) => panic!("expected a pointer variable, got constant {}", c),
        }
    }

    fn bound_var(&self, expr: &Expr) -> VarId {
        let decl = self.res.bindings[&expr.id];
        self.vars[&decl]
    }
}

fn binop(op: BinopKind) -> BinOp {
    match op {
        BinopKind::Add => BinOp::Add,
        BinopKind::Sub => BinOp::Sub,
        BinopKind::Mul => BinOp::Mul,
        BinopKind::Div => BinOp::Div,
        BinopKind::LessEqual => BinOp::LessEqual,
        BinopKind::Assign => unreachable!("assignments compile through compile_assign"),
    }
}
