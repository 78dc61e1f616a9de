//! Three-address-code intermediate representation.
//!
//! A [`TranslationUnit`] owns [`Function`]s; a function owns arenas of
//! variables and basic blocks that are referenced by index, so the
//! optimizer can delete blocks and variables from the visible order lists
//! without invalidating labels held by instructions.
//!
//! Misuse of the IR (appending past a terminator, reading a variable with
//! no frame slot) indicates a compiler bug and asserts instead of
//! returning an error.

use std::collections::VecDeque;
use std::fmt::Write;

pub type FuncId = usize;
pub type BlockId = usize;
pub type VarId = usize;

/// An instruction operand: a variable or an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operand {
    Var(VarId),
    Const(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    LessEqual,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "Add",
            BinOp::Sub => "Sub",
            BinOp::Mul => "Mul",
            BinOp::Div => "Div",
            BinOp::LessEqual => "LessEqual",
        }
    }

    /// Integer semantics of the operator; division floors.
    pub fn eval(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::Mul => lhs.wrapping_mul(rhs),
            BinOp::Div => {
                let q = lhs.wrapping_div(rhs);
                if lhs % rhs != 0 && (lhs < 0) != (rhs < 0) {
                    q - 1
                } else {
                    q
                }
            }
            BinOp::LessEqual => (lhs <= rhs) as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Binop {
        op: BinOp,
        dst: VarId,
        lhs: Operand,
        rhs: Operand,
    },
    Assign {
        dst: VarId,
        value: Operand,
    },
    /// dst := address of obj's stack slot.
    Reference {
        dst: VarId,
        obj: VarId,
    },
    Load {
        dst: VarId,
        ptr: VarId,
    },
    Store {
        ptr: VarId,
        value: Operand,
    },
    IfGoto {
        cond: Operand,
        then_label: BlockId,
        else_label: BlockId,
    },
    Goto {
        label: BlockId,
    },
    Call {
        dst: VarId,
        callee: FuncId,
        arguments: Vec<Operand>,
    },
    Return {
        value: Operand,
    },
}

impl Instruction {
    /// The destination variable, if the instruction writes one.
    pub fn dst(&self) -> Option<VarId> {
        match self {
            Instruction::Binop { dst, .. }
            | Instruction::Assign { dst, .. }
            | Instruction::Reference { dst, .. }
            | Instruction::Load { dst, .. }
            | Instruction::Call { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// All source operands. Note that `Reference` reads its object's
    /// address, so address-taken variables count as read.
    pub fn src_operands(&self) -> Vec<Operand> {
        match self {
            Instruction::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Assign { value, .. } => vec![*value],
            Instruction::Reference { obj, .. } => vec![Operand::Var(*obj)],
            Instruction::Load { ptr, .. } => vec![Operand::Var(*ptr)],
            Instruction::Store { ptr, value } => vec![Operand::Var(*ptr), *value],
            Instruction::IfGoto { cond, .. } => vec![*cond],
            Instruction::Goto { .. } => vec![],
            Instruction::Call { arguments, .. } => arguments.clone(),
            Instruction::Return { value } => vec![*value],
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Instruction::Goto { .. } | Instruction::IfGoto { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    /// True for compiler-generated temporaries (`t0`, `t1`, ...).
    pub temporary: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Append an instruction. Only the last instruction of a block may be
    /// a branch.
    pub fn push(&mut self, instr: Instruction) {
        if let Some(last) = self.instructions.last() {
            assert!(
                !last.is_branch(),
                "cannot append instruction to already closed block {}",
                self.name
            );
        }
        self.instructions.push(instr);
    }

    /// Control-flow successors, derived from the final branch.
    pub fn successors(&self) -> Vec<BlockId> {
        match self.instructions.last() {
            Some(Instruction::Goto { label }) => vec![*label],
            Some(Instruction::IfGoto {
                then_label,
                else_label,
                ..
            }) => vec![*then_label, *else_label],
            _ => vec![],
        }
    }
}

/// Successor/predecessor maps, recomputed on demand so they never go
/// stale.
#[derive(Debug)]
pub struct Cfg {
    pub successors: Vec<Vec<BlockId>>,
    pub predecessors: Vec<Vec<BlockId>>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    vars: Vec<Variable>,
    pub parameters: Vec<VarId>,
    pub locals: Vec<VarId>,
    blocks: Vec<BasicBlock>,
    /// Visible blocks in emission order; deleted blocks stay in the
    /// arena but leave this list.
    pub block_order: Vec<BlockId>,
    entry: Option<BlockId>,
}

impl Function {
    pub fn new(name: &str) -> Self {
        Function {
            name: name.to_string(),
            vars: Vec::new(),
            parameters: Vec::new(),
            locals: Vec::new(),
            blocks: Vec::new(),
            block_order: Vec::new(),
            entry: None,
        }
    }

    /// The first created block is the entry block.
    pub fn create_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            name: format!("BB{}", id),
            instructions: Vec::new(),
        });
        self.block_order.push(id);
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry.expect("function has no blocks")
    }

    /// Create a named local, or an anonymous temporary.
    pub fn create_variable(&mut self, name: Option<&str>) -> VarId {
        let (name, temporary) = match name {
            Some(name) => (name.to_string(), false),
            None => (format!("t{}", self.locals.len()), true),
        };
        let id = self.vars.len();
        self.vars.push(Variable { name, temporary });
        self.locals.push(id);
        id
    }

    pub fn create_parameter(&mut self, name: &str) -> VarId {
        let id = self.vars.len();
        self.vars.push(Variable {
            name: format!("p{}_{}", self.parameters.len(), name),
            temporary: false,
        });
        self.parameters.push(id);
        id
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id]
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Drop a block from the visible order. Its label stays valid but
    /// nothing may target it afterwards.
    pub fn remove_block(&mut self, id: BlockId) {
        self.block_order.retain(|&b| b != id);
    }

    pub fn cfg(&self) -> Cfg {
        let mut successors = vec![Vec::new(); self.blocks.len()];
        let mut predecessors = vec![Vec::new(); self.blocks.len()];
        for &id in &self.block_order {
            let succs = self.blocks[id].successors();
            for &succ in &succs {
                predecessors[succ].push(id);
            }
            successors[id] = succs;
        }
        Cfg {
            successors,
            predecessors,
        }
    }

    /// Order the blocks by breadth-first traversal from the entry block;
    /// unreachable blocks keep their relative order at the end. This
    /// ordering is observable and must stay deterministic.
    pub fn sort_blocks(&mut self) {
        let cfg = self.cfg();
        let entry = self.entry_block();
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.block_order.len());
        let mut queue = VecDeque::new();
        visited[entry] = true;
        queue.push_back(entry);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &succ in &cfg.successors[id] {
                if !visited[succ] {
                    visited[succ] = true;
                    queue.push_back(succ);
                }
            }
        }
        for &id in &self.block_order {
            if !visited[id] {
                order.push(id);
            }
        }
        assert_eq!(order.len(), self.block_order.len());
        self.block_order = order;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub functions: Vec<Function>,
}

impl TranslationUnit {
    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Human-readable IR dump, one function per paragraph.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for function in &self.functions {
            let _ = writeln!(out, "{} {{", function.name);
            for &block in &function.block_order {
                let _ = writeln!(out, "{}:", function.block(block).name);
                for instr in &function.block(block).instructions {
                    let _ = writeln!(out, "  {}", format_instruction(self, function, instr));
                }
            }
            let _ = writeln!(out, "}}");
        }
        out
    }

    /// Dump all function CFGs as a GraphViz digraph, one cluster per
    /// function and one record node per basic block.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        out.push_str("digraph G { compound=true; graph [rankdir=TD]; node [shape=record];\n");
        for (idx, function) in self.functions.iter().enumerate() {
            let _ = writeln!(out, "subgraph cluster{} {{ label=\"{}\"", idx, function.name);
            for &block in &function.block_order {
                let bb = function.block(block);
                let mut ir = String::new();
                for instr in &bb.instructions {
                    ir.push_str(&format_instruction(self, function, instr).replace('"', "'"));
                    ir.push_str("\\l");
                }
                let _ = writeln!(
                    out,
                    " bb_{}_{}[shape=record,label=\"{{ {} | {}}}\"];",
                    idx, block, bb.name, ir
                );
                for succ in bb.successors() {
                    let _ = writeln!(out, " bb_{}_{} -> bb_{}_{};", idx, block, idx, succ);
                }
            }
            out.push_str("}\n");
        }
        out.push_str("}\n");
        out
    }
}

fn format_operand(function: &Function, operand: Operand) -> String {
    match operand {
        Operand::Var(v) => function.var(v).name.clone(),
        Operand::Const(c) => c.to_string(),
    }
}

/// Render one instruction the way tests and dumps expect:
/// `dst := opcode src, src` with opcode-specific forms for memory ops.
pub fn format_instruction(
    unit: &TranslationUnit,
    function: &Function,
    instr: &Instruction,
) -> String {
    let var = |v: VarId| function.var(v).name.clone();
    let op = |o: Operand| format_operand(function, o);
    let label = |b: BlockId| format!(".{}", function.block(b).name);
    match instr {
        Instruction::Binop { op: binop, dst, lhs, rhs } => {
            format!("{:<3} := {} {}, {}", var(*dst), binop.name(), op(*lhs), op(*rhs))
        }
        Instruction::Assign { dst, value } => {
            format!("{:<3} := Assign {}", var(*dst), op(*value))
        }
        Instruction::Reference { dst, obj } => {
            format!("{:<3} := Reference {}", var(*dst), var(*obj))
        }
        Instruction::Load { dst, ptr } => format!("{} := Load *{}", var(*dst), var(*ptr)),
        Instruction::Store { ptr, value } => format!("*{} := Store {}", var(*ptr), op(*value)),
        Instruction::IfGoto {
            cond,
            then_label,
            else_label,
        } => format!(
            "IfGoto {}, {}, {}",
            op(*cond),
            label(*then_label),
            label(*else_label)
        ),
        Instruction::Goto { label: l } => format!("Goto {}", label(*l)),
        Instruction::Call {
            dst,
            callee,
            arguments,
        } => {
            let args: Vec<String> = arguments.iter().map(|&a| op(a)).collect();
            let callee = format!("func:{}", unit.functions[*callee].name);
            if args.is_empty() {
                format!("{:<3} := Call {}", var(*dst), callee)
            } else {
                format!("{:<3} := Call {}, {}", var(*dst), callee, args.join(", "))
            }
        }
        Instruction::Return { value } => format!("Return {}", op(*value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_is_entry() {
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let b1 = f.create_block();
        assert_eq!(f.entry_block(), b0);
        assert_eq!(f.block(b1).name, "BB1");
    }

    #[test]
    fn test_variable_and_parameter_naming() {
        let mut f = Function::new("f");
        let p = f.create_parameter("n");
        let x = f.create_variable(Some("x"));
        let t = f.create_variable(None);
        assert_eq!(f.var(p).name, "p0_n");
        assert!(!f.var(p).temporary);
        assert_eq!(f.var(x).name, "x");
        assert_eq!(f.var(t).name, "t1");
        assert!(f.var(t).temporary);
    }

    #[test]
    #[should_panic(expected = "already closed block")]
    fn test_append_after_branch_panics() {
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let b1 = f.create_block();
        f.block_mut(b0).push(Instruction::Goto { label: b1 });
        f.block_mut(b0).push(Instruction::Return {
            value: Operand::Const(0),
        });
    }

    #[test]
    fn test_append_after_return_is_allowed() {
        // Only branches close a block; trailing code after a return is
        // cleaned up by the optimizer instead.
        let mut f = Function::new("f");
        let b0 = f.create_block();
        f.block_mut(b0).push(Instruction::Return {
            value: Operand::Const(0),
        });
        f.block_mut(b0).push(Instruction::Return {
            value: Operand::Const(1),
        });
    }

    #[test]
    fn test_cfg_successors_and_predecessors() {
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let b1 = f.create_block();
        let b2 = f.create_block();
        f.block_mut(b0).push(Instruction::IfGoto {
            cond: Operand::Const(1),
            then_label: b1,
            else_label: b2,
        });
        f.block_mut(b1).push(Instruction::Goto { label: b2 });
        f.block_mut(b2).push(Instruction::Return {
            value: Operand::Const(0),
        });
        let cfg = f.cfg();
        assert_eq!(cfg.successors[b0], vec![b1, b2]);
        assert_eq!(cfg.predecessors[b2], vec![b0, b1]);
        assert!(cfg.predecessors[b0].is_empty());
    }

    #[test]
    fn test_sort_blocks_breadth_first_with_unreachable_tail() {
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let b1 = f.create_block(); // unreachable
        let b2 = f.create_block();
        let b3 = f.create_block();
        f.block_mut(b0).push(Instruction::IfGoto {
            cond: Operand::Const(1),
            then_label: b3,
            else_label: b2,
        });
        f.block_mut(b2).push(Instruction::Return {
            value: Operand::Const(0),
        });
        f.block_mut(b3).push(Instruction::Return {
            value: Operand::Const(0),
        });
        f.sort_blocks();
        assert_eq!(f.block_order, vec![b0, b3, b2, b1]);
    }

    #[test]
    fn test_eval_floor_division() {
        assert_eq!(BinOp::Div.eval(7, 2), 3);
        assert_eq!(BinOp::Div.eval(-7, 2), -4);
        assert_eq!(BinOp::Div.eval(7, -2), -4);
        assert_eq!(BinOp::Div.eval(-7, -2), 3);
        assert_eq!(BinOp::LessEqual.eval(3, 3), 1);
        assert_eq!(BinOp::LessEqual.eval(4, 3), 0);
    }

    #[test]
    fn test_dump_format() {
        let mut unit = TranslationUnit::default();
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let x = f.create_variable(Some("x"));
        let t = f.create_variable(None);
        f.block_mut(b0).push(Instruction::Assign {
            dst: x,
            value: Operand::Const(7),
        });
        f.block_mut(b0).push(Instruction::Binop {
            op: BinOp::Add,
            dst: t,
            lhs: Operand::Var(x),
            rhs: Operand::Const(1),
        });
        f.block_mut(b0).push(Instruction::Return {
            value: Operand::Var(t),
        });
        unit.functions.push(f);
        let dump = unit.dump();
        assert!(dump.contains("f {"), "{}", dump);
        assert!(dump.contains("BB0:"), "{}", dump);
        assert!(dump.contains("x   := Assign 7"), "{}", dump);
        assert!(dump.contains("t1  := Add x, 1"), "{}", dump);
        assert!(dump.contains("Return t1"), "{}", dump);
    }

    #[test]
    fn test_dot_output_has_clusters_and_edges() {
        let mut unit = TranslationUnit::default();
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let b1 = f.create_block();
        f.block_mut(b0).push(Instruction::Goto { label: b1 });
        f.block_mut(b1).push(Instruction::Return {
            value: Operand::Const(0),
        });
        unit.functions.push(f);
        let dot = unit.to_dot();
        assert!(dot.starts_with("digraph G {"), "{}", dot);
        assert!(dot.contains("subgraph cluster0 { label=\"f\""), "{}", dot);
        assert!(dot.contains("bb_0_0 -> bb_0_1;"), "{}", dot);
    }

    #[test]
    fn test_store_and_load_format() {
        let mut unit = TranslationUnit::default();
        let mut f = Function::new("f");
        let b0 = f.create_block();
        let p = f.create_variable(Some("p"));
        let v = f.create_variable(None);
        f.block_mut(b0).push(Instruction::Store {
            ptr: p,
            value: Operand::Const(42),
        });
        f.block_mut(b0).push(Instruction::Load { dst: v, ptr: p });
        unit.functions.push(f);
        let dump = unit.dump();
        assert!(dump.contains("*p := Store 42"), "{}", dump);
        assert!(dump.contains("t1 := Load *p"), "{}", dump);
    }
}
