//! IR optimizer: a fixpoint over six passes.
//!
//! Per function the passes run in a round; rounds repeat until one full
//! round changes nothing. The passes are ordered from local to global:
//! constant folding (single instruction), constant/value propagation
//! (dataflow over basic blocks), block merging and redundant-jump
//! elimination (CFG shape), then dead-block and dead-variable cleanup.

use crate::equivalence::EquivalenceClasses;
use crate::ir::{BinOp, Function, Instruction, Operand, TranslationUnit, VarId};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

trait Pass {
    fn name(&self) -> &'static str;
    fn run(&mut self, function: &mut Function) -> bool;
}

pub struct Optimizer {
    passes: Vec<Box<dyn Pass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer {
            passes: vec![
                // Look at a single instruction.
                Box::new(ConstantFolding),
                // Look at a whole basic block, with an inter-block fixpoint.
                Box::new(ConstantValuePropagation),
                // CFG optimization.
                Box::new(MergeBlocks),
                Box::new(RedundantJumpElimination),
                // Garbage cleanup.
                Box::new(DeadBlockElimination),
                Box::new(DeadVariableElimination),
            ],
        }
    }

    pub fn optimize(&mut self, program: &mut TranslationUnit) {
        for function in &mut program.functions {
            self.optimize_function(function);
        }
    }

    pub fn optimize_function(&mut self, function: &mut Function) {
        let mut changed = true;
        while changed {
            changed = false;
            for pass in &mut self.passes {
                if pass.run(function) {
                    debug!("{} changed by {}", function.name, pass.name());
                    changed = true;
                }
            }
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::new()
    }
}

/// Replace arithmetic on literals with the folded assignment, and
/// constant-condition branches with the taken jump.
struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "ConstantFolding"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = false;
        for &block in &function.block_order.clone() {
            for instr in &mut function.block_mut(block).instructions {
                let replacement = match *instr {
                    Instruction::Binop {
                        op,
                        dst,
                        lhs: Operand::Const(lhs),
                        rhs: Operand::Const(rhs),
                    } => {
                        if op == BinOp::Div && rhs == 0 {
                            // Fold nothing; the interpreter reports the
                            // division by zero at run time.
                            None
                        } else {
                            Some(Instruction::Assign {
                                dst,
                                value: Operand::Const(op.eval(lhs, rhs)),
                            })
                        }
                    }
                    Instruction::IfGoto {
                        cond: Operand::Const(cond),
                        then_label,
                        else_label,
                    } => Some(Instruction::Goto {
                        label: if cond != 0 { then_label } else { else_label },
                    }),
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    *instr = replacement;
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Dataflow propagation of value equivalences. Within a block each
/// source operand is rewritten to the best representative of its class
/// (a literal if known, otherwise a named variable over a temporary);
/// assignments establish equivalences, stores and calls invalidate
/// everything. Block entry states merge the predecessors' exit states by
/// intersection and iterate on a FIFO worklist until they stabilize.
struct ConstantValuePropagation;

impl ConstantValuePropagation {
    fn replace(
        equivalences: &EquivalenceClasses<Operand>,
        temps: &[bool],
        operand: Operand,
    ) -> Operand {
        let class = equivalences.find(&operand);
        if class.len() == 1 {
            return operand;
        }
        for &elem in &class {
            if matches!(elem, Operand::Const(_)) {
                return elem;
            }
        }
        if let Operand::Var(v) = operand {
            if temps[v] {
                for &elem in &class {
                    if let Operand::Var(w) = elem {
                        if !temps[w] {
                            return elem;
                        }
                    }
                }
            }
        }
        operand
    }

    /// Transform one block under an entry state; returns whether any
    /// instruction changed, and the exit state.
    fn transform(
        block: &mut crate::ir::BasicBlock,
        mut equivalences: EquivalenceClasses<Operand>,
        temps: &[bool],
    ) -> (bool, EquivalenceClasses<Operand>) {
        let mut changed = false;
        for instr in &mut block.instructions {
            let before = instr.clone();
            match instr {
                Instruction::Binop { lhs, rhs, .. } => {
                    *lhs = Self::replace(&equivalences, temps, *lhs);
                    *rhs = Self::replace(&equivalences, temps, *rhs);
                }
                Instruction::Assign { value, .. }
                | Instruction::Store { value, .. }
                | Instruction::Return { value } => {
                    *value = Self::replace(&equivalences, temps, *value);
                }
                Instruction::Call { arguments, .. } => {
                    for argument in arguments {
                        *argument = Self::replace(&equivalences, temps, *argument);
                    }
                }
                Instruction::IfGoto { cond, .. } => {
                    *cond = Self::replace(&equivalences, temps, *cond);
                }
                _ => {}
            }
            if *instr != before {
                changed = true;
            }

            // The destination's old equivalences die with the write.
            if let Some(dst) = instr.dst() {
                equivalences.kill(&Operand::Var(dst));
            }

            match instr {
                Instruction::Assign { dst, value } => {
                    equivalences.union(Operand::Var(*dst), *value);
                }
                Instruction::Store { .. } | Instruction::Call { .. } => {
                    // Memory writes and calls have unknown effects.
                    equivalences = EquivalenceClasses::new();
                }
                _ => {}
            }
        }
        (changed, equivalences)
    }
}

impl Pass for ConstantValuePropagation {
    fn name(&self) -> &'static str {
        "ConstantValuePropagation"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let cfg = function.cfg();
        let temps: Vec<bool> = (0..function.var_count())
            .map(|v| function.var(v).temporary)
            .collect();
        let entry = function.entry_block();

        let mut states: HashMap<usize, EquivalenceClasses<Operand>> = function
            .block_order
            .iter()
            .map(|&b| (b, EquivalenceClasses::new()))
            .collect();
        let mut worklist: VecDeque<usize> = function.block_order.iter().copied().collect();
        let mut changed = false;

        while let Some(block) = worklist.pop_front() {
            let d_in = if block == entry {
                EquivalenceClasses::new()
            } else {
                let incoming: Vec<EquivalenceClasses<Operand>> = cfg.predecessors[block]
                    .iter()
                    .map(|p| states[p].clone())
                    .collect();
                EquivalenceClasses::merge(&incoming)
            };

            let (block_changed, d_out) =
                Self::transform(function.block_mut(block), d_in, &temps);
            changed |= block_changed;

            if d_out != states[&block] {
                states.insert(block, d_out);
                for &succ in &cfg.successors[block] {
                    worklist.push_back(succ);
                }
            }
        }
        changed
    }
}

/// Fold a block into its single predecessor when that predecessor has it
/// as single successor.
struct MergeBlocks;

impl Pass for MergeBlocks {
    fn name(&self) -> &'static str {
        "MergeBlocks"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let cfg = function.cfg();
            let entry = function.entry_block();
            let candidate = function.block_order.iter().copied().find_map(|block| {
                let succs = &cfg.successors[block];
                if succs.len() != 1 {
                    return None;
                }
                let succ = succs[0];
                if succ == block || succ == entry || cfg.predecessors[succ].len() != 1 {
                    return None;
                }
                Some((block, succ))
            });
            let Some((block, succ)) = candidate else {
                return changed;
            };

            let moved = std::mem::take(&mut function.block_mut(succ).instructions);
            let target = function.block_mut(block);
            let goto = target.instructions.pop();
            assert!(
                matches!(goto, Some(Instruction::Goto { .. })),
                "single-successor block must end in a goto"
            );
            target.instructions.extend(moved);
            function.remove_block(succ);
            changed = true;
        }
    }
}

/// Bypass blocks that consist of a single unconditional jump, and drop
/// unreachable instructions after a return.
struct RedundantJumpElimination;

impl Pass for RedundantJumpElimination {
    fn name(&self) -> &'static str {
        "RedundantJumpElimination"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = false;
        let cfg = function.cfg();
        for &this in &function.block_order.clone() {
            if cfg.successors[this].len() == 1 && function.block(this).instructions.len() == 1 {
                let target = cfg.successors[this][0];
                if target != this {
                    for &prev in &cfg.predecessors[this] {
                        let retargeted = match function.block_mut(prev).instructions.last_mut() {
                            Some(Instruction::Goto { label }) if *label == this => {
                                *label = target;
                                true
                            }
                            Some(Instruction::IfGoto {
                                then_label,
                                else_label,
                                ..
                            }) => {
                                let mut any = false;
                                if *then_label == this {
                                    *then_label = target;
                                    any = true;
                                }
                                if *else_label == this {
                                    *else_label = target;
                                    any = true;
                                }
                                any
                            }
                            _ => false,
                        };
                        changed |= retargeted;
                    }
                }
            }

            // Remove everything after a return statement.
            let instructions = &mut function.block_mut(this).instructions;
            if let Some(pos) = instructions
                .iter()
                .position(|i| matches!(i, Instruction::Return { .. }))
            {
                if pos + 1 < instructions.len() {
                    instructions.truncate(pos + 1);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Remove all non-entry blocks without predecessors.
struct DeadBlockElimination;

impl Pass for DeadBlockElimination {
    fn name(&self) -> &'static str {
        "DeadBlockElimination"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = false;
        let cfg = function.cfg();
        let entry = function.entry_block();
        for &block in &function.block_order.clone() {
            if block != entry && cfg.predecessors[block].is_empty() {
                debug!("{}: {} has no predecessors", function.name, block);
                function.remove_block(block);
                changed = true;
            }
        }
        changed
    }
}

/// A local that is never read is dead: remove it and every instruction
/// that writes it. Parameters are not eligible; address-taken variables
/// appear as `Reference` source operands and therefore count as read.
struct DeadVariableElimination;

impl Pass for DeadVariableElimination {
    fn name(&self) -> &'static str {
        "DeadVariableElimination"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut read: HashSet<VarId> = HashSet::new();
        for &block in &function.block_order {
            for instr in &function.block(block).instructions {
                for operand in instr.src_operands() {
                    if let Operand::Var(v) = operand {
                        read.insert(v);
                    }
                }
            }
        }

        let dead: HashSet<VarId> = function
            .locals
            .iter()
            .copied()
            .filter(|v| !read.contains(v))
            .collect();
        if dead.is_empty() {
            return false;
        }

        function.locals.retain(|v| !dead.contains(v));
        for &block in &function.block_order.clone() {
            function
                .block_mut(block)
                .instructions
                .retain(|instr| instr.dst().is_none_or(|dst| !dead.contains(&dst)));
        }
        true
    }
}
