//! IR interpreter with an explicit linear memory.
//!
//! The whole program is loaded into one flat array of memory words: a
//! bootstrap call and a halt sentinel at the bottom, every function's
//! instructions linearized above them, and the stack growing downward
//! from the top. Four registers drive execution: instruction pointer,
//! heap pointer (top of the loaded code), stack pointer and base
//! pointer.
//!
//! Each function's frame layout is `[return-info, params..., locals...]`;
//! a variable's slot is its index in that layout and all accesses go
//! through `memory[bp - slot]`.

use crate::ir::{BinOp, BlockId, FuncId, Instruction, Operand, TranslationUnit, VarId};
use std::collections::HashMap;
use tracing::info;

/// Memory words available to code, stack and heap (reference size).
pub const MEMORY_WORDS: usize = 1001;

/// One memory word.
#[derive(Debug, Clone)]
enum Slot {
    /// Uninitialized; fetching it as an instruction halts the machine.
    Empty,
    Value(i64),
    Instr { func: FuncId, instr: Instruction },
    /// The bootstrap call that launches `main`.
    StartCall { main: FuncId },
    /// Frame slot 0: everything needed to return from a call.
    ReturnInfo {
        callee: FuncId,
        return_pc: usize,
        saved_bp: usize,
        result_addr: usize,
    },
}

/// Per-function frame layout: slot index by variable id.
#[derive(Debug, Clone)]
struct FrameLayout {
    slots: Vec<Option<usize>>,
    size: usize,
}

#[derive(Debug)]
pub struct Interpreter<'p> {
    unit: &'p TranslationUnit,
    memory: Vec<Slot>,
    labels: HashMap<(FuncId, BlockId), usize>,
    entries: Vec<usize>,
    frames: Vec<FrameLayout>,
    pc: usize,
    hp: usize,
    sp: usize,
    bp: usize,
    pub step_count: usize,
    /// Print every fetched instruction.
    pub trace_instr: bool,
    /// Print calls and returns.
    pub trace_calls: bool,
}

impl<'p> Interpreter<'p> {
    /// Load a translation unit. Fails if there is no `main` or the
    /// program does not fit into memory.
    pub fn new(unit: &'p TranslationUnit) -> Result<Self, String> {
        let main = unit
            .functions
            .iter()
            .position(|f| f.name == "main")
            .ok_or_else(|| "no main function found".to_string())?;

        let mut memory = vec![Slot::Empty; MEMORY_WORDS];
        memory[0] = Slot::StartCall { main };
        // memory[1] stays empty: the halt sentinel main returns to.

        let mut labels = HashMap::new();
        let mut entries = Vec::with_capacity(unit.functions.len());
        let mut frames = Vec::with_capacity(unit.functions.len());
        let mut next = 2usize;

        for (func_id, function) in unit.functions.iter().enumerate() {
            for &block in &function.block_order {
                labels.insert((func_id, block), next);
                for instr in &function.block(block).instructions {
                    if next >= MEMORY_WORDS {
                        return Err("program does not fit into memory".to_string());
                    }
                    memory[next] = Slot::Instr {
                        func: func_id,
                        instr: instr.clone(),
                    };
                    next += 1;
                }
            }
            entries.push(labels[&(func_id, function.entry_block())]);

            // Frame layout: return info, then parameters, then locals.
            let mut slots = vec![None; function.var_count()];
            let mut size = 1usize;
            for &param in &function.parameters {
                slots[param] = Some(size);
                size += 1;
            }
            for &local in &function.locals {
                slots[local] = Some(size);
                size += 1;
            }
            frames.push(FrameLayout { slots, size });
        }

        Ok(Interpreter {
            unit,
            memory,
            labels,
            entries,
            frames,
            pc: 0,
            hp: next,
            sp: MEMORY_WORDS - 1,
            bp: MEMORY_WORDS - 1,
            step_count: 0,
            trace_instr: false,
            trace_calls: false,
        })
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn bp(&self) -> usize {
        self.bp
    }

    /// Run until the program halts or `max_steps` is exceeded; the
    /// timeout returns `Ok(None)` so callers can classify
    /// non-termination.
    pub fn exec(&mut self, max_steps: Option<usize>) -> Result<Option<i64>, String> {
        loop {
            if let Some(max) = max_steps {
                if self.step_count >= max {
                    return Ok(None);
                }
            }
            self.step_count += 1;
            if let Some(result) = self.step()? {
                info!("interpreter executed {} steps", self.step_count);
                return Ok(Some(result));
            }
        }
    }

    fn slot_of(&self, func: FuncId, var: VarId) -> Result<usize, String> {
        self.frames[func].slots[var]
            .ok_or_else(|| format!("variable without frame slot at pc {}", self.pc))
    }

    fn read_value(&self, addr: usize) -> Result<i64, String> {
        match self.memory.get(addr) {
            Some(Slot::Value(v)) => Ok(*v),
            Some(Slot::Empty) => Err(format!(
                "read of uninitialized memory at address {} (pc {})",
                addr, self.pc
            )),
            _ => Err(format!("invalid operand at address {} (pc {})", addr, self.pc)),
        }
    }

    fn read_operand(&self, func: FuncId, operand: Operand) -> Result<i64, String> {
        match operand {
            Operand::Const(c) => Ok(c),
            Operand::Var(v) => self.read_value(self.bp - self.slot_of(func, v)?),
        }
    }

    fn write_var(&mut self, func: FuncId, var: VarId, value: i64) -> Result<(), String> {
        let addr = self.bp - self.slot_of(func, var)?;
        self.memory[addr] = Slot::Value(value);
        Ok(())
    }

    /// Execute one instruction; `Some(result)` when the program halts.
    fn step(&mut self) -> Result<Option<i64>, String> {
        let fetched = self.memory[self.pc].clone();
        if self.trace_instr {
            match &fetched {
                Slot::Instr { func, instr } => {
                    let function = &self.unit.functions[*func];
                    println!(
                        "TRACE {:>4} {}",
                        self.pc,
                        crate::ir::format_instruction(self.unit, function, instr)
                    );
                }
                other => println!("TRACE {:>4} {:?}", self.pc, other),
            }
        }
        self.pc += 1;

        match fetched {
            Slot::Empty => {
                // The halt sentinel: the program result sits in the main
                // return slot at the top of memory.
                let result = self.read_value(MEMORY_WORDS - 1)?;
                Ok(Some(result))
            }
            Slot::StartCall { main } => {
                self.enter_frame(main, &[], self.bp, MEMORY_WORDS - 1)?;
                Ok(None)
            }
            Slot::Instr { func, instr } => {
                self.execute(func, instr)?;
                Ok(None)
            }
            Slot::Value(_) | Slot::ReturnInfo { .. } => Err(format!(
                "unsupported operation: executing data at pc {}",
                self.pc - 1
            )),
        }
    }

    fn enter_frame(
        &mut self,
        callee: FuncId,
        args: &[i64],
        old_bp: usize,
        result_addr: usize,
    ) -> Result<(), String> {
        let layout_size = self.frames[callee].size;
        self.bp = self.sp;
        self.sp = self
            .sp
            .checked_sub(layout_size)
            .ok_or_else(|| "stack overflow".to_string())?;
        if self.sp < self.hp {
            return Err("stack overflow".to_string());
        }
        self.memory[self.bp] = Slot::ReturnInfo {
            callee,
            return_pc: self.pc,
            saved_bp: old_bp,
            result_addr,
        };
        let params = self.unit.functions[callee].parameters.clone();
        for (&param, &arg) in params.iter().zip(args) {
            let slot = self.slot_of(callee, param)?;
            self.memory[self.bp - slot] = Slot::Value(arg);
        }
        self.pc = self.entries[callee];
        Ok(())
    }

    fn execute(&mut self, func: FuncId, instr: Instruction) -> Result<(), String> {
        match instr {
            Instruction::Binop { op, dst, lhs, rhs } => {
                let lhs = self.read_operand(func, lhs)?;
                let rhs = self.read_operand(func, rhs)?;
                if op == BinOp::Div && rhs == 0 {
                    return Err(format!("division by zero at pc {}", self.pc - 1));
                }
                self.write_var(func, dst, op.eval(lhs, rhs))
            }
            Instruction::Assign { dst, value } => {
                let value = self.read_operand(func, value)?;
                self.write_var(func, dst, value)
            }
            Instruction::Reference { dst, obj } => {
                let addr = self.bp - self.slot_of(func, obj)?;
                self.write_var(func, dst, addr as i64)
            }
            Instruction::Load { dst, ptr } => {
                let addr = self.pointer(func, ptr)?;
                let value = self.read_value(addr)?;
                self.write_var(func, dst, value)
            }
            Instruction::Store { ptr, value } => {
                let addr = self.pointer(func, ptr)?;
                let value = self.read_operand(func, value)?;
                self.memory[addr] = Slot::Value(value);
                Ok(())
            }
            Instruction::IfGoto {
                cond,
                then_label,
                else_label,
            } => {
                let cond = self.read_operand(func, cond)?;
                let target = if cond != 0 { then_label } else { else_label };
                self.pc = self.labels[&(func, target)];
                Ok(())
            }
            Instruction::Goto { label } => {
                self.pc = self.labels[&(func, label)];
                Ok(())
            }
            Instruction::Call {
                dst,
                callee,
                arguments,
            } => {
                let args: Vec<i64> = arguments
                    .iter()
                    .map(|&a| self.read_operand(func, a))
                    .collect::<Result<_, _>>()?;
                if self.trace_calls {
                    println!("CALL {} {:?}", self.unit.functions[callee].name, args);
                }
                let result_addr = self.bp - self.slot_of(func, dst)?;
                self.enter_frame(callee, &args, self.bp, result_addr)
            }
            Instruction::Return { value } => {
                let value = self.read_operand(func, value)?;
                let Slot::ReturnInfo {
                    callee,
                    return_pc,
                    saved_bp,
                    result_addr,
                } = self.memory[self.bp].clone()
                else {
                    return Err(format!("return without call frame at pc {}", self.pc - 1));
                };
                if self.trace_calls {
                    println!("RETURN {} {}", self.unit.functions[callee].name, value);
                }
                self.memory[result_addr] = Slot::Value(value);
                self.sp = self.bp;
                self.bp = saved_bp;
                self.pc = return_pc;
                Ok(())
            }
        }
    }

    /// Read a pointer variable and bounds-check it as a memory address.
    fn pointer(&self, func: FuncId, ptr: VarId) -> Result<usize, String> {
        let value = self.read_value(self.bp - self.slot_of(func, ptr)?)?;
        let addr = usize::try_from(value)
            .map_err(|_| format!("invalid pointer {} at pc {}", value, self.pc - 1))?;
        if addr >= MEMORY_WORDS {
            return Err(format!("invalid pointer {} at pc {}", value, self.pc - 1));
        }
        Ok(addr)
    }

    /// Render the loaded memory image, collapsing empty runs.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut addr_labels: HashMap<usize, Vec<String>> = HashMap::new();
        for ((func, block), &addr) in &self.labels {
            let function = &self.unit.functions[*func];
            addr_labels
                .entry(addr)
                .or_default()
                .push(format!("{}.{}", function.name, function.block(*block).name));
        }

        let mut out = String::new();
        let mut dots = false;
        for (addr, slot) in self.memory.iter().enumerate() {
            let text = match slot {
                Slot::Empty => {
                    if !dots {
                        out.push_str("...\n");
                    }
                    dots = true;
                    continue;
                }
                Slot::Value(v) => v.to_string(),
                Slot::Instr { func, instr } => {
                    let function = &self.unit.functions[*func];
                    crate::ir::format_instruction(self.unit, function, instr)
                }
                Slot::StartCall { main } => {
                    format!("Call func:{}", self.unit.functions[*main].name)
                }
                Slot::ReturnInfo {
                    return_pc,
                    result_addr,
                    ..
                } => format!("(ret pc={}, result=&{})", return_pc, result_addr),
            };
            dots = false;
            let mut extra = String::new();
            if let Some(labels) = addr_labels.get(&addr) {
                extra = format!(" # {}", labels.join(", "));
            }
            let _ = writeln!(out, "{:>4}   {:<40}{}", addr, text, extra);
        }
        out
    }
}
