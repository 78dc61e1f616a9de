//! x86-32 backend.
//!
//! Emits GNU-assembler syntax for the post-optimizer IR and links the
//! result against a tiny embedded C runtime with `gcc -m32`. Register
//! allocation and the calling convention are pluggable strategies:
//!
//! * allocator `spilling` touches memory on every access and never keeps
//!   state between instructions;
//! * allocator `remember` caches which register holds which value and
//!   delays stores until memory must be observable (branches, calls,
//!   stores, loads);
//! * convention `stack` pushes arguments right to left;
//! * convention `register` passes up to six arguments in registers with
//!   no `push` at all and falls back to the stack convention beyond
//!   that.

use crate::ir::{
    Function, Instruction, Operand, TranslationUnit, VarId, format_instruction,
};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;
use std::process::Command;
use tracing::info;

/// The C runtime the executable links against (built by `gcc -m32`).
static RUNTIME_C: &str = include_str!("../runtime/l0-runtime.c");

/// Every function symbol carries this prefix. Static overloading would
/// hook in here.
const MANGLE_PREFIX: &str = "l0_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
}

impl Reg {
    pub const ALL: [Reg; 6] = [Reg::Eax, Reg::Ebx, Reg::Ecx, Reg::Edx, Reg::Esi, Reg::Edi];

    fn as_str(self) -> &'static str {
        match self {
            Reg::Eax => "%eax",
            Reg::Ebx => "%ebx",
            Reg::Ecx => "%ecx",
            Reg::Edx => "%edx",
            Reg::Esi => "%esi",
            Reg::Edi => "%edi",
        }
    }

    fn idx(self) -> usize {
        Reg::ALL.iter().position(|&r| r == self).expect("known register")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAllocatorKind {
    Spilling,
    Remember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConventionKind {
    Stack,
    Register,
}

/// Frame offsets relative to `%ebp`, indexed by variable id.
type FrameMap = Vec<Option<i32>>;

fn slot_operand(frame: &FrameMap, var: VarId) -> String {
    let offset = frame[var].expect("variable without frame slot");
    format!("{}(%ebp)", offset)
}

/// Collects the assembly text and counts emitted instructions.
#[derive(Debug, Default)]
struct Emitter {
    out: String,
    instr_count: usize,
}

impl Emitter {
    fn label(&mut self, name: &str) {
        let _ = writeln!(self.out, "{}:", name);
    }

    fn raw(&mut self, line: &str) {
        let _ = writeln!(self.out, "{}", line);
    }

    fn instr(&mut self, opcode: &str, args: &[&str]) {
        self.instr_c(opcode, args, "");
    }

    fn instr_c(&mut self, opcode: &str, args: &[&str], comment: &str) {
        let comment = if comment.is_empty() {
            String::new()
        } else {
            format!("\t# {}", comment)
        };
        let _ = writeln!(self.out, "\t{} {}{}", opcode, args.join(", "), comment);
        self.instr_count += 1;
    }

    fn comment(&mut self, text: &str) {
        let _ = writeln!(self.out, "\t## {}", text);
    }
}

trait RegisterAllocator {
    fn before_function(&mut self, function: &Function);
    fn before_basic_block(&mut self);
    fn before_instruction(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        instr: &Instruction,
    );
    fn after_instruction(&mut self, em: &mut Emitter, function: &Function);

    /// Bring `src` into a register; `dst` pins the register, `modify`
    /// requests a privately owned copy.
    fn load(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        src: Operand,
        dst: Option<Reg>,
        modify: bool,
    ) -> Reg;

    /// Reserve a register for a pure write.
    fn alloc_register(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        dst: Option<Reg>,
    ) -> Reg;

    fn free_register(&mut self, reg: Reg);

    /// Record that `reg` now holds `var`.
    fn write(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        reg: Reg,
        var: VarId,
    );

    /// Load the address of a variable's slot.
    fn reference(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        obj: VarId,
        dst: Option<Reg>,
    ) -> Reg;

    /// Forget any cached value in `reg` (clobbered by the instruction).
    fn kill_register(&mut self, _reg: Reg) {}

    /// Conservatively drop all cached values, e.g. after a call.
    fn reset_state(&mut self);

    fn dump_state(&self, em: &mut Emitter, function: &Function);
}

/// Stateless allocator: every access goes to the stack slot. All
/// registers are free at the start of every instruction.
struct SpillingRegisterAllocator {
    available: Vec<Reg>,
}

impl SpillingRegisterAllocator {
    fn new() -> Self {
        SpillingRegisterAllocator {
            available: Reg::ALL.to_vec(),
        }
    }
}

impl RegisterAllocator for SpillingRegisterAllocator {
    fn before_function(&mut self, _function: &Function) {
        self.available = Reg::ALL.to_vec();
    }

    fn before_basic_block(&mut self) {}

    fn before_instruction(
        &mut self,
        _em: &mut Emitter,
        _frame: &FrameMap,
        _function: &Function,
        _instr: &Instruction,
    ) {
        self.available = Reg::ALL.to_vec();
    }

    fn after_instruction(&mut self, _em: &mut Emitter, _function: &Function) {}

    fn load(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        src: Operand,
        dst: Option<Reg>,
        _modify: bool,
    ) -> Reg {
        let reg = self.alloc_register(em, frame, function, dst);
        match src {
            Operand::Const(value) => {
                em.instr("mov", &[&format!("${}", value), reg.as_str()]);
            }
            Operand::Var(var) => {
                em.instr_c(
                    "mov",
                    &[&slot_operand(frame, var), reg.as_str()],
                    &format!("load {}", function.var(var).name),
                );
            }
        }
        reg
    }

    fn alloc_register(
        &mut self,
        _em: &mut Emitter,
        _frame: &FrameMap,
        _function: &Function,
        dst: Option<Reg>,
    ) -> Reg {
        match dst {
            None => self.available.pop().expect("out of registers"),
            Some(reg) => {
                let pos = self
                    .available
                    .iter()
                    .position(|&r| r == reg)
                    .unwrap_or_else(|| panic!("register {} was already allocated", reg.as_str()));
                self.available.remove(pos)
            }
        }
    }

    fn free_register(&mut self, reg: Reg) {
        assert!(!self.available.contains(&reg));
        self.available.push(reg);
    }

    fn write(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        _function: &Function,
        reg: Reg,
        var: VarId,
    ) {
        em.instr("mov", &[reg.as_str(), &slot_operand(frame, var)]);
    }

    fn reference(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        obj: VarId,
        dst: Option<Reg>,
    ) -> Reg {
        let reg = self.alloc_register(em, frame, function, dst);
        em.instr("lea", &[&slot_operand(frame, obj), reg.as_str()]);
        reg
    }

    fn reset_state(&mut self) {}

    fn dump_state(&self, _em: &mut Emitter, _function: &Function) {}
}

/// Caching allocator: tracks which value each register holds and whether
/// it is dirty (written but not yet stored back). Dirty registers are
/// flushed before every observation point; only variables whose address
/// was taken need flushing around loads and stores.
struct RememberingRegisterAllocator {
    values: [Option<Operand>; 6],
    dirty: [bool; 6],
    free: [bool; 6],
    referenced: HashSet<VarId>,
}

impl RememberingRegisterAllocator {
    fn new() -> Self {
        RememberingRegisterAllocator {
            values: [None; 6],
            dirty: [false; 6],
            free: [true; 6],
            referenced: HashSet::new(),
        }
    }

    fn spill_register(&mut self, em: &mut Emitter, frame: &FrameMap, function: &Function, reg: Reg) {
        let i = reg.idx();
        if let Some(Operand::Var(var)) = self.values[i] {
            if self.dirty[i] {
                em.instr_c(
                    "mov",
                    &[reg.as_str(), &slot_operand(frame, var)],
                    &format!("spill {}", function.var(var).name),
                );
                self.dirty[i] = false;
            }
        }
    }

    fn spill_all_dirty(&mut self, em: &mut Emitter, frame: &FrameMap, function: &Function) {
        for reg in Reg::ALL {
            self.spill_register(em, frame, function, reg);
        }
    }

    /// Flush (and forget) cached variables whose address has been taken;
    /// memory operations may read or write them behind our back.
    fn sync_referenced(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        kill: bool,
    ) {
        for reg in Reg::ALL {
            let i = reg.idx();
            if let Some(Operand::Var(var)) = self.values[i] {
                if self.referenced.contains(&var) {
                    self.spill_register(em, frame, function, reg);
                    if kill {
                        self.values[i] = None;
                    }
                }
            }
        }
    }

    /// Prioritized register search among the free ones: empty first,
    /// then clean, then any. With `nonspill` the dirty fallback is
    /// skipped.
    fn find_register(&self, nonspill: bool) -> Option<Reg> {
        let free: Vec<Reg> = Reg::ALL.iter().copied().filter(|r| self.free[r.idx()]).collect();
        for &reg in &free {
            if self.values[reg.idx()].is_none() {
                return Some(reg);
            }
        }
        for &reg in &free {
            if !self.dirty[reg.idx()] {
                return Some(reg);
            }
        }
        if nonspill {
            return None;
        }
        free.first().copied()
    }

    fn load_from_register(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        src: Operand,
        cache_reg: Reg,
        dst: Option<Reg>,
        modify: bool,
    ) -> Reg {
        let mut target = cache_reg;
        match dst {
            Some(dst) if dst != cache_reg => {
                if self.free[cache_reg.idx()] {
                    // The old value was not claimed; swap it out of the way.
                    em.instr("xchg", &[cache_reg.as_str(), dst.as_str()]);
                    self.values.swap(cache_reg.idx(), dst.idx());
                    self.dirty.swap(cache_reg.idx(), dst.idx());
                } else {
                    // Both registers are claimed; flush whatever the
                    // target held and copy.
                    self.spill_register(em, frame, function, dst);
                    em.instr("mov", &[cache_reg.as_str(), dst.as_str()]);
                    self.values[dst.idx()] = Some(src);
                    self.dirty[dst.idx()] = false;
                }
                target = dst;
            }
            Some(_) => {}
            None => {
                if modify {
                    // The value gets modified anyway; keep the cache
                    // intact by copying into a fresh register.
                    if let Some(fresh) = self.find_register(true) {
                        em.instr("mov", &[cache_reg.as_str(), fresh.as_str()]);
                        self.values[fresh.idx()] = Some(src);
                        self.dirty[fresh.idx()] = false;
                        target = fresh;
                    }
                }
            }
        }

        if modify {
            self.spill_register(em, frame, function, target);
        }
        self.free[target.idx()] = false;
        target
    }
}

impl RegisterAllocator for RememberingRegisterAllocator {
    fn before_function(&mut self, function: &Function) {
        self.referenced.clear();
        for &block in &function.block_order {
            for instr in &function.block(block).instructions {
                if let Instruction::Reference { obj, .. } = instr {
                    self.referenced.insert(*obj);
                }
            }
        }
        self.reset_state();
    }

    fn before_basic_block(&mut self) {
        self.reset_state();
    }

    fn before_instruction(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        instr: &Instruction,
    ) {
        self.dump_state(em, function);
        self.free = [true; 6];

        match instr {
            // End of the basic block: the state does not survive.
            Instruction::Goto { .. } | Instruction::IfGoto { .. } => {
                self.spill_all_dirty(em, frame, function);
            }
            // The callee observes memory, and reset_state() will drop
            // every cached value afterwards.
            Instruction::Call { .. } => {
                self.spill_all_dirty(em, frame, function);
            }
            // Stores may alias any address-taken variable.
            Instruction::Store { .. } => {
                self.sync_referenced(em, frame, function, true);
            }
            // Loads observe memory; it must be up to date, but the
            // cache stays valid.
            Instruction::Load { .. } => {
                self.sync_referenced(em, frame, function, false);
            }
            _ => {}
        }
    }

    fn after_instruction(&mut self, em: &mut Emitter, function: &Function) {
        self.dump_state(em, function);
    }

    fn load(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        src: Operand,
        dst: Option<Reg>,
        modify: bool,
    ) -> Reg {
        // Is the value already in the virtual register file?
        for reg in Reg::ALL {
            if self.values[reg.idx()] == Some(src) {
                return self.load_from_register(em, frame, function, src, reg, dst, modify);
            }
        }

        // Not cached: load from memory.
        let reg = self.alloc_register(em, frame, function, dst);
        match src {
            Operand::Const(value) => {
                em.instr("mov", &[&format!("${}", value), reg.as_str()]);
            }
            Operand::Var(var) => {
                em.instr_c(
                    "mov",
                    &[&slot_operand(frame, var), reg.as_str()],
                    &format!("load {}", function.var(var).name),
                );
            }
        }
        self.values[reg.idx()] = Some(src);
        self.dirty[reg.idx()] = false;
        reg
    }

    fn alloc_register(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        dst: Option<Reg>,
    ) -> Reg {
        let reg = match dst {
            Some(reg) => reg,
            None => self.find_register(false).expect("out of registers"),
        };
        self.spill_register(em, frame, function, reg);
        self.values[reg.idx()] = None;
        self.dirty[reg.idx()] = false;
        self.free[reg.idx()] = false;
        reg
    }

    fn free_register(&mut self, reg: Reg) {
        self.free[reg.idx()] = true;
    }

    fn write(
        &mut self,
        _em: &mut Emitter,
        _frame: &FrameMap,
        _function: &Function,
        reg: Reg,
        var: VarId,
    ) {
        // The actual mov to the slot is delayed until a flush point.
        assert!(!self.dirty[reg.idx()], "write to a register with a pending spill");
        // Any other register caching this variable is now stale.
        for other in Reg::ALL {
            if other != reg && self.values[other.idx()] == Some(Operand::Var(var)) {
                self.values[other.idx()] = None;
                self.dirty[other.idx()] = false;
            }
        }
        self.values[reg.idx()] = Some(Operand::Var(var));
        self.dirty[reg.idx()] = true;
    }

    fn reference(
        &mut self,
        em: &mut Emitter,
        frame: &FrameMap,
        function: &Function,
        obj: VarId,
        dst: Option<Reg>,
    ) -> Reg {
        let reg = self.alloc_register(em, frame, function, dst);
        em.instr("lea", &[&slot_operand(frame, obj), reg.as_str()]);
        self.values[reg.idx()] = None;
        self.dirty[reg.idx()] = false;
        reg
    }

    fn kill_register(&mut self, reg: Reg) {
        self.values[reg.idx()] = None;
        self.dirty[reg.idx()] = false;
    }

    fn reset_state(&mut self) {
        self.values = [None; 6];
        self.dirty = [false; 6];
        self.free = [true; 6];
    }

    fn dump_state(&self, em: &mut Emitter, function: &Function) {
        let mut entries = Vec::new();
        for reg in Reg::ALL {
            let i = reg.idx();
            let Some(value) = self.values[i] else {
                continue;
            };
            let value = match value {
                Operand::Var(v) => function.var(v).name.clone(),
                Operand::Const(c) => c.to_string(),
            };
            entries.push(format!("{}={},d={}", reg.as_str(), value, self.dirty[i] as u8));
        }
        if !entries.is_empty() {
            em.comment(&format!("RA-state: {}", entries.join(", ")));
        }
    }
}

trait CallingConvention {
    /// Emit the frame setup and return the frame map.
    fn function_entry(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        function: &Function,
    ) -> FrameMap;

    fn call_prologue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        arguments: &[Operand],
    );

    fn call_epilogue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        dst: VarId,
        argc: usize,
    );

    fn function_return(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        value: Operand,
    );
}

/// Arguments pushed right to left; result in `%eax`; `enter`/`leave`
/// frames. Parameters sit at `8(%ebp)` upward, locals below `%ebp`.
struct StackCallingConvention;

impl CallingConvention for StackCallingConvention {
    fn function_entry(
        &mut self,
        em: &mut Emitter,
        _ra: &mut dyn RegisterAllocator,
        function: &Function,
    ) -> FrameMap {
        let mut frame: FrameMap = vec![None; function.var_count()];
        for (idx, &param) in function.parameters.iter().enumerate() {
            frame[param] = Some(4 * idx as i32 + 8);
        }
        let slots = function.locals.len();
        em.instr("enter", &[&format!("${}", slots * 4), "$0"]);
        for (idx, &var) in function.locals.iter().enumerate() {
            frame[var] = Some(-4 * idx as i32 - 4);
        }
        frame
    }

    fn call_prologue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        arguments: &[Operand],
    ) {
        for &argument in arguments.iter().rev() {
            let reg = ra.load(em, frame, function, argument, None, false);
            em.instr("push", &[reg.as_str()]);
            ra.free_register(reg);
        }
        ra.alloc_register(em, frame, function, Some(Reg::Eax));
    }

    fn call_epilogue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        dst: VarId,
        argc: usize,
    ) {
        if argc > 0 {
            em.instr("add", &[&format!("${}", argc * 4), "%esp"]);
        }
        // The call clobbers everything; the result arrives in %eax.
        ra.reset_state();
        ra.write(em, frame, function, Reg::Eax, dst);
    }

    fn function_return(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        value: Operand,
    ) {
        ra.load(em, frame, function, value, Some(Reg::Eax), false);
        em.instr("leave", &[]);
        em.instr("ret", &[]);
    }
}

/// Up to six arguments travel in registers (in `Reg::ALL` order) and the
/// result comes back in `%eax` without any `push`; beyond that capacity
/// every part falls back to the stack convention.
struct RegisterCallingConvention {
    stack: StackCallingConvention,
}

impl RegisterCallingConvention {
    fn new() -> Self {
        RegisterCallingConvention {
            stack: StackCallingConvention,
        }
    }
}

impl CallingConvention for RegisterCallingConvention {
    fn function_entry(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        function: &Function,
    ) -> FrameMap {
        if function.parameters.len() > Reg::ALL.len() {
            return self.stack.function_entry(em, ra, function);
        }

        // Slots for parameters and locals; incoming registers are
        // stored to their slots right away.
        let mut frame: FrameMap = vec![None; function.var_count()];
        let total = function.parameters.len() + function.locals.len();
        em.instr("enter", &[&format!("${}", total * 4), "$0"]);
        let mut offset = -4i32;
        for &param in &function.parameters {
            frame[param] = Some(offset);
            offset -= 4;
        }
        for &var in &function.locals {
            frame[var] = Some(offset);
            offset -= 4;
        }
        for (idx, &param) in function.parameters.iter().enumerate() {
            em.instr_c(
                "mov",
                &[Reg::ALL[idx].as_str(), &slot_operand(&frame, param)],
                &format!("save {}", function.var(param).name),
            );
        }
        ra.dump_state(em, function);
        frame
    }

    fn call_prologue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        arguments: &[Operand],
    ) {
        if arguments.len() > Reg::ALL.len() {
            return self.stack.call_prologue(em, ra, frame, function, arguments);
        }
        for (idx, &argument) in arguments.iter().enumerate() {
            ra.load(em, frame, function, argument, Some(Reg::ALL[idx]), false);
        }
    }

    fn call_epilogue(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        dst: VarId,
        argc: usize,
    ) {
        if argc > Reg::ALL.len() {
            return self.stack.call_epilogue(em, ra, frame, function, dst, argc);
        }
        ra.reset_state();
        ra.write(em, frame, function, Reg::Eax, dst);
    }

    fn function_return(
        &mut self,
        em: &mut Emitter,
        ra: &mut dyn RegisterAllocator,
        frame: &FrameMap,
        function: &Function,
        value: Operand,
    ) {
        self.stack.function_return(em, ra, frame, function, value);
    }
}

pub struct X86Backend {
    ra: Box<dyn RegisterAllocator>,
    cc: Box<dyn CallingConvention>,
    em: Emitter,
}

impl X86Backend {
    pub fn new(ra: RegisterAllocatorKind, cc: CallingConventionKind) -> Self {
        info!(
            "initialize x86 backend: register allocator {:?}, calling convention {:?}",
            ra, cc
        );
        let ra: Box<dyn RegisterAllocator> = match ra {
            RegisterAllocatorKind::Spilling => Box::new(SpillingRegisterAllocator::new()),
            RegisterAllocatorKind::Remember => Box::new(RememberingRegisterAllocator::new()),
        };
        let cc: Box<dyn CallingConvention> = match cc {
            CallingConventionKind::Stack => Box::new(StackCallingConvention),
            CallingConventionKind::Register => Box::new(RegisterCallingConvention::new()),
        };
        X86Backend {
            ra,
            cc,
            em: Emitter::default(),
        }
    }

    /// Emit the whole translation unit as assembly text.
    pub fn emit(mut self, unit: &TranslationUnit) -> String {
        for function in &unit.functions {
            self.emit_function(unit, function);
        }
        self.em.out
    }

    fn emit_function(&mut self, unit: &TranslationUnit, function: &Function) {
        let name = mangle(&function.name);
        self.em.raw(&format!(".globl {}", name));
        self.em.raw(&format!(".type {}, @function", name));
        self.em.label(&name);

        let count_before = self.em.instr_count;
        self.ra.before_function(function);

        let mut frame: FrameMap = Vec::new();
        let entry = function.entry_block();
        self.emit_basic_block(unit, function, entry, &mut frame, true);
        for &block in &function.block_order {
            if block != entry {
                self.emit_basic_block(unit, function, block, &mut frame, false);
            }
        }

        info!(
            "generated {} with {} instructions",
            function.name,
            self.em.instr_count - count_before
        );
        self.em.raw(&format!(".size {}, .-{}", name, name));
        self.em.raw(&format!("#{}", "-".repeat(79)));
    }

    fn emit_basic_block(
        &mut self,
        unit: &TranslationUnit,
        function: &Function,
        block: usize,
        frame: &mut FrameMap,
        is_entry: bool,
    ) {
        self.em.label(&bb_label(function, block));
        self.ra.before_basic_block();
        if is_entry {
            *frame = self.cc.function_entry(&mut self.em, self.ra.as_mut(), function);
        }

        for instr in &function.block(block).instructions {
            self.em.comment(&format_instruction(unit, function, instr));
            self.ra
                .before_instruction(&mut self.em, frame, function, instr);
            self.emit_instruction(unit, function, frame, instr);
            self.ra.after_instruction(&mut self.em, function);
            self.em.raw("");
            if matches!(instr, Instruction::Return { .. }) {
                break;
            }
        }
    }

    fn emit_instruction(
        &mut self,
        unit: &TranslationUnit,
        function: &Function,
        frame: &FrameMap,
        instr: &Instruction,
    ) {
        let em = &mut self.em;
        let ra = self.ra.as_mut();
        match instr {
            Instruction::Binop { op, dst, lhs, rhs } => match op {
                crate::ir::BinOp::Add => {
                    let lhs = ra.load(em, frame, function, *lhs, None, false);
                    let rhs = ra.load(em, frame, function, *rhs, None, true);
                    em.instr("add", &[lhs.as_str(), rhs.as_str()]);
                    ra.write(em, frame, function, rhs, *dst);
                }
                crate::ir::BinOp::Sub => {
                    let lhs = ra.load(em, frame, function, *lhs, None, true);
                    let rhs = ra.load(em, frame, function, *rhs, None, false);
                    em.instr("sub", &[rhs.as_str(), lhs.as_str()]);
                    ra.write(em, frame, function, lhs, *dst);
                }
                crate::ir::BinOp::Mul => {
                    let lhs = ra.load(em, frame, function, *lhs, None, true);
                    let rhs = ra.load(em, frame, function, *rhs, None, false);
                    em.instr("imul", &[rhs.as_str(), lhs.as_str()]);
                    ra.write(em, frame, function, lhs, *dst);
                }
                crate::ir::BinOp::Div => {
                    ra.load(em, frame, function, Operand::Const(0), Some(Reg::Edx), false);
                    ra.load(em, frame, function, *lhs, Some(Reg::Eax), true);
                    ra.load(em, frame, function, *rhs, Some(Reg::Ecx), true);
                    em.instr("idiv", &["%ecx"]);
                    // idiv leaves the remainder in %edx.
                    ra.kill_register(Reg::Edx);
                    ra.write(em, frame, function, Reg::Eax, *dst);
                }
                crate::ir::BinOp::LessEqual => {
                    let eax = ra.alloc_register(em, frame, function, Some(Reg::Eax));
                    let lhs = ra.load(em, frame, function, *lhs, None, false);
                    let rhs = ra.load(em, frame, function, *rhs, None, false);
                    em.instr("cmp", &[rhs.as_str(), lhs.as_str()]);
                    em.instr("setle", &["%al"]);
                    em.instr("movzb", &["%al", eax.as_str()]);
                    ra.write(em, frame, function, eax, *dst);
                }
            },
            Instruction::Assign { dst, value } => {
                let src = ra.load(em, frame, function, *value, None, false);
                let reg = ra.alloc_register(em, frame, function, None);
                em.instr("mov", &[src.as_str(), reg.as_str()]);
                ra.write(em, frame, function, reg, *dst);
            }
            Instruction::Reference { dst, obj } => {
                let reg = ra.reference(em, frame, function, *obj, None);
                ra.write(em, frame, function, reg, *dst);
            }
            Instruction::Load { dst, ptr } => {
                let value = ra.alloc_register(em, frame, function, None);
                let ptr = ra.load(em, frame, function, Operand::Var(*ptr), None, false);
                em.instr("mov", &[&format!("({})", ptr.as_str()), value.as_str()]);
                ra.write(em, frame, function, value, *dst);
            }
            Instruction::Store { ptr, value } => {
                let value = ra.load(em, frame, function, *value, None, false);
                let ptr = ra.load(em, frame, function, Operand::Var(*ptr), None, false);
                em.instr("mov", &[value.as_str(), &format!("({})", ptr.as_str())]);
            }
            Instruction::Goto { label } => {
                em.instr("jmp", &[&bb_label(function, *label)]);
            }
            Instruction::IfGoto {
                cond,
                then_label,
                else_label,
            } => {
                let cond = ra.load(em, frame, function, *cond, None, false);
                em.instr("test", &[cond.as_str(), cond.as_str()]);
                em.instr("jne", &[&bb_label(function, *then_label)]);
                em.instr("jmp", &[&bb_label(function, *else_label)]);
            }
            Instruction::Call {
                dst,
                callee,
                arguments,
            } => {
                self.cc
                    .call_prologue(em, ra, frame, function, arguments);
                em.instr("call", &[&mangle(&unit.functions[*callee].name)]);
                self.cc
                    .call_epilogue(em, ra, frame, function, *dst, arguments.len());
            }
            Instruction::Return { value } => {
                self.cc.function_return(em, ra, frame, function, *value);
            }
        }
    }
}

fn mangle(name: &str) -> String {
    format!("{}{}", MANGLE_PREFIX, name)
}

fn bb_label(function: &Function, block: usize) -> String {
    format!(".L{}_{}", mangle(&function.name), function.block(block).name)
}

/// Assemble and link with the embedded C runtime via `gcc -m32`.
pub fn compile_executable(assembly: &str, output: &Path) -> Result<(), String> {
    let dir = std::env::temp_dir();
    let pid = std::process::id();
    let asm_path = dir.join(format!("l0-{}.s", pid));
    let runtime_path = dir.join(format!("l0-runtime-{}.c", pid));
    std::fs::write(&asm_path, assembly)
        .map_err(|e| format!("failed to write assembly file: {}", e))?;
    std::fs::write(&runtime_path, RUNTIME_C)
        .map_err(|e| format!("failed to write runtime file: {}", e))?;

    info!("run gcc -m32 to produce {}", output.display());
    let result = Command::new("gcc")
        .arg("-m32")
        .arg("-o")
        .arg(output)
        .arg(&asm_path)
        .arg(&runtime_path)
        .output()
        .map_err(|e| format!("failed to run gcc: {}", e))?;

    std::fs::remove_file(&asm_path).ok();
    std::fs::remove_file(&runtime_path).ok();

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(format!("gcc failed:\n{}", stderr));
    }
    Ok(())
}
