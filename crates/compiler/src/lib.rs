//! L0 Compiler Library
//!
//! A multi-stage educational compiler for the small imperative language
//! L0: an LL(1) parser generator with its grammar analysis, a typed AST
//! with semantic analysis, a three-address-code IR with an optimizer, an
//! IR interpreter with an explicit linear memory, and an x86-32 backend
//! with pluggable register allocation and calling conventions.
//!
//! The typical pipeline:
//!
//! ```rust,ignore
//! let ir = l0c::compile_to_ir(source, /* optimize */ true)?;
//! let mut machine = l0c::Interpreter::new(&ir)?;
//! let result = machine.exec(Some(10_000))?;
//! ```

pub mod ast;
pub mod backend;
pub mod equivalence;
pub mod error;
pub mod grammar;
pub mod interpreter;
pub mod ir;
pub mod irgen;
pub mod l0;
pub mod ll1;
pub mod optimizer;
pub mod parser;
pub mod scanner;
pub mod semantic;

pub use backend::{CallingConventionKind, RegisterAllocatorKind, X86Backend, compile_executable};
pub use error::CompileError;
pub use interpreter::Interpreter;
pub use irgen::generate_ir;
pub use l0::{parse, parse_tree};
pub use optimizer::Optimizer;
pub use parser::load_parser;
pub use semantic::{Resolution, analyze};

use tracing::info;

/// Run the optimizer fixpoint over every function of a translation unit.
pub fn optimize(ir: &mut ir::TranslationUnit) {
    Optimizer::new().optimize(ir);
}

/// Parse, analyze and lower a source text to IR, optionally running the
/// optimizer fixpoint.
pub fn compile_to_ir(source: &str, optimize: bool) -> Result<ir::TranslationUnit, CompileError> {
    let unit = l0::parse(source)?;
    let res = semantic::analyze(&unit)?;
    let mut ir = irgen::generate_ir(&unit, &res);
    info!(
        "compiled functions: {:?}",
        ir.functions.iter().map(|f| f.name.clone()).collect::<Vec<_>>()
    );
    if optimize {
        Optimizer::new().optimize(&mut ir);
    }
    Ok(ir)
}

/// Compile a source text to x86-32 assembly.
pub fn compile_to_assembly(
    source: &str,
    optimize: bool,
    ra: RegisterAllocatorKind,
    cc: CallingConventionKind,
) -> Result<String, CompileError> {
    let ir = compile_to_ir(source, optimize)?;
    Ok(X86Backend::new(ra, cc).emit(&ir))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a program unoptimized and optimized: both must produce the
    /// same result, and the optimized version may not take more steps.
    fn run_both(source: &str, max_steps: usize) -> (i64, usize, usize) {
        let ir = compile_to_ir(source, false).unwrap();
        let mut machine = Interpreter::new(&ir).unwrap();
        let result = machine.exec(Some(max_steps)).unwrap();
        assert!(
            machine.step_count < max_steps,
            "unoptimized execution ran into the step limit; endless loop?"
        );
        let result = result.expect("unoptimized execution yielded no result");

        let ir_opt = compile_to_ir(source, true).unwrap();
        let mut machine_opt = Interpreter::new(&ir_opt).unwrap();
        let result_opt = machine_opt
            .exec(Some(max_steps))
            .unwrap()
            .expect("optimized execution yielded no result");

        assert_eq!(
            result_opt, result,
            "optimized program changed the result"
        );
        assert!(
            machine_opt.step_count <= machine.step_count,
            "optimized program executed longer than the original ({} > {})",
            machine_opt.step_count,
            machine.step_count
        );
        (result, machine.step_count, machine_opt.step_count)
    }

    const FIB_PROGRAM: &str = "
        func fib_iter(n : int) : int {
            var a : int;
            var b : int;
            var t : int;
            a := 0;
            b := 1;
            while (n) {
                t := a + b;
                a := b;
                b := t;
                n := n - 1;
            }
            return a;
        }
        func main() : int { return fib_iter(10) + fib_iter(10); }
    ";

    #[test]
    fn test_fibonacci_iterative() {
        let (result, _, steps_opt) = run_both(FIB_PROGRAM, 10_000);
        assert_eq!(result, 2 * 55);
        assert!(steps_opt <= 2010, "execution is still too slow: {}", steps_opt);
    }

    #[test]
    fn test_opt_merge_program() {
        let source = "
            func f1(n : int) : int {
                var r : int;
                r := n + n;
                if (1) { r := r * n; } else { }
                return r - n + 1;
            }
            func f2(n : int) : int {
                var r : int;
                if (n <= 1) { r := 33; } else { r := 2; }
                return r + 2;
            }
            func main() : int { return f1(2) + f2(1); }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 42);
    }

    #[test]
    fn test_dead_variable_program() {
        let source = "
            func f1() : int { var a : int; var b : int; a := 1; b := 2; return 0; }
            func main() : int { return f1(); }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 0);
    }

    #[test]
    fn test_dead_variable_program_with_pointer() {
        let source = "
            func f2() : int {
                var a : int;
                var p : &int;
                a := 5;
                p := &a;
                return *p;
            }
            func main() : int { return f2(); }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 5);
    }

    #[test]
    fn test_pointer_round_trip_program() {
        let source = "
            func main() : int {
                var x : int;
                var p : &int;
                x := 7;
                p := &x;
                *p := 42;
                return x;
            }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 42);
    }

    #[test]
    fn test_swap_program() {
        let source = "
            func xchg(p : &int) : int {
                var a : int;
                var b : int;
                var t : int;
                a := 1;
                b := 41;
                t := a;
                a := b;
                b := t;
                *p := a;
                return a + b;
            }
            func main() : int {
                var x : int;
                x := 0;
                x := xchg(&x);
                return x;
            }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 42);
    }

    #[test]
    fn test_multiarg_program() {
        let source = "
            func many(a:int, b:int, c:int, d:int, e:int, f:int, g:int) : int {
                return a + b + c + d + e + f + g;
            }
            func main() : int { return many(10, 11, 12, 13, 14, 15, 7); }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 82);
    }

    #[test]
    fn test_fastcall_program() {
        let source = "
            func fast(a : int, b : int) : int { return a * b; }
            func main() : int { return fast(10, 10); }
        ";
        let (result, _, _) = run_both(source, 10_000);
        assert_eq!(result, 100);
    }

    #[test]
    fn test_frontend_errors_short_circuit() {
        assert!(matches!(
            compile_to_ir("func main() : int { return ?; }", false),
            Err(CompileError::Lexical(_))
        ));
        assert!(matches!(
            compile_to_ir("func main() : int { return 0 }", false),
            Err(CompileError::Parse(_))
        ));
        assert!(matches!(
            compile_to_ir("func main() : int { return nope; }", false),
            Err(CompileError::Semantic(_))
        ));
    }

    #[test]
    fn test_free_optimize_entry_point() {
        let mut ir = compile_to_ir("func main() : int { return 1 + 2; }", false).unwrap();
        optimize(&mut ir);
        // Folding, propagation and dead-variable elimination boil the
        // body down to a single return of the constant.
        let main = ir.find_function("main").unwrap();
        assert_eq!(main.block_order.len(), 1);
        assert_eq!(main.block(main.entry_block()).instructions.len(), 1);
    }

    #[test]
    fn test_assembly_pipeline() {
        let asm = compile_to_assembly(
            "func main() : int { return 42; }",
            true,
            RegisterAllocatorKind::Remember,
            CallingConventionKind::Stack,
        )
        .unwrap();
        assert!(asm.contains(".globl l0_main"));
    }
}
