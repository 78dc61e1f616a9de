//! Frontend error types.
//!
//! Every stage of the frontend reports through [`CompileError`] so the
//! pipeline can short-circuit with `?`. Conditions that indicate a bug in
//! the compiler itself (malformed IR, misuse of a closed basic block) are
//! asserted instead and abort immediately.

/// Error produced by the compiler frontend.
///
/// Each variant is tagged with the earliest stage that can detect it:
/// the scanner, the parser, the parser generator, or semantic analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The scanner could not match any terminal.
    Lexical(String),
    /// The token stream did not match the grammar.
    Parse(String),
    /// The grammar itself is broken (unknown symbols, missing actions,
    /// LL(1) conflicts).
    Grammar(String),
    /// Semantic analysis failed; all collected diagnostics are reported
    /// together.
    Semantic(Vec<String>),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Lexical(msg) => write!(f, "lexical error: {}", msg),
            CompileError::Parse(msg) => write!(f, "parse error: {}", msg),
            CompileError::Grammar(msg) => write!(f, "grammar error: {}", msg),
            CompileError::Semantic(msgs) => {
                writeln!(f, "semantic analysis failed:")?;
                for msg in msgs {
                    writeln!(f, "  {}", msg)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_error_lists_all_diagnostics() {
        let err = CompileError::Semantic(vec![
            "duplicate definition of name: x".to_string(),
            "name not found: y".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("duplicate definition of name: x"));
        assert!(text.contains("name not found: y"));
    }

    #[test]
    fn test_display_tags_stage() {
        assert!(
            CompileError::Lexical("cannot scan".into())
                .to_string()
                .starts_with("lexical error")
        );
        assert!(
            CompileError::Parse("unexpected token".into())
                .to_string()
                .starts_with("parse error")
        );
    }
}
