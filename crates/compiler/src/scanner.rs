//! Longest-match scanner driven by an ordered terminal table.
//!
//! The scanner lexes the whole input eagerly on construction, so the token
//! stream can be inspected at any point in time. At each position the
//! terminal whose regex matches the longest prefix wins; ties go to the
//! earlier table entry. Skip-flagged tokens (whitespace, comments) are
//! dropped.

use crate::error::CompileError;
use crate::grammar::Grammar;
use regex::Regex;

/// A scanned token with its source position (1-based line, 0-based
/// column).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: String,
    pub lexeme: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.lexeme)
    }
}

/// One row of the scanner table.
#[derive(Debug, Clone)]
pub struct ScanRule {
    pub name: String,
    pub regex: Regex,
    pub skip: bool,
    pub eof: bool,
}

/// Compile the scanner table for a grammar's terminals, preserving their
/// declaration order.
pub fn scan_rules(grammar: &Grammar) -> Result<Vec<ScanRule>, CompileError> {
    let mut rules = Vec::new();
    for terminal in grammar.terminals() {
        let regex = Regex::new(&terminal.regex).map_err(|e| {
            CompileError::Grammar(format!(
                "invalid token rule {} {:?}: {}",
                terminal.name, terminal.regex, e
            ))
        })?;
        rules.push(ScanRule {
            name: terminal.name.clone(),
            regex,
            skip: terminal.skip,
            eof: terminal.eof,
        });
    }
    Ok(rules)
}

/// An eagerly lexed token stream.
#[derive(Debug)]
pub struct Scanner {
    tokens: Vec<Token>,
    pos: usize,
}

impl Scanner {
    pub fn new(table: &[ScanRule], text: &str) -> Result<Scanner, CompileError> {
        let mut tokens = Vec::new();
        let mut rest = text;
        let mut line = 1usize;
        let mut col = 0usize;

        while !rest.is_empty() {
            let mut best: Option<(&ScanRule, usize)> = None;
            for rule in table {
                if rule.eof {
                    continue;
                }
                if let Some(m) = rule.regex.find(rest) {
                    if m.start() != 0 {
                        continue;
                    }
                    // Longest match wins; table order breaks ties.
                    if best.is_none_or(|(_, len)| m.end() > len) {
                        best = Some((rule, m.end()));
                    }
                }
            }
            let Some((rule, len)) = best.filter(|&(_, len)| len > 0) else {
                let prefix: String = rest.chars().take(20).collect();
                return Err(CompileError::Lexical(format!(
                    "cannot scan: {:?}...",
                    prefix
                )));
            };

            let lexeme = &rest[..len];
            if !rule.skip {
                tokens.push(Token {
                    kind: rule.name.clone(),
                    lexeme: lexeme.to_string(),
                    line,
                    col,
                });
            }

            if let Some(idx) = lexeme.rfind('\n') {
                line += lexeme.matches('\n').count();
                col = lexeme[idx + 1..].chars().count();
            } else {
                col += lexeme.chars().count();
            }
            rest = &rest[len..];
        }

        // The end-of-input terminal is emitted once the text is consumed.
        if let Some(rule) = table.iter().find(|r| r.eof) {
            tokens.push(Token {
                kind: rule.name.clone(),
                lexeme: String::new(),
                line,
                col,
            });
        }

        Ok(Scanner { tokens, pos: 0 })
    }

    /// All scanned tokens, mostly useful for debugging and tests.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The type name of the current token, or `""` past the end.
    pub fn peek(&self) -> &str {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind.as_str())
            .unwrap_or("")
    }

    /// Consume and return the current token. With `expected` set, a
    /// mismatch is a parse error.
    pub fn read(&mut self, expected: Option<&str>) -> Result<Token, CompileError> {
        if let Some(expected) = expected {
            if self.peek() != expected {
                return Err(self.unexpected(Some(expected)));
            }
        }
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token.clone())
            }
            None => Err(CompileError::Parse("unexpected end of input".to_string())),
        }
    }

    /// Build the "unexpected token" error for the current position.
    pub fn unexpected(&self, expected: Option<&str>) -> CompileError {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let mut msg = format!(
                    "unexpected token: {} (line: {}, col: {})",
                    token.kind, token.line, token.col
                );
                if let Some(expected) = expected {
                    msg.push_str(&format!(", expected: {}", expected));
                }
                CompileError::Parse(msg)
            }
            None => CompileError::Parse("unexpected end of input".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str, bool)]) -> Vec<ScanRule> {
        let mut grammar = Grammar::new();
        for (name, regex, skip) in entries {
            grammar.declare_terminal(name, regex, *skip).unwrap();
        }
        scan_rules(&grammar).unwrap()
    }

    fn l0_like_table() -> Vec<ScanRule> {
        table(&[
            ("EOF", "$", false),
            ("WS", "[\n\t ]+", true),
            ("COMMENT", "//[^\n]*", true),
            ("WHILE", "while", false),
            ("INT", "int", false),
            ("ASSIGN", ":=", false),
            ("COLON", ":", false),
            ("IDENT", "[a-zA-Z_][a-zA-Z0-9_]*", false),
            ("LITERAL", "[0-9]+", false),
        ])
    }

    #[test]
    fn test_keyword_round_trip() {
        // A keyword with a fixed lexeme scans to exactly one token of its
        // own type plus EOF.
        for keyword in ["while", "int", ":=", ":"] {
            let scanner = Scanner::new(&l0_like_table(), keyword).unwrap();
            assert_eq!(scanner.tokens().len(), 2, "keyword {:?}", keyword);
            assert_eq!(scanner.tokens()[0].lexeme, keyword);
            assert_eq!(scanner.tokens()[1].kind, "EOF");
        }
    }

    #[test]
    fn test_longest_match_beats_table_order() {
        // "integer" is longer than the keyword prefix "int".
        let scanner = Scanner::new(&l0_like_table(), "integer").unwrap();
        assert_eq!(scanner.tokens()[0].kind, "IDENT");
        assert_eq!(scanner.tokens()[0].lexeme, "integer");
    }

    #[test]
    fn test_table_order_breaks_ties() {
        let scanner = Scanner::new(&l0_like_table(), "int").unwrap();
        assert_eq!(scanner.tokens()[0].kind, "INT");
    }

    #[test]
    fn test_skip_tokens_are_discarded() {
        let scanner = Scanner::new(&l0_like_table(), "while // loop\n  x").unwrap();
        let kinds: Vec<&str> = scanner.tokens().iter().map(|t| t.kind.as_str()).collect();
        assert_eq!(kinds, vec!["WHILE", "IDENT", "EOF"]);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let scanner = Scanner::new(&l0_like_table(), "x\n  y").unwrap();
        let tokens = scanner.tokens();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 0));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 2));
    }

    #[test]
    fn test_lexical_error_cites_prefix() {
        let err = Scanner::new(&l0_like_table(), "x ?!@ y").unwrap_err();
        match err {
            CompileError::Lexical(msg) => assert!(msg.contains("?!@"), "{}", msg),
            other => panic!("expected a lexical error, got {:?}", other),
        }
    }

    #[test]
    fn test_peek_and_read() {
        let mut scanner = Scanner::new(&l0_like_table(), "x := 5").unwrap();
        assert_eq!(scanner.peek(), "IDENT");
        scanner.read(Some("IDENT")).unwrap();
        assert_eq!(scanner.peek(), "ASSIGN");
        let err = scanner.read(Some("LITERAL")).unwrap_err();
        assert!(err.to_string().contains("expected: LITERAL"));
    }
}
