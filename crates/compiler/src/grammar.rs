//! Grammar model and the textual grammar-file format.
//!
//! A [`Grammar`] owns terminals, non-terminals and rules; symbols are
//! referenced by index so rules stay `Copy`-friendly. Grammar files use a
//! small declarative format:
//!
//! ```text
//! %TOKEN  IDENT "[a-zA-Z_][a-zA-Z0-9_]*"
//! %IGNORE WS
//! %START  program
//!
//! program -> decl_list EOF { unit($1) } ;
//! ```
//!
//! Rule actions are brace-delimited expressions over positional
//! placeholders (`$0` is the rule name, `$1`..`$N` the right-hand-side
//! items) and constructor applications; they are parsed into [`Action`]
//! values and evaluated by the parser against a language-specific builder.

use crate::error::CompileError;
use std::collections::HashMap;

pub type TerminalId = usize;
pub type NonTerminalId = usize;
pub type RuleId = usize;

/// A terminal symbol with the regex the scanner uses to detect it.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub name: String,
    pub regex: String,
    /// Lex-and-discard tokens (whitespace, comments).
    pub skip: bool,
    /// Marks the end-of-input terminal; it is emitted once the text is
    /// exhausted instead of being matched against it.
    pub eof: bool,
}

/// A non-terminal symbol together with the rules it is the left-hand
/// side of.
#[derive(Debug, Clone)]
pub struct NonTerminal {
    pub name: String,
    pub rules: Vec<RuleId>,
}

/// One symbol of a rule's right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Terminal(TerminalId),
    NonTerminal(NonTerminalId),
    Epsilon,
}

/// A parsed rule action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `$N`: the N-th sub-result (`$0` is the rule name).
    Sub(usize),
    /// `name(arg, ...)`: constructor application, resolved by the
    /// language's action builder.
    Construct { name: String, args: Vec<Action> },
}

/// A production `lhs -> rhs` with its action.
#[derive(Debug, Clone)]
pub struct Rule {
    pub lhs: NonTerminalId,
    pub rhs: Vec<Symbol>,
    pub action: Action,
}

/// A context-free grammar with scanner information attached to its
/// terminals.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    terminals: Vec<Terminal>,
    terminal_index: HashMap<String, TerminalId>,
    nonterminals: Vec<NonTerminal>,
    nonterminal_index: HashMap<String, NonTerminalId>,
    rules: Vec<Rule>,
    start: Option<NonTerminalId>,
    imports: Vec<(String, String)>,
}

impl Grammar {
    pub fn new() -> Self {
        Grammar::default()
    }

    /// Declare a terminal. Redeclaring a name is an error.
    pub fn declare_terminal(
        &mut self,
        name: &str,
        regex: &str,
        skip: bool,
    ) -> Result<TerminalId, CompileError> {
        if self.terminal_index.contains_key(name) {
            return Err(CompileError::Grammar(format!(
                "cannot re-initialize terminal {}",
                name
            )));
        }
        let id = self.terminals.len();
        self.terminals.push(Terminal {
            name: name.to_string(),
            regex: regex.to_string(),
            skip,
            // A terminal whose pattern is the end-of-input anchor is the
            // EOF marker; it never matches text.
            eof: regex == "$",
        });
        self.terminal_index.insert(name.to_string(), id);
        Ok(id)
    }

    /// Mark an already declared terminal as skippable.
    pub fn mark_skip(&mut self, name: &str) -> Result<(), CompileError> {
        match self.terminal_index.get(name) {
            Some(&id) => {
                self.terminals[id].skip = true;
                Ok(())
            }
            None => Err(CompileError::Grammar(format!(
                "cannot ignore unknown terminal {}",
                name
            ))),
        }
    }

    /// Return the non-terminal with the given name, creating it if it
    /// does not exist.
    pub fn nonterminal(&mut self, name: &str) -> NonTerminalId {
        if let Some(&id) = self.nonterminal_index.get(name) {
            return id;
        }
        let id = self.nonterminals.len();
        self.nonterminals.push(NonTerminal {
            name: name.to_string(),
            rules: Vec::new(),
        });
        self.nonterminal_index.insert(name.to_string(), id);
        id
    }

    pub fn set_start(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(old) = self.start {
            return Err(CompileError::Grammar(format!(
                "the grammar already defined the start symbol {}; did you define multiple start symbols?",
                self.nonterminals[old].name
            )));
        }
        let id = self.nonterminal(name);
        self.start = Some(id);
        Ok(())
    }

    /// Add a rule. A rule must have an action unless its right-hand side
    /// is a single symbol, in which case the action defaults to `$1`.
    pub fn add_rule(
        &mut self,
        lhs: NonTerminalId,
        rhs: Vec<Symbol>,
        action: Option<Action>,
    ) -> Result<RuleId, CompileError> {
        if self.start.is_none() {
            return Err(CompileError::Grammar(
                "must define a start symbol before adding rules".to_string(),
            ));
        }
        // A rule is either epsilon-only or a word of proper symbols.
        if rhs.contains(&Symbol::Epsilon) && rhs.len() != 1 {
            return Err(CompileError::Grammar(format!(
                "rule for {} mixes EPSILON with other symbols",
                self.nonterminals[lhs].name
            )));
        }
        let action = match action {
            Some(a) => a,
            None if rhs.len() == 1 && rhs[0] != Symbol::Epsilon => Action::Sub(1),
            None => {
                return Err(CompileError::Grammar(format!(
                    "rule for {} has no action",
                    self.nonterminals[lhs].name
                )));
            }
        };
        let id = self.rules.len();
        self.rules.push(Rule { lhs, rhs, action });
        self.nonterminals[lhs].rules.push(id);
        Ok(id)
    }

    pub fn add_import(&mut self, alias: &str, module: &str) {
        self.imports.push((alias.to_string(), module.to_string()));
    }

    pub fn start(&self) -> Option<NonTerminalId> {
        self.start
    }

    pub fn terminal(&self, id: TerminalId) -> &Terminal {
        &self.terminals[id]
    }

    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn terminal_id(&self, name: &str) -> Option<TerminalId> {
        self.terminal_index.get(name).copied()
    }

    pub fn nonterminal_ref(&self, id: NonTerminalId) -> &NonTerminal {
        &self.nonterminals[id]
    }

    pub fn nonterminals(&self) -> &[NonTerminal] {
        &self.nonterminals
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn imports(&self) -> &[(String, String)] {
        &self.imports
    }

    pub fn symbol_name(&self, symbol: Symbol) -> String {
        match symbol {
            Symbol::Terminal(t) => format!("T({})", self.terminals[t].name),
            Symbol::NonTerminal(nt) => format!("NT({})", self.nonterminals[nt].name),
            Symbol::Epsilon => "E".to_string(),
        }
    }

    /// Human-readable form of a rule, used in diagnostics.
    pub fn rule_to_string(&self, id: RuleId) -> String {
        let rule = &self.rules[id];
        let rhs: Vec<String> = rule.rhs.iter().map(|&s| self.symbol_name(s)).collect();
        format!(
            "NT({}) -> [{}]",
            self.nonterminals[rule.lhs].name,
            rhs.join(", ")
        )
    }

    /// Parse the textual grammar-file format.
    pub fn from_file_text(text: &str) -> Result<Grammar, CompileError> {
        GrammarReader::new(text).read()
    }
}

/// Recursive-descent reader for the grammar-file format. This is the
/// bootstrap parser; every other parser in the system is table-driven.
struct GrammarReader {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl GrammarReader {
    fn new(text: &str) -> Self {
        GrammarReader {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::Grammar(format!("line {}: {}", self.line, msg.into()))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.chars.get(self.pos + 1) == Some(&'/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_word(&mut self) -> Option<String> {
        self.skip_trivia();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            None
        } else {
            Some(self.chars[start..self.pos].iter().collect())
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String, CompileError> {
        self.read_word()
            .ok_or_else(|| self.error(format!("expected {}", what)))
    }

    fn read_string(&mut self) -> Result<String, CompileError> {
        self.skip_trivia();
        if self.bump() != Some('"') {
            return Err(self.error("expected a double-quoted string"));
        }
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn read(mut self) -> Result<Grammar, CompileError> {
        let mut grammar = Grammar::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => break,
                Some('%') => {
                    self.bump();
                    let opt = self.expect_word("an option name after '%'")?;
                    match opt.as_str() {
                        "TOKEN" => {
                            let name = self.expect_word("a terminal name")?;
                            let regex = self.read_string()?;
                            grammar.declare_terminal(&name, &regex, false)?;
                        }
                        "IGNORE" => {
                            let name = self.expect_word("a terminal name")?;
                            grammar.mark_skip(&name)?;
                        }
                        "START" => {
                            let name = self.expect_word("a non-terminal name")?;
                            grammar.set_start(&name)?;
                        }
                        "IMPORT" => {
                            let alias = self.expect_word("an import alias")?;
                            let module = self.read_string()?;
                            grammar.add_import(&alias, &module);
                        }
                        other => {
                            return Err(self.error(format!("unknown option: %{}", other)));
                        }
                    }
                }
                Some(_) => self.read_rule(&mut grammar)?,
            }
        }
        Ok(grammar)
    }

    fn read_rule(&mut self, grammar: &mut Grammar) -> Result<(), CompileError> {
        let lhs_name = self.expect_word("a rule left-hand side")?;
        if grammar.terminal_id(&lhs_name).is_some() {
            return Err(self.error(format!(
                "rule left-hand side {} is a terminal; probably you mixed up tokens and rules",
                lhs_name
            )));
        }
        let lhs = grammar.nonterminal(&lhs_name);
        self.skip_trivia();
        if !(self.bump() == Some('-') && self.bump() == Some('>')) {
            return Err(self.error(format!("expected '->' after {}", lhs_name)));
        }

        loop {
            let mut rhs = Vec::new();
            while let Some(word) = self.read_word() {
                if word == "EPSILON" {
                    rhs.push(Symbol::Epsilon);
                } else if let Some(t) = grammar.terminal_id(&word) {
                    rhs.push(Symbol::Terminal(t));
                } else {
                    rhs.push(Symbol::NonTerminal(grammar.nonterminal(&word)));
                }
            }
            if rhs.is_empty() {
                return Err(self.error(format!("empty production for {}", lhs_name)));
            }

            self.skip_trivia();
            let action = if self.peek() == Some('{') {
                let text = self.read_action_text()?;
                Some(parse_action(&text).map_err(|e| self.error(e))?)
            } else {
                None
            };
            grammar.add_rule(lhs, rhs, action)?;

            self.skip_trivia();
            match self.bump() {
                Some('|') => continue,
                Some(';') => return Ok(()),
                _ => {
                    return Err(self.error(format!(
                        "expected '|' or ';' after a production of {}",
                        lhs_name
                    )));
                }
            }
        }
    }

    fn read_action_text(&mut self) -> Result<String, CompileError> {
        self.bump(); // consume '{'
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '}' {
                let text: String = self.chars[start..self.pos].iter().collect();
                self.bump();
                return Ok(text);
            }
            self.bump();
        }
        Err(self.error("unterminated action"))
    }
}

/// Parse an action expression: `$N` or `name(arg, ...)`.
pub fn parse_action(text: &str) -> Result<Action, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let action = parse_action_expr(&chars, &mut pos)?;
    skip_spaces(&chars, &mut pos);
    if pos != chars.len() {
        return Err(format!("trailing input in action: {}", text.trim()));
    }
    Ok(action)
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while chars.get(*pos).is_some_and(|c| c.is_whitespace()) {
        *pos += 1;
    }
}

fn parse_action_expr(chars: &[char], pos: &mut usize) -> Result<Action, String> {
    skip_spaces(chars, pos);
    match chars.get(*pos) {
        Some('$') => {
            *pos += 1;
            let start = *pos;
            while chars.get(*pos).is_some_and(|c| c.is_ascii_digit()) {
                *pos += 1;
            }
            if *pos == start {
                return Err("expected a digit after '$'".to_string());
            }
            let n: usize = chars[start..*pos]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| "invalid placeholder index".to_string())?;
            Ok(Action::Sub(n))
        }
        Some(c) if c.is_alphabetic() || *c == '_' => {
            let start = *pos;
            while chars
                .get(*pos)
                .is_some_and(|c| c.is_alphanumeric() || *c == '_')
            {
                *pos += 1;
            }
            let name: String = chars[start..*pos].iter().collect();
            skip_spaces(chars, pos);
            if chars.get(*pos) != Some(&'(') {
                return Err(format!("expected '(' after constructor {}", name));
            }
            *pos += 1;
            let mut args = Vec::new();
            skip_spaces(chars, pos);
            if chars.get(*pos) == Some(&')') {
                *pos += 1;
                return Ok(Action::Construct { name, args });
            }
            loop {
                args.push(parse_action_expr(chars, pos)?);
                skip_spaces(chars, pos);
                match chars.get(*pos) {
                    Some(',') => {
                        *pos += 1;
                    }
                    Some(')') => {
                        *pos += 1;
                        return Ok(Action::Construct { name, args });
                    }
                    _ => return Err(format!("expected ',' or ')' in arguments of {}", name)),
                }
            }
        }
        _ => Err("expected '$N' or a constructor application".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_placeholder() {
        assert_eq!(parse_action("$1"), Ok(Action::Sub(1)));
        assert_eq!(parse_action(" $12 "), Ok(Action::Sub(12)));
    }

    #[test]
    fn test_parse_action_nested_constructors() {
        let action = parse_action("cons($1, nil())").unwrap();
        assert_eq!(
            action,
            Action::Construct {
                name: "cons".to_string(),
                args: vec![
                    Action::Sub(1),
                    Action::Construct {
                        name: "nil".to_string(),
                        args: vec![],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_parse_action_rejects_garbage() {
        assert!(parse_action("$").is_err());
        assert!(parse_action("foo").is_err());
        assert!(parse_action("foo($1) bar").is_err());
    }

    #[test]
    fn test_grammar_file_options_and_rules() {
        let grammar = Grammar::from_file_text(
            r#"
            // arithmetic over integers
            %TOKEN EOF "$"
            %TOKEN WS "[\n\t ]+"
            %IGNORE WS
            %TOKEN INT "[0-9]+"
            %TOKEN ADD "[+]"
            %START sum
            %IMPORT ast "demo::ast"

            sum      -> INT sum_tail EOF { first($1) } ;
            sum_tail -> ADD INT sum_tail { next($2, $3) }
                      | EPSILON          { stop() } ;
            "#,
        )
        .unwrap();

        assert_eq!(grammar.terminals().len(), 4);
        assert!(grammar.terminal(grammar.terminal_id("EOF").unwrap()).eof);
        assert!(grammar.terminal(grammar.terminal_id("WS").unwrap()).skip);
        let start = grammar.start().unwrap();
        assert_eq!(grammar.nonterminal_ref(start).name, "sum");
        assert_eq!(grammar.rules().len(), 3);
        assert_eq!(grammar.imports(), &[("ast".into(), "demo::ast".into())]);
    }

    #[test]
    fn test_grammar_file_default_action_for_single_symbol() {
        let grammar = Grammar::from_file_text(
            r#"
            %TOKEN EOF "$"
            %TOKEN A "a"
            %START s
            s -> item EOF { done($1) } ;
            item -> A ;
            "#,
        )
        .unwrap();
        let item = grammar.rules().last().unwrap();
        assert_eq!(item.action, Action::Sub(1));
    }

    #[test]
    fn test_grammar_file_rejects_actionless_word() {
        let err = Grammar::from_file_text(
            r#"
            %TOKEN EOF "$"
            %TOKEN A "a"
            %START s
            s -> A EOF ;
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("has no action"));
    }

    #[test]
    fn test_grammar_file_rejects_duplicate_terminal() {
        let err = Grammar::from_file_text(
            r#"
            %TOKEN A "a"
            %TOKEN A "b"
            %START s
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("re-initialize"));
    }

    #[test]
    fn test_grammar_file_rejects_two_start_symbols() {
        let err = Grammar::from_file_text(
            r#"
            %TOKEN A "a"
            %START s
            %START t
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("start symbol"));
    }

    #[test]
    fn test_epsilon_must_stand_alone() {
        let mut grammar = Grammar::new();
        let a = grammar.declare_terminal("A", "a", false).unwrap();
        let s = grammar.nonterminal("s");
        grammar.set_start("s").unwrap();
        let err = grammar
            .add_rule(s, vec![Symbol::Terminal(a), Symbol::Epsilon], None)
            .unwrap_err();
        assert!(err.to_string().contains("EPSILON"));
    }
}
