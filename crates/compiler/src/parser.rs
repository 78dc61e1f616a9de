//! Table-driven LL(1) parser.
//!
//! [`TableParser::new`] turns a [`Grammar`] into predict tables (rejecting
//! non-LL(1) grammars with a diagnostic naming the conflicting lookahead
//! and both offending rules) plus a compiled scanner table. Parsing then
//! runs one mutually recursive descent per non-terminal, driven entirely
//! by the tables.
//!
//! Two modes are supported, mirroring the classic generated-parser shape:
//! action mode evaluates each rule's action template against a language
//! specific [`ActionBuilder`]; parse-tree mode returns the raw derivation
//! as nested `[rule-name, sub-results...]` nodes.

use crate::error::CompileError;
use crate::grammar::{Action, Grammar, NonTerminalId, RuleId, Symbol};
use crate::ll1::Ll1Analysis;
use crate::scanner::{ScanRule, Scanner, Token, scan_rules};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::SystemTime;
use tracing::info;

/// Evaluates rule actions into language-specific semantic values.
pub trait ActionBuilder {
    type Value;

    /// Wrap a consumed terminal token.
    fn token(&mut self, token: Token) -> Self::Value;

    /// The `$0` placeholder: the name of the rule's left-hand side.
    fn rule_name(&mut self, name: &str) -> Self::Value;

    /// Apply a constructor to already evaluated arguments.
    fn construct(&mut self, name: &str, args: Vec<Self::Value>) -> Result<Self::Value, String>;
}

/// A raw derivation node, as produced by parse-tree mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseTree {
    Token(Token),
    Node { name: String, children: Vec<ParseTree> },
}

#[derive(Debug)]
pub struct TableParser {
    grammar: Grammar,
    scan_table: Vec<ScanRule>,
    /// Per non-terminal: lookahead terminal -> rule to apply.
    predict: Vec<HashMap<String, RuleId>>,
}

impl TableParser {
    /// Build the parser tables, performing the LL(1) check.
    pub fn new(grammar: Grammar) -> Result<TableParser, CompileError> {
        let scan_table = scan_rules(&grammar)?;
        let analysis = Ll1Analysis::new(&grammar);

        let mut predict: Vec<HashMap<String, RuleId>> = Vec::new();
        for nt in grammar.nonterminals() {
            if nt.rules.is_empty() {
                return Err(CompileError::Grammar(format!(
                    "{} has no rules, probably you mixed up tokens and rules",
                    nt.name
                )));
            }
            let mut table: HashMap<String, RuleId> = HashMap::new();
            for &rule in &nt.rules {
                for terminal in analysis.predict(rule) {
                    let name = grammar.terminal(terminal).name.clone();
                    if let Some(&other) = table.get(&name) {
                        return Err(CompileError::Grammar(format!(
                            "grammar is not LL(1): lookahead {} predicts both:\n  {}\n  {}",
                            name,
                            grammar.rule_to_string(other),
                            grammar.rule_to_string(rule)
                        )));
                    }
                    table.insert(name, rule);
                }
            }
            predict.push(table);
        }

        Ok(TableParser {
            grammar,
            scan_table,
            predict,
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Parse `text`, evaluating rule actions through `builder`.
    pub fn parse_with<B: ActionBuilder>(
        &self,
        text: &str,
        builder: &mut B,
    ) -> Result<B::Value, CompileError> {
        let mut stream = Scanner::new(&self.scan_table, text)?;
        let start = self
            .grammar
            .start()
            .ok_or_else(|| CompileError::Grammar("grammar has no start symbol".to_string()))?;
        self.parse_value(start, &mut stream, builder)
    }

    /// Parse `text` into the raw derivation tree.
    pub fn parse_tree(&self, text: &str) -> Result<ParseTree, CompileError> {
        let mut stream = Scanner::new(&self.scan_table, text)?;
        let start = self
            .grammar
            .start()
            .ok_or_else(|| CompileError::Grammar("grammar has no start symbol".to_string()))?;
        self.parse_node(start, &mut stream)
    }

    fn select_rule(&self, nt: NonTerminalId, stream: &Scanner) -> Result<RuleId, CompileError> {
        match self.predict[nt].get(stream.peek()) {
            Some(&rule) => Ok(rule),
            None => Err(stream.unexpected(None)),
        }
    }

    fn parse_value<B: ActionBuilder>(
        &self,
        nt: NonTerminalId,
        stream: &mut Scanner,
        builder: &mut B,
    ) -> Result<B::Value, CompileError> {
        let rule_id = self.select_rule(nt, stream)?;
        let rule = self.grammar.rule(rule_id);

        let mut results: Vec<Option<B::Value>> = Vec::new();
        for &symbol in &rule.rhs {
            match symbol {
                Symbol::Terminal(t) => {
                    let token = stream.read(Some(self.grammar.terminal(t).name.as_str()))?;
                    results.push(Some(builder.token(token)));
                }
                Symbol::NonTerminal(sub) => {
                    results.push(Some(self.parse_value(sub, stream, builder)?));
                }
                Symbol::Epsilon => {}
            }
        }

        self.eval_action(&rule.action, rule_id, &mut results, builder)
    }

    fn eval_action<B: ActionBuilder>(
        &self,
        action: &Action,
        rule_id: RuleId,
        results: &mut Vec<Option<B::Value>>,
        builder: &mut B,
    ) -> Result<B::Value, CompileError> {
        match action {
            Action::Sub(0) => {
                let rule = self.grammar.rule(rule_id);
                let name = self.grammar.nonterminal_ref(rule.lhs).name.clone();
                Ok(builder.rule_name(&name))
            }
            Action::Sub(n) => results
                .get_mut(n - 1)
                .and_then(Option::take)
                .ok_or_else(|| {
                    CompileError::Grammar(format!(
                        "action of {} references ${} more than once or out of range",
                        self.grammar.rule_to_string(rule_id),
                        n
                    ))
                }),
            Action::Construct { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_action(arg, rule_id, results, builder)?);
                }
                builder.construct(name, values).map_err(|msg| {
                    CompileError::Grammar(format!(
                        "action of {}: {}",
                        self.grammar.rule_to_string(rule_id),
                        msg
                    ))
                })
            }
        }
    }

    fn parse_node(
        &self,
        nt: NonTerminalId,
        stream: &mut Scanner,
    ) -> Result<ParseTree, CompileError> {
        let rule_id = self.select_rule(nt, stream)?;
        let rule = self.grammar.rule(rule_id);

        let mut children = Vec::new();
        for &symbol in &rule.rhs {
            match symbol {
                Symbol::Terminal(t) => {
                    let token = stream.read(Some(self.grammar.terminal(t).name.as_str()))?;
                    children.push(ParseTree::Token(token));
                }
                Symbol::NonTerminal(sub) => {
                    children.push(self.parse_node(sub, stream)?);
                }
                Symbol::Epsilon => {}
            }
        }

        Ok(ParseTree::Node {
            name: self.grammar.nonterminal_ref(rule.lhs).name.clone(),
            children,
        })
    }
}

/// Parser-table cache keyed by grammar-file path. A cached entry is
/// regenerated whenever the grammar file is newer than the tables built
/// from it, the runtime analogue of regenerating a stale generated
/// parser.
static PARSER_CACHE: LazyLock<Mutex<HashMap<PathBuf, (SystemTime, Arc<TableParser>)>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Load (or reuse) the parser for a grammar file.
pub fn load_parser(path: &Path) -> Result<Arc<TableParser>, CompileError> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| {
            CompileError::Grammar(format!("cannot read grammar file {}: {}", path.display(), e))
        })?;

    let mut cache = PARSER_CACHE.lock().expect("parser cache poisoned");
    if let Some((stamp, parser)) = cache.get(path) {
        if *stamp >= modified {
            return Ok(parser.clone());
        }
    }

    let text = std::fs::read_to_string(path).map_err(|e| {
        CompileError::Grammar(format!("cannot read grammar file {}: {}", path.display(), e))
    })?;
    let grammar = Grammar::from_file_text(&text)?;
    let parser = Arc::new(TableParser::new(grammar)?);
    info!("generated parser tables for {}", path.display());
    cache.insert(path.to_path_buf(), (modified, parser.clone()));
    Ok(parser)
}
