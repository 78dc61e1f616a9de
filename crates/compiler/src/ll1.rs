//! LL(1) grammar analysis: EPS, FIRST, FOLLOW, and PREDICT sets.
//!
//! All four queries work on *words* (symbol sequences). Recursive grammars
//! are handled with visited-set guards so the walks terminate; the sets are
//! kept in `BTreeSet`s to make diagnostics and tests deterministic.

use crate::grammar::{Grammar, NonTerminalId, RuleId, Symbol, TerminalId};
use std::collections::{BTreeSet, HashSet};

pub struct Ll1Analysis<'g> {
    grammar: &'g Grammar,
}

impl<'g> Ll1Analysis<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Ll1Analysis { grammar }
    }

    /// True iff every symbol of `word` can derive the empty word.
    pub fn eps(&self, word: &[Symbol]) -> bool {
        word.iter()
            .all(|&symbol| self.symbol_eps(symbol, &mut HashSet::new()))
    }

    fn symbol_eps(&self, symbol: Symbol, visited: &mut HashSet<NonTerminalId>) -> bool {
        match symbol {
            Symbol::Epsilon => true,
            Symbol::Terminal(_) => false,
            Symbol::NonTerminal(nt) => {
                if !visited.insert(nt) {
                    // Cycle without an epsilon base case on this path.
                    return false;
                }
                let nullable = self.grammar.nonterminal_ref(nt).rules.iter().any(|&rule| {
                    self.grammar
                        .rule(rule)
                        .rhs
                        .iter()
                        .all(|&s| self.symbol_eps(s, visited))
                });
                visited.remove(&nt);
                nullable
            }
        }
    }

    /// The set of terminals that can begin a string derived from `word`.
    pub fn first(&self, word: &[Symbol]) -> BTreeSet<TerminalId> {
        self.first_guarded(word, &mut HashSet::new())
    }

    fn first_guarded(
        &self,
        word: &[Symbol],
        visited: &mut HashSet<RuleId>,
    ) -> BTreeSet<TerminalId> {
        let mut first = BTreeSet::new();
        for &symbol in word {
            match symbol {
                Symbol::Epsilon => continue,
                Symbol::Terminal(t) => {
                    first.insert(t);
                    break;
                }
                Symbol::NonTerminal(nt) => {
                    for &rule in &self.grammar.nonterminal_ref(nt).rules {
                        if visited.insert(rule) {
                            let sub = self.first_guarded(&self.grammar.rule(rule).rhs, visited);
                            first.extend(sub);
                        }
                    }
                    // Only look past this non-terminal if it can diminish.
                    if self.eps(&[symbol]) {
                        continue;
                    }
                    break;
                }
            }
        }
        first
    }

    /// The set of terminals that may immediately follow `nt` in any
    /// derivation from the start symbol.
    pub fn follow(&self, nt: NonTerminalId) -> BTreeSet<TerminalId> {
        self.follow_guarded(nt, &mut HashSet::new())
    }

    fn follow_guarded(
        &self,
        nt: NonTerminalId,
        visited: &mut HashSet<NonTerminalId>,
    ) -> BTreeSet<TerminalId> {
        let mut follow = BTreeSet::new();
        for rule in self.grammar.rules() {
            for (idx, &symbol) in rule.rhs.iter().enumerate() {
                if symbol != Symbol::NonTerminal(nt) {
                    continue;
                }
                let rest = &rule.rhs[idx + 1..];
                follow.extend(self.first(rest));
                if self.eps(rest) && visited.insert(rule.lhs) {
                    follow.extend(self.follow_guarded(rule.lhs, visited));
                }
            }
        }
        follow
    }

    /// PREDICT(A -> alpha) = FIRST(alpha), plus FOLLOW(A) if alpha is
    /// nullable.
    pub fn predict(&self, rule: RuleId) -> BTreeSet<TerminalId> {
        let rule_ref = self.grammar.rule(rule);
        let mut predict = self.first(&rule_ref.rhs);
        if self.eps(&rule_ref.rhs) {
            predict.extend(self.follow(rule_ref.lhs));
        }
        predict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;

    /// expr    -> Int math_tail EOF
    /// math_tail -> add Int math_tail | EPSILON
    fn math_grammar() -> Grammar {
        Grammar::from_file_text(
            r#"
            %TOKEN EOF "$"
            %TOKEN Int "[0-9]+"
            %TOKEN add "[+]"
            %START expr
            expr      -> Int math_tail EOF { head($1, $2) } ;
            math_tail -> add Int math_tail { next($2, $3) }
                       | EPSILON           { stop() } ;
            "#,
        )
        .unwrap()
    }

    fn names(grammar: &Grammar, set: &std::collections::BTreeSet<usize>) -> Vec<String> {
        let mut v: Vec<String> = set
            .iter()
            .map(|&t| grammar.terminal(t).name.clone())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn test_eps_terminal_word_is_not_nullable() {
        let grammar = math_grammar();
        let analysis = Ll1Analysis::new(&grammar);
        let int = Symbol::Terminal(grammar.terminal_id("Int").unwrap());
        assert!(!analysis.eps(&[int]));
        assert!(analysis.eps(&[Symbol::Epsilon]));
        assert!(analysis.eps(&[]));
    }

    #[test]
    fn test_eps_nullable_nonterminal() {
        let mut grammar = math_grammar();
        let tail = grammar.nonterminal("math_tail");
        let expr = grammar.nonterminal("expr");
        let analysis = Ll1Analysis::new(&grammar);
        assert!(analysis.eps(&[Symbol::NonTerminal(tail)]));
        assert!(!analysis.eps(&[Symbol::NonTerminal(expr)]));
    }

    #[test]
    fn test_first_skips_over_nullable_prefix() {
        let mut grammar = math_grammar();
        let tail = grammar.nonterminal("math_tail");
        let eof = grammar.terminal_id("EOF").unwrap();
        let analysis = Ll1Analysis::new(&grammar);
        // FIRST(math_tail EOF) sees through the nullable tail.
        let first = analysis.first(&[Symbol::NonTerminal(tail), Symbol::Terminal(eof)]);
        assert_eq!(names(&grammar, &first), vec!["EOF", "add"]);
    }

    #[test]
    fn test_first_stops_at_non_nullable_symbol() {
        let mut grammar = math_grammar();
        let expr = grammar.nonterminal("expr");
        let add = grammar.terminal_id("add").unwrap();
        let analysis = Ll1Analysis::new(&grammar);
        let first = analysis.first(&[Symbol::NonTerminal(expr), Symbol::Terminal(add)]);
        assert_eq!(names(&grammar, &first), vec!["Int"]);
    }

    #[test]
    fn test_follow_of_nullable_tail() {
        let mut grammar = math_grammar();
        let tail = grammar.nonterminal("math_tail");
        let analysis = Ll1Analysis::new(&grammar);
        let follow = analysis.follow(tail);
        assert_eq!(names(&grammar, &follow), vec!["EOF"]);
    }

    #[test]
    fn test_predict_adds_follow_for_nullable_rules() {
        let grammar = math_grammar();
        let analysis = Ll1Analysis::new(&grammar);
        // Rule 2 is the epsilon production of math_tail.
        let predict = analysis.predict(2);
        assert_eq!(names(&grammar, &predict), vec!["EOF"]);
        // Rule 1 starts with the add terminal.
        let predict = analysis.predict(1);
        assert_eq!(names(&grammar, &predict), vec!["add"]);
    }

    #[test]
    fn test_predict_sets_disjoint_in_ll1_grammar() {
        let mut grammar = math_grammar();
        let tail = grammar.nonterminal("math_tail");
        let analysis = Ll1Analysis::new(&grammar);
        let rules = grammar.nonterminal_ref(tail).rules.clone();
        let a = analysis.predict(rules[0]);
        let b = analysis.predict(rules[1]);
        assert!(a.is_disjoint(&b));
    }

    #[test]
    fn test_recursive_grammar_terminates() {
        // list -> item list | EPSILON ; item -> a list b | a
        let grammar = Grammar::from_file_text(
            r#"
            %TOKEN EOF "$"
            %TOKEN a "a"
            %TOKEN b "b"
            %START top
            top  -> list EOF { top($1) } ;
            list -> item list { cons($1, $2) } | EPSILON { nil() } ;
            item -> a list b { wrap($2) } ;
            "#,
        )
        .unwrap();
        let analysis = Ll1Analysis::new(&grammar);
        for id in 0..grammar.rules().len() {
            // Must not hang or overflow on the mutual recursion.
            let _ = analysis.predict(id);
        }
    }
}
