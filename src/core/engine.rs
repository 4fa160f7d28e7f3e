// src/core/engine.rs

//! Compiles a [`GrammarDef`] into an immutable matcher and parses text with it.
//!
//! Matching is scannerless: terminals are tried directly against the input at
//! the current offset (after skipping `%ignore`d terminals), and every
//! alternative is explored. The first derivation that consumes the whole input
//! wins, so plugin grammars do not need to be LALR-compatible.

use super::grammar::{Expr, GrammarDef, GrammarError, Inline, is_terminal_name};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

/// A node of the parse tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub data: String,
    pub children: Vec<Child>,
}

/// A matched terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: String,
    pub text: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Tree(Tree),
    Token(Token),
    /// Placeholder for an absent `[optional]` item.
    Missing,
}

/// Why a text did not match the grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchFailure {
    /// No terminal of the grammar matches at this point.
    Lexical {
        offset: usize,
        line: usize,
        column: usize,
        found: char,
    },
    /// A terminal matched, but not one the grammar allows here.
    Unexpected {
        offset: usize,
        line: usize,
        column: usize,
        found: String,
        expected: Vec<String>,
    },
    UnexpectedEnd { expected: Vec<String> },
}

#[derive(Debug)]
struct TokenDef {
    name: String,
    keep: bool,
    patterns: Vec<Regex>,
}

#[derive(Debug, Clone)]
enum Node {
    Seq(Vec<Node>),
    Alt(Vec<Node>),
    Optional { inner: Box<Node>, slots: usize },
    Maybe(Box<Node>),
    Star(Box<Node>),
    Plus(Box<Node>),
    Rule(usize),
    Token(usize),
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    inline: Inline,
    alternatives: Vec<(Node, Option<String>)>,
}

/// An immutable, compiled grammar. Rebuilding means compiling a new one.
#[derive(Debug)]
pub struct Grammar {
    rules: Vec<CompiledRule>,
    tokens: Vec<TokenDef>,
    ignore: Vec<usize>,
    start: usize,
}

type Derivations = Vec<(usize, Vec<Child>)>;

impl Grammar {
    /// Reads and compiles grammar text whose entry rule is `start`.
    pub fn from_text(text: &str) -> Result<Self, GrammarError> {
        Self::compile(&GrammarDef::parse(text)?, "start")
    }

    pub fn compile(def: &GrammarDef, start: &str) -> Result<Self, GrammarError> {
        let mut builder = Builder::new(def)?;

        let rule_index: HashMap<&str, usize> = def
            .rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.as_str(), i))
            .collect();

        let mut rules = Vec::with_capacity(def.rules.len());
        for rule in &def.rules {
            let mut alternatives = Vec::with_capacity(rule.alternatives.len());
            for alt in &rule.alternatives {
                let node = builder.node(&alt.expr, &rule.name, &rule_index)?;
                alternatives.push((node, alt.alias.clone()));
            }
            rules.push(CompiledRule {
                name: rule.name.clone(),
                inline: rule.inline,
                alternatives,
            });
        }

        let start = *rule_index
            .get(start)
            .ok_or_else(|| GrammarError::MissingStart(start.to_string()))?;

        let mut ignore = Vec::new();
        for name in &def.ignore {
            ignore.push(builder.terminal(name, "%ignore")?);
        }

        Ok(Self {
            rules,
            tokens: builder.tokens,
            ignore,
            start,
        })
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    /// Parses `text` into a tree rooted at the start rule.
    pub fn parse(&self, text: &str) -> Result<Tree, MatchFailure> {
        let mut matcher = Matcher {
            grammar: self,
            text,
            memo: HashMap::new(),
            active: HashSet::new(),
            furthest: 0,
            expected: BTreeSet::new(),
        };

        let derivations = matcher.rule(self.start, 0);
        let end = text.len();
        let mut furthest_partial = 0;
        for (stop, children) in derivations.iter() {
            let stop = matcher.skip_ignored(*stop);
            if stop == end {
                return Ok(into_root(&self.rule_name(self.start), children.clone()));
            }
            furthest_partial = furthest_partial.max(stop);
        }

        Err(matcher.failure(furthest_partial))
    }

    fn rule_name(&self, index: usize) -> String {
        self.rules
            .get(index)
            .map(|r| r.name.clone())
            .unwrap_or_default()
    }
}

fn into_root(start: &str, mut children: Vec<Child>) -> Tree {
    if children.len() == 1
        && let Some(Child::Tree(tree)) = children.pop()
    {
        return tree;
    }
    Tree {
        data: start.to_string(),
        children,
    }
}

// --- Compilation ---

struct Builder<'d> {
    def: &'d GrammarDef,
    tokens: Vec<TokenDef>,
    named: HashMap<String, usize>,
    literals: HashMap<(String, bool), usize>,
    anonymous_patterns: usize,
}

impl<'d> Builder<'d> {
    fn new(def: &'d GrammarDef) -> Result<Self, GrammarError> {
        let mut builder = Self {
            def,
            tokens: Vec::new(),
            named: HashMap::new(),
            literals: HashMap::new(),
            anonymous_patterns: 0,
        };
        for terminal in &def.terminals {
            builder.terminal(&terminal.name, &terminal.name)?;
        }
        Ok(builder)
    }

    /// Index of a named terminal, compiling it on first use.
    fn terminal(&mut self, name: &str, used_in: &str) -> Result<usize, GrammarError> {
        if let Some(&index) = self.named.get(name) {
            return Ok(index);
        }
        let definition = self
            .def
            .terminals
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| GrammarError::UndefinedSymbol {
                symbol: name.to_string(),
                used_in: used_in.to_string(),
            })?;

        // Top-level alternatives stay separate so each length can be tried.
        let branches: Vec<&Expr> = match &definition.expr {
            Expr::Alt(alternatives) => alternatives.iter().collect(),
            other => vec![other],
        };
        let mut patterns = Vec::with_capacity(branches.len());
        for branch in branches {
            let mut stack = vec![name.to_string()];
            let source = self.terminal_source(branch, name, &mut stack)?;
            patterns.push(anchored(&source, name)?);
        }

        let index = self.tokens.len();
        self.tokens.push(TokenDef {
            name: name.to_string(),
            keep: !name.starts_with('_'),
            patterns,
        });
        self.named.insert(name.to_string(), index);
        Ok(index)
    }

    /// Regex source for a terminal expression, inlining referenced terminals.
    fn terminal_source(
        &self,
        expr: &Expr,
        terminal: &str,
        stack: &mut Vec<String>,
    ) -> Result<String, GrammarError> {
        Ok(match expr {
            Expr::Literal { text, insensitive } => literal_source(text, *insensitive),
            Expr::Pattern { regex, flags } => pattern_source(regex, flags),
            Expr::Seq(items) => {
                let mut out = String::new();
                for item in items {
                    out.push_str(&self.terminal_source(item, terminal, stack)?);
                }
                out
            }
            Expr::Alt(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.terminal_source(item, terminal, stack)?);
                }
                format!("(?:{})", parts.join("|"))
            }
            Expr::Optional(inner) | Expr::Maybe(inner) => {
                format!("(?:{})?", self.terminal_source(inner, terminal, stack)?)
            }
            Expr::Star(inner) => format!("(?:{})*", self.terminal_source(inner, terminal, stack)?),
            Expr::Plus(inner) => format!("(?:{})+", self.terminal_source(inner, terminal, stack)?),
            Expr::Ref(name) => {
                if !is_terminal_name(name) {
                    return Err(GrammarError::RuleInTerminal {
                        terminal: terminal.to_string(),
                        rule: name.clone(),
                    });
                }
                if stack.contains(name) {
                    return Err(GrammarError::RecursiveTerminal(name.clone()));
                }
                let definition = self
                    .def
                    .terminals
                    .iter()
                    .find(|t| &t.name == name)
                    .ok_or_else(|| GrammarError::UndefinedSymbol {
                        symbol: name.clone(),
                        used_in: terminal.to_string(),
                    })?;
                stack.push(name.clone());
                let inner = self.terminal_source(&definition.expr, terminal, stack)?;
                stack.pop();
                format!("(?:{})", inner)
            }
        })
    }

    fn node(
        &mut self,
        expr: &Expr,
        rule: &str,
        rules: &HashMap<&str, usize>,
    ) -> Result<Node, GrammarError> {
        Ok(match expr {
            Expr::Seq(items) => Node::Seq(self.nodes(items, rule, rules)?),
            Expr::Alt(items) => Node::Alt(self.nodes(items, rule, rules)?),
            Expr::Optional(inner) => Node::Optional {
                inner: Box::new(self.node(inner, rule, rules)?),
                slots: self.slots(inner),
            },
            Expr::Maybe(inner) => Node::Maybe(Box::new(self.node(inner, rule, rules)?)),
            Expr::Star(inner) => Node::Star(Box::new(self.node(inner, rule, rules)?)),
            Expr::Plus(inner) => Node::Plus(Box::new(self.node(inner, rule, rules)?)),
            Expr::Ref(name) if is_terminal_name(name) => Node::Token(self.terminal(name, rule)?),
            Expr::Ref(name) => match rules.get(name.as_str()) {
                Some(&index) => Node::Rule(index),
                None => {
                    return Err(GrammarError::UndefinedSymbol {
                        symbol: name.clone(),
                        used_in: rule.to_string(),
                    });
                }
            },
            Expr::Literal { text, insensitive } => {
                let key = (text.clone(), *insensitive);
                if let Some(&index) = self.literals.get(&key) {
                    Node::Token(index)
                } else {
                    let index = self.tokens.len();
                    self.tokens.push(TokenDef {
                        name: format!("\"{}\"", text),
                        keep: false,
                        patterns: vec![anchored(&literal_source(text, *insensitive), rule)?],
                    });
                    self.literals.insert(key, index);
                    Node::Token(index)
                }
            }
            Expr::Pattern { regex, flags } => {
                let name = format!("__ANON_{}", self.anonymous_patterns);
                self.anonymous_patterns += 1;
                let index = self.tokens.len();
                self.tokens.push(TokenDef {
                    name,
                    keep: true,
                    patterns: vec![anchored(&pattern_source(regex, flags), rule)?],
                });
                Node::Token(index)
            }
        })
    }

    fn nodes(
        &mut self,
        items: &[Expr],
        rule: &str,
        rules: &HashMap<&str, usize>,
    ) -> Result<Vec<Node>, GrammarError> {
        items.iter().map(|item| self.node(item, rule, rules)).collect()
    }

    /// Number of placeholders an absent `[expr]` contributes: one per kept item.
    fn slots(&self, expr: &Expr) -> usize {
        match expr {
            Expr::Seq(items) => items.iter().map(|i| self.slots(i)).sum(),
            Expr::Alt(items) => items.iter().map(|i| self.slots(i)).max().unwrap_or(0),
            Expr::Ref(name) => usize::from(!name.starts_with('_') || !is_terminal_name(name)),
            Expr::Pattern { .. } => 1,
            Expr::Optional(inner) => self.slots(inner),
            Expr::Literal { .. } | Expr::Maybe(_) | Expr::Star(_) | Expr::Plus(_) => 0,
        }
    }
}

fn literal_source(text: &str, insensitive: bool) -> String {
    if insensitive {
        format!("(?i:{})", regex::escape(text))
    } else {
        regex::escape(text)
    }
}

fn pattern_source(regex: &str, flags: &str) -> String {
    if flags.is_empty() {
        format!("(?:{})", regex)
    } else {
        format!("(?{}:{})", flags, regex)
    }
}

fn anchored(source: &str, terminal: &str) -> Result<Regex, GrammarError> {
    Regex::new(&format!("^(?:{})", source)).map_err(|e| GrammarError::Pattern {
        terminal: terminal.to_string(),
        source: e,
    })
}

// --- Matching ---

struct Matcher<'g, 't> {
    grammar: &'g Grammar,
    text: &'t str,
    memo: HashMap<(usize, usize), Rc<Derivations>>,
    active: HashSet<(usize, usize)>,
    furthest: usize,
    expected: BTreeSet<String>,
}

impl Matcher<'_, '_> {
    fn skip_ignored(&self, mut pos: usize) -> usize {
        loop {
            let rest = self.text.get(pos..).unwrap_or("");
            let skipped = self
                .grammar
                .ignore
                .iter()
                .filter_map(|&i| self.grammar.tokens.get(i))
                .flat_map(|t| t.patterns.iter())
                .filter_map(|re| re.find(rest).map(|m| m.end()))
                .max()
                .unwrap_or(0);
            if skipped == 0 {
                return pos;
            }
            pos += skipped;
        }
    }

    /// Candidate lengths of a terminal at `pos`, longest first.
    fn token_lengths(&self, token: &TokenDef, pos: usize) -> Vec<usize> {
        let rest = self.text.get(pos..).unwrap_or("");
        let mut lengths: Vec<usize> = token
            .patterns
            .iter()
            .filter_map(|re| re.find(rest).map(|m| m.end()))
            .filter(|&len| len > 0)
            .collect();
        lengths.sort_unstable_by(|a, b| b.cmp(a));
        lengths.dedup();
        lengths
    }

    fn record_failure(&mut self, pos: usize, name: &str) {
        if pos > self.furthest {
            self.furthest = pos;
            self.expected.clear();
        }
        if pos == self.furthest {
            self.expected.insert(name.to_string());
        }
    }

    fn node(&mut self, node: &Node, pos: usize) -> Derivations {
        match node {
            Node::Token(index) => {
                let grammar = self.grammar;
                let Some(token) = grammar.tokens.get(*index) else {
                    return Vec::new();
                };
                let start = self.skip_ignored(pos);
                let lengths = self.token_lengths(token, start);
                if lengths.is_empty() {
                    self.record_failure(start, &token.name);
                }
                lengths
                    .into_iter()
                    .map(|len| {
                        let children = if token.keep {
                            vec![Child::Token(Token {
                                kind: token.name.clone(),
                                text: self.text.get(start..start + len).unwrap_or("").to_string(),
                                offset: start,
                            })]
                        } else {
                            Vec::new()
                        };
                        (start + len, children)
                    })
                    .collect()
            }
            Node::Seq(items) => {
                let mut results: Derivations = vec![(pos, Vec::new())];
                for item in items {
                    let mut next = Vec::new();
                    for (at, children) in results {
                        for (end, more) in self.node(item, at) {
                            let mut combined = children.clone();
                            combined.extend(more);
                            next.push((end, combined));
                        }
                    }
                    if next.is_empty() {
                        return next;
                    }
                    results = next;
                }
                results
            }
            Node::Alt(items) => {
                let mut results = Vec::new();
                for item in items {
                    results.extend(self.node(item, pos));
                }
                results
            }
            Node::Optional { inner, slots } => {
                let mut results = self.node(inner, pos);
                results.push((pos, vec![Child::Missing; *slots]));
                results
            }
            Node::Maybe(inner) => {
                let mut results = self.node(inner, pos);
                results.push((pos, Vec::new()));
                results
            }
            Node::Star(inner) => self.repeat(inner, pos),
            Node::Plus(inner) => {
                let mut results = Vec::new();
                for (end, children) in self.node(inner, pos) {
                    for (stop, more) in self.repeat(inner, end) {
                        let mut combined = children.clone();
                        combined.extend(more);
                        results.push((stop, combined));
                    }
                }
                results
            }
            Node::Rule(index) => self.rule(*index, pos).as_ref().clone(),
        }
    }

    /// Zero or more repetitions, longest first.
    fn repeat(&mut self, inner: &Node, pos: usize) -> Derivations {
        let mut results = Vec::new();
        for (end, children) in self.node(inner, pos) {
            if end <= pos {
                continue;
            }
            for (stop, more) in self.repeat(inner, end) {
                let mut combined = children.clone();
                combined.extend(more);
                results.push((stop, combined));
            }
        }
        results.push((pos, Vec::new()));
        results
    }

    fn rule(&mut self, index: usize, pos: usize) -> Rc<Derivations> {
        if let Some(cached) = self.memo.get(&(index, pos)) {
            return Rc::clone(cached);
        }
        // Left recursion is not supported; re-entering yields no derivation.
        if !self.active.insert((index, pos)) {
            return Rc::new(Vec::new());
        }

        let grammar = self.grammar;
        let mut results = Vec::new();
        if let Some(rule) = grammar.rules.get(index) {
            for (node, alias) in &rule.alternatives {
                for (end, children) in self.node(node, pos) {
                    results.push((end, shape(rule, alias.as_deref(), children)));
                }
            }
        }

        self.active.remove(&(index, pos));
        let results = Rc::new(results);
        self.memo.insert((index, pos), Rc::clone(&results));
        results
    }

    fn failure(&self, furthest_partial: usize) -> MatchFailure {
        let pos = self.furthest.max(furthest_partial);
        let expected: Vec<String> = if pos == self.furthest {
            self.expected.iter().cloned().collect()
        } else {
            Vec::new()
        };

        let rest = self.text.get(pos..).unwrap_or("");
        let Some(found_char) = rest.chars().next() else {
            return MatchFailure::UnexpectedEnd { expected };
        };
        let (line, column) = line_and_column(self.text, pos);

        let longest = self
            .grammar
            .tokens
            .iter()
            .flat_map(|t| self.token_lengths(t, pos))
            .max();
        match longest {
            None => MatchFailure::Lexical {
                offset: pos,
                line,
                column,
                found: found_char,
            },
            Some(len) => MatchFailure::Unexpected {
                offset: pos,
                line,
                column,
                found: rest.get(..len).unwrap_or(rest).to_string(),
                expected,
            },
        }
    }
}

/// Applies the rule's inlining policy to one derivation.
fn shape(rule: &CompiledRule, alias: Option<&str>, children: Vec<Child>) -> Vec<Child> {
    if let Some(alias) = alias {
        return vec![Child::Tree(Tree {
            data: alias.to_string(),
            children,
        })];
    }
    match rule.inline {
        Inline::Always => children,
        Inline::Single if children.len() == 1 => children,
        _ => vec![Child::Tree(Tree {
            data: rule.name.clone(),
            children,
        })],
    }
}

fn line_and_column(text: &str, offset: usize) -> (usize, usize) {
    let before = text.get(..offset).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAMMAR: &str = r#"
        ?start: command [";"]
        command: create_command | list_command | execute_command
        create_command: CREATE_KW KIND NAME [ENGINE_KW ENGINE] WITH_KW fields
        list_command: "LIST"i KIND "S"?
        execute_command: "RUN"i NAME (mount)*
        mount: "MOUNT"i NAME
        fields: field ("," field)*
        field: NAME "=" ESCAPED_STRING
        KIND: "ENV"i | "ENVIRONMENT"i | "SECRET"i
        CREATE_KW: "CREATE"i
        WITH_KW: "WITH"i
        ENGINE_KW: "ENGINE"i
        ENGINE: "K8S_JOB"i
        NAME: /[a-zA-Z0-9]([a-zA-Z0-9_.-]*[a-zA-Z0-9_])?|[a-zA-Z0-9]/
        %import common.ESCAPED_STRING
        %import common.WS
        %ignore WS
    "#;

    fn grammar() -> Grammar {
        Grammar::from_text(GRAMMAR).unwrap()
    }

    fn command_child(tree: &Tree) -> &Tree {
        match tree.children.first() {
            Some(Child::Tree(inner)) => inner,
            other => panic!("expected a subtree, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keeps_named_terminals_and_drops_literals() {
        let tree = grammar().parse("create secret db WITH user=\"admin\";").unwrap();
        assert_eq!(tree.data, "command");

        let create = command_child(&tree);
        assert_eq!(create.data, "create_command");
        let kinds: Vec<String> = create
            .children
            .iter()
            .map(|c| match c {
                Child::Token(t) => t.kind.clone(),
                Child::Tree(t) => t.data.clone(),
                Child::Missing => "<missing>".to_string(),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["CREATE_KW", "KIND", "NAME", "<missing>", "<missing>", "WITH_KW", "fields"]
        );
    }

    #[test]
    fn test_terminal_alternatives_try_every_length() {
        let tree = grammar().parse("CREATE ENVIRONMENT prod WITH a=\"1\"").unwrap();
        let create = command_child(&tree);
        assert!(matches!(
            create.children.get(1),
            Some(Child::Token(Token { text, .. })) if text == "ENVIRONMENT"
        ));
    }

    #[test]
    fn test_optional_suffix_without_word_boundary() {
        assert!(grammar().parse("LIST SECRETS;").is_ok());
        assert!(grammar().parse("list secret").is_ok());
    }

    #[test]
    fn test_repetition_collects_every_clause() {
        let tree = grammar().parse("RUN job MOUNT a MOUNT b;").unwrap();
        let run = command_child(&tree);
        let mounts = run
            .children
            .iter()
            .filter(|c| matches!(c, Child::Tree(t) if t.data == "mount"))
            .count();
        assert_eq!(mounts, 2);
    }

    #[test]
    fn test_lexical_failure_reports_position() {
        let failure = grammar().parse("CREATE SECRET db WITH a=\"1\" @").unwrap_err();
        assert!(matches!(
            failure,
            MatchFailure::Lexical { found: '@', line: 1, column: 29, .. }
        ));
    }

    #[test]
    fn test_syntax_failure_lists_expected_terminals() {
        let failure = grammar().parse("CREATE SECRET db a=\"1\"").unwrap_err();
        match failure {
            MatchFailure::Unexpected { found, expected, .. } => {
                assert_eq!(found, "a");
                assert!(expected.contains(&"WITH_KW".to_string()));
                assert!(expected.contains(&"ENGINE_KW".to_string()));
            }
            other => panic!("unexpected failure {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_end_of_input() {
        let failure = grammar().parse("CREATE SECRET").unwrap_err();
        assert!(matches!(failure, MatchFailure::UnexpectedEnd { expected } if expected.contains(&"NAME".to_string())));
    }

    #[test]
    fn test_compile_rejects_undefined_symbols() {
        let result = Grammar::from_text("start: missing_rule");
        assert!(matches!(result, Err(GrammarError::UndefinedSymbol { symbol, .. }) if symbol == "missing_rule"));

        let result = Grammar::from_text("start: A\nA: B");
        assert!(matches!(result, Err(GrammarError::UndefinedSymbol { .. })));

        let result = Grammar::from_text("start: A\nA: \"x\" A");
        assert!(matches!(result, Err(GrammarError::RecursiveTerminal(_))));
    }

    #[test]
    fn test_alias_renames_the_tree() {
        let grammar = Grammar::from_text(
            "start: \"GET\"i NAME -> get_by_name | \"GET\"i \"THIS\"i -> get_this\nNAME: /[a-z]+/\n%import common.WS\n%ignore WS",
        )
        .unwrap();
        assert_eq!(grammar.parse("get this").unwrap().data, "get_by_name");
        assert_eq!(grammar.parse("get THIS").unwrap().data, "get_this");
    }
}
