// src/core/grammar.rs

//! Reader for the grammar dialect plugins write their rules in.
//!
//! The dialect is a subset of Lark's EBNF: `name: body` definitions (lowercase
//! names are rules, uppercase names are terminals), alternatives with `|`,
//! groups, `[optional]` clauses, `?`/`*`/`+` suffixes, `"literal"i` strings,
//! `/regex/flags` patterns, `-> alias` on top-level alternatives, and the
//! `%import common.X` / `%ignore X` directives.

use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("Grammar syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("Unknown import '{0}'. Only the 'common' library is available.")]
    UnknownImport(String),
    #[error("'{0}' is defined more than once.")]
    Duplicate(String),
    #[error("Symbol '{symbol}' used in '{used_in}' is not defined.")]
    UndefinedSymbol { symbol: String, used_in: String },
    #[error("Terminal '{terminal}' cannot reference rule '{rule}'.")]
    RuleInTerminal { terminal: String, rule: String },
    #[error("Terminal '{0}' is defined recursively.")]
    RecursiveTerminal(String),
    #[error("Terminal '{terminal}' has an invalid pattern: {source}")]
    Pattern {
        terminal: String,
        #[source]
        source: regex::Error,
    },
    #[error("Grammar has no '{0}' rule.")]
    MissingStart(String),
    #[error("Composed grammar failed validation: {0}")]
    Invalid(String),
}

/// A grammar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Seq(Vec<Expr>),
    Alt(Vec<Expr>),
    Literal { text: String, insensitive: bool },
    Pattern { regex: String, flags: String },
    Ref(String),
    /// `[x]`: yields placeholders when absent.
    Optional(Box<Expr>),
    /// `x?`: yields nothing when absent.
    Maybe(Box<Expr>),
    Star(Box<Expr>),
    Plus(Box<Expr>),
}

/// One top-level alternative of a rule, with its optional `-> alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Inline {
    Never,
    /// `?rule`: replaced by its child when it has exactly one.
    Single,
    /// `_rule`: always spliced into the parent.
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub name: String,
    pub inline: Inline,
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalDef {
    pub name: String,
    pub expr: Expr,
}

/// A parsed grammar, not yet compiled into a matcher.
#[derive(Debug, Clone, Default)]
pub struct GrammarDef {
    pub rules: Vec<RuleDef>,
    pub terminals: Vec<TerminalDef>,
    pub ignore: Vec<String>,
}

/// Terminal names start (after any leading underscores) with an uppercase letter.
pub fn is_terminal_name(name: &str) -> bool {
    name.trim_start_matches('_')
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// Patterns of the `common` import library.
fn common_terminal(name: &str) -> Option<&'static str> {
    match name {
        "ESCAPED_STRING" => Some(r#""(?:[^"\\]|\\[\s\S])*""#),
        "WS" => Some(r"[ \t\f\r\n]+"),
        "WS_INLINE" => Some(r"[ \t]+"),
        "NEWLINE" => Some(r"(?:\r?\n)+"),
        "CNAME" => Some(r"[_a-zA-Z][_a-zA-Z0-9]*"),
        "LETTER" => Some(r"[a-zA-Z]"),
        "DIGIT" => Some(r"[0-9]"),
        "INT" => Some(r"[0-9]+"),
        "SIGNED_INT" => Some(r"[+-]?[0-9]+"),
        _ => None,
    }
}

impl GrammarDef {
    /// Reads grammar text into rule and terminal definitions.
    pub fn parse(text: &str) -> Result<Self, GrammarError> {
        let mut def = Self::default();
        let mut seen = HashSet::new();

        for (line_no, definition) in join_continuations(text) {
            if let Some(directive) = definition.strip_prefix('%') {
                def.apply_directive(directive.trim(), line_no, &mut seen)?;
                continue;
            }

            let (head, body) = definition.split_once(':').ok_or_else(|| GrammarError::Syntax {
                line: line_no,
                message: format!("expected 'name: body', found '{}'", definition),
            })?;

            let (name, inline) = parse_head(head.trim(), line_no)?;
            if !seen.insert(name.clone()) {
                return Err(GrammarError::Duplicate(name));
            }

            let alternatives = BodyParser::new(body, line_no).parse_top()?;
            if is_terminal_name(&name) {
                let expr = if alternatives.len() == 1 {
                    alternatives.into_iter().map(|a| a.expr).next().unwrap_or(Expr::Seq(Vec::new()))
                } else {
                    Expr::Alt(alternatives.into_iter().map(|a| a.expr).collect())
                };
                def.terminals.push(TerminalDef { name, expr });
            } else {
                def.rules.push(RuleDef {
                    name,
                    inline,
                    alternatives,
                });
            }
        }
        Ok(def)
    }

    fn apply_directive(
        &mut self,
        directive: &str,
        line: usize,
        seen: &mut HashSet<String>,
    ) -> Result<(), GrammarError> {
        let mut parts = directive.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("import"), Some(path)) => {
                let name = path
                    .strip_prefix("common.")
                    .ok_or_else(|| GrammarError::UnknownImport(path.to_string()))?;
                let pattern =
                    common_terminal(name).ok_or_else(|| GrammarError::UnknownImport(path.to_string()))?;
                // Importing twice is harmless.
                if seen.insert(name.to_string()) {
                    self.terminals.push(TerminalDef {
                        name: name.to_string(),
                        expr: Expr::Pattern {
                            regex: pattern.to_string(),
                            flags: String::new(),
                        },
                    });
                }
                Ok(())
            }
            (Some("ignore"), Some(name)) => {
                self.ignore.push(name.to_string());
                Ok(())
            }
            _ => Err(GrammarError::Syntax {
                line,
                message: format!("unsupported directive '%{}'", directive),
            }),
        }
    }
}

/// Splits text into definitions, joining lines that start with `|` onto the
/// previous definition and dropping comments and blank lines.
fn join_continuations(text: &str) -> Vec<(usize, String)> {
    let mut definitions: Vec<(usize, String)> = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        match definitions.last_mut() {
            Some((_, previous)) if line.starts_with('|') => {
                previous.push(' ');
                previous.push_str(line);
            }
            _ => definitions.push((idx + 1, line.to_string())),
        }
    }
    definitions
}

fn parse_head(head: &str, line: usize) -> Result<(String, Inline), GrammarError> {
    let (name, mut inline) = match head.strip_prefix('?') {
        Some(rest) => (rest, Inline::Single),
        None => (head, Inline::Never),
    };
    // Terminal priorities (`NAME.2`) are accepted and ignored.
    let name = name.split('.').next().unwrap_or(name);
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(GrammarError::Syntax {
            line,
            message: format!("invalid definition name '{}'", head),
        });
    }
    if name.starts_with('_') && !is_terminal_name(name) {
        inline = Inline::Always;
    }
    Ok((name.to_string(), inline))
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str { text: String, insensitive: bool },
    Regex { pattern: String, flags: String },
    Pipe,
    Arrow,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Star,
    Plus,
}

struct BodyParser {
    tokens: Vec<Tok>,
    pos: usize,
    line: usize,
    error: Option<String>,
}

impl BodyParser {
    fn new(body: &str, line: usize) -> Self {
        let (tokens, error) = match tokenize(body) {
            Ok(tokens) => (tokens, None),
            Err(message) => (Vec::new(), Some(message)),
        };
        Self {
            tokens,
            pos: 0,
            line,
            error,
        }
    }

    fn fail<T>(&self, message: impl Into<String>) -> Result<T, GrammarError> {
        Err(GrammarError::Syntax {
            line: self.line,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_top(mut self) -> Result<Vec<Alternative>, GrammarError> {
        if let Some(message) = self.error.take() {
            return self.fail(message);
        }
        let mut alternatives = vec![self.parse_alternative(true)?];
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            alternatives.push(self.parse_alternative(true)?);
        }
        if let Some(tok) = self.peek() {
            return self.fail(format!("unexpected {:?}", tok));
        }
        Ok(alternatives)
    }

    fn parse_alternative(&mut self, top_level: bool) -> Result<Alternative, GrammarError> {
        let mut items = Vec::new();
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Pipe | Tok::RParen | Tok::RBracket => break,
                Tok::Arrow => {
                    if !top_level {
                        return self.fail("aliases are only allowed on top-level alternatives");
                    }
                    self.pos += 1;
                    let alias = match self.next() {
                        Some(Tok::Ident(name)) => name,
                        _ => return self.fail("expected a name after '->'"),
                    };
                    return Ok(Alternative {
                        expr: seq(items),
                        alias: Some(alias),
                    });
                }
                _ => items.push(self.parse_item()?),
            }
        }
        Ok(Alternative {
            expr: seq(items),
            alias: None,
        })
    }

    fn parse_item(&mut self) -> Result<Expr, GrammarError> {
        let atom = self.parse_atom()?;
        Ok(match self.peek() {
            Some(Tok::Question) => {
                self.pos += 1;
                Expr::Maybe(Box::new(atom))
            }
            Some(Tok::Star) => {
                self.pos += 1;
                Expr::Star(Box::new(atom))
            }
            Some(Tok::Plus) => {
                self.pos += 1;
                Expr::Plus(Box::new(atom))
            }
            _ => atom,
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, GrammarError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(Expr::Ref(name)),
            Some(Tok::Str { text, insensitive }) => Ok(Expr::Literal { text, insensitive }),
            Some(Tok::Regex { pattern, flags }) => Ok(Expr::Pattern {
                regex: pattern,
                flags,
            }),
            Some(Tok::LParen) => {
                let inner = self.parse_group()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let inner = self.parse_group()?;
                self.expect(&Tok::RBracket, "']'")?;
                Ok(Expr::Optional(Box::new(inner)))
            }
            Some(tok) => self.fail(format!("unexpected {:?}", tok)),
            None => self.fail("unexpected end of rule body"),
        }
    }

    fn parse_group(&mut self) -> Result<Expr, GrammarError> {
        let mut alternatives = vec![self.parse_alternative(false)?.expr];
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            alternatives.push(self.parse_alternative(false)?.expr);
        }
        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Expr::Alt(alternatives)
        })
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), GrammarError> {
        if self.next().as_ref() == Some(tok) {
            Ok(())
        } else {
            self.fail(format!("expected {}", what))
        }
    }
}

fn seq(mut items: Vec<Expr>) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Expr::Seq(items)
    }
}

fn tokenize(body: &str) -> Result<Vec<Tok>, String> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    break; // comment to end of line
                }
                let mut pattern = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => {
                            pattern.push('\\');
                            if let Some(escaped) = chars.next() {
                                pattern.push(escaped);
                            }
                        }
                        Some('/') => break,
                        Some(other) => pattern.push(other),
                        None => return Err("unterminated regular expression".to_string()),
                    }
                }
                let mut flags = String::new();
                while let Some(&f) = chars.peek() {
                    if "imsx".contains(f) {
                        flags.push(f);
                        chars.next();
                    } else {
                        break;
                    }
                }
                // The escaped delimiter is not a regex escape.
                let pattern = pattern.replace("\\/", "/");
                tokens.push(Tok::Regex { pattern, flags });
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => return Err("unterminated string".to_string()),
                        },
                        Some('"') => break,
                        Some(other) => text.push(other),
                        None => return Err("unterminated string".to_string()),
                    }
                }
                let insensitive = chars.peek() == Some(&'i');
                if insensitive {
                    chars.next();
                }
                if text.is_empty() {
                    return Err("empty string literal".to_string());
                }
                tokens.push(Tok::Str { text, insensitive });
            }
            '-' => {
                chars.next();
                if chars.next() != Some('>') {
                    return Err("expected '->'".to_string());
                }
                tokens.push(Tok::Arrow);
            }
            '|' | '(' | ')' | '[' | ']' | '?' | '*' | '+' => {
                chars.next();
                tokens.push(match c {
                    '|' => Tok::Pipe,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '?' => Tok::Question,
                    '*' => Tok::Star,
                    _ => Tok::Plus,
                });
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        ident.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Tok::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules_terminals_and_directives() {
        let text = r#"
            ?start: command [";"]
            // a comment
            command: create_command
            create_command: CREATE_KW NAME -> create
            CREATE_KW: "CREATE"i
            NAME: /[a-z]+/
            %import common.WS
            %ignore WS
        "#;
        let def = GrammarDef::parse(text).unwrap();

        assert_eq!(def.rules.len(), 3);
        assert_eq!(def.rules[0].name, "start");
        assert_eq!(def.rules[0].inline, Inline::Single);
        assert_eq!(def.rules[2].alternatives[0].alias.as_deref(), Some("create"));
        let terminal_names: Vec<_> = def.terminals.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(terminal_names, vec!["CREATE_KW", "NAME", "WS"]);
        assert_eq!(def.ignore, vec!["WS".to_string()]);
    }

    #[test]
    fn test_parse_body_structure() {
        let def = GrammarDef::parse(r#"fields: field ("," field)* [x | y] z? "S"i+"#).unwrap();
        let expr = &def.rules[0].alternatives[0].expr;
        let Expr::Seq(items) = expr else {
            panic!("expected a sequence, got {:?}", expr);
        };
        assert_eq!(items.len(), 5);
        assert!(matches!(&items[1], Expr::Star(_)));
        assert!(matches!(&items[2], Expr::Optional(inner) if matches!(**inner, Expr::Alt(_))));
        assert!(matches!(&items[3], Expr::Maybe(_)));
        assert!(matches!(&items[4], Expr::Plus(inner) if matches!(**inner, Expr::Literal { insensitive: true, .. })));
    }

    #[test]
    fn test_continuation_lines_join_alternatives() {
        let def = GrammarDef::parse("value: a\n    | b\n    | c").unwrap();
        assert_eq!(def.rules[0].alternatives.len(), 3);
    }

    #[test]
    fn test_underscore_rules_are_always_inlined() {
        let def = GrammarDef::parse("_item: NAME\n_KW: \"x\"").unwrap();
        assert_eq!(def.rules[0].inline, Inline::Always);
        assert!(is_terminal_name("_KW"));
    }

    #[test]
    fn test_grammar_errors() {
        assert!(matches!(
            GrammarDef::parse("a: b\na: c"),
            Err(GrammarError::Duplicate(name)) if name == "a"
        ));
        assert!(matches!(
            GrammarDef::parse("%import other.THING"),
            Err(GrammarError::UnknownImport(_))
        ));
        assert!(matches!(
            GrammarDef::parse("a: \"unterminated"),
            Err(GrammarError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            GrammarDef::parse("no colon here"),
            Err(GrammarError::Syntax { .. })
        ));
        assert!(matches!(
            GrammarDef::parse("a: (b -> c)"),
            Err(GrammarError::Syntax { .. })
        ));
    }
}
