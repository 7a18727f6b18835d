//! Filter expressions over the evaluation context.
//!
//! A filter is a small path-query predicate such as
//! `@.pull_request.user.type != "Bot"` or `!@.has_push_access`. Paths start
//! at `@` (the context root) and select zero or more values; a comparison
//! matches when any selected pair satisfies it. A bare path matches when any
//! selected value is truthy.
//!
//! ```text
//! expr       := and ( "||" and )*
//! and        := unary ( "&&" unary )*
//! unary      := "!" unary | "(" expr ")" | comparison
//! comparison := operand ( ("==" | "!=") operand )?
//! operand    := path | string | number | true | false | null
//! path       := "@" ( "." ident | "." "*" | "[" int "]" | "[" "*" "]" | "[" string "]" )*
//! ```
//!
//! Filters that fail to parse never match, so a typo in a repository's
//! config leaves pull requests alone.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::EvaluationContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty filter expression")]
    Empty,
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("expected {expected} at offset {offset}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
        offset: usize,
    },
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    At,
    Dot,
    Star,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    Eq,
    Ne,
    And,
    Or,
    Ident(String),
    Str(String),
    Num(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At => f.write_str("'@'"),
            Self::Dot => f.write_str("'.'"),
            Self::Star => f.write_str("'*'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Not => f.write_str("'!'"),
            Self::Eq => f.write_str("'=='"),
            Self::Ne => f.write_str("'!='"),
            Self::And => f.write_str("'&&'"),
            Self::Or => f.write_str("'||'"),
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Num(n) => write!(f, "number {n}"),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '$'
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        let (token, width) = match (ch, next) {
            (c, _) if c.is_whitespace() => {
                i += 1;
                continue;
            }
            ('@', _) => (Token::At, 1),
            ('.', _) => (Token::Dot, 1),
            ('*', _) => (Token::Star, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('!', _) => (Token::Not, 1),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('"' | '\'', _) => {
                let (text, consumed) = lex_string(&chars[i..], offset)?;
                tokens.push((Token::Str(text), offset));
                i += consumed;
                continue;
            }
            (c, _)
                if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].1.is_ascii_digit()
                        || matches!(chars[i].1, '.' | 'e' | 'E' | '+' | '-'))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::InvalidNumber { text, offset })?;
                tokens.push((Token::Num(value), offset));
                continue;
            }
            (c, _) if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i].1) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().map(|&(_, c)| c).collect();
                tokens.push((Token::Ident(name), offset));
                continue;
            }
            (c, _) => return Err(ParseError::UnexpectedChar { ch: c, offset }),
        };

        tokens.push((token, offset));
        i += width;
    }

    Ok(tokens)
}

/// Lex a quoted string. Returns the unescaped text and the chars consumed.
fn lex_string(chars: &[(usize, char)], offset: usize) -> Result<(String, usize), ParseError> {
    let quote = chars[0].1;
    let mut text = String::new();
    let mut i = 1;

    while i < chars.len() {
        match chars[i].1 {
            c if c == quote => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|&(_, c)| c)
                    .ok_or(ParseError::UnterminatedString(offset))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(ParseError::UnterminatedString(offset))
}

// --- AST ---

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
struct Path(Vec<Segment>);

impl Path {
    /// Walk the context, fanning out on wildcards. Missing keys select nothing.
    fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.0 {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Key(key), Value::Object(map)) => next.extend(map.get(key)),
                    (Segment::Index(index), Value::Array(items)) => next.extend(items.get(*index)),
                    (Segment::Wildcard, Value::Object(map)) => next.extend(map.values()),
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    _ => {}
                }
            }
            current = next;
        }
        current
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Path),
    Literal(Value),
}

impl Operand {
    fn select<'a>(&'a self, root: &'a Value) -> Vec<&'a Value> {
        match self {
            Self::Path(path) => path.select(root),
            Self::Literal(value) => vec![value],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Truthy(Operand),
}

impl Expr {
    fn eval(&self, root: &Value) -> bool {
        match self {
            Self::Or(a, b) => a.eval(root) || b.eval(root),
            Self::And(a, b) => a.eval(root) && b.eval(root),
            Self::Not(inner) => !inner.eval(root),
            Self::Compare { left, op, right } => {
                let rights = right.select(root);
                left.select(root).into_iter().any(|l| {
                    rights
                        .iter()
                        .any(|r| values_equal(l, r) == (*op == CompareOp::Eq))
                })
            }
            Self::Truthy(operand) => operand.select(root).into_iter().any(is_truthy),
        }
    }
}

/// JSON equality with numbers compared by value (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// --- Parser ---

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |&(_, o)| o)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expected(&self, expected: &'static str) -> ParseError {
        ParseError::Expected {
            expected,
            found: self
                .peek()
                .map_or_else(|| "end of input".to_string(), ToString::to_string),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.expected(expected))
        }
    }

    fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::Empty);
        }
        let expr = self.or()?;
        if self.peek().is_some() {
            return Err(self.expected("end of input"));
        }
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.and()?;
        while self.eat(&Token::Or) {
            expr = Expr::Or(Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.unary()?;
        while self.eat(&Token::And) {
            expr = Expr::And(Box::new(expr), Box::new(self.unary()?));
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.or()?;
            self.expect(&Token::RParen, "')'")?;
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            _ => return Ok(Expr::Truthy(left)),
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Expr::Compare { left, op, right })
    }

    fn operand(&mut self) -> Result<Operand, ParseError> {
        let literal = match self.peek() {
            Some(Token::At) => {
                self.pos += 1;
                return self.path().map(Operand::Path);
            }
            Some(Token::Str(s)) => Value::String(s.clone()),
            Some(Token::Num(n)) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .ok_or_else(|| self.expected("finite number"))?,
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => return Err(self.expected("path or literal")),
            },
            _ => return Err(self.expected("path or literal")),
        };
        self.pos += 1;
        Ok(Operand::Literal(literal))
    }

    fn path(&mut self) -> Result<Path, ParseError> {
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(name)) => segments.push(Segment::Key(name)),
                        Some(Token::Star) => segments.push(Segment::Wildcard),
                        _ => {
                            self.pos -= 1;
                            return Err(self.expected("field name after '.'"));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let segment = match self.advance() {
                        Some(Token::Star) => Segment::Wildcard,
                        Some(Token::Str(key)) => Segment::Key(key),
                        Some(Token::Num(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            Segment::Index(n as usize)
                        }
                        _ => {
                            self.pos -= 1;
                            return Err(self.expected("index, quoted key, or '*'"));
                        }
                    };
                    segments.push(segment);
                    self.expect(&Token::RBracket, "']'")?;
                }
                _ => return Ok(Path(segments)),
            }
        }
    }
}

// --- Public API ---

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    expr: Expr,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        let expr = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        }
        .parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, context: &EvaluationContext) -> bool {
        self.expr.eval(context.as_value())
    }
}

impl FromStr for Filter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Result of evaluating a filter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every filter matched.
    Matched,
    /// The filter at `index` did not match.
    Rejected { index: usize },
    /// The filter at `index` could not be parsed and counts as not matching.
    Invalid { index: usize, error: ParseError },
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Evaluate filters in order, stopping at the first one that does not match.
pub fn check(context: &EvaluationContext, filters: &[String]) -> Verdict {
    let total = filters.len();
    for (index, source) in filters.iter().enumerate() {
        let filter = match Filter::parse(source) {
            Ok(filter) => filter,
            Err(error) => {
                warn!(
                    filter = %source,
                    %error,
                    "invalid filter [{} of {}], treating as no match",
                    index + 1,
                    total
                );
                return Verdict::Invalid { index, error };
            }
        };
        if !filter.matches(context) {
            debug!(filter = %source, "filter did not match [{} of {}]", index + 1, total);
            return Verdict::Rejected { index };
        }
        debug!(filter = %source, "filter matched [{} of {}]", index + 1, total);
    }
    Verdict::Matched
}

/// True only if every filter matches.
pub fn evaluate(context: &EvaluationContext, filters: &[String]) -> bool {
    check(context, filters).is_match()
}
