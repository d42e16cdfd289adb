//! Algorithm expression language.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary ('*' unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | '(' expr ')' | IDENT '.' IDENT | IDENT '(' args ')'
//! args    := [arg (',' arg)* [',']]
//! arg     := IDENT '=' expr | expr
//! ```
//!
//! `IDENT '.' IDENT` references `sensors.<id>` or `fans.<id>`; calls resolve
//! against an [`AlgorithmRegistry`]. Parsing produces an [`Ast`]; lowering
//! resolves names against the store and constructs the algorithms.

use core::fmt;

use sf_core::Real;
use thiserror::Error;

use crate::context::AlgorithmContext;
use crate::error::{ControlError, ControlResult, RefKind};
use crate::expression::Expression;
use crate::registry::AlgorithmRegistry;
use crate::store::ValueStore;

/// Longest accepted expression, in characters.
pub const MAX_EXPRESSION_LEN: usize = 500;

/// Expression text errors. Columns are 1-based character positions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("expression is {len} characters long, the limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("expression is empty")]
    Empty,

    #[error("unexpected character '{ch}' at column {column}")]
    UnexpectedChar { ch: char, column: usize },

    #[error("expected {expected} at column {column}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        column: usize,
    },

    #[error("invalid number '{text}' at column {column}")]
    InvalidNumber { text: String, column: usize },

    #[error("unknown namespace '{name}' at column {column}, expected 'sensors' or 'fans'")]
    UnknownNamespace { name: String, column: usize },

    #[error("unknown algorithm '{name}' at column {column}")]
    UnknownAlgorithm { name: String, column: usize },

    #[error("unknown {kind} '{name}' at column {column}")]
    UnknownReference {
        kind: RefKind,
        name: String,
        column: usize,
    },

    #[error("{what} (at column {column})")]
    Argument { what: String, column: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Number(Real),
    Ident(String),
    Plus,
    Minus,
    Star,
    LParen,
    RParen,
    Comma,
    Dot,
    Eq,
    End,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Number(v) => write!(f, "number {v}"),
            Tok::Ident(name) => write!(f, "'{name}'"),
            Tok::Plus => f.write_str("'+'"),
            Tok::Minus => f.write_str("'-'"),
            Tok::Star => f.write_str("'*'"),
            Tok::LParen => f.write_str("'('"),
            Tok::RParen => f.write_str("')'"),
            Tok::Comma => f.write_str("','"),
            Tok::Dot => f.write_str("'.'"),
            Tok::Eq => f.write_str("'='"),
            Tok::End => f.write_str("end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    tok: Tok,
    column: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let column = i + 1;
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<Real>()
                .map_err(|_| ParseError::InvalidNumber {
                    text: literal.clone(),
                    column,
                })?;
            tokens.push(Token {
                tok: Tok::Number(value),
                column,
            });
            continue;
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                tok: Tok::Ident(chars[start..i].iter().collect()),
                column,
            });
            continue;
        }
        let tok = match ch {
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            ',' => Tok::Comma,
            '.' => Tok::Dot,
            '=' => Tok::Eq,
            _ => return Err(ParseError::UnexpectedChar { ch, column }),
        };
        tokens.push(Token { tok, column });
        i += 1;
    }
    tokens.push(Token {
        tok: Tok::End,
        column: chars.len() + 1,
    });
    Ok(tokens)
}

/// Parsed, unresolved expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Number(Real),
    Neg(Box<Ast>),
    Add(Box<Ast>, Box<Ast>),
    Sub(Box<Ast>, Box<Ast>),
    Mul(Box<Ast>, Box<Ast>),
    Reference {
        kind: RefKind,
        name: String,
        column: usize,
    },
    Call {
        name: String,
        column: usize,
        args: Vec<Ast>,
        keywords: Vec<(String, Ast)>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // `tokenize` always ends with `End`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_second(&self) -> &Tok {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].tok
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            expected,
            found: token.tok.to_string(),
            column: token.column,
        }
    }

    fn expect(&mut self, tok: Tok, expected: &'static str) -> Result<(), ParseError> {
        if self.peek().tok == tok {
            self.next();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<(String, usize), ParseError> {
        match self.peek().tok.clone() {
            Tok::Ident(name) => {
                let column = self.next().column;
                Ok((name, column))
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn expr(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek().tok {
                Tok::Plus => {
                    self.next();
                    lhs = Ast::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Tok::Minus => {
                    self.next();
                    lhs = Ast::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Ast, ParseError> {
        let mut lhs = self.unary()?;
        while self.peek().tok == Tok::Star {
            self.next();
            lhs = Ast::Mul(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Ast, ParseError> {
        if self.peek().tok == Tok::Minus {
            self.next();
            return Ok(Ast::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast, ParseError> {
        match self.peek().tok.clone() {
            Tok::Number(v) => {
                self.next();
                Ok(Ast::Number(v))
            }
            Tok::LParen => {
                self.next();
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::Ident(_) => {
                let (name, column) = self.ident("a name")?;
                match self.peek().tok {
                    Tok::Dot => {
                        self.next();
                        let kind = match name.as_str() {
                            "sensors" => RefKind::Sensor,
                            "fans" => RefKind::Fan,
                            _ => return Err(ParseError::UnknownNamespace { name, column }),
                        };
                        let (id, column) = self.ident("an id after '.'")?;
                        Ok(Ast::Reference {
                            kind,
                            name: id,
                            column,
                        })
                    }
                    Tok::LParen => {
                        self.next();
                        let (args, keywords) = self.args()?;
                        Ok(Ast::Call {
                            name,
                            column,
                            args,
                            keywords,
                        })
                    }
                    _ => Err(self.unexpected("'(' or '.' after a name")),
                }
            }
            _ => Err(self.unexpected("a number, reference or algorithm call")),
        }
    }

    fn args(&mut self) -> Result<(Vec<Ast>, Vec<(String, Ast)>), ParseError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while self.peek().tok != Tok::RParen {
            let is_keyword =
                matches!(self.peek().tok, Tok::Ident(_)) && *self.peek_second() == Tok::Eq;
            if is_keyword {
                let (name, _) = self.ident("an argument name")?;
                self.next();
                keywords.push((name, self.expr()?));
            } else {
                if !keywords.is_empty() {
                    return Err(self.unexpected("a keyword argument"));
                }
                args.push(self.expr()?);
            }
            if self.peek().tok == Tok::Comma {
                self.next();
            } else if self.peek().tok != Tok::RParen {
                return Err(self.unexpected("',' or ')'"));
            }
        }
        self.next();
        Ok((args, keywords))
    }
}

/// Parse `text` without resolving any names.
pub fn parse_ast(text: &str) -> Result<Ast, ParseError> {
    let len = text.chars().count();
    if len > MAX_EXPRESSION_LEN {
        return Err(ParseError::TooLong {
            len,
            limit: MAX_EXPRESSION_LEN,
        });
    }
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let ast = parser.expr()?;
    if parser.peek().tok != Tok::End {
        return Err(parser.unexpected("an operator or end of expression"));
    }
    Ok(ast)
}

/// Parses algorithm expressions of one configuration.
#[derive(Debug, Clone)]
pub struct ExpressionParser {
    registry: AlgorithmRegistry,
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self::new(AlgorithmRegistry::with_defaults())
    }
}

impl ExpressionParser {
    pub fn new(registry: AlgorithmRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    /// Parse `text` and build its expression for a fan with `context`.
    pub fn parse(
        &self,
        text: &str,
        store: &ValueStore,
        context: &AlgorithmContext,
    ) -> ControlResult<Expression> {
        let ast = parse_ast(text)?;
        self.lower(ast, store, context)
    }

    fn lower(
        &self,
        ast: Ast,
        store: &ValueStore,
        context: &AlgorithmContext,
    ) -> ControlResult<Expression> {
        Ok(match ast {
            Ast::Number(v) => Expression::constant(v),
            Ast::Neg(inner) => self.lower(*inner, store, context)?.negate(),
            Ast::Add(a, b) => self.lower(*a, store, context)? + self.lower(*b, store, context)?,
            Ast::Sub(a, b) => self.lower(*a, store, context)? - self.lower(*b, store, context)?,
            Ast::Mul(a, b) => self.lower(*a, store, context)? * self.lower(*b, store, context)?,
            Ast::Reference { kind, name, column } => {
                let resolved = match kind {
                    RefKind::Sensor => Expression::sensor(store, &name),
                    RefKind::Fan => Expression::fan(store, &name),
                };
                resolved.map_err(|_| ParseError::UnknownReference { kind, name, column })?
            }
            Ast::Call {
                name,
                column,
                args,
                keywords,
            } => {
                let spec = self
                    .registry
                    .get(&name)
                    .ok_or(ParseError::UnknownAlgorithm {
                        name: name.clone(),
                        column,
                    })?;
                let args = args
                    .into_iter()
                    .map(|a| self.lower(a, store, context))
                    .collect::<ControlResult<Vec<_>>>()?;
                let keywords = keywords
                    .into_iter()
                    .map(|(k, a)| self.lower(a, store, context).map(|e| (k, e)))
                    .collect::<ControlResult<Vec<_>>>()?;
                let algorithm = spec.bind(args, keywords, context).map_err(|e| match e {
                    ControlError::Parse(inner) => inner,
                    other => ParseError::Argument {
                        what: other.to_string(),
                        column,
                    },
                })?;
                Expression::algorithm(algorithm)
            }
        })
    }
}
