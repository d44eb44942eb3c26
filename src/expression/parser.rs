//! Recursive-descent parser for the textual expression form.
//!
//! Accepts what [`Expression`]'s `Display` prints, plus the word operators
//! `and`, `or`, `not`.

use super::{Attribute, BinaryOp, Expression, ExpressionError, UnaryOp, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 15] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "&", "|", "!", "+", "-", "*", "/",
];

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn error(&self, offset: usize, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            input: self.input.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn tokens(mut self) -> Result<Vec<(usize, Token)>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.input[self.pos..].chars().next() {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            let token = match c {
                '(' => {
                    self.pos += 1;
                    Token::LParen
                }
                ')' => {
                    self.pos += 1;
                    Token::RParen
                }
                '%' => {
                    self.pos += 1;
                    Token::Op("%")
                }
                '\'' | '"' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => {
                    let rest = &self.input[self.pos..];
                    let len = rest
                        .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                        .unwrap_or(rest.len());
                    self.pos += len;
                    Token::Ident(rest[..len].to_string())
                }
                _ => {
                    let rest = &self.input[self.pos..];
                    let op = OPERATORS
                        .iter()
                        .find(|op| rest.starts_with(**op))
                        .ok_or_else(|| self.error(start, format!("unexpected character '{}'", c)))?;
                    self.pos += op.len();
                    Token::Op(*op)
                }
            };
            tokens.push((start, token));
        }
        Ok(tokens)
    }

    fn string(&mut self, quote: char) -> Result<Token, ExpressionError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.input[self.pos..].chars();
        while let Some(c) = chars.next() {
            self.pos += c.len_utf8();
            match c {
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| self.error(start, "unterminated string"))?;
                    self.pos += escaped.len_utf8();
                    value.push(escaped);
                }
                c if c == quote => return Ok(Token::Str(value)),
                c => value.push(c),
            }
        }
        Err(self.error(start, "unterminated string"))
    }

    fn number(&mut self) -> Result<Token, ExpressionError> {
        let start = self.pos;
        let rest = &self.input[start..];
        let len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        let text = &rest[..len];
        self.pos += len;
        if text.contains('.') {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|e| self.error(start, e.to_string()))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|e| self.error(start, e.to_string()))
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(usize, Token)>,
    index: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> ExpressionError {
        let offset = self
            .tokens
            .get(self.index)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.len());
        ExpressionError::Parse {
            input: self.input.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, token)| token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(_, token)| token.clone());
        self.index += 1;
        token
    }

    /// Consume the next token if it is one of the given operators or words.
    fn accept(&mut self, ops: &[&'static str], words: &[&str]) -> Option<&'static str> {
        let found = match self.peek()? {
            Token::Op(op) if ops.contains(op) => Some(*op),
            Token::Ident(word) => words.iter().position(|w| *w == word.as_str()).map(|i| ops[i]),
            _ => None,
        };
        if found.is_some() {
            self.index += 1;
        }
        found
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => {
                self.index -= 1;
                Err(self.error(format!("expected {}", what)))
            }
        }
    }

    fn or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.and()?;
        while self.accept(&["|", "||"], &["or"]).is_some() {
            left = Expression::compose(BinaryOp::Or, left, self.and()?);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.not()?;
        while self.accept(&["&", "&&"], &["and"]).is_some() {
            left = Expression::compose(BinaryOp::And, left, self.not()?);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expression, ExpressionError> {
        if self.accept(&["!"], &["not"]).is_some() {
            return Ok(Expression::compose_unary(UnaryOp::Not, self.not()?));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, ExpressionError> {
        let left = self.sum()?;
        let op = match self.accept(&["==", "!=", "<=", ">=", "<", ">"], &[]) {
            Some("==") => BinaryOp::Eq,
            Some("!=") => BinaryOp::Ne,
            Some("<=") => BinaryOp::Le,
            Some(">=") => BinaryOp::Ge,
            Some("<") => BinaryOp::Lt,
            Some(">") => BinaryOp::Gt,
            _ => return Ok(left),
        };
        Ok(Expression::compose(op, left, self.sum()?))
    }

    fn sum(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.product()?;
        while let Some(op) = self.accept(&["+", "-"], &[]) {
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            left = Expression::compose(op, left, self.product()?);
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.unary()?;
        while let Some(op) = self.accept(&["*", "/", "%"], &[]) {
            let op = match op {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => BinaryOp::Rem,
            };
            left = Expression::compose(op, left, self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, ExpressionError> {
        match self.accept(&["-", "+", "!"], &[]) {
            Some("-") => Ok(Expression::compose_unary(UnaryOp::Neg, self.unary()?)),
            Some("+") => Ok(Expression::compose_unary(UnaryOp::Pos, self.unary()?)),
            Some(_) => Ok(Expression::compose_unary(UnaryOp::Not, self.unary()?)),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expression, ExpressionError> {
        let token = self
            .next()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        match token {
            Token::Int(n) => Ok(Expression::Const(Value::Int(n))),
            Token::Float(x) => Ok(Expression::Const(Value::Float(x))),
            Token::Str(s) => Ok(Expression::Const(Value::Str(s))),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(word) => self.word(&word),
            _ => {
                self.index -= 1;
                Err(self.error("expected a value"))
            }
        }
    }

    fn word(&mut self, word: &str) -> Result<Expression, ExpressionError> {
        if let Some(attribute) = Attribute::from_keyword(word) {
            return Ok(Expression::Attribute(attribute));
        }
        match word {
            "true" | "True" => Ok(Expression::Const(Value::Bool(true))),
            "false" | "False" => Ok(Expression::Const(Value::Bool(false))),
            "HAS_TAG" => {
                self.expect(Token::LParen, "'(' after HAS_TAG")?;
                let tag = match self.next() {
                    Some(Token::Str(tag)) => tag,
                    _ => {
                        self.index -= 1;
                        return Err(self.error("HAS_TAG expects a quoted tag"));
                    }
                };
                self.expect(Token::RParen, "')'")?;
                Ok(Expression::HasTag(tag))
            }
            "abs" => {
                self.expect(Token::LParen, "'(' after abs")?;
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expression::compose_unary(UnaryOp::Abs, inner))
            }
            _ => {
                self.index -= 1;
                Err(self.error(format!("unknown name '{}'", word)))
            }
        }
    }
}

/// Parse the textual form of an expression.
pub fn parse(input: &str) -> Result<Expression, ExpressionError> {
    let tokens = Lexer { input, pos: 0 }.tokens()?;
    let mut parser = Parser {
        input,
        tokens,
        index: 0,
    };
    let expression = parser.or()?;
    if parser.index < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expression)
}
