//! Infix parser building expression graphs from strings such as
//! `"-k*x[0] + sin(t)"`.
//!
//! Identifiers resolve against a list of named expressions; `name[i]`
//! selects entry `i` of a column vector. Supported functions are `sin`,
//! `cos`, `exp` and `log`; `^` takes a non-negative integer exponent.

use super::Expr;
use anyhow::{anyhow, bail, Result};

/// Parses `input` into an expression over the named `symbols`.
pub fn parse(input: &str, symbols: &[Expr]) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        symbols,
    };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?} in \"{}\"", token, input);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' || d == 'e' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| anyhow!("Invalid number literal \"{}\"", num_str))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                other => bail!("Unexpected character '{}' in \"{}\"", other, input),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symbols: &'a [Expr],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.consume() {
            Some(t) if t == expected => Ok(()),
            other => bail!("Expected {:?}, found {:?}", expected, other),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left.try_add(&right)?;
                }
                Some(Token::Minus) => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left.try_sub(&right)?;
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_power()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.consume();
                    let right = self.parse_power()?;
                    left = left.try_mul(&right)?;
                }
                Some(Token::Slash) => {
                    self.consume();
                    let right = self.parse_power()?;
                    left = left.try_div(&right)?;
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_unary()?;
        if self.peek() != Some(&Token::Caret) {
            return Ok(base);
        }
        self.consume();
        let exponent = match self.consume() {
            Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            other => bail!("Exponent must be a non-negative integer, found {:?}", other),
        };
        let mut result = Expr::ones(base.sparsity());
        for _ in 0..exponent {
            result = result.try_mul(&base)?;
        }
        Ok(result)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(-expr);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::scalar(n)),
            Some(Token::Identifier(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect(Token::RParen)?;
                    match name.as_str() {
                        "sin" => Ok(arg.sin()),
                        "cos" => Ok(arg.cos()),
                        "exp" => Ok(arg.exp()),
                        "log" | "ln" => Ok(arg.ln()),
                        _ => bail!("Unknown function: {}", name),
                    }
                }
                Some(Token::LBracket) => {
                    self.consume();
                    let index = match self.consume() {
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                        other => bail!("Index must be a non-negative integer, found {:?}", other),
                    };
                    self.expect(Token::RBracket)?;
                    self.element(&name, index)
                }
                _ => self.lookup(&name).cloned(),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            other => bail!("Unexpected token {:?}", other),
        }
    }

    fn lookup(&self, name: &str) -> Result<&Expr> {
        self.symbols
            .iter()
            .find(|s| s.name() == Some(name))
            .ok_or_else(|| anyhow!("Unknown variable: {}", name))
    }

    fn element(&self, name: &str, index: usize) -> Result<Expr> {
        let vector = self.lookup(name)?;
        let (n, ncols) = vector.shape();
        if ncols != 1 || index >= n {
            bail!(
                "Index {} out of range for {} of shape {:?}",
                index,
                name,
                vector.shape()
            );
        }
        let offsets: Vec<usize> = (0..=n).collect();
        let mut entries = vector.vertsplit(&offsets)?;
        Ok(entries.swap_remove(index))
    }
}
