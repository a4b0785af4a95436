//! Small arithmetic expression evaluator for dynamic field widths.
//!
//! Supports `+ - * /`, parens, integer literals and identifier lookups
//! against a value map. Anything outside that grammar is a configuration
//! error caught at construction time rather than at parse time.

use crate::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn lex(src: &str) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                out.push(Token::Plus);
                i += 1;
            }
            '-' => {
                out.push(Token::Minus);
                i += 1;
            }
            '*' => {
                out.push(Token::Star);
                i += 1;
            }
            '/' => {
                out.push(Token::Slash);
                i += 1;
            }
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                out.push(Token::Num(s.parse().map_err(|_| {
                    Error::Reference(format!("bad integer literal in expression {src:?}"))
                })?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                out.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(Error::Reference(format!(
                    "unexpected character {c:?} in expression {src:?}"
                )));
            }
        }
    }
    Ok(out)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: &'a HashMap<String, i64>,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<i64> {
        let mut v = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    v += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    v -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(v)
    }

    fn term(&mut self) -> Result<i64> {
        let mut v = self.factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    v *= self.factor()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    let rhs = self.factor()?;
                    if rhs == 0 {
                        return Err(Error::Reference(format!(
                            "division by zero in expression {:?}",
                            self.src
                        )));
                    }
                    v /= rhs;
                }
                _ => break,
            }
        }
        Ok(v)
    }

    fn factor(&mut self) -> Result<i64> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Ident(name)) => self.vars.get(&name).copied().ok_or_else(|| {
                Error::Reference(format!("unresolved identifier {name:?} in expression {:?}", self.src))
            }),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(Error::Reference(format!("unbalanced parens in expression {:?}", self.src))),
                }
            }
            other => Err(Error::Reference(format!(
                "unexpected token {other:?} in expression {:?}",
                self.src
            ))),
        }
    }
}

/// Evaluate a width expression against a map of already-resolved field values.
pub fn eval_expr(src: &str, vars: &HashMap<String, i64>) -> Result<i64> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens: &tokens,
        pos: 0,
        vars,
        src,
    };
    let v = p.expr()?;
    if p.pos != tokens.len() {
        return Err(Error::Reference(format!("trailing tokens in expression {src:?}")));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal() {
        assert_eq!(eval_expr("42", &HashMap::new()).unwrap(), 42);
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval_expr("2 + 3 * 4", &HashMap::new()).unwrap(), 14);
        assert_eq!(eval_expr("(2 + 3) * 4", &HashMap::new()).unwrap(), 20);
    }

    #[test]
    fn identifier_lookup() {
        let mut vars = HashMap::new();
        vars.insert("ihl".to_string(), 5);
        assert_eq!(eval_expr("ihl * 32 - 160", &vars).unwrap(), 0);
    }

    #[test]
    fn unresolved_identifier_is_reference_error() {
        assert!(matches!(
            eval_expr("missing + 1", &HashMap::new()),
            Err(Error::Reference(_))
        ));
    }

    #[test]
    fn division_by_zero_is_reference_error() {
        assert!(matches!(eval_expr("1 / 0", &HashMap::new()), Err(Error::Reference(_))));
    }
}
