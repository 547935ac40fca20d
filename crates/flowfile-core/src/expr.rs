//! A small formula-expression compiler.
//!
//! `Formula` nodes and `Filter`'s advanced mode both take a user-written
//! string and need a Polars `Expr` out of it. Building a general expression
//! language is explicitly out of scope (§1 Non-goals: "not a query planner
//! or a general expression language"), so this supports exactly the
//! arithmetic/comparison/logical grammar a spreadsheet formula bar would:
//! column references, literals, `+ - * /`, comparisons, `&& || !`,
//! parentheses, and a small allow-listed function set. Anything else is a
//! `CompileError`, surfaced to the caller as a settings-validation failure.

use polars::prelude::*;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError(pub String);

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            chars: src.char_indices().peekable(),
            src,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            match c {
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                ',' => {
                    self.chars.next();
                    tokens.push(Token::Comma);
                }
                '"' | '\'' => {
                    tokens.push(Token::Str(self.read_string(c)?));
                }
                '0'..='9' => tokens.push(Token::Number(self.read_number())),
                c if c.is_alphabetic() || c == '_' => tokens.push(Token::Ident(self.read_ident())),
                '=' | '!' | '<' | '>' | '&' | '|' | '+' | '-' | '*' | '/' => {
                    tokens.push(Token::Op(self.read_operator(i)?))
                }
                other => return Err(CompileError(format!("unexpected character '{other}'"))),
            }
        }
        Ok(tokens)
    }

    fn read_string(&mut self, quote: char) -> Result<String, CompileError> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(out),
                Some((_, c)) => out.push(c),
                None => return Err(CompileError("unterminated string literal".into())),
            }
        }
    }

    fn read_number(&mut self) -> f64 {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end].parse().unwrap_or(0.0)
    }

    fn read_ident(&mut self) -> String {
        let start = self.chars.peek().unwrap().0;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end].to_string()
    }

    fn read_operator(&mut self, start: usize) -> Result<String, CompileError> {
        self.chars.next();
        let one = &self.src[start..start + 1];
        if let Some(&(_, next)) = self.chars.peek() {
            let two = match (one, next) {
                ("=", '=') | ("!", '=') | ("<", '=') | (">", '=') | ("&", '&') | ("|", '|') => true,
                _ => false,
            };
            if two {
                self.chars.next();
                return Ok(format!("{one}{next}"));
            }
        }
        if one == "=" {
            return Err(CompileError("use '==' for equality, not '='".into()));
        }
        Ok(one.to_string())
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, t: &Token) -> Result<(), CompileError> {
        match self.next() {
            Some(ref got) if got == t => Ok(()),
            other => Err(CompileError(format!("expected {t:?}, found {other:?}"))),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let (op, bp) = match self.peek() {
                Some(Token::Op(op)) => match binding_power(op) {
                    Some(bp) if bp >= min_bp => (op.clone(), bp),
                    _ => break,
                },
                _ => break,
            };
            self.next();
            let rhs = self.parse_expr(bp + 1)?;
            lhs = apply_binary(&op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, CompileError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(lit(n)),
            Some(Token::Str(s)) => Ok(lit(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Op(op)) if op == "!" || op == "-" => {
                let operand = self.parse_expr(9)?;
                Ok(if op == "!" { operand.not() } else { lit(0.0) - operand })
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.next();
                    let args = self.parse_args()?;
                    apply_function(&name, args)
                } else {
                    Ok(col(name.as_str()))
                }
            }
            other => Err(CompileError(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => return Err(CompileError(format!("expected ',' or ')', found {other:?}"))),
            }
        }
        Ok(args)
    }
}

fn binding_power(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" => 3,
        "<" | "<=" | ">" | ">=" => 4,
        "+" | "-" => 5,
        "*" | "/" => 6,
        _ => return None,
    })
}

fn apply_binary(op: &str, lhs: Expr, rhs: Expr) -> Result<Expr, CompileError> {
    Ok(match op {
        "+" => lhs + rhs,
        "-" => lhs - rhs,
        "*" => lhs * rhs,
        "/" => lhs / rhs,
        "==" => lhs.eq(rhs),
        "!=" => lhs.neq(rhs),
        "<" => lhs.lt(rhs),
        "<=" => lhs.lt_eq(rhs),
        ">" => lhs.gt(rhs),
        ">=" => lhs.gt_eq(rhs),
        "&&" => lhs.and(rhs),
        "||" => lhs.or(rhs),
        other => return Err(CompileError(format!("unsupported operator '{other}'"))),
    })
}

fn apply_function(name: &str, mut args: Vec<Expr>) -> Result<Expr, CompileError> {
    let arity_err = |n: usize| CompileError(format!("{name} takes {n} argument(s), got {}", args.len()));
    Ok(match name {
        "abs" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).abs()
        }
        "lower" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).str().to_lowercase()
        }
        "upper" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).str().to_uppercase()
        }
        "length" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).str().len_chars()
        }
        "is_null" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).is_null()
        }
        "is_not_null" => {
            if args.len() != 1 {
                return Err(arity_err(1));
            }
            args.remove(0).is_not_null()
        }
        "round" => {
            if args.len() != 2 {
                return Err(arity_err(2));
            }
            let decimals = args.remove(1);
            let Expr::Literal(LiteralValue::Float64(d)) = decimals else {
                return Err(CompileError("round's second argument must be a numeric literal".into()));
            };
            args.remove(0).round(d as u32)
        }
        "coalesce" => {
            if args.is_empty() {
                return Err(CompileError("coalesce requires at least one argument".into()));
            }
            coalesce(&args)
        }
        other => return Err(CompileError(format!("unknown function '{other}'"))),
    })
}

/// Compile a formula-bar style expression string into a Polars `Expr`.
pub fn parse_expression(source: &str) -> Result<Expr, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    if tokens.is_empty() {
        return Err(CompileError("empty expression".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(CompileError("trailing tokens after expression".into()));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn eval(expr: Expr) -> DataFrame {
        let df = df!["a" => [1i64, 2, 3], "b" => [10i64, 20, 30]].unwrap();
        df.lazy().select([expr.alias("out")]).collect().unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = parse_expression("a + b * 2").unwrap();
        let out = eval(expr);
        let got: Vec<Option<i64>> = out.column("out").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(got, vec![Some(21), Some(42), Some(63)]);
    }

    #[test]
    fn comparison_and_logical() {
        let expr = parse_expression("a > 1 && b < 30").unwrap();
        let out = eval(expr);
        let got: Vec<Option<bool>> = out.column("out").unwrap().bool().unwrap().into_iter().collect();
        assert_eq!(got, vec![Some(false), Some(true), Some(false)]);
    }

    #[test]
    fn function_call() {
        let expr = parse_expression("round(a, 0)").unwrap();
        eval(expr);
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(parse_expression("bogus(a)").is_err());
    }

    #[test]
    fn rejects_single_equals() {
        assert!(parse_expression("a = 1").is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_expression("a + 1 )").is_err());
    }
}
