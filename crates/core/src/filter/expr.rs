//! Small boolean expression language over entry fields, compiled once per
//! criteria change and evaluated per entry. Grammar, loosest first:
//!
//!   or        := and ("||" and)*
//!   and       := equality ("&&" equality)*
//!   equality  := comparison (("==" | "!=") comparison)*
//!   comparison:= unary (("<" | "<=" | ">" | ">=") unary)*
//!   unary     := "!" unary | primary
//!   primary   := ident | number | string | "true" | "false" | "(" or ")"
//!
//! Evaluation fails rather than guesses: an unknown identifier or a type
//! mismatch is an error, and callers treat errors as a non-match.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("operator {op} expects {expected}")]
    TypeMismatch { op: &'static str, expected: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
enum Node {
    Ident(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Cmp(CmpOp, Box<Node>, Box<Node>),
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Runtime value domain. Entry field values map into this on lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

/// A compiled expression, reusable across entries.
#[derive(Debug, Clone)]
pub struct Program {
    root: Node,
}

impl Program {
    pub fn compile(src: &str) -> Result<Self, ExprError> {
        let tokens = lex(src)?;
        let mut p = Parser { tokens, pos: 0 };
        let root = p.parse_or()?;
        if p.pos != p.tokens.len() {
            return Err(ExprError::UnexpectedToken(format!("{:?}", p.tokens[p.pos])));
        }
        Ok(Self { root })
    }

    pub fn eval(&self, params: &Map<String, Value>) -> Result<Scalar, EvalError> {
        eval_node(&self.root, params)
    }

    /// Evaluate as a predicate: true only for a clean boolean true.
    pub fn matches(&self, params: &Map<String, Value>) -> bool {
        matches!(self.eval(params), Ok(Scalar::Bool(true)))
    }
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ExprError::UnterminatedString);
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ExprError> {
        let t = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Node::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Node::Cmp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        match self.next()? {
            Token::Ident(name) => Ok(Node::Ident(name)),
            Token::Str(s) => Ok(Node::Str(s)),
            Token::Num(n) => Ok(Node::Num(n)),
            Token::True => Ok(Node::Bool(true)),
            Token::False => Ok(Node::Bool(false)),
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.next()? {
                    Token::RParen => Ok(inner),
                    other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            other => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

fn eval_node(node: &Node, params: &Map<String, Value>) -> Result<Scalar, EvalError> {
    match node {
        Node::Ident(name) => match params.get(name) {
            Some(v) => Ok(value_to_scalar(v)),
            None => Err(EvalError::UnknownField(name.clone())),
        },
        Node::Str(s) => Ok(Scalar::Str(s.clone())),
        Node::Num(n) => Ok(Scalar::Num(*n)),
        Node::Bool(b) => Ok(Scalar::Bool(*b)),
        Node::Not(inner) => match eval_node(inner, params)? {
            Scalar::Bool(b) => Ok(Scalar::Bool(!b)),
            _ => Err(EvalError::TypeMismatch {
                op: "!",
                expected: "a boolean operand",
            }),
        },
        Node::And(l, r) => {
            match eval_node(l, params)? {
                Scalar::Bool(false) => Ok(Scalar::Bool(false)),
                Scalar::Bool(true) => match eval_node(r, params)? {
                    Scalar::Bool(b) => Ok(Scalar::Bool(b)),
                    _ => Err(EvalError::TypeMismatch {
                        op: "&&",
                        expected: "boolean operands",
                    }),
                },
                _ => Err(EvalError::TypeMismatch {
                    op: "&&",
                    expected: "boolean operands",
                }),
            }
        }
        Node::Or(l, r) => {
            match eval_node(l, params)? {
                Scalar::Bool(true) => Ok(Scalar::Bool(true)),
                Scalar::Bool(false) => match eval_node(r, params)? {
                    Scalar::Bool(b) => Ok(Scalar::Bool(b)),
                    _ => Err(EvalError::TypeMismatch {
                        op: "||",
                        expected: "boolean operands",
                    }),
                },
                _ => Err(EvalError::TypeMismatch {
                    op: "||",
                    expected: "boolean operands",
                }),
            }
        }
        Node::Cmp(op, l, r) => {
            let lv = eval_node(l, params)?;
            let rv = eval_node(r, params)?;
            eval_cmp(*op, lv, rv)
        }
    }
}

fn eval_cmp(op: CmpOp, l: Scalar, r: Scalar) -> Result<Scalar, EvalError> {
    match op {
        CmpOp::Eq => Ok(Scalar::Bool(loose_eq(&l, &r))),
        CmpOp::Ne => Ok(Scalar::Bool(!loose_eq(&l, &r))),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let (a, b) = match (as_num(&l), as_num(&r)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EvalError::TypeMismatch {
                        op: "comparison",
                        expected: "numeric operands",
                    })
                }
            };
            Ok(Scalar::Bool(match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            }))
        }
    }
}

/// Equality is loose across representations of the same number but false,
/// not an error, across genuinely different types.
fn loose_eq(l: &Scalar, r: &Scalar) -> bool {
    if let (Some(a), Some(b)) = (as_num(l), as_num(r)) {
        return a == b;
    }
    match (l, r) {
        (Scalar::Str(a), Scalar::Str(b)) => a == b,
        (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
        (Scalar::Null, Scalar::Null) => true,
        _ => false,
    }
}

fn as_num(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Num(n) => Some(*n),
        Scalar::Str(text) => text.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_scalar(v: &Value) -> Scalar {
    match v {
        Value::String(s) => Scalar::Str(s.clone()),
        Value::Number(n) => Scalar::Num(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => Scalar::Bool(*b),
        Value::Null => Scalar::Null,
        other => Scalar::Str(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_comparison_and_logic() {
        let p = Program::compile("status >= 500 && level == 'ERROR'").unwrap();
        assert!(p.matches(&params(&[
            ("status", Value::from(503)),
            ("level", Value::from("ERROR")),
        ])));
        assert!(!p.matches(&params(&[
            ("status", Value::from(200)),
            ("level", Value::from("ERROR")),
        ])));
    }

    #[test]
    fn test_numeric_string_compares_as_number() {
        let p = Program::compile("lat_ms > 100").unwrap();
        assert!(p.matches(&params(&[("lat_ms", Value::from("512"))])));
        assert!(!p.matches(&params(&[("lat_ms", Value::from("3"))])));
    }

    #[test]
    fn test_unknown_field_fails_closed() {
        let p = Program::compile("status >= 500").unwrap();
        let r = p.eval(&params(&[("level", Value::from("INFO"))]));
        assert_eq!(r, Err(EvalError::UnknownField("status".to_string())));
        assert!(!p.matches(&params(&[])));
    }

    #[test]
    fn test_cross_type_equality_is_false_not_error() {
        let p = Program::compile("flag == 'yes'").unwrap();
        assert!(!p.matches(&params(&[("flag", Value::from(true))])));
    }

    #[test]
    fn test_or_and_not_and_parens() {
        let p = Program::compile("!(level == 'DEBUG') && (status == 200 || status == 204)").unwrap();
        assert!(p.matches(&params(&[
            ("level", Value::from("INFO")),
            ("status", Value::from(204)),
        ])));
        assert!(!p.matches(&params(&[
            ("level", Value::from("DEBUG")),
            ("status", Value::from(200)),
        ])));
    }

    #[test]
    fn test_non_boolean_result_is_not_a_match() {
        let p = Program::compile("status").unwrap();
        assert!(!p.matches(&params(&[("status", Value::from(200))])));
    }

    #[test]
    fn test_eval_is_idempotent() {
        let p = Program::compile("status != 404").unwrap();
        let m = params(&[("status", Value::from(500))]);
        for _ in 0..10 {
            assert!(p.matches(&m));
        }
    }

    #[test]
    fn test_compile_errors() {
        assert!(Program::compile("status >=").is_err());
        assert!(Program::compile("'unterminated").is_err());
        assert!(Program::compile("a ## b").is_err());
        assert!(Program::compile("(a == 1").is_err());
    }

    #[test]
    fn test_double_quoted_strings() {
        let p = Program::compile(r#"msg == "slow request""#).unwrap();
        assert!(p.matches(&params(&[("msg", Value::from("slow request"))])));
    }
}
