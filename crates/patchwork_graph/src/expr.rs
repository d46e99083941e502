// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic expression language used for per-element float transforms.
//!
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := '(' expression ')' | identifier ['(' arglist ')'] | number
//! ```
//!
//! Binary operators are left-associative: `8 - 4 - 2` is `(8 - 4) - 2`.
//! A bare single-letter identifier is a positional variable: `a`..`z` read
//! indices 0..=25 and `A`..`Z` read indices 27..=52. Index 26 has no name.
//! Function calls parse but do not evaluate.

use std::fmt;
use std::sync::Arc;

/// Error raised while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// The text is not a valid expression
    #[error("expression parsing error: {message} at position {position} in '{text}'")]
    Parse {
        /// What went wrong
        message: String,
        /// The whole expression text
        text: String,
        /// Character offset of the failure
        position: usize,
    },

    /// Function calls have no evaluator
    #[error("expression evaluation error: function '{0}' is unsupported")]
    Unsupported(String),

    /// A variable reads past the supplied values
    #[error("expression evaluation error: variable '{name}' reads index {index} but only {available} values were supplied")]
    VariableOutOfRange {
        /// Variable letter
        name: char,
        /// Index the letter maps to
        index: usize,
        /// Length of the supplied vector
        available: usize,
    },
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }

    fn apply(self, left: f32, right: f32) -> f32 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => left / right,
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Number(f32),
    /// Positional variable
    Variable {
        /// Letter as written
        name: char,
        /// Index into the variable vector
        index: usize,
    },
    /// Function call
    Call {
        /// Function name
        name: String,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
}

/// Index a variable letter reads from
pub fn variable_index(name: char) -> Option<usize> {
    match name {
        'a'..='z' => Some(name as usize - 'a' as usize),
        'A'..='Z' => Some(name as usize - 'A' as usize + 27),
        _ => None,
    }
}

impl Expr {
    /// Parse a complete expression
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let mut parser = Parser::new(text);
        let expr = parser.expression()?;
        parser.skip_whitespace();
        if let Some(ch) = parser.peek() {
            return Err(parser.error(format!("unexpected character '{ch}'")));
        }
        Ok(expr)
    }

    /// Evaluate against a positional variable vector.
    ///
    /// Division follows IEEE semantics: dividing by zero yields an infinity
    /// or NaN, not an error.
    pub fn eval(&self, vars: &[f32]) -> Result<f32, ExprError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Variable { name, index } => {
                vars.get(*index)
                    .copied()
                    .ok_or(ExprError::VariableOutOfRange {
                        name: *name,
                        index: *index,
                        available: vars.len(),
                    })
            }
            Self::Call { name, .. } => Err(ExprError::Unsupported(name.clone())),
            Self::Binary { op, left, right } => Ok(op.apply(left.eval(vars)?, right.eval(vars)?)),
        }
    }

    /// Length of the variable vector this expression needs
    pub fn arity(&self) -> usize {
        match self {
            Self::Number(_) => 0,
            Self::Variable { index, .. } => index + 1,
            Self::Call { args, .. } => args.iter().map(Expr::arity).max().unwrap_or(0),
            Self::Binary { left, right, .. } => left.arity().max(right.arity()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Variable { name, .. } => write!(f, "${name}"),
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

struct Parser<'s> {
    text: &'s str,
    chars: Vec<char>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(text: &'s str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            message: message.into(),
            text: self.text.to_string(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut node = self.term()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            let right = self.term()?;
            node = Expr::Binary { op, left: Box::new(node), right: Box::new(right) };
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut node = self.factor()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => return Ok(node),
            };
            self.pos += 1;
            let right = self.factor()?;
            node = Expr::Binary { op, left: Box::new(node), right: Box::new(right) };
        }
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        self.skip_whitespace();
        let Some(ch) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };

        if ch == '(' {
            self.pos += 1;
            let node = self.expression()?;
            self.skip_whitespace();
            if self.bump() != Some(')') {
                return Err(self.error("expected ')'"));
            }
            return Ok(node);
        }

        if ch.is_ascii_alphabetic() {
            return self.identifier();
        }

        if ch.is_ascii_digit() || ch == '.' {
            return self.number();
        }

        Err(self.error(format!("unexpected character '{ch}'")))
    }

    fn identifier(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        // Only an immediately following '(' makes a call.
        if self.peek() == Some('(') {
            self.pos += 1;
            let args = self.arguments()?;
            return Ok(Expr::Call { name, args });
        }

        let mut letters = name.chars();
        match (letters.next(), letters.next()) {
            (Some(letter), None) => {
                let index = variable_index(letter)
                    .ok_or_else(|| self.error(format!("unknown variable '{name}'")))?;
                Ok(Expr::Variable { name: letter, index })
            }
            _ => {
                self.pos = start;
                Err(self.error(format!("unknown variable '{name}'")))
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            self.skip_whitespace();
            match self.bump() {
                Some(')') => return Ok(args),
                Some(',') => {}
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn number(&mut self) -> Result<Expr, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal.parse::<f32>().map(Expr::Number).map_err(|_| {
            self.pos = start;
            self.error(format!("malformed number '{literal}'"))
        })
    }
}

/// An expression compiled into a callable float transform
#[derive(Debug, Clone)]
pub struct Transform {
    expr: Arc<Expr>,
    arity: usize,
}

impl Transform {
    /// Parse `text` into a transform
    pub fn compile(text: &str) -> Result<Self, ExprError> {
        let expr = Expr::parse(text)?;
        let arity = expr.arity();
        Ok(Self {
            expr: Arc::new(expr),
            arity,
        })
    }

    /// Number of positional values a call needs
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Evaluate for one element
    pub fn call(&self, vars: &[f32]) -> Result<f32, ExprError> {
        self.expr.eval(vars)
    }

    /// The parsed tree
    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vars(pairs: &[(char, f32)]) -> Vec<f32> {
        let mut values = vec![0.0; 53];
        for &(name, value) in pairs {
            values[variable_index(name).unwrap()] = value;
        }
        values
    }

    #[test]
    fn test_constant_expression() {
        assert_eq!(Expr::parse("2 + 2").unwrap().eval(&[]).unwrap(), 4.0);
    }

    #[test]
    fn test_variables_and_parentheses() {
        let expr = Expr::parse("2 * (A - a)").unwrap();
        assert_eq!(expr.eval(&vars(&[('a', 1.5), ('A', 3.0)])).unwrap(), 3.0);
        assert_eq!(expr.to_string(), "(2 * ($A - $a))");
        assert_eq!(expr.arity(), 28);
    }

    #[test]
    fn test_variable_mapping_skips_index_26() {
        assert_eq!(variable_index('a'), Some(0));
        assert_eq!(variable_index('z'), Some(25));
        assert_eq!(variable_index('A'), Some(27));
        assert_eq!(variable_index('Z'), Some(52));
        assert_eq!(variable_index('_'), None);
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(Expr::parse("8 - 4 - 2").unwrap().eval(&[]).unwrap(), 2.0);
        assert_eq!(Expr::parse("8 / 4 / 2").unwrap().eval(&[]).unwrap(), 1.0);
        assert_eq!(Expr::parse("1 + 2 * 3").unwrap().eval(&[]).unwrap(), 7.0);
    }

    #[test]
    fn test_missing_close_paren_in_call() {
        let err = Expr::parse("foo(2 , A").unwrap_err();
        match err {
            ExprError::Parse { message, text, .. } => {
                assert_eq!(message, "expected ',' or ')'");
                assert_eq!(text, "foo(2 , A");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_parse_faults() {
        for text in ["", "(1 + 2", "2 +", "2 $ 3", "2 2", "ab + 1", "1..2", "-1"] {
            assert!(
                matches!(Expr::parse(text), Err(ExprError::Parse { .. })),
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn test_calls_parse_but_do_not_evaluate() {
        let expr = Expr::parse("max(a, 2)").unwrap();
        assert_eq!(expr.to_string(), "max($a, 2)");
        assert_eq!(expr.eval(&[1.0]), Err(ExprError::Unsupported("max".to_string())));
        assert!(Expr::parse("now()").is_ok());
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        assert!(Expr::parse("1 / 0").unwrap().eval(&[]).unwrap().is_infinite());
        assert!(Expr::parse("0 / 0").unwrap().eval(&[]).unwrap().is_nan());
    }

    #[test]
    fn test_variable_out_of_range() {
        let transform = Transform::compile("a * b").unwrap();
        assert_eq!(transform.arity(), 2);
        assert!(matches!(
            transform.call(&[1.0]),
            Err(ExprError::VariableOutOfRange { name: 'b', index: 1, available: 1 })
        ));
        assert_eq!(transform.call(&[3.0, 4.0]).unwrap(), 12.0);
    }

    proptest! {
        #[test]
        fn prop_subtraction_chains_fold_left(x in 0u16..1000, y in 0u16..1000, z in 0u16..1000) {
            let text = format!("{x} - {y} - {z}");
            let value = Expr::parse(&text).unwrap().eval(&[]).unwrap();
            prop_assert_eq!(value, (f32::from(x) - f32::from(y)) - f32::from(z));
        }
    }
}
