use std::collections::BTreeSet;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Constraint expressions over parameter names
// ---------------------------------------------------------------------------

/// Parse or evaluation failure of a constraint expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ExprError(pub String);

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sqrt,
    Exp,
    Ln,
    Log10,
    Abs,
    Sin,
    Cos,
    Tan,
    Min,
    Max,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Ln,
            "log10" => Func::Log10,
            "abs" => Func::Abs,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Min | Func::Max => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Func::Sqrt => args[0].sqrt(),
            Func::Exp => args[0].exp(),
            Func::Ln => args[0].ln(),
            Func::Log10 => args[0].log10(),
            Func::Abs => args[0].abs(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Tan => args[0].tan(),
            Func::Min => args[0].min(args[1]),
            Func::Max => args[0].max(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Num(f64),
    Var(String),
    Neg(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// A parsed arithmetic expression such as `2.3548 * p1_sigma` or
/// `0.5 * (p1_amplitude + p2_amplitude)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    root: Node,
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(ExprError(format!("unexpected '{tok}' in '{source}'")));
        }
        Ok(Expr { root })
    }

    /// Parameter names referenced by the expression (constants excluded).
    pub fn names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_names(&self.root, &mut out);
        out
    }

    /// Evaluate with `lookup` resolving parameter names to values.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ExprError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        eval_node(&self.root, lookup)
    }
}

fn collect_names(node: &Node, out: &mut BTreeSet<String>) {
    match node {
        Node::Num(_) => {}
        Node::Var(name) => {
            if constant(name).is_none() {
                out.insert(name.clone());
            }
        }
        Node::Neg(inner) => collect_names(inner, out),
        Node::Bin(_, a, b) => {
            collect_names(a, out);
            collect_names(b, out);
        }
        Node::Call(_, args) => args.iter().for_each(|a| collect_names(a, out)),
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}

fn eval_node<F>(node: &Node, lookup: &F) -> Result<f64, ExprError>
where
    F: Fn(&str) -> Option<f64>,
{
    Ok(match node {
        Node::Num(v) => *v,
        Node::Var(name) => lookup(name)
            .or_else(|| constant(name))
            .ok_or_else(|| ExprError(format!("unknown name '{name}'")))?,
        Node::Neg(inner) => -eval_node(inner, lookup)?,
        Node::Bin(op, a, b) => {
            let a = eval_node(a, lookup)?;
            let b = eval_node(b, lookup)?;
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Pow => a.powf(b),
            }
        }
        Node::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval_node(a, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            func.apply(&values)
        }
    })
}

// -- Tokenizer --

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Pow,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Num(v) => write!(f, "{v}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Op(c) => write!(f, "{c}"),
            Token::Pow => write!(f, "**"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation: 1e-3, 2.5E+4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError(format!("bad number '{text}'")))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => return Err(ExprError(format!("unexpected character '{other}'"))),
        }
    }

    if tokens.is_empty() {
        return Err(ExprError("empty expression".to_string()));
    }
    Ok(tokens)
}

// -- Recursive-descent parser --

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref tok) if tok == want => Ok(()),
            Some(tok) => Err(ExprError(format!("expected '{want}', found '{tok}'"))),
            None => Err(ExprError(format!("expected '{want}', found end of input"))),
        }
    }

    fn expr(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if c == '+' { BinOp::Add } else { BinOp::Sub };
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            let op = if c == '*' { BinOp::Mul } else { BinOp::Div };
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Node::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node, ExprError> {
        let base = self.atom()?;
        if let Some(Token::Pow) = self.peek() {
            self.pos += 1;
            // right associative: 2^3^2 == 2^(3^2)
            let exponent = self.unary()?;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, ExprError> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Node::Num(v)),
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    let func = Func::from_name(&name)
                        .ok_or_else(|| ExprError(format!("unknown function '{name}'")))?;
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.expr()?);
                    }
                    self.expect(&Token::RParen)?;
                    if args.len() != func.arity() {
                        return Err(ExprError(format!(
                            "{name}() takes {} argument(s), got {}",
                            func.arity(),
                            args.len()
                        )));
                    }
                    Ok(Node::Call(func, args))
                } else {
                    Ok(Node::Var(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(tok) => Err(ExprError(format!("unexpected '{tok}'"))),
            None => Err(ExprError("unexpected end of expression".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<f64> {
        None
    }

    #[test]
    fn test_precedence_and_power() {
        let e = Expr::parse("1 + 2 * 3 ^ 2").unwrap();
        assert!((e.eval(&no_vars).unwrap() - 19.0).abs() < 1e-12);

        let e = Expr::parse("2 ** 3 ** 2").unwrap();
        assert!((e.eval(&no_vars).unwrap() - 512.0).abs() < 1e-9);

        let e = Expr::parse("-(4 - 6) / 4").unwrap();
        assert!((e.eval(&no_vars).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_names_and_lookup() {
        let e = Expr::parse("2.3548200 * p1_sigma + max(p2_c, 1e-3) * pi").unwrap();
        let names: Vec<String> = e.names().into_iter().collect();
        assert_eq!(names, vec!["p1_sigma".to_string(), "p2_c".to_string()]);

        let lookup = |n: &str| match n {
            "p1_sigma" => Some(1.0),
            "p2_c" => Some(0.0),
            _ => None,
        };
        let v = e.eval(&lookup).unwrap();
        assert!((v - (2.35482 + 1e-3 * std::f64::consts::PI)).abs() < 1e-9);
    }

    #[test]
    fn test_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("foo(1)").is_err());
        assert!(Expr::parse("max(1)").is_err());
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("1 $ 2").is_err());

        let e = Expr::parse("missing * 2").unwrap();
        assert!(e.eval(&no_vars).is_err());
    }
}
