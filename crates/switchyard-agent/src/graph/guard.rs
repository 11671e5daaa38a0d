use std::fmt;

/// Parsed edge guard, evaluated against the producing step's result.
///
/// Supported expressions:
/// - `key == value`, `key != value`
/// - `key < n`, `key <= n`, `key > n`, `key >= n`
/// - `key contains "substr"`
/// - `key` (truthy), `!key` (falsy)
///
/// Keys may be dotted paths (`review.score`). Values are quoted strings,
/// numbers, or `true`/`false`. A missing key fails every comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Compare {
        path: Vec<String>,
        op: Op,
        value: Literal,
    },
    Truthy(Vec<String>),
    Falsy(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

// Longer symbols first so `<=` is not read as `<`.
const SYMBOL_OPS: &[(&str, Op)] = &[
    ("==", Op::Eq),
    ("!=", Op::Ne),
    ("<=", Op::Le),
    (">=", Op::Ge),
    ("<", Op::Lt),
    (">", Op::Gt),
];

impl Guard {
    /// Parse a guard expression. The error is a human-readable reason.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err("empty guard expression".into());
        }

        if let Some(rest) = expr.strip_prefix('!') {
            if !rest.starts_with('=') {
                let (path, tail) = parse_path(rest.trim_start())?;
                if !tail.trim().is_empty() {
                    return Err(format!("unexpected '{}' after negated key", tail.trim()));
                }
                return Ok(Guard::Falsy(path));
            }
        }

        let (path, rest) = parse_path(expr)?;
        let rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(Guard::Truthy(path));
        }

        let (op, operand) = parse_operator(rest)?;
        let value = parse_literal(operand.trim())?;
        if op == Op::Contains && !matches!(value, Literal::Str(_)) {
            return Err("'contains' needs a quoted string".into());
        }
        if matches!(op, Op::Lt | Op::Le | Op::Gt | Op::Ge) && !matches!(value, Literal::Num(_)) {
            return Err(format!("'{}' needs a number", op.as_str()));
        }
        Ok(Guard::Compare { path, op, value })
    }

    /// Evaluate against a step result.
    pub fn evaluate(&self, result: &serde_json::Value) -> bool {
        match self {
            Guard::Truthy(path) => lookup(result, path).is_some_and(truthy),
            Guard::Falsy(path) => !lookup(result, path).is_some_and(truthy),
            Guard::Compare { path, op, value } => match lookup(result, path) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
        }
    }
}

fn parse_path(input: &str) -> Result<(Vec<String>, &str), String> {
    let end = input
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(input.len());
    let (raw, rest) = input.split_at(end);
    if raw.is_empty() {
        return Err(format!("expected a key at '{}'", input));
    }
    let path: Vec<String> = raw.split('.').map(String::from).collect();
    if path.iter().any(|seg| seg.is_empty()) {
        return Err(format!("malformed key path '{}'", raw));
    }
    Ok((path, rest))
}

fn parse_operator(input: &str) -> Result<(Op, &str), String> {
    for (symbol, op) in SYMBOL_OPS {
        if let Some(rest) = input.strip_prefix(symbol) {
            return Ok((*op, rest));
        }
    }
    if let Some(rest) = input.strip_prefix("contains") {
        if rest.starts_with(char::is_whitespace) {
            return Ok((Op::Contains, rest));
        }
    }
    Err(format!("unknown operator at '{}'", input))
}

fn parse_literal(input: &str) -> Result<Literal, String> {
    if input.is_empty() {
        return Err("missing value".into());
    }
    for quote in ['"', '\''] {
        if let Some(inner) = input.strip_prefix(quote) {
            return match inner.strip_suffix(quote) {
                Some(s) if !s.contains(quote) => Ok(Literal::Str(s.to_string())),
                _ => Err(format!("unterminated or malformed string {}", input)),
            };
        }
    }
    match input {
        "true" => return Ok(Literal::Bool(true)),
        "false" => return Ok(Literal::Bool(false)),
        _ => {}
    }
    input
        .parse::<f64>()
        .map(Literal::Num)
        .map_err(|_| format!("value '{}' must be quoted, a number, or true/false", input))
}

fn lookup<'a>(value: &'a serde_json::Value, path: &[String]) -> Option<&'a serde_json::Value> {
    path.iter().try_fold(value, |current, segment| match current {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn equals(actual: &serde_json::Value, expected: &Literal) -> bool {
    match expected {
        Literal::Str(s) => actual.as_str() == Some(s.as_str()),
        Literal::Num(n) => actual.as_f64() == Some(*n),
        Literal::Bool(b) => actual.as_bool() == Some(*b),
    }
}

fn compare(actual: &serde_json::Value, op: Op, expected: &Literal) -> bool {
    match op {
        Op::Eq => equals(actual, expected),
        Op::Ne => !equals(actual, expected),
        Op::Contains => {
            let Literal::Str(needle) = expected else {
                return false;
            };
            match actual {
                serde_json::Value::String(s) => s.contains(needle.as_str()),
                serde_json::Value::Array(items) => {
                    items.iter().any(|i| i.as_str() == Some(needle.as_str()))
                }
                _ => false,
            }
        }
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let (Some(a), Literal::Num(b)) = (actual.as_f64(), expected) else {
                return false;
            };
            match op {
                Op::Lt => a < *b,
                Op::Le => a <= *b,
                Op::Gt => a > *b,
                _ => a >= *b,
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => write!(f, "\"{}\"", s),
            Literal::Num(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Truthy(path) => write!(f, "{}", path.join(".")),
            Guard::Falsy(path) => write!(f, "!{}", path.join(".")),
            Guard::Compare { path, op, value } => {
                write!(f, "{} {} {}", path.join("."), op.as_str(), value)
            }
        }
    }
}
