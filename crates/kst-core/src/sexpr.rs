//! Minimal s-expression reader and printer for KiCad library files

use std::fmt;

/// Lists longer than this are broken over several lines when printed
const INLINE_WIDTH: usize = 100;

/// An s-expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    /// Bare token, e.g. `symbol`, `yes`, `1.27`
    Atom(String),
    /// Quoted string
    Str(String),
    /// Parenthesised list
    List(Vec<Sexpr>),
}

impl Sexpr {
    pub fn atom(s: impl Into<String>) -> Self {
        Sexpr::Atom(s.into())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Sexpr::Str(s.into())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Sexpr::List(items)
    }

    /// Text of an atom or string
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Sexpr::Atom(s) | Sexpr::Str(s) => Some(s),
            Sexpr::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match self {
            Sexpr::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head atom of a list, e.g. `property` for `(property "Value" "R")`
    pub fn head(&self) -> Option<&str> {
        match self {
            Sexpr::List(items) => match items.first() {
                Some(Sexpr::Atom(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Pretty-print with two-space indentation
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::new();
        write_pretty(self, 0, &mut out);
        out.push('\n');
        out
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Atom(s) => write!(f, "{}", s),
            Sexpr::Str(s) => write!(f, "\"{}\"", escape(s)),
            Sexpr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn write_pretty(expr: &Sexpr, depth: usize, out: &mut String) {
    let items = match expr {
        Sexpr::List(items) => items,
        other => {
            out.push_str(&other.to_string());
            return;
        }
    };

    let inline = expr.to_string();
    let has_nested_list = items
        .iter()
        .any(|i| i.as_list().is_some_and(|l| l.iter().any(|c| c.as_list().is_some())));
    if inline.len() + depth * 2 <= INLINE_WIDTH && !has_nested_list {
        out.push_str(&inline);
        return;
    }

    // Leading atoms stay on the opening line, lists go one per line
    out.push('(');
    let split = items
        .iter()
        .position(|i| i.as_list().is_some())
        .unwrap_or(items.len());
    let head: Vec<String> = items[..split].iter().map(|i| i.to_string()).collect();
    out.push_str(&head.join(" "));
    for item in &items[split..] {
        out.push('\n');
        out.push_str(&"  ".repeat(depth + 1));
        write_pretty(item, depth + 1, out);
    }
    out.push('\n');
    out.push_str(&"  ".repeat(depth));
    out.push(')');
}

/// Syntax error with the 1-based line it was found on
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a single top-level s-expression
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    let mut parser = Parser {
        chars: input.chars().peekable(),
        line: 1,
    };
    parser.skip_whitespace();
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if parser.chars.peek().is_some() {
        return Err(parser.error("unexpected content after top-level expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ParseError {
        ParseError {
            line: self.line,
            message: message.to_string(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn parse_expr(&mut self) -> Result<Sexpr, ParseError> {
        match self.chars.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('(') => self.parse_list(),
            Some(')') => Err(self.error("unbalanced ')'")),
            Some('"') => self.parse_string(),
            Some(_) => Ok(self.parse_atom()),
        }
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let open_line = self.line;
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                None => {
                    return Err(ParseError {
                        line: open_line,
                        message: "unclosed '('".to_string(),
                    })
                }
                Some(')') => {
                    self.bump();
                    return Ok(Sexpr::List(items));
                }
                Some(_) => items.push(self.parse_expr()?),
            }
        }
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let open_line = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(ParseError {
                        line: open_line,
                        message: "unterminated string".to_string(),
                    })
                }
                Some('"') => return Ok(Sexpr::Str(s)),
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some(c) => s.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn parse_atom(&mut self) -> Sexpr {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                break;
            }
            s.push(c);
            self.bump();
        }
        Sexpr::Atom(s)
    }
}
