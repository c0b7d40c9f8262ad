//! Transform-script parser
//!
//! The code generator emits a small, line-oriented script: one `name = expr`
//! statement per line, `#` comments, string/number literals, `[a, b]` lists
//! and method chains over table variables. This module turns that text into
//! an AST; evaluation lives in the sandbox.
//!
//! Newlines terminate statements except inside parentheses or brackets, so
//! a generator that wraps a long argument list survives parsing.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(f64),
    Ident(String),
    List(Vec<Expr>),
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub target: String,
    pub expr: Expr,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Assign,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Newline,
}

fn script_err(line: usize, msg: impl Into<String>) -> EngineError {
    EngineError::Script(format!("line {}: {}", line, msg.into()))
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    /// Paren/bracket depth; newlines inside a nested expression are ignored.
    depth: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            depth: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.chars.peek() {
            match c {
                '\n' => {
                    self.chars.next();
                    if self.depth == 0 {
                        tokens.push((Token::Newline, self.line));
                    }
                    self.line += 1;
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '=' => {
                    self.chars.next();
                    tokens.push((Token::Assign, self.line));
                }
                '.' => {
                    self.chars.next();
                    tokens.push((Token::Dot, self.line));
                }
                ',' => {
                    self.chars.next();
                    tokens.push((Token::Comma, self.line));
                }
                '(' => {
                    self.chars.next();
                    self.depth += 1;
                    tokens.push((Token::LParen, self.line));
                }
                ')' => {
                    self.chars.next();
                    self.depth = self.depth.saturating_sub(1);
                    tokens.push((Token::RParen, self.line));
                }
                '[' => {
                    self.chars.next();
                    self.depth += 1;
                    tokens.push((Token::LBracket, self.line));
                }
                ']' => {
                    self.chars.next();
                    self.depth = self.depth.saturating_sub(1);
                    tokens.push((Token::RBracket, self.line));
                }
                '"' | '\'' => {
                    let s = self.read_string(c)?;
                    tokens.push((Token::Str(s), self.line));
                }
                '-' => {
                    self.chars.next();
                    let n = self.read_number()?;
                    tokens.push((Token::Num(-n), self.line));
                }
                c if c.is_ascii_digit() => {
                    let n = self.read_number()?;
                    tokens.push((Token::Num(n), self.line));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c.is_alphanumeric() || c == '_' {
                            ident.push(c);
                            self.chars.next();
                        } else {
                            break;
                        }
                    }
                    tokens.push((Token::Ident(ident), self.line));
                }
                other => {
                    return Err(script_err(
                        self.line,
                        format!("unexpected character '{}'", other),
                    ));
                }
            }
        }

        Ok(tokens)
    }

    fn read_string(&mut self, quote: char) -> Result<String> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(s),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(script_err(self.line, "unterminated string")),
                },
                Some('\n') => return Err(script_err(self.line, "unterminated string")),
                Some(c) => s.push(c),
                None => return Err(script_err(self.line, "unterminated string")),
            }
        }
    }

    fn read_number(&mut self) -> Result<f64> {
        let mut raw = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                raw.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        raw.parse::<f64>()
            .map_err(|_| script_err(self.line, format!("invalid number '{}'", raw)))
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        let line = self.line();
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(script_err(line, format!("expected {}, found {:?}", what, t))),
            None => Err(script_err(line, format!("expected {}, found end of script", what))),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn parse_script(&mut self) -> Result<Script> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_none() {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Script { statements })
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        let target = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(script_err(
                    line,
                    format!("expected a variable name, found {:?}", other),
                ))
            }
        };
        self.expect(&Token::Assign, "'='")?;
        let expr = self.parse_expr()?;

        // Statement must end at a newline or the end of the script.
        match self.peek() {
            None => {}
            Some(Token::Newline) => {
                self.pos += 1;
            }
            Some(t) => {
                return Err(script_err(
                    self.line(),
                    format!("unexpected {:?} after expression", t),
                ))
            }
        }

        Ok(Stmt { target, expr, line })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1; // '.'
            let line = self.line();
            let method = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(script_err(
                        line,
                        format!("expected a method name after '.', found {:?}", other),
                    ))
                }
            };
            self.expect(&Token::LParen, "'('")?;
            let args = self.parse_args(Token::RParen)?;
            expr = Expr::MethodCall {
                receiver: Box::new(expr),
                method,
                args,
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LBracket) => {
                let items = self.parse_args(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(script_err(
                line,
                format!("expected an expression, found {:?}", other),
            )),
        }
    }

    fn parse_args(&mut self, terminator: Token) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&terminator) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(ref t) if *t == terminator => return Ok(args),
                other => {
                    return Err(script_err(
                        self.line(),
                        format!("expected ',' or closing delimiter, found {:?}", other),
                    ))
                }
            }
        }
    }
}

/// Parse source text into a script AST.
pub fn parse(source: &str) -> Result<Script> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_script()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_and_method_chain() {
        let script = parse(
            "title = \"Revenue by country\"\n\
             by_country = Sales.group_sum('Country', '01.01.2024')\n\
             result = by_country.sort('01.01.2024', 'desc')\n",
        )
        .unwrap();

        assert_eq!(script.statements.len(), 3);
        assert_eq!(script.statements[0].target, "title");
        assert_eq!(
            script.statements[0].expr,
            Expr::Str("Revenue by country".to_string())
        );
        match &script.statements[2].expr {
            Expr::MethodCall { method, args, .. } => {
                assert_eq!(method, "sort");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected method call, got {:?}", other),
        }
    }

    #[test]
    fn parses_lists_and_chained_calls() {
        let script = parse("result = Sales.melt(['Country'], ['01.01.2024']).head(5)").unwrap();
        match &script.statements[0].expr {
            Expr::MethodCall { receiver, method, .. } => {
                assert_eq!(method, "head");
                assert!(matches!(**receiver, Expr::MethodCall { .. }));
            }
            other => panic!("expected method call, got {:?}", other),
        }
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let script = parse("# a comment\n\n\nresult = 42.5\n# trailing\n").unwrap();
        assert_eq!(script.statements.len(), 1);
        assert_eq!(script.statements[0].expr, Expr::Num(42.5));
    }

    #[test]
    fn newlines_inside_brackets_do_not_split_statements() {
        let script = parse("result = Sales.select([\n  'Country',\n  'Revenue'\n])").unwrap();
        assert_eq!(script.statements.len(), 1);
    }

    #[test]
    fn negative_numbers() {
        let script = parse("result = -3.5").unwrap();
        assert_eq!(script.statements[0].expr, Expr::Num(-3.5));
    }

    #[test]
    fn python_syntax_is_rejected_with_line_number() {
        let err = parse("for col in df.columns:\n    pass\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("line 1"), "got: {}", msg);
    }

    #[test]
    fn missing_assignment_is_an_error() {
        assert!(parse("Sales.head(5)").is_err());
    }
}
