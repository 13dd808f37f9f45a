/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the NEAR WASM Optimizer.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! S-expression reader/writer for the WebAssembly text format.
//!
//! This is deliberately not a WAT parser: it only understands parentheses,
//! atoms, line comments and quoted strings. Every pass in the optimizer
//! works on the resulting [`Node`] tree and the printer writes it back in a
//! form `wasm-as` / `wasm-opt` accept.
//!
//! Quoted strings keep their delimiters and escapes verbatim. Decoding them
//! to bytes is the job of [`crate::escape`].

use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unterminated string starting at {line}:{col}")]
    UnterminatedString { line: u32, col: u32 },
    #[error("Unexpected ')' at {line}:{col}")]
    UnexpectedClose { line: u32, col: u32 },
    #[error("Atom `{atom}` outside of any list at {line}:{col}")]
    AtomOutsideList { atom: String, line: u32, col: u32 },
    #[error("Unclosed '(' (depth {depth} at end of input)")]
    UnclosedList { depth: usize },
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
}

// ─── Tree ────────────────────────────────────────────────────────────────────

/// One structural unit of the text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Atom(String),
    List(Vec<Node>),
}

impl Node {
    pub fn atom(text: impl Into<String>) -> Self {
        Node::Atom(text.into())
    }

    pub fn list(children: Vec<Node>) -> Self {
        Node::List(children)
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Node::Atom(text) => Some(text),
            Node::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(children) => Some(children),
            Node::Atom(_) => None,
        }
    }

    /// The keyword of a list form, e.g. `func` for `(func $f ...)`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_atom()
    }

    pub fn is_form(&self, keyword: &str) -> bool {
        self.head() == Some(keyword)
    }

    /// Renders the tree in the single-line form written to `.wat` files.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        write_node(self, &mut out);
        out
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Atom(text) => out.push_str(text),
        Node::List(children) => {
            out.push('(');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_node(child, out);
            }
            out.push(')');
        }
    }
}

// ─── Token Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LParen,
    RParen,
    /// Bare atom or quoted string (quotes included).
    Atom(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    source: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.next()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        let mut atom = String::new();
        let mut atom_start = (1, 1);

        while let Some(&ch) = self.source.peek() {
            let delimits = ch.is_whitespace() || ch == '(' || ch == ')' || ch == ';' || ch == '"';
            if delimits && !atom.is_empty() {
                tokens.push(Token {
                    kind: TokenKind::Atom(std::mem::take(&mut atom)),
                    line: atom_start.0,
                    col: atom_start.1,
                });
            }

            let (line, col) = (self.line, self.col);
            match ch {
                '(' | ')' => {
                    self.advance();
                    let kind = if ch == '(' {
                        TokenKind::LParen
                    } else {
                        TokenKind::RParen
                    };
                    tokens.push(Token { kind, line, col });
                }
                ';' => {
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '"' => {
                    let text = self.string_literal(line, col)?;
                    tokens.push(Token {
                        kind: TokenKind::Atom(text),
                        line,
                        col,
                    });
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                c => {
                    if atom.is_empty() {
                        atom_start = (line, col);
                    }
                    atom.push(c);
                    self.advance();
                }
            }
        }

        if !atom.is_empty() {
            tokens.push(Token {
                kind: TokenKind::Atom(atom),
                line: atom_start.0,
                col: atom_start.1,
            });
        }
        Ok(tokens)
    }

    /// Consumes a quoted string, returning it with delimiters and escapes intact.
    fn string_literal(&mut self, line: u32, col: u32) -> Result<String, ParseError> {
        let unterminated = ParseError::UnterminatedString { line, col };
        let mut text = String::from('"');
        self.advance(); // opening quote
        loop {
            match self.advance() {
                Some('"') => {
                    text.push('"');
                    return Ok(text);
                }
                Some('\\') => {
                    let escaped = self.advance().ok_or_else(|| unterminated.clone())?;
                    text.push('\\');
                    text.push(escaped);
                }
                Some(c) => text.push(c),
                None => return Err(unterminated),
            }
        }
    }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

/// Builds a tree from tokens with an explicit stack, so nesting depth is
/// bounded only by memory.
///
/// The last top-level list is returned; empty input yields an empty list.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Node, ParseError> {
    let mut stack: Vec<Vec<Node>> = Vec::new();
    let mut root = Node::List(Vec::new());

    for token in tokens {
        match token.kind {
            TokenKind::LParen => stack.push(Vec::new()),
            TokenKind::RParen => {
                let children = stack.pop().ok_or(ParseError::UnexpectedClose {
                    line: token.line,
                    col: token.col,
                })?;
                let list = Node::List(children);
                match stack.last_mut() {
                    Some(parent) => parent.push(list),
                    None => root = list,
                }
            }
            TokenKind::Atom(text) => match stack.last_mut() {
                Some(parent) => parent.push(Node::Atom(text)),
                None => {
                    return Err(ParseError::AtomOutsideList {
                        atom: text,
                        line: token.line,
                        col: token.col,
                    })
                }
            },
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::UnclosedList { depth: stack.len() });
    }
    Ok(root)
}

pub fn parse(source: &str) -> Result<Node, ParseError> {
    parse_tokens(Lexer::new(source).tokenize()?)
}

pub fn read_file(path: &Path) -> Result<Node, ParseError> {
    let source = fs::read_to_string(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse(&source)
}

pub fn write_file(node: &Node, path: &Path) -> std::io::Result<()> {
    fs::write(path, node.to_text())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::unescape;

    fn atoms(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .map(|t| match &t.kind {
                TokenKind::LParen => "(".to_string(),
                TokenKind::RParen => ")".to_string(),
                TokenKind::Atom(a) => a.clone(),
            })
            .collect()
    }

    #[test]
    fn test_parse_nested() {
        let node = parse("(a (b) c)").unwrap();
        assert_eq!(
            node,
            Node::list(vec![
                Node::atom("a"),
                Node::list(vec![Node::atom("b")]),
                Node::atom("c"),
            ])
        );
    }

    #[test]
    fn test_string_atom_keeps_escapes() {
        let node = parse(r#"(data "a\"b")"#).unwrap();
        let children = node.as_list().unwrap();
        assert_eq!(children[1], Node::atom(r#""a\"b""#));
        assert_eq!(unescape(children[1].as_atom().unwrap()).unwrap(), b"a\"b");
    }

    #[test]
    fn test_string_with_parens_and_semicolons() {
        let tokens = Lexer::new(r#"("(;)" x)"#).tokenize().unwrap();
        assert_eq!(atoms(&tokens), vec!["(", r#""(;)""#, "x", ")"]);
    }

    #[test]
    fn test_other_escapes_preserved() {
        let node = parse(r#"("\n\00\\")"#).unwrap();
        assert_eq!(node.to_text(), r#"("\n\00\\")"#);
    }

    #[test]
    fn test_comments_skipped() {
        let node = parse("(module ;; a comment (with parens\n  (func $f)) ; trailing").unwrap();
        assert_eq!(node.to_text(), "(module (func $f))");
    }

    #[test]
    fn test_semicolon_ends_atom() {
        let node = parse("(nop;comment\n drop)").unwrap();
        assert_eq!(node.to_text(), "(nop drop)");
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            parse("(data \"abc)"),
            Err(ParseError::UnterminatedString { line: 1, col: 7 })
        ));
        assert!(matches!(
            parse("(data \"abc\\"),
            Err(ParseError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn test_unexpected_close() {
        assert!(matches!(
            parse("(a))"),
            Err(ParseError::UnexpectedClose { line: 1, col: 4 })
        ));
    }

    #[test]
    fn test_atom_outside_list() {
        assert!(matches!(
            parse("module"),
            Err(ParseError::AtomOutsideList { .. })
        ));
    }

    #[test]
    fn test_unclosed_list() {
        assert_eq!(
            parse("(module (func"),
            Err(ParseError::UnclosedList { depth: 2 })
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse("  ;; nothing\n").unwrap(), Node::List(vec![]));
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let source = r#"
(module
 (type $0 (func (param i32) (result i32)))
 (import "env" "log_utf8" (func $log_utf8 (param i64 i64)))
 (memory $0 17)
 (data $.rodata (i32.const 1024) "\00\01hello \"world\"\\")
 (func $f (param $0 i32) (result i32)
  (local $1 i32)
  ;; body
  (i32.add (local.get $0) (i32.const -1))
 )
)
"#;
        let once = parse(source).unwrap().to_text();
        let twice = parse(&once).unwrap().to_text();
        assert_eq!(once, twice);
        assert!(once.starts_with("(module (type $0 (func (param i32) (result i32)))"));
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 100_000;
        let source = format!("{}x{}", "(".repeat(depth), ")".repeat(depth));
        let tokens = Lexer::new(&source).tokenize().unwrap();
        assert_eq!(tokens.len(), depth * 2 + 1);
        let node = parse_tokens(tokens).unwrap();
        // Unwind iteratively so dropping the tree cannot overflow the test thread.
        let mut current = node;
        let mut levels = 0;
        while let Node::List(mut children) = current {
            levels += 1;
            current = children.pop().unwrap();
        }
        assert_eq!(levels, depth);
        assert_eq!(current, Node::atom("x"));
    }

    #[test]
    fn test_read_and_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.wat");
        let node = parse("(module (memory 1))").unwrap();
        write_file(&node, &path).unwrap();
        assert_eq!(read_file(&path).unwrap(), node);
        assert!(matches!(
            read_file(&dir.path().join("missing.wat")),
            Err(ParseError::Io { .. })
        ));
    }
}
