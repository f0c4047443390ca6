use core::fmt;
use std::{collections::VecDeque, rc::Rc};

use itertools::Itertools;
use logos::Logos;

use crate::{error::SkiffError, value::format_float};


#[derive(Debug, Logos)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r";[^\n]*")]
enum Token<'a> {
    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice())]
    Str(&'a str),

    #[regex(r#"[^\s()";]+"#, |lex| lex.slice())]
    Word(&'a str),
}

// Owned tokens, so partial input can wait in the reader across feeds
#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Open,
    Close,
    Word(String),
    Str(Rc<str>),
}

type ParseResult<O> = Result<O, SkiffError>;

const EXTENDED_IDENTIFIER_CHARS: &str = "!$%&*+-./:<=>?@^_~";

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(Rc<str>),
    Symbol(Rc<str>),
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", format_float(*value)),
            Self::Boolean(true) => write!(f, "#t"),
            Self::Boolean(false) => write!(f, "#f"),
            Self::Str(value) => {
                write!(f, "\"")?;
                for c in value.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Self::Symbol(name) => write!(f, "{}", name),
        }
    }
}

/// Stable handle of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Atom(Atom),
    /// A parenthesized combination. The operator is the first child; the
    /// operands follow it through the sibling links.
    Compound { operator: NodeId },
    /// `()`
    Empty,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    next: Option<NodeId>,
}

/// Arena holding every expression tree read so far. Trees are never mutated
/// once built, so procedure bodies can keep referring to them by [`NodeId`].
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, next: None });
        id
    }

    fn combination(&mut self, items: Vec<NodeId>) -> NodeId {
        let Some(&operator) = items.first() else {
            return self.push(NodeKind::Empty);
        };
        for (current, next) in items.iter().tuple_windows() {
            self.nodes[current.0 as usize].next = Some(*next);
        }
        self.push(NodeKind::Compound { operator })
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0 as usize].kind
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0 as usize].next
    }

    /// Operator followed by the operands of a compound node; empty otherwise.
    pub fn children(&self, id: NodeId) -> Siblings<'_> {
        let next = match self.kind(id) {
            NodeKind::Compound { operator } => Some(*operator),
            _ => None,
        };
        Siblings { ast: self, next }
    }

    pub fn operands(&self, id: NodeId) -> Siblings<'_> {
        let mut children = self.children(id);
        children.next();
        children
    }

    pub fn symbol(&self, id: NodeId) -> Option<&Rc<str>> {
        match self.kind(id) {
            NodeKind::Atom(Atom::Symbol(name)) => Some(name),
            _ => None,
        }
    }

    /// Prints a tree back as text. Walks with an explicit work stack, so
    /// nesting depth is not limited by the host stack.
    pub fn render(&self, id: NodeId) -> String {
        enum Piece {
            Node(NodeId),
            Text(&'static str),
        }

        let mut rendered = String::new();
        let mut work = vec![Piece::Node(id)];

        while let Some(piece) = work.pop() {
            match piece {
                Piece::Text(text) => rendered.push_str(text),
                Piece::Node(node) => match self.kind(node) {
                    NodeKind::Atom(atom) => rendered.push_str(&atom.to_string()),
                    NodeKind::Empty => rendered.push_str("()"),
                    NodeKind::Compound { .. } => {
                        rendered.push('(');
                        work.push(Piece::Text(")"));
                        for (index, child) in self.children(node).collect_vec().into_iter().enumerate().rev() {
                            work.push(Piece::Node(child));
                            if index > 0 {
                                work.push(Piece::Text(" "));
                            }
                        }
                    }
                },
            }
        }

        rendered
    }
}

pub struct Siblings<'a> {
    ast: &'a Ast,
    next: Option<NodeId>,
}

impl<'a> Iterator for Siblings<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.ast.next(current);
        Some(current)
    }
}

fn lexer(input: &str) -> ParseResult<Vec<Lexeme>> {
    let mut lexemes = vec![];
    let mut tokenizer = Token::lexer(input);

    while let Some(result) = tokenizer.next() {
        match result {
            Ok(Token::LeftParen) => lexemes.push(Lexeme::Open),
            Ok(Token::RightParen) => lexemes.push(Lexeme::Close),
            Ok(Token::Str(literal)) => lexemes.push(Lexeme::Str(unescape(literal)?.into())),
            Ok(Token::Word(word)) => lexemes.push(Lexeme::Word(word.to_owned())),
            Err(_) => return Err(SkiffError::SyntaxError(format!("unexpected input \"{}\"", tokenizer.slice()))),
        }
    }

    Ok(lexemes)
}

fn unescape(literal: &str) -> ParseResult<String> {
    let inner = &literal[1..literal.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => result.push('"'),
            Some('\\') => result.push('\\'),
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            other => return Err(SkiffError::SyntaxError(format!(
                "illegal escape sequence \\{}", other.map(String::from).unwrap_or_default()
            ))),
        }
    }

    Ok(result)
}

fn looks_numeric(word: &str) -> bool {
    word.chars().any(|c| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
}

pub(crate) fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if !first.is_ascii_digit() => {},
        _ => return false,
    }
    word.chars().all(|c| c.is_alphanumeric() || EXTENDED_IDENTIFIER_CHARS.contains(c))
}

fn is_integer_shaped(word: &str) -> bool {
    let digits = word.strip_prefix(['+', '-']).unwrap_or(word);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

// Numerals are only accepted in the form they print back as, so reading a
// literal and printing its value gives the same text.
fn numeral(word: &str) -> ParseResult<Option<Atom>> {
    let atom = if let Ok(integer) = word.parse() {
        Atom::Integer(integer)
    } else if is_integer_shaped(word) {
        return Err(SkiffError::SyntaxError(format!("integer literal {} is out of range", word)));
    } else if let Ok(float) = word.parse() {
        Atom::Float(float)
    } else {
        return Ok(None);
    };

    let canonical = atom.to_string();
    if canonical != word {
        return Err(SkiffError::SyntaxError(format!("numeral {} must be written as {}", word, canonical)));
    }
    Ok(Some(atom))
}

fn classify(word: &str) -> ParseResult<Atom> {
    if looks_numeric(word) {
        if let Some(atom) = numeral(word)? { return Ok(atom) }
    }
    match word {
        "#t" => Ok(Atom::Boolean(true)),
        "#f" => Ok(Atom::Boolean(false)),
        word if is_identifier(word) => Ok(Atom::Symbol(word.into())),
        word => Err(SkiffError::SyntaxError(format!("\"{}\" is not a valid identifier", word))),
    }
}

// Shift-reduce over one balanced run of lexemes. `None` on the stack marks an
// open parenthesis.
fn build(ast: &mut Ast, lexemes: Vec<Lexeme>) -> ParseResult<NodeId> {
    let mut stack: Vec<Option<NodeId>> = Vec::new();

    for lexeme in lexemes {
        match lexeme {
            Lexeme::Open => stack.push(None),
            Lexeme::Close => {
                let mut items = vec![];
                while let Some(Some(item)) = stack.pop() {
                    items.push(item);
                }
                items.reverse();
                let node = ast.combination(items);
                stack.push(Some(node));
            }
            Lexeme::Word(word) => {
                let atom = classify(&word)?;
                stack.push(Some(ast.push(NodeKind::Atom(atom))));
            }
            Lexeme::Str(contents) => stack.push(Some(ast.push(NodeKind::Atom(Atom::Str(contents))))),
        }
    }

    match stack.as_slice() {
        [Some(root)] => Ok(*root),
        _ => Err(SkiffError::SyntaxError("unbalanced expression".to_owned())),
    }
}

/// Incremental reader: text is fed in arbitrary chunks and complete top-level
/// expressions are taken out one at a time.
#[derive(Debug, Default)]
pub struct Reader {
    pending: VecDeque<Lexeme>,
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenizes `input` and queues it. On a lexical error nothing is queued.
    pub fn feed(&mut self, input: &str) -> ParseResult<()> {
        let lexemes = lexer(input)?;
        self.pending.extend(lexemes);
        Ok(())
    }

    /// True when queued tokens do not yet form a complete expression.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Builds the next complete top-level expression into `ast`. Returns
    /// `Ok(None)` when more input is needed; the partial input stays queued.
    pub fn read(&mut self, ast: &mut Ast) -> ParseResult<Option<NodeId>> {
        match self.pending.front() {
            None => return Ok(None),
            Some(Lexeme::Close) => {
                self.pending.pop_front();
                return Err(SkiffError::SyntaxError("unexpected \")\"".to_owned()));
            }
            Some(_) => {}
        }

        let mut depth = 0usize;
        let mut end = None;
        for (index, lexeme) in self.pending.iter().enumerate() {
            match lexeme {
                Lexeme::Open => depth += 1,
                Lexeme::Close => depth -= 1,
                _ => {}
            }
            if depth == 0 {
                end = Some(index + 1);
                break;
            }
        }

        let Some(end) = end else { return Ok(None) };
        let lexemes = self.pending.drain(..end).collect_vec();
        build(ast, lexemes).map(Some)
    }
}

/// Reads exactly one expression from `input` into a fresh arena.
pub fn parse(input: &str) -> ParseResult<(Ast, NodeId)> {
    let mut ast = Ast::new();
    let mut reader = Reader::new();
    reader.feed(input)?;

    let root = reader.read(&mut ast)?
        .ok_or_else(|| SkiffError::SyntaxError("incomplete expression".to_owned()))?;
    if reader.is_pending() {
        return Err(SkiffError::SyntaxError("trailing input after expression".to_owned()));
    }

    Ok((ast, root))
}
