//! Configuration text parser
//!
//! Grammar, one statement per line:
//!
//! ```text
//! name                 valueless leaf
//! name value           leaf (repeat the line for more values)
//! name {  ...  }       internal node
//! name key {  ...  }   tag instance `key` of tag node `name`
//! name "" { }          tag node `name` itself, even without instances
//! ```
//!
//! `/* ... */` comments attach to the node that follows. `//` comments run
//! to the end of the line and are dropped, which also discards the version
//! trailer.

use crate::error::{Result, TreeError};
use crate::tree::{Node, Tree};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Open,
    Close,
    Newline,
    Comment(String),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next()
    }

    fn tokens(mut self) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else {
                out.push(Token { tok: Tok::Eof, line, column });
                return Ok(out);
            };
            let tok = match c {
                '\n' => {
                    self.bump();
                    Tok::Newline
                }
                c if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                '{' => {
                    self.bump();
                    Tok::Open
                }
                '}' => {
                    self.bump();
                    Tok::Close
                }
                ';' => return Err(TreeError::parse(line, column, "unexpected ';'")),
                '"' => Tok::Word(self.quoted(line, column)?),
                '/' if self.peek_second() == Some('*') => Tok::Comment(self.block_comment(line, column)?),
                '/' if self.peek_second() == Some('/') => {
                    while self.chars.peek().is_some_and(|&c| c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                _ => Tok::Word(self.bare()),
            };
            out.push(Token { tok, line, column });
        }
    }

    fn quoted(&mut self, line: usize, column: usize) -> Result<String> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(TreeError::parse(line, column, "unterminated quoted string")),
                Some('"') => return Ok(s),
                Some('\\') => match self.bump() {
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some('n') => s.push('\n'),
                    Some(other) => {
                        s.push('\\');
                        s.push(other);
                    }
                    None => return Err(TreeError::parse(line, column, "unterminated quoted string")),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn block_comment(&mut self, line: usize, column: usize) -> Result<String> {
        self.bump();
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(TreeError::parse(line, column, "unterminated comment")),
                Some('*') if self.chars.peek() == Some(&'/') => {
                    self.bump();
                    return Ok(s.trim().to_string());
                }
                Some(c) => s.push(c),
            }
        }
    }

    fn bare(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '{' | '}' | '"' | ';') {
                break;
            }
            s.push(c);
            self.bump();
        }
        s
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // the lexer always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    /// Parse statements into `parent` until the matching `}` (or end of input
    /// at top level)
    fn block(&mut self, parent: &mut Node, nested: bool) -> Result<()> {
        let mut comment: Option<String> = None;
        loop {
            let token = self.next();
            match token.tok {
                Tok::Newline => {}
                Tok::Comment(text) => {
                    comment = Some(match comment.take() {
                        Some(prev) => format!("{}\n{}", prev, text),
                        None => text,
                    });
                }
                Tok::Close if nested => return Ok(()),
                Tok::Close => return Err(TreeError::parse(token.line, token.column, "unmatched '}'")),
                Tok::Eof if nested => {
                    return Err(TreeError::parse(token.line, token.column, "unexpected end of input, expected '}'"))
                }
                Tok::Eof => return Ok(()),
                Tok::Open => return Err(TreeError::parse(token.line, token.column, "'{' without a node name")),
                Tok::Word(name) => {
                    self.statement(parent, name, token.line, token.column, comment.take())?;
                }
            }
        }
    }

    fn statement(
        &mut self,
        parent: &mut Node,
        name: String,
        line: usize,
        column: usize,
        comment: Option<String>,
    ) -> Result<()> {
        let mut words = vec![name];
        while let Tok::Word(_) = self.peek().tok {
            let t = self.next();
            if words.len() == 2 {
                return Err(TreeError::parse(t.line, t.column, "too many words in statement"));
            }
            if let Tok::Word(w) = t.tok {
                words.push(w);
            }
        }
        let opens = self.peek().tok == Tok::Open;
        if opens {
            self.next();
        }

        let mut words = words.into_iter();
        let name = words.next().unwrap_or_default();
        let key = words.next();

        match (key, opens) {
            (None, true) => {
                let node = child_entry(parent, &name);
                if node.leaf {
                    return Err(TreeError::parse(line, column, format!("'{}' is a leaf node", name)));
                }
                if comment.is_some() {
                    node.comment = comment;
                }
                self.block(node, true)
            }
            (Some(key), true) if key.is_empty() => {
                let tag = child_entry(parent, &name);
                if tag.leaf {
                    return Err(TreeError::parse(line, column, format!("'{}' is a leaf node", name)));
                }
                tag.tag = true;
                if comment.is_some() {
                    tag.comment = comment;
                }
                self.empty_block()
            }
            (Some(key), true) => {
                let tag = child_entry(parent, &name);
                if tag.leaf {
                    return Err(TreeError::parse(line, column, format!("'{}' is a leaf node", name)));
                }
                tag.tag = true;
                let instance = child_entry(tag, &key);
                if comment.is_some() {
                    instance.comment = comment;
                }
                self.block(instance, true)
            }
            (value, false) => {
                let node = child_entry(parent, &name);
                if !node.children.is_empty() || node.tag {
                    return Err(TreeError::parse(line, column, format!("'{}' is not a leaf node", name)));
                }
                node.leaf = true;
                if let Some(v) = value {
                    if !node.values.contains(&v) {
                        node.values.push(v);
                    }
                }
                if comment.is_some() {
                    node.comment = comment;
                }
                Ok(())
            }
        }
    }
}

impl Parser {
    /// Skip to the `}` closing a tag header; the header holds no statements
    fn empty_block(&mut self) -> Result<()> {
        loop {
            let token = self.next();
            match token.tok {
                Tok::Newline => {}
                Tok::Close => return Ok(()),
                _ => {
                    return Err(TreeError::parse(
                        token.line,
                        token.column,
                        "a tag node header takes no statements",
                    ))
                }
            }
        }
    }
}

/// Existing child with this exact name, or a fresh internal one
fn child_entry<'a>(parent: &'a mut Node, name: &str) -> &'a mut Node {
    let idx = match parent.children.iter().position(|c| c.name == name) {
        Some(i) => i,
        None => {
            parent.children.push(Node::internal(name));
            parent.children.len() - 1
        }
    };
    &mut parent.children[idx]
}

/// Parse configuration text into a tree
pub fn parse(input: &str) -> Result<Tree> {
    let tokens = Lexer::new(input).tokens()?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut root = Node::default();
    parser.block(&mut root, false)?;
    Ok(Tree::from_root(root, None))
}

impl FromStr for Tree {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}
