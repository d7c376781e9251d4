//! Tokenizer for SDL source text.

use super::{ParseError, Pos};

/// Lexical token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Ident(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Duration literal, normalized to seconds.
    Duration(f64),
    /// String literal.
    Str(String),
    /// Punctuation or operator.
    Punct(Punct),
    /// End of input.
    Eof,
}

/// Punctuation and operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `;`
    Semi,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `=>`
    Arrow,
    /// `=`
    Assign,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
}

impl Punct {
    /// Source spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Comma => ",",
            Punct::Semi => ";",
            Punct::Colon => ":",
            Punct::Dot => ".",
            Punct::Arrow => "=>",
            Punct::Assign => "=",
            Punct::EqEq => "==",
            Punct::NotEq => "!=",
            Punct::Lt => "<",
            Punct::Le => "<=",
            Punct::Gt => ">",
            Punct::Ge => ">=",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Bang => "!",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token kind.
    pub kind: TokenKind,
    /// Position of the first character.
    pub pos: Pos,
}

/// Tokenize a whole source file.
pub fn tokenize(file: &str, src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(file, src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    file: &'a str,
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, src: &'a str) -> Self {
        Self {
            file,
            src,
            bytes: src.as_bytes(),
            index: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current() {
            self.index += 1;
            if ch == b'\n' {
                self.line += 1;
                self.col = 1;
            } else if ch & 0xC0 != 0x80 {
                self.col += 1;
            }
        }
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError::new(self.file, pos, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_ascii_whitespace() => self.advance(),
                (Some(b'/'), Some(b'/')) => {
                    while let Some(ch) = self.current() {
                        if ch == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos();
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some(b'*'), Some(b'/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => self.advance(),
                            (None, _) => return Err(self.error(start, "unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let pos = self.pos();
        let Some(ch) = self.current() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };

        let kind = match ch {
            b'"' => self.string(pos)?,
            b'0'..=b'9' => self.number(pos)?,
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let start = self.index;
                while matches!(self.current(), Some(c) if c == b'_' || c.is_ascii_alphanumeric()) {
                    self.advance();
                }
                TokenKind::Ident(self.src[start..self.index].to_string())
            }
            _ => TokenKind::Punct(self.punct(pos)?),
        };
        Ok(Token { kind, pos })
    }

    fn punct(&mut self, pos: Pos) -> Result<Punct, ParseError> {
        let two = match (self.current(), self.peek()) {
            (Some(b'='), Some(b'>')) => Some(Punct::Arrow),
            (Some(b'='), Some(b'=')) => Some(Punct::EqEq),
            (Some(b'!'), Some(b'=')) => Some(Punct::NotEq),
            (Some(b'<'), Some(b'=')) => Some(Punct::Le),
            (Some(b'>'), Some(b'=')) => Some(Punct::Ge),
            (Some(b'&'), Some(b'&')) => Some(Punct::AndAnd),
            (Some(b'|'), Some(b'|')) => Some(Punct::OrOr),
            _ => None,
        };
        if let Some(p) = two {
            self.advance();
            self.advance();
            return Ok(p);
        }

        let one = match self.current() {
            Some(b'(') => Punct::LParen,
            Some(b')') => Punct::RParen,
            Some(b'{') => Punct::LBrace,
            Some(b'}') => Punct::RBrace,
            Some(b'[') => Punct::LBracket,
            Some(b']') => Punct::RBracket,
            Some(b',') => Punct::Comma,
            Some(b';') => Punct::Semi,
            Some(b':') => Punct::Colon,
            Some(b'.') => Punct::Dot,
            Some(b'=') => Punct::Assign,
            Some(b'<') => Punct::Lt,
            Some(b'>') => Punct::Gt,
            Some(b'+') => Punct::Plus,
            Some(b'-') => Punct::Minus,
            Some(b'*') => Punct::Star,
            Some(b'/') => Punct::Slash,
            Some(b'%') => Punct::Percent,
            Some(b'!') => Punct::Bang,
            _ => {
                let found = self.src[self.index..].chars().next().unwrap_or('?');
                return Err(self.error(pos, format!("unexpected character '{found}'")));
            }
        };
        self.advance();
        Ok(one)
    }

    fn string(&mut self, pos: Pos) -> Result<TokenKind, ParseError> {
        self.advance();
        let mut buf = String::new();
        loop {
            let Some(ch) = self.current() else {
                return Err(self.error(pos, "unterminated string literal"));
            };
            match ch {
                b'"' => {
                    self.advance();
                    return Ok(TokenKind::Str(buf));
                }
                b'\\' => {
                    self.advance();
                    let escaped = match self.current() {
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        Some(other) => {
                            return Err(self.error(self.pos(), format!("unknown escape: \\{}", other as char)));
                        }
                        None => return Err(self.error(pos, "incomplete escape")),
                    };
                    self.advance();
                    buf.push(escaped);
                }
                _ => {
                    let start = self.index;
                    self.advance();
                    while matches!(self.current(), Some(c) if c & 0xC0 == 0x80) {
                        self.advance();
                    }
                    buf.push_str(&self.src[start..self.index]);
                }
            }
        }
    }

    fn number(&mut self, pos: Pos) -> Result<TokenKind, ParseError> {
        let start = self.index;
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.current() == Some(b'.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = &self.src[start..self.index];

        let unit_start = self.index;
        while matches!(self.current(), Some(c) if c.is_ascii_alphabetic()) {
            self.advance();
        }
        let unit = &self.src[unit_start..self.index];
        if !unit.is_empty() {
            let per_second = units_per_second(unit)
                .ok_or_else(|| self.error(pos, format!("unknown duration unit '{unit}'")))?;
            let magnitude: f64 = text
                .parse()
                .map_err(|_| self.error(pos, "invalid duration literal"))?;
            return Ok(TokenKind::Duration(magnitude / per_second));
        }

        if is_float {
            text.parse()
                .map(TokenKind::Float)
                .map_err(|_| self.error(pos, "invalid float literal"))
        } else {
            text.parse()
                .map(TokenKind::Int)
                .map_err(|_| self.error(pos, "invalid integer literal"))
        }
    }
}

/// How many of `unit` make up one second. Literals divide by this so that
/// `100us` is the nearest float to `1e-4`.
pub fn units_per_second(unit: &str) -> Option<f64> {
    match unit {
        "ns" => Some(1e9),
        "us" => Some(1e6),
        "ms" => Some(1e3),
        "s" => Some(1.0),
        _ => None,
    }
}
