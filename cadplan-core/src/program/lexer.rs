use super::ProgramError;

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    Pipe,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("`{}`", name),
            TokenKind::Number(value) => format!("number {}", value),
            TokenKind::Str(text) => format!("string \"{}\"", text),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Pipe => "'|>'".to_string(),
            TokenKind::Eof => "end of program".to_string(),
        }
    }
}

pub(crate) struct Lexer<'a> {
    source: &'a str,
    index: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            index: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ProgramError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance_char();
                continue;
            }
            if ch == '#' || self.starts_with("//") {
                self.skip_line_comment();
                continue;
            }

            let line = self.line;
            let column = self.column;
            let single = match ch {
                '(' => Some(TokenKind::LParen),
                ')' => Some(TokenKind::RParen),
                ',' => Some(TokenKind::Comma),
                '=' => Some(TokenKind::Eq),
                '+' => Some(TokenKind::Plus),
                '-' => Some(TokenKind::Minus),
                '*' => Some(TokenKind::Star),
                '/' => Some(TokenKind::Slash),
                _ => None,
            };
            if let Some(kind) = single {
                self.advance_char();
                tokens.push(Token { kind, line, column });
                continue;
            }

            let kind = match ch {
                '|' if self.starts_with("|>") => {
                    self.advance_char();
                    self.advance_char();
                    TokenKind::Pipe
                }
                '"' | '\'' => self.lex_string(ch)?,
                c if c == '_' || c.is_ascii_alphabetic() => self.lex_identifier(),
                c if c.is_ascii_digit() || c == '.' => self.lex_number()?,
                _ => {
                    return Err(self.error(format!("unexpected character '{}'", ch), line, column));
                }
            };
            tokens.push(Token { kind, line, column });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }

    fn lex_identifier(&mut self) -> TokenKind {
        let start = self.index;
        while self
            .peek_char()
            .map(|c| c == '_' || c.is_ascii_alphanumeric())
            .unwrap_or(false)
        {
            self.advance_char();
        }
        TokenKind::Ident(self.source[start..self.index].to_string())
    }

    fn lex_number(&mut self) -> Result<TokenKind, ProgramError> {
        let (line, column) = (self.line, self.column);
        let start = self.index;
        let mut seen_dot = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                self.advance_char();
            } else {
                break;
            }
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            self.advance_char();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.advance_char();
            }
            while self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.advance_char();
            }
        }
        let text = &self.source[start..self.index];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number literal '{}'", text), line, column))?;
        // Lengths are millimetres already; a trailing unit is allowed and ignored.
        if self.starts_with("mm") {
            self.advance_char();
            self.advance_char();
        }
        Ok(TokenKind::Number(value))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ProgramError> {
        let (line, column) = (self.line, self.column);
        self.advance_char();
        let start = self.index;
        while let Some(c) = self.peek_char() {
            if c == quote {
                let text = self.source[start..self.index].to_string();
                self.advance_char();
                return Ok(TokenKind::Str(text));
            }
            if c == '\n' {
                break;
            }
            self.advance_char();
        }
        Err(self.error("unterminated string literal", line, column))
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.advance_char() {
            if ch == '\n' {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>, line: usize, column: usize) -> ProgramError {
        ProgramError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        self.source[self.index..].starts_with(text)
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.index..].chars().next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.index += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }
}
