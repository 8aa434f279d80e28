//! Lexer for the Python subset used inside specifications.
//!
//! Converts source text into a stream of tokens. Line breaks are
//! significant only outside brackets, where they separate statements.

use crate::token::{Span, Token, TokenKind};
use std::str::Chars;

pub struct Lexer<'a> {
    source: &'a str,
    chars: Chars<'a>,
    /// Current byte position.
    pos: usize,
    line: u32,
    column: u32,
    token_start: usize,
    token_start_line: u32,
    token_start_column: u32,
    /// Nesting depth of `(`, `[` and `{`.
    depth: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars(),
            pos: 0,
            line: 1,
            column: 1,
            token_start: 0,
            token_start_line: 1,
            token_start_column: 1,
            depth: 0,
        }
    }

    /// Tokenize the entire source, returning all tokens including EOF.
    ///
    /// Consecutive line breaks collapse into one `Newline`, and no
    /// `Newline` is emitted before the first token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let token = self.next_token();
            if token.kind == TokenKind::Newline
                && tokens
                    .last()
                    .map_or(true, |t| t.kind == TokenKind::Newline)
            {
                continue;
            }
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(newline) = self.skip_whitespace() {
            return newline;
        }
        self.mark_token_start();

        let Some(c) = self.peek() else {
            return self.make_token(TokenKind::Eof);
        };

        if c == '"' || c == '\'' {
            return self.lex_string(c);
        }

        if c.is_ascii_digit() || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit()))
        {
            return self.lex_number();
        }

        if c.is_alphabetic() || c == '_' {
            return self.lex_identifier();
        }

        self.lex_operator_or_punctuation()
    }

    /// Skips blanks, comments and line continuations. Returns a `Newline`
    /// token when a line break is crossed at bracket depth zero.
    fn skip_whitespace(&mut self) -> Option<Token> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.mark_token_start();
                    self.advance();
                    if self.depth == 0 {
                        return Some(self.make_token(TokenKind::Newline));
                    }
                }
                '\\' if self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                _ => break,
            }
        }
        None
    }

    fn mark_token_start(&mut self) {
        self.token_start = self.pos;
        self.token_start_line = self.line;
        self.token_start_column = self.column;
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.chars.clone();
        chars.next();
        chars.next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.source[self.pos..].starts_with(s)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            Span::new(
                self.token_start,
                self.pos,
                self.token_start_line,
                self.token_start_column,
            ),
        )
    }

    fn token_text(&self) -> &'a str {
        &self.source[self.token_start..self.pos]
    }

    /// Lex a single, double or triple quoted string literal.
    fn lex_string(&mut self, quote: char) -> Token {
        let triple: String = std::iter::repeat(quote).take(3).collect();
        let is_triple = self.starts_with(&triple);
        let open = if is_triple { 3 } else { 1 };
        for _ in 0..open {
            self.advance();
        }

        let mut content = String::new();
        loop {
            if is_triple && self.starts_with(&triple) {
                for _ in 0..3 {
                    self.advance();
                }
                break;
            }
            match self.peek() {
                None => {
                    return self
                        .make_token(TokenKind::Error("unterminated string literal".to_string()));
                }
                Some('\n') if !is_triple => {
                    return self
                        .make_token(TokenKind::Error("unterminated string literal".to_string()));
                }
                Some(c) if c == quote && !is_triple => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.advance() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('\'') => '\'',
                        Some('"') => '"',
                        Some('\n') => continue,
                        Some(c) => {
                            return self.make_token(TokenKind::Error(format!(
                                "invalid escape sequence: \\{}",
                                c
                            )));
                        }
                        None => {
                            return self.make_token(TokenKind::Error(
                                "unterminated string literal".to_string(),
                            ));
                        }
                    };
                    content.push(escaped);
                }
                Some(c) => {
                    content.push(c);
                    self.advance();
                }
            }
        }

        self.make_token(TokenKind::StringLit(content))
    }

    fn lex_number(&mut self) -> Token {
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.advance();
            } else if c == '.' && !is_float && self.peek_next() != Some('.') {
                is_float = true;
                self.advance();
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_next()
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                is_float = true;
                self.advance();
                self.advance();
            } else {
                break;
            }
        }

        let text = self.token_text().replace('_', "");
        if is_float {
            match text.parse::<f64>() {
                Ok(x) => self.make_token(TokenKind::Float(x)),
                Err(_) => self.make_token(TokenKind::Error(format!("invalid float: {}", text))),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.make_token(TokenKind::Integer(n)),
                Err(_) => self.make_token(TokenKind::Error(format!("invalid integer: {}", text))),
            }
        }
    }

    fn lex_identifier(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = self.token_text();
        if let Some(keyword) = TokenKind::keyword(text) {
            self.make_token(keyword)
        } else {
            self.make_token(TokenKind::Ident(text.to_string()))
        }
    }

    /// Lex an operator, optionally followed by `=` for augmented assignment.
    fn lex_operator_or_punctuation(&mut self) -> Token {
        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof);
        };

        let kind = match c {
            '(' | '[' | '{' => {
                self.depth += 1;
                match c {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                }
            }
            ')' | ']' | '}' => {
                self.depth = self.depth.saturating_sub(1);
                match c {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                }
            }
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            '~' => TokenKind::Tilde,
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    return self.make_token(TokenKind::Error(format!("unexpected character: {}", c)));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '+' => self.maybe_aug(TokenKind::Plus),
            '-' => self.maybe_aug(TokenKind::Minus),
            '%' => self.maybe_aug(TokenKind::Percent),
            '|' => self.maybe_aug(TokenKind::Pipe),
            '&' => self.maybe_aug(TokenKind::Ampersand),
            '^' => self.maybe_aug(TokenKind::Caret),
            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    self.maybe_aug(TokenKind::StarStar)
                } else {
                    self.maybe_aug(TokenKind::Star)
                }
            }
            '/' => {
                if self.peek() == Some('/') {
                    self.advance();
                    self.maybe_aug(TokenKind::SlashSlash)
                } else {
                    self.maybe_aug(TokenKind::Slash)
                }
            }
            _ => return self.make_token(TokenKind::Error(format!("unexpected character: {}", c))),
        };
        self.make_token(kind)
    }

    fn maybe_aug(&mut self, op: TokenKind) -> TokenKind {
        if self.peek() == Some('=') {
            self.advance();
            TokenKind::AugAssign(Box::new(op))
        } else {
            op
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("a = a + 1"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Assign,
                TokenKind::Ident("a".into()),
                TokenKind::Plus,
                TokenKind::Integer(1),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        assert_eq!(
            kinds("x = [1,\n 2]\n\n\ny = 2.5"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::LBracket,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::RBracket,
                TokenKind::Newline,
                TokenKind::Ident("y".into()),
                TokenKind::Assign,
                TokenKind::Float(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a //= 2 ** 3 != 4"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::AugAssign(Box::new(TokenKind::SlashSlash)),
                TokenKind::Integer(2),
                TokenKind::StarStar,
                TokenKind::Integer(3),
                TokenKind::Ne,
                TokenKind::Integer(4),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            kinds("s = 'it\\'s' # trailing\nt = \"\"\"a\nb\"\"\""),
            vec![
                TokenKind::Ident("s".into()),
                TokenKind::Assign,
                TokenKind::StringLit("it's".into()),
                TokenKind::Newline,
                TokenKind::Ident("t".into()),
                TokenKind::Assign,
                TokenKind::StringLit("a\nb".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = Lexer::new("'abc").tokenize();
        assert!(tokens[0].is_error());
    }

    #[test]
    fn test_span_tracking() {
        let tokens = Lexer::new("a\n  bc").tokenize();
        assert_eq!(tokens[2].span.line, 2);
        assert_eq!(tokens[2].span.column, 3);
        assert_eq!(tokens[2].span.len(), 2);
    }
}
