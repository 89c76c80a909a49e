//! Scanner for Kyra source code.
//!
//! Kyra blocks are indentation-based, so the scanner emits `Newline`,
//! `Indent` and `Dedent` layout tokens in addition to ordinary tokens.
//! Indentation is tracked with a stack of widths; a tab counts as 4 spaces.

use crate::error::LexerError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;

/// The scanner transforms source text into a stream of tokens.
pub struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    indent_stack: Vec<usize>,
    at_line_start: bool,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
        }
    }

    /// Scan all tokens from the source.
    pub fn scan_tokens(mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            if self.at_line_start {
                self.at_line_start = false;
                self.scan_indentation(&mut tokens);
            }

            self.skip_whitespace_except_newline();

            if self.is_at_end() {
                break;
            }

            let ch = self.peek();

            if ch == '\n' {
                let span = self.current_span(1);
                self.advance();
                self.line += 1;
                self.column = 1;
                self.at_line_start = true;
                tokens.push(Token::new(TokenKind::Newline, span));
                continue;
            }

            if ch == '#' {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek_next() == Some('*') {
                self.skip_block_comment();
                continue;
            }

            let token = if is_ident_start(ch) {
                self.scan_identifier_or_keyword()
            } else if ch.is_ascii_digit() {
                self.scan_number()?
            } else if ch == '"' {
                if self.peek_next() == Some('"') && self.peek_at(2) == Some('"') {
                    self.scan_triple_string()?
                } else {
                    self.scan_string('"')?
                }
            } else if ch == '\'' {
                self.scan_string('\'')?
            } else {
                self.scan_symbol()?
            };
            tokens.push(token);
        }

        // Close any remaining blocks at end of input.
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push(Token::new(
                TokenKind::Dedent,
                Span::new(self.pos, self.pos, self.line, self.column),
            ));
        }
        tokens.push(Token::eof(self.pos, self.line, self.column));

        Ok(tokens)
    }

    /// Measure leading whitespace and emit Indent/Dedent tokens as needed.
    /// Blank lines and comment-only lines do not affect indentation.
    fn scan_indentation(&mut self, tokens: &mut Vec<Token>) {
        let mut width = 0;
        while !self.is_at_end() {
            match self.peek() {
                ' ' => {
                    width += 1;
                    self.advance();
                }
                '\t' => {
                    width += 4;
                    self.advance();
                }
                _ => break,
            }
        }

        if self.is_at_end() || self.peek() == '\n' || self.peek() == '#' {
            return;
        }
        if self.peek() == '/' && self.peek_next() == Some('*') {
            return;
        }

        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            tokens.push(Token::new(
                TokenKind::Indent,
                Span::new(self.pos, self.pos, self.line, 1),
            ));
        } else if width < current {
            while self.indent_stack.len() > 1 && width < *self.indent_stack.last().unwrap_or(&0) {
                self.indent_stack.pop();
                tokens.push(Token::new(
                    TokenKind::Dedent,
                    Span::new(self.pos, self.pos, self.line, 1),
                ));
            }
        }
    }

    // ===== Character helpers =====

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        self.column += 1;
        ch
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn current_span(&self, len: usize) -> Span {
        Span::new(self.pos, self.pos + len, self.line, self.column)
    }

    fn skip_whitespace_except_newline(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        self.advance();
        self.advance();
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == Some('/') {
                self.advance();
                self.advance();
                break;
            }
            let ch = self.advance();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            }
        }
    }

    // ===== Token scanners =====

    fn scan_identifier_or_keyword(&mut self) -> Token {
        let start = self.pos;
        let column = self.column;
        while !self.is_at_end() && is_ident_continue(self.peek()) {
            self.advance();
        }
        let lexeme: String = self.chars[start..self.pos].iter().collect();
        let span = Span::new(start, self.pos, self.line, column);

        match TokenKind::keyword(&lexeme) {
            Some(kind) => Token::new(kind, span),
            None => Token::new(TokenKind::Identifier(lexeme), span),
        }
    }

    fn scan_number(&mut self) -> Result<Token, LexerError> {
        let start = self.pos;
        let column = self.column;
        let mut has_dot = false;

        while !self.is_at_end() {
            let ch = self.peek();
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        let lexeme: String = self.chars[start..self.pos].iter().collect();
        let span = Span::new(start, self.pos, self.line, column);
        let value: f64 = lexeme
            .parse()
            .map_err(|_| LexerError::InvalidNumber(lexeme.clone(), span))?;

        Ok(Token::new(TokenKind::NumberLiteral(value), span))
    }

    fn scan_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let column = self.column;
        let line = self.line;
        let start = self.pos;
        self.advance(); // opening quote

        let content_start = self.pos;
        while !self.is_at_end() && self.peek() != quote {
            let ch = self.advance();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            }
        }

        if self.is_at_end() {
            return Err(LexerError::UnterminatedString(Span::new(
                start, self.pos, line, column,
            )));
        }

        let content: String = self.chars[content_start..self.pos].iter().collect();
        self.advance(); // closing quote

        Ok(Token::new(
            TokenKind::StringLiteral(content),
            Span::new(start, self.pos, line, column),
        ))
    }

    fn scan_triple_string(&mut self) -> Result<Token, LexerError> {
        let column = self.column;
        let line = self.line;
        let start = self.pos;
        self.advance();
        self.advance();
        self.advance();

        let content_start = self.pos;
        loop {
            if self.is_at_end() {
                return Err(LexerError::UnterminatedString(Span::new(
                    start, self.pos, line, column,
                )));
            }
            if self.peek() == '"' && self.peek_next() == Some('"') && self.peek_at(2) == Some('"') {
                break;
            }
            let ch = self.advance();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            }
        }

        let content: String = self.chars[content_start..self.pos].iter().collect();
        self.advance();
        self.advance();
        self.advance();

        Ok(Token::new(
            TokenKind::StringLiteral(content),
            Span::new(start, self.pos, line, column),
        ))
    }

    fn scan_symbol(&mut self) -> Result<Token, LexerError> {
        let start = self.pos;
        let column = self.column;
        let line = self.line;
        let ch = self.advance();

        let kind = match ch {
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '+' => {
                if self.match_char('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.match_char('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.match_char('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.match_char('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                }
            }
            '%' => TokenKind::Percent,
            '=' => {
                if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                }
            }
            '!' => {
                if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '&' => {
                if self.match_char('&') {
                    TokenKind::And
                } else {
                    return Err(LexerError::UnexpectedChar(
                        ch,
                        Span::new(start, self.pos, line, column),
                    ));
                }
            }
            '|' => {
                if self.match_char('|') {
                    TokenKind::Or
                } else {
                    return Err(LexerError::UnexpectedChar(
                        ch,
                        Span::new(start, self.pos, line, column),
                    ));
                }
            }
            _ => {
                return Err(LexerError::UnexpectedChar(
                    ch,
                    Span::new(start, self.pos, line, column),
                ));
            }
        };

        Ok(Token::new(kind, Span::new(start, self.pos, line, column)))
    }

    fn match_char(&mut self, expected: char) -> bool {
        if !self.is_at_end() && self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(
            kinds("let x = 1 + 2"),
            vec![
                TokenKind::Let,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Equal,
                TokenKind::NumberLiteral(1.0),
                TokenKind::Plus,
                TokenKind::NumberLiteral(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("== != <= >= && || += -="),
            vec![
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indentation_block() {
        assert_eq!(
            kinds("if x:\n  y\nz"),
            vec![
                TokenKind::If,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("y".to_string()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier("z".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_nested_dedents_close_all_levels() {
        let toks = kinds("while a:\n  if b:\n    c\nd");
        let dedents = toks
            .iter()
            .filter(|k| matches!(k, TokenKind::Dedent))
            .count();
        assert_eq!(dedents, 2);
    }

    #[test]
    fn test_blank_and_comment_lines_ignored_for_indent() {
        let toks = kinds("if x:\n\n  # comment\n  y\n");
        let indents = toks
            .iter()
            .filter(|k| matches!(k, TokenKind::Indent))
            .count();
        assert_eq!(indents, 1);
    }

    #[test]
    fn test_dedents_emitted_at_eof() {
        let toks = kinds("if x:\n  y");
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            kinds("\"hello\" 'world'"),
            vec![
                TokenKind::StringLiteral("hello".to_string()),
                TokenKind::StringLiteral("world".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_triple_string() {
        assert_eq!(
            kinds("\"\"\"a\nb\"\"\""),
            vec![TokenKind::StringLiteral("a\nb".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Scanner::new("\"oops").scan_tokens().is_err());
    }

    #[test]
    fn test_float_literal() {
        assert_eq!(
            kinds("3.25"),
            vec![TokenKind::NumberLiteral(3.25), TokenKind::Eof]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("1 # trailing\n/* block\ncomment */ 2"),
            vec![
                TokenKind::NumberLiteral(1.0),
                TokenKind::Newline,
                TokenKind::NumberLiteral(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unexpected_char() {
        assert!(Scanner::new("let x = @").scan_tokens().is_err());
    }
}
