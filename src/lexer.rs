//! Lexical analyzer.
//!
//! Turns a source string into a finite token sequence terminated by an
//! end-of-input token.  Multi-character operators are scanned greedily: the
//! lexer extends a candidate while a longer operator is still possible and
//! settles for the shorter spelling otherwise.  A malformed literal aborts
//! only the token at hand; scanning resumes at the next character, so one
//! pass can report several lexical errors.

use std::iter::Peekable;
use std::rc::Rc;
use std::str::CharIndices;

use crate::ctx::Context;
use crate::diag::{Diagnostic, Position, SyntaxError};
use crate::token::{Lit, Token, TokenKind};

#[derive(Debug)]
pub struct Lexer<'s> {
    source: &'s str,
    iter: Peekable<CharIndices<'s>>,
    ctx: Rc<Context>,

    /// Byte offset one past the last consumed character.
    offset: usize,
    line: u32,
    column: u32,

    /// Start of the token being scanned.
    start: usize,
    start_pos: Position,

    tokens: Vec<Token>,
    diagnostics: Vec<Diagnostic>,
}

impl<'s> Lexer<'s> {
    pub fn new(source: &'s str, ctx: Rc<Context>) -> Lexer<'s> {
        Lexer {
            source,
            iter: source.char_indices().peekable(),
            ctx,
            offset: 0,
            line: 1,
            column: 1,
            start: 0,
            start_pos: Position::new(1, 1),
            tokens: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Scans the whole source.  Always returns a token vector ending in
    /// `Eof`; lexical errors are collected alongside.
    pub fn scan(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while let Some(ch) = self.begin_token() {
            self.scan_token(ch);
        }
        let pos = Position::new(self.line, self.column);
        let lexeme = self.ctx.symbol("");
        self.tokens.push(Token::new(TokenKind::Eof, lexeme, None, pos));
        (self.tokens, self.diagnostics)
    }

    /// Marks the start of the next token and consumes its first character.
    fn begin_token(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.start = self.offset;
        self.start_pos = Position::new(self.line, self.column);
        self.advance();
        Some(ch)
    }

    fn scan_token(&mut self, ch: char) {
        match ch {
            ' ' | '\t' | '\r' | '\n' => (),
            '(' => self.push(TokenKind::LeftParen),
            ')' => self.push(TokenKind::RightParen),
            '{' => self.push(TokenKind::LeftCurly),
            '}' => self.push(TokenKind::RightCurly),
            ',' => self.push(TokenKind::Comma),
            ';' => self.push(TokenKind::Semicolon),
            ':' => self.push(TokenKind::Colon),
            '?' => self.push(TokenKind::Question),
            '#' => self.push(TokenKind::SharpSign),
            '.' => self.push(TokenKind::Dot),
            '|' => self.push(TokenKind::Pipe),
            '+' => {
                let kind = if self.eat('=') {
                    TokenKind::PlusEqual
                } else if self.eat('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.push(kind);
            }
            '-' => {
                let kind = if self.eat('=') {
                    TokenKind::MinusEqual
                } else if self.eat('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.push(kind);
            }
            '*' => {
                let kind = if self.eat('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                };
                self.push(kind);
            }
            '%' => {
                let kind = if self.eat('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                };
                self.push(kind);
            }
            '^' => {
                let kind = if self.eat('=') {
                    TokenKind::CaretEqual
                } else {
                    TokenKind::Caret
                };
                self.push(kind);
            }
            '=' => {
                let kind = if self.eat('=') {
                    TokenKind::EqualEqual
                } else if self.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Equal
                };
                self.push(kind);
            }
            '!' => {
                let kind = if self.eat('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.push(kind);
            }
            '<' => {
                let kind = if self.eat('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.push(kind);
            }
            '>' => {
                let kind = if self.eat('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.push(kind);
            }
            '/' => {
                if self.eat('/') {
                    self.skip_line_comment();
                } else if self.eat('*') {
                    self.skip_block_comment();
                } else if self.eat('=') {
                    self.push(TokenKind::SlashEqual);
                } else {
                    self.push(TokenKind::Slash);
                }
            }
            '"' => self.scan_string(),
            '\'' => self.scan_char(),
            '0'..='9' => self.scan_number(),
            'a'..='z' | 'A'..='Z' | '_' => self.scan_identifier(),
            _ => self.report(SyntaxError::UnexpectedChar(ch)),
        }
    }

    fn scan_number(&mut self) {
        while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
            self.advance();
        }
        // A decimal point makes the literal floating, but only when a digit
        // follows; `1.f()` stays an int and a member access.
        let mut floating = false;
        if self.peek() == Some('.') && matches!(self.peek_next(), Some(ch) if ch.is_ascii_digit()) {
            floating = true;
            self.advance();
            while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[self.start..self.offset];
        if floating {
            match text.parse::<f64>() {
                Ok(n) => self.push_literal(TokenKind::DoubleLit, Lit::Double(n)),
                Err(_) => self.report(SyntaxError::BadNumberLiteral(text.to_owned())),
            }
        } else if text.len() > 1 && text.starts_with('0') {
            self.report(SyntaxError::LeadingZero);
        } else {
            match text.parse::<i64>() {
                Ok(n) => self.push_literal(TokenKind::IntLit, Lit::Int(n)),
                Err(_) => self.report(SyntaxError::BadNumberLiteral(text.to_owned())),
            }
        }
    }

    fn scan_identifier(&mut self) {
        while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == '_') {
            self.advance();
        }
        let sym = self.ctx.symbol(&self.source[self.start..self.offset]);
        match self.ctx.keyword(&sym) {
            Some(TokenKind::True) => self.push_literal(TokenKind::True, Lit::Bool(true)),
            Some(TokenKind::False) => self.push_literal(TokenKind::False, Lit::Bool(false)),
            Some(TokenKind::Any) => self.push_literal(TokenKind::Any, Lit::Any),
            Some(kind) => self.push(kind),
            None => self.push(TokenKind::Identifier),
        }
    }

    fn scan_string(&mut self) {
        let mut decoded = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.report(SyntaxError::UnterminatedString);
                    return;
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    if let Some(ch) = self.escape() {
                        decoded.push(ch);
                    }
                }
                Some(ch) => {
                    self.advance();
                    decoded.push(ch);
                }
            }
        }
        self.push_literal(TokenKind::StrLit, Lit::Str(Rc::from(decoded.as_str())));
    }

    fn scan_char(&mut self) {
        let decoded = match self.peek() {
            None | Some('\n') => {
                self.report(SyntaxError::UnterminatedChar);
                return;
            }
            Some('\'') => {
                self.advance();
                self.report(SyntaxError::EmptyChar);
                return;
            }
            Some('\\') => {
                self.advance();
                self.escape()
            }
            Some(ch) => {
                self.advance();
                Some(ch)
            }
        };
        if self.peek() == Some('\'') {
            self.advance();
            if let Some(ch) = decoded {
                self.push_literal(TokenKind::CharLit, Lit::Char(ch));
            }
        } else {
            self.report(SyntaxError::UnterminatedChar);
        }
    }

    /// Decodes one escape sequence, the backslash already consumed.
    fn escape(&mut self) -> Option<char> {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return None,
        };
        self.advance();
        match ch {
            'n' => Some('\n'),
            't' => Some('\t'),
            '"' => Some('"'),
            '\'' => Some('\''),
            '\\' => Some('\\'),
            '0' => Some('\0'),
            other => {
                self.report(SyntaxError::BadEscape(other));
                None
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while matches!(self.peek(), Some(ch) if ch != '\n') {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) {
        loop {
            match self.peek() {
                None => {
                    self.report(SyntaxError::UnterminatedComment);
                    return;
                }
                Some('*') => {
                    self.advance();
                    if self.peek() == Some('/') {
                        self.advance();
                        return;
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn push(&mut self, kind: TokenKind) {
        self.push_token(kind, None);
    }

    fn push_literal(&mut self, kind: TokenKind, lit: Lit) {
        self.push_token(kind, Some(lit));
    }

    fn push_token(&mut self, kind: TokenKind, literal: Option<Lit>) {
        let lexeme = self.ctx.symbol(&self.source[self.start..self.offset]);
        self.tokens
            .push(Token::new(kind, lexeme, literal, self.start_pos));
    }

    fn report(&mut self, error: SyntaxError) {
        let lexeme = &self.source[self.start..self.offset];
        self.diagnostics.push(Diagnostic {
            pos: self.start_pos,
            lexeme: if lexeme.is_empty() {
                None
            } else {
                Some(lexeme.to_owned())
            },
            error,
        });
    }

    fn peek(&mut self) -> Option<char> {
        self.iter.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        self.source[self.offset..].chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let (idx, ch) = self.iter.next()?;
        self.offset = idx + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(input: &str) -> (Vec<Token>, Vec<Diagnostic>) {
        let ctx = Context::new();
        Lexer::new(input, ctx).scan()
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        let (tokens, diagnostics) = scan(input);
        assert!(diagnostics.is_empty(), "diagnostics: {:?}", diagnostics);
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn fixed_tokens() {
        assert_eq!(
            kinds("+ - * / % ^ ( ) { } ; , . ? : # |"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Caret,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftCurly,
                TokenKind::RightCurly,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Question,
                TokenKind::Colon,
                TokenKind::SharpSign,
                TokenKind::Pipe,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn greedy_operators_prefer_longest() {
        assert_eq!(
            kinds("== = => != ! <= < >= > += ++ + -= -- -"),
            vec![
                TokenKind::EqualEqual,
                TokenKind::Equal,
                TokenKind::Arrow,
                TokenKind::BangEqual,
                TokenKind::Bang,
                TokenKind::LessEqual,
                TokenKind::Less,
                TokenKind::GreaterEqual,
                TokenKind::Greater,
                TokenKind::PlusEqual,
                TokenKind::PlusPlus,
                TokenKind::Plus,
                TokenKind::MinusEqual,
                TokenKind::MinusMinus,
                TokenKind::Minus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn adjacent_operators_without_blanks() {
        // `a+=-b` is `a += - b`, not `a + =- b`.
        assert_eq!(
            kinds("a+=-b"),
            vec![
                TokenKind::Identifier,
                TokenKind::PlusEqual,
                TokenKind::Minus,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_literal() {
        let (tokens, _) = scan("42");
        assert_eq!(tokens[0].kind, TokenKind::IntLit);
        assert_eq!(tokens[0].literal, Some(Lit::Int(42)));
    }

    #[test]
    fn double_literal() {
        let (tokens, _) = scan("4.25");
        assert_eq!(tokens[0].kind, TokenKind::DoubleLit);
        assert_eq!(tokens[0].literal, Some(Lit::Double(4.25)));
    }

    #[test]
    fn leading_zero_is_rejected() {
        let (tokens, diagnostics) = scan("042");
        assert_eq!(tokens.len(), 1); // just Eof
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].error, SyntaxError::LeadingZero);
    }

    #[test]
    fn zero_itself_is_fine() {
        let (tokens, diagnostics) = scan("0 0.5");
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].literal, Some(Lit::Int(0)));
        assert_eq!(tokens[1].literal, Some(Lit::Double(0.5)));
    }

    #[test]
    fn string_with_escapes() {
        let (tokens, diagnostics) = scan(r#""a\tb\n\"c\\""#);
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::StrLit);
        assert_eq!(tokens[0].literal, Some(Lit::Str(Rc::from("a\tb\n\"c\\"))));
        // The lexeme is the raw source slice, quotes included.
        assert_eq!(tokens[0].lexeme.name(), r#""a\tb\n\"c\\""#);
    }

    #[test]
    fn unterminated_string_aborts_token_and_continues() {
        let (tokens, diagnostics) = scan("\"oops\n42");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].error, SyntaxError::UnterminatedString);
        assert_eq!(diagnostics[0].pos, Position::new(1, 1));
        // Lexing resumed on the next line.
        assert_eq!(tokens[0].literal, Some(Lit::Int(42)));
    }

    #[test]
    fn char_literals() {
        let (tokens, diagnostics) = scan(r"'a' '\n' '\''");
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].literal, Some(Lit::Char('a')));
        assert_eq!(tokens[1].literal, Some(Lit::Char('\n')));
        assert_eq!(tokens[2].literal, Some(Lit::Char('\'')));
    }

    #[test]
    fn unterminated_char() {
        let (_, diagnostics) = scan("'a");
        assert_eq!(diagnostics[0].error, SyntaxError::UnterminatedChar);
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("if unless while structure int var foo"),
            vec![
                TokenKind::If,
                TokenKind::Identifier,
                TokenKind::While,
                TokenKind::Structure,
                TokenKind::TyInt,
                TokenKind::TyVar,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn bool_and_any_literals_decode() {
        let (tokens, _) = scan("true false any");
        assert_eq!(tokens[0].literal, Some(Lit::Bool(true)));
        assert_eq!(tokens[1].literal, Some(Lit::Bool(false)));
        assert_eq!(tokens[2].literal, Some(Lit::Any));
    }

    #[test]
    fn comments_are_discarded() {
        assert_eq!(
            kinds("1 // line comment\n/* block\ncomment */ 2"),
            vec![TokenKind::IntLit, TokenKind::IntLit, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_block_comment() {
        let (_, diagnostics) = scan("/* no end");
        assert_eq!(diagnostics[0].error, SyntaxError::UnterminatedComment);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let (tokens, _) = scan("one\n  two");
        assert_eq!(tokens[0].pos, Position::new(1, 1));
        assert_eq!(tokens[1].pos, Position::new(2, 3));
    }

    #[test]
    fn lexemes_round_trip_through_positions() {
        let source = "int x = 5;\nstring s = \"hi\";\nwhile (x >= 0) x -= 1;\n";
        let (tokens, diagnostics) = scan(source);
        assert!(diagnostics.is_empty());
        let lines: Vec<&str> = source.lines().collect();
        for token in &tokens {
            if token.kind == TokenKind::Eof {
                continue;
            }
            let line = lines[(token.pos.line - 1) as usize];
            let start = (token.pos.column - 1) as usize;
            let sliced: String = line
                .chars()
                .skip(start)
                .take(token.lexeme.name().chars().count())
                .collect();
            assert_eq!(sliced, token.lexeme.name());
        }
    }
}
