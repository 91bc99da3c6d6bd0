//! Query Lexer
//!
//! Tokenizes test suite queries for parsing. Every token carries the
//! character offset it started at so syntax errors can point into the
//! query string.
//!
//! Example query:
//! ```text
//! select i-id i-input from item where i-input ~ "rain" & i-wf = 1
//! ```

use std::fmt;

use crate::error::{Result, TsdbError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Select,
    From,
    Where,
    Null,

    // Literals
    Identifier(String),
    String(String),
    Integer(i64),
    /// Unquoted `YYYY-MM-DD`
    Date(String),

    // Comparison operators
    Match,         // ~
    NotMatch,      // !~
    Equal,         // = ==
    NotEqual,      // !=
    LessThan,      // <
    LessThanEq,    // <=
    GreaterThan,   // >
    GreaterThanEq, // >=

    // Connectives
    And, // & && and
    Or,  // | || or
    Not, // ! not

    Star,       // *
    Dot,        // .
    LeftParen,  // (
    RightParen, // )

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{}'", s),
            Token::String(s) => write!(f, "string \"{}\"", s),
            Token::Integer(n) => write!(f, "integer {}", n),
            Token::Date(d) => write!(f, "date {}", d),
            Token::Eof => f.write_str("end of query"),
            Token::Match => f.write_str("'~'"),
            Token::NotMatch => f.write_str("'!~'"),
            Token::Equal => f.write_str("'='"),
            Token::NotEqual => f.write_str("'!='"),
            Token::LessThan => f.write_str("'<'"),
            Token::LessThanEq => f.write_str("'<='"),
            Token::GreaterThan => f.write_str("'>'"),
            Token::GreaterThanEq => f.write_str("'>='"),
            Token::Star => f.write_str("'*'"),
            Token::Dot => f.write_str("'.'"),
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// A token and the offset of its first character
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub position: usize,
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current = chars.first().copied();
        Lexer {
            input: chars,
            position: 0,
            current_char: current,
        }
    }

    /// Tokenize the entire input; the last lexeme is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Lexeme>> {
        let mut lexemes = Vec::new();

        loop {
            let lexeme = self.next_lexeme()?;
            let done = lexeme.token == Token::Eof;
            lexemes.push(lexeme);
            if done {
                break;
            }
        }

        Ok(lexemes)
    }

    pub fn next_lexeme(&mut self) -> Result<Lexeme> {
        self.skip_whitespace();
        let position = self.position;

        let token = match self.current_char {
            None => Token::Eof,
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_identifier(),
            Some(ch) if ch.is_ascii_digit() => self.read_number(false)?,
            Some('-') if self.peek().map_or(false, |c| c.is_ascii_digit()) => {
                self.advance();
                self.read_number(true)?
            }
            Some(ch) if ch == '"' || ch == '\'' => self.read_string()?,
            Some(_) => self.read_operator()?,
        };

        Ok(Lexeme { token, position })
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Field and table names may contain hyphens (`i-id`, `parse-id`)
    fn read_identifier(&mut self) -> Token {
        let mut result = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match result.to_lowercase().as_str() {
            "select" => Token::Select,
            "from" => Token::From,
            "where" => Token::Where,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "null" => Token::Null,
            _ => Token::Identifier(result),
        }
    }

    /// Integers, or `YYYY-MM-DD` dates when the digits are hyphenated
    fn read_number(&mut self, negative: bool) -> Result<Token> {
        let start = if negative {
            self.position - 1
        } else {
            self.position
        };
        let mut result = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() || (ch == '-' && !negative) {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if result.contains('-') {
            if is_iso_date(&result) {
                return Ok(Token::Date(result));
            }
            return Err(TsdbError::syntax(start, format!("invalid number '{}'", result)));
        }

        let text = if negative {
            format!("-{}", result)
        } else {
            result
        };
        text.parse::<i64>()
            .map(Token::Integer)
            .map_err(|e| TsdbError::syntax(start, format!("invalid integer '{}': {}", text, e)))
    }

    /// Quoted strings; a backslash only escapes the closing quote so regular
    /// expressions pass through untouched
    fn read_string(&mut self) -> Result<Token> {
        let start = self.position;
        let quote_char = match self.current_char {
            Some(c) => c,
            None => return Err(TsdbError::syntax(start, "expected string literal")),
        };
        self.advance();

        let mut result = String::new();

        while let Some(ch) = self.current_char {
            if ch == '\\' && self.peek() == Some(quote_char) {
                result.push(quote_char);
                self.advance();
                self.advance();
            } else if ch == quote_char {
                self.advance();
                return Ok(Token::String(result));
            } else {
                result.push(ch);
                self.advance();
            }
        }

        Err(TsdbError::syntax(start, "unterminated string literal"))
    }

    fn read_operator(&mut self) -> Result<Token> {
        let start = self.position;
        let ch = match self.current_char {
            Some(c) => c,
            None => return Ok(Token::Eof),
        };
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('~', _) => (Token::Match, 1),
            ('!', Some('~')) => (Token::NotMatch, 2),
            ('!', Some('=')) => (Token::NotEqual, 2),
            ('!', _) => (Token::Not, 1),
            ('=', Some('=')) => (Token::Equal, 2),
            ('=', _) => (Token::Equal, 1),
            ('<', Some('=')) => (Token::LessThanEq, 2),
            ('<', _) => (Token::LessThan, 1),
            ('>', Some('=')) => (Token::GreaterThanEq, 2),
            ('>', _) => (Token::GreaterThan, 1),
            ('&', Some('&')) => (Token::And, 2),
            ('&', _) => (Token::And, 1),
            ('|', Some('|')) => (Token::Or, 2),
            ('|', _) => (Token::Or, 1),
            ('*', _) => (Token::Star, 1),
            ('.', _) => (Token::Dot, 1),
            ('(', _) => (Token::LeftParen, 1),
            (')', _) => (Token::RightParen, 1),
            _ => {
                return Err(TsdbError::syntax(
                    start,
                    format!("unexpected character '{}'", ch),
                ))
            }
        };

        for _ in 0..width {
            self.advance();
        }
        Ok(token)
    }
}

fn is_iso_date(text: &str) -> bool {
    let parts: Vec<&str> = text.split('-').collect();
    matches!(parts.as_slice(), [y, m, d] if y.len() == 4 && m.len() == 2 && d.len() == 2)
}
